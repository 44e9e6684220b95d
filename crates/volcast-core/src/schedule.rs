//! Render request coalescing.

/// Collapses any number of render requests between two animation ticks into
/// one render.
#[derive(Debug, Clone, Default)]
pub struct FrameScheduler {
    render_dirty: bool,
    requests: u64,
    frames: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks for a render on the next tick.
    pub fn request_render(&mut self) {
        self.render_dirty = true;
        self.requests += 1;
    }

    /// Whether a render is pending.
    pub fn is_dirty(&self) -> bool {
        self.render_dirty
    }

    /// Called once per animation frame. Returns `true` when the caller should
    /// render now.
    pub fn tick(&mut self) -> bool {
        if !self.render_dirty {
            return false;
        }
        self.render_dirty = false;
        self.frames += 1;
        true
    }

    /// Renders issued so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Requests coalesced into renders that never happened.
    pub fn coalesced(&self) -> u64 {
        self.requests.saturating_sub(self.frames)
    }
}

//! Batched, cancellable volume loading.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ErrorKind, Result, VolumeError};
use crate::store::{VolumeBackend, VolumeStore};
use crate::volume::VolumeHeader;

/// A source of slice data.
///
/// Implementations decode their own format; the store only sees raw slice
/// buffers in the byte order declared by [`VolumeLoader::header`].
pub trait VolumeLoader {
    /// Dimensions, bit depth and byte order of the volume.
    fn header(&self) -> Result<VolumeHeader>;

    /// Returns up to `max_slices` further slices, or `None` once exhausted.
    fn next_batch(&mut self, max_slices: u32) -> Result<Option<Vec<Vec<u8>>>>;

    /// Metadata attached to the volume when the load starts.
    fn attributes(&self) -> Vec<(String, serde_json::Value)> {
        Vec::new()
    }

    /// Releases any resources held for an abandoned load.
    fn cancel(&mut self) {}
}

impl<L: VolumeLoader + ?Sized> VolumeLoader for Box<L> {
    fn header(&self) -> Result<VolumeHeader> {
        (**self).header()
    }

    fn next_batch(&mut self, max_slices: u32) -> Result<Option<Vec<Vec<u8>>>> {
        (**self).next_batch(max_slices)
    }

    fn attributes(&self) -> Vec<(String, serde_json::Value)> {
        (**self).attributes()
    }

    fn cancel(&mut self) {
        (**self).cancel();
    }
}

/// Shared cancellation flag, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a load failed, as reported to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&VolumeError> for LoadFailure {
    fn from(err: &VolumeError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Load progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    /// Batches uploaded so far.
    Loading(u32),
    Done,
    Cancelled,
    Failed(LoadFailure),
}

impl LoadState {
    /// Whether the sequence has stopped.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed(_))
    }
}

type ProgressFn = Box<dyn FnMut(u32, u32)>;
type CompleteFn = Box<dyn FnOnce(std::result::Result<(), LoadFailure>)>;

/// Drives a [`VolumeLoader`] into a [`VolumeStore`] one batch per
/// [`LoadSequence::step`].
///
/// The completion callback fires exactly once when the load succeeds or
/// fails. A cancelled load never fires it.
pub struct LoadSequence<L> {
    loader: L,
    state: LoadState,
    token: CancelToken,
    total: u32,
    loaded: u32,
    on_progress: Option<ProgressFn>,
    on_complete: Option<CompleteFn>,
}

impl<L: VolumeLoader> LoadSequence<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            state: LoadState::Idle,
            token: CancelToken::new(),
            total: 0,
            loaded: 0,
            on_progress: None,
            on_complete: None,
        }
    }

    /// Called with `(loaded, total)` slices after every batch.
    #[must_use]
    pub fn on_progress(mut self, f: impl FnMut(u32, u32) + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_complete(mut self, f: impl FnOnce(std::result::Result<(), LoadFailure>) + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Token that cancels this sequence, possibly from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Slices uploaded and slices expected.
    pub fn progress(&self) -> (u32, u32) {
        (self.loaded, self.total)
    }

    /// Advances the load by one batch, starting it first if idle.
    pub fn step<B: VolumeBackend>(&mut self, store: &mut VolumeStore<B>) -> &LoadState {
        if self.state.is_finished() {
            return &self.state;
        }
        if self.token.is_cancelled() {
            self.finish_cancelled(store);
            return &self.state;
        }

        let result = match self.state {
            LoadState::Idle => self.start(store),
            LoadState::Loading(batch) => self.upload_batch(store, batch),
            _ => Ok(()),
        };
        if let Err(err) = result {
            log::error!("volume load failed: {err}");
            store.abort_load();
            self.state = LoadState::Failed(LoadFailure::from(&err));
            if let Some(done) = self.on_complete.take() {
                done(Err(LoadFailure::from(&err)));
            }
        }
        &self.state
    }

    /// Steps until the sequence finishes.
    pub fn run<B: VolumeBackend>(&mut self, store: &mut VolumeStore<B>) -> &LoadState {
        while !self.state.is_finished() {
            self.step(store);
        }
        &self.state
    }

    fn start<B: VolumeBackend>(&mut self, store: &mut VolumeStore<B>) -> Result<()> {
        let header = self.loader.header()?;
        store.begin_load(header)?;
        if let Some(info) = store.info_mut() {
            for (key, value) in self.loader.attributes() {
                info.set_attribute(key, value);
            }
        }
        self.total = header.dims[2];
        self.loaded = 0;
        self.state = LoadState::Loading(0);
        log::info!("loading {} slices of {:?}", self.total, header.dims);
        Ok(())
    }

    fn upload_batch<B: VolumeBackend>(&mut self, store: &mut VolumeStore<B>, batch: u32) -> Result<()> {
        let size = store.batch_size().ok_or(VolumeError::NotLoading)?;
        let Some(slices) = self.loader.next_batch(size)? else {
            return Err(VolumeError::InvalidBatch(format!(
                "loader ran out after {} of {} slices",
                self.loaded, self.total
            )));
        };
        // the loader may have been slow; a cancel issued meanwhile wins
        if self.token.is_cancelled() {
            self.finish_cancelled(store);
            return Ok(());
        }

        let refs: Vec<&[u8]> = slices.iter().map(Vec::as_slice).collect();
        store.append_slices(&refs)?;
        self.loaded += refs.len() as u32;
        self.state = LoadState::Loading(batch + 1);
        if let Some(progress) = self.on_progress.as_mut() {
            progress(self.loaded, self.total);
        }

        if self.loaded >= self.total {
            store.end_load()?;
            self.state = LoadState::Done;
            if let Some(done) = self.on_complete.take() {
                done(Ok(()));
            }
        }
        Ok(())
    }

    fn finish_cancelled<B: VolumeBackend>(&mut self, store: &mut VolumeStore<B>) {
        log::info!("volume load cancelled after {} slices", self.loaded);
        if matches!(self.state, LoadState::Loading(_)) {
            store.abort_load();
        }
        self.loader.cancel();
        self.on_complete = None;
        self.state = LoadState::Cancelled;
    }
}

//! Window/level mapping of MIP and x-ray intensities to display grey, and
//! the final composite of the intermediate image.

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::params::{RenderMode, RenderParams};

/// Scale of the x-ray intensity image (a full-strength integral maps here).
pub const XRAY_SCALE: f32 = 65535.0;

/// Width and unmasked level of the default x-ray window.
const XRAY_WINDOW: f32 = 32768.0;

/// A display window in raw intensity units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowLevel {
    pub width: f32,
    pub level: f32,
}

impl WindowLevel {
    pub fn new(width: f32, level: f32) -> Self {
        Self { width, level }
    }

    /// Window spanning `[lo, hi]`.
    pub fn from_range(lo: f32, hi: f32) -> Self {
        Self {
            width: hi - lo,
            level: (hi + lo) * 0.5,
        }
    }

    /// Maps a raw value to `[0, 1]`.
    pub fn apply(&self, value: f32) -> f32 {
        let width = self.width.max(1e-6);
        ((value - (self.level - width * 0.5)) / width).clamp(0.0, 1.0)
    }
}

/// Per-mode window defaults derived from the auto window of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowPresets {
    pub mip: WindowLevel,
    pub xray_unmasked: WindowLevel,
    pub xray_masked: WindowLevel,
    pub slice: WindowLevel,
}

impl WindowPresets {
    pub fn from_auto(auto: WindowLevel) -> Self {
        Self {
            mip: WindowLevel::new(0.65 * auto.width, auto.level + 0.5 * auto.width),
            xray_unmasked: WindowLevel::new(XRAY_WINDOW, XRAY_WINDOW),
            xray_masked: WindowLevel::new(XRAY_WINDOW, XRAY_WINDOW / 3.0),
            slice: auto,
        }
    }

    /// Window used for a 3D mode.
    pub fn for_mode(&self, mode: RenderMode, use_mask: bool) -> WindowLevel {
        match mode {
            RenderMode::XRay if use_mask => self.xray_masked,
            RenderMode::XRay => self.xray_unmasked,
            RenderMode::Mip | RenderMode::Vr => self.mip,
        }
    }
}

/// Re-centres an x-ray window that would show a nearly black or nearly
/// white image.
///
/// `pixels` are rendered x-ray values on the [`XRAY_SCALE`] scale.
pub fn sanity_check_xray_window(pixels: &[u16], current: WindowLevel) -> WindowLevel {
    if pixels.is_empty() {
        return current;
    }
    let lo = current.level - 0.4 * current.width;
    let hi = current.level + 0.4 * current.width;

    let mut above_lo = 0usize;
    let mut below_hi = 0usize;
    let mut sum = 0.0f64;
    for &p in pixels {
        let v = f32::from(p);
        if v > lo {
            above_lo += 1;
        }
        if v < hi {
            below_hi += 1;
        }
        sum += f64::from(p);
    }
    let n = pixels.len() as f64;
    let mean = (sum / n) as f32;

    if (above_lo as f64) < 0.1 * n || (below_hi as f64) < 0.7 * n {
        log::debug!(
            "x-ray window {:?} rejected, re-centering on mean {mean}",
            current
        );
        WindowLevel::new(current.width, 1.5 * mean)
    } else {
        current
    }
}

/// Inputs of the display composite that do not vary per pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySettings {
    pub mode: RenderMode,
    pub window: WindowLevel,
    /// Raw value corresponding to a normalized intensity of 1.
    pub intensity_scale: f32,
    pub background: Vec3,
}

impl DisplaySettings {
    /// Settings for displaying a frame of a volume whose samples top out at
    /// `max_value`. An explicit window in `params` wins over the per-mode
    /// preset derived from `auto`.
    pub fn for_frame(params: &RenderParams, max_value: u32, auto: Option<WindowLevel>) -> Self {
        Self::for_masked_frame(params, params.use_mask, max_value, auto)
    }

    /// Like [`for_frame`](Self::for_frame), with the masked x-ray window
    /// chosen by `masked` instead of the mask flag. Hosts pass `false` when
    /// the mask hides nothing.
    pub fn for_masked_frame(
        params: &RenderParams,
        masked: bool,
        max_value: u32,
        auto: Option<WindowLevel>,
    ) -> Self {
        let max_value = max_value as f32;
        let fallback = match params.mode {
            RenderMode::XRay => WindowPresets::from_auto(WindowLevel::from_range(0.0, max_value))
                .for_mode(RenderMode::XRay, masked),
            RenderMode::Mip | RenderMode::Vr => WindowLevel::from_range(0.0, max_value),
        };
        let window = params
            .window
            .or_else(|| auto.map(|a| WindowPresets::from_auto(a).for_mode(params.mode, masked)))
            .unwrap_or(fallback);
        let intensity_scale = match params.mode {
            RenderMode::Mip => max_value,
            RenderMode::XRay => XRAY_SCALE,
            RenderMode::Vr => 1.0,
        };
        Self {
            mode: params.mode,
            window,
            intensity_scale,
            background: Vec3::from_array(params.background),
        }
    }

    /// Composites one pixel of the intermediate image.
    ///
    /// `volume` is `(r, g, b, 1 - T)` in VR mode and `(intensity, ..)`
    /// otherwise; `overlay` is the overlay colour and weight.
    pub fn composite(&self, volume: Vec4, overlay: Vec4) -> [u8; 4] {
        let base = match self.mode {
            RenderMode::Vr => volume.truncate() + self.background * (1.0 - volume.w),
            RenderMode::Mip | RenderMode::XRay => {
                Vec3::splat(self.window.apply(volume.x * self.intensity_scale))
            }
        };
        let rgb = base.lerp(overlay.truncate(), overlay.w.clamp(0.0, 1.0));
        let [r, g, b] = rgb.to_array().map(to_byte);
        [r, g, b, 255]
    }
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

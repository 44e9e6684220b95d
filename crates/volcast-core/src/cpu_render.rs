//! Reference renderer running the full per-pixel pipeline on the CPU.

use glam::Vec4;

use crate::mask::ReliefMask;
use crate::overlay::{self, OverlayBuffer};
use crate::params::{FeatureFlags, RenderMode, RenderParams};
use crate::raymarch::{PickResult, RayMarcher, RayResult};
use crate::sampler::VolumeSampler;
use crate::shadow::{ShadowMaps, SHADOW_MAP_SIZE};
use crate::slab::Slab;
use crate::view::ViewParams;
use crate::volume::VolumeInfo;
use crate::window::{DisplaySettings, XRAY_SCALE};

/// Everything that describes one frame apart from the volume itself.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub params: &'a RenderParams,
    pub view: &'a ViewParams,
    pub slab: &'a Slab,
    pub overlay: Option<&'a OverlayBuffer>,
    /// Used when the parameters enable masking.
    pub mask: Option<&'a ReliefMask>,
}

impl<'a> Frame<'a> {
    pub fn new(params: &'a RenderParams, view: &'a ViewParams, slab: &'a Slab) -> Self {
        Self {
            params,
            view,
            slab,
            overlay: None,
            mask: None,
        }
    }

    #[must_use]
    pub fn with_overlay(mut self, overlay: &'a OverlayBuffer) -> Self {
        self.overlay = Some(overlay);
        self
    }

    #[must_use]
    pub fn with_mask(mut self, mask: &'a ReliefMask) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Ray marcher for this frame, with its mask attached.
    fn marcher<'s, S: VolumeSampler>(&self, sampler: &'s S, info: &VolumeInfo) -> RayMarcher<'s, S>
    where
        'a: 's,
    {
        let marcher = RayMarcher::new(sampler, info, self.params, self.slab);
        match self.mask {
            Some(mask) => marcher.with_mask(mask),
            None => marcher,
        }
    }
}

/// Output of the ray march before windowing.
#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateImage {
    width: u32,
    height: u32,
    mode: RenderMode,
    volume: Vec<Vec4>,
    overlay: Vec<Vec4>,
    transmittance: Vec<f32>,
}

impl IntermediateImage {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Volume target texel: `(r, g, b, 1 - T)` in VR, `(intensity, 0, 0, 1)`
    /// otherwise.
    pub fn volume(&self, x: u32, y: u32) -> Vec4 {
        self.volume[self.index(x, y)]
    }

    /// Overlay target texel: colour and weight.
    pub fn overlay(&self, x: u32, y: u32) -> Vec4 {
        self.overlay[self.index(x, y)]
    }

    /// Remaining transmittance of a pixel's ray.
    pub fn transmittance(&self, x: u32, y: u32) -> f32 {
        self.transmittance[self.index(x, y)]
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }

    /// Applies the display composite to every pixel, giving RGBA8 rows.
    pub fn to_rgba(&self, display: &DisplaySettings) -> Vec<u8> {
        self.volume
            .iter()
            .zip(&self.overlay)
            .flat_map(|(&v, &o)| display.composite(v, o))
            .collect()
    }

    /// X-ray intensities on the 16-bit display scale, for window checks.
    pub fn xray_pixels(&self) -> Vec<u16> {
        self.volume
            .iter()
            .map(|v| (v.x.clamp(0.0, 1.0) * XRAY_SCALE).round() as u16)
            .collect()
    }
}

fn overlay_texel(mode: RenderMode, result: &RayResult) -> Vec4 {
    match mode {
        // VR folds surfaces into its colour
        RenderMode::Vr => Vec4::ZERO,
        RenderMode::Mip | RenderMode::XRay => result.overlay,
    }
}

/// Renders a frame of `width x height` pixels.
pub fn render_cpu<S: VolumeSampler>(
    sampler: &S,
    info: &VolumeInfo,
    frame: &Frame<'_>,
    width: u32,
    height: u32,
) -> IntermediateImage {
    let params = frame.params;
    let marcher = frame.marcher(sampler, info);
    let shadows = marcher
        .flags()
        .contains(FeatureFlags::SHADOWS)
        .then(|| ShadowMaps::generate(&marcher, SHADOW_MAP_SIZE));
    let marcher = match &shadows {
        Some(maps) => marcher.with_shadows(maps),
        None => marcher,
    };

    let matrices = frame
        .view
        .matrices(width as f32 / height.max(1) as f32, params.perspective);
    let aspect = info.aspect();
    let count = (width * height) as usize;
    let mut image = IntermediateImage {
        width,
        height,
        mode: params.mode,
        volume: Vec::with_capacity(count),
        overlay: Vec::with_capacity(count),
        transmittance: Vec::with_capacity(count),
    };
    let mut steps = 0u64;
    for y in 0..height {
        for x in 0..width {
            let ray = matrices.pixel_ray(x, y, (width, height));
            let surfaces =
                overlay::surfaces_at(frame.overlay, params.marker.as_ref(), aspect, &ray, (x, y));
            let result = marcher.march(&ray, (x, y), &surfaces);
            steps += u64::from(result.steps);
            image.volume.push(result.volume_texel(params.mode));
            image.overlay.push(overlay_texel(params.mode, &result));
            image.transmittance.push(result.transmittance);
        }
    }
    log::debug!(
        "cpu render {width}x{height} {:?}: {steps} steps, shadows {}",
        params.mode,
        shadows.is_some()
    );
    image
}

/// Locates the voxel under pixel `(x, y)` of a `size` viewport.
pub fn pick_cpu<S: VolumeSampler>(
    sampler: &S,
    info: &VolumeInfo,
    frame: &Frame<'_>,
    pixel: (u32, u32),
    size: (u32, u32),
) -> PickResult {
    let marcher = frame.marcher(sampler, info);
    let matrices = frame
        .view
        .matrices(size.0 as f32 / size.1.max(1) as f32, frame.params.perspective);
    marcher.pick(&matrices.pixel_ray(pixel.0, pixel.1, size))
}

//! Per-frame render parameters and ray-march program selection.

use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::curve::OpacityCurve;
use crate::lights::LightSet;
use crate::window::WindowLevel;

/// Compositing mode of the ray march.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RenderMode {
    /// Maximum intensity projection.
    Mip,
    /// Lit volume rendering through the opacity curve.
    #[default]
    Vr,
    /// Attenuation integral.
    XRay,
}

bitflags! {
    /// Optional stages compiled into a ray-march program.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FeatureFlags: u32 {
        /// Gradient shading with directional lights.
        const LIGHTING = 1 << 0;
        /// Percentage-closer filtered shadows.
        const SHADOWS = 1 << 1;
        /// Oriented slab clipping.
        const SLAB = 1 << 2;
        /// Per-pixel sub-step jitter.
        const ANTIALIAS = 1 << 3;
        /// Blend normals toward box faces near the border.
        const SEAL_BORDERS = 1 << 4;
        /// X-ray attenuation through the opacity curve.
        const XRAY_CURVE = 1 << 5;
        /// Embedded mesh depth/colour buffers.
        const OVERLAY = 1 << 6;
        /// Spherical marker.
        const MARKER = 1 << 7;
        /// Locate the voxel under a single pixel instead of shading.
        const PICK = 1 << 8;
        /// Volume is stored as a mosaic of 2D textures.
        const MOSAIC = 1 << 9;
        /// Samples are 16 bit.
        const SIXTEEN_BIT = 1 << 10;
        /// Samples outside the relief mask band are skipped.
        const MASK = 1 << 11;
    }
}

/// Key of one compiled ray-march program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub mode: RenderMode,
    pub flags: FeatureFlags,
}

impl ProgramKey {
    pub fn new(mode: RenderMode, flags: FeatureFlags) -> Self {
        Self { mode, flags }
    }

    /// Program used to draw `params`.
    ///
    /// Flags that have no effect in a mode are dropped so that equivalent
    /// configurations share a program.
    pub fn for_frame(params: &RenderParams, storage: FeatureFlags, has_overlay: bool) -> Self {
        let mut flags = storage & (FeatureFlags::MOSAIC | FeatureFlags::SIXTEEN_BIT);
        flags.set(FeatureFlags::SLAB, params.slab_clip);
        flags.set(FeatureFlags::ANTIALIAS, params.antialias);
        flags.set(FeatureFlags::OVERLAY, has_overlay);
        flags.set(FeatureFlags::MARKER, params.marker.is_some());
        flags.set(FeatureFlags::MASK, params.use_mask);
        match params.mode {
            RenderMode::Vr => {
                flags.set(FeatureFlags::LIGHTING, params.lighting);
                flags.set(
                    FeatureFlags::SHADOWS,
                    params.lighting && params.lights.shadows_enabled(),
                );
                flags.set(
                    FeatureFlags::SEAL_BORDERS,
                    params.lighting && params.border_seal > 0.0,
                );
            }
            RenderMode::XRay => flags.set(FeatureFlags::XRAY_CURVE, params.xray_curve),
            RenderMode::Mip => {}
        }
        Self::new(params.mode, flags)
    }

    /// The picking variant of this program.
    #[must_use]
    pub fn picking(self) -> Self {
        let flags = (self.flags | FeatureFlags::PICK)
            - (FeatureFlags::ANTIALIAS | FeatureFlags::OVERLAY | FeatureFlags::MARKER);
        Self::new(self.mode, flags)
    }
}

/// A spherical marker placed in the volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Position in texture coordinates.
    pub position: Vec3,
    /// Radius in model units.
    pub size: f32,
    pub color: [u8; 4],
}

impl Default for Marker {
    fn default() -> Self {
        Self {
            position: Vec3::splat(0.5),
            size: 0.0075,
            color: [0, 128, 0, 255],
        }
    }
}

/// Value bundle describing one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    pub mode: RenderMode,
    pub curve: OpacityCurve,
    pub lights: LightSet,
    /// Gradient shading in VR mode.
    pub lighting: bool,
    pub slab_clip: bool,
    pub antialias: bool,
    /// Samples per voxel along the ray.
    pub oversample: f32,
    /// 0 = orthographic, 1 = full perspective.
    pub perspective: f32,
    pub marker: Option<Marker>,
    /// Applies the frame's relief mask and selects the masked x-ray window.
    pub use_mask: bool,
    /// Border sealing weight, 0 disables.
    pub border_seal: f32,
    /// X-ray attenuation is taken from the curve's opacity.
    pub xray_curve: bool,
    /// Window/level override for MIP and x-ray display.
    pub window: Option<WindowLevel>,
    /// Background behind the VR image.
    pub background: [f32; 3],
}

impl RenderParams {
    /// Ray step in model units for a volume of the given dims.
    pub fn step_size(&self, dims: glam::UVec3) -> f32 {
        let max_dim = dims.max_element().max(1) as f32;
        1.0 / max_dim / self.oversample.max(0.01)
    }
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            mode: RenderMode::Vr,
            curve: OpacityCurve::default(),
            lights: LightSet::default(),
            lighting: true,
            slab_clip: false,
            antialias: true,
            oversample: 1.0,
            perspective: 0.0,
            marker: None,
            use_mask: false,
            border_seal: 0.0,
            xray_curve: false,
            window: None,
            background: [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_key_drops_irrelevant_flags() {
        let mut params = RenderParams {
            mode: RenderMode::Mip,
            antialias: false,
            ..RenderParams::default()
        };
        params.lights.lights[0].shadow_darkness = 1.0;
        let key = ProgramKey::for_frame(&params, FeatureFlags::empty(), false);
        assert_eq!(key.flags, FeatureFlags::empty());

        params.mode = RenderMode::Vr;
        let key = ProgramKey::for_frame(&params, FeatureFlags::MOSAIC, false);
        assert!(key.flags.contains(FeatureFlags::LIGHTING | FeatureFlags::SHADOWS | FeatureFlags::MOSAIC));
    }

    #[test]
    fn test_equivalent_params_share_key() {
        let a = RenderParams {
            mode: RenderMode::XRay,
            border_seal: 0.5,
            ..RenderParams::default()
        };
        let b = RenderParams {
            mode: RenderMode::XRay,
            border_seal: 0.0,
            lighting: false,
            ..RenderParams::default()
        };
        assert_eq!(
            ProgramKey::for_frame(&a, FeatureFlags::empty(), true),
            ProgramKey::for_frame(&b, FeatureFlags::empty(), true)
        );
    }

    #[test]
    fn test_picking_variant() {
        let key = ProgramKey::new(RenderMode::Vr, FeatureFlags::ANTIALIAS | FeatureFlags::SLAB);
        let pick = key.picking();
        assert!(pick.flags.contains(FeatureFlags::PICK | FeatureFlags::SLAB));
        assert!(!pick.flags.contains(FeatureFlags::ANTIALIAS));
    }

    #[test]
    fn test_mask_flag_survives_picking() {
        let params = RenderParams {
            mode: RenderMode::XRay,
            use_mask: true,
            ..RenderParams::default()
        };
        let key = ProgramKey::for_frame(&params, FeatureFlags::empty(), false);
        assert!(key.flags.contains(FeatureFlags::MASK));
        assert!(key.picking().flags.contains(FeatureFlags::MASK));
    }

    #[test]
    fn test_step_size() {
        let params = RenderParams {
            oversample: 2.0,
            ..RenderParams::default()
        };
        let step = params.step_size(glam::UVec3::new(64, 128, 32));
        assert!((step - 1.0 / 256.0).abs() < 1e-9);
    }

    #[test]
    fn test_params_json_round_trip() {
        let params = RenderParams {
            curve: OpacityCurve::constant([255, 0, 0, 255]),
            marker: Some(Marker::default()),
            ..RenderParams::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: RenderParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}

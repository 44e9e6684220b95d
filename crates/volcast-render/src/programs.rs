//! Ray-march program composition and caching.
//!
//! Every program is the shared WGSL in `shaders/common.wgsl` plus one
//! stage, preceded by a block of constants generated from the
//! [`ProgramKey`]. Disabled features become `false` constants, so the
//! compiler drops their code paths.

use std::collections::HashMap;
use std::fmt::Write as _;

use volcast_core::params::{FeatureFlags, ProgramKey, RenderMode};
use volcast_core::{curve, raymarch, shadow};

use crate::error::{RenderError, RenderResult};

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");
const RAYCAST_WGSL: &str = include_str!("shaders/raycast.wgsl");
const SHADOW_WGSL: &str = include_str!("shaders/shadow.wgsl");

/// Format of the volume render target.
pub const VOLUME_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// Format of the overlay, pick and shadow targets.
pub const BYTE_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// What a program renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Volume and overlay targets.
    Raycast,
    /// Encoded voxel of one pixel.
    Pick,
    /// Occluder depths of both lights.
    Shadow,
}

impl Stage {
    fn fragment_entry(self) -> &'static str {
        match self {
            Self::Raycast | Self::Shadow => "fs_main",
            Self::Pick => "fs_pick",
        }
    }

    fn source(self) -> &'static str {
        match self {
            Self::Raycast | Self::Pick => RAYCAST_WGSL,
            Self::Shadow => SHADOW_WGSL,
        }
    }

    /// Normalizes a key so that programs differing only in flags this stage
    /// ignores are shared.
    pub fn normalize(self, key: ProgramKey) -> ProgramKey {
        match self {
            Self::Raycast => key,
            Self::Pick => key.picking(),
            Self::Shadow => ProgramKey::new(
                RenderMode::Vr,
                key.flags
                    & (FeatureFlags::SLAB
                        | FeatureFlags::MASK
                        | FeatureFlags::MOSAIC
                        | FeatureFlags::SIXTEEN_BIT),
            ),
        }
    }
}

fn mode_index(mode: RenderMode) -> u32 {
    match mode {
        RenderMode::Mip => 0,
        RenderMode::Vr => 1,
        RenderMode::XRay => 2,
    }
}

/// WGSL constant block for a program key.
pub fn constants_preamble(key: ProgramKey) -> String {
    let flag = |f: FeatureFlags| key.flags.contains(f);
    let mut out = String::new();
    let _ = writeln!(out, "const MODE_MIP: u32 = {}u;", mode_index(RenderMode::Mip));
    let _ = writeln!(out, "const MODE_VR: u32 = {}u;", mode_index(RenderMode::Vr));
    let _ = writeln!(out, "const MODE_XRAY: u32 = {}u;", mode_index(RenderMode::XRay));
    let _ = writeln!(out, "const MODE: u32 = {}u;", mode_index(key.mode));
    for (name, f) in [
        ("HAS_LIGHTING", FeatureFlags::LIGHTING),
        ("HAS_SHADOWS", FeatureFlags::SHADOWS),
        ("HAS_SLAB", FeatureFlags::SLAB),
        ("HAS_ANTIALIAS", FeatureFlags::ANTIALIAS),
        ("HAS_SEAL", FeatureFlags::SEAL_BORDERS),
        ("HAS_XRAY_CURVE", FeatureFlags::XRAY_CURVE),
        ("HAS_OVERLAY", FeatureFlags::OVERLAY),
        ("HAS_MARKER", FeatureFlags::MARKER),
        ("HAS_MASK", FeatureFlags::MASK),
        ("IS_MOSAIC", FeatureFlags::MOSAIC),
        ("IS_SIXTEEN_BIT", FeatureFlags::SIXTEEN_BIT),
    ] {
        let _ = writeln!(out, "const {name}: bool = {};", flag(f));
    }
    let _ = writeln!(out, "const TRANSMITTANCE_EPSILON: f32 = {:?};", raymarch::TRANSMITTANCE_EPSILON);
    let _ = writeln!(out, "const OPACITY_STEP_SCALE: f32 = {:?};", raymarch::OPACITY_STEP_SCALE);
    let _ = writeln!(out, "const XRAY_GAIN: f32 = {:?};", raymarch::XRAY_GAIN);
    let _ = writeln!(out, "const JITTER_WINDOW: u32 = {}u;", raymarch::JITTER_WINDOW);
    let _ = writeln!(out, "const SEAL_DISTANCE: f32 = {:?};", raymarch::SEAL_DISTANCE);
    let _ = writeln!(out, "const PICK_HIT_BIT: u32 = {}u;", raymarch::PICK_HIT_BIT);
    let _ = writeln!(out, "const CURVE_MAX_INDEX: f32 = {:?};", f32::from(curve::CURVE_MAX_INDEX));
    let _ = writeln!(out, "const PCF_SAMPLES: u32 = {}u;", shadow::PCF_SAMPLES);
    let _ = writeln!(out, "const PCF_BASE_RADIUS: f32 = {:?};", shadow::PCF_BASE_RADIUS);
    let _ = writeln!(out, "const PCF_SOFTNESS_RADIUS: f32 = {:?};", shadow::PCF_SOFTNESS_RADIUS);
    let _ = writeln!(out, "const GOLDEN_ANGLE: f32 = {:?};", shadow::GOLDEN_ANGLE);
    out
}

/// Builder for a composed WGSL module.
pub struct ShaderBuilder {
    parts: Vec<String>,
    label: Option<String>,
}

impl ShaderBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            parts: Vec::new(),
            label: None,
        }
    }

    /// Starts a module for `stage` of `key`.
    #[must_use]
    pub fn for_program(stage: Stage, key: ProgramKey) -> Self {
        Self::new()
            .with_source(constants_preamble(key))
            .with_source(COMMON_WGSL)
            .with_source(stage.source())
            .with_label(format!("volume {stage:?} {:?} {:?}", key.mode, key.flags))
    }

    /// Appends WGSL source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.parts.push(source.into());
        self
    }

    /// Sets the shader label for debugging.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The concatenated source.
    pub fn source(&self) -> String {
        self.parts.join("\n")
    }

    /// Compiles the module, reporting validation errors instead of
    /// raising them on the device.
    pub fn build_module(self, device: &wgpu::Device) -> RenderResult<wgpu::ShaderModule> {
        if self.parts.is_empty() {
            return Err(RenderError::ShaderCompilationFailed("empty shader".into()));
        }
        let source = self.source();
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: self.label.as_deref(),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => Err(RenderError::ShaderCompilationFailed(err.to_string())),
            None => Ok(module),
        }
    }
}

impl Default for ShaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn texture_entry(
    binding: u32,
    dimension: wgpu::TextureViewDimension,
    filterable: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension: dimension,
            multisampled: false,
        },
        count: None,
    }
}

/// Binding slots of the volume programs.
pub mod slots {
    pub const FRAME: u32 = 0;
    pub const SAMPLER: u32 = 1;
    pub const VOLUME: u32 = 2;
    pub const MOSAIC: u32 = 3;
    pub const CURVE: u32 = 11;
    pub const SHADOW: u32 = 12;
    pub const OVERLAY_DEPTH: u32 = 13;
    pub const OVERLAY_COLOR: u32 = 14;
    pub const MASK: u32 = 15;
}

/// Compiled volume programs keyed by stage and [`ProgramKey`].
pub struct ProgramCache {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<(Stage, ProgramKey), wgpu::RenderPipeline>,
}

impl ProgramCache {
    pub fn new(device: &wgpu::Device) -> Self {
        let mut entries = vec![
            wgpu::BindGroupLayoutEntry {
                binding: slots::FRAME,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: slots::SAMPLER,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            texture_entry(slots::VOLUME, wgpu::TextureViewDimension::D3, true),
        ];
        for i in 0..volcast_core::store::MAX_MOSAIC_TEXTURES {
            entries.push(texture_entry(slots::MOSAIC + i, wgpu::TextureViewDimension::D2, true));
        }
        entries.push(texture_entry(slots::CURVE, wgpu::TextureViewDimension::D2, true));
        entries.push(texture_entry(slots::SHADOW, wgpu::TextureViewDimension::D2, true));
        entries.push(texture_entry(slots::OVERLAY_DEPTH, wgpu::TextureViewDimension::D2, false));
        entries.push(texture_entry(slots::OVERLAY_COLOR, wgpu::TextureViewDimension::D2, true));
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: slots::MASK,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Uint,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Volume Bind Group Layout"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Volume Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        Self {
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
        }
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    /// Number of compiled programs.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Returns the program for `stage` of `key`, compiling it on first use.
    pub fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        stage: Stage,
        key: ProgramKey,
    ) -> RenderResult<&wgpu::RenderPipeline> {
        let key = stage.normalize(key);
        if !self.pipelines.contains_key(&(stage, key)) {
            let pipeline = self.create(device, stage, key)?;
            log::debug!("compiled volume program {stage:?} {:?} {:?}", key.mode, key.flags);
            self.pipelines.insert((stage, key), pipeline);
        }
        self.pipelines
            .get(&(stage, key))
            .ok_or_else(|| RenderError::PipelineCreationFailed(format!("{stage:?} program missing")))
    }

    fn create(&self, device: &wgpu::Device, stage: Stage, key: ProgramKey) -> RenderResult<wgpu::RenderPipeline> {
        let shader = ShaderBuilder::for_program(stage, key).build_module(device)?;
        let volume_targets = [
            Some(wgpu::ColorTargetState {
                format: VOLUME_TARGET_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            }),
            Some(wgpu::ColorTargetState {
                format: BYTE_TARGET_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            }),
        ];
        let byte_target = [Some(wgpu::ColorTargetState {
            format: BYTE_TARGET_FORMAT,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let targets: &[Option<wgpu::ColorTargetState>] = match stage {
            Stage::Raycast => &volume_targets,
            Stage::Pick | Stage::Shadow => &byte_target,
        };

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Volume Pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some(stage.fragment_entry()),
                targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => Err(RenderError::PipelineCreationFailed(err.to_string())),
            None => Ok(pipeline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_preamble_reflects_key() {
        let key = ProgramKey::new(
            RenderMode::XRay,
            FeatureFlags::MOSAIC | FeatureFlags::XRAY_CURVE,
        );
        let preamble = constants_preamble(key);
        assert!(preamble.contains("const MODE: u32 = 2u;"));
        assert!(preamble.contains("const IS_MOSAIC: bool = true;"));
        assert!(preamble.contains("const HAS_XRAY_CURVE: bool = true;"));
        assert!(preamble.contains("const HAS_LIGHTING: bool = false;"));
        assert!(preamble.contains("const TRANSMITTANCE_EPSILON: f32 = 0.02;"));
        assert!(preamble.contains("const OPACITY_STEP_SCALE: f32 = 128.0;"));
        assert!(preamble.contains("const PICK_HIT_BIT: u32 = 1073741824u;"));
    }

    #[test]
    fn test_composed_source_order() {
        let key = ProgramKey::new(RenderMode::Vr, FeatureFlags::empty());
        let source = ShaderBuilder::for_program(Stage::Shadow, key).source();
        let preamble = source.find("const MODE: u32").unwrap();
        let common = source.find("struct FrameUniforms").unwrap();
        let stage = source.find("fn depth_range").unwrap();
        assert!(preamble < common && common < stage);
    }

    #[test]
    fn test_stage_normalization_shares_programs() {
        let a = ProgramKey::new(
            RenderMode::Vr,
            FeatureFlags::LIGHTING | FeatureFlags::ANTIALIAS | FeatureFlags::MOSAIC,
        );
        let b = ProgramKey::new(RenderMode::Vr, FeatureFlags::MOSAIC | FeatureFlags::MARKER);
        assert_eq!(Stage::Shadow.normalize(a), Stage::Shadow.normalize(b));
        assert_ne!(Stage::Raycast.normalize(a), Stage::Raycast.normalize(b));
        assert!(Stage::Pick.normalize(a).flags.contains(FeatureFlags::PICK));
        assert!(!Stage::Pick.normalize(a).flags.contains(FeatureFlags::ANTIALIAS));

        // masked samples cast no shadow
        let masked = ProgramKey::new(RenderMode::Vr, FeatureFlags::MASK | FeatureFlags::LIGHTING);
        assert!(Stage::Shadow.normalize(masked).flags.contains(FeatureFlags::MASK));
    }

    proptest! {
        #[test]
        fn prop_normalization_is_idempotent(bits in 0u32..(1 << 12), mode in 0u8..3) {
            let mode = [RenderMode::Mip, RenderMode::Vr, RenderMode::XRay][usize::from(mode)];
            let key = ProgramKey::new(mode, FeatureFlags::from_bits_truncate(bits));
            for stage in [Stage::Raycast, Stage::Pick, Stage::Shadow] {
                let once = stage.normalize(key);
                prop_assert_eq!(stage.normalize(once), once);
            }
            let pick = Stage::Pick.normalize(key);
            prop_assert!(!pick.flags.intersects(FeatureFlags::ANTIALIAS | FeatureFlags::OVERLAY | FeatureFlags::MARKER));
        }
    }
}

//! GPU backend for volcast.
//!
//! This crate runs the ray march of `volcast-core` on wgpu:
//! - [`GpuVolume`] storage of native 3D or mosaic volume textures
//! - WGSL programs composed per [`ProgramKey`](volcast_core::ProgramKey)
//!   and cached in [`ProgramCache`]
//! - shadow, ray-march, pick and window/level passes driven by
//!   [`VolumeEngine`]
//! - readback of the final and intermediate images

#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod curve_texture;
pub mod device;
pub mod engine;
pub mod error;
pub mod gpu_volume;
pub mod programs;
pub mod raycast_pass;
pub mod readback;
pub mod shadow_pass;
pub mod window_pass;

pub use curve_texture::CurveTexture;
pub use device::{caps_from_limits, DeviceBinding};
pub use engine::{IntermediateReadback, VolumeEngine};
pub use error::{RenderError, RenderResult};
pub use gpu_volume::GpuVolume;
pub use programs::{constants_preamble, ProgramCache, ShaderBuilder, Stage};
pub use raycast_pass::FrameUniforms;
pub use window_pass::WindowUniforms;

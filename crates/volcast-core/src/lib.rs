//! Core algorithms for volcast.
//!
//! Everything here runs on the CPU and mirrors the GPU programs in
//! `volcast-render`:
//! - [`MosaicLayout`] packing of slices into 2D textures and its inverse
//!   addressing
//! - [`VolumeStore`] load cycle, storage selection and [`Histogram`]
//! - [`RayMarcher`] for MIP, VR and x-ray compositing, picking and
//!   [`ShadowMaps`]
//! - [`Slab`] clipping, [`ReliefMask`] peeling, [`OpacityCurve`] lookup and
//!   window/level display
//! - [`LoadSequence`] and [`FrameScheduler`] for the controlling loop

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Render parameter bundles legitimately have many boolean flags
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
// Pixel, voxel and texel math converts between integer and float freely
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::similar_names)]
#![allow(clippy::module_name_repetitions)]

pub mod coords;
pub mod cpu_render;
pub mod curve;
pub mod error;
pub mod histogram;
pub mod lights;
pub mod load;
pub mod mask;
pub mod mosaic;
pub mod overlay;
pub mod params;
pub mod raymarch;
pub mod sampler;
pub mod schedule;
pub mod shadow;
pub mod slab;
pub mod store;
pub mod view;
pub mod volume;
pub mod window;

pub use coords::Ray;
pub use cpu_render::{pick_cpu, render_cpu, Frame, IntermediateImage};
pub use curve::{CurvePoint, OpacityCurve, CURVE_LUT_SIZE};
pub use error::{ErrorKind, Result, VolumeError};
pub use histogram::Histogram;
pub use lights::{DirLight, LightSet, LightUniforms, MAX_LIGHTS};
pub use load::{CancelToken, LoadFailure, LoadSequence, LoadState, VolumeLoader};
pub use mask::ReliefMask;
pub use mosaic::{MosaicLayout, MosaicUniforms, SliceAddress};
pub use overlay::{OverlayBuffer, Surface};
pub use params::{FeatureFlags, Marker, ProgramKey, RenderMode, RenderParams};
pub use raymarch::{PickResult, RayMarcher, RayResult};
pub use sampler::{CpuBackend, CpuSampler, VolumeSampler};
pub use schedule::FrameScheduler;
pub use shadow::{LightProjection, ShadowMaps, ShadowUniforms, SHADOW_MAP_SIZE};
pub use slab::{Slab, SlabUniforms};
pub use store::{DeviceCaps, StorageMode, StoragePlan, StoreOptions, VolumeBackend, VolumeStore};
pub use view::{ViewMatrices, ViewParams};
pub use volume::{VolumeHeader, VolumeInfo};
pub use window::{DisplaySettings, WindowLevel, WindowPresets};

// Re-export glam types for convenience
pub use glam::{Mat4, Quat, UVec3, Vec2, Vec3, Vec4};

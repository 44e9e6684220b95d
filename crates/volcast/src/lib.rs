//! volcast: ray-cast rendering of scalar volumes.
//!
//! A volume is a stack of equally sized 8 or 16-bit slices. volcast loads it
//! into GPU textures (a native 3D texture or a mosaic of 2D textures) and
//! renders it in one of three modes:
//!
//! - **MIP**: maximum intensity along each ray
//! - **VR**: front-to-back compositing through an opacity curve, with
//!   gradient lighting and shadow maps
//! - **X-ray**: attenuation integral along each ray
//!
//! A box-shaped [`Slab`] clips the volume, and precomputed surface buffers
//! ([`OverlayBuffer`]) can be depth-merged into the image.
//!
//! # Quick Start
//!
//! ```no_run
//! use volcast::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!
//!     let binding = DeviceBinding::new_headless_blocking()?;
//!     let mut engine = VolumeEngine::new(&binding);
//!     let mut viewer = Viewer::new(engine.create_store(StoreOptions::default()));
//!
//!     viewer.load(MockDataLoader::new());
//!     viewer.finish_load();
//!     if let Some(preset) = Preset::builtin("Preset 1")? {
//!         viewer.apply_preset(&preset);
//!     }
//!     render_to_file(&mut viewer, &mut engine, "volume.png", 800, 600)?;
//!     Ok(())
//! }
//! ```
//!
//! Without a GPU, a [`Viewer`] over a [`CpuBackend`] store renders the same
//! frames with [`render_cpu_to_image`].

#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

mod error;
mod headless;
pub mod loaders;
mod presets;
mod viewer;

pub use error::{Error, Result};
pub use headless::{
    encode_png, pick, pick_cpu_voxel, render_cpu_intermediate, render_cpu_to_file,
    render_cpu_to_image, render_to_file, render_to_image, save_image,
};
pub use loaders::{MockDataLoader, RawSliceLoader};
pub use presets::Preset;
pub use viewer::Viewer;

// Re-export core types
pub use volcast_core::{
    CancelToken, CpuBackend, CurvePoint, DeviceCaps, DirLight, DisplaySettings, ErrorKind,
    FeatureFlags, Frame, FrameScheduler, Histogram, IntermediateImage, LightSet, LoadFailure,
    LoadSequence, LoadState, Marker, MosaicLayout, OpacityCurve, OverlayBuffer, PickResult,
    ReliefMask, RenderMode, RenderParams, Slab, StorageMode, StoragePlan, StoreOptions,
    ViewParams, VolumeBackend, VolumeError, VolumeHeader, VolumeInfo, VolumeLoader, VolumeStore,
    WindowLevel, WindowPresets,
};
pub use volcast_core::{Mat4, Quat, UVec3, Vec2, Vec3, Vec4};

// Re-export render types
pub use volcast_render::{DeviceBinding, GpuVolume, IntermediateReadback, RenderError, VolumeEngine};

/// Initializes logging from `RUST_LOG`. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

//! Adapter and device acquisition.

use volcast_core::store::MAX_MOSAIC_TEXTURES;
use volcast_core::DeviceCaps;

use crate::error::{RenderError, RenderResult};

/// Texture bindings a ray-march program uses besides the mosaic set.
const NON_MOSAIC_TEXTURES: u32 = 5;

/// A wgpu device and queue, with the adapter they came from.
pub struct DeviceBinding {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl DeviceBinding {
    /// Requests a device without a surface.
    pub async fn new_headless() -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..wgpu::InstanceDescriptor::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| RenderError::AdapterCreationFailed)?;

        let info = adapter.get_info();
        log::info!("using adapter {} ({:?})", info.name, info.backend);

        // the mosaic plan depends on the full texture limits
        let required_limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("volcast device (headless)"),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        Ok(Self {
            adapter,
            device,
            queue,
        })
    }

    /// Blocking form of [`Self::new_headless`].
    pub fn new_headless_blocking() -> RenderResult<Self> {
        pollster::block_on(Self::new_headless())
    }

    /// Texture limits of the device as the volume store sees them.
    pub fn caps(&self) -> DeviceCaps {
        caps_from_limits(&self.device.limits())
    }
}

/// Volume store limits derived from device limits.
pub fn caps_from_limits(limits: &wgpu::Limits) -> DeviceCaps {
    let mosaic_slots = limits
        .max_sampled_textures_per_shader_stage
        .saturating_sub(NON_MOSAIC_TEXTURES)
        .min(MAX_MOSAIC_TEXTURES);
    DeviceCaps {
        max_texture_2d: limits.max_texture_dimension_2d,
        max_texture_3d: limits.max_texture_dimension_3d,
        max_mosaic_textures: mosaic_slots,
        supports_3d: limits.max_texture_dimension_3d > 0,
    }
}

//! GPU volume renderer.

use glam::Vec4;
use volcast_core::{
    DeviceCaps, DisplaySettings, FeatureFlags, Frame, PickResult, ProgramKey, StoreOptions,
    VolumeStore,
};
use wgpu::util::DeviceExt;

use crate::curve_texture::CurveTexture;
use crate::device::{caps_from_limits, DeviceBinding};
use crate::error::{RenderError, RenderResult};
use crate::gpu_volume::GpuVolume;
use crate::programs::{ProgramCache, Stage};
use crate::raycast_pass::{
    create_volume_sampler, render_pick, render_raycast, FrameUniforms, MaskTexture,
    OverlayTextures, RenderTargets, VolumeBindings,
};
use crate::readback::{f16_to_f32, read_texture};
use crate::shadow_pass::ShadowPass;
use crate::window_pass::WindowPass;

/// Volume and overlay targets of the last frame, read back to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateReadback {
    width: u32,
    height: u32,
    volume: Vec<f32>,
    overlay: Vec<u8>,
}

impl IntermediateReadback {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn volume(&self, x: u32, y: u32) -> Vec4 {
        let i = (y * self.width + x) as usize * 4;
        Vec4::from_slice(&self.volume[i..i + 4])
    }

    pub fn overlay(&self, x: u32, y: u32) -> Vec4 {
        let i = (y * self.width + x) as usize * 4;
        let [r, g, b, a] = [0, 1, 2, 3].map(|c| f32::from(self.overlay[i + c]) / 255.0);
        Vec4::new(r, g, b, a)
    }
}

/// Draws volumes held in [`GpuVolume`] stores.
///
/// Programs are compiled on first use of each [`ProgramKey`] and kept for
/// the engine's lifetime. Render targets follow the last viewport size.
pub struct VolumeEngine {
    device: wgpu::Device,
    queue: wgpu::Queue,
    programs: ProgramCache,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    curve: CurveTexture,
    overlay: OverlayTextures,
    mask: MaskTexture,
    shadow: ShadowPass,
    window: WindowPass,
    targets: Option<RenderTargets>,
}

impl VolumeEngine {
    pub fn new(binding: &DeviceBinding) -> Self {
        Self::from_device(&binding.device, &binding.queue)
    }

    pub fn from_device(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Uniform Buffer"),
            contents: bytemuck::cast_slice(&[<FrameUniforms as bytemuck::Zeroable>::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        Self {
            device: device.clone(),
            queue: queue.clone(),
            programs: ProgramCache::new(device),
            sampler: create_volume_sampler(device),
            uniform_buffer,
            curve: CurveTexture::new(device),
            overlay: OverlayTextures::new(device, queue),
            mask: MaskTexture::new(device, queue),
            shadow: ShadowPass::new(device),
            window: WindowPass::new(device),
            targets: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Storage limits of the device.
    pub fn caps(&self) -> DeviceCaps {
        caps_from_limits(&self.device.limits())
    }

    /// An empty store whose volume lives on this engine's device.
    pub fn create_store(&self, options: StoreOptions) -> VolumeStore<GpuVolume> {
        VolumeStore::new(GpuVolume::new(&self.device, &self.queue), self.caps(), options)
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    /// Number of opacity curve uploads so far.
    pub fn curve_uploads(&self) -> u32 {
        self.curve.uploads()
    }

    /// Number of relief mask uploads so far.
    pub fn mask_uploads(&self) -> u32 {
        self.mask.uploads()
    }

    /// Number of shadow map renders so far.
    pub fn shadow_renders(&self) -> u32 {
        self.shadow.renders()
    }

    /// Size of the current render targets.
    pub fn viewport(&self) -> Option<(u32, u32)> {
        self.targets.as_ref().map(RenderTargets::size)
    }

    fn check_viewport(&self, size: (u32, u32)) -> RenderResult<()> {
        let max = self.device.limits().max_texture_dimension_2d;
        if size.0 == 0 || size.1 == 0 || size.0 > max || size.1 > max {
            return Err(RenderError::InvalidViewport(size.0, size.1));
        }
        Ok(())
    }

    /// Uploads everything `frame` needs and returns its program key and
    /// uniforms.
    fn prepare(
        &mut self,
        store: &VolumeStore<GpuVolume>,
        frame: &Frame<'_>,
        size: (u32, u32),
    ) -> RenderResult<(ProgramKey, FrameUniforms)> {
        self.check_viewport(size)?;
        let info = store.info()?;
        let plan = store.plan()?;

        let has_overlay = match frame.overlay {
            Some(overlay) if (overlay.width(), overlay.height()) == size => {
                self.overlay.upload(&self.device, &self.queue, overlay);
                true
            }
            Some(overlay) => {
                log::warn!(
                    "ignoring {}x{} overlay for a {}x{} viewport",
                    overlay.width(),
                    overlay.height(),
                    size.0,
                    size.1
                );
                false
            }
            None => false,
        };
        self.curve.update(&self.queue, &frame.params.curve);

        let mask = match frame.mask {
            Some(mask) if frame.params.use_mask && !mask.fits(info.dims()) => {
                log::warn!(
                    "ignoring {}x{} relief mask for a {} volume",
                    mask.width(),
                    mask.height(),
                    info.dims()
                );
                None
            }
            Some(mask) if frame.params.use_mask => Some(mask),
            _ => None,
        };
        self.mask.update(&self.device, &self.queue, mask);

        if self.viewport() != Some(size) {
            log::debug!("allocating {}x{} render targets", size.0, size.1);
            self.targets = Some(RenderTargets::new(&self.device, size));
        }

        let key = ProgramKey::for_frame(frame.params, plan.feature_flags(), has_overlay);
        Ok((key, FrameUniforms::new(info, &plan, frame, size)))
    }

    fn bind_group(&self, store: &VolumeStore<GpuVolume>, shadow: &wgpu::TextureView) -> wgpu::BindGroup {
        VolumeBindings {
            uniforms: &self.uniform_buffer,
            sampler: &self.sampler,
            volume: store.backend(),
            curve: self.curve.view(),
            shadow,
            overlay: &self.overlay,
            mask: &self.mask,
        }
        .create_bind_group(&self.device, self.programs.bind_group_layout())
    }

    /// Renders `frame` into a `width x height` image, readable with
    /// [`read_rgba`](Self::read_rgba).
    pub fn render(
        &mut self,
        store: &VolumeStore<GpuVolume>,
        frame: &Frame<'_>,
        display: &DisplaySettings,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        let (key, uniforms) = self.prepare(store, frame, (width, height))?;
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Volume Render Encoder"),
        });

        if key.flags.contains(FeatureFlags::SHADOWS) {
            let bind_group = self.bind_group(store, self.shadow.placeholder_view());
            let pipeline = self.programs.get_or_create(&self.device, Stage::Shadow, key)?;
            self.shadow.render(&mut encoder, pipeline, &bind_group);
        }

        let bind_group = self.bind_group(store, self.shadow.view());
        let pipeline = self.programs.get_or_create(&self.device, Stage::Raycast, key)?;
        let targets = self
            .targets
            .as_ref()
            .ok_or(RenderError::InvalidViewport(width, height))?;
        render_raycast(&mut encoder, pipeline, &bind_group, targets);

        self.window.update_uniforms(&self.queue, display);
        let window_bind_group =
            self.window
                .create_bind_group(&self.device, &targets.volume_view, &targets.overlay_view);
        self.window
            .render(&mut encoder, &targets.output_view, &window_bind_group);

        self.queue.submit(std::iter::once(encoder.finish()));
        log::debug!(
            "rendered {width}x{height} {:?} frame with {:?}",
            key.mode,
            key.flags
        );
        Ok(())
    }

    fn targets(&self) -> RenderResult<&RenderTargets> {
        self.targets
            .as_ref()
            .ok_or_else(|| RenderError::ReadbackFailed("nothing rendered yet".into()))
    }

    /// Final RGBA8 image of the last frame, rows top to bottom.
    pub fn read_rgba(&self) -> RenderResult<Vec<u8>> {
        let targets = self.targets()?;
        read_texture(&self.device, &self.queue, &targets.output, (0, 0), targets.size, 4)
    }

    /// Volume and overlay targets of the last frame.
    pub fn read_intermediate(&self) -> RenderResult<IntermediateReadback> {
        let targets = self.targets()?;
        let volume = read_texture(&self.device, &self.queue, &targets.volume, (0, 0), targets.size, 8)?;
        let overlay = read_texture(&self.device, &self.queue, &targets.overlay, (0, 0), targets.size, 4)?;
        Ok(IntermediateReadback {
            width: targets.size.0,
            height: targets.size.1,
            volume: f16_to_f32(&volume),
            overlay,
        })
    }

    /// Packed shadow maps of the last shadowed frame.
    pub fn read_shadow_maps(&self) -> RenderResult<Vec<u8>> {
        let texture = self.shadow.texture();
        read_texture(
            &self.device,
            &self.queue,
            texture,
            (0, 0),
            (texture.width(), texture.height()),
            4,
        )
    }

    /// Locates the voxel under `pixel` of a `size` viewport.
    pub fn pick(
        &mut self,
        store: &VolumeStore<GpuVolume>,
        frame: &Frame<'_>,
        pixel: (u32, u32),
        size: (u32, u32),
    ) -> RenderResult<PickResult> {
        if pixel.0 >= size.0 || pixel.1 >= size.1 {
            return Ok(PickResult { voxel: None });
        }
        let (key, uniforms) = self.prepare(store, frame, size)?;
        let uniforms = uniforms.with_pick(pixel);
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Volume Pick Encoder"),
        });
        let bind_group = self.bind_group(store, self.shadow.view());
        let pipeline = self.programs.get_or_create(&self.device, Stage::Pick, key)?;
        let targets = self
            .targets
            .as_ref()
            .ok_or(RenderError::InvalidViewport(size.0, size.1))?;
        render_pick(&mut encoder, pipeline, &bind_group, targets, pixel);
        self.queue.submit(std::iter::once(encoder.finish()));

        let texel = read_texture(&self.device, &self.queue, &targets.pick, pixel, (1, 1), 4)?;
        let rgba = <[u8; 4]>::try_from(texel.as_slice())
            .map_err(|_| RenderError::ReadbackFailed(format!("pick texel of {} bytes", texel.len())))?;
        let result = PickResult::from_rgba(rgba);
        log::debug!("picked {:?} at {pixel:?}", result.voxel);
        Ok(result)
    }
}

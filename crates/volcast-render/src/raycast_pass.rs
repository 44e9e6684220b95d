//! Ray-march passes and the per-frame resources they bind.

use volcast_core::coords::texture_to_model;
use volcast_core::raymarch::max_steps;
use volcast_core::shadow::ShadowMaps;
use volcast_core::{
    Frame, LightUniforms, MosaicUniforms, OverlayBuffer, ReliefMask, ShadowUniforms, SlabUniforms,
    StoragePlan, VolumeInfo, SHADOW_MAP_SIZE,
};

use crate::gpu_volume::GpuVolume;
use crate::programs::{slots, BYTE_TARGET_FORMAT, VOLUME_TARGET_FORMAT};

/// Uniforms shared by every volume program.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub inv_view_proj: [[f32; 4]; 4],
    pub slab: SlabUniforms,
    pub lights: LightUniforms,
    pub shadow: ShadowUniforms,
    pub mosaic: MosaicUniforms,
    /// Model-space box extents, ray step.
    pub aspect_step: [f32; 4],
    /// Voxel dims, iteration cap.
    pub dims_steps: [f32; 4],
    /// Physical shape, border seal weight.
    pub shape_seal: [f32; 4],
    /// Marker centre in model space, radius.
    pub marker: [f32; 4],
    pub marker_color: [f32; 4],
    /// Viewport width and height, pick pixel.
    pub viewport: [f32; 4],
}

impl FrameUniforms {
    /// Uniforms for drawing `frame` of a volume into a `size` viewport.
    pub fn new(info: &VolumeInfo, plan: &StoragePlan, frame: &Frame<'_>, size: (u32, u32)) -> Self {
        let params = frame.params;
        let aspect = info.aspect();
        let step = params.step_size(info.dims());
        let (width, height) = size;
        let matrices = frame
            .view
            .matrices(width as f32 / height.max(1) as f32, params.perspective);
        let projections = ShadowMaps::projections(&params.lights, aspect);
        let mosaic = match plan {
            StoragePlan::Mosaic(layout) => MosaicUniforms::from(layout),
            StoragePlan::Native3d { .. } => MosaicUniforms::default(),
        };
        let (marker, marker_color) = params.marker.map_or(([0.0; 4], [0.0; 4]), |m| {
            (
                texture_to_model(m.position, aspect).extend(m.size).to_array(),
                m.color.map(|c| f32::from(c) / 255.0),
            )
        });
        Self {
            inv_view_proj: matrices.inv_view_proj.to_cols_array_2d(),
            slab: SlabUniforms::new(frame.slab, params.slab_clip),
            lights: LightUniforms::from(&params.lights),
            shadow: ShadowUniforms::new(&projections, SHADOW_MAP_SIZE),
            mosaic,
            aspect_step: aspect.extend(step).to_array(),
            dims_steps: info.dims().as_vec3().extend(max_steps(step) as f32).to_array(),
            shape_seal: info.shape().extend(params.border_seal).to_array(),
            marker,
            marker_color,
            viewport: [width as f32, height as f32, 0.0, 0.0],
        }
    }

    #[must_use]
    pub fn with_pick(mut self, pixel: (u32, u32)) -> Self {
        self.viewport[2] = pixel.0 as f32;
        self.viewport[3] = pixel.1 as f32;
        self
    }
}

fn texture_2d(
    device: &wgpu::Device,
    label: &str,
    size: (u32, u32),
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size.0,
            height: size.1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

/// Mesh overlay depth and colour textures.
///
/// Empty depth texels hold `f32::INFINITY`. Until an overlay is uploaded a
/// 1x1 empty overlay is bound.
pub struct OverlayTextures {
    depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    size: (u32, u32),
}

impl OverlayTextures {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let mut textures = Self::allocate(device, (1, 1));
        textures.upload(device, queue, &OverlayBuffer::new(1, 1));
        textures
    }

    fn allocate(device: &wgpu::Device, size: (u32, u32)) -> Self {
        let usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        let (depth, depth_view) =
            texture_2d(device, "overlay depth", size, wgpu::TextureFormat::R32Float, usage);
        let (color, color_view) = texture_2d(device, "overlay color", size, BYTE_TARGET_FORMAT, usage);
        Self {
            depth,
            depth_view,
            color,
            color_view,
            size,
        }
    }

    /// Uploads an overlay, reallocating when its size changed.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, overlay: &OverlayBuffer) {
        let size = (overlay.width(), overlay.height());
        if size != self.size {
            *self = Self::allocate(device, size);
        }
        let extent = wgpu::Extent3d {
            width: size.0,
            height: size.1,
            depth_or_array_layers: 1,
        };
        for (texture, bytes) in [
            (&self.depth, bytemuck::cast_slice::<f32, u8>(overlay.depths())),
            (&self.color, bytemuck::cast_slice::<[u8; 4], u8>(overlay.colors())),
        ] {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytes,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(size.0 * 4),
                    rows_per_image: Some(size.1),
                },
                extent,
            );
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

/// Relief mask heights in an RGBA8 integer texture, bottom height in R/G and
/// top in B/A. Frames without a usable mask bind a 1x1 void mask.
pub struct MaskTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    current: ReliefMask,
    uploads: u32,
}

impl MaskTexture {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let mut mask = Self::allocate(device, ReliefMask::new(1, 1));
        mask.write(queue);
        mask
    }

    fn allocate(device: &wgpu::Device, current: ReliefMask) -> Self {
        let (texture, view) = texture_2d(
            device,
            "relief mask",
            (current.width(), current.height()),
            wgpu::TextureFormat::Rgba8Uint,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        Self {
            texture,
            view,
            current,
            uploads: 0,
        }
    }

    fn write(&mut self, queue: &wgpu::Queue) {
        let (width, height) = (self.current.width(), self.current.height());
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &self.current.texel_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.uploads += 1;
    }

    /// Uploads `mask` unless it is already resident; `None` binds a void
    /// mask.
    pub fn update(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, mask: Option<&ReliefMask>) {
        let void = ReliefMask::new(1, 1);
        let mask = mask.unwrap_or(&void);
        if *mask == self.current {
            return;
        }
        if (mask.width(), mask.height()) == (self.current.width(), self.current.height()) {
            self.current.clone_from(mask);
        } else {
            log::debug!("allocating {}x{} relief mask", mask.width(), mask.height());
            let uploads = self.uploads;
            *self = Self::allocate(device, mask.clone());
            self.uploads = uploads;
        }
        self.write(queue);
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Number of uploads so far.
    pub fn uploads(&self) -> u32 {
        self.uploads
    }
}

/// Intermediate and output images of one viewport size.
pub struct RenderTargets {
    pub(crate) size: (u32, u32),
    pub(crate) volume: wgpu::Texture,
    pub(crate) volume_view: wgpu::TextureView,
    pub(crate) overlay: wgpu::Texture,
    pub(crate) overlay_view: wgpu::TextureView,
    pub(crate) output: wgpu::Texture,
    pub(crate) output_view: wgpu::TextureView,
    pub(crate) pick: wgpu::Texture,
    pub(crate) pick_view: wgpu::TextureView,
}

impl RenderTargets {
    pub fn new(device: &wgpu::Device, size: (u32, u32)) -> Self {
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        let (volume, volume_view) = texture_2d(device, "volume target", size, VOLUME_TARGET_FORMAT, usage);
        let (overlay, overlay_view) = texture_2d(device, "overlay target", size, BYTE_TARGET_FORMAT, usage);
        let (output, output_view) = texture_2d(device, "output target", size, BYTE_TARGET_FORMAT, usage);
        let (pick, pick_view) = texture_2d(device, "pick target", size, BYTE_TARGET_FORMAT, usage);
        Self {
            size,
            volume,
            volume_view,
            overlay,
            overlay_view,
            output,
            output_view,
            pick,
            pick_view,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

/// Texture views bound alongside the frame uniforms.
pub struct VolumeBindings<'a> {
    pub uniforms: &'a wgpu::Buffer,
    pub sampler: &'a wgpu::Sampler,
    pub volume: &'a GpuVolume,
    pub curve: &'a wgpu::TextureView,
    pub shadow: &'a wgpu::TextureView,
    pub overlay: &'a OverlayTextures,
    pub mask: &'a MaskTexture,
}

impl VolumeBindings<'_> {
    pub fn create_bind_group(&self, device: &wgpu::Device, layout: &wgpu::BindGroupLayout) -> wgpu::BindGroup {
        let view = |binding, view| wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(view),
        };
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: slots::FRAME,
                resource: self.uniforms.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: slots::SAMPLER,
                resource: wgpu::BindingResource::Sampler(self.sampler),
            },
            view(slots::VOLUME, self.volume.volume_view()),
        ];
        for (i, mosaic) in (0u32..).zip(self.volume.mosaic_views()) {
            entries.push(view(slots::MOSAIC + i, mosaic));
        }
        entries.push(view(slots::CURVE, self.curve));
        entries.push(view(slots::SHADOW, self.shadow));
        entries.push(view(slots::OVERLAY_DEPTH, &self.overlay.depth_view));
        entries.push(view(slots::OVERLAY_COLOR, &self.overlay.color_view));
        entries.push(view(slots::MASK, self.mask.view()));
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Volume Bind Group"),
            layout,
            entries: &entries,
        })
    }
}

/// Linear, clamp-to-edge sampler of the volume textures.
pub fn create_volume_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Volume Sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    })
}

fn clear_attachment(view: &wgpu::TextureView) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            store: wgpu::StoreOp::Store,
        },
        depth_slice: None,
    })
}

/// Draws the volume and overlay targets.
pub fn render_raycast(
    encoder: &mut wgpu::CommandEncoder,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
    targets: &RenderTargets,
) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Raycast Pass"),
        color_attachments: &[
            clear_attachment(&targets.volume_view),
            clear_attachment(&targets.overlay_view),
        ],
        depth_stencil_attachment: None,
        ..Default::default()
    });
    render_pass.set_pipeline(pipeline);
    render_pass.set_bind_group(0, bind_group, &[]);
    render_pass.draw(0..3, 0..1);
}

/// Draws the pick program for a single pixel of the pick target.
pub fn render_pick(
    encoder: &mut wgpu::CommandEncoder,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
    targets: &RenderTargets,
    pixel: (u32, u32),
) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Pick Pass"),
        color_attachments: &[clear_attachment(&targets.pick_view)],
        depth_stencil_attachment: None,
        ..Default::default()
    });
    render_pass.set_pipeline(pipeline);
    render_pass.set_bind_group(0, bind_group, &[]);
    render_pass.set_scissor_rect(pixel.0, pixel.1, 1, 1);
    render_pass.draw(0..3, 0..1);
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use volcast_core::{Marker, RenderParams, Slab, ViewParams, VolumeHeader};

    use super::*;

    #[test]
    fn test_uniform_layout_matches_shader() {
        // mat4 + slab + lights + shadow + mosaic + six vec4
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 64 + 144 + 80 + 272 + 48 + 96);
        assert_eq!(std::mem::size_of::<FrameUniforms>() % 16, 0);
    }

    #[test]
    fn test_frame_uniforms_geometry() {
        let info = VolumeInfo::new(VolumeHeader::new([64, 32, 16], 8));
        let plan = StoragePlan::Native3d {
            dims: [64, 32, 16],
            bits_per_pixel: 8,
        };
        let params = RenderParams {
            marker: Some(Marker {
                position: Vec3::splat(0.5),
                size: 0.1,
                color: [255, 0, 0, 255],
            }),
            border_seal: 0.5,
            ..RenderParams::default()
        };
        let view = ViewParams::default();
        let slab = Slab::new(info.shape());
        let frame = Frame::new(&params, &view, &slab);
        let uniforms = FrameUniforms::new(&info, &plan, &frame, (40, 30)).with_pick((3, 4));

        assert_eq!(uniforms.aspect_step[0], 1.0);
        assert_eq!(uniforms.aspect_step[3], 1.0 / 64.0);
        assert_eq!(&uniforms.dims_steps[..3], &[64.0, 32.0, 16.0]);
        assert_eq!(uniforms.dims_steps[3], max_steps(1.0 / 64.0) as f32);
        assert_eq!(uniforms.shape_seal[3], 0.5);
        assert_eq!(uniforms.marker, [0.0, 0.0, 0.0, 0.1]);
        assert_eq!(uniforms.marker_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(uniforms.viewport, [40.0, 30.0, 3.0, 4.0]);
        assert_eq!(uniforms.mosaic.counts, [0.0; 4]);
    }
}

//! Shadow map pass.

use volcast_core::SHADOW_MAP_SIZE;

use crate::programs::BYTE_TARGET_FORMAT;

/// Occluder depth maps of both lights in one `SHADOW_MAP_SIZE x
/// 2*SHADOW_MAP_SIZE` target, light 0 on top.
///
/// The ray march reads the map through the shadow binding; while the map
/// itself is being drawn that binding holds a 1x1 placeholder instead.
pub struct ShadowPass {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    placeholder_view: wgpu::TextureView,
    renders: u32,
}

impl ShadowPass {
    pub fn new(device: &wgpu::Device) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shadow maps"),
            size: wgpu::Extent3d {
                width: SHADOW_MAP_SIZE,
                height: SHADOW_MAP_SIZE * 2,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: BYTE_TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let placeholder = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shadow placeholder"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: BYTE_TARGET_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let placeholder_view = placeholder.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            placeholder_view,
            renders: 0,
        }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// View of the maps for the ray march.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// View bound as the shadow texture while the maps are drawn.
    pub fn placeholder_view(&self) -> &wgpu::TextureView {
        &self.placeholder_view
    }

    /// Number of times the maps were drawn.
    pub fn renders(&self) -> u32 {
        self.renders
    }

    pub fn render(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
    ) {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Shadow Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    // no occluder
                    load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            ..Default::default()
        });
        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw(0..3, 0..1);
        drop(render_pass);
        self.renders += 1;
    }
}

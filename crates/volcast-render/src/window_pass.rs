//! Display composite pass: window/level or background blend, then overlay.

use bytemuck::Zeroable;
use volcast_core::{DisplaySettings, RenderMode};
use wgpu::util::DeviceExt;

use crate::programs::BYTE_TARGET_FORMAT;

/// GPU representation of [`DisplaySettings`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct WindowUniforms {
    /// Width, level, intensity scale, mode (0 MIP, 1 VR, 2 x-ray).
    pub window: [f32; 4],
    pub background: [f32; 4],
}

impl From<&DisplaySettings> for WindowUniforms {
    fn from(display: &DisplaySettings) -> Self {
        let mode = match display.mode {
            RenderMode::Mip => 0.0,
            RenderMode::Vr => 1.0,
            RenderMode::XRay => 2.0,
        };
        Self {
            window: [
                display.window.width,
                display.window.level,
                display.intensity_scale,
                mode,
            ],
            background: display.background.extend(1.0).to_array(),
        }
    }
}

/// Window/level render resources.
pub struct WindowPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
}

impl WindowPass {
    pub fn new(device: &wgpu::Device) -> Self {
        let image_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Window Bind Group Layout"),
            entries: &[
                // Volume image
                image_entry(0),
                // Overlay image
                image_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Window Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/window.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Window Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Window Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: BYTE_TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
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

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Window Uniform Buffer"),
            contents: bytemuck::cast_slice(&[WindowUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Self {
            pipeline,
            bind_group_layout,
            uniform_buffer,
        }
    }

    pub fn update_uniforms(&self, queue: &wgpu::Queue, display: &DisplaySettings) {
        let uniforms = WindowUniforms::from(display);
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));
    }

    pub fn create_bind_group(
        &self,
        device: &wgpu::Device,
        volume_view: &wgpu::TextureView,
        overlay_view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Window Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(volume_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(overlay_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        })
    }

    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        output_view: &wgpu::TextureView,
        bind_group: &wgpu::BindGroup,
    ) {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Window Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            ..Default::default()
        });

        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use volcast_core::WindowLevel;

    use super::*;

    #[test]
    fn test_uniforms_from_display() {
        let display = DisplaySettings {
            mode: RenderMode::XRay,
            window: WindowLevel::new(200.0, 100.0),
            intensity_scale: 65535.0,
            background: Vec3::new(0.1, 0.2, 0.3),
        };
        let uniforms = WindowUniforms::from(&display);
        assert_eq!(uniforms.window, [200.0, 100.0, 65535.0, 2.0]);
        assert_eq!(uniforms.background, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(std::mem::size_of::<WindowUniforms>(), 32);
    }
}

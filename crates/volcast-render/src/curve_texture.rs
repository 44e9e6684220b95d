//! Opacity curve lookup texture.

use volcast_core::{OpacityCurve, CURVE_LUT_SIZE};

/// A `CURVE_LUT_SIZE x 1` RGBA8 texture holding the curve's lookup table,
/// re-uploaded only when the curve changes.
pub struct CurveTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    current: Option<OpacityCurve>,
    uploads: u32,
}

impl CurveTexture {
    pub fn new(device: &wgpu::Device) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("opacity curve"),
            size: wgpu::Extent3d {
                width: CURVE_LUT_SIZE as u32,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            current: None,
            uploads: 0,
        }
    }

    /// Uploads `curve` unless it is already resident.
    pub fn update(&mut self, queue: &wgpu::Queue, curve: &OpacityCurve) {
        if self.current.as_ref() == Some(curve) {
            return;
        }
        let texels: Vec<u8> = curve.lut().into_iter().flatten().collect();
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &texels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(CURVE_LUT_SIZE as u32 * 4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: CURVE_LUT_SIZE as u32,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        log::debug!("uploaded opacity curve {curve}");
        self.current = Some(curve.clone());
        self.uploads += 1;
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Number of uploads so far.
    pub fn uploads(&self) -> u32 {
        self.uploads
    }
}

//! Volume storage in GPU textures.

use volcast_core::mosaic::TEXEL_BYTES;
use volcast_core::store::MAX_MOSAIC_TEXTURES;
use volcast_core::{MosaicLayout, Result, StoragePlan, VolumeBackend, VolumeError};

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl GpuTexture {
    fn new(device: &wgpu::Device, desc: &wgpu::TextureDescriptor<'_>) -> Self {
        let texture = device.create_texture(desc);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

enum GpuStorage {
    Empty,
    Native {
        volume: GpuTexture,
        dims: [u32; 3],
        bytes_per_voxel: u32,
    },
    Mosaic {
        layout: MosaicLayout,
        textures: Vec<GpuTexture>,
    },
}

/// Native 3D or mosaic volume textures on one device.
///
/// Unused bindings are filled with 1x1 placeholder textures so that every
/// ray-march program sees the same bind group layout.
pub struct GpuVolume {
    device: wgpu::Device,
    queue: wgpu::Queue,
    storage: GpuStorage,
    placeholder_3d: GpuTexture,
    placeholder_2d: GpuTexture,
    allocations: u32,
}

impl GpuVolume {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let placeholder = |dimension, format, label| {
            GpuTexture::new(
                device,
                &wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension,
                    format,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                },
            )
        };
        Self {
            device: device.clone(),
            queue: queue.clone(),
            storage: GpuStorage::Empty,
            placeholder_3d: placeholder(
                wgpu::TextureDimension::D3,
                wgpu::TextureFormat::R8Unorm,
                "volume placeholder 3d",
            ),
            placeholder_2d: placeholder(
                wgpu::TextureDimension::D2,
                wgpu::TextureFormat::Rgba8Unorm,
                "volume placeholder mosaic",
            ),
            allocations: 0,
        }
    }

    /// Number of times storage was (re)allocated.
    pub fn allocations(&self) -> u32 {
        self.allocations
    }

    pub fn is_allocated(&self) -> bool {
        !matches!(self.storage, GpuStorage::Empty)
    }

    /// View bound as the native 3D volume.
    pub fn volume_view(&self) -> &wgpu::TextureView {
        match &self.storage {
            GpuStorage::Native { volume, .. } => &volume.view,
            _ => &self.placeholder_3d.view,
        }
    }

    /// Views bound as the mosaic texture set.
    pub fn mosaic_views(&self) -> [&wgpu::TextureView; MAX_MOSAIC_TEXTURES as usize] {
        std::array::from_fn(|i| match &self.storage {
            GpuStorage::Mosaic { textures, .. } => textures
                .get(i)
                .map_or(&self.placeholder_2d.view, |t| &t.view),
            _ => &self.placeholder_2d.view,
        })
    }

    fn check_oom(&self, what: &str) -> Result<()> {
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(VolumeError::Capacity(format!("{what}: {err}"))),
            None => Ok(()),
        }
    }
}

impl VolumeBackend for GpuVolume {
    fn allocate(&mut self, plan: &StoragePlan) -> Result<()> {
        self.storage = GpuStorage::Empty;
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let storage = match *plan {
            StoragePlan::Native3d {
                dims,
                bits_per_pixel,
            } => {
                // 16-bit voxels keep their (low, high) bytes in two channels
                let format = if bits_per_pixel == 16 {
                    wgpu::TextureFormat::Rg8Unorm
                } else {
                    wgpu::TextureFormat::R8Unorm
                };
                let volume = GpuTexture::new(
                    &self.device,
                    &wgpu::TextureDescriptor {
                        label: Some("volume 3d"),
                        size: wgpu::Extent3d {
                            width: dims[0],
                            height: dims[1],
                            depth_or_array_layers: dims[2],
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D3,
                        format,
                        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                        view_formats: &[],
                    },
                );
                GpuStorage::Native {
                    volume,
                    dims,
                    bytes_per_voxel: bits_per_pixel / 8,
                }
            }
            StoragePlan::Mosaic(layout) => {
                let textures = (0..layout.texture_count)
                    .map(|t| {
                        let (width, height) = layout.texture_size(t);
                        GpuTexture::new(
                            &self.device,
                            &wgpu::TextureDescriptor {
                                label: Some("volume mosaic"),
                                size: wgpu::Extent3d {
                                    width,
                                    height,
                                    depth_or_array_layers: 1,
                                },
                                mip_level_count: 1,
                                sample_count: 1,
                                dimension: wgpu::TextureDimension::D2,
                                format: wgpu::TextureFormat::Rgba8Unorm,
                                usage: wgpu::TextureUsages::TEXTURE_BINDING
                                    | wgpu::TextureUsages::COPY_DST,
                                view_formats: &[],
                            },
                        )
                    })
                    .collect();
                GpuStorage::Mosaic { layout, textures }
            }
        };
        self.check_oom("allocating volume textures")?;
        self.storage = storage;
        self.allocations += 1;
        Ok(())
    }

    fn write_slices(&mut self, first_slice: u32, count: u32, data: &[u8]) -> Result<()> {
        let GpuStorage::Native {
            volume,
            dims,
            bytes_per_voxel,
        } = &self.storage
        else {
            return Err(VolumeError::InvalidBatch("storage is not a 3D texture".into()));
        };
        let row = dims[0] * bytes_per_voxel;
        let expected = row as usize * dims[1] as usize * count as usize;
        if data.len() != expected || first_slice + count > dims[2] {
            return Err(VolumeError::InvalidBatch(format!(
                "{} bytes for slices {first_slice}..{}",
                data.len(),
                first_slice + count
            )));
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &volume.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: first_slice,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row),
                rows_per_image: Some(dims[1]),
            },
            wgpu::Extent3d {
                width: dims[0],
                height: dims[1],
                depth_or_array_layers: count,
            },
        );
        Ok(())
    }

    fn write_tile(&mut self, texture: u32, tile_x: u32, tile_y: u32, texels: &[u8]) -> Result<()> {
        let GpuStorage::Mosaic { layout, textures } = &self.storage else {
            return Err(VolumeError::InvalidBatch("storage is not a mosaic".into()));
        };
        let Some(target) = textures.get(texture as usize) else {
            return Err(VolumeError::InvalidBatch(format!("no mosaic texture {texture}")));
        };
        let (w, h) = (layout.img_width, layout.img_height);
        let row = w * TEXEL_BYTES as u32;
        if texels.len() != (row * h) as usize {
            return Err(VolumeError::InvalidBatch(format!(
                "tile of {} bytes, expected {}",
                texels.len(),
                row * h
            )));
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: tile_x * w,
                    y: tile_y * h,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            texels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row),
                rows_per_image: Some(h),
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }
}

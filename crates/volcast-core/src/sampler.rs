//! Intensity sampling and the CPU volume backend.
//!
//! The samplers here reproduce what the GPU texture units do for each
//! storage plan: trilinear filtering of a native 3D texture, or bilinear
//! filtering inside two mosaic slices blended by fractional depth. Both
//! clamp to the edge inside the unit cube and return 0 outside it.

use glam::{UVec3, Vec3};

use crate::coords;
use crate::error::{Result, VolumeError};
use crate::mosaic::{MosaicLayout, TEXEL_BYTES};
use crate::store::{StoragePlan, VolumeBackend};

/// Normalized intensity lookup used by the ray march.
pub trait VolumeSampler {
    /// Voxel dimensions.
    fn dims(&self) -> UVec3;

    /// Filtered intensity in `[0, 1]` at a texture coordinate, 0 outside
    /// the unit cube.
    fn sample(&self, tc: Vec3) -> f32;
}

/// Volume storage kept in host memory, laid out exactly like the GPU
/// textures of the same plan.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend {
    storage: CpuStorage,
    allocations: u32,
}

#[derive(Debug, Clone, Default)]
enum CpuStorage {
    #[default]
    Empty,
    Native {
        dims: [u32; 3],
        bits_per_pixel: u32,
        data: Vec<u8>,
    },
    Mosaic {
        layout: MosaicLayout,
        textures: Vec<Vec<u8>>,
    },
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times storage was (re)allocated.
    pub fn allocations(&self) -> u32 {
        self.allocations
    }

    /// Sampler over the stored volume, if any.
    pub fn sampler(&self) -> Option<CpuSampler<'_>> {
        match &self.storage {
            CpuStorage::Empty => None,
            CpuStorage::Native {
                dims,
                bits_per_pixel,
                data,
            } => Some(CpuSampler::Native(NativeSampler {
                dims: UVec3::from_array(*dims),
                sixteen_bit: *bits_per_pixel == 16,
                data,
            })),
            CpuStorage::Mosaic { layout, textures } => Some(CpuSampler::Mosaic(MosaicSampler {
                layout: *layout,
                textures,
            })),
        }
    }

    /// Raw texel bytes of mosaic texture `index`.
    pub fn mosaic_texture(&self, index: usize) -> Option<&[u8]> {
        match &self.storage {
            CpuStorage::Mosaic { textures, .. } => textures.get(index).map(Vec::as_slice),
            _ => None,
        }
    }
}

impl VolumeBackend for CpuBackend {
    fn allocate(&mut self, plan: &StoragePlan) -> Result<()> {
        self.storage = match *plan {
            StoragePlan::Native3d {
                dims,
                bits_per_pixel,
            } => {
                let voxels = dims.iter().map(|&d| d as usize).product::<usize>();
                CpuStorage::Native {
                    dims,
                    bits_per_pixel,
                    data: vec![0; voxels * (bits_per_pixel / 8) as usize],
                }
            }
            StoragePlan::Mosaic(layout) => CpuStorage::Mosaic {
                layout,
                textures: (0..layout.texture_count)
                    .map(|t| {
                        let (w, h) = layout.texture_size(t);
                        vec![0; w as usize * h as usize * TEXEL_BYTES]
                    })
                    .collect(),
            },
        };
        self.allocations += 1;
        Ok(())
    }

    fn write_slices(&mut self, first_slice: u32, count: u32, data: &[u8]) -> Result<()> {
        let CpuStorage::Native {
            dims,
            bits_per_pixel,
            data: dst,
        } = &mut self.storage
        else {
            return Err(VolumeError::InvalidBatch("storage is not a 3D texture".into()));
        };
        let slice_bytes = dims[0] as usize * dims[1] as usize * (*bits_per_pixel / 8) as usize;
        let start = first_slice as usize * slice_bytes;
        let len = count as usize * slice_bytes;
        if data.len() != len || start + len > dst.len() {
            return Err(VolumeError::InvalidBatch(format!(
                "{} bytes for slices {first_slice}..{}",
                data.len(),
                first_slice + count
            )));
        }
        dst[start..start + len].copy_from_slice(data);
        Ok(())
    }

    fn write_tile(&mut self, texture: u32, tile_x: u32, tile_y: u32, texels: &[u8]) -> Result<()> {
        let CpuStorage::Mosaic { layout, textures } = &mut self.storage else {
            return Err(VolumeError::InvalidBatch("storage is not a mosaic".into()));
        };
        let (w, h) = (layout.img_width as usize, layout.img_height as usize);
        let (tex_w, _) = layout.texture_size(texture);
        let Some(dst) = textures.get_mut(texture as usize) else {
            return Err(VolumeError::InvalidBatch(format!("no mosaic texture {texture}")));
        };
        let row = w * TEXEL_BYTES;
        if texels.len() != row * h {
            return Err(VolumeError::InvalidBatch(format!(
                "tile of {} bytes, expected {}",
                texels.len(),
                row * h
            )));
        }
        for y in 0..h {
            let py = tile_y as usize * h + y;
            let start = (py * tex_w as usize + tile_x as usize * w) * TEXEL_BYTES;
            dst[start..start + row].copy_from_slice(&texels[y * row..(y + 1) * row]);
        }
        Ok(())
    }
}

/// Sampler over a [`CpuBackend`].
#[derive(Debug, Clone, Copy)]
pub enum CpuSampler<'a> {
    Native(NativeSampler<'a>),
    Mosaic(MosaicSampler<'a>),
}

impl VolumeSampler for CpuSampler<'_> {
    fn dims(&self) -> UVec3 {
        match self {
            Self::Native(s) => s.dims(),
            Self::Mosaic(s) => s.dims(),
        }
    }

    fn sample(&self, tc: Vec3) -> f32 {
        match self {
            Self::Native(s) => s.sample(tc),
            Self::Mosaic(s) => s.sample(tc),
        }
    }
}

/// Texel-centre interpolation coordinate along one axis with clamp-to-edge:
/// returns the two indices and the blend weight.
fn axis_taps(coord: f32, size: u32) -> (u32, u32, f32) {
    texel_taps(coord * size as f32, size)
}

/// As [`axis_taps`], with the coordinate already in texels.
fn texel_taps(texels: f32, size: u32) -> (u32, u32, f32) {
    let f = texels - 0.5;
    let base = f.floor();
    let weight = f - base;
    let max = size as f32 - 1.0;
    (
        base.clamp(0.0, max) as u32,
        (base + 1.0).clamp(0.0, max) as u32,
        weight,
    )
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Trilinear sampler over a native 3D texture.
#[derive(Debug, Clone, Copy)]
pub struct NativeSampler<'a> {
    dims: UVec3,
    sixteen_bit: bool,
    data: &'a [u8],
}

impl NativeSampler<'_> {
    fn voxel(&self, x: u32, y: u32, z: u32) -> f32 {
        let index = ((z * self.dims.y + y) * self.dims.x + x) as usize;
        if self.sixteen_bit {
            f32::from(u16::from_le_bytes([self.data[2 * index], self.data[2 * index + 1]])) / 65535.0
        } else {
            f32::from(self.data[index]) / 255.0
        }
    }
}

impl VolumeSampler for NativeSampler<'_> {
    fn dims(&self) -> UVec3 {
        self.dims
    }

    fn sample(&self, tc: Vec3) -> f32 {
        if !coords::in_unit_cube(tc) {
            return 0.0;
        }
        let (x0, x1, wx) = axis_taps(tc.x, self.dims.x);
        let (y0, y1, wy) = axis_taps(tc.y, self.dims.y);
        let (z0, z1, wz) = axis_taps(tc.z, self.dims.z);
        let plane = |z| {
            lerp(
                lerp(self.voxel(x0, y0, z), self.voxel(x1, y0, z), wx),
                lerp(self.voxel(x0, y1, z), self.voxel(x1, y1, z), wx),
                wy,
            )
        };
        lerp(plane(z0), plane(z1), wz)
    }
}

/// Sampler over a mosaic texture set: bilinear inside a slice, linear
/// across slices.
#[derive(Debug, Clone, Copy)]
pub struct MosaicSampler<'a> {
    layout: MosaicLayout,
    textures: &'a [Vec<u8>],
}

impl MosaicSampler<'_> {
    /// Bilinear lookup of one slice, clamped to the edge of its texture.
    fn slice(&self, slice: u32, u: f32, v: f32) -> f32 {
        let layout = &self.layout;
        let (addr, _) = layout.address_f32(slice as f32);
        let (tex_w, tex_h) = layout.texture_size(addr.texture);
        let Some(texture) = self.textures.get(addr.texture as usize) else {
            return 0.0;
        };
        let tx = (addr.tile_x * layout.img_width) as f32 + u * layout.img_width as f32;
        let ty = (addr.tile_y * layout.img_height) as f32 + v * layout.img_height as f32;
        let (x0, x1, wx) = texel_taps(tx, tex_w);
        let (y0, y1, wy) = texel_taps(ty, tex_h);

        let channel = |byte: usize| {
            let texel = |x: u32, y: u32| {
                f32::from(texture[(y as usize * tex_w as usize + x as usize) * TEXEL_BYTES + byte])
            };
            lerp(
                lerp(texel(x0, y0), texel(x1, y0), wx),
                lerp(texel(x0, y1), texel(x1, y1), wx),
                wy,
            )
        };
        if layout.bits_per_pixel == 16 {
            let slot = 2 * addr.channel as usize;
            (channel(slot) + 256.0 * channel(slot + 1)) / 65535.0
        } else {
            channel(addr.channel as usize) / 255.0
        }
    }
}

impl VolumeSampler for MosaicSampler<'_> {
    fn dims(&self) -> UVec3 {
        UVec3::new(
            self.layout.img_width,
            self.layout.img_height,
            self.layout.num_imgs,
        )
    }

    fn sample(&self, tc: Vec3) -> f32 {
        if !coords::in_unit_cube(tc) {
            return 0.0;
        }
        let (z0, z1, wz) = axis_taps(tc.z, self.layout.num_imgs);
        let a = self.slice(z0, tc.x, tc.y);
        if wz == 0.0 || z0 == z1 {
            return a;
        }
        lerp(a, self.slice(z1, tc.x, tc.y), wz)
    }
}

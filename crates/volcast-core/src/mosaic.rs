//! Packing of volume slices into tiled 2D RGBA textures.
//!
//! When native 3D textures are unavailable (or too small) the volume is
//! stored as a set of 2D "mosaic" textures. Each texture is a grid of
//! `ntx * nty` tiles, each tile is `img_width * img_height` RGBA8 texels, and
//! each texel carries the same pixel of several consecutive slices: four
//! slices at 8 bpp (one byte per channel) or two at 16 bpp (a low/high byte
//! pair per slice).
//!
//! Every address derived here is closed form so that the ray march can
//! recompute it per sample without lookup tables.

use crate::error::{Result, VolumeError};

/// Bytes in one RGBA8 texel.
pub const TEXEL_BYTES: usize = 4;

/// Number of slices sharing one RGBA8 texel (`32 / bpp`).
///
/// This is also the slice batch size loaders must deliver.
pub fn imgs_per_tile(bits_per_pixel: u32) -> u32 {
    32 / bits_per_pixel
}

/// Checks that a bit depth is supported.
pub fn validate_bpp(bits_per_pixel: u32) -> Result<()> {
    match bits_per_pixel {
        8 | 16 => Ok(()),
        other => Err(VolumeError::Configuration(format!(
            "unsupported bit depth {other} (expected 8 or 16)"
        ))),
    }
}

/// Location of one slice inside a mosaic texture set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceAddress {
    /// Index of the texture holding the slice.
    pub texture: u32,
    /// Tile column within the texture.
    pub tile_x: u32,
    /// Tile row within the texture.
    pub tile_y: u32,
    /// Slot within the texel: the byte (8 bpp) or byte pair (16 bpp) index.
    pub channel: u32,
}

/// Read-only layout metadata for a mosaic texture set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MosaicLayout {
    /// Slice width in pixels.
    pub img_width: u32,
    /// Slice height in pixels.
    pub img_height: u32,
    /// Number of slices.
    pub num_imgs: u32,
    /// Bits per pixel (8 or 16).
    pub bits_per_pixel: u32,
    /// Tiles per texture along X.
    pub ntx: u32,
    /// Tiles per texture along Y (all textures but the last).
    pub nty: u32,
    /// Tiles along Y in the last texture, shrunk to fit the remaining slices.
    pub last_nty: u32,
    /// Slices per texel.
    pub imgs_per_tile: u32,
    /// Slices per full texture.
    pub imgs_per_texture: u32,
    /// Number of textures needed.
    pub texture_count: u32,
}

impl MosaicLayout {
    /// Computes the layout packing `num_imgs` slices into the fewest textures.
    ///
    /// The returned layout may need more textures than the device offers;
    /// check [`MosaicLayout::fits`] and reject the dataset if it does not.
    pub fn compute(
        img_width: u32,
        img_height: u32,
        num_imgs: u32,
        bits_per_pixel: u32,
        max_texture_size: u32,
    ) -> Result<Self> {
        validate_bpp(bits_per_pixel)?;
        if img_width == 0 || img_height == 0 || num_imgs == 0 {
            return Err(VolumeError::Configuration(format!(
                "zero-sized volume {img_width}x{img_height}x{num_imgs}"
            )));
        }

        let imgs_per_tile = imgs_per_tile(bits_per_pixel);
        let num_tiles = num_imgs.div_ceil(imgs_per_tile);

        let fit_x = max_texture_size / img_width;
        let fit_y = max_texture_size / img_height;
        if fit_x == 0 || fit_y == 0 {
            return Err(VolumeError::Capacity(format!(
                "slice {img_width}x{img_height} exceeds max texture size {max_texture_size}"
            )));
        }

        let square = (f64::from(num_imgs) / f64::from(imgs_per_tile)).sqrt().ceil() as u32;
        let ntx = fit_x.min(square.max(1));
        let nty = fit_y.min(num_tiles.div_ceil(ntx));

        let imgs_per_texture = ntx * nty * imgs_per_tile;
        let texture_count = num_imgs.div_ceil(imgs_per_texture);

        let remaining_imgs = num_imgs - (texture_count - 1) * imgs_per_texture;
        let remaining_tiles = remaining_imgs.div_ceil(imgs_per_tile);
        let last_nty = remaining_tiles.div_ceil(ntx);

        Ok(Self {
            img_width,
            img_height,
            num_imgs,
            bits_per_pixel,
            ntx,
            nty,
            last_nty,
            imgs_per_tile,
            imgs_per_texture,
            texture_count,
        })
    }

    /// Whether the layout fits in `max_textures` texture units.
    pub fn fits(&self, max_textures: u32) -> bool {
        self.texture_count <= max_textures
    }

    /// Tile rows in texture `texture`.
    pub fn tiles_y(&self, texture: u32) -> u32 {
        if texture + 1 == self.texture_count {
            self.last_nty
        } else {
            self.nty
        }
    }

    /// Pixel size of texture `texture`.
    pub fn texture_size(&self, texture: u32) -> (u32, u32) {
        (
            self.ntx * self.img_width,
            self.tiles_y(texture) * self.img_height,
        )
    }

    /// Integer address of slice `slice`.
    pub fn address(&self, slice: u32) -> SliceAddress {
        let texture = slice / self.imgs_per_texture;
        let local = slice % self.imgs_per_texture;
        let tile = local / self.imgs_per_tile;
        SliceAddress {
            texture,
            tile_x: tile % self.ntx,
            tile_y: tile / self.ntx,
            channel: local % self.imgs_per_tile,
        }
    }

    /// Address of slice `slice` computed with the same single-precision
    /// arithmetic the ray-march program uses.
    ///
    /// Returns the address plus the tile origin in normalized texture
    /// coordinates. Divisions are done by multiplying with reciprocals, so
    /// the intra-row offset can come out as `1.0 - ε` and round to a full
    /// row; that case is carried into the row offset.
    pub fn address_f32(&self, slice: f32) -> (SliceAddress, [f32; 2]) {
        let inv_imgs_per_texture = 1.0 / self.imgs_per_texture as f32;
        let inv_imgs_per_tile = 1.0 / self.imgs_per_tile as f32;
        let ntx = self.ntx as f32;
        let inv_ntx = 1.0 / ntx;

        let texture = (slice * inv_imgs_per_texture + 0.5 * inv_imgs_per_texture).floor();
        let local = slice - texture * self.imgs_per_texture as f32;
        let tile = (local * inv_imgs_per_tile + 0.5 * inv_imgs_per_tile).floor();
        let channel = local - tile * self.imgs_per_tile as f32;

        let row_pos = tile * inv_ntx;
        let mut row = row_pos.floor();
        let mut col = ((row_pos - row) * ntx).round();
        if col >= ntx {
            col = 0.0;
            row += 1.0;
        }
        let x_offset = col * inv_ntx;

        let texture_index = texture as u32;
        let tiles_y = self.tiles_y(texture_index) as f32;
        let address = SliceAddress {
            texture: texture_index,
            tile_x: col as u32,
            tile_y: row as u32,
            channel: channel.round() as u32,
        };
        (address, [x_offset, row / tiles_y])
    }

    /// Byte offset of pixel `(x, y)` of `slice` inside its texture's RGBA8 data,
    /// pointing at the first byte of that slice's channel slot.
    pub fn byte_offset(&self, slice: u32, x: u32, y: u32) -> (u32, usize) {
        let addr = self.address(slice);
        let (tex_width, _) = self.texture_size(addr.texture);
        let px = addr.tile_x * self.img_width + x;
        let py = addr.tile_y * self.img_height + y;
        let bytes_per_slot = self.bits_per_pixel / 8;
        let offset = (py as usize * tex_width as usize + px as usize) * TEXEL_BYTES
            + (addr.channel * bytes_per_slot) as usize;
        (addr.texture, offset)
    }
}

/// Interleaves up to `imgs_per_tile` slices into one tile of RGBA8 texels.
///
/// Slices are raw pixel buffers of `width * height` pixels; 16-bit pixels are
/// stored low byte first regardless of source endianness. Missing slices
/// (a short final batch) leave their channels zero.
pub fn interleave_tile(
    slices: &[&[u8]],
    width: u32,
    height: u32,
    bits_per_pixel: u32,
    big_endian: bool,
) -> Vec<u8> {
    let pixels = width as usize * height as usize;
    let mut tile = vec![0u8; pixels * TEXEL_BYTES];
    match bits_per_pixel {
        8 => {
            for (channel, slice) in slices.iter().enumerate().take(4) {
                for (p, &value) in slice.iter().enumerate().take(pixels) {
                    tile[p * TEXEL_BYTES + channel] = value;
                }
            }
        }
        16 => {
            for (slot, slice) in slices.iter().enumerate().take(2) {
                for p in 0..pixels.min(slice.len() / 2) {
                    let (lo, hi) = if big_endian {
                        (slice[2 * p + 1], slice[2 * p])
                    } else {
                        (slice[2 * p], slice[2 * p + 1])
                    };
                    tile[p * TEXEL_BYTES + 2 * slot] = lo;
                    tile[p * TEXEL_BYTES + 2 * slot + 1] = hi;
                }
            }
        }
        _ => {}
    }
    tile
}

/// Converts slices to native 3D texture data: one byte per voxel at 8 bpp,
/// a little-endian `(low, high)` byte pair at 16 bpp.
pub fn native_slab(slices: &[&[u8]], bits_per_pixel: u32, big_endian: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(slices.iter().map(|s| s.len()).sum());
    for slice in slices {
        if bits_per_pixel == 16 && big_endian {
            for pair in slice.chunks_exact(2) {
                out.push(pair[1]);
                out.push(pair[0]);
            }
        } else {
            out.extend_from_slice(slice);
        }
    }
    out
}

/// Zeroes the outermost rows and columns of a slice.
///
/// Slices packed side by side in a mosaic texture would otherwise bleed
/// into each other under linear filtering.
pub fn zero_borders(slice: &mut [u8], width: u32, height: u32, bytes_per_pixel: usize) {
    let (w, h) = (width as usize, height as usize);
    let row_bytes = w * bytes_per_pixel;
    if slice.len() < row_bytes * h || w == 0 || h == 0 {
        return;
    }
    slice[..row_bytes].fill(0);
    slice[(h - 1) * row_bytes..h * row_bytes].fill(0);
    for y in 0..h {
        let row = y * row_bytes;
        slice[row..row + bytes_per_pixel].fill(0);
        slice[row + row_bytes - bytes_per_pixel..row + row_bytes].fill(0);
    }
}

/// GPU-compatible mosaic layout, in the float form the ray march uses.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MosaicUniforms {
    /// img_width, img_height, num_imgs, imgs_per_texture.
    pub geom: [f32; 4],
    /// ntx, nty, last_nty, imgs_per_tile.
    pub tiles: [f32; 4],
    /// x = texture count.
    pub counts: [f32; 4],
}

impl From<&MosaicLayout> for MosaicUniforms {
    fn from(layout: &MosaicLayout) -> Self {
        Self {
            geom: [
                layout.img_width as f32,
                layout.img_height as f32,
                layout.num_imgs as f32,
                layout.imgs_per_texture as f32,
            ],
            tiles: [
                layout.ntx as f32,
                layout.nty as f32,
                layout.last_nty as f32,
                layout.imgs_per_tile as f32,
            ],
            counts: [layout.texture_count as f32, 0.0, 0.0, 0.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_layout_small_volume() {
        let layout = MosaicLayout::compute(4, 4, 2, 8, 2048).unwrap();
        assert_eq!(layout.imgs_per_tile, 4);
        assert_eq!(layout.ntx, 1);
        assert_eq!(layout.nty, 1);
        assert_eq!(layout.texture_count, 1);
        assert_eq!(layout.texture_size(0), (4, 4));
    }

    #[test]
    fn test_layout_square_packing() {
        // 64 slices at 16 bpp -> 32 tiles -> ntx = ceil(sqrt(32)) = 6, nty = 6
        let layout = MosaicLayout::compute(100, 80, 64, 16, 4096).unwrap();
        assert_eq!(layout.imgs_per_tile, 2);
        assert_eq!(layout.ntx, 6);
        assert_eq!(layout.nty, 6);
        assert_eq!(layout.imgs_per_texture, 72);
        assert_eq!(layout.texture_count, 1);
        assert_eq!(layout.texture_size(0), (600, 480));
    }

    #[test]
    fn test_layout_multiple_textures_shrinks_last() {
        // Only 2x2 tiles fit in one texture: 8 slices per texture at 16 bpp.
        let layout = MosaicLayout::compute(500, 500, 20, 16, 1024).unwrap();
        assert_eq!(layout.ntx, 2);
        assert_eq!(layout.nty, 2);
        assert_eq!(layout.imgs_per_texture, 8);
        assert_eq!(layout.texture_count, 3);
        // 4 remaining slices -> 2 tiles -> one row
        assert_eq!(layout.last_nty, 1);
        assert_eq!(layout.texture_size(2), (1000, 500));
        assert!(layout.fits(3));
        assert!(!layout.fits(2));
    }

    #[test]
    fn test_layout_rejects_bad_input() {
        assert!(matches!(
            MosaicLayout::compute(4, 4, 4, 12, 2048),
            Err(VolumeError::Configuration(_))
        ));
        assert!(matches!(
            MosaicLayout::compute(0, 4, 4, 8, 2048),
            Err(VolumeError::Configuration(_))
        ));
        assert!(matches!(
            MosaicLayout::compute(4096, 4, 4, 8, 2048),
            Err(VolumeError::Capacity(_))
        ));
    }

    #[test]
    fn test_adjacent_slices_use_different_channels() {
        let layout = MosaicLayout::compute(16, 16, 40, 8, 2048).unwrap();
        let a = layout.address(9);
        let b = layout.address(10);
        assert_eq!((a.tile_x, a.tile_y), (b.tile_x, b.tile_y));
        assert_eq!(a.channel + 1, b.channel);
        assert_eq!(layout.address(12).channel, 0);
    }

    #[test]
    fn test_reciprocal_roundoff_is_carried() {
        // Reciprocal-based row positions can land just below an integer;
        // the float address must still agree with the integer one.
        for ntx in 2..200u32 {
            let layout = MosaicLayout {
                img_width: 1,
                img_height: 1,
                num_imgs: ntx * 8 * 4,
                bits_per_pixel: 8,
                ntx,
                nty: 8,
                last_nty: 8,
                imgs_per_tile: 4,
                imgs_per_texture: ntx * 8 * 4,
                texture_count: 1,
            };
            for slice in 0..layout.num_imgs {
                let (addr, origin) = layout.address_f32(slice as f32);
                assert_eq!(addr, layout.address(slice), "ntx {ntx} slice {slice}");
                assert!(origin[0] < 1.0);
            }
        }
    }

    #[test]
    fn test_interleave_sixteen_bit_big_endian() {
        let s0 = [0x12u8, 0x34, 0xAB, 0xCD];
        let s1 = [0x00u8, 0x01, 0xFF, 0xFE];
        let tile = interleave_tile(&[&s0, &s1], 2, 1, 16, true);
        assert_eq!(&tile[0..4], &[0x34, 0x12, 0x01, 0x00]);
        assert_eq!(&tile[4..8], &[0xCD, 0xAB, 0xFE, 0xFF]);
    }

    #[test]
    fn test_zero_borders() {
        let mut slice = vec![9u8; 16];
        zero_borders(&mut slice, 4, 4, 1);
        assert_eq!(
            slice,
            vec![0, 0, 0, 0, 0, 9, 9, 0, 0, 9, 9, 0, 0, 0, 0, 0]
        );
    }

    proptest! {
        #[test]
        fn prop_layout_is_idempotent(
            w in 1u32..600, h in 1u32..600, n in 1u32..500, sixteen in any::<bool>()
        ) {
            let bpp = if sixteen { 16 } else { 8 };
            let a = MosaicLayout::compute(w, h, n, bpp, 4096).unwrap();
            let b = MosaicLayout::compute(w, h, n, bpp, 4096).unwrap();
            prop_assert_eq!(a, b);
            prop_assert!(a.ntx * w <= 4096);
            prop_assert!(a.nty * h <= 4096);
            prop_assert!(a.texture_count * a.imgs_per_texture >= n);
            prop_assert!(a.last_nty <= a.nty);
        }

        #[test]
        fn prop_mosaic_round_trip(
            w in 1u32..12, h in 1u32..12, n in 1u32..40,
            sixteen in any::<bool>(), big_endian in any::<bool>(), seed in any::<u32>(),
        ) {
            let bpp = if sixteen { 16 } else { 8 };
            let bytes = (bpp / 8) as usize;
            let layout = MosaicLayout::compute(w, h, n, bpp, 48).unwrap();

            let value_at = |s: u32, x: u32, y: u32| -> u16 {
                let v = seed
                    .wrapping_mul(2_654_435_761)
                    .wrapping_add(s * 7919 + y * 131 + x * 31);
                if sixteen { (v >> 7) as u16 } else { (v >> 7) as u8 as u16 }
            };
            let slices: Vec<Vec<u8>> = (0..n)
                .map(|s| {
                    let mut buf = Vec::new();
                    for y in 0..h {
                        for x in 0..w {
                            let v = value_at(s, x, y);
                            if sixteen {
                                let b = if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
                                buf.extend_from_slice(&b);
                            } else {
                                buf.push(v as u8);
                            }
                        }
                    }
                    buf
                })
                .collect();

            let mut textures: Vec<Vec<u8>> = (0..layout.texture_count)
                .map(|t| {
                    let (tw, th) = layout.texture_size(t);
                    vec![0; (tw * th) as usize * TEXEL_BYTES]
                })
                .collect();
            for first in (0..n).step_by(layout.imgs_per_tile as usize) {
                let last = (first + layout.imgs_per_tile).min(n);
                let batch: Vec<&[u8]> =
                    (first..last).map(|s| slices[s as usize].as_slice()).collect();
                let tile = interleave_tile(&batch, w, h, bpp, big_endian);
                let addr = layout.address(first);
                let (tw, _) = layout.texture_size(addr.texture);
                let tex = &mut textures[addr.texture as usize];
                for y in 0..h {
                    let dst = (((addr.tile_y * h + y) * tw + addr.tile_x * w) as usize) * TEXEL_BYTES;
                    let src = (y * w) as usize * TEXEL_BYTES;
                    let len = w as usize * TEXEL_BYTES;
                    tex[dst..dst + len].copy_from_slice(&tile[src..src + len]);
                }
            }

            for s in 0..n {
                for y in 0..h {
                    for x in 0..w {
                        let (t, off) = layout.byte_offset(s, x, y);
                        let tex = &textures[t as usize];
                        let got = if bytes == 2 {
                            u16::from_le_bytes([tex[off], tex[off + 1]])
                        } else {
                            u16::from(tex[off])
                        };
                        prop_assert_eq!(got, value_at(s, x, y));
                    }
                }
            }
        }
    }
}

//! Relief mask: per-column top and bottom depths peeled off the volume
//! along the slice axis.
//!
//! Column `(x, y)` of a mask hides the samples with texture `z < bottom` and
//! `z > 1 - top`. A mask with all heights zero hides nothing.

use glam::{UVec3, Vec3};

use crate::error::{Result, VolumeError};

/// Heights are stored as 16-bit fractions of the volume depth.
pub const MASK_HEIGHT_SCALE: f32 = 65535.0;

/// Bottom and top mask heights for each `(x, y)` column of a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliefMask {
    width: u32,
    height: u32,
    /// `[bottom, top]` per column, row-major.
    heights: Vec<[u16; 2]>,
}

fn quantize(h: f32) -> u16 {
    (h.clamp(0.0, 1.0) * MASK_HEIGHT_SCALE).round() as u16
}

/// Rasterizes piecewise-linear control points `(x, height)` into `out`.
/// Columns before the first or after the last point take its height.
fn rasterize(points: &[(u32, f32)], out: &mut [f32]) {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| p.0);
    let Some(&last) = sorted.last() else {
        out.fill(0.0);
        return;
    };
    for (x, h) in (0u32..).zip(out.iter_mut()) {
        let next = sorted.iter().position(|p| p.0 >= x);
        *h = match next {
            None => last.1,
            Some(0) => sorted[0].1,
            Some(i) => {
                let (x0, h0) = sorted[i - 1];
                let (x1, h1) = sorted[i];
                let f = (x - x0) as f32 / (x1 - x0).max(1) as f32;
                h0 + (h1 - h0) * f
            }
        };
    }
}

impl ReliefMask {
    /// A mask of `width x height` columns that hides nothing.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            heights: vec![[0; 2]; width as usize * height as usize],
        }
    }

    /// A void mask matching the `(x, y)` dims of a volume.
    pub fn for_dims(dims: UVec3) -> Self {
        Self::new(dims.x, dims.y)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether the mask was made for a volume of these dims.
    pub fn fits(&self, dims: UVec3) -> bool {
        self.width == dims.x && self.height == dims.y
    }

    /// True when no sample is hidden.
    pub fn is_void(&self) -> bool {
        self.heights.iter().all(|&[bottom, top]| bottom == 0 && top == 0)
    }

    fn index(&self, x: u32, y: u32) -> Result<usize> {
        if x >= self.width || y >= self.height {
            return Err(VolumeError::InvalidMask(format!(
                "mask column ({x}, {y}) outside {}x{}",
                self.width, self.height
            )));
        }
        Ok((y * self.width + x) as usize)
    }

    /// Sets the bottom and top heights of a column, as fractions of the
    /// volume depth.
    pub fn set(&mut self, x: u32, y: u32, bottom: f32, top: f32) -> Result<()> {
        let i = self.index(x, y)?;
        self.heights[i] = [quantize(bottom), quantize(top)];
        Ok(())
    }

    /// `(bottom, top)` heights of a column.
    pub fn get(&self, x: u32, y: u32) -> Result<(f32, f32)> {
        let [bottom, top] = self.heights[self.index(x, y)?];
        Ok((f32::from(bottom) / MASK_HEIGHT_SCALE, f32::from(top) / MASK_HEIGHT_SCALE))
    }

    /// Fills row `y` from piecewise-linear top and bottom profiles given as
    /// `(x, height)` control points.
    pub fn fill_row(&mut self, y: u32, bottom: &[(u32, f32)], top: &[(u32, f32)]) -> Result<()> {
        self.index(0, y)?;
        let mut lo = vec![0.0; self.width as usize];
        let mut hi = vec![0.0; self.width as usize];
        rasterize(bottom, &mut lo);
        rasterize(top, &mut hi);
        let start = (y * self.width) as usize;
        for (texel, (b, t)) in self.heights[start..start + self.width as usize]
            .iter_mut()
            .zip(lo.into_iter().zip(hi))
        {
            *texel = [quantize(b), quantize(t)];
        }
        Ok(())
    }

    /// Sets every column to the same heights.
    pub fn fill(&mut self, bottom: f32, top: f32) {
        self.heights.fill([quantize(bottom), quantize(top)]);
    }

    /// Column under texture coordinates `tc`, clamped to the mask.
    fn column(&self, tc: Vec3) -> Option<[u16; 2]> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let x = ((tc.x.max(0.0) * self.width as f32) as u32).min(self.width - 1);
        let y = ((tc.y.max(0.0) * self.height as f32) as u32).min(self.height - 1);
        self.heights.get((y * self.width + x) as usize).copied()
    }

    /// Whether the sample at texture coordinates `tc` is hidden.
    pub fn hides(&self, tc: Vec3) -> bool {
        let Some([bottom, top]) = self.column(tc) else {
            return false;
        };
        let bottom = f32::from(bottom) / MASK_HEIGHT_SCALE;
        let top = f32::from(top) / MASK_HEIGHT_SCALE;
        tc.z < bottom || tc.z > 1.0 - top
    }

    /// Texel bytes for an RGBA8 texture: bottom height in R/G, top in B/A,
    /// both little-endian.
    pub fn texel_bytes(&self) -> Vec<u8> {
        self.heights
            .iter()
            .flat_map(|&[bottom, top]| {
                let [b0, b1] = bottom.to_le_bytes();
                let [t0, t1] = top.to_le_bytes();
                [b0, b1, t0, t1]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_mask_is_void() {
        let mask = ReliefMask::for_dims(UVec3::new(4, 3, 8));
        assert!(mask.is_void());
        assert!(mask.fits(UVec3::new(4, 3, 1)));
        assert!(!mask.fits(UVec3::new(3, 4, 8)));
        assert!(!mask.hides(Vec3::new(0.5, 0.5, 0.0)));
        assert!(!mask.hides(Vec3::new(0.5, 0.5, 1.0)));
    }

    #[test]
    fn test_hides_outside_band() {
        let mut mask = ReliefMask::new(2, 2);
        mask.set(1, 0, 0.25, 0.5).unwrap();
        assert!(!mask.is_void());
        let (bottom, top) = mask.get(1, 0).unwrap();
        assert!((bottom - 0.25).abs() < 1e-4 && (top - 0.5).abs() < 1e-4);

        assert!(mask.hides(Vec3::new(0.75, 0.25, 0.1)));
        assert!(!mask.hides(Vec3::new(0.75, 0.25, 0.3)));
        assert!(mask.hides(Vec3::new(0.75, 0.25, 0.6)));
        // other columns are untouched
        assert!(!mask.hides(Vec3::new(0.25, 0.25, 0.1)));
        assert!(mask.set(2, 0, 0.1, 0.1).is_err());
    }

    #[test]
    fn test_fill_row_interpolates_profiles() {
        let mut mask = ReliefMask::new(5, 2);
        mask.fill_row(1, &[(0, 0.0), (4, 0.4)], &[(2, 0.5)]).unwrap();
        for x in 0..5 {
            let (bottom, top) = mask.get(x, 1).unwrap();
            assert!((bottom - 0.1 * x as f32).abs() < 1e-4, "x {x}: {bottom}");
            assert!((top - 0.5).abs() < 1e-4);
            assert_eq!(mask.get(x, 0).unwrap(), (0.0, 0.0));
        }
        assert!(mask.fill_row(2, &[], &[]).is_err());
    }

    #[test]
    fn test_texel_bytes_little_endian() {
        let mut mask = ReliefMask::new(1, 1);
        mask.set(0, 0, 1.0, 0.0).unwrap();
        assert_eq!(mask.texel_bytes(), vec![0xff, 0xff, 0, 0]);
    }
}

//! Synthetic test volume.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use volcast_core::{Result, VolumeHeader, VolumeLoader};

/// Seed of the noise generator.
pub const MOCK_SEED: u64 = 123;

const PLATE_VALUE: u16 = 30000;
const GRID_VALUE: u16 = 32000;
const NOISE_LEVEL: i32 = 15000;

/// Generates a 16-bit little-endian volume of three noisy plates stacked
/// along z. The top layers of each plate carry a grid pattern: 64-pixel
/// pitch on the middle plate, 50-pixel pitch on the others.
///
/// Slices are generated on demand, so the output is identical for every
/// batch size.
pub struct MockDataLoader {
    dims: [u32; 3],
    next: u32,
    rng: StdRng,
    pad: u32,
    thickness: f32,
    centers: [f32; 3],
}

impl MockDataLoader {
    /// The default 640 x 420 x 64 volume.
    pub fn new() -> Self {
        Self::with_dims([640, 420, 64])
    }

    pub fn with_dims(dims: [u32; 3]) -> Self {
        let depth = dims[2] as f32;
        let pad = (depth / 5.0).round();
        let thickness = (depth * 2.0 / 20.0 + 1.0).round();
        let gap = ((depth - 2.0 * pad - 3.0 * thickness) / 2.0).round();
        let centers = [
            (pad + thickness / 2.0).round(),
            (pad + 1.5 * thickness + gap).round(),
            (pad + 2.5 * thickness + 2.0 * gap).round(),
        ];
        Self {
            dims,
            next: 0,
            rng: StdRng::seed_from_u64(MOCK_SEED),
            pad: pad as u32,
            thickness,
            centers,
        }
    }

    fn plate_value(&self, x: u32, y: u32, z: u32) -> u16 {
        let [w, h, _] = self.dims;
        if x < self.pad || y < self.pad || x + self.pad >= w || y + self.pad >= h {
            return 0;
        }
        let z = z as f32;
        let Some((index, rel)) = self
            .centers
            .iter()
            .map(|c| z - c)
            .enumerate()
            .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        else {
            return 0;
        };
        if rel.abs() > self.thickness / 2.0 {
            return 0;
        }
        if rel < self.thickness / 2.0 - 2.0 {
            return PLATE_VALUE;
        }
        let (pitch, half_width, lines) = if index == 1 { (64, 5, 10) } else { (50, 4, 13) };
        let on_line = |v: u32| (0..lines).any(|p| (i64::from(v) - p * pitch).abs() < half_width);
        if on_line(x) || on_line(y) {
            GRID_VALUE
        } else {
            0
        }
    }

    fn slice(&mut self, z: u32) -> Vec<u8> {
        let [w, h, _] = self.dims;
        let mut bytes = Vec::with_capacity((w * h * 2) as usize);
        for y in 0..h {
            for x in 0..w {
                let noise = self.rng.gen_range(0..NOISE_LEVEL) - NOISE_LEVEL / 2;
                let v = (i32::from(self.plate_value(x, y, z)) + noise).clamp(0, i32::from(u16::MAX));
                bytes.extend_from_slice(&(v as u16).to_le_bytes());
            }
        }
        bytes
    }
}

impl Default for MockDataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeLoader for MockDataLoader {
    fn header(&self) -> Result<VolumeHeader> {
        Ok(VolumeHeader::new(self.dims, 16))
    }

    fn next_batch(&mut self, max_slices: u32) -> Result<Option<Vec<Vec<u8>>>> {
        let depth = self.dims[2];
        if self.next >= depth {
            return Ok(None);
        }
        let count = max_slices.max(1).min(depth - self.next);
        let batch = (self.next..self.next + count).map(|z| self.slice(z)).collect();
        self.next += count;
        Ok(Some(batch))
    }

    fn attributes(&self) -> Vec<(String, serde_json::Value)> {
        vec![
            ("modality".into(), json!("Synthetic")),
            ("rescaleSlope".into(), json!(1)),
            ("rescaleIntercept".into(), json!(0)),
            ("sliceGap".into(), json!(1)),
            ("rowDir".into(), json!([1, 0, 0])),
            ("colDir".into(), json!([0, 1, 0])),
        ]
    }

    fn cancel(&mut self) {
        log::debug!("mock load cancelled at slice {}", self.next);
    }
}

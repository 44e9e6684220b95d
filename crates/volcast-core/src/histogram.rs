//! Streaming intensity histogram and threshold-based auto windowing.
//!
//! Slices are fed to the histogram as they are uploaded. Only every
//! [`SAMPLE_STRIDE`]th pixel is decoded, which is plenty for estimating a
//! display range and keeps loading fast.

/// Number of distinct intensity values the histogram can represent.
pub const HISTOGRAM_RESOLUTION: usize = 65536;

/// Pixel stride used when sampling slice buffers
/// (every 8th byte at 8 bpp, every 16th byte at 16 bpp).
pub const SAMPLE_STRIDE: usize = 8;

/// Largest threshold percent accepted by [`Histogram::threshed_min_max`].
const MAX_THRESH_PERCENT: f32 = 49.99;

#[derive(Debug, Clone, Copy)]
struct ThreshCache {
    percent: f32,
    range: (u32, u32),
}

/// Frequency table over sampled 16-bit intensity values.
#[derive(Debug, Clone)]
pub struct Histogram {
    bins: Vec<u64>,
    bin_width: u32,
    min_val: u32,
    max_val: u32,
    sample_count: u64,
    cache: Option<ThreshCache>,
}

impl Histogram {
    /// Creates a histogram with the given number of bins.
    ///
    /// The bin count is rounded up to a power of two and clamped to
    /// `1..=65536` so that every bin covers the same number of values.
    pub fn new(bin_count: usize) -> Self {
        let bin_count = bin_count.clamp(1, HISTOGRAM_RESOLUTION).next_power_of_two();
        Self {
            bins: vec![0; bin_count],
            bin_width: (HISTOGRAM_RESOLUTION / bin_count) as u32,
            min_val: u32::MAX,
            max_val: 0,
            sample_count: 0,
            cache: None,
        }
    }

    /// Number of bins.
    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Number of intensity values covered by each bin.
    pub fn bin_width(&self) -> u32 {
        self.bin_width
    }

    /// Count stored in bin `index`.
    pub fn bin(&self, index: usize) -> u64 {
        self.bins.get(index).copied().unwrap_or(0)
    }

    /// Number of pixels sampled so far.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Smallest sampled value, if any samples were added.
    pub fn min_val(&self) -> Option<u32> {
        (self.sample_count > 0).then_some(self.min_val)
    }

    /// Largest sampled value, if any samples were added.
    pub fn max_val(&self) -> Option<u32> {
        (self.sample_count > 0).then_some(self.max_val)
    }

    /// Resets all counts and the memoized threshold result.
    pub fn clear(&mut self) {
        self.bins.iter_mut().for_each(|b| *b = 0);
        self.min_val = u32::MAX;
        self.max_val = 0;
        self.sample_count = 0;
        self.cache = None;
    }

    /// Decodes every [`SAMPLE_STRIDE`]th pixel of `buffer` and adds it to the table.
    ///
    /// `bytes_per_pixel` must be 1 or 2; other values are ignored.
    pub fn add_samples(&mut self, buffer: &[u8], bytes_per_pixel: usize, big_endian: bool) {
        let step = SAMPLE_STRIDE * bytes_per_pixel;
        match bytes_per_pixel {
            1 => {
                for &value in buffer.iter().step_by(step) {
                    self.add_value(u32::from(value));
                }
            }
            2 => {
                let mut offset = 0;
                while offset + 1 < buffer.len() {
                    let pair = [buffer[offset], buffer[offset + 1]];
                    let value = if big_endian {
                        u16::from_be_bytes(pair)
                    } else {
                        u16::from_le_bytes(pair)
                    };
                    self.add_value(u32::from(value));
                    offset += step;
                }
            }
            _ => {
                log::warn!("histogram ignores {bytes_per_pixel}-byte pixels");
                return;
            }
        }
        self.cache = None;
    }

    fn add_value(&mut self, value: u32) {
        let index = ((value / self.bin_width) as usize).min(self.bins.len() - 1);
        self.bins[index] += 1;
        self.min_val = self.min_val.min(value);
        self.max_val = self.max_val.max(value);
        self.sample_count += 1;
    }

    /// Returns the `[lo, hi]` value range left after discarding `percent`% of
    /// the non-zero-bin mass at each end.
    ///
    /// Bin 0 (background) does not count towards the mass. The result is
    /// memoized until the percent changes or more samples are added.
    /// Returns `None` when no samples have been added.
    pub fn threshed_min_max(&mut self, percent: f32) -> Option<(u32, u32)> {
        if self.sample_count == 0 {
            return None;
        }
        let percent = percent.clamp(0.0, MAX_THRESH_PERCENT);
        if let Some(cache) = self.cache {
            if cache.percent == percent {
                return Some(cache.range);
            }
        }

        let mass: u64 = self.bins.iter().skip(1).sum();
        let range = if mass == 0 {
            (self.min_val, self.max_val)
        } else {
            let skip = mass as f64 * f64::from(percent) / 100.0;
            let last = self.bins.len() - 1;

            let mut lo_bin = last;
            let mut acc = 0u64;
            for (i, &count) in self.bins.iter().enumerate().skip(1) {
                acc += count;
                if acc as f64 > skip {
                    lo_bin = i;
                    break;
                }
            }

            let mut hi_bin = 1;
            acc = 0;
            for i in (1..=last).rev() {
                acc += self.bins[i];
                if acc as f64 > skip {
                    hi_bin = i;
                    break;
                }
            }

            let lo = (lo_bin as u32 * self.bin_width).max(self.min_val);
            let hi = ((hi_bin as u32 + 1) * self.bin_width - 1).min(self.max_val);
            (lo, hi.max(lo))
        };

        self.cache = Some(ThreshCache { percent, range });
        Some(range)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(HISTOGRAM_RESOLUTION)
    }
}

//! Volume metadata.

use std::collections::BTreeMap;

use glam::{UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::coords;
use crate::error::{Result, VolumeError};
use crate::mosaic;

/// What a loader declares before delivering slices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeHeader {
    /// Width, height and slice count.
    pub dims: [u32; 3],
    /// Bits per pixel, 8 or 16.
    pub bits_per_pixel: u32,
    /// Whether 16-bit samples are stored big-endian.
    pub big_endian: bool,
    /// Voxel spacing along the slice axis relative to in-plane spacing.
    pub slice_gap: f32,
}

impl VolumeHeader {
    pub fn new(dims: [u32; 3], bits_per_pixel: u32) -> Self {
        Self {
            dims,
            bits_per_pixel,
            big_endian: false,
            slice_gap: 1.0,
        }
    }

    /// Sets the sample byte order.
    #[must_use]
    pub fn with_big_endian(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }

    /// Sets the slice spacing.
    #[must_use]
    pub fn with_slice_gap(mut self, slice_gap: f32) -> Self {
        self.slice_gap = slice_gap;
        self
    }

    /// Rejects unsupported bit depths and empty volumes.
    pub fn validate(&self) -> Result<()> {
        mosaic::validate_bpp(self.bits_per_pixel)?;
        if self.dims.contains(&0) {
            return Err(VolumeError::Configuration(format!(
                "zero-sized volume {:?}",
                self.dims
            )));
        }
        if !(self.slice_gap.is_finite() && self.slice_gap > 0.0) {
            return Err(VolumeError::Configuration(format!(
                "slice gap must be positive, got {}",
                self.slice_gap
            )));
        }
        Ok(())
    }

    /// Bytes per pixel of each slice buffer.
    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel / 8) as usize
    }

    /// Byte length of one slice buffer.
    pub fn slice_bytes(&self) -> usize {
        self.dims[0] as usize * self.dims[1] as usize * self.bytes_per_pixel()
    }
}

/// A loaded volume as seen by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeInfo {
    header: VolumeHeader,
    attributes: BTreeMap<String, serde_json::Value>,
}

impl VolumeInfo {
    pub fn new(header: VolumeHeader) -> Self {
        Self {
            header,
            attributes: BTreeMap::new(),
        }
    }

    /// The header the volume was loaded with.
    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    pub fn dims(&self) -> UVec3 {
        UVec3::from_array(self.header.dims)
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.header.bits_per_pixel
    }

    /// Largest raw sample value.
    pub fn max_value(&self) -> u32 {
        (1u32 << self.header.bits_per_pixel) - 1
    }

    /// Dims scaled by the slice gap.
    pub fn shape(&self) -> Vec3 {
        let d = self.dims().as_vec3();
        Vec3::new(d.x, d.y, d.z * self.header.slice_gap)
    }

    /// Model-space extent, longest side 1.
    pub fn aspect(&self) -> Vec3 {
        coords::aspect_of(self.shape())
    }

    /// Length of the shape's diagonal.
    pub fn diagonal_size(&self) -> f32 {
        self.shape().length()
    }

    /// Free-form attributes a loader attached (patient name, modality...).
    pub fn attributes(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
    }
}

//! Raw slice data already decoded by the caller.

use std::collections::VecDeque;
use std::path::Path;

use volcast_core::{Result, VolumeError, VolumeHeader, VolumeLoader};

/// Serves slices of a header-described volume from memory.
pub struct RawSliceLoader {
    header: VolumeHeader,
    slices: VecDeque<Vec<u8>>,
    attributes: Vec<(String, serde_json::Value)>,
}

impl RawSliceLoader {
    /// One buffer per slice, in slice order.
    pub fn new(header: VolumeHeader, slices: Vec<Vec<u8>>) -> Result<Self> {
        header.validate()?;
        if slices.len() != header.dims[2] as usize {
            return Err(VolumeError::Configuration(format!(
                "{} slices for a depth of {}",
                slices.len(),
                header.dims[2]
            )));
        }
        let expected = header.slice_bytes();
        if let Some(bad) = slices.iter().position(|s| s.len() != expected) {
            return Err(VolumeError::Configuration(format!(
                "slice {bad} has {} bytes, expected {expected}",
                slices[bad].len()
            )));
        }
        Ok(Self {
            header,
            slices: slices.into(),
            attributes: Vec::new(),
        })
    }

    /// Splits one contiguous buffer of `dims[2]` slices.
    pub fn from_bytes(header: VolumeHeader, data: &[u8]) -> Result<Self> {
        header.validate()?;
        let slice_bytes = header.slice_bytes();
        let expected = slice_bytes * header.dims[2] as usize;
        if data.len() != expected {
            return Err(VolumeError::Configuration(format!(
                "{} bytes of voxel data, expected {expected}",
                data.len()
            )));
        }
        let slices = data.chunks_exact(slice_bytes).map(<[u8]>::to_vec).collect();
        Self::new(header, slices)
    }

    /// Reads a headerless file of `dims[2]` consecutive slices.
    pub fn from_file(header: VolumeHeader, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        log::info!("read {} bytes of raw voxels from {}", data.len(), path.display());
        Self::from_bytes(header, &data)
    }

    /// Attaches a metadata attribute to the loaded volume.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.push((key.into(), value));
        self
    }

    /// Slices not yet handed out.
    pub fn remaining(&self) -> usize {
        self.slices.len()
    }
}

impl VolumeLoader for RawSliceLoader {
    fn header(&self) -> Result<VolumeHeader> {
        Ok(self.header)
    }

    fn next_batch(&mut self, max_slices: u32) -> Result<Option<Vec<Vec<u8>>>> {
        if self.slices.is_empty() {
            return Ok(None);
        }
        let count = (max_slices.max(1) as usize).min(self.slices.len());
        Ok(Some(self.slices.drain(..count).collect()))
    }

    fn attributes(&self) -> Vec<(String, serde_json::Value)> {
        self.attributes.clone()
    }

    fn cancel(&mut self) {
        self.slices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volcast_core::ErrorKind;

    #[test]
    fn test_from_bytes_splits_slices() {
        let header = VolumeHeader::new([2, 2, 3], 8);
        let data: Vec<u8> = (0..12).collect();
        let mut loader = RawSliceLoader::from_bytes(header, &data).unwrap();
        let batch = loader.next_batch(2).unwrap().unwrap();
        assert_eq!(batch, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]]);
        assert_eq!(loader.remaining(), 1);
        assert_eq!(loader.next_batch(2).unwrap().unwrap(), vec![vec![8, 9, 10, 11]]);
        assert!(loader.next_batch(2).unwrap().is_none());
    }

    #[test]
    fn test_rejects_wrong_sizes() {
        let header = VolumeHeader::new([2, 2, 2], 16);
        let err = RawSliceLoader::from_bytes(header, &[0; 10]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err = RawSliceLoader::new(header, vec![vec![0; 8]]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err = RawSliceLoader::new(VolumeHeader::new([2, 2, 1], 12), vec![vec![0; 8]])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let header = VolumeHeader::new([2, 2, 2], 8);
        let err = RawSliceLoader::from_file(header, "/nonexistent/volume.raw").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}

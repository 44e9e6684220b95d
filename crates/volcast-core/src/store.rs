//! Volume store: owns the volume's texture storage and histogram and
//! brackets every mutation between `begin_load` and `end_load`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VolumeError};
use crate::histogram::{Histogram, HISTOGRAM_RESOLUTION};
use crate::mosaic::{self, MosaicLayout};
use crate::params::FeatureFlags;
use crate::volume::{VolumeHeader, VolumeInfo};
use crate::window::WindowLevel;

/// Number of mosaic texture bindings available to the ray march.
pub const MAX_MOSAIC_TEXTURES: u32 = 8;

/// Default outlier percentage discarded at each end for the auto window.
pub const DEFAULT_AUTO_WINDOW_PERCENT: f32 = 1.0;

/// Texture limits of the device the volume is stored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCaps {
    pub max_texture_2d: u32,
    pub max_texture_3d: u32,
    pub max_mosaic_textures: u32,
    pub supports_3d: bool,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            max_texture_2d: 8192,
            max_texture_3d: 2048,
            max_mosaic_textures: MAX_MOSAIC_TEXTURES,
            supports_3d: true,
        }
    }
}

/// Which storage the store may pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageMode {
    /// Native 3D texture when the device allows it, mosaic otherwise.
    #[default]
    Auto,
    Native3d,
    Mosaic,
}

/// Store configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub storage: StorageMode,
    pub histogram_bins: usize,
    pub auto_window_percent: f32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            storage: StorageMode::Auto,
            histogram_bins: HISTOGRAM_RESOLUTION,
            auto_window_percent: DEFAULT_AUTO_WINDOW_PERCENT,
        }
    }
}

/// How a volume is laid out in texture memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePlan {
    /// One 3D texture. 16-bit voxels are stored as a (low, high) byte pair.
    Native3d {
        dims: [u32; 3],
        bits_per_pixel: u32,
    },
    /// A set of 2D mosaic textures.
    Mosaic(MosaicLayout),
}

impl StoragePlan {
    /// Picks the storage for a volume.
    pub fn choose(header: &VolumeHeader, caps: &DeviceCaps, mode: StorageMode) -> Result<Self> {
        header.validate()?;
        let fits_3d = caps.supports_3d && header.dims.iter().all(|&d| d <= caps.max_texture_3d);

        let native = || Self::Native3d {
            dims: header.dims,
            bits_per_pixel: header.bits_per_pixel,
        };
        match mode {
            StorageMode::Auto if fits_3d => return Ok(native()),
            StorageMode::Native3d if fits_3d => return Ok(native()),
            StorageMode::Native3d => {
                return Err(VolumeError::Capacity(format!(
                    "volume {:?} exceeds 3D texture limit {}",
                    header.dims, caps.max_texture_3d
                )));
            }
            StorageMode::Auto | StorageMode::Mosaic => {}
        }

        let [w, h, d] = header.dims;
        let layout = MosaicLayout::compute(w, h, d, header.bits_per_pixel, caps.max_texture_2d)?;
        let units = caps.max_mosaic_textures.min(MAX_MOSAIC_TEXTURES);
        if !layout.fits(units) {
            return Err(VolumeError::Capacity(format!(
                "volume {:?} needs {} mosaic textures, device offers {units}",
                header.dims, layout.texture_count
            )));
        }
        Ok(Self::Mosaic(layout))
    }

    pub fn is_mosaic(&self) -> bool {
        matches!(self, Self::Mosaic(_))
    }

    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            Self::Native3d { bits_per_pixel, .. } => *bits_per_pixel,
            Self::Mosaic(layout) => layout.bits_per_pixel,
        }
    }

    /// Program flags describing this storage.
    pub fn feature_flags(&self) -> FeatureFlags {
        let mut flags = FeatureFlags::empty();
        flags.set(FeatureFlags::MOSAIC, self.is_mosaic());
        flags.set(FeatureFlags::SIXTEEN_BIT, self.bits_per_pixel() == 16);
        flags
    }
}

/// Texture storage written by the store.
pub trait VolumeBackend {
    /// (Re)creates storage for a plan. Called only when the plan changes.
    fn allocate(&mut self, plan: &StoragePlan) -> Result<()>;

    /// Writes `count` consecutive slices of native 3D data starting at
    /// `first_slice`.
    fn write_slices(&mut self, first_slice: u32, count: u32, data: &[u8]) -> Result<()>;

    /// Writes one tile of RGBA8 texels into a mosaic texture.
    fn write_tile(&mut self, texture: u32, tile_x: u32, tile_y: u32, texels: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct LoadCursor {
    next_slice: u32,
}

/// Owner of a volume's storage, metadata and histogram.
pub struct VolumeStore<B> {
    backend: B,
    caps: DeviceCaps,
    options: StoreOptions,
    info: Option<VolumeInfo>,
    plan: Option<StoragePlan>,
    allocated: Option<StoragePlan>,
    histogram: Histogram,
    cursor: Option<LoadCursor>,
}

impl<B: VolumeBackend> VolumeStore<B> {
    pub fn new(backend: B, caps: DeviceCaps, options: StoreOptions) -> Self {
        Self {
            backend,
            caps,
            options,
            info: None,
            plan: None,
            allocated: None,
            histogram: Histogram::new(options.histogram_bins),
            cursor: None,
        }
    }

    /// Starts a load cycle. Any previous volume is discarded.
    ///
    /// Storage from the previous load is reused when the new plan matches.
    pub fn begin_load(&mut self, header: VolumeHeader) -> Result<()> {
        if self.cursor.is_some() {
            log::warn!("begin_load while a load is in progress, restarting");
        }
        self.cursor = None;
        self.info = None;
        self.plan = None;
        self.histogram.clear();

        let plan = StoragePlan::choose(&header, &self.caps, self.options.storage)?;
        if self.allocated == Some(plan) {
            log::debug!("reusing volume storage for {:?}", header.dims);
        } else {
            log::info!(
                "allocating {} storage for {:?} at {} bpp",
                if plan.is_mosaic() { "mosaic" } else { "3D" },
                header.dims,
                header.bits_per_pixel
            );
            self.allocated = None;
            self.backend.allocate(&plan)?;
            self.allocated = Some(plan);
        }

        self.info = Some(VolumeInfo::new(header));
        self.plan = Some(plan);
        self.cursor = Some(LoadCursor { next_slice: 0 });
        Ok(())
    }

    /// Slices per batch: `imgs_per_tile` for the volume's bit depth.
    pub fn batch_size(&self) -> Option<u32> {
        self.plan.map(|p| mosaic::imgs_per_tile(p.bits_per_pixel()))
    }

    /// Appends the next batch of slices.
    ///
    /// Every batch but the last must hold exactly [`Self::batch_size`] slices.
    pub fn append_slices(&mut self, slices: &[&[u8]]) -> Result<()> {
        let cursor = self.cursor.ok_or(VolumeError::NotLoading)?;
        let (Some(info), Some(plan)) = (self.info.as_ref(), self.plan) else {
            return Err(VolumeError::NotLoading);
        };
        let header = *info.header();
        let batch = mosaic::imgs_per_tile(header.bits_per_pixel);
        let count = slices.len() as u32;
        let depth = header.dims[2];
        let first = cursor.next_slice;

        if count == 0 || count > batch {
            return Err(VolumeError::InvalidBatch(format!(
                "batch of {count} slices, expected {batch}"
            )));
        }
        if first + count > depth {
            return Err(VolumeError::InvalidBatch(format!(
                "slices {first}..{} exceed depth {depth}",
                first + count
            )));
        }
        if count < batch && first + count != depth {
            return Err(VolumeError::InvalidBatch(format!(
                "short batch of {count} slices before the end of the volume"
            )));
        }
        let slice_bytes = header.slice_bytes();
        if let Some(bad) = slices.iter().find(|s| s.len() != slice_bytes) {
            return Err(VolumeError::InvalidBatch(format!(
                "slice of {} bytes, expected {slice_bytes}",
                bad.len()
            )));
        }

        for slice in slices {
            self.histogram
                .add_samples(slice, header.bytes_per_pixel(), header.big_endian);
        }

        match plan {
            StoragePlan::Native3d { .. } => {
                let data = mosaic::native_slab(slices, header.bits_per_pixel, header.big_endian);
                self.backend.write_slices(first, count, &data)?;
            }
            StoragePlan::Mosaic(layout) => {
                let [w, h, _] = header.dims;
                let mut owned: Vec<Vec<u8>> = slices.iter().map(|s| s.to_vec()).collect();
                for slice in &mut owned {
                    mosaic::zero_borders(slice, w, h, header.bytes_per_pixel());
                }
                let refs: Vec<&[u8]> = owned.iter().map(Vec::as_slice).collect();
                let texels =
                    mosaic::interleave_tile(&refs, w, h, header.bits_per_pixel, header.big_endian);
                let addr = layout.address(first);
                self.backend
                    .write_tile(addr.texture, addr.tile_x, addr.tile_y, &texels)?;
            }
        }

        self.cursor = Some(LoadCursor {
            next_slice: first + count,
        });
        Ok(())
    }

    /// Ends the load cycle; the volume becomes readable.
    pub fn end_load(&mut self) -> Result<()> {
        let cursor = self.cursor.take().ok_or(VolumeError::NotLoading)?;
        if let Some(info) = &self.info {
            let depth = info.header().dims[2];
            if cursor.next_slice < depth {
                log::warn!(
                    "load ended after {} of {depth} slices",
                    cursor.next_slice
                );
            } else {
                log::info!("loaded volume {:?}", info.header().dims);
            }
        }
        Ok(())
    }

    /// Abandons a load in progress; the partial volume is discarded.
    pub fn abort_load(&mut self) {
        if self.cursor.take().is_some() {
            log::info!("volume load aborted");
            self.info = None;
            self.plan = None;
            self.histogram.clear();
        }
    }

    pub fn is_loading(&self) -> bool {
        self.cursor.is_some()
    }

    /// Slices appended in the current load cycle.
    pub fn loaded_slices(&self) -> Option<u32> {
        self.cursor.map(|c| c.next_slice)
    }

    /// Metadata of the loaded volume.
    pub fn info(&self) -> Result<&VolumeInfo> {
        if self.cursor.is_some() {
            return Err(VolumeError::LoadInProgress);
        }
        self.info.as_ref().ok_or(VolumeError::NoVolume)
    }

    /// Mutable metadata, for attaching attributes.
    pub fn info_mut(&mut self) -> Option<&mut VolumeInfo> {
        self.info.as_mut()
    }

    /// Storage plan of the loaded volume.
    pub fn plan(&self) -> Result<StoragePlan> {
        if self.cursor.is_some() {
            return Err(VolumeError::LoadInProgress);
        }
        self.plan.ok_or(VolumeError::NoVolume)
    }

    pub fn shape(&self) -> Result<glam::Vec3> {
        self.info().map(VolumeInfo::shape)
    }

    pub fn aspect(&self) -> Result<glam::Vec3> {
        self.info().map(VolumeInfo::aspect)
    }

    pub fn diagonal_size(&self) -> Result<f32> {
        self.info().map(VolumeInfo::diagonal_size)
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Auto window from the histogram's outlier-trimmed range.
    pub fn auto_window_level(&mut self) -> Option<WindowLevel> {
        self.auto_window_level_at(self.options.auto_window_percent)
    }

    /// Auto window discarding `percent` of the samples at each end.
    pub fn auto_window_level_at(&mut self, percent: f32) -> Option<WindowLevel> {
        let (lo, hi) = self.histogram.threshed_min_max(percent)?;
        Some(WindowLevel::from_range(lo as f32, hi as f32))
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingBackend {
        allocations: u32,
        slices: Vec<(u32, u32, Vec<u8>)>,
        tiles: Vec<(u32, u32, u32, Vec<u8>)>,
    }

    impl VolumeBackend for RecordingBackend {
        fn allocate(&mut self, _plan: &StoragePlan) -> Result<()> {
            self.allocations += 1;
            Ok(())
        }

        fn write_slices(&mut self, first_slice: u32, count: u32, data: &[u8]) -> Result<()> {
            self.slices.push((first_slice, count, data.to_vec()));
            Ok(())
        }

        fn write_tile(&mut self, texture: u32, tile_x: u32, tile_y: u32, texels: &[u8]) -> Result<()> {
            self.tiles.push((texture, tile_x, tile_y, texels.to_vec()));
            Ok(())
        }
    }

    fn store(storage: StorageMode) -> VolumeStore<RecordingBackend> {
        VolumeStore::new(
            RecordingBackend::default(),
            DeviceCaps::default(),
            StoreOptions {
                storage,
                ..StoreOptions::default()
            },
        )
    }

    #[test]
    fn test_plan_selection() {
        let header = VolumeHeader::new([512, 512, 300], 16);
        let caps = DeviceCaps::default();
        assert!(!StoragePlan::choose(&header, &caps, StorageMode::Auto)
            .unwrap()
            .is_mosaic());

        let no_3d = DeviceCaps {
            supports_3d: false,
            ..caps
        };
        assert!(StoragePlan::choose(&header, &no_3d, StorageMode::Auto)
            .unwrap()
            .is_mosaic());
        let err = StoragePlan::choose(&header, &no_3d, StorageMode::Native3d).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Capacity);
    }

    #[test]
    fn test_plan_rejects_too_many_textures() {
        let header = VolumeHeader::new([1024, 1024, 100], 16);
        let caps = DeviceCaps {
            max_texture_2d: 2048,
            supports_3d: false,
            ..DeviceCaps::default()
        };
        // 8 slices per 2048^2 texture -> 13 textures
        let err = StoragePlan::choose(&header, &caps, StorageMode::Auto).unwrap_err();
        assert!(matches!(err, VolumeError::Capacity(_)));
    }

    #[test]
    fn test_load_cycle_guards() {
        let mut store = store(StorageMode::Auto);
        let slice = [0u8; 16];
        assert!(matches!(
            store.append_slices(&[&slice]),
            Err(VolumeError::NotLoading)
        ));
        assert!(matches!(store.info(), Err(VolumeError::NoVolume)));

        store.begin_load(VolumeHeader::new([4, 4, 2], 8)).unwrap();
        assert!(matches!(store.info(), Err(VolumeError::LoadInProgress)));
        store.append_slices(&[&slice, &slice]).unwrap();
        store.end_load().unwrap();
        assert!(store.info().is_ok());
        assert!(matches!(store.end_load(), Err(VolumeError::NotLoading)));
    }

    #[test]
    fn test_batch_validation() {
        let mut store = store(StorageMode::Auto);
        store.begin_load(VolumeHeader::new([4, 4, 8], 16)).unwrap();
        assert_eq!(store.batch_size(), Some(2));
        let slice = [0u8; 32];
        // too many
        assert!(store.append_slices(&[&slice, &slice, &slice]).is_err());
        // short batch before the end
        assert!(store.append_slices(&[&slice]).is_err());
        // wrong size
        assert!(store.append_slices(&[&slice[..16], &slice[..16]]).is_err());
        store.append_slices(&[&slice, &slice]).unwrap();
        assert_eq!(store.loaded_slices(), Some(2));
    }

    #[test]
    fn test_bad_header_is_configuration_error() {
        let mut store = store(StorageMode::Auto);
        let err = store.begin_load(VolumeHeader::new([4, 4, 2], 12)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
        assert!(!store.is_loading());
    }

    #[test]
    fn test_storage_reused_for_same_size() {
        let mut store = store(StorageMode::Auto);
        for _ in 0..3 {
            store.begin_load(VolumeHeader::new([4, 4, 2], 8)).unwrap();
            store.end_load().unwrap();
        }
        assert_eq!(store.backend().allocations, 1);
        store.begin_load(VolumeHeader::new([8, 4, 2], 8)).unwrap();
        assert_eq!(store.backend().allocations, 2);
    }

    #[test]
    fn test_mosaic_zeroes_borders_native_does_not() {
        let slice = [7u8; 16];

        let mut native = store(StorageMode::Native3d);
        native.begin_load(VolumeHeader::new([4, 4, 2], 8)).unwrap();
        native.append_slices(&[&slice, &slice]).unwrap();
        let (_, _, data) = &native.backend().slices[0];
        assert!(data.iter().all(|&b| b == 7));

        let mut mosaic = store(StorageMode::Mosaic);
        mosaic.begin_load(VolumeHeader::new([4, 4, 2], 8)).unwrap();
        mosaic.append_slices(&[&slice, &slice]).unwrap();
        let (_, _, _, texels) = &mosaic.backend().tiles[0];
        // first texel is a corner: zeroed
        assert_eq!(&texels[0..4], &[0, 0, 0, 0]);
        // pixel (1, 1) is interior: slices 0 and 1 in channels 0 and 1
        let p = (4 + 1) * 4;
        assert_eq!(&texels[p..p + 4], &[7, 7, 0, 0]);
    }

    #[test]
    fn test_histogram_and_auto_window() {
        let mut store = store(StorageMode::Auto);
        store.begin_load(VolumeHeader::new([64, 1, 2], 8)).unwrap();
        let a: Vec<u8> = (0..64).map(|i| if i % 16 == 0 { 0 } else { 100 }).collect();
        let b: Vec<u8> = (0..64).map(|i| if i < 8 { 200 } else { 150 }).collect();
        store.append_slices(&[&a, &b]).unwrap();
        store.end_load().unwrap();

        assert!(store.histogram().sample_count() > 0);
        let wl = store.auto_window_level_at(0.0).unwrap();
        assert_eq!(wl, WindowLevel::from_range(100.0, 200.0));

        // a new load never sees the old histogram
        store.begin_load(VolumeHeader::new([64, 1, 2], 8)).unwrap();
        assert_eq!(store.histogram().sample_count(), 0);
    }
}

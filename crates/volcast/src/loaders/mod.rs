//! Volume loaders.
//!
//! Format decoders live outside this crate; they implement
//! [`VolumeLoader`](volcast_core::VolumeLoader) and hand over raw slices.

mod mock;
mod raw;

pub use mock::{MockDataLoader, MOCK_SEED};
pub use raw::RawSliceLoader;

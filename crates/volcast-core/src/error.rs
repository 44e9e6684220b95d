//! Error types for volcast.

use thiserror::Error;

/// Broad classification of a [`VolumeError`], forwarded by loaders to their
/// completion callbacks alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad load parameters; retry with different ones.
    Configuration,
    /// The dataset does not fit on the device and must be rejected.
    Capacity,
    /// An operation was called in the wrong load state or with malformed input.
    Usage,
    /// A text description (opacity curve, preset) could not be parsed.
    Parse,
    /// I/O failure.
    Io,
}

/// The main error type for volume operations.
#[derive(Error, Debug)]
pub enum VolumeError {
    /// Unsupported bit depth, zero-sized volume and similar.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The volume would exceed device texture limits.
    #[error("capacity error: {0}")]
    Capacity(String),

    /// Slices were appended while no load was in progress.
    #[error("no load in progress - call begin_load() first")]
    NotLoading,

    /// The volume was read before any load completed.
    #[error("no volume loaded")]
    NoVolume,

    /// The volume was read while a load was in progress.
    #[error("volume is being loaded")]
    LoadInProgress,

    /// A slice batch did not match the volume layout.
    #[error("invalid slice batch: {0}")]
    InvalidBatch(String),

    /// A relief mask column was out of range.
    #[error("invalid relief mask: {0}")]
    InvalidMask(String),

    /// An opacity curve string could not be parsed.
    #[error("opacity curve parse error: {0}")]
    CurveParse(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VolumeError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Capacity(_) => ErrorKind::Capacity,
            Self::NotLoading
            | Self::NoVolume
            | Self::LoadInProgress
            | Self::InvalidBatch(_)
            | Self::InvalidMask(_) => {
                ErrorKind::Usage
            }
            Self::CurveParse(_) | Self::Json(_) => ErrorKind::Parse,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// A specialized Result type for volume operations.
pub type Result<T> = std::result::Result<T, VolumeError>;

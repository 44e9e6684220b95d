//! Error types for volcast.

use thiserror::Error;
use volcast_core::VolumeError;
use volcast_render::RenderError;

/// Errors surfaced by the viewer, loaders and headless helpers.
#[derive(Error, Debug)]
pub enum Error {
    /// Volume loading or configuration error.
    #[error(transparent)]
    Volume(#[from] VolumeError),

    /// GPU rendering error.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Image encoding error.
    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Preset serialization error.
    #[error("preset error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unsupported image format.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Pixel buffer does not match the image size.
    #[error("invalid image data: {0} bytes for {1}x{2}")]
    InvalidImageData(usize, u32, u32),
}

/// Result type alias for volcast operations.
pub type Result<T> = std::result::Result<T, Error>;

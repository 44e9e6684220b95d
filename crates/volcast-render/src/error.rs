//! Rendering error types.

use thiserror::Error;
use volcast_core::VolumeError;

/// Errors that can occur during rendering operations.
#[derive(Error, Debug)]
pub enum RenderError {
    /// No adapter matched the request.
    #[error("failed to create graphics adapter")]
    AdapterCreationFailed,

    /// Failed to create wgpu device.
    #[error("failed to create graphics device: {0}")]
    DeviceCreationFailed(#[from] wgpu::RequestDeviceError),

    /// Shader compilation failed.
    #[error("shader compilation failed: {0}")]
    ShaderCompilationFailed(String),

    /// Pipeline creation failed.
    #[error("pipeline creation failed: {0}")]
    PipelineCreationFailed(String),

    /// Texture creation failed.
    #[error("texture creation failed: {0}")]
    TextureCreationFailed(String),

    /// Mapping a readback buffer failed.
    #[error("readback failed: {0}")]
    ReadbackFailed(String),

    /// Out of memory.
    #[error("out of memory")]
    OutOfMemory,

    /// The frame has no pixels.
    #[error("invalid viewport {0}x{1}")]
    InvalidViewport(u32, u32),

    /// Volume state or data error.
    #[error(transparent)]
    Volume(#[from] VolumeError),
}

impl From<wgpu::Error> for RenderError {
    fn from(err: wgpu::Error) -> Self {
        match err {
            wgpu::Error::OutOfMemory { .. } => Self::OutOfMemory,
            other => Self::PipelineCreationFailed(other.to_string()),
        }
    }
}

/// A specialized Result type for rendering operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

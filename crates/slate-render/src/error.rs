//! Render error types.

use thiserror::Error;

/// Errors from render resource creation and recording.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("GPU error: {0}")]
    Gpu(#[from] slate_gpu::GpuError),

    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    #[error("Shader load failed: {0}")]
    ShaderLoad(String),

    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image load failed: {0}")]
    ImageLoad(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for render operations.
pub type Result<T> = std::result::Result<T, RenderError>;

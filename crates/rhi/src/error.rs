//! Error type for the Vulkan layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RhiError {
    /// A raw Vulkan call returned a failure code.
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// The Vulkan loader library could not be opened.
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// Device selection rejected every enumerated GPU.
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    #[error("Shader error: {0}")]
    ShaderError(String),

    #[error("Surface error: {0}")]
    SurfaceError(String),

    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Swapchain recreation negotiated a different image format than the
    /// render pass was built for.
    #[error("Surface format mismatch: {0}")]
    FormatMismatch(String),

    /// A wrapper was asked to operate on a handle it no longer owns or
    /// an index it does not have.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

pub type RhiResult<T> = std::result::Result<T, RhiError>;

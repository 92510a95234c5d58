//! Error type shared by the crates above the RHI layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan calls made outside the RHI, such as surface creation.
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation and platform handle failures.
    #[error("Window error: {0}")]
    Window(String),
}

pub type Result<T> = std::result::Result<T, Error>;

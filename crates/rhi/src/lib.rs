//! Thin Vulkan layer over `ash`.
//!
//! Wraps the pieces the renderer needs: instance and device setup,
//! the swapchain, command recording, buffers and descriptors, the
//! three-subpass render pass with its framebuffers, pipelines, and
//! fences and semaphores. Handles stay accessible through `handle()`
//! accessors so callers can drop to raw `vk` calls where the wrappers
//! stop.

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod pass_graph;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Callers build create-info structs themselves, so hand them `vk`.
pub use ash::vk;

//! Frame pipeline for the progressive ray tracer.
//!
//! Everything between the windowing layer and the raw Vulkan wrappers
//! lives here: per-frame slots and their synchronization, the
//! three-subpass render pass (trace, accumulate, composite), ping-pong
//! selection of the accumulation targets, and surface recreation on
//! resize and invalidation.

pub mod attachments;
pub mod frame_slots;
pub mod ping_pong;
pub mod renderer;
pub mod sequencer;
pub mod ubo;

pub use renderer::{Renderer, RendererConfig, ThrottlePolicy};

/// Default depth of the frame slot ring.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

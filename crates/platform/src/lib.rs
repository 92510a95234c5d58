//! Windowing and input for the ray-traced renderer.
//!
//! Wraps winit window creation, keyboard state tracking, and the
//! Vulkan surface plumbing (surface creation plus the instance
//! extensions the display backend requires).

mod input;
mod window;

pub use input::{InputState, KeyCode};
pub use window::{Surface, Window, get_required_extensions};

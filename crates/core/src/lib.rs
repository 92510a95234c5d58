//! Shared foundation for the ray-traced renderer: the common error
//! type, logging setup, and frame timing.

mod error;
mod logging;
mod timer;

pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::FrameTimer;

//! Logging setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter, which logs the renderer and
/// RHI crates at debug and everything else at info.
///
/// # Example
/// ```
/// raytracer_core::init_logging();
/// tracing::info!("logging up");
/// ```
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,raytracer_renderer=debug,raytracer_rhi=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

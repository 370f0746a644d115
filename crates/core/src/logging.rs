//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `default_filter` (usually the
/// `log_filter` value from the config file) is used.
///
/// # Example
/// ```
/// viewer_core::init_logging("info");
/// tracing::info!("Viewer starting");
/// ```
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A second call (e.g. from doc tests) must not panic.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}

//! Core utilities shared by the viewer crates.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Configuration loading

mod config;
mod error;
mod logging;
mod timer;

pub use config::{AppSection, AssetPaths, Config, RendererSection, WindowSection};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;

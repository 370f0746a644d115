//! Error types for the application layer.

use thiserror::Error;

/// Application-level error type.
///
/// GPU-side failures carry their own `RhiError`; this type covers the
/// pieces around it (window, config, startup wiring).
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors surfaced outside the RHI crate
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or event loop errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file
    #[error("Config error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias using the application's Error type.
pub type Result<T> = std::result::Result<T, Error>;

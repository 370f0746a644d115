//! Startup errors for the renderer.

use thiserror::Error;

use viewer_resources::ResourceError;
use viewer_rhi::RhiError;

/// Anything that can stop the renderer from being built.
///
/// Once running, frames only fail with [`RhiError`].
#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error("Asset error: {0}")]
    Asset(#[from] ResourceError),

    #[error("Platform error: {0}")]
    Platform(#[from] viewer_core::Error),
}

pub type RendererResult<T> = Result<T, RendererError>;

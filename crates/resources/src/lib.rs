//! Asset loading for the viewer.
//!
//! - Wavefront OBJ models, merged into indexed vertex lists
//! - Images decoded to RGBA8 for texture upload

mod error;
pub mod model;
pub mod texture;

pub use error::{ResourceError, ResourceResult};
pub use model::Model;
pub use texture::TextureData;

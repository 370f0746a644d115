//! Error types for asset loading.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for asset loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// Asset path does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The OBJ parser rejected the file.
    #[error("Failed to load OBJ file '{path}': {source}")]
    ObjLoad {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    /// The OBJ file parsed but contains no triangles.
    #[error("OBJ file '{0}' contains no geometry")]
    EmptyModel(PathBuf),

    /// A face refers to an attribute that does not exist.
    #[error("Malformed mesh '{mesh}': {message}")]
    MalformedMesh { mesh: String, message: String },

    /// The image could not be opened or decoded.
    #[error("Failed to load image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Decoded image has a zero dimension.
    #[error("Image '{0}' is empty")]
    EmptyImage(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for asset operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

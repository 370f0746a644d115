//! Image decoding into tightly packed RGBA8.

use std::path::Path;

use tracing::info;

use crate::error::{ResourceError, ResourceResult};

/// Decoded image, 4 bytes per pixel, rows top to bottom.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Decodes the image at `path`, converting any source format to RGBA8.
    pub fn load(path: &Path) -> ResourceResult<Self> {
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let image = image::open(path).map_err(|source| ResourceError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let rgba = image.into_rgba8();
        let (width, height) = rgba.dimensions();

        if width == 0 || height == 0 {
            return Err(ResourceError::EmptyImage(path.to_path_buf()));
        }

        info!("Loaded texture {:?}: {}x{}", path, width, height);

        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    /// Size of the pixel data in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

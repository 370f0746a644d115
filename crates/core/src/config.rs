//! Viewer configuration loaded from a TOML file.
//!
//! Every field has a default, so a missing file (or a file that only sets a
//! few keys) still yields a usable configuration:
//!
//! ```toml
//! log_filter = "info,viewer_rhi=debug"
//!
//! [window]
//! width = 1280
//! height = 720
//!
//! [renderer]
//! validation = true
//! frame_timeout_ms = 0   # wait forever on frame fences
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::Result;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowSection,
    pub app: AppSection,
    pub assets: AssetPaths,
    pub renderer: RendererSection,
    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub log_filter: String,
}

/// Initial window geometry and title.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowSection {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

/// Names reported to the Vulkan driver.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub engine_name: String,
}

/// Asset locations, relative to the working directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetPaths {
    pub model: PathBuf,
    pub texture: PathBuf,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

/// Renderer tuning knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererSection {
    /// Enable `VK_LAYER_KHRONOS_validation`. Startup fails if it is missing.
    pub validation: bool,
    /// Upper bound on a single frame-fence wait. `0` waits forever.
    pub frame_timeout_ms: u64,
    /// Use the highest sample count the device supports; `false` renders
    /// with one sample.
    pub msaa: bool,
    pub clear_color: [f32; 4],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: WindowSection::default(),
            app: AppSection::default(),
            assets: AssetPaths::default(),
            renderer: RendererSection::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "Vulkan".to_string(),
        }
    }
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "Viking Room".to_string(),
            engine_name: "No Engine".to_string(),
        }
    }
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self {
            model: PathBuf::from("src/mesh/viking_room.obj"),
            texture: PathBuf::from("src/textures/viking_room.png"),
            vertex_shader: PathBuf::from("src/shaders/vert.spv"),
            fragment_shader: PathBuf::from("src/shaders/frag.spv"),
        }
    }
}

impl Default for RendererSection {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            frame_timeout_ms: 10_000,
            msaa: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl RendererSection {
    /// Fence timeout in nanoseconds as expected by `vkWaitForFences`.
    pub fn frame_timeout_ns(&self) -> u64 {
        if self.frame_timeout_ms == 0 {
            u64::MAX
        } else {
            self.frame_timeout_ms.saturating_mul(1_000_000)
        }
    }
}

impl Config {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads the configuration at `path`.
    ///
    /// A missing file yields the defaults; an unreadable or malformed file
    /// is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!("Loaded config from {:?}: {:?}", path, config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::io::Write;

    #[test]
    fn test_defaults_match_viewer_constants() {
        let config = Config::default();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.assets.model, PathBuf::from("src/mesh/viking_room.obj"));
        assert_eq!(config.assets.vertex_shader, PathBuf::from("src/shaders/vert.spv"));
        assert_eq!(config.renderer.frame_timeout_ms, 10_000);
        assert!(config.renderer.msaa);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 1280

            [renderer]
            msaa = false
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "Vulkan");
        assert!(!config.renderer.msaa);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let result = Config::from_toml_str("[window]\nwidth = \"wide\"");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_timeout_means_unbounded() {
        let mut renderer = RendererSection::default();
        assert_eq!(renderer.frame_timeout_ns(), 10_000_000_000);

        renderer.frame_timeout_ms = 0;
        assert_eq!(renderer.frame_timeout_ns(), u64::MAX);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.window.width, 800);
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_filter = \"debug\"\n[assets]\nmodel = \"room.obj\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.assets.model, PathBuf::from("room.obj"));
        assert_eq!(config.assets.texture, PathBuf::from("src/textures/viking_room.png"));
    }
}

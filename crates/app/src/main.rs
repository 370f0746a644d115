//! Model viewer: renders a textured OBJ model spinning in a resizable window.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use viewer_core::{Config, Timer};
use viewer_platform::{EventPump, FramebufferSource};
use viewer_renderer::{FrameOutcome, Renderer};

const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "model-viewer", version, about = "Vulkan model viewer")]
struct Args {
    /// TOML configuration file; missing files fall back to defaults.
    #[arg(short, long, default_value = "viewer.toml")]
    config: PathBuf,

    /// Initial window width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Initial window height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Enable or disable the Khronos validation layer.
    #[arg(long)]
    validation: Option<bool>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(width) = self.width {
            config.window.width = width;
        }
        if let Some(height) = self.height {
            config.window.height = height;
        }
        if let Some(validation) = self.validation {
            config.renderer.validation = validation;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;
    args.apply(&mut config);

    viewer_core::init_logging(&config.log_filter);
    info!("Starting model viewer");
    debug!("{:?}", config);

    let mut pump = EventPump::new(config.window.clone()).context("failed to create event loop")?;
    let window = pump.wait_for_window().context("failed to create window")?;
    let mut renderer = Renderer::new(window, &config).context("failed to initialize renderer")?;

    let context = renderer.context();
    let extent = context.swapchain_extent();
    info!(
        "Initialization complete: {}x{}, {:?} MSAA, validation {}",
        extent.width,
        extent.height,
        context.msaa_samples(),
        if context.has_validation() { "on" } else { "off" }
    );
    run(&mut pump, &mut renderer)?;

    renderer
        .wait_idle()
        .context("failed to wait for the device before shutdown")?;
    info!("Shutting down");

    Ok(())
}

fn run(pump: &mut EventPump, renderer: &mut Renderer) -> Result<()> {
    let mut fps_timer = Timer::new();
    let mut since_report = Duration::ZERO;
    let mut frames_since_report = 0u32;

    loop {
        pump.poll_events();
        if pump.close_requested() {
            return Ok(());
        }

        match renderer.draw_frame(pump).context("failed to draw frame")? {
            FrameOutcome::Presented { .. } => frames_since_report += 1,
            FrameOutcome::SwapchainRecreated => {}
            FrameOutcome::Skipped => return Ok(()),
        }

        since_report += fps_timer.tick();
        if since_report >= FPS_REPORT_INTERVAL {
            info!(
                "{:.1} fps",
                frames_since_report as f64 / since_report.as_secs_f64()
            );
            since_report = Duration::ZERO;
            frames_since_report = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "model-viewer",
            "--config",
            "custom.toml",
            "--width",
            "1024",
            "--validation",
            "false",
        ]);
        assert_eq!(args.config, PathBuf::from("custom.toml"));

        let mut config = Config::default();
        config.renderer.validation = true;
        args.apply(&mut config);

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert!(!config.renderer.validation);
    }

    #[test]
    fn test_default_config_path() {
        let args = Args::parse_from(["model-viewer"]);
        assert_eq!(args.config, PathBuf::from("viewer.toml"));
        assert!(args.width.is_none());
        assert!(args.validation.is_none());
    }

    #[test]
    fn test_args_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}

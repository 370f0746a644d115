//! Platform layer for the viewer.
//!
//! - Window and Vulkan surface creation via winit and ash-window
//! - An on-demand event pump that reports resizes and close requests

mod events;
mod window;

pub use events::{EventPump, FramebufferSource, WindowState};
pub use window::{Surface, Window, required_surface_extensions};

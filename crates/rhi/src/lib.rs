//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Thin RAII wrappers over `ash` for everything the viewer touches:
//! instance and device setup, the swapchain and its per-frame sync objects,
//! command recording, buffers, images and textures, and the fixed graphics
//! pipeline with its render pass and descriptors.
//!
//! Every wrapper that owns a Vulkan handle holds an `Arc<Device>` and
//! destroys the handle in `Drop`, so the device outlives everything created
//! from it.

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;

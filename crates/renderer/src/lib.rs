//! Frame loop for the model viewer.
//!
//! - [`FramePacer`]: per-frame ordering of fence waits, acquire, submit and
//!   present, plus swapchain recreation
//! - [`RenderContext`]: the GPU objects, driven by the pacer through
//!   [`FrameBackend`]
//! - [`Renderer`]: the two together, for the application loop

mod context;
mod error;
mod mesh;
mod pacer;
mod renderer;
mod targets;
mod ubo;

pub use context::RenderContext;
pub use error::{RendererError, RendererResult};
pub use mesh::Mesh;
pub use pacer::{FrameBackend, FrameOutcome, FramePacer};
pub use renderer::Renderer;
pub use targets::RenderTargets;
pub use ubo::UniformBufferObject;

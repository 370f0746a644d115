//! Renderer facade used by the application loop.

use tracing::info;

use viewer_core::Config;
use viewer_platform::{FramebufferSource, Window};
use viewer_rhi::RhiResult;

use crate::context::RenderContext;
use crate::error::RendererResult;
use crate::pacer::{FrameOutcome, FramePacer};

/// Draws the spinning model, one [`Renderer::draw_frame`] per loop iteration.
pub struct Renderer {
    pacer: FramePacer,
    context: RenderContext,
}

impl Renderer {
    pub fn new(window: &Window, config: &Config) -> RendererResult<Self> {
        let context = RenderContext::new(window, config)?;
        let pacer = FramePacer::new(context.frames_in_flight());

        Ok(Self { pacer, context })
    }

    /// Renders and presents one frame, rebuilding the swapchain when the
    /// window asks for it.
    pub fn draw_frame<W: FramebufferSource>(&mut self, window: &mut W) -> RhiResult<FrameOutcome> {
        self.pacer.draw_frame(&mut self.context, window)
    }

    /// Blocks until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> RhiResult<()> {
        info!(
            "Draining device after {} presented frame(s), {} swapchain rebuild(s)",
            self.pacer.frames_presented(),
            self.pacer.recreations()
        );
        self.context.device_wait_idle()
    }

    #[inline]
    pub fn context(&self) -> &RenderContext {
        &self.context
    }
}

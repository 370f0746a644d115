//! Swapchain-sized render targets.
//!
//! Everything here is recreated with the swapchain: the multisampled color
//! image (absent with one sample), the depth image, and one framebuffer per
//! swapchain image.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use viewer_rhi::device::Device;
use viewer_rhi::image::{Image, ImageDesc};
use viewer_rhi::render_pass::{Framebuffer, RenderPass, framebuffer_views};
use viewer_rhi::swapchain::Swapchain;
use viewer_rhi::{RhiError, RhiResult};

/// Attachments and framebuffers for the current swapchain.
///
/// Framebuffers are declared first so they drop before the images they
/// reference.
#[derive(Default)]
pub struct RenderTargets {
    framebuffers: Vec<Framebuffer>,
    color: Option<Image>,
    depth: Option<Image>,
}

impl RenderTargets {
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        swapchain: &Swapchain,
        depth_format: vk::Format,
    ) -> RhiResult<Self> {
        let extent = swapchain.extent();
        let samples = render_pass.samples();

        let color = if render_pass.has_resolve() {
            Some(Image::new(
                device.clone(),
                color_target_desc(swapchain.format(), extent, samples),
            )?)
        } else {
            None
        };
        let depth = Image::new(device.clone(), depth_target_desc(depth_format, extent, samples))?;

        let color_view = color.as_ref().map_or(vk::ImageView::null(), Image::view);
        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&swapchain_view| {
                let views = framebuffer_views(
                    render_pass.has_resolve(),
                    color_view,
                    depth.view(),
                    swapchain_view,
                );
                Framebuffer::new(device.clone(), render_pass, &views, extent)
            })
            .collect::<RhiResult<Vec<_>>>()?;

        debug!(
            "Render targets created: {}x{}, {} framebuffer(s), {:?}",
            extent.width,
            extent.height,
            framebuffers.len(),
            samples
        );

        Ok(Self {
            framebuffers,
            color,
            depth: Some(depth),
        })
    }

    /// Destroys every target. Calling it again is a no-op.
    pub fn teardown(&mut self) {
        if self.framebuffers.is_empty() && self.color.is_none() && self.depth.is_none() {
            return;
        }
        self.framebuffers.clear();
        self.color = None;
        self.depth = None;
        debug!("Render targets destroyed");
    }

    pub fn framebuffer(&self, image_index: u32) -> RhiResult<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .map(Framebuffer::handle)
            .ok_or_else(|| {
                RhiError::InvalidResource(format!(
                    "no framebuffer for swapchain image {} ({} available)",
                    image_index,
                    self.framebuffers.len()
                ))
            })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }
}

fn color_target_desc(
    format: vk::Format,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
) -> ImageDesc {
    ImageDesc {
        name: "msaa color",
        extent,
        mip_levels: 1,
        samples,
        format,
        usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        aspect: vk::ImageAspectFlags::COLOR,
    }
}

fn depth_target_desc(
    format: vk::Format,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
) -> ImageDesc {
    ImageDesc {
        name: "depth",
        extent,
        mip_levels: 1,
        samples,
        format,
        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        aspect: vk::ImageAspectFlags::DEPTH,
    }
}

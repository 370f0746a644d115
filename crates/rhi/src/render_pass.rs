//! Render pass and framebuffers.
//!
//! One subpass drawing into a color attachment and a depth attachment. With
//! multisampling the color attachment is a transient MSAA target that is
//! resolved into the swapchain image; with one sample the swapchain image is
//! the color attachment directly.
//!
//! Attachment order (and therefore framebuffer view order):
//!
//! | index | multisampled          | single-sampled   |
//! |-------|-----------------------|------------------|
//! | 0     | MSAA color            | swapchain image  |
//! | 1     | depth                 | depth            |
//! | 2     | swapchain (resolve)   | -                |

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Vulkan render pass wrapper.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    samples: vk::SampleCountFlags,
}

impl RenderPass {
    /// Creates the render pass for `color_format` (the swapchain format),
    /// `depth_format`, and `samples` per pixel.
    pub fn new(
        device: Arc<Device>,
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> RhiResult<Self> {
        let attachments = attachment_descriptions(color_format, depth_format, samples);
        let resolve = uses_resolve(samples);

        let color_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let resolve_ref = [vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref);
        if resolve {
            subpass = subpass.resolve_attachments(&resolve_ref);
        }

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let subpasses = [subpass];
        let dependencies = [dependency];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        info!(
            "Render pass created: color {:?}, depth {:?}, {:?}{}",
            color_format,
            depth_format,
            samples,
            if resolve { " with resolve" } else { "" }
        );

        Ok(Self {
            device,
            render_pass,
            samples,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Whether the swapchain image is attached as a resolve target.
    #[inline]
    pub fn has_resolve(&self) -> bool {
        uses_resolve(self.samples)
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Render pass destroyed");
    }
}

fn uses_resolve(samples: vk::SampleCountFlags) -> bool {
    samples != vk::SampleCountFlags::TYPE_1
}

fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Vec<vk::AttachmentDescription> {
    let resolve = uses_resolve(samples);

    let color = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(if resolve {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        });

    let depth = vk::AttachmentDescription::default()
        .format(depth_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let mut attachments = vec![color, depth];

    if resolve {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        );
    }

    attachments
}

/// Framebuffer bound to one swapchain image.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// `views` must follow the render pass attachment order.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device
                .handle()
                .create_framebuffer(&create_info, None)
                .map_err(RhiError::FramebufferCreation)?
        };

        Ok(Self {
            device,
            framebuffer,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}

/// Attachment views for one framebuffer, in render pass order.
pub fn framebuffer_views(
    has_resolve: bool,
    color_view: vk::ImageView,
    depth_view: vk::ImageView,
    swapchain_view: vk::ImageView,
) -> Vec<vk::ImageView> {
    if has_resolve {
        vec![color_view, depth_view, swapchain_view]
    } else {
        vec![swapchain_view, depth_view]
    }
}

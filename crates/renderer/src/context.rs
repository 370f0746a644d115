//! Owner of every GPU object the viewer uses.
//!
//! Fields are declared in destruction order: per-frame objects, then
//! resources sized by the swapchain, the swapchain itself, the pipeline
//! objects, the command pool, and finally the device, surface and instance.
//! `Drop` only has to drain the device first.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use viewer_core::{Config, Timer};
use viewer_platform::{Surface, Window, required_surface_extensions};
use viewer_resources::{Model, TextureData};
use viewer_rhi::buffer::{Buffer, BufferUsage};
use viewer_rhi::command::{CommandBuffer, CommandPool};
use viewer_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, scene_bindings, scene_pool_sizes, write_scene_set,
};
use viewer_rhi::device::Device;
use viewer_rhi::image::find_depth_format;
use viewer_rhi::instance::Instance;
use viewer_rhi::physical_device::select_physical_device;
use viewer_rhi::pipeline::{
    ColorBlendAttachment, CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout,
};
use viewer_rhi::render_pass::RenderPass;
use viewer_rhi::shader::{Shader, ShaderStage};
use viewer_rhi::swapchain::{Acquire, Present, Swapchain};
use viewer_rhi::sync::{FrameSync, MAX_FRAMES_IN_FLIGHT};
use viewer_rhi::texture::Texture;
use viewer_rhi::vertex::Vertex;
use viewer_rhi::{RhiError, RhiResult};

use crate::error::RendererResult;
use crate::mesh::Mesh;
use crate::pacer::FrameBackend;
use crate::targets::RenderTargets;
use crate::ubo::UniformBufferObject;

/// Per-slot objects: sync primitives, command buffer, uniform buffer and
/// the descriptor set that points at it.
struct FrameSlot {
    sync: FrameSync,
    command_buffer: CommandBuffer,
    uniform_buffer: Buffer,
    descriptor_set: vk::DescriptorSet,
}

/// Everything needed to draw the textured model into the window.
pub struct RenderContext {
    frames: Vec<FrameSlot>,
    descriptor_pool: DescriptorPool,
    mesh: Mesh,
    texture: Texture,
    targets: RenderTargets,
    swapchain: Swapchain,
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    descriptor_set_layout: DescriptorSetLayout,
    render_pass: RenderPass,
    command_pool: CommandPool,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,

    depth_format: vk::Format,
    msaa_samples: vk::SampleCountFlags,
    clear_color: [f32; 4],
    frame_timeout_ns: u64,
    timer: Timer,
}

impl RenderContext {
    /// Builds the whole Vulkan stack for `window` and uploads the assets
    /// named in `config`.
    pub fn new(window: &Window, config: &Config) -> RendererResult<Self> {
        let model = Model::load_obj(&config.assets.model)?;
        let texture_data = TextureData::load(&config.assets.texture)?;

        let extensions = required_surface_extensions(window.raw_display_handle()?)?;
        let instance = Instance::new(
            &config.app.name,
            &config.app.engine_name,
            config.renderer.validation,
            &extensions,
        )?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical)?;

        let msaa_samples = if config.renderer.msaa {
            device.max_msaa_samples()
        } else {
            vk::SampleCountFlags::TYPE_1
        };

        let swapchain = Swapchain::new(
            instance.handle(),
            device.clone(),
            surface.handle(),
            surface.loader().clone(),
            extent_of(window.framebuffer_size()),
        )?;

        let depth_format = find_depth_format(&device, instance.handle())?;
        let render_pass =
            RenderPass::new(device.clone(), swapchain.format(), depth_format, msaa_samples)?;

        let descriptor_set_layout = DescriptorSetLayout::new(device.clone(), &scene_bindings())?;
        let pipeline_layout =
            PipelineLayout::new(device.clone(), &[descriptor_set_layout.handle()])?;
        let pipeline = create_pipeline(
            &device,
            config,
            &pipeline_layout,
            &render_pass,
            msaa_samples,
        )?;

        let (graphics_family, _) = device.queue_families().resolved()?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;

        let targets = RenderTargets::new(device.clone(), &render_pass, &swapchain, depth_format)?;

        let texture = Texture::from_rgba8(
            device.clone(),
            instance.handle(),
            &command_pool,
            texture_data.width,
            texture_data.height,
            &texture_data.pixels,
        )?;
        let mesh = Mesh::upload(device.clone(), &command_pool, &model)?;

        let descriptor_pool = DescriptorPool::new(
            device.clone(),
            MAX_FRAMES_IN_FLIGHT as u32,
            &scene_pool_sizes(MAX_FRAMES_IN_FLIGHT as u32),
        )?;
        let sets = descriptor_pool.allocate(&descriptor_set_layout, MAX_FRAMES_IN_FLIGHT)?;

        let frames = sets
            .into_iter()
            .map(|descriptor_set| -> RhiResult<FrameSlot> {
                let uniform_buffer = Buffer::new(
                    device.clone(),
                    BufferUsage::Uniform,
                    UniformBufferObject::SIZE as vk::DeviceSize,
                )?;
                write_scene_set(
                    &device,
                    descriptor_set,
                    uniform_buffer.handle(),
                    uniform_buffer.size(),
                    texture.view(),
                    texture.sampler(),
                );

                Ok(FrameSlot {
                    sync: FrameSync::new(device.clone())?,
                    command_buffer: CommandBuffer::new(device.clone(), &command_pool)?,
                    uniform_buffer,
                    descriptor_set,
                })
            })
            .collect::<RhiResult<Vec<_>>>()?;

        info!(
            "Render context ready: {} swapchain image(s), {} frame(s) in flight, {} texture mip level(s)",
            swapchain.image_count(),
            frames.len(),
            texture.mip_levels()
        );

        Ok(Self {
            frames,
            descriptor_pool,
            mesh,
            texture,
            targets,
            swapchain,
            pipeline,
            pipeline_layout,
            descriptor_set_layout,
            render_pass,
            command_pool,
            device,
            surface,
            instance,
            depth_format,
            msaa_samples,
            clear_color: config.renderer.clear_color,
            frame_timeout_ns: config.renderer.frame_timeout_ns(),
            timer: Timer::new(),
        })
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.msaa_samples
    }

    pub fn device_wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    pub fn has_validation(&self) -> bool {
        self.instance.has_validation()
    }

    fn slot(&self, slot: usize) -> RhiResult<&FrameSlot> {
        self.frames.get(slot).ok_or_else(|| {
            RhiError::InvalidResource(format!(
                "frame slot {} out of range ({} slots)",
                slot,
                self.frames.len()
            ))
        })
    }
}

impl FrameBackend for RenderContext {
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
        self.slot(slot)?.sync.in_flight().wait(self.frame_timeout_ns)
    }

    fn acquire_next_image(&mut self, slot: usize) -> RhiResult<Acquire> {
        let semaphore = self.slot(slot)?.sync.image_available();
        self.swapchain.acquire_next_image(semaphore)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> RhiResult<()> {
        self.slot(slot)?.sync.in_flight().reset()
    }

    fn record(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let frame = self.slot(slot)?;
        let extent = self.swapchain.extent();
        let framebuffer = self.targets.framebuffer(image_index)?;

        let ubo = UniformBufferObject::spin(self.timer.elapsed_secs(), extent.width, extent.height);
        frame.uniform_buffer.write_pod(&ubo)?;

        let cmd = &frame.command_buffer;
        cmd.reset()?;
        cmd.begin()?;

        let clear_values = clear_values(self.clear_color);
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass.handle())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        cmd.begin_render_pass(&begin_info);
        cmd.bind_graphics_pipeline(self.pipeline.handle());
        cmd.set_viewport_and_scissor(extent);
        self.mesh.bind(cmd);
        cmd.bind_descriptor_set(self.pipeline_layout.handle(), frame.descriptor_set);
        cmd.draw_indexed(self.mesh.index_count());
        cmd.end_render_pass();

        cmd.end()
    }

    fn submit(&mut self, slot: usize) -> RhiResult<()> {
        let frame = self.slot(slot)?;

        let wait_semaphores = [frame.sync.image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer.handle()];
        let signal_semaphores = [frame.sync.render_finished()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer was recorded by `record`, and the fence
        // was reset by the pacer just before.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], frame.sync.in_flight().handle())
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<Present> {
        let wait = self.slot(slot)?.sync.render_finished();
        self.swapchain
            .present(self.device.present_queue(), image_index, wait)
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        self.targets.teardown();
        self.swapchain.rebuild(extent)?;
        self.targets = RenderTargets::new(
            self.device.clone(),
            &self.render_pass,
            &self.swapchain,
            self.depth_format,
        )?;

        debug!(
            "Swapchain-dependent targets rebuilt for {}x{}",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(())
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle before teardown: {}", e);
        }
        info!("Destroying render context");
    }
}

fn create_pipeline(
    device: &Arc<Device>,
    config: &Config,
    layout: &PipelineLayout,
    render_pass: &RenderPass,
    samples: vk::SampleCountFlags,
) -> RhiResult<Pipeline> {
    let vertex_shader = load_shader(device, &config.assets.vertex_shader, ShaderStage::Vertex)?;
    let fragment_shader =
        load_shader(device, &config.assets.fragment_shader, ShaderStage::Fragment)?;

    let mut builder = GraphicsPipelineBuilder::new()
        .vertex_shader(&vertex_shader)
        .fragment_shader(&fragment_shader)
        .vertex_binding(Vertex::binding_description())
        .vertex_attributes(&Vertex::attribute_descriptions())
        .cull_mode(CullMode::Back)
        .front_face(FrontFace::CounterClockwise)
        .samples(samples)
        .depth_test(true)
        .color_blend(ColorBlendAttachment::alpha_blend());

    if device.sample_shading_enabled() && samples != vk::SampleCountFlags::TYPE_1 {
        builder = builder.sample_shading(1.0);
    }

    builder.build(device.clone(), layout, render_pass)
}

fn load_shader(device: &Arc<Device>, path: &Path, stage: ShaderStage) -> RhiResult<Shader> {
    Shader::from_spirv_file(device.clone(), path, stage)
}

fn extent_of((width, height): (u32, u32)) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

/// Color clear for attachment 0, depth 1.0 / stencil 0 for attachment 1.
fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_values() {
        let values = clear_values([0.1, 0.2, 0.3, 1.0]);

        // SAFETY: reading the union members the values were built with.
        unsafe {
            assert_eq!(values[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn test_extent_of() {
        let extent = extent_of((1280, 720));
        assert_eq!(extent.width, 1280);
        assert_eq!(extent.height, 720);
    }
}

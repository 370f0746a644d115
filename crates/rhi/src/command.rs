//! Command pool and command buffer management.
//!
//! [`CommandBuffer`] is a thin recording wrapper: it does not own its
//! VkCommandBuffer, which is released with the [`CommandPool`]. Uploads and
//! layout transitions at load time go through [`submit_one_time`].

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::{Device, map_device_lost};
use crate::error::{RhiError, RhiResult};

/// Vulkan command pool wrapper.
///
/// Created with `RESET_COMMAND_BUFFER` so each frame slot can re-record its
/// buffer without resetting the whole pool.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        info!(
            "Command pool created for queue family {}",
            queue_family_index
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(buffers)
    }

    fn free(&self, buffers: &[vk::CommandBuffer]) {
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, buffers);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        info!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Recording wrapper around a pool-owned command buffer.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocates one primary command buffer from `pool`.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let buffer = pool
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or(RhiError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY))?;
        Ok(Self { device, buffer })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins recording for a single submission.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    pub fn end(&self) -> RhiResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        Ok(())
    }

    /// Returns the buffer to the initial state for re-recording.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    pub fn begin_render_pass(&self, begin_info: &vk::RenderPassBeginInfo) {
        unsafe {
            self.device.handle().cmd_begin_render_pass(
                self.buffer,
                begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    pub fn end_render_pass(&self) {
        unsafe {
            self.device.handle().cmd_end_render_pass(self.buffer);
        }
    }

    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    pub fn bind_vertex_buffer(&self, binding: u32, buffer: vk::Buffer) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, binding, &[buffer], &[0]);
        }
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, index_type: vk::IndexType) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, 0, index_type);
        }
    }

    pub fn bind_descriptor_set(&self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            );
        }
    }

    /// Sets viewport 0 and scissor 0 to cover `extent`, depth range 0..1.
    pub fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, &[viewport]);
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    pub fn draw_indexed(&self, index_count: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_draw_indexed(self.buffer, index_count, 1, 0, 0, 0);
        }
    }

    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            );
        }
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy::default().size(size);
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, &[region]);
        }
    }

    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                dst_layout,
                regions,
            );
        }
    }

    pub fn blit_image(
        &self,
        image: vk::Image,
        src_layout: vk::ImageLayout,
        dst_layout: vk::ImageLayout,
        region: vk::ImageBlit,
        filter: vk::Filter,
    ) {
        unsafe {
            self.device.handle().cmd_blit_image(
                self.buffer,
                image,
                src_layout,
                image,
                dst_layout,
                &[region],
                filter,
            );
        }
    }
}

/// Records `record` into a temporary command buffer, submits it to the
/// graphics queue, and waits for the queue to drain.
///
/// Only used at load time, so the queue-idle wait is acceptable.
pub fn submit_one_time<F>(device: &Arc<Device>, pool: &CommandPool, record: F) -> RhiResult<()>
where
    F: FnOnce(&CommandBuffer),
{
    let cmd = CommandBuffer::new(device.clone(), pool)?;

    let result = (|| {
        cmd.begin()?;
        record(&cmd);
        cmd.end()?;

        let buffers = [cmd.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);
        unsafe {
            device.submit_graphics(&[submit_info], vk::Fence::null())?;
            device
                .handle()
                .queue_wait_idle(device.graphics_queue())
                .map_err(map_device_lost)?;
        }
        Ok(())
    })();

    pool.free(&[cmd.handle()]);
    debug!("One-time command buffer completed");
    result
}

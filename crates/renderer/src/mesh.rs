//! Device-local vertex and index buffers for the loaded model.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use viewer_resources::Model;
use viewer_rhi::buffer::{Buffer, BufferUsage};
use viewer_rhi::command::{CommandBuffer, CommandPool};
use viewer_rhi::device::Device;
use viewer_rhi::{RhiError, RhiResult};

/// Vertex and `u32` index buffer uploaded through staging.
pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl Mesh {
    pub fn upload(device: Arc<Device>, pool: &CommandPool, model: &Model) -> RhiResult<Self> {
        if model.vertices.is_empty() || model.indices.is_empty() {
            return Err(RhiError::InvalidResource(
                "cannot upload an empty mesh".to_string(),
            ));
        }
        let index_count = u32::try_from(model.indices.len()).map_err(|_| {
            RhiError::InvalidResource(format!("{} indices exceed u32", model.indices.len()))
        })?;

        let vertex_buffer = Buffer::device_local_with_data(
            device.clone(),
            pool,
            BufferUsage::Vertex,
            bytemuck::cast_slice(&model.vertices),
        )?;
        let index_buffer = Buffer::device_local_with_data(
            device,
            pool,
            BufferUsage::Index,
            bytemuck::cast_slice(&model.indices),
        )?;

        info!(
            "Mesh uploaded: {} vertices, {} indices",
            model.vertices.len(),
            index_count
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count,
        })
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Binds the vertex buffer at binding 0 and the index buffer.
    pub fn bind(&self, cmd: &CommandBuffer) {
        cmd.bind_vertex_buffer(0, self.vertex_buffer.handle());
        cmd.bind_index_buffer(self.index_buffer.handle(), vk::IndexType::UINT32);
    }
}

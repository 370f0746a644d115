//! GPU buffer management.
//!
//! Vertex and index data live in device-local memory and are filled through a
//! staging buffer ([`Buffer::device_local_with_data`]). Uniform buffers stay
//! host-visible and persistently mapped so the per-frame transform can be
//! written directly.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::command::{CommandPool, submit_one_time};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Intended use of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    /// Host-visible transfer source.
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::GpuOnly,
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// VkBuffer plus its gpu-allocator allocation.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates an uninitialized buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidResource`] for a zero size, otherwise any creation
    /// or allocation failure.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidResource(format!(
                "{} buffer size must be greater than 0",
                usage.name()
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().and_then(|mut allocator| {
            Ok(allocator.get()?.allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location: usage.memory_location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?)
        });

        // Wrap immediately so every later failure path releases both.
        let mut wrapped = Self {
            device,
            buffer,
            allocation: None,
            size,
            usage,
        };
        let allocation = wrapped.allocation.insert(allocation?);
        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };

        unsafe {
            wrapped
                .device
                .handle()
                .bind_buffer_memory(buffer, memory, offset)?;
        }

        debug!("Created {} buffer: {} bytes", usage.name(), size);
        Ok(wrapped)
    }

    /// Creates a host-visible buffer holding `data`.
    pub fn host_visible_with_data(
        device: Arc<Device>,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Creates a device-local buffer and fills it with `data` through a
    /// temporary staging buffer.
    pub fn device_local_with_data(
        device: Arc<Device>,
        pool: &CommandPool,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self> {
        let staging = Self::host_visible_with_data(device.clone(), BufferUsage::Staging, data)?;
        let buffer = Self::new(device.clone(), usage, data.len() as vk::DeviceSize)?;

        submit_one_time(&device, pool, |cmd| {
            cmd.copy_buffer(staging.handle(), buffer.handle(), buffer.size());
        })?;

        Ok(buffer)
    }

    /// Copies `data` into the mapped memory at `offset`.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidResource`] if the buffer is not host-visible or the
    /// write runs past the end.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidResource(format!(
                "write of {} bytes at {} exceeds {} buffer of {} bytes",
                data.len(),
                offset,
                self.usage.name(),
                self.size
            )));
        }

        let mapped_ptr = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or_else(|| {
                RhiError::InvalidResource(format!("{} buffer is not mapped", self.usage.name()))
            })?;

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Writes one plain-old-data value at offset 0.
    pub fn write_pod<T: bytemuck::Pod>(&self, value: &T) -> RhiResult<()> {
        self.write_data(0, bytemuck::bytes_of(value))
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut guard) => {
                    if let Ok(allocator) = guard.get()
                        && let Err(e) = allocator.free(allocation)
                    {
                        error!("Failed to free {} buffer allocation: {:?}", self.usage.name(), e);
                    }
                }
                Err(e) => error!("Leaking {} buffer allocation: {}", self.usage.name(), e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_buffers_are_device_local_transfer_targets() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index] {
            assert_eq!(usage.memory_location(), MemoryLocation::GpuOnly);
            assert!(usage.to_vk_usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
        }
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
    }

    #[test]
    fn test_uniform_and_staging_are_host_visible() {
        assert_eq!(BufferUsage::Uniform.memory_location(), MemoryLocation::CpuToGpu);
        assert_eq!(BufferUsage::Staging.memory_location(), MemoryLocation::CpuToGpu);
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Index.name(), "index");
        assert_eq!(BufferUsage::Uniform.name(), "uniform");
        assert_eq!(BufferUsage::Staging.name(), "staging");
    }
}

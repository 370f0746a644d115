//! Descriptor set layout, pool, and per-frame set writes.
//!
//! The renderer uses one layout with two bindings:
//!
//! | binding | type                    | stage    |
//! |---------|-------------------------|----------|
//! | 0       | uniform buffer (MVP)    | vertex   |
//! | 1       | combined image sampler  | fragment |
//!
//! and one set per frame-in-flight slot.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Binding of the model-view-projection uniform buffer.
pub const UBO_BINDING: u32 = 0;
/// Binding of the texture sampler.
pub const SAMPLER_BINDING: u32 = 1;

/// Bindings of the renderer's only descriptor set layout.
pub fn scene_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        vk::DescriptorSetLayoutBinding::default()
            .binding(UBO_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX),
        vk::DescriptorSetLayoutBinding::default()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
    ]
}

/// Pool sizes for `set_count` sets of [`scene_bindings`].
pub fn scene_pool_sizes(set_count: u32) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: set_count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: set_count,
        },
    ]
}

/// Vulkan descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(device: Arc<Device>, bindings: &[vk::DescriptorSetLayoutBinding]) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool; sets allocated from it are freed with it.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!("Created descriptor pool for {} set(s)", max_sets);

        Ok(Self { device, pool })
    }

    /// Allocates `count` sets with the same layout.
    pub fn allocate(
        &self,
        layout: &DescriptorSetLayout,
        count: usize,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout.handle(); count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Points `set` at `uniform_buffer` (binding 0) and the texture (binding 1).
pub fn write_scene_set(
    device: &Device,
    set: vk::DescriptorSet,
    uniform_buffer: vk::Buffer,
    uniform_size: vk::DeviceSize,
    texture_view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let buffer_info = [vk::DescriptorBufferInfo {
        buffer: uniform_buffer,
        offset: 0,
        range: uniform_size,
    }];
    let image_info = [vk::DescriptorImageInfo {
        sampler,
        image_view: texture_view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }];

    let writes = [
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(UBO_BINDING)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info),
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(SAMPLER_BINDING)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info),
    ];

    unsafe {
        device.handle().update_descriptor_sets(&writes, &[]);
    }
}

//! Device-local images with a single view.
//!
//! Used for the multisampled color target, the depth buffer, and the sampled
//! texture. Each [`Image`] owns its VkImage, VkImageView, and allocation.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Parameters for [`Image::new`].
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub name: &'static str,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// 2D optimal-tiling image in GPU-only memory.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    desc: ImageDesc,
}

impl Image {
    /// Creates the image, binds memory, and creates a view covering all
    /// mip levels.
    pub fn new(device: Arc<Device>, desc: ImageDesc) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 || desc.mip_levels == 0 {
            return Err(RhiError::InvalidResource(format!(
                "{} image must have a non-zero extent and mip count, got {}x{} with {} level(s)",
                desc.name, desc.extent.width, desc.extent.height, desc.mip_levels
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        let mut wrapped = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: None,
            desc,
        };

        let requirements = unsafe { wrapped.device.handle().get_image_memory_requirements(image) };
        let allocation = wrapped.device.allocator().and_then(|mut allocator| {
            Ok(allocator.get()?.allocate(&AllocationCreateDesc {
                name: desc.name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?)
        })?;
        let allocation = wrapped.allocation.insert(allocation);
        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };

        unsafe {
            wrapped
                .device
                .handle()
                .bind_image_memory(image, memory, offset)?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect)
                    .base_mip_level(0)
                    .level_count(desc.mip_levels)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        wrapped.view = unsafe {
            wrapped
                .device
                .handle()
                .create_image_view(&view_info, None)
                .map_err(RhiError::ImageViewCreation)?
        };

        debug!(
            "Created {} image: {}x{} {:?}, {} mip(s), {:?}",
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.mip_levels,
            desc.samples
        );

        Ok(wrapped)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut guard) => {
                    if let Ok(allocator) = guard.get()
                        && let Err(e) = allocator.free(allocation)
                    {
                        error!("Failed to free {} image allocation: {:?}", self.desc.name, e);
                    }
                }
                Err(e) => error!("Leaking {} image allocation: {}", self.desc.name, e),
            }
        }

        debug!("Destroyed {} image", self.desc.name);
    }
}

/// First depth format usable as an optimal-tiling depth attachment.
pub fn find_depth_format(device: &Device, instance: &ash::Instance) -> RhiResult<vk::Format> {
    device.find_supported_format(
        instance,
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

/// Whether `format` carries a stencil aspect.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Length of the full mip chain for a `width`×`height` image:
/// `floor(log2(max(width, height))) + 1`.
pub fn mip_levels_for(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    largest.ilog2() + 1
}

//! Vulkan logical device and queue management.
//!
//! Creates the VkDevice for the selected GPU, retrieves the graphics and
//! present queues (which may alias), and owns the gpu-allocator instance
//! every buffer and image allocation goes through.

use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{DEVICE_EXTENSIONS, PhysicalDeviceInfo, QueueFamilyIndices};

/// Vulkan logical device wrapper.
///
/// Shared through `Arc` by every resource that must destroy itself against
/// the device. The allocator sits behind a `Mutex`.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    allocator: Mutex<Option<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    properties: vk::PhysicalDeviceProperties,
    enabled_features: vk::PhysicalDeviceFeatures,
    max_msaa_samples: vk::SampleCountFlags,
}

impl Device {
    /// Creates the logical device.
    ///
    /// Enables the swapchain extension, sampler anisotropy, and sample-rate
    /// shading when the device offers it.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator initialization fails.
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let (graphics_family, present_family) = physical.queue_families.resolved()?;

        let unique_families = physical.queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let enabled_features = required_features(&physical.features);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&enabled_features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s), sample shading {}",
            DEVICE_EXTENSIONS.len(),
            if enabled_features.sample_rate_shading == vk::TRUE {
                "on"
            } else {
                "off"
            }
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved: graphics family {}, present family {}",
            graphics_family, present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: physical.device,
            allocator: Mutex::new(Some(allocator)),
            graphics_queue,
            present_queue,
            queue_families: physical.queue_families,
            properties: physical.properties,
            enabled_features,
            max_msaa_samples: physical.max_msaa_samples,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    #[inline]
    pub fn max_msaa_samples(&self) -> vk::SampleCountFlags {
        self.max_msaa_samples
    }

    /// Whether `sampleRateShading` was enabled at device creation.
    #[inline]
    pub fn sample_shading_enabled(&self) -> bool {
        self.enabled_features.sample_rate_shading == vk::TRUE
    }

    /// Locks the GPU memory allocator.
    ///
    /// # Errors
    ///
    /// [`RhiError::AllocatorPoisoned`] if a previous holder panicked.
    pub fn allocator(&self) -> RhiResult<AllocatorGuard<'_>> {
        let guard = self
            .allocator
            .lock()
            .map_err(|_| RhiError::AllocatorPoisoned)?;
        Ok(AllocatorGuard { guard })
    }

    /// Blocks until all queues on the device are idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle().map_err(map_device_lost)? };
        Ok(())
    }

    /// Format properties of `format` on this device.
    pub fn format_properties(
        &self,
        instance: &ash::Instance,
        format: vk::Format,
    ) -> vk::FormatProperties {
        unsafe { instance.get_physical_device_format_properties(self.physical_device, format) }
    }

    /// Returns the first of `candidates` supporting `features` for `tiling`.
    ///
    /// # Errors
    ///
    /// [`RhiError::UnsupportedFormat`] if none qualifies.
    pub fn find_supported_format(
        &self,
        instance: &ash::Instance,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> RhiResult<vk::Format> {
        pick_supported_format(candidates, tiling, features, |format| {
            self.format_properties(instance, format)
        })
    }

    /// Submits work to the graphics queue.
    ///
    /// # Safety
    ///
    /// Command buffers in `submit_infos` must be fully recorded, and `fence`
    /// (if not null) must be unsignaled and not in use by another submission.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)
                .map_err(map_device_lost)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
        }

        // The allocator must release its memory blocks before the device goes.
        match self.allocator.get_mut() {
            Ok(allocator) => drop(allocator.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }

        unsafe { self.device.destroy_device(None) };
        info!("Logical device destroyed");
    }
}

/// Locked access to the device's allocator.
pub struct AllocatorGuard<'a> {
    guard: MutexGuard<'a, Option<Allocator>>,
}

impl AllocatorGuard<'_> {
    /// The allocator, or [`RhiError::InvalidResource`] during device teardown.
    pub fn get(&mut self) -> RhiResult<&mut Allocator> {
        self.guard
            .as_mut()
            .ok_or_else(|| RhiError::InvalidResource("allocator already released".into()))
    }
}

/// Maps a device-lost result to its dedicated error; everything else stays
/// a generic Vulkan error.
pub(crate) fn map_device_lost(result: vk::Result) -> RhiError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
        other => RhiError::Vulkan(other),
    }
}

fn required_features(supported: &vk::PhysicalDeviceFeatures) -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(true)
        .sample_rate_shading(supported.sample_rate_shading == vk::TRUE)
}

fn pick_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties_of: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> RhiResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties_of(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| {
            RhiError::UnsupportedFormat(format!(
                "none of {:?} supports {:?} with {:?} tiling",
                candidates, features, tiling
            ))
        })
}

unsafe impl Send for Device {}
unsafe impl Sync for Device {}

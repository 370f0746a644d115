//! Physical device (GPU) selection.
//!
//! Selection is first-fit: devices are checked in enumeration order and the
//! first one that satisfies every requirement wins. There is no scoring.
//!
//! A device is suitable when it has
//! 1. a graphics queue family,
//! 2. a queue family that can present to the surface (possibly the same one),
//! 3. every extension in [`DEVICE_EXTENSIONS`],
//! 4. at least one surface format and one present mode,
//! 5. sampler anisotropy.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Device extensions the renderer cannot run without.
pub const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Queue family indices for graphics and presentation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both a graphics and a present family were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);

        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }

        families
    }

    /// Graphics and present families, for use after [`is_complete`](Self::is_complete)
    /// has been checked.
    pub fn resolved(&self) -> RhiResult<(u32, u32)> {
        match (self.graphics_family, self.present_family) {
            (Some(graphics), Some(present)) => Ok((graphics, present)),
            _ => Err(RhiError::NoSuitableDevice),
        }
    }
}

/// The physical device chosen at startup, with everything later stages
/// need to know about it.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: QueueFamilyIndices,
    /// Highest sample count usable for both color and depth attachments.
    pub max_msaa_samples: vk::SampleCountFlags,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Maximum sampler anisotropy supported by the device.
    #[inline]
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.properties.limits.max_sampler_anisotropy
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .field("max_msaa_samples", &self.max_msaa_samples)
            .finish()
    }
}

/// Selects the first physical device suitable for rendering to `surface`.
///
/// # Errors
///
/// - [`RhiError::NoDevicesPresent`] if no Vulkan devices are enumerated
/// - [`RhiError::NoSuitableDevice`] if none meets the requirements
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let device = first_suitable(&devices, |&device| {
        is_device_suitable(instance, device, surface, surface_loader)
    })?;

    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let queue_families = find_queue_families(instance, device, surface, surface_loader);

    let selected = PhysicalDeviceInfo {
        device,
        properties,
        features,
        queue_families,
        max_msaa_samples: max_usable_sample_count(&properties.limits),
    };

    info!(
        "Selected GPU: '{}' ({}), max MSAA {:?}",
        selected.device_name(),
        selected.device_type_name(),
        selected.max_msaa_samples
    );

    Ok(selected)
}

/// Returns the first candidate accepted by `is_suitable`.
///
/// Distinguishes "nothing enumerated" from "nothing suitable".
pub fn first_suitable<T: Copy>(
    candidates: &[T],
    mut is_suitable: impl FnMut(&T) -> bool,
) -> RhiResult<T> {
    if candidates.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoDevicesPresent);
    }

    candidates
        .iter()
        .find(|candidate| is_suitable(candidate))
        .copied()
        .ok_or_else(|| {
            warn!("None of {} GPU(s) meets the requirements", candidates.len());
            RhiError::NoSuitableDevice
        })
}

fn is_device_suitable(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> bool {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: missing graphics or present queue", name);
        return false;
    }

    if !check_device_extension_support(instance, device) {
        debug!("GPU '{}' skipped: missing required extensions", name);
        return false;
    }

    // Only meaningful once the swapchain extension is known to exist.
    let swapchain_adequate = SwapchainSupportDetails::query(device, surface, surface_loader)
        .map(|support| support.is_adequate())
        .unwrap_or(false);
    if !swapchain_adequate {
        debug!("GPU '{}' skipped: no surface formats or present modes", name);
        return false;
    }

    let features = unsafe { instance.get_physical_device_features(device) };
    if features.sampler_anisotropy == vk::FALSE {
        debug!("GPU '{}' skipped: sampler anisotropy not supported", name);
        return false;
    }

    true
}

fn check_device_extension_support(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let available = match unsafe { instance.enumerate_device_extension_properties(device) } {
        Ok(available) => available,
        Err(e) => {
            warn!("Failed to enumerate device extensions: {}", e);
            return false;
        }
    };

    let available_names: Vec<&CStr> = available
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .collect();

    missing_extensions(&available_names).is_empty()
}

/// Required extensions absent from `available`.
fn missing_extensions(available: &[&CStr]) -> Vec<&'static CStr> {
    DEVICE_EXTENSIONS
        .iter()
        .copied()
        .filter(|required| !available.contains(required))
        .collect()
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        if family.queue_count == 0 {
            continue;
        }

        if indices.graphics_family.is_none()
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics_family = Some(i);
        }

        if indices.present_family.is_none() {
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, i, surface)
                    .unwrap_or(false)
            };
            if present_support {
                indices.present_family = Some(i);
            }
        }

        if indices.is_complete() {
            break;
        }
    }

    indices
}

/// Highest sample count present in both the color and depth framebuffer
/// sample masks.
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts =
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;

    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
        assert!(matches!(indices.resolved(), Err(RhiError::NoSuitableDevice)));
    }

    #[test]
    fn test_queue_family_indices_incomplete() {
        let graphics_only = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!graphics_only.is_complete());

        let present_only = QueueFamilyIndices {
            graphics_family: None,
            present_family: Some(0),
        };
        assert!(!present_only.is_complete());
    }

    #[test]
    fn test_unique_families_shared() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert!(indices.is_complete());
        assert_eq!(indices.unique_families(), vec![0]);
        assert_eq!(indices.resolved().unwrap(), (0, 0));
    }

    #[test]
    fn test_unique_families_distinct() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(2),
            present_family: Some(1),
        };
        assert_eq!(indices.unique_families(), vec![2, 1]);
    }

    #[test]
    fn test_first_suitable_picks_first_match_not_best() {
        // The third candidate would "score" higher, but first-fit stops early.
        let candidates = [1u32, 4, 8];
        let chosen = first_suitable(&candidates, |&c| c >= 4).unwrap();
        assert_eq!(chosen, 4);
    }

    #[test]
    fn test_first_suitable_no_devices() {
        let candidates: [u32; 0] = [];
        assert!(matches!(
            first_suitable(&candidates, |_| true),
            Err(RhiError::NoDevicesPresent)
        ));
    }

    #[test]
    fn test_first_suitable_none_qualify() {
        let candidates = [1u32, 2, 3];
        assert!(matches!(
            first_suitable(&candidates, |_| false),
            Err(RhiError::NoSuitableDevice)
        ));
    }

    #[test]
    fn test_missing_extensions() {
        assert_eq!(missing_extensions(&[]), vec![ash::khr::swapchain::NAME]);
        assert!(missing_extensions(&[c"VK_KHR_maintenance1", ash::khr::swapchain::NAME]).is_empty());
    }

    #[test]
    fn test_max_usable_sample_count_uses_common_bits() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn test_max_usable_sample_count_single_sample() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_1);
    }
}

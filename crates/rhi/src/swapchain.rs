//! Swapchain management.
//!
//! A [`Swapchain`] owns the presentable images and one view per image. It is
//! never patched in place: [`Swapchain::rebuild`] tears everything down and
//! runs the same creation path again. Framebuffers and the color/depth
//! targets that depend on the extent live with the renderer and are rebuilt
//! alongside.
//!
//! Acquire and present report staleness through [`Acquire`] and [`Present`]
//! rather than as errors, since resizing is routine.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::physical_device::QueueFamilyIndices;

/// Surface capabilities, formats, and present modes for one GPU.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries what `surface` supports on `physical_device`.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count {}..{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// An image was acquired. `suboptimal` images are still rendered.
    Image { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be rebuilt.
    OutOfDate,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl Present {
    /// The swapchain should be rebuilt after this present.
    #[inline]
    pub fn is_stale(self) -> bool {
        !matches!(self, Present::Optimal)
    }
}

/// Vulkan swapchain wrapper.
pub struct Swapchain {
    device: Arc<Device>,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Builds a swapchain for `surface`.
    ///
    /// `extent_hint` is the window's framebuffer size in pixels; it only
    /// matters when the surface leaves the extent up to the application.
    ///
    /// # Errors
    ///
    /// - [`RhiError::SwapchainCreation`] if the swapchain or its image list
    ///   cannot be created
    /// - [`RhiError::ImageViewCreation`] if an image view fails
    pub fn new(
        instance: &ash::Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        extent_hint: vk::Extent2D,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, device.handle());

        let mut swapchain = Self {
            device,
            surface,
            surface_loader,
            swapchain_loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
        };
        swapchain.build(extent_hint)?;
        Ok(swapchain)
    }

    fn build(&mut self, extent_hint: vk::Extent2D) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )
        .map_err(|e| match e {
            RhiError::Vulkan(result) => RhiError::SwapchainCreation(result),
            other => other,
        })?;

        let surface_format = choose_surface_format(&support.formats)
            .ok_or(RhiError::SwapchainCreation(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, extent_hint.width, extent_hint.height);
        let image_count = determine_image_count(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} image(s)",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        let (sharing_mode, family_indices) = sharing_mode_for(self.device.queue_families());

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        self.swapchain = unsafe {
            self.swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(RhiError::SwapchainCreation)?
        };
        self.format = surface_format.format;
        self.extent = extent;
        self.present_mode = present_mode;

        self.images = unsafe {
            self.swapchain_loader
                .get_swapchain_images(self.swapchain)
                .map_err(RhiError::SwapchainCreation)?
        };

        for &image in &self.images {
            let view = create_color_view(&self.device, image, self.format)?;
            self.image_views.push(view);
        }

        debug!(
            "Swapchain ready with {} image(s) and view(s)",
            self.images.len()
        );
        Ok(())
    }

    /// Destroys the image views and the swapchain.
    ///
    /// Safe to call repeatedly; a torn-down swapchain holds no handles.
    /// The caller must ensure no submitted work still references the images.
    pub fn teardown(&mut self) {
        let device = self.device.handle();
        let loader = &self.swapchain_loader;
        let released = release_handles(
            &mut self.swapchain,
            &mut self.images,
            &mut self.image_views,
            |view| unsafe { device.destroy_image_view(view, None) },
            |swapchain| unsafe { loader.destroy_swapchain(swapchain, None) },
        );

        if released {
            debug!(
                "Swapchain torn down (was {}x{})",
                self.extent.width, self.extent.height
            );
        }
    }

    /// Fully tears down and rebuilds the swapchain for a new extent.
    ///
    /// The device must be idle.
    pub fn rebuild(&mut self, extent_hint: vk::Extent2D) -> RhiResult<()> {
        self.teardown();
        self.build(extent_hint)?;
        info!(
            "Swapchain rebuilt at {}x{}",
            self.extent.width, self.extent.height
        );
        Ok(())
    }

    /// Acquires the next presentable image, signaling `semaphore` when it is
    /// ready to be rendered to.
    ///
    /// # Errors
    ///
    /// [`RhiError::SwapchainAcquire`] for anything other than success,
    /// suboptimal, or out-of-date.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<Acquire> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        classify_acquire(result)
    }

    /// Queues `image_index` for presentation once `wait_semaphore` signals.
    ///
    /// # Errors
    ///
    /// [`RhiError::SwapchainPresent`] for anything other than success,
    /// suboptimal, or out-of-date.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<Present> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };
        classify_present(result)
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.teardown();
        info!("Swapchain destroyed");
    }
}

/// Hands every live view and the swapchain to the destroy callbacks, then
/// nulls the handles. Returns whether a swapchain was released.
fn release_handles(
    swapchain: &mut vk::SwapchainKHR,
    images: &mut Vec<vk::Image>,
    image_views: &mut Vec<vk::ImageView>,
    mut destroy_view: impl FnMut(vk::ImageView),
    destroy_swapchain: impl FnOnce(vk::SwapchainKHR),
) -> bool {
    for view in image_views.drain(..) {
        destroy_view(view);
    }
    images.clear();

    if *swapchain == vk::SwapchainKHR::null() {
        return false;
    }
    destroy_swapchain(std::mem::replace(swapchain, vk::SwapchainKHR::null()));
    true
}

fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RhiResult<Acquire> {
    match result {
        Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(RhiError::DeviceLost),
        Err(e) => Err(RhiError::SwapchainAcquire(e)),
    }
}

fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<Present> {
    match result {
        Ok(false) => Ok(Present::Optimal),
        Ok(true) => Ok(Present::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::OutOfDate),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(RhiError::DeviceLost),
        Err(e) => Err(RhiError::SwapchainPresent(e)),
    }
}

/// Picks B8G8R8A8_SRGB / SRGB_NONLINEAR wherever it appears in the list,
/// else the first format the driver reported.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    match preferred {
        Some(&format) => Some(format),
        None => {
            let first = formats.first().copied();
            if let Some(format) = first {
                warn!(
                    "Preferred surface format unavailable, using {:?}/{:?}",
                    format.format, format.color_space
                );
            }
            first
        }
    }
}

/// MAILBOX when available, otherwise FIFO (always supported).
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or the framebuffer size clamped to the
/// surface limits when the current extent is the `u32::MAX` sentinel.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// `min_image_count + 1`, capped by `max_image_count` unless that is 0
/// (no limit).
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// CONCURRENT across both families when they differ, EXCLUSIVE otherwise.
///
/// The index list is empty in the exclusive case.
pub fn sharing_mode_for(families: &QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    match (families.graphics_family, families.present_family) {
        (Some(graphics), Some(present)) if graphics != present => {
            (vk::SharingMode::CONCURRENT, vec![graphics, present])
        }
        _ => (vk::SharingMode::EXCLUSIVE, Vec::new()),
    }
}

fn create_color_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    unsafe {
        device
            .handle()
            .create_image_view(&create_info, None)
            .map_err(RhiError::ImageViewCreation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn preferred() -> vk::SurfaceFormatKHR {
        format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)
    }

    #[test]
    fn test_choose_surface_format_finds_preferred_at_any_position() {
        let others = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];

        for position in 0..=others.len() {
            let mut formats = others.to_vec();
            formats.insert(position, preferred());
            assert_eq!(choose_surface_format(&formats), Some(preferred()));
        }
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        // BGRA8 UNORM is not a second preference; the first entry wins.
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
    }

    #[test]
    fn test_choose_surface_format_requires_matching_color_space() {
        let formats = [
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
    }

    #[test]
    fn test_choose_surface_format_empty() {
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn test_choose_present_mode_prefers_mailbox() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_choose_present_mode_falls_back_to_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_reported_extent_over_window() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_window_size_for_sentinel() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!((extent.width, extent.height), (2000, 100));

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_image_count_unbounded_max() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);
    }

    #[test]
    fn test_image_count_clamped_to_max() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);
    }

    #[test]
    fn test_sharing_mode_for_shared_family() {
        let families = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        let (mode, indices) = sharing_mode_for(&families);
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());
    }

    #[test]
    fn test_sharing_mode_for_distinct_families() {
        let families = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        let (mode, indices) = sharing_mode_for(&families);
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_classify_acquire() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            Acquire::Image {
                index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Ok((0, true))).unwrap(),
            Acquire::Image {
                index: 0,
                suboptimal: true
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            Acquire::OutOfDate
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(RhiError::SwapchainAcquire(vk::Result::ERROR_SURFACE_LOST_KHR))
        ));
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(RhiError::DeviceLost)
        ));
    }

    #[test]
    fn test_classify_present() {
        assert_eq!(classify_present(Ok(false)).unwrap(), Present::Optimal);
        assert_eq!(classify_present(Ok(true)).unwrap(), Present::Suboptimal);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            Present::OutOfDate
        );
        assert!(matches!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY)),
            Err(RhiError::SwapchainPresent(_))
        ));
        assert!(!Present::Optimal.is_stale());
        assert!(Present::Suboptimal.is_stale());
        assert!(Present::OutOfDate.is_stale());
    }

    #[test]
    fn test_teardown_releases_handles_once() {
        use ash::vk::Handle;

        let mut swapchain = vk::SwapchainKHR::from_raw(0x10);
        let mut images = vec![vk::Image::from_raw(0x20), vk::Image::from_raw(0x21)];
        let mut views = vec![
            vk::ImageView::from_raw(0x30),
            vk::ImageView::from_raw(0x31),
        ];
        let mut destroyed_views = Vec::new();
        let mut destroyed_swapchains = Vec::new();

        for _ in 0..3 {
            release_handles(
                &mut swapchain,
                &mut images,
                &mut views,
                |view| destroyed_views.push(view),
                |handle| destroyed_swapchains.push(handle),
            );
        }

        assert_eq!(
            destroyed_views,
            vec![
                vk::ImageView::from_raw(0x30),
                vk::ImageView::from_raw(0x31)
            ]
        );
        assert_eq!(destroyed_swapchains, vec![vk::SwapchainKHR::from_raw(0x10)]);
        assert_eq!(swapchain, vk::SwapchainKHR::null());
        assert!(images.is_empty());
        assert!(views.is_empty());
    }

    #[test]
    fn test_teardown_of_empty_swapchain_is_noop() {
        let mut swapchain = vk::SwapchainKHR::null();
        let mut calls = 0;

        let released = release_handles(
            &mut swapchain,
            &mut Vec::new(),
            &mut Vec::new(),
            |_| calls += 1,
            |_| panic!("null swapchain destroyed"),
        );

        assert!(!released);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_support_details_adequacy() {
        let adequate = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_modes = SwapchainSupportDetails {
            present_modes: vec![],
            ..adequate.clone()
        };
        assert!(!no_modes.is_adequate());

        let no_formats = SwapchainSupportDetails {
            formats: vec![],
            ..adequate
        };
        assert!(!no_formats.is_adequate());
    }
}

//! Window and Vulkan surface creation.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use viewer_core::{Error, Result, WindowSection};

/// RAII wrapper for a Vulkan surface.
///
/// The instance the surface was created from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for the `VK_KHR_surface` queries (capabilities, formats,
    /// present modes).
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle came from ash_window::create_surface on the same
        // instance as the loader, and nothing else destroys it.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}

/// A resizable winit window.
pub struct Window {
    window: Arc<WinitWindow>,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, section: &WindowSection) -> Result<Self> {
        let window = event_loop
            .create_window(window_attributes(section))
            .map_err(|e| Error::Window(e.to_string()))?;

        info!(
            "Window created: {}x{} \"{}\"",
            section.width, section.height, section.title
        );

        Ok(Self {
            window: Arc::new(window),
        })
    }

    /// Current drawable size in physical pixels. Either component is zero
    /// while the window is minimized.
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    pub fn raw_display_handle(&self) -> Result<RawDisplayHandle> {
        self.window
            .display_handle()
            .map(|handle| handle.as_raw())
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))
    }

    /// Creates a Vulkan surface for this window.
    ///
    /// The returned [`Surface`] must be dropped before `instance` and before
    /// this window.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;
        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: entry and instance are live, and both raw handles come from
        // the winit window owned by self.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Vulkan(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

fn window_attributes(section: &WindowSection) -> WindowAttributes {
    WindowAttributes::default()
        .with_title(section.title.clone())
        .with_inner_size(PhysicalSize::new(section.width, section.height))
        .with_resizable(true)
}

/// Instance extensions needed to create a surface on `display`.
///
/// The pointers reference static strings owned by `ash-window`.
pub fn required_surface_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| Error::Vulkan(format!("Failed to enumerate surface extensions: {}", e)))?;

    debug!(
        "Surface extensions: {:?}",
        extensions
            .iter()
            // SAFETY: ash_window returns pointers to static NUL-terminated names.
            .map(|&ext| unsafe { CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}

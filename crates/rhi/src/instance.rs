//! Vulkan instance management.
//!
//! Creates the VkInstance with the window system's surface extensions and,
//! when requested, the Khronos validation layer plus a debug messenger that
//! forwards validation output to `tracing`.

use std::ffi::{CStr, CString, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with optional validation support.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Arguments
    ///
    /// * `app_name` / `engine_name` - Reported in `VkApplicationInfo`
    /// * `enable_validation` - Enable the validation layer and debug messenger
    /// * `surface_extensions` - Instance extensions the window system needs
    ///
    /// # Errors
    ///
    /// - [`RhiError::Loading`] if the Vulkan loader cannot be found
    /// - [`RhiError::MissingValidationLayer`] if validation is requested but
    ///   the layer is not installed
    /// - [`RhiError::Vulkan`] if instance or messenger creation fails
    pub fn new(
        app_name: &str,
        engine_name: &str,
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        if enable_validation && !Self::is_validation_layer_available(&entry)? {
            return Err(RhiError::MissingValidationLayer(
                VALIDATION_LAYER_NAME.to_string_lossy().into_owned(),
            ));
        }

        let app_name = CString::new(app_name).unwrap_or_else(|_| c"Viewer".to_owned());
        let engine_name = CString::new(engine_name).unwrap_or_else(|_| c"No Engine".to_owned());

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions = surface_extensions.to_vec();
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if enable_validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        // Chained into instance creation so vkCreateInstance/vkDestroyInstance
        // themselves are covered by validation.
        let mut messenger_info = debug_messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        if enable_validation {
            create_info = create_info.push_next(&mut messenger_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created ({} extension(s), validation {})",
            extensions.len(),
            if enable_validation { "on" } else { "off" }
        );

        let (debug_utils, debug_messenger) = if enable_validation {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe {
                debug_utils.create_debug_utils_messenger(&debug_messenger_create_info(), None)
            };
            match messenger {
                Ok(messenger) => {
                    debug!("Debug messenger created");
                    (Some(debug_utils), Some(messenger))
                }
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether the debug messenger is active.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        let found = available_layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        });

        if !found {
            warn!(
                "{} not found among {} instance layer(s)",
                VALIDATION_LAYER_NAME.to_string_lossy(),
                available_layers.len()
            );
        }

        Ok(found)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

/// Routes validation layer messages to `tracing` by severity.
///
/// # Safety
///
/// Called by the Vulkan loader; `p_callback_data` is either null or valid
/// for the duration of the call.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "general",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(target: "vulkan", "[{}] {}", kind, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(target: "vulkan", "[{}] {}", kind, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!(target: "vulkan", "[{}] {}", kind, message),
        _ => debug!(target: "vulkan", "[{}] {}", kind, message),
    }

    vk::FALSE
}

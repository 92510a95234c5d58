//! Vulkan instance creation and validation plumbing.
//!
//! [`Instance`] owns the `ash` entry point, the `VkInstance`, and, when
//! validation is on, a debug messenger that routes layer output into
//! `tracing`. Surface extensions are supplied by the platform layer, so
//! this module carries no per-OS knowledge.

use std::borrow::Cow;
use std::ffi::{CStr, c_char, c_void};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::RhiError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Debug messenger state, present only while validation is active.
struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

/// Owning wrapper around the Vulkan instance.
///
/// Dropping the wrapper destroys the messenger and then the instance, so
/// every object created from the instance must be gone first.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
}

impl Instance {
    /// Creates the Vulkan instance.
    ///
    /// `surface_extensions` is the window system's extension list, queried
    /// through `ash_window` by the platform crate. Validation is requested
    /// with `enable_validation` but silently downgraded when the Khronos
    /// layer is not installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the Vulkan loader is missing, an extension in
    /// the list is unsupported, or instance creation fails.
    pub fn new(
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> Result<Self, RhiError> {
        let entry = unsafe { Entry::load()? };

        let with_validation = enable_validation && validation_layer_present(&entry)?;
        if enable_validation && !with_validation {
            warn!("Khronos validation layer requested but not installed");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"Vulkan Ray Tracer")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"raytracer")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = surface_extensions.to_vec();
        if with_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        let layers: Vec<*const c_char> = if with_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan 1.3 instance created ({} extensions, validation {})",
            extensions.len(),
            if with_validation { "on" } else { "off" },
        );

        let debug = if with_validation {
            Some(create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug,
        })
    }

    /// The raw `ash` instance.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// The Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Whether a debug messenger is installed.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(messenger) = self.debug.take() {
                messenger
                    .loader
                    .destroy_debug_utils_messenger(messenger.handle, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("Vulkan instance destroyed");
    }
}

fn validation_layer_present(entry: &Entry) -> Result<bool, RhiError> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER
    }))
}

fn create_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<DebugMessenger, RhiError> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                | vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
        )
        .pfn_user_callback(Some(layer_callback));

    let handle = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };
    debug!("Validation messenger installed");

    Ok(DebugMessenger { loader, handle })
}

/// Receives validation layer output and forwards it to `tracing`.
///
/// # Safety
///
/// Invoked by the loader under the pointer contract of
/// `VK_EXT_debug_utils`; the payload is only read after a null check.
unsafe extern "system" fn layer_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    p_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let Some(data) = (unsafe { p_data.as_ref() }) else {
        return vk::FALSE;
    };

    let message = if data.p_message.is_null() {
        Cow::Borrowed("<empty>")
    } else {
        unsafe { CStr::from_ptr(data.p_message) }.to_string_lossy()
    };

    let kind = match kind {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "general",
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "[{kind}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "[{kind}] {message}");
    } else {
        info!(target: "vulkan", "[{kind}] {message}");
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_without_validation() {
        // Runs fully only where a Vulkan loader is installed.
        match Instance::new(false, &[]) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(RhiError::LoadingError(_)) => {
                eprintln!("skipping: no Vulkan loader on this machine");
            }
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    #[test]
    fn validation_layer_name_is_khronos() {
        assert_eq!(
            VALIDATION_LAYER.to_str().unwrap(),
            "VK_LAYER_KHRONOS_validation"
        );
    }
}

// Vulkan Instance - entry point into the driver
//
// Responsibilities:
// - Load the Vulkan library
// - Enable the surface extensions for the window system in use
// - Optional validation layers + debug messenger

use anyhow::{Context, Result};
use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct VulkanInstance {
    pub instance: ash::Instance,
    pub entry: Entry,
    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a Vulkan instance able to present to windows on `display`
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `display` - Display handle of the window system in use
    /// * `enable_validation` - Request Khronos validation layers
    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let validation = enable_validation && Self::validation_available(&entry)?;
        if enable_validation && !validation {
            log::warn!("Validation layers requested but not installed, continuing without them");
        }

        let app_name_cstr = CString::new(app_name)?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(1)
            .engine_name(&app_name_cstr)
            .engine_version(1)
            .api_version(vk::API_VERSION_1_0);

        let mut extensions: Vec<*const c_char> = required_surface_extensions(display)?
            .into_iter()
            .map(CStr::as_ptr)
            .collect();
        if validation {
            extensions.push(ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        let debug_utils = if validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        Ok(Arc::new(Self {
            instance,
            entry,
            debug_utils,
        }))
    }

    fn validation_available(entry: &Entry) -> Result<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;

        Ok(has_layer(&layers, VALIDATION_LAYER))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }
}

fn has_layer(layers: &[vk::LayerProperties], wanted: &CStr) -> bool {
    layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == wanted
    })
}

/// Instance extensions needed to create a surface for `display`
pub fn required_surface_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => anyhow::bail!("Unsupported window system: {:?}", other),
    };

    Ok(vec![khr::Surface::name(), platform])
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::info!("[Vulkan] {}", message),
        _ => log::debug!("[Vulkan] {}", message),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{
        AppKitDisplayHandle, WaylandDisplayHandle, WindowsDisplayHandle, XcbDisplayHandle,
        XlibDisplayHandle,
    };
    use std::ptr::NonNull;

    #[test]
    fn surface_extension_always_first() {
        let exts = required_surface_extensions(RawDisplayHandle::Windows(
            WindowsDisplayHandle::new(),
        ))
        .unwrap();
        assert_eq!(exts, vec![khr::Surface::name(), khr::Win32Surface::name()]);
    }

    #[test]
    fn each_unix_window_system_gets_its_extension() {
        let xlib = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));
        let xcb = RawDisplayHandle::Xcb(XcbDisplayHandle::new(None, 0));
        let wayland = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(NonNull::dangling()));

        assert_eq!(required_surface_extensions(xlib).unwrap()[1], khr::XlibSurface::name());
        assert_eq!(required_surface_extensions(xcb).unwrap()[1], khr::XcbSurface::name());
        assert_eq!(
            required_surface_extensions(wayland).unwrap()[1],
            khr::WaylandSurface::name()
        );
    }

    #[test]
    fn appkit_is_unsupported() {
        let appkit = RawDisplayHandle::AppKit(AppKitDisplayHandle::new());
        let err = required_surface_extensions(appkit).unwrap_err();
        assert!(err.to_string().contains("Unsupported window system"));
    }

    #[test]
    fn validation_layer_is_found_by_name() {
        let mut installed = vk::LayerProperties::default();
        for (dst, src) in installed.layer_name.iter_mut().zip(VALIDATION_LAYER.to_bytes()) {
            *dst = *src as c_char;
        }
        assert!(has_layer(&[vk::LayerProperties::default(), installed], VALIDATION_LAYER));
        assert!(!has_layer(&[vk::LayerProperties::default()], VALIDATION_LAYER));
    }
}

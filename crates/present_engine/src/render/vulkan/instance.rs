//! Vulkan instance
//!
//! Loads the driver, creates the instance with the platform's surface
//! extensions, and in debug builds routes validation messages into `log`.

#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Entry, Instance};
use log::{debug, error, info, warn};
use std::ffi::{CStr, CString};

use crate::config::RendererConfig;
use crate::render::backend::{AdapterInfo, GpuInstance, SurfaceProvider};
use crate::render::error::{VulkanError, VulkanResult};

use super::device::VulkanDevice;
use super::surface::VulkanSurface;

const ENGINE_NAME: &str = "PresentEngine";
const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Vulkan instance plus the platform collaborator that owns the window
pub struct VulkanInstance<P: SurfaceProvider> {
    entry: Entry,
    instance: Instance,
    surface_loader: Surface,
    #[cfg(debug_assertions)]
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    provider: P,
    surface_taken: bool,
    destroyed: bool,
}

impl<P: SurfaceProvider> VulkanInstance<P> {
    /// Create a new Vulkan instance for the provider's window
    pub fn new(provider: P, config: &RendererConfig) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;
        let enable_validation = config.validation_enabled();

        let app_name = to_cstring(&config.application_name)?;
        let engine_name = to_cstring(ENGINE_NAME)?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let required = provider.required_instance_extensions()?;
        let extension_names = required
            .iter()
            .map(|name| to_cstring(name))
            .collect::<VulkanResult<Vec<_>>>()?;
        #[allow(unused_mut)]
        let mut extensions: Vec<*const std::os::raw::c_char> = extension_names.iter().map(|e| e.as_ptr()).collect();

        #[cfg(debug_assertions)]
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![to_cstring(VALIDATION_LAYER)?]
        } else {
            Vec::new()
        };
        let layers: Vec<*const std::os::raw::c_char> = layer_names.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Created Vulkan instance for '{}' ({} extension(s), validation {})",
            config.application_name,
            extensions.len(),
            if enable_validation { "on" } else { "off" }
        );

        #[cfg(debug_assertions)]
        let debug_utils = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        Ok(Self {
            entry,
            instance,
            surface_loader,
            #[cfg(debug_assertions)]
            debug_utils,
            provider,
            surface_taken: false,
            destroyed: false,
        })
    }

    /// Platform collaborator
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Mutable platform collaborator, e.g. to poll window events
    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    fn describe_adapter(&self, handle: vk::PhysicalDevice) -> VulkanResult<Option<AdapterInfo>> {
        let properties = unsafe { self.instance.get_physical_device_properties(handle) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let extensions = unsafe { self.instance.enumerate_device_extension_properties(handle)? };
        let has_swapchain = extensions.iter().any(|available| {
            let extension_name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            extension_name == SwapchainLoader::name()
        });
        if !has_swapchain {
            debug!("Skipping adapter '{name}': no swapchain extension");
            return Ok(None);
        }

        let queue_families = unsafe { self.instance.get_physical_device_queue_family_properties(handle) };
        Ok(Some(AdapterInfo {
            handle,
            name,
            device_type: properties.device_type,
            queue_families,
        }))
    }
}

impl<P: SurfaceProvider> GpuInstance for VulkanInstance<P> {
    type Surface = VulkanSurface;
    type Device = VulkanDevice;

    fn create_surface(&mut self) -> VulkanResult<VulkanSurface> {
        if self.surface_taken {
            return Err(VulkanError::InvalidOperation {
                reason: "the window surface has already been created".to_string(),
            });
        }
        let handle = self.provider.create_surface(&self.entry, &self.instance)?;
        self.surface_taken = true;
        Ok(VulkanSurface::new(self.surface_loader.clone(), handle))
    }

    fn adapters(&self) -> VulkanResult<Vec<AdapterInfo>> {
        let devices = unsafe { self.instance.enumerate_physical_devices()? };
        let mut adapters = Vec::with_capacity(devices.len());
        for device in devices {
            if let Some(info) = self.describe_adapter(device)? {
                adapters.push(info);
            }
        }
        Ok(adapters)
    }

    fn create_device(&self, adapter: &AdapterInfo, queue_family: u32) -> VulkanResult<VulkanDevice> {
        let priorities = [1.0_f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)
            .build()];
        let extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { self.instance.create_device(adapter.handle, &create_info, None)? };
        info!("Created logical device on '{}'", adapter.name);
        Ok(VulkanDevice::new(&self.instance, adapter.handle, device, queue_family))
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        unsafe {
            #[cfg(debug_assertions)]
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("Destroyed Vulkan instance");
    }
}

fn to_cstring(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|e| VulkanError::InitializationFailed(format!("Invalid name {value:?}: {e}")))
}

#[cfg(debug_assertions)]
fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    unsafe { Ok(debug_utils.create_debug_utils_messenger(&create_info, None)?) }
}

/// Validation layer messages, forwarded to `log` by severity
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

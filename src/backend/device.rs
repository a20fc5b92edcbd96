// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Window surface
// - Physical device selection (scored, see selection.rs)
// - Logical device + graphics/present queues
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::selection::{self, DeviceProfile, DeviceRequirements, QueueFamilyIndices};
use super::swapchain::SwapchainSupport;

const ENGINE_NAME: &CStr = c"be_engine";
const VALIDATION_LAYERS: &[&CStr] = &[c"VK_LAYER_KHRONOS_validation"];

/// Knobs for device creation, filled in from the config
#[derive(Debug, Clone, Copy)]
pub struct DeviceOptions {
    pub enable_validation: bool,
    pub verbose_validation: bool,
    pub require_geometry_shader: bool,
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Taken in Drop before the device goes away
    allocator: Mutex<Option<Allocator>>,

    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue: vk::Queue,
    pub present_queue_family: u32,

    // Presentation target
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,

    // Debug utils (if validation enabled)
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub instance: ash::Instance,
    _entry: Entry,

    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Bring up everything between the loader and the logical device.
    ///
    /// The window handles are needed up front: the instance must enable the
    /// platform surface extensions, and device selection needs the surface
    /// to find a present-capable queue family.
    pub fn new(
        app_name: &str,
        options: DeviceOptions,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        if options.enable_validation {
            Self::check_validation_layer_support(&entry)?;
        }

        let instance = Self::create_instance(&entry, app_name, options, display_handle)?;

        let debug_utils = if options.enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance, options.verbose_validation)?)
        } else {
            None
        };

        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;

        let requirements = DeviceRequirements {
            geometry_shader: options.require_geometry_shader,
        };
        let (physical_device, graphics_queue_family, present_queue_family) =
            Self::pick_physical_device(&instance, &surface_loader, surface, &requirements)?;

        let (device, graphics_queue, present_queue) = Self::create_logical_device(
            &instance,
            physical_device,
            graphics_queue_family,
            present_queue_family,
        )?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            selection::driver_string(&properties.device_name).to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics {}, present {}",
            graphics_queue_family,
            present_queue_family
        );

        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        Ok(Arc::new(Self {
            allocator: Mutex::new(Some(allocator)),
            device,
            physical_device,
            graphics_queue,
            graphics_queue_family,
            present_queue,
            present_queue_family,
            surface,
            surface_loader,
            debug_utils,
            instance,
            _entry: entry,
            properties,
        }))
    }

    fn check_validation_layer_support(entry: &Entry) -> Result<()> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;
        let available: Vec<&CStr> = layers
            .iter()
            .map(|layer| selection::driver_string(&layer.layer_name))
            .collect();

        let missing = selection::missing_names(VALIDATION_LAYERS, &available);
        if !missing.is_empty() {
            anyhow::bail!("Validation layers requested, but not available: {:?}", missing);
        }
        Ok(())
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        options: DeviceOptions,
        display_handle: RawDisplayHandle,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        // Window-system surface extensions for this platform
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query required surface extensions")?
            .to_vec();

        let layer_names: Vec<_> = if options.enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
            VALIDATION_LAYERS.iter().map(|layer| layer.as_ptr()).collect()
        } else {
            Vec::new()
        };

        // Chained so instance creation and destruction are validated too
        let mut debug_info = debug_messenger_info(options.verbose_validation);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        if options.enable_validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
        verbose: bool,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);
        let create_info = debug_messenger_info(verbose);

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to set up debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        requirements: &DeviceRequirements,
    ) -> Result<(vk::PhysicalDevice, u32, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("Failed to find GPUs with Vulkan support");
        }

        let mut profiles = Vec::with_capacity(devices.len());
        for &device in &devices {
            profiles.push(Self::profile_device(instance, surface_loader, surface, device)?);
        }

        let scores: Vec<u32> = profiles
            .iter()
            .map(|profile| {
                let score = selection::rate_device_suitability(profile, requirements);
                log::debug!(
                    "GPU candidate '{}' ({:?}): score {}",
                    profile.name,
                    profile.device_type,
                    score
                );
                score
            })
            .collect();

        let best = selection::select_best(&scores).context("Failed to find a suitable GPU")?;
        let (graphics, present) = profiles[best]
            .queue_families
            .resolved()
            .context("Selected GPU has incomplete queue families")?;

        Ok((devices[best], graphics, present))
    }

    /// Gather everything the suitability score looks at
    fn profile_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Result<DeviceProfile> {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let queue_families: QueueFamilyIndices =
            selection::find_queue_families(&families, |index| {
                unsafe {
                    surface_loader.get_physical_device_surface_support(device, index, surface)
                }
                .unwrap_or(false)
            });

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let available: Vec<&CStr> = extensions
            .iter()
            .map(|ext| selection::driver_string(&ext.extension_name))
            .collect();
        let extensions_supported =
            selection::missing_names(&[khr::Swapchain::name()], &available).is_empty();

        // Only meaningful once the swapchain extension is known to exist
        let swapchain_adequate = extensions_supported
            && SwapchainSupport::query(surface_loader, device, surface)?.is_adequate();

        Ok(DeviceProfile {
            name: selection::driver_string(&props.device_name)
                .to_string_lossy()
                .into_owned(),
            device_type: props.device_type,
            max_image_dimension_2d: props.limits.max_image_dimension2_d,
            geometry_shader: features.geometry_shader == vk::TRUE,
            queue_families,
            extensions_supported,
            swapchain_adequate,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        present_queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let mut families = vec![graphics_queue_family];
        if present_queue_family != graphics_queue_family {
            families.push(present_queue_family);
        }

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU memory allocator")?;

        Ok(allocator)
    }

    pub fn allocate(&self, desc: &AllocationCreateDesc) -> Result<Allocation> {
        let mut allocator = self.allocator.lock();
        let allocator = allocator.as_mut().context("Allocator already destroyed")?;
        Ok(allocator.allocate(desc)?)
    }

    pub fn free(&self, allocation: Allocation) -> Result<()> {
        let mut allocator = self.allocator.lock();
        let allocator = allocator.as_mut().context("Allocator already destroyed")?;
        Ok(allocator.free(allocation)?)
    }

    /// Current surface capabilities, formats and present modes
    pub fn swapchain_support(&self) -> Result<SwapchainSupport> {
        SwapchainSupport::query(&self.surface_loader, self.physical_device, self.surface)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::error!("Failed to wait for device idle: {:?}", e);
        }

        // Allocator frees its memory blocks through the device
        drop(self.allocator.lock().take());

        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

fn debug_messenger_info(verbose: bool) -> vk::DebugUtilsMessengerCreateInfoEXT {
    let mut severity =
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    if verbose {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO;
    }

    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(severity)
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {:?}: {}", message_type, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {:?}: {}", message_type, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Vulkan] {:?}: {}", message_type, message);
        }
        _ => {
            log::debug!("[Vulkan] {:?}: {}", message_type, message);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messenger_reports_warnings_and_errors_by_default() {
        let info = debug_messenger_info(false);
        assert!(info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING));
        assert!(info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR));
        assert!(!info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
        assert!(info.pfn_user_callback.is_some());
    }

    #[test]
    fn verbose_messenger_adds_info_and_verbose() {
        let info = debug_messenger_info(true);
        assert!(info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
        assert!(info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
    }
}

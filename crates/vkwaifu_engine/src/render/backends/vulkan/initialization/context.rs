//! Vulkan context management
//!
//! Instance, physical device selection and the logical device with its graphics and
//! transfer queues. Every wrapper cleans up in `Drop`.

use ash::{Device, Entry, Instance};
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;
use std::ffi::{c_char, CStr, CString};
use thiserror::Error;

use super::surface::Surface;
use super::window::{Window, WindowError};
use crate::render::backends::vulkan::rendering::commands::CommandPool;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Setup failed before any frame was produced
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Window system failure
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// No adapter reports itself as a discrete GPU
    #[error("No discrete GPU found")]
    NoDiscreteGpu,

    /// A required instance or device extension is not exposed
    #[error("Missing required extension: {0}")]
    MissingExtension(String),

    /// The graphics queue family cannot present to the window surface
    #[error("Graphics queue family cannot present to the surface")]
    PresentationUnsupported,

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Image layout transition outside the supported pair
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        /// Layout the image is in
        old: vk::ImageLayout,
        /// Layout that was requested
        new: vk::ImageLayout,
    },

    /// The surface does not offer the configured format/color space
    #[error("Surface format {format:?}/{color_space:?} not supported")]
    SurfaceFormatUnavailable {
        /// Requested format
        format: vk::Format,
        /// Requested color space
        color_space: vk::ColorSpaceKHR,
    },

    /// The surface does not offer the configured present mode
    #[error("Present mode {0:?} not supported")]
    PresentModeUnavailable(vk::PresentModeKHR),
}

impl VulkanError {
    /// Whether the error is an unrecoverable runtime fault
    ///
    /// Setup problems the user can act on (no discrete GPU, no window, missing shader
    /// files, a failed instance) are not fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::NoDiscreteGpu | Self::InitializationFailed(_) | Self::Window(_)
        )
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

fn cstring(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|e| VulkanError::InvalidOperation {
        reason: format!("string {:?} contains a nul byte: {}", value, e),
    })
}

fn fixed_name(raw: &[c_char]) -> &CStr {
    // Vulkan guarantees these arrays are nul terminated
    unsafe { CStr::from_ptr(raw.as_ptr()) }
}

/// Names from `required` that are absent from `available`
pub fn missing_extensions(required: &[&CStr], available: &[vk::ExtensionProperties]) -> Vec<String> {
    required
        .iter()
        .filter(|name| {
            !available
                .iter()
                .any(|ext| fixed_name(&ext.extension_name) == **name)
        })
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance with the window system's extensions, plus validation when asked
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = cstring(app_name)?;
        let engine_name_cstr = cstring("vkwaifu")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let required = window.required_instance_extensions()?;
        let required_cstrs = required
            .iter()
            .map(|name| cstring(name))
            .collect::<VulkanResult<Vec<_>>>()?;

        let available = entry
            .enumerate_instance_extension_properties(None)
            .map_err(VulkanError::Api)?;
        let required_refs: Vec<&CStr> = required_cstrs.iter().map(CString::as_c_str).collect();
        if let Some(missing) = missing_extensions(&required_refs, &available).into_iter().next() {
            return Err(VulkanError::MissingExtension(missing));
        }

        let enable_validation = enable_validation && Self::validation_layer_present(&entry)?;

        let mut extensions: Vec<*const c_char> = required_cstrs.iter().map(|ext| ext.as_ptr()).collect();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![cstring(VALIDATION_LAYER)?]
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(|e| VulkanError::InitializationFailed(format!("Instance creation: {:?}", e)))?
        };

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!(
            "Created Vulkan instance for '{}' (validation {})",
            app_name,
            if debug.is_some() { "on" } else { "off" }
        );

        Ok(Self { entry, instance, debug })
    }

    fn validation_layer_present(entry: &Entry) -> VulkanResult<bool> {
        let layers = entry.enumerate_instance_layer_properties().map_err(VulkanError::Api)?;
        let present = layers
            .iter()
            .any(|layer| fixed_name(&layer.layer_name).to_bytes() == VALIDATION_LAYER.as_bytes());
        if !present {
            log::warn!("{} requested but not installed, continuing without it", VALIDATION_LAYER);
        }
        Ok(present)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("Destroyed Vulkan instance");
    }
}

/// Routes validation layer output into `log`
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
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Queue family indices the device is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// First family supporting graphics
    pub graphics: u32,
    /// First transfer family after the graphics one, or the graphics family itself
    pub transfer: u32,
}

impl QueueFamilies {
    /// Pick the graphics and transfer families from a device's family list
    pub fn select(families: &[vk::QueueFamilyProperties]) -> Option<Self> {
        let graphics = families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;
        let transfer = families
            .iter()
            .enumerate()
            .skip(graphics + 1)
            .find(|(_, family)| family.queue_flags.contains(vk::QueueFlags::TRANSFER))
            .map_or(graphics, |(index, _)| index);

        Some(Self {
            graphics: graphics as u32,
            transfer: transfer as u32,
        })
    }

    /// Whether both roles share one family
    pub fn shared(&self) -> bool {
        self.graphics == self.transfer
    }
}

/// Index of the first discrete GPU in enumeration order
pub fn first_discrete_gpu(device_types: &[vk::PhysicalDeviceType]) -> Option<usize> {
    device_types
        .iter()
        .position(|&ty| ty == vk::PhysicalDeviceType::DISCRETE_GPU)
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Available queue families
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Selected family indices
    pub families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// Select the first discrete GPU
    ///
    /// Integrated and software adapters are never used.
    pub fn select_discrete(instance: &Instance) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        let types: Vec<vk::PhysicalDeviceType> = devices
            .iter()
            .map(|&device| unsafe { instance.get_physical_device_properties(device) }.device_type)
            .collect();
        let index = first_discrete_gpu(&types).ok_or(VulkanError::NoDiscreteGpu)?;
        let device = devices[index];

        let properties = unsafe { instance.get_physical_device_properties(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let families = QueueFamilies::select(&queue_families).ok_or_else(|| {
            VulkanError::InitializationFailed("No graphics queue family found".to_string())
        })?;

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        if let Some(missing) = missing_extensions(&[SwapchainLoader::name()], &extensions).into_iter().next() {
            return Err(VulkanError::MissingExtension(missing));
        }

        log::info!(
            "Selected GPU: {} (graphics family {}, transfer family {})",
            fixed_name(&properties.device_name).to_string_lossy(),
            families.graphics,
            families.transfer
        );

        Ok(Self {
            device,
            properties,
            memory_properties,
            queue_families,
            families,
        })
    }

    /// Fail unless the graphics family can present to `surface`
    pub fn require_present_support(&self, surface: &Surface) -> VulkanResult<()> {
        if surface.supports_present(self.device, self.families.graphics)? {
            Ok(())
        } else {
            Err(VulkanError::PresentationUnsupported)
        }
    }

    fn queue_count(&self, family: u32) -> u32 {
        self.queue_families
            .get(family as usize)
            .map_or(1, |props| props.queue_count.max(1))
    }
}

/// Queue slot the transfer queue takes inside a family shared with graphics
///
/// A second queue is used when the family has one; otherwise both roles share queue 0.
pub fn shared_transfer_queue_index(family_queue_count: u32) -> u32 {
    u32::from(family_queue_count >= 2)
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Transfer operations queue
    pub transfer_queue: vk::Queue,
    /// Selected family indices
    pub families: QueueFamilies,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Open the device with one graphics and one transfer queue
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let families = physical.families;
        let priorities = [1.0_f32, 1.0];

        let transfer_slot = if families.shared() {
            shared_transfer_queue_index(physical.queue_count(families.graphics))
        } else {
            0
        };

        let graphics_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(families.graphics)
            .queue_priorities(&priorities[..=transfer_slot as usize])
            .build();
        let transfer_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(families.transfer)
            .queue_priorities(&priorities[..1])
            .build();
        let queue_infos = [graphics_info, transfer_info];
        let queue_infos = if families.shared() { &queue_infos[..1] } else { &queue_infos[..] };

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let transfer_queue = unsafe { device.get_device_queue(families.transfer, transfer_slot) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            transfer_queue,
            families,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
        log::debug!("Destroyed logical device");
    }
}

/// Logical device plus the two command pools created from it
///
/// Pools are declared first so they are destroyed before the device.
pub struct DeviceContext {
    graphics_pool: CommandPool,
    transfer_pool: CommandPool,
    device: LogicalDevice,
}

impl DeviceContext {
    /// Open the device and create both pools
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let device = LogicalDevice::new(instance, physical)?;

        let graphics_pool = CommandPool::new(
            device.device.clone(),
            device.families.graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let transfer_pool = CommandPool::new(
            device.device.clone(),
            device.families.transfer,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        Ok(Self {
            graphics_pool,
            transfer_pool,
            device,
        })
    }

    /// Get the raw device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the transfer queue
    pub fn transfer_queue(&self) -> vk::Queue {
        self.device.transfer_queue
    }

    /// Get the queue family indices
    pub fn families(&self) -> QueueFamilies {
        self.device.families
    }

    /// Pool whose command buffers can be reset individually
    pub fn graphics_pool(&self) -> &CommandPool {
        &self.graphics_pool
    }

    /// Pool for short-lived transfer work
    pub fn transfer_pool(&self) -> &CommandPool {
        &self.transfer_pool
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Block until the device has no pending work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn extension(name: &str) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.bytes()) {
            *dst = src as c_char;
        }
        props
    }

    #[test]
    fn test_first_discrete_gpu_only() {
        use vk::PhysicalDeviceType as T;
        assert_eq!(first_discrete_gpu(&[T::INTEGRATED_GPU, T::DISCRETE_GPU, T::DISCRETE_GPU]), Some(1));
        assert_eq!(first_discrete_gpu(&[T::INTEGRATED_GPU, T::CPU, T::VIRTUAL_GPU]), None);
        assert_eq!(first_discrete_gpu(&[]), None);
    }

    #[test]
    fn test_transfer_family_searched_after_graphics() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 16),
            family(vk::QueueFlags::COMPUTE, 4),
            family(vk::QueueFlags::TRANSFER, 2),
        ];
        let selected = QueueFamilies::select(&families).unwrap();
        assert_eq!(selected, QueueFamilies { graphics: 1, transfer: 3 });
        assert!(!selected.shared());
    }

    #[test]
    fn test_transfer_falls_back_to_graphics_family() {
        let families = [
            family(vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1),
        ];
        let selected = QueueFamilies::select(&families).unwrap();
        assert_eq!(selected, QueueFamilies { graphics: 1, transfer: 1 });
        assert!(selected.shared());
    }

    #[test]
    fn test_no_graphics_family() {
        assert!(QueueFamilies::select(&[family(vk::QueueFlags::TRANSFER, 1)]).is_none());
    }

    #[test]
    fn test_shared_transfer_queue_slot() {
        assert_eq!(shared_transfer_queue_index(1), 0);
        assert_eq!(shared_transfer_queue_index(2), 1);
        assert_eq!(shared_transfer_queue_index(16), 1);
    }

    #[test]
    fn test_missing_extensions() {
        let available = [extension("VK_KHR_surface"), extension("VK_KHR_xcb_surface")];
        let surface = CString::new("VK_KHR_surface").unwrap();
        let wayland = CString::new("VK_KHR_wayland_surface").unwrap();

        assert!(missing_extensions(&[surface.as_c_str()], &available).is_empty());
        assert_eq!(
            missing_extensions(&[surface.as_c_str(), wayland.as_c_str()], &available),
            vec!["VK_KHR_wayland_surface".to_string()]
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!VulkanError::NoDiscreteGpu.is_fatal());
        assert!(!VulkanError::InitializationFailed("x".into()).is_fatal());
        assert!(VulkanError::PresentationUnsupported.is_fatal());
        assert!(VulkanError::MissingExtension("VK_KHR_swapchain".into()).is_fatal());
        assert!(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).is_fatal());
        assert!(VulkanError::UnsupportedLayoutTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        }
        .is_fatal());
    }
}

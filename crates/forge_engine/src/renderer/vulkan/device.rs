//! Vulkan device selection and logical device creation
//!
//! Physical devices must provide graphics, present and transfer queues,
//! sampler anisotropy and the swapchain extension; discrete GPUs are
//! required except on Apple platforms. The transfer queue prefers the
//! family with the fewest other capabilities (lowest "transfer score").

use std::collections::HashSet;
use std::ffi::CStr;

use ash::extensions::khr;
use ash::vk;

use crate::renderer::backend::{RendererError, RendererResult};

/// Swapchain-related capabilities of a surface/device pair.
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupportInfo {
    /// Surface capabilities (image counts, extents, transforms).
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Physical + logical device state, queues and the graphics command pool.
pub struct VulkanDevice {
    /// Selected physical device.
    pub physical_device: vk::PhysicalDevice,
    /// Device properties (limits, type, name).
    pub properties: vk::PhysicalDeviceProperties,
    /// Cached memory properties for memory-type lookups.
    pub memory: vk::PhysicalDeviceMemoryProperties,
    /// True when some memory type is both device-local and host-visible.
    pub supports_device_local_host_visible: bool,

    /// Graphics queue family index.
    pub graphics_queue_index: u32,
    /// Present queue family index.
    pub present_queue_index: u32,
    /// Transfer queue family index.
    pub transfer_queue_index: u32,

    /// The logical device.
    pub logical_device: ash::Device,
    /// Graphics queue handle.
    pub graphics_queue: vk::Queue,
    /// Present queue handle.
    pub present_queue: vk::Queue,
    /// Transfer queue handle.
    pub transfer_queue: vk::Queue,

    /// Command pool for graphics-family command buffers.
    pub graphics_command_pool: vk::CommandPool,

    /// Depth buffer format detected for this device.
    pub depth_format: vk::Format,
    /// Swapchain support as of the last query.
    pub swapchain_support: SwapchainSupportInfo,
}

struct PhysicalDeviceRequirements {
    graphics: bool,
    present: bool,
    transfer: bool,
    sampler_anisotropy: bool,
    discrete_gpu: bool,
    extensions: Vec<&'static CStr>,
}

#[derive(Default)]
struct QueueFamilyInfo {
    graphics: Option<u32>,
    present: Option<u32>,
    transfer: Option<u32>,
}

impl VulkanDevice {
    /// Selects a physical device, creates the logical device, fetches the
    /// queues and creates the graphics command pool.
    pub fn create(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> RendererResult<Self> {
        let (physical_device, queue_info, swapchain_support) =
            select_physical_device(instance, surface_loader, surface)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let features = unsafe { instance.get_physical_device_features(physical_device) };
        let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let supports_device_local_host_visible = memory.memory_types
            [..memory.memory_type_count as usize]
            .iter()
            .any(|t| {
                t.property_flags.contains(
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )
            });

        let graphics_queue_index = queue_info.graphics.unwrap();
        let present_queue_index = queue_info.present.unwrap();
        let transfer_queue_index = queue_info.transfer.unwrap();

        // collapse queue creation when families coincide
        let unique_indices: HashSet<u32> = [
            graphics_queue_index,
            present_queue_index,
            transfer_queue_index,
        ]
        .into_iter()
        .collect();

        let priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_indices
            .iter()
            .map(|&index| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(index)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let enabled_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(features.sampler_anisotropy == vk::TRUE);

        let extension_names = [khr::Swapchain::name().as_ptr()];

        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_features(&enabled_features)
            .enabled_extension_names(&extension_names);

        let logical_device = unsafe {
            instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(RendererError::Api)?
        };
        log::info!("Logical device created.");

        let graphics_queue = unsafe { logical_device.get_device_queue(graphics_queue_index, 0) };
        let present_queue = unsafe { logical_device.get_device_queue(present_queue_index, 0) };
        let transfer_queue = unsafe { logical_device.get_device_queue(transfer_queue_index, 0) };

        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(graphics_queue_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let graphics_command_pool = unsafe {
            logical_device
                .create_command_pool(&pool_create_info, None)
                .map_err(RendererError::Api)?
        };

        let mut device = Self {
            physical_device,
            properties,
            memory,
            supports_device_local_host_visible,
            graphics_queue_index,
            present_queue_index,
            transfer_queue_index,
            logical_device,
            graphics_queue,
            present_queue,
            transfer_queue,
            graphics_command_pool,
            depth_format: vk::Format::UNDEFINED,
            swapchain_support,
        };

        if !device.detect_depth_format(instance) {
            return Err(RendererError::InitializationFailed(
                "failed to find a supported depth format".to_string(),
            ));
        }

        Ok(device)
    }

    /// Re-queries swapchain support (formats/modes may change across a
    /// resize or monitor move).
    pub fn query_swapchain_support(
        &mut self,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> RendererResult<()> {
        self.swapchain_support =
            query_swapchain_support(self.physical_device, surface_loader, surface)?;
        Ok(())
    }

    /// Scans {D32, D32_S8, D24_S8} for depth-stencil attachment support in
    /// either tiling. Returns false when none qualifies.
    pub fn detect_depth_format(&mut self, instance: &ash::Instance) -> bool {
        let candidates = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ];
        let flags = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;

        for candidate in candidates {
            let properties = unsafe {
                instance.get_physical_device_format_properties(self.physical_device, candidate)
            };
            if properties.linear_tiling_features.contains(flags)
                || properties.optimal_tiling_features.contains(flags)
            {
                self.depth_format = candidate;
                return true;
            }
        }
        false
    }

    /// Destroys the command pool and the logical device.
    pub fn destroy(&mut self) {
        unsafe {
            if self.graphics_command_pool != vk::CommandPool::null() {
                self.logical_device
                    .destroy_command_pool(self.graphics_command_pool, None);
                self.graphics_command_pool = vk::CommandPool::null();
            }
            self.logical_device.destroy_device(None);
        }
    }
}

/// Finds the index of a memory type matching `type_filter` and all of
/// `property_flags`.
pub fn find_memory_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    property_flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        type_filter & (1 << i) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(property_flags)
    })
}

fn query_swapchain_support(
    physical_device: vk::PhysicalDevice,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
) -> RendererResult<SwapchainSupportInfo> {
    unsafe {
        let capabilities = surface_loader
            .get_physical_device_surface_capabilities(physical_device, surface)
            .map_err(RendererError::Api)?;
        let formats = surface_loader
            .get_physical_device_surface_formats(physical_device, surface)
            .map_err(RendererError::Api)?;
        let present_modes = surface_loader
            .get_physical_device_surface_present_modes(physical_device, surface)
            .map_err(RendererError::Api)?;
        Ok(SwapchainSupportInfo {
            capabilities,
            formats,
            present_modes,
        })
    }
}

fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
) -> RendererResult<(vk::PhysicalDevice, QueueFamilyInfo, SwapchainSupportInfo)> {
    let physical_devices = unsafe {
        instance
            .enumerate_physical_devices()
            .map_err(RendererError::Api)?
    };
    if physical_devices.is_empty() {
        return Err(RendererError::InitializationFailed(
            "no devices supporting Vulkan were found".to_string(),
        ));
    }

    let requirements = PhysicalDeviceRequirements {
        graphics: true,
        present: true,
        transfer: true,
        sampler_anisotropy: true,
        // discrete GPUs are not a given on Apple hardware
        discrete_gpu: !cfg!(target_os = "macos"),
        extensions: vec![khr::Swapchain::name()],
    };

    for physical_device in physical_devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let features = unsafe { instance.get_physical_device_features(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!("Evaluating device: {:?}.", name);

        let Some((queue_info, support)) = device_meets_requirements(
            instance,
            physical_device,
            surface_loader,
            surface,
            &properties,
            &features,
            &requirements,
        )?
        else {
            continue;
        };

        log::info!(
            "Selected device: {:?} ({:?}).",
            name,
            properties.device_type
        );
        return Ok((physical_device, queue_info, support));
    }

    Err(RendererError::InitializationFailed(
        "no physical device met the requirements".to_string(),
    ))
}

fn device_meets_requirements(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
    properties: &vk::PhysicalDeviceProperties,
    features: &vk::PhysicalDeviceFeatures,
    requirements: &PhysicalDeviceRequirements,
) -> RendererResult<Option<(QueueFamilyInfo, SwapchainSupportInfo)>> {
    if requirements.discrete_gpu
        && properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU
    {
        log::info!("Device is not a discrete GPU, and one is required. Skipping.");
        return Ok(None);
    }

    if requirements.sampler_anisotropy && features.sampler_anisotropy != vk::TRUE {
        log::info!("Device does not support sampler anisotropy. Skipping.");
        return Ok(None);
    }

    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let mut info = QueueFamilyInfo::default();
    let mut min_transfer_score = u8::MAX;
    for (index, family) in queue_families.iter().enumerate() {
        let index = index as u32;
        let mut transfer_score = 0u8;

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            info.graphics = Some(index);
            transfer_score += 1;
        }
        if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            transfer_score += 1;
        }
        if family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && transfer_score <= min_transfer_score
        {
            // prefer the dedicated transfer family
            min_transfer_score = transfer_score;
            info.transfer = Some(index);
        }

        let present_support = unsafe {
            surface_loader
                .get_physical_device_surface_support(physical_device, index, surface)
                .map_err(RendererError::Api)?
        };
        if present_support && info.present.is_none() {
            info.present = Some(index);
        }
    }

    if (requirements.graphics && info.graphics.is_none())
        || (requirements.present && info.present.is_none())
        || (requirements.transfer && info.transfer.is_none())
    {
        log::info!("Device is missing a required queue family. Skipping.");
        return Ok(None);
    }

    // device extensions
    let available = unsafe {
        instance
            .enumerate_device_extension_properties(physical_device)
            .map_err(RendererError::Api)?
    };
    for required in &requirements.extensions {
        let found = available.iter().any(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == *required
        });
        if !found {
            log::info!("Device is missing required extension {required:?}. Skipping.");
            return Ok(None);
        }
    }

    let support = query_swapchain_support(physical_device, surface_loader, surface)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        log::info!("Device has inadequate swapchain support. Skipping.");
        return Ok(None);
    }

    Ok(Some((info, support)))
}

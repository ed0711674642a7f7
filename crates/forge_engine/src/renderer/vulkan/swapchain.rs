//! Vulkan swapchain wrapper
//!
//! Owns the swapchain images/views, the depth attachment and the UI-pass
//! framebuffers (the world-pass framebuffers live on the backend, which
//! regenerates both sets together). Recreation destroys and rebuilds the
//! internals from freshly queried support data.

use ash::extensions::khr;
use ash::vk;

use super::device::VulkanDevice;
use super::image::VulkanImage;
use crate::renderer::backend::{RendererError, RendererResult};

/// The swapchain and the per-image resources tied to its lifetime.
pub struct Swapchain {
    loader: khr::Swapchain,
    /// Raw swapchain handle.
    pub handle: vk::SwapchainKHR,
    /// Chosen surface format.
    pub image_format: vk::SurfaceFormatKHR,
    /// Number of frames that may be in flight simultaneously.
    pub max_frames_in_flight: u8,
    /// Swapchain images (owned by the swapchain itself).
    pub images: Vec<vk::Image>,
    /// One view per swapchain image.
    pub views: Vec<vk::ImageView>,
    /// Depth attachment shared by the world pass.
    pub depth_attachment: VulkanImage,
    /// UI-pass framebuffers, one per image.
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    /// Creates a swapchain sized `width` x `height` (clamped to surface
    /// limits).
    pub fn create(
        instance: &ash::Instance,
        device: &VulkanDevice,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RendererResult<Self> {
        let loader = khr::Swapchain::new(instance, &device.logical_device);
        let mut swapchain = Self {
            loader,
            handle: vk::SwapchainKHR::null(),
            image_format: vk::SurfaceFormatKHR::default(),
            max_frames_in_flight: 2,
            images: Vec::new(),
            views: Vec::new(),
            depth_attachment: VulkanImage::null(),
            framebuffers: Vec::new(),
        };
        swapchain.create_internal(device, surface, width, height)?;
        Ok(swapchain)
    }

    /// Destroys and recreates the swapchain internals. Callers must have
    /// re-queried swapchain support and waited for the device to go idle.
    pub fn recreate(
        &mut self,
        device: &VulkanDevice,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        self.destroy_internal(device);
        self.create_internal(device, surface, width, height)
    }

    /// Destroys everything owned by the swapchain.
    pub fn destroy(&mut self, device: &VulkanDevice) {
        self.destroy_internal(device);
    }

    /// Acquires the next image, signaling `image_available_semaphore` on
    /// completion. Returns `Ok(None)` when the swapchain is out of date
    /// and must be recreated.
    pub fn acquire_next_image_index(
        &mut self,
        timeout_ns: u64,
        image_available_semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> RendererResult<Option<u32>> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, timeout_ns, image_available_semaphore, fence)
        };
        match result {
            // suboptimal still renders; recreation happens at present
            Ok((index, _suboptimal)) => Ok(Some(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(err) => Err(RendererError::Api(err)),
        }
    }

    /// Presents `present_image_index`, waiting on
    /// `render_complete_semaphore`. Returns `Ok(false)` when the
    /// swapchain is out of date or suboptimal and must be recreated.
    pub fn present(
        &mut self,
        present_queue: vk::Queue,
        render_complete_semaphore: vk::Semaphore,
        present_image_index: u32,
    ) -> RendererResult<bool> {
        let wait_semaphores = [render_complete_semaphore];
        let swapchains = [self.handle];
        let image_indices = [present_image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(present_queue, &present_info) };
        match result {
            Ok(false) => Ok(true),
            // suboptimal
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(false),
            Err(err) => Err(RendererError::Api(err)),
        }
    }

    fn create_internal(
        &mut self,
        device: &VulkanDevice,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        let support = &device.swapchain_support;

        // format preference: B8G8R8A8_UNORM with sRGB non-linear, else the
        // first one offered
        self.image_format = support
            .formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .copied()
            .unwrap_or(support.formats[0]);

        let present_mode = support
            .present_modes
            .iter()
            .copied()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let capabilities = &support.capabilities;
        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
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
        };

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
            image_count = capabilities.max_image_count;
        }
        self.max_frames_in_flight = 2;

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(self.image_format.format)
            .image_color_space(self.image_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let queue_family_indices = [device.graphics_queue_index, device.present_queue_index];
        if device.graphics_queue_index != device.present_queue_index {
            create_info = create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices);
        } else {
            create_info = create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
        }

        self.handle = unsafe {
            self.loader
                .create_swapchain(&create_info, None)
                .map_err(RendererError::Api)?
        };

        self.images = unsafe {
            self.loader
                .get_swapchain_images(self.handle)
                .map_err(RendererError::Api)?
        };

        self.views = self
            .images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(self.image_format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe {
                    device
                        .logical_device
                        .create_image_view(&view_info, None)
                        .map_err(RendererError::Api)
                }
            })
            .collect::<RendererResult<Vec<_>>>()?;

        if device.depth_format == vk::Format::UNDEFINED {
            return Err(RendererError::InitializationFailed(
                "device depth format is undefined".to_string(),
            ));
        }

        self.depth_attachment = VulkanImage::create(
            &device.logical_device,
            &device.memory,
            extent.width,
            extent.height,
            device.depth_format,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            true,
            vk::ImageAspectFlags::DEPTH,
        )?;

        // framebuffers are regenerated by the backend once the renderpasses
        // exist; clear the stale list here
        self.framebuffers.clear();

        log::info!(
            "Swapchain created ({}x{}, {} images).",
            extent.width,
            extent.height,
            self.images.len()
        );
        Ok(())
    }

    fn destroy_internal(&mut self, device: &VulkanDevice) {
        let logical = &device.logical_device;
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                logical.destroy_framebuffer(framebuffer, None);
            }
            self.depth_attachment.destroy(logical);
            for view in self.views.drain(..) {
                logical.destroy_image_view(view, None);
            }
            // images are owned by the swapchain and go with it
            self.images.clear();
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
    }
}

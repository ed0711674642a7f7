//! Vulkan image wrapper
//!
//! 2D images with bound memory, an optional view, explicit layout
//! transitions and buffer→image copies. Only the two transitions the
//! engine performs are encoded; anything else is rejected.

use ash::vk;

use super::command_buffer::CommandBuffer;
use super::device::find_memory_index;
use crate::renderer::backend::{RendererError, RendererResult};

/// A 2D image, its memory, and an optional view.
#[derive(Debug)]
pub struct VulkanImage {
    /// Raw image handle.
    pub handle: vk::Image,
    memory: vk::DeviceMemory,
    /// Image view, when one was requested at creation.
    pub view: vk::ImageView,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl VulkanImage {
    /// An empty image with null handles, used as a placeholder before the
    /// real resource exists.
    pub fn null() -> Self {
        Self {
            handle: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            width: 0,
            height: 0,
        }
    }

    /// Creates an image, allocates and binds memory, and optionally
    /// creates a view.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        create_view: bool,
        view_aspect_flags: vk::ImageAspectFlags,
    ) -> RendererResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(4)
            .array_layers(1)
            .format(format)
            .tiling(tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe {
            device
                .create_image(&image_info, None)
                .map_err(RendererError::Api)?
        };

        let requirements = unsafe { device.get_image_memory_requirements(handle) };
        let memory_index =
            find_memory_index(memory_properties, requirements.memory_type_bits, memory_flags)
                .ok_or(RendererError::NoSuitableMemoryType)?;

        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_index);
        let memory = unsafe {
            device
                .allocate_memory(&allocate_info, None)
                .map_err(RendererError::Api)?
        };
        unsafe {
            device
                .bind_image_memory(handle, memory, 0)
                .map_err(RendererError::Api)?;
        }

        let view = if create_view {
            Self::create_view(device, handle, format, view_aspect_flags)?
        } else {
            vk::ImageView::null()
        };

        Ok(Self {
            handle,
            memory,
            view,
            width,
            height,
        })
    }

    fn create_view(
        device: &ash::Device,
        image: vk::Image,
        format: vk::Format,
        aspect_flags: vk::ImageAspectFlags,
    ) -> RendererResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_flags,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            device
                .create_image_view(&view_info, None)
                .map_err(RendererError::Api)
        }
    }

    /// Records a layout transition into `command_buffer`.
    ///
    /// Supported: Undefined → TransferDstOptimal and TransferDstOptimal →
    /// ShaderReadOnlyOptimal. Anything else is an invalid operation.
    pub fn transition_layout(
        &self,
        device: &ash::Device,
        command_buffer: &CommandBuffer,
        graphics_queue_index: u32,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> RendererResult<()> {
        let mut barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(graphics_queue_index)
            .dst_queue_family_index(graphics_queue_index)
            .image(self.handle)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let (source_stage, dest_stage) = if old_layout == vk::ImageLayout::UNDEFINED
            && new_layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL
        {
            barrier = barrier
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
            (
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            )
        } else if old_layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL
            && new_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        {
            barrier = barrier
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            (
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            )
        } else {
            return Err(RendererError::InvalidOperation(
                "unsupported image layout transition".to_string(),
            ));
        };

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer.handle,
                source_stage,
                dest_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier.build()],
            );
        }
        Ok(())
    }

    /// Records a whole-extent buffer→image copy at mip 0.
    pub fn copy_from_buffer(
        &self,
        device: &ash::Device,
        buffer: vk::Buffer,
        command_buffer: &CommandBuffer,
    ) {
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            });

        unsafe {
            device.cmd_copy_buffer_to_image(
                command_buffer.handle,
                buffer,
                self.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region.build()],
            );
        }
    }

    /// Destroys the view, memory and image.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
                self.view = vk::ImageView::null();
            }
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
            if self.handle != vk::Image::null() {
                device.destroy_image(self.handle, None);
                self.handle = vk::Image::null();
            }
        }
    }
}

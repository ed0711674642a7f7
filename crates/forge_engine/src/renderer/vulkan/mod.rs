//! Vulkan rendering backend
//!
//! Owns every GPU object: instance, debug messenger, surface, device,
//! swapchain, the world/UI renderpasses and framebuffers, per-frame
//! synchronization primitives, the shared geometry buffers, and the
//! texture/sampler/shader payload stores. All state is destroyed in
//! reverse creation order during shutdown.

pub mod buffer;
pub mod command_buffer;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod renderpass;
pub mod shader;
pub mod swapchain;

use std::ffi::{CStr, CString};

use ash::extensions::{ext::DebugUtils, khr};
use ash::vk;
use slotmap::SlotMap;

use crate::foundation::math::{get_aligned, Vec4};
use crate::platform::Platform;
use crate::renderer::backend::{RendererBackend, RendererError, RendererResult};
use crate::renderer::types::{
    BuiltinRenderpass, Geometry, SamplerKey, Shader, ShaderKey, ShaderScope, ShaderStage,
    ShaderUniform, ShaderUniformType, Texture, TextureKey, TextureMap,
    BUILTIN_RENDERPASS_UI_NAME, BUILTIN_RENDERPASS_WORLD_NAME,
};
use crate::resources::ResourceType;
use crate::systems::resource_system::ResourceSystem;
use crate::systems::texture_system::TextureSystem;
use crate::INVALID_ID;

use buffer::VulkanBuffer;
use command_buffer::CommandBuffer;
use device::VulkanDevice;
use image::VulkanImage;
use pipeline::Pipeline;
use renderpass::{ClearFlags, RenderArea, RenderPass};
use shader::{
    attribute_format, convert_filter_type, convert_repeat_type, DescriptorSetConfig,
    VulkanDescriptorState, VulkanShader, VulkanShaderStage, VulkanShaderStageConfig,
    BINDING_INDEX_SAMPLER, BINDING_INDEX_UBO, DESC_SET_INDEX_GLOBAL, DESC_SET_INDEX_INSTANCE,
    IMAGE_SET_COUNT, VULKAN_MAX_MATERIAL_COUNT, VULKAN_SHADER_MAX_STAGES,
};
use swapchain::Swapchain;

/// Capacity of the backend geometry table.
pub const VULKAN_MAX_GEOMETRY_COUNT: usize = 4096;

const SHADER_ENTRY_POINT: &[u8] = b"main\0";

/// Tracks framebuffer-size generations so `begin_frame` knows when a
/// resize happened since the swapchain was last (re)built.
#[derive(Debug, Default, Clone, Copy)]
struct ResizeTracker {
    generation: u64,
    last_generation: u64,
    cached_width: u32,
    cached_height: u32,
}

impl ResizeTracker {
    /// Records a resize event.
    fn on_resized(&mut self, width: u32, height: u32) {
        self.cached_width = width;
        self.cached_height = height;
        self.generation += 1;
    }

    /// True when a resize has happened since the last `sync`.
    fn out_of_date(&self) -> bool {
        self.generation != self.last_generation
    }

    /// Latest cached size.
    fn cached_size(&self) -> (u32, u32) {
        (self.cached_width, self.cached_height)
    }

    /// Acknowledges the current generation and clears the cached size.
    fn sync(&mut self) {
        self.last_generation = self.generation;
        self.cached_width = 0;
        self.cached_height = 0;
    }
}

/// Offsets and counts of one geometry within the shared buffers.
#[derive(Debug, Clone, Copy)]
struct VulkanGeometryData {
    id: u32,
    generation: u32,
    vertex_count: u32,
    vertex_element_size: u32,
    vertex_buffer_offset: u64,
    index_count: u32,
    index_element_size: u32,
    index_buffer_offset: u64,
}

impl Default for VulkanGeometryData {
    fn default() -> Self {
        Self {
            id: INVALID_ID,
            generation: INVALID_ID,
            vertex_count: 0,
            vertex_element_size: 0,
            vertex_buffer_offset: 0,
            index_count: 0,
            index_element_size: 0,
            index_buffer_offset: 0,
        }
    }
}

/// The Vulkan implementation of [`RendererBackend`].
pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
    device: VulkanDevice,
    swapchain: Swapchain,

    world_renderpass: RenderPass,
    ui_renderpass: RenderPass,
    world_framebuffers: Vec<vk::Framebuffer>,

    graphics_command_buffers: Vec<CommandBuffer>,
    image_available_semaphores: Vec<vk::Semaphore>,
    queue_complete_semaphores: Vec<vk::Semaphore>,
    in_flight_fences: Vec<vk::Fence>,
    images_in_flight: Vec<vk::Fence>,

    image_index: u32,
    current_frame: u32,
    recreating_swapchain: bool,
    framebuffer_width: u32,
    framebuffer_height: u32,
    resize: ResizeTracker,
    frame_delta_time: f32,

    object_vertex_buffer: VulkanBuffer,
    object_index_buffer: VulkanBuffer,
    geometries: Vec<VulkanGeometryData>,

    textures: SlotMap<TextureKey, VulkanImage>,
    samplers: SlotMap<SamplerKey, vk::Sampler>,
    shaders: SlotMap<ShaderKey, VulkanShader>,

    shut_down: bool,
}

impl VulkanBackend {
    /// Brings up the whole backend against the platform window.
    pub fn new(platform: &mut Platform, application_name: &str) -> RendererResult<Self> {
        let (framebuffer_width, framebuffer_height) = {
            let (w, h) = platform.framebuffer_size();
            (if w != 0 { w } else { 800 }, if h != 0 { h } else { 600 })
        };

        let entry = unsafe {
            ash::Entry::load().map_err(|e| {
                RendererError::InitializationFailed(format!("failed to load Vulkan: {e:?}"))
            })?
        };

        // instance
        let app_name = CString::new(application_name).unwrap();
        let engine_name = CString::new("Forge Engine").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let required_extensions = platform
            .required_extension_names()
            .map_err(|e| RendererError::InitializationFailed(e.to_string()))?;
        let mut extension_cstrings: Vec<CString> = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()).unwrap())
            .collect();
        if cfg!(debug_assertions) {
            extension_cstrings.push(CString::from(DebugUtils::name()));
        }
        let extension_pointers: Vec<*const i8> =
            extension_cstrings.iter().map(|ext| ext.as_ptr()).collect();

        let validation_layer = CString::new("VK_LAYER_KHRONOS_validation").unwrap();
        let mut layer_pointers: Vec<*const i8> = Vec::new();
        if cfg!(debug_assertions) {
            let available = entry
                .enumerate_instance_layer_properties()
                .map_err(RendererError::Api)?;
            let present = available.iter().any(|layer| {
                let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                name == validation_layer.as_c_str()
            });
            if present {
                layer_pointers.push(validation_layer.as_ptr());
            } else {
                log::warn!("Validation layer requested but not available; continuing without it.");
            }
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_pointers)
            .enabled_layer_names(&layer_pointers);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(RendererError::Api)?
        };
        log::info!("Vulkan instance created.");

        let debug_utils = if cfg!(debug_assertions) {
            let loader = DebugUtils::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                )
                .pfn_user_callback(Some(vk_debug_callback));
            let messenger = unsafe {
                loader
                    .create_debug_utils_messenger(&messenger_info, None)
                    .map_err(RendererError::Api)?
            };
            Some((loader, messenger))
        } else {
            None
        };

        let surface = platform
            .create_vulkan_surface(instance.handle())
            .map_err(|e| RendererError::InitializationFailed(e.to_string()))?;
        let surface_loader = khr::Surface::new(&entry, &instance);

        let device = VulkanDevice::create(&instance, &surface_loader, surface)?;

        let swapchain = Swapchain::create(
            &instance,
            &device,
            surface,
            framebuffer_width,
            framebuffer_height,
        )?;

        let world_renderpass = RenderPass::create(
            &device.logical_device,
            swapchain.image_format.format,
            device.depth_format,
            RenderArea {
                x: 0,
                y: 0,
                width: framebuffer_width,
                height: framebuffer_height,
            },
            Vec4::new(0.0, 0.0, 0.2, 1.0),
            1.0,
            0,
            ClearFlags::COLOUR | ClearFlags::DEPTH | ClearFlags::STENCIL,
            false,
            true,
        )?;

        let ui_renderpass = RenderPass::create(
            &device.logical_device,
            swapchain.image_format.format,
            device.depth_format,
            RenderArea {
                x: 0,
                y: 0,
                width: framebuffer_width,
                height: framebuffer_height,
            },
            Vec4::new(0.0, 0.0, 0.0, 0.0),
            1.0,
            0,
            ClearFlags::empty(),
            true,
            false,
        )?;

        let image_count = swapchain.images.len();
        let max_frames = swapchain.max_frames_in_flight as usize;

        let mut backend = Self {
            _entry: entry,
            instance,
            debug_utils,
            surface_loader,
            surface,
            device,
            swapchain,
            world_renderpass,
            ui_renderpass,
            world_framebuffers: Vec::new(),
            graphics_command_buffers: Vec::new(),
            image_available_semaphores: Vec::new(),
            queue_complete_semaphores: Vec::new(),
            in_flight_fences: Vec::new(),
            images_in_flight: vec![vk::Fence::null(); image_count],
            image_index: 0,
            current_frame: 0,
            recreating_swapchain: false,
            framebuffer_width,
            framebuffer_height,
            resize: ResizeTracker::default(),
            frame_delta_time: 0.0,
            object_vertex_buffer: VulkanBuffer::null(),
            object_index_buffer: VulkanBuffer::null(),
            geometries: vec![VulkanGeometryData::default(); VULKAN_MAX_GEOMETRY_COUNT],
            textures: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            shut_down: false,
        };

        backend.regenerate_framebuffers()?;
        backend.create_command_buffers()?;

        // two semaphores and one signaled fence per in-flight frame
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        for _ in 0..max_frames {
            unsafe {
                let logical = &backend.device.logical_device;
                backend.image_available_semaphores.push(
                    logical
                        .create_semaphore(&semaphore_info, None)
                        .map_err(RendererError::Api)?,
                );
                backend.queue_complete_semaphores.push(
                    logical
                        .create_semaphore(&semaphore_info, None)
                        .map_err(RendererError::Api)?,
                );
                backend.in_flight_fences.push(
                    logical
                        .create_fence(&fence_info, None)
                        .map_err(RendererError::Api)?,
                );
            }
        }

        backend.create_buffers()?;

        log::info!("Vulkan renderer initialized successfully.");
        Ok(backend)
    }

    fn create_buffers(&mut self) -> RendererResult<()> {
        let device_local = vk::MemoryPropertyFlags::DEVICE_LOCAL;

        let vertex_buffer_size =
            std::mem::size_of::<crate::renderer::types::Vertex3D>() as u64 * 1024 * 1024;
        self.object_vertex_buffer = VulkanBuffer::create(
            &self.device.logical_device,
            &self.device.memory,
            vertex_buffer_size,
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            device_local,
            true,
        )?;

        let index_buffer_size = std::mem::size_of::<u32>() as u64 * 1024 * 1024;
        self.object_index_buffer = VulkanBuffer::create(
            &self.device.logical_device,
            &self.device.memory,
            index_buffer_size,
            vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            device_local,
            true,
        )?;

        Ok(())
    }

    fn create_command_buffers(&mut self) -> RendererResult<()> {
        let image_count = self.swapchain.images.len();
        for mut buffer in self.graphics_command_buffers.drain(..) {
            buffer.free(
                &self.device.logical_device,
                self.device.graphics_command_pool,
            );
        }
        for _ in 0..image_count {
            self.graphics_command_buffers.push(CommandBuffer::allocate(
                &self.device.logical_device,
                self.device.graphics_command_pool,
                true,
            )?);
        }
        Ok(())
    }

    fn regenerate_framebuffers(&mut self) -> RendererResult<()> {
        let logical = &self.device.logical_device;

        for framebuffer in self.world_framebuffers.drain(..) {
            unsafe { logical.destroy_framebuffer(framebuffer, None) };
        }
        for framebuffer in self.swapchain.framebuffers.drain(..) {
            unsafe { logical.destroy_framebuffer(framebuffer, None) };
        }

        for &view in &self.swapchain.views {
            let world_attachments = [view, self.swapchain.depth_attachment.view];
            let world_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.world_renderpass.handle)
                .attachments(&world_attachments)
                .width(self.framebuffer_width)
                .height(self.framebuffer_height)
                .layers(1);
            let world_framebuffer = unsafe {
                logical
                    .create_framebuffer(&world_info, None)
                    .map_err(RendererError::Api)?
            };
            self.world_framebuffers.push(world_framebuffer);

            let ui_attachments = [view];
            let ui_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.ui_renderpass.handle)
                .attachments(&ui_attachments)
                .width(self.framebuffer_width)
                .height(self.framebuffer_height)
                .layers(1);
            let ui_framebuffer = unsafe {
                logical
                    .create_framebuffer(&ui_info, None)
                    .map_err(RendererError::Api)?
            };
            self.swapchain.framebuffers.push(ui_framebuffer);
        }
        Ok(())
    }

    /// Full swapchain recreation. Returns `Ok(false)` when recreation is
    /// not possible yet (mid-recreate, or a zero-sized framebuffer).
    fn recreate_swapchain(&mut self) -> RendererResult<bool> {
        if self.recreating_swapchain {
            log::debug!("recreate_swapchain called while already recreating. Booting.");
            return Ok(false);
        }
        let (width, height) = self.resize.cached_size();
        if width == 0 || height == 0 {
            log::debug!("recreate_swapchain called with a zero dimension. Booting.");
            return Ok(false);
        }

        self.recreating_swapchain = true;
        unsafe {
            self.device
                .logical_device
                .device_wait_idle()
                .map_err(RendererError::Api)?;
        }

        // nothing is in flight after the wait
        for fence in &mut self.images_in_flight {
            *fence = vk::Fence::null();
        }

        // support may have changed since the last query
        self.device
            .query_swapchain_support(&self.surface_loader, self.surface)?;
        if !self.device.detect_depth_format(&self.instance) {
            self.recreating_swapchain = false;
            return Err(RendererError::InitializationFailed(
                "failed to re-detect a depth format".to_string(),
            ));
        }

        self.swapchain
            .recreate(&self.device, self.surface, width, height)?;

        self.framebuffer_width = width;
        self.framebuffer_height = height;
        self.world_renderpass.render_area = RenderArea {
            x: 0,
            y: 0,
            width,
            height,
        };
        self.ui_renderpass.render_area = RenderArea {
            x: 0,
            y: 0,
            width,
            height,
        };
        self.resize.sync();

        self.images_in_flight = vec![vk::Fence::null(); self.swapchain.images.len()];

        self.regenerate_framebuffers()?;
        self.create_command_buffers()?;

        self.recreating_swapchain = false;
        Ok(true)
    }

    fn upload_data_range(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        pool: vk::CommandPool,
        queue: vk::Queue,
        buffer: &mut VulkanBuffer,
        data: &[u8],
    ) -> RendererResult<u64> {
        let size = data.len() as u64;
        let offset = buffer.allocate(size)?;

        let mut staging = VulkanBuffer::create(
            device,
            memory_properties,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            true,
        )?;
        staging.load_data(device, 0, data)?;
        VulkanBuffer::copy_to(
            device,
            pool,
            queue,
            staging.handle,
            0,
            buffer.handle,
            offset,
            size,
        )?;
        staging.destroy(device);

        Ok(offset)
    }

    fn shader_state(&self, shader: &Shader) -> RendererResult<&VulkanShader> {
        shader
            .internal
            .and_then(|key| self.shaders.get(key))
            .ok_or_else(|| {
                RendererError::InvalidOperation(format!(
                    "shader '{}' has no backend state",
                    shader.name
                ))
            })
    }

    fn texture_image(
        &self,
        textures: &TextureSystem,
        texture_id: u32,
    ) -> RendererResult<&VulkanImage> {
        let texture = textures.get_or_default(texture_id);
        texture
            .internal
            .and_then(|key| self.textures.get(key))
            .ok_or_else(|| {
                RendererError::InvalidOperation(format!(
                    "texture '{}' has no GPU payload",
                    texture.name
                ))
            })
    }
}

impl RendererBackend for VulkanBackend {
    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        unsafe {
            let _ = self.device.logical_device.device_wait_idle();
        }

        // destroy in reverse creation order
        let shader_keys: Vec<ShaderKey> = self.shaders.keys().collect();
        for key in shader_keys {
            if let Some(mut state) = self.shaders.remove(key) {
                destroy_shader_state(&self.device.logical_device, &mut state);
            }
        }
        for (_, sampler) in self.samplers.drain() {
            unsafe {
                self.device.logical_device.destroy_sampler(sampler, None);
            }
        }
        let texture_keys: Vec<TextureKey> = self.textures.keys().collect();
        for key in texture_keys {
            if let Some(mut image) = self.textures.remove(key) {
                image.destroy(&self.device.logical_device);
            }
        }

        self.object_vertex_buffer.destroy(&self.device.logical_device);
        self.object_index_buffer.destroy(&self.device.logical_device);

        unsafe {
            let logical = &self.device.logical_device;
            for semaphore in self.image_available_semaphores.drain(..) {
                logical.destroy_semaphore(semaphore, None);
            }
            for semaphore in self.queue_complete_semaphores.drain(..) {
                logical.destroy_semaphore(semaphore, None);
            }
            for fence in self.in_flight_fences.drain(..) {
                logical.destroy_fence(fence, None);
            }
        }

        for mut buffer in self.graphics_command_buffers.drain(..) {
            buffer.free(
                &self.device.logical_device,
                self.device.graphics_command_pool,
            );
        }

        unsafe {
            for framebuffer in self.world_framebuffers.drain(..) {
                self.device
                    .logical_device
                    .destroy_framebuffer(framebuffer, None);
            }
        }

        self.ui_renderpass.destroy(&self.device.logical_device);
        self.world_renderpass.destroy(&self.device.logical_device);
        self.swapchain.destroy(&self.device);
        self.device.destroy();

        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }

    fn on_resized(&mut self, width: u32, height: u32) {
        self.resize.on_resized(width, height);
        log::info!(
            "Vulkan backend resized: w/h/gen: {}/{}/{}",
            width,
            height,
            self.resize.generation
        );
    }

    fn begin_frame(&mut self, delta_time: f32) -> RendererResult<bool> {
        self.frame_delta_time = delta_time;
        let logical = &self.device.logical_device;

        // mid-recreate: wait out the device and skip the frame
        if self.recreating_swapchain {
            unsafe {
                logical.device_wait_idle().map_err(RendererError::Api)?;
            }
            log::info!("Recreating swapchain, booting.");
            return Ok(false);
        }

        // a resize happened since the swapchain was built
        if self.resize.out_of_date() {
            unsafe {
                logical.device_wait_idle().map_err(RendererError::Api)?;
            }
            self.recreate_swapchain()?;
            log::info!("Resized, booting.");
            return Ok(false);
        }

        unsafe {
            self.device
                .logical_device
                .wait_for_fences(
                    &[self.in_flight_fences[self.current_frame as usize]],
                    true,
                    u64::MAX,
                )
                .map_err(RendererError::Api)?;
        }

        let Some(image_index) = self.swapchain.acquire_next_image_index(
            u64::MAX,
            self.image_available_semaphores[self.current_frame as usize],
            vk::Fence::null(),
        )?
        else {
            // out of date; recreate on the next pass through
            self.resize
                .on_resized(self.framebuffer_width, self.framebuffer_height);
            return Ok(false);
        };
        self.image_index = image_index;

        let command_buffer = &mut self.graphics_command_buffers[self.image_index as usize];
        command_buffer.reset();
        command_buffer.begin(&self.device.logical_device, false, false, false)?;

        // dynamic state, set every frame; the viewport is flipped so that
        // NDC matches the engine's y-up convention
        let viewport = vk::Viewport {
            x: 0.0,
            y: self.framebuffer_height as f32,
            width: self.framebuffer_width as f32,
            height: -(self.framebuffer_height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: self.framebuffer_width,
                height: self.framebuffer_height,
            },
        };
        unsafe {
            let handle = self.graphics_command_buffers[self.image_index as usize].handle;
            self.device
                .logical_device
                .cmd_set_viewport(handle, 0, &[viewport]);
            self.device
                .logical_device
                .cmd_set_scissor(handle, 0, &[scissor]);
        }

        self.world_renderpass.render_area.width = self.framebuffer_width;
        self.world_renderpass.render_area.height = self.framebuffer_height;
        self.ui_renderpass.render_area.width = self.framebuffer_width;
        self.ui_renderpass.render_area.height = self.framebuffer_height;

        Ok(true)
    }

    fn end_frame(&mut self, _delta_time: f32) -> RendererResult<()> {
        let image = self.image_index as usize;
        let frame = self.current_frame as usize;

        self.graphics_command_buffers[image].end(&self.device.logical_device)?;

        // the previous frame may still be using this image
        if self.images_in_flight[image] != vk::Fence::null() {
            unsafe {
                self.device
                    .logical_device
                    .wait_for_fences(&[self.images_in_flight[image]], true, u64::MAX)
                    .map_err(RendererError::Api)?;
            }
        }

        // mark the image as guarded by this frame's fence
        self.images_in_flight[image] = self.in_flight_fences[frame];
        unsafe {
            self.device
                .logical_device
                .reset_fences(&[self.in_flight_fences[frame]])
                .map_err(RendererError::Api)?;
        }

        let command_buffers = [self.graphics_command_buffers[image].handle];
        let wait_semaphores = [self.image_available_semaphores[frame]];
        let signal_semaphores = [self.queue_complete_semaphores[frame]];
        // one colour attachment write at a time per image
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .logical_device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    self.in_flight_fences[frame],
                )
                .map_err(RendererError::Api)?;
        }
        self.graphics_command_buffers[image].update_submitted();

        let presented = self.swapchain.present(
            self.device.present_queue,
            self.queue_complete_semaphores[frame],
            self.image_index,
        )?;
        if !presented {
            // out of date or suboptimal; rebuild before the next frame
            self.resize
                .on_resized(self.framebuffer_width, self.framebuffer_height);
        }

        self.current_frame =
            (self.current_frame + 1) % u32::from(self.swapchain.max_frames_in_flight);
        Ok(())
    }

    fn begin_renderpass(&mut self, pass: BuiltinRenderpass) -> RendererResult<()> {
        let image = self.image_index as usize;
        let command_buffer = &mut self.graphics_command_buffers[image];
        let (renderpass, framebuffer) = match pass {
            BuiltinRenderpass::World => (&self.world_renderpass, self.world_framebuffers[image]),
            BuiltinRenderpass::Ui => (&self.ui_renderpass, self.swapchain.framebuffers[image]),
        };
        renderpass.begin(&self.device.logical_device, command_buffer, framebuffer);
        Ok(())
    }

    fn end_renderpass(&mut self, pass: BuiltinRenderpass) -> RendererResult<()> {
        let image = self.image_index as usize;
        let command_buffer = &mut self.graphics_command_buffers[image];
        let renderpass = match pass {
            BuiltinRenderpass::World => &self.world_renderpass,
            BuiltinRenderpass::Ui => &self.ui_renderpass,
        };
        renderpass.end(&self.device.logical_device, command_buffer);
        Ok(())
    }

    fn draw_geometry(&mut self, geometry_internal_id: u32) {
        if geometry_internal_id == INVALID_ID {
            return;
        }
        let data = &self.geometries[geometry_internal_id as usize];
        if data.id == INVALID_ID {
            return;
        }
        let command_buffer = &self.graphics_command_buffers[self.image_index as usize];

        unsafe {
            self.device.logical_device.cmd_bind_vertex_buffers(
                command_buffer.handle,
                0,
                &[self.object_vertex_buffer.handle],
                &[data.vertex_buffer_offset],
            );

            if data.index_count > 0 {
                self.device.logical_device.cmd_bind_index_buffer(
                    command_buffer.handle,
                    self.object_index_buffer.handle,
                    data.index_buffer_offset,
                    vk::IndexType::UINT32,
                );
                self.device.logical_device.cmd_draw_indexed(
                    command_buffer.handle,
                    data.index_count,
                    1,
                    0,
                    0,
                    0,
                );
            } else {
                self.device.logical_device.cmd_draw(
                    command_buffer.handle,
                    data.vertex_count,
                    1,
                    0,
                    0,
                );
            }
        }
    }

    fn renderpass_id(&self, name: &str) -> Option<BuiltinRenderpass> {
        if name.eq_ignore_ascii_case(BUILTIN_RENDERPASS_WORLD_NAME) {
            Some(BuiltinRenderpass::World)
        } else if name.eq_ignore_ascii_case(BUILTIN_RENDERPASS_UI_NAME) {
            Some(BuiltinRenderpass::Ui)
        } else {
            None
        }
    }

    fn create_texture(&mut self, pixels: &[u8], texture: &mut Texture) -> RendererResult<()> {
        let image = VulkanImage::create(
            &self.device.logical_device,
            &self.device.memory,
            texture.width,
            texture.height,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            true,
            vk::ImageAspectFlags::COLOR,
        )?;

        // stage + copy + transition to shader-readable
        let logical = &self.device.logical_device;
        let mut staging = VulkanBuffer::create(
            logical,
            &self.device.memory,
            pixels.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            true,
        )?;
        staging.load_data(logical, 0, pixels)?;

        let pool = self.device.graphics_command_pool;
        let queue = self.device.graphics_queue;
        let mut temp = CommandBuffer::allocate_and_begin_single_use(logical, pool)?;
        image.transition_layout(
            logical,
            &temp,
            self.device.graphics_queue_index,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        image.copy_from_buffer(logical, staging.handle, &temp);
        image.transition_layout(
            logical,
            &temp,
            self.device.graphics_queue_index,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        temp.end_single_use(logical, pool, queue)?;
        staging.destroy(logical);

        texture.internal = Some(self.textures.insert(image));
        Ok(())
    }

    fn destroy_texture(&mut self, texture: &mut Texture) {
        unsafe {
            let _ = self.device.logical_device.device_wait_idle();
        }
        if let Some(key) = texture.internal.take() {
            if let Some(mut image) = self.textures.remove(key) {
                image.destroy(&self.device.logical_device);
            }
        }
    }

    fn texture_map_acquire_resources(&mut self, map: &mut TextureMap) -> RendererResult<()> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .min_filter(convert_filter_type(map.filter_minify))
            .mag_filter(convert_filter_type(map.filter_magnify))
            .address_mode_u(convert_repeat_type(map.repeat_u))
            .address_mode_v(convert_repeat_type(map.repeat_v))
            .address_mode_w(convert_repeat_type(map.repeat_w))
            .anisotropy_enable(true)
            .max_anisotropy(16.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = unsafe {
            self.device
                .logical_device
                .create_sampler(&sampler_info, None)
                .map_err(RendererError::Api)?
        };
        map.sampler = Some(self.samplers.insert(sampler));
        Ok(())
    }

    fn texture_map_release_resources(&mut self, map: &mut TextureMap) {
        if let Some(key) = map.sampler.take() {
            if let Some(sampler) = self.samplers.remove(key) {
                unsafe {
                    self.device.logical_device.destroy_sampler(sampler, None);
                }
            }
        }
    }

    fn create_geometry(
        &mut self,
        geometry: &mut Geometry,
        vertex_element_size: u32,
        vertex_count: u32,
        vertices: &[u8],
        indices: &[u32],
    ) -> RendererResult<()> {
        if vertex_count == 0 || vertices.is_empty() {
            return Err(RendererError::InvalidOperation(
                "create_geometry requires vertex data, and none was supplied".to_string(),
            ));
        }

        // re-uploads free the old ranges once the new data is in place
        let is_reupload = geometry.internal_id != INVALID_ID;
        let old_range = if is_reupload {
            Some(self.geometries[geometry.internal_id as usize])
        } else {
            let slot = self
                .geometries
                .iter()
                .position(|g| g.id == INVALID_ID)
                .ok_or_else(|| {
                    RendererError::ResourceShortage(
                        "no free slot for a new geometry upload".to_string(),
                    )
                })?;
            geometry.internal_id = slot as u32;
            self.geometries[slot].id = slot as u32;
            None
        };

        let pool = self.device.graphics_command_pool;
        let queue = self.device.graphics_queue;
        let slot = geometry.internal_id as usize;

        let vertex_buffer_offset = Self::upload_data_range(
            &self.device.logical_device,
            &self.device.memory,
            pool,
            queue,
            &mut self.object_vertex_buffer,
            vertices,
        )?;
        self.geometries[slot].vertex_count = vertex_count;
        self.geometries[slot].vertex_element_size = vertex_element_size;
        self.geometries[slot].vertex_buffer_offset = vertex_buffer_offset;

        if !indices.is_empty() {
            let index_bytes = bytemuck::cast_slice(indices);
            let index_buffer_offset = Self::upload_data_range(
                &self.device.logical_device,
                &self.device.memory,
                pool,
                queue,
                &mut self.object_index_buffer,
                index_bytes,
            )?;
            self.geometries[slot].index_count = indices.len() as u32;
            self.geometries[slot].index_element_size = std::mem::size_of::<u32>() as u32;
            self.geometries[slot].index_buffer_offset = index_buffer_offset;
        } else {
            self.geometries[slot].index_count = 0;
            self.geometries[slot].index_element_size = 0;
        }

        self.geometries[slot].generation = if self.geometries[slot].generation == INVALID_ID {
            0
        } else {
            self.geometries[slot].generation + 1
        };
        geometry.generation = self.geometries[slot].generation;

        if let Some(old) = old_range {
            self.object_vertex_buffer.free(
                u64::from(old.vertex_element_size) * u64::from(old.vertex_count),
                old.vertex_buffer_offset,
            );
            if old.index_element_size > 0 {
                self.object_index_buffer.free(
                    u64::from(old.index_element_size) * u64::from(old.index_count),
                    old.index_buffer_offset,
                );
            }
        }

        Ok(())
    }

    fn destroy_geometry(&mut self, geometry: &mut Geometry) {
        if geometry.internal_id == INVALID_ID {
            return;
        }
        unsafe {
            let _ = self.device.logical_device.device_wait_idle();
        }
        let slot = geometry.internal_id as usize;
        let data = self.geometries[slot];

        self.object_vertex_buffer.free(
            u64::from(data.vertex_element_size) * u64::from(data.vertex_count),
            data.vertex_buffer_offset,
        );
        if data.index_element_size > 0 {
            self.object_index_buffer.free(
                u64::from(data.index_element_size) * u64::from(data.index_count),
                data.index_buffer_offset,
            );
        }

        self.geometries[slot] = VulkanGeometryData::default();
        geometry.internal_id = INVALID_ID;
        geometry.generation = INVALID_ID;
    }

    fn shader_create(
        &mut self,
        shader: &mut Shader,
        renderpass: BuiltinRenderpass,
        stages: &[ShaderStage],
        stage_filenames: &[String],
    ) -> RendererResult<()> {
        let mut state = VulkanShader::new(renderpass);

        for (stage, file_name) in stages.iter().zip(stage_filenames.iter()) {
            if state.stage_configs.len() >= VULKAN_SHADER_MAX_STAGES {
                return Err(RendererError::InvalidOperation(format!(
                    "shaders may have a maximum of {VULKAN_SHADER_MAX_STAGES} stages"
                )));
            }
            let stage_flag = match stage {
                ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
                ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
                ShaderStage::Geometry | ShaderStage::Compute => {
                    log::error!("shader_create: unsupported shader stage {stage:?}. Stage ignored.");
                    continue;
                }
            };
            state.stage_configs.push(VulkanShaderStageConfig {
                stage: stage_flag,
                file_name: file_name.clone(),
            });
        }

        // global set: the UBO binding always exists and comes first
        let mut global_set = DescriptorSetConfig::default();
        global_set.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(BINDING_INDEX_UBO)
                .descriptor_count(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
                .build(),
        );
        state.descriptor_set_configs.push(global_set);

        if shader.use_instances {
            let mut instance_set = DescriptorSetConfig::default();
            instance_set.bindings.push(
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(BINDING_INDEX_UBO)
                    .descriptor_count(1)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
                    .build(),
            );
            state.descriptor_set_configs.push(instance_set);
        }

        shader.internal = Some(self.shaders.insert(state));
        Ok(())
    }

    fn shader_destroy(&mut self, shader: &mut Shader) {
        if let Some(key) = shader.internal.take() {
            if let Some(mut state) = self.shaders.remove(key) {
                destroy_shader_state(&self.device.logical_device, &mut state);
            }
        }
    }

    fn shader_initialize(
        &mut self,
        shader: &mut Shader,
        resources: &ResourceSystem,
    ) -> RendererResult<()> {
        let key = shader.internal.ok_or_else(|| {
            RendererError::InvalidOperation("shader_initialize before shader_create".to_string())
        })?;

        // stage modules, read through the resource system
        let mut stages: Vec<VulkanShaderStage> = Vec::new();
        for config in &self.shaders[key].stage_configs.clone() {
            let resource = resources.load(&config.file_name, ResourceType::Binary)?;
            let bytes = resource.as_binary().ok_or_else(|| {
                RendererError::InvalidOperation(format!(
                    "binary loader returned a non-binary payload for '{}'",
                    config.file_name
                ))
            })?;
            let (prefix, code, suffix) = unsafe { bytes.align_to::<u32>() };
            if !prefix.is_empty() || !suffix.is_empty() {
                return Err(RendererError::InvalidOperation(format!(
                    "SPIR-V binary '{}' is not 4-byte aligned",
                    config.file_name
                )));
            }
            let module_info = vk::ShaderModuleCreateInfo::builder().code(code);
            let module = unsafe {
                self.device
                    .logical_device
                    .create_shader_module(&module_info, None)
                    .map_err(RendererError::Api)?
            };
            stages.push(VulkanShaderStage {
                module,
                stage: config.stage,
            });
            resources.unload(resource);
        }
        self.shaders[key].stages = stages;

        // attribute descriptions: location = registration order
        let mut attributes: Vec<vk::VertexInputAttributeDescription> = Vec::new();
        let mut offset = 0u32;
        for (location, attribute) in shader.attributes.iter().enumerate() {
            attributes.push(vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: 0,
                format: attribute_format(attribute.attribute_type),
                offset,
            });
            offset += attribute.size;
        }

        // sampler uniforms add (or extend) the sampler binding of their set
        for uniform in &shader.uniforms {
            if uniform.uniform_type != ShaderUniformType::Sampler {
                continue;
            }
            let set_index = if uniform.scope == ShaderScope::Global {
                DESC_SET_INDEX_GLOBAL
            } else {
                DESC_SET_INDEX_INSTANCE
            };
            let set_config = &mut self.shaders[key].descriptor_set_configs[set_index];
            if set_config.bindings.len() < 2 {
                set_config.bindings.push(
                    vk::DescriptorSetLayoutBinding::builder()
                        .binding(BINDING_INDEX_SAMPLER)
                        .descriptor_count(1)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .stage_flags(
                            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                        )
                        .build(),
                );
            } else {
                set_config.bindings[BINDING_INDEX_SAMPLER as usize].descriptor_count += 1;
            }
        }

        // descriptor pool with freeable sets
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&self.shaders[key].pool_sizes)
            .max_sets(self.shaders[key].max_descriptor_set_count)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        let descriptor_pool = unsafe {
            self.device
                .logical_device
                .create_descriptor_pool(&pool_info, None)
                .map_err(RendererError::Api)?
        };
        self.shaders[key].descriptor_pool = descriptor_pool;

        // one layout per configured set
        let mut layouts = Vec::new();
        for set_config in &self.shaders[key].descriptor_set_configs {
            let layout_info =
                vk::DescriptorSetLayoutCreateInfo::builder().bindings(&set_config.bindings);
            let layout = unsafe {
                self.device
                    .logical_device
                    .create_descriptor_set_layout(&layout_info, None)
                    .map_err(RendererError::Api)?
            };
            layouts.push(layout);
        }
        self.shaders[key].descriptor_set_layouts = layouts;

        let viewport = vk::Viewport {
            x: 0.0,
            y: self.framebuffer_height as f32,
            width: self.framebuffer_width as f32,
            height: -(self.framebuffer_height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: self.framebuffer_width,
                height: self.framebuffer_height,
            },
        };

        let entry_point = CStr::from_bytes_with_nul(SHADER_ENTRY_POINT).unwrap();
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = self.shaders[key]
            .stages
            .iter()
            .map(|stage| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.stage)
                    .module(stage.module)
                    .name(entry_point)
                    .build()
            })
            .collect();

        let renderpass_handle = match self.shaders[key].renderpass {
            BuiltinRenderpass::World => self.world_renderpass.handle,
            BuiltinRenderpass::Ui => self.ui_renderpass.handle,
        };
        let depth_test = self.shaders[key].renderpass == BuiltinRenderpass::World;

        let pipeline = Pipeline::create(
            &self.device.logical_device,
            renderpass_handle,
            u32::from(shader.attribute_stride),
            &attributes,
            &self.shaders[key].descriptor_set_layouts,
            &stage_infos,
            viewport,
            scissor,
            false,
            depth_test,
            &shader.push_constant_ranges,
        )?;
        self.shaders[key].pipeline = pipeline;

        // the UBO layout follows device alignment requirements
        shader.required_ubo_alignment =
            self.device.properties.limits.min_uniform_buffer_offset_alignment;
        shader.global_ubo_stride = get_aligned(shader.global_ubo_size, shader.required_ubo_alignment);
        shader.ubo_stride = get_aligned(shader.ubo_size, shader.required_ubo_alignment);

        let device_local_bits = if self.device.supports_device_local_host_visible {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        } else {
            vk::MemoryPropertyFlags::empty()
        };
        let total_buffer_size =
            shader.global_ubo_stride + shader.ubo_stride * VULKAN_MAX_MATERIAL_COUNT;
        let mut uniform_buffer = VulkanBuffer::create(
            &self.device.logical_device,
            &self.device.memory,
            total_buffer_size,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | device_local_bits,
            true,
        )?;

        // global UBO region occupies the stride space up front
        shader.global_ubo_offset = uniform_buffer.allocate(shader.global_ubo_stride)?;

        let mapped = uniform_buffer
            .lock_memory(&self.device.logical_device, 0, vk::WHOLE_SIZE)?
            .cast::<u8>();
        self.shaders[key].mapped_uniform_buffer = mapped;
        self.shaders[key].uniform_buffer = Some(uniform_buffer);

        // one global descriptor set per in-flight image
        let global_layouts =
            [self.shaders[key].descriptor_set_layouts[DESC_SET_INDEX_GLOBAL]; IMAGE_SET_COUNT];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.shaders[key].descriptor_pool)
            .set_layouts(&global_layouts);
        let sets = unsafe {
            self.device
                .logical_device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(RendererError::Api)?
        };
        self.shaders[key]
            .global_descriptor_sets
            .copy_from_slice(&sets);

        Ok(())
    }

    fn shader_use(&mut self, shader: &Shader) -> RendererResult<()> {
        let state = self.shader_state(shader)?;
        state.pipeline.bind(
            &self.device.logical_device,
            &self.graphics_command_buffers[self.image_index as usize],
            vk::PipelineBindPoint::GRAPHICS,
        );
        Ok(())
    }

    fn shader_bind_globals(&mut self, shader: &mut Shader) -> RendererResult<()> {
        shader.bound_ubo_offset = shader.global_ubo_offset;
        Ok(())
    }

    fn shader_bind_instance(
        &mut self,
        shader: &mut Shader,
        instance_id: u32,
    ) -> RendererResult<()> {
        let state = self.shader_state(shader)?;
        let instance_state = state
            .instance_states
            .get(instance_id as usize)
            .filter(|s| s.id != INVALID_ID)
            .ok_or_else(|| {
                RendererError::InvalidOperation(format!(
                    "shader '{}' has no instance {instance_id}",
                    shader.name
                ))
            })?;
        shader.bound_instance_id = instance_id;
        shader.bound_ubo_offset = instance_state.offset;
        Ok(())
    }

    fn shader_apply_globals(
        &mut self,
        shader: &Shader,
        textures: &TextureSystem,
    ) -> RendererResult<()> {
        let key = shader.internal.ok_or_else(|| {
            RendererError::InvalidOperation("shader has no backend state".to_string())
        })?;
        let image = self.image_index as usize;
        let state = &self.shaders[key];
        let Some(uniform_buffer) = state.uniform_buffer.as_ref() else {
            return Err(RendererError::InvalidOperation(
                "shader is not initialized".to_string(),
            ));
        };
        let global_set = state.global_descriptor_sets[image];

        let buffer_info = vk::DescriptorBufferInfo {
            buffer: uniform_buffer.handle,
            offset: shader.global_ubo_offset,
            range: shader.global_ubo_stride,
        };
        let buffer_infos = [buffer_info];

        let mut writes: Vec<vk::WriteDescriptorSet> = vec![vk::WriteDescriptorSet::builder()
            .dst_set(global_set)
            .dst_binding(BINDING_INDEX_UBO)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_infos)
            .build()];

        // sampler descriptors, when the shader declares global samplers
        let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::new();
        if state.descriptor_set_configs[DESC_SET_INDEX_GLOBAL].bindings.len() > 1 {
            for map in &shader.global_texture_maps {
                let vulkan_image = self.texture_image(textures, map.texture)?;
                let sampler = map
                    .sampler
                    .and_then(|k| self.samplers.get(k))
                    .copied()
                    .ok_or_else(|| {
                        RendererError::InvalidOperation(
                            "global texture map has no sampler".to_string(),
                        )
                    })?;
                image_infos.push(vk::DescriptorImageInfo {
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    image_view: vulkan_image.view,
                    sampler,
                });
            }
            if !image_infos.is_empty() {
                writes.push(
                    vk::WriteDescriptorSet::builder()
                        .dst_set(global_set)
                        .dst_binding(BINDING_INDEX_SAMPLER)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(&image_infos)
                        .build(),
                );
            }
        }

        unsafe {
            self.device.logical_device.update_descriptor_sets(&writes, &[]);
            self.device.logical_device.cmd_bind_descriptor_sets(
                self.graphics_command_buffers[image].handle,
                vk::PipelineBindPoint::GRAPHICS,
                state.pipeline.layout,
                0,
                &[global_set],
                &[],
            );
        }
        Ok(())
    }

    fn shader_apply_instance(
        &mut self,
        shader: &Shader,
        needs_update: bool,
        textures: &TextureSystem,
    ) -> RendererResult<()> {
        if !shader.use_instances {
            return Err(RendererError::InvalidOperation(format!(
                "shader '{}' does not use instances",
                shader.name
            )));
        }
        let key = shader.internal.ok_or_else(|| {
            RendererError::InvalidOperation("shader has no backend state".to_string())
        })?;
        let image = self.image_index as usize;

        // resolve descriptor writes from disjoint borrows of the payload
        // stores before mutating the instance state
        let instance_id = shader.bound_instance_id as usize;
        let state = &self.shaders[key];
        let Some(uniform_buffer) = state.uniform_buffer.as_ref() else {
            return Err(RendererError::InvalidOperation(
                "shader is not initialized".to_string(),
            ));
        };
        let uniform_buffer_handle = uniform_buffer.handle;
        let pipeline_layout = state.pipeline.layout;
        let instance_state = &state.instance_states[instance_id];
        let object_set = instance_state.descriptor_set_state.descriptor_sets[image];

        let mut ubo_write_needed = false;
        let mut sampler_updates: Vec<(vk::DescriptorImageInfo, u32, u32)> = Vec::new();
        let mut any_sampler_stale = false;

        if needs_update {
            // descriptor 0: the instance UBO, written once per set
            let ubo_generation = instance_state.descriptor_set_state.descriptor_states
                [BINDING_INDEX_UBO as usize]
                .generations[image];
            ubo_write_needed = ubo_generation == INVALID_ID;

            // descriptor 1: samplers, re-written when a map's texture
            // generation has advanced
            if state.descriptor_set_configs.len() > DESC_SET_INDEX_INSTANCE
                && state.descriptor_set_configs[DESC_SET_INDEX_INSTANCE].bindings.len() > 1
            {
                let sampler_states = &instance_state.descriptor_set_state.descriptor_states
                    [BINDING_INDEX_SAMPLER as usize];
                for map in &instance_state.instance_texture_maps {
                    let texture = textures.get_or_default(map.texture);
                    let vulkan_image = self.texture_image(textures, map.texture)?;
                    let sampler = map
                        .sampler
                        .and_then(|k| self.samplers.get(k))
                        .copied()
                        .ok_or_else(|| {
                            RendererError::InvalidOperation(
                                "instance texture map has no sampler".to_string(),
                            )
                        })?;

                    // the whole binding is written as one array, but only
                    // when at least one entry's stamp is out of date
                    let stale = sampler_states.generations[image] == INVALID_ID
                        || sampler_states.ids[image] != texture.id
                        || (texture.generation != INVALID_ID
                            && sampler_states.generations[image] != texture.generation);
                    if stale {
                        any_sampler_stale = true;
                    }
                    sampler_updates.push((
                        vk::DescriptorImageInfo {
                            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                            image_view: vulkan_image.view,
                            sampler,
                        },
                        texture.generation,
                        texture.id,
                    ));
                }
            }
        }

        let ubo_range = shader.ubo_stride;
        let ubo_offset = self.shaders[key].instance_states[instance_id].offset;

        let mut writes: Vec<vk::WriteDescriptorSet> = Vec::with_capacity(2);
        let buffer_infos = [vk::DescriptorBufferInfo {
            buffer: uniform_buffer_handle,
            offset: ubo_offset,
            range: ubo_range,
        }];
        if ubo_write_needed {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(object_set)
                    .dst_binding(BINDING_INDEX_UBO)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_infos)
                    .build(),
            );
        }
        let image_infos: Vec<vk::DescriptorImageInfo> =
            sampler_updates.iter().map(|(info, _, _)| *info).collect();
        if any_sampler_stale && !image_infos.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(object_set)
                    .dst_binding(BINDING_INDEX_SAMPLER)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_infos)
                    .build(),
            );
        }

        if !writes.is_empty() {
            unsafe {
                self.device.logical_device.update_descriptor_sets(&writes, &[]);
            }
        }

        // stamp generations after a successful update
        let instance_state = &mut self.shaders[key].instance_states[instance_id];
        if ubo_write_needed {
            instance_state.descriptor_set_state.descriptor_states[BINDING_INDEX_UBO as usize]
                .generations[image] = 1;
        }
        if any_sampler_stale {
            let sampler_states = &mut instance_state.descriptor_set_state.descriptor_states
                [BINDING_INDEX_SAMPLER as usize];
            if let Some(&(_, generation, id)) = sampler_updates.first() {
                sampler_states.generations[image] = if generation == INVALID_ID {
                    // default textures never advance; keep re-writing
                    INVALID_ID
                } else {
                    generation
                };
                sampler_states.ids[image] = id;
            }
        }

        unsafe {
            self.device.logical_device.cmd_bind_descriptor_sets(
                self.graphics_command_buffers[image].handle,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline_layout,
                1,
                &[object_set],
                &[],
            );
        }
        Ok(())
    }

    fn shader_set_uniform(
        &mut self,
        shader: &Shader,
        uniform: &ShaderUniform,
        value: &[u8],
    ) -> RendererResult<()> {
        let state = self.shader_state(shader)?;
        if uniform.scope == ShaderScope::Local {
            // push constants are recorded immediately
            let command_buffer = &self.graphics_command_buffers[self.image_index as usize];
            unsafe {
                self.device.logical_device.cmd_push_constants(
                    command_buffer.handle,
                    state.pipeline.layout,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    uniform.offset as u32,
                    &value[..uniform.size as usize],
                );
            }
        } else {
            if state.mapped_uniform_buffer.is_null() {
                return Err(RendererError::InvalidOperation(
                    "shader uniform buffer is not mapped".to_string(),
                ));
            }
            unsafe {
                let dst = state
                    .mapped_uniform_buffer
                    .add((shader.bound_ubo_offset + uniform.offset) as usize);
                std::ptr::copy_nonoverlapping(
                    value.as_ptr(),
                    dst,
                    (uniform.size as usize).min(value.len()),
                );
            }
        }
        Ok(())
    }

    fn shader_set_instance_sampler(
        &mut self,
        shader: &Shader,
        location: u16,
        map: &TextureMap,
    ) -> RendererResult<()> {
        let key = shader.internal.ok_or_else(|| {
            RendererError::InvalidOperation("shader has no backend state".to_string())
        })?;
        let instance_id = shader.bound_instance_id as usize;
        let instance_state = &mut self.shaders[key].instance_states[instance_id];
        let slot = instance_state
            .instance_texture_maps
            .get_mut(location as usize)
            .ok_or_else(|| {
                RendererError::InvalidOperation(format!(
                    "instance sampler location {location} out of range"
                ))
            })?;
        *slot = map.clone();
        Ok(())
    }

    fn shader_acquire_instance_resources(
        &mut self,
        shader: &Shader,
        maps: &[TextureMap],
    ) -> RendererResult<u32> {
        let key = shader.internal.ok_or_else(|| {
            RendererError::InvalidOperation("shader has no backend state".to_string())
        })?;
        let state = &mut self.shaders[key];

        let instance_id = state
            .instance_states
            .iter()
            .position(|s| s.id == INVALID_ID)
            .ok_or_else(|| {
                RendererError::ResourceShortage(
                    "failed to acquire a new shader instance id".to_string(),
                )
            })? as u32;

        let binding_count = state.descriptor_set_configs[DESC_SET_INDEX_INSTANCE]
            .bindings
            .len();
        let instance_texture_count = usize::from(shader.instance_texture_count);

        let Some(uniform_buffer) = state.uniform_buffer.as_mut() else {
            return Err(RendererError::InvalidOperation(
                "shader is not initialized".to_string(),
            ));
        };
        // space for the instance UBO comes out of the shared buffer, by
        // stride rather than by size
        let offset = uniform_buffer.allocate(shader.ubo_stride)?;

        let instance_state = &mut state.instance_states[instance_id as usize];
        instance_state.id = instance_id;
        instance_state.offset = offset;

        // copy map configs; unassigned textures fall back to the default
        instance_state.instance_texture_maps = maps
            .iter()
            .take(instance_texture_count)
            .cloned()
            .collect();
        instance_state
            .instance_texture_maps
            .resize_with(instance_texture_count, TextureMap::diffuse_default);

        instance_state.descriptor_set_state.descriptor_states =
            vec![VulkanDescriptorState::default(); binding_count];

        let layouts =
            [state.descriptor_set_layouts[DESC_SET_INDEX_INSTANCE]; IMAGE_SET_COUNT];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(state.descriptor_pool)
            .set_layouts(&layouts);
        let sets = unsafe {
            self.device
                .logical_device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(RendererError::Api)?
        };
        state.instance_states[instance_id as usize]
            .descriptor_set_state
            .descriptor_sets
            .copy_from_slice(&sets);

        Ok(instance_id)
    }

    fn shader_release_instance_resources(
        &mut self,
        shader: &Shader,
        instance_id: u32,
    ) -> RendererResult<()> {
        let key = shader.internal.ok_or_else(|| {
            RendererError::InvalidOperation("shader has no backend state".to_string())
        })?;

        // pending work may still reference the descriptor sets
        unsafe {
            self.device
                .logical_device
                .device_wait_idle()
                .map_err(RendererError::Api)?;
        }

        let state = &mut self.shaders[key];
        let instance_state = &mut state.instance_states[instance_id as usize];

        unsafe {
            self.device
                .logical_device
                .free_descriptor_sets(
                    state.descriptor_pool,
                    &instance_state.descriptor_set_state.descriptor_sets,
                )
                .map_err(RendererError::Api)?;
        }

        instance_state.descriptor_set_state.descriptor_states.clear();
        instance_state.instance_texture_maps.clear();

        let offset = instance_state.offset;
        instance_state.id = INVALID_ID;
        instance_state.offset = 0;

        if let Some(uniform_buffer) = state.uniform_buffer.as_mut() {
            uniform_buffer.free(shader.ubo_stride, offset);
        }
        Ok(())
    }

    fn wait_idle(&self) -> RendererResult<()> {
        unsafe {
            self.device
                .logical_device
                .device_wait_idle()
                .map_err(RendererError::Api)
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn destroy_shader_state(device: &ash::Device, state: &mut VulkanShader) {
    unsafe {
        for layout in state.descriptor_set_layouts.drain(..) {
            device.destroy_descriptor_set_layout(layout, None);
        }
        if state.descriptor_pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(state.descriptor_pool, None);
            state.descriptor_pool = vk::DescriptorPool::null();
        }
    }

    if let Some(mut uniform_buffer) = state.uniform_buffer.take() {
        if !state.mapped_uniform_buffer.is_null() {
            uniform_buffer.unlock_memory(device);
            state.mapped_uniform_buffer = std::ptr::null_mut();
        }
        uniform_buffer.destroy(device);
    }

    state.pipeline.destroy(device);

    unsafe {
        for stage in state.stages.drain(..) {
            device.destroy_shader_module(stage.module, None);
        }
    }
}

unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        std::borrow::Cow::from("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("{message}");
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("{message}");
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::info!("{message}");
    } else {
        log::trace!("{message}");
    }
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_tracker_starts_in_sync() {
        let tracker = ResizeTracker::default();
        assert!(!tracker.out_of_date());
    }

    #[test]
    fn test_resize_marks_out_of_date_until_synced() {
        let mut tracker = ResizeTracker::default();
        tracker.on_resized(1280, 720);
        assert!(tracker.out_of_date());
        assert_eq!(tracker.cached_size(), (1280, 720));

        tracker.sync();
        assert!(!tracker.out_of_date());
        assert_eq!(tracker.cached_size(), (0, 0));
    }

    #[test]
    fn test_latest_resize_wins() {
        let mut tracker = ResizeTracker::default();
        tracker.on_resized(100, 100);
        tracker.on_resized(0, 50);
        // zero dimension stays pending; recreation refuses it until a
        // non-zero size arrives
        assert!(tracker.out_of_date());
        assert_eq!(tracker.cached_size(), (0, 50));

        tracker.on_resized(800, 600);
        assert_eq!(tracker.cached_size(), (800, 600));
    }
}

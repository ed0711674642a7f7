//! Backend abstraction for the rendering system
//!
//! The renderer frontend is API-agnostic and dispatches through
//! [`RendererBackend`], the trait-object rendition of the backend function
//! table. Currently one implementation exists
//! ([`VulkanBackend`](super::vulkan::VulkanBackend)).

use ash::vk;
use thiserror::Error;

use super::types::{
    BuiltinRenderpass, Geometry, Shader, ShaderStage, ShaderUniform, Texture, TextureMap,
};
use crate::resources::ResourceError;
use crate::systems::resource_system::ResourceSystem;
use crate::systems::texture_system::TextureSystem;

/// Renderer error type shared by the frontend and all backends.
#[derive(Error, Debug)]
pub enum RendererError {
    /// A raw Vulkan API error.
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Backend initialization failed.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type satisfies the requested property flags.
    #[error("no suitable memory type found")]
    NoSuitableMemoryType,

    /// A fixed-capacity pool has no free slot, or a sub-allocation could
    /// not be served.
    #[error("resource shortage: {0}")]
    ResourceShortage(String),

    /// The operation is invalid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A resource-system failure surfaced through the renderer.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Result type for renderer operations.
pub type RendererResult<T> = Result<T, RendererError>;

/// The backend function table.
///
/// Frame-skip conditions (window mid-resize, swapchain out of date) are not
/// errors: `begin_frame` returns `Ok(false)` and the caller drops the
/// frame. `Err` always means a failed device call.
pub trait RendererBackend {
    /// Releases every GPU object in reverse creation order. Called once
    /// from the frontend before drop.
    fn shutdown(&mut self);

    /// Notifies the backend of a new framebuffer size.
    fn on_resized(&mut self, width: u32, height: u32);

    /// Starts a frame: waits for the frame fence, acquires a swapchain
    /// image, begins command recording and sets dynamic viewport/scissor.
    /// Returns `Ok(false)` when the frame should be skipped.
    fn begin_frame(&mut self, delta_time: f32) -> RendererResult<bool>;

    /// Ends a frame: submits the command buffer and presents.
    fn end_frame(&mut self, delta_time: f32) -> RendererResult<()>;

    /// Begins recording one of the built-in renderpasses.
    fn begin_renderpass(&mut self, pass: BuiltinRenderpass) -> RendererResult<()>;

    /// Ends the given renderpass.
    fn end_renderpass(&mut self, pass: BuiltinRenderpass) -> RendererResult<()>;

    /// Records a draw for the geometry stored at `geometry_internal_id`.
    fn draw_geometry(&mut self, geometry_internal_id: u32);

    /// Resolves a renderpass by registered name.
    fn renderpass_id(&self, name: &str) -> Option<BuiltinRenderpass>;

    // --- textures ---------------------------------------------------------

    /// Uploads `pixels` as a GPU texture and records the payload handle on
    /// `texture`.
    fn create_texture(&mut self, pixels: &[u8], texture: &mut Texture) -> RendererResult<()>;

    /// Destroys the GPU payload of `texture`, if any.
    fn destroy_texture(&mut self, texture: &mut Texture);

    /// Creates a sampler matching the map's filter/repeat settings.
    fn texture_map_acquire_resources(&mut self, map: &mut TextureMap) -> RendererResult<()>;

    /// Destroys the map's sampler, if any.
    fn texture_map_release_resources(&mut self, map: &mut TextureMap);

    // --- geometry ---------------------------------------------------------

    /// Uploads vertex (raw bytes, `vertex_element_size` apart) and index
    /// data into the shared buffers, recording offsets on the backend slot
    /// referenced by `geometry.internal_id`. Re-uploads free the old
    /// ranges after the new ones are in place.
    fn create_geometry(
        &mut self,
        geometry: &mut Geometry,
        vertex_element_size: u32,
        vertex_count: u32,
        vertices: &[u8],
        indices: &[u32],
    ) -> RendererResult<()>;

    /// Frees the geometry's buffer ranges and invalidates its backend slot.
    fn destroy_geometry(&mut self, geometry: &mut Geometry);

    // --- shaders ----------------------------------------------------------

    /// Allocates backend shader state and records stage configuration.
    fn shader_create(
        &mut self,
        shader: &mut Shader,
        renderpass: BuiltinRenderpass,
        stages: &[ShaderStage],
        stage_filenames: &[String],
    ) -> RendererResult<()>;

    /// Destroys all backend state of the shader.
    fn shader_destroy(&mut self, shader: &mut Shader);

    /// Materializes modules, descriptor layouts, pool, pipeline and the
    /// uniform buffer. Reads SPIR-V binaries through `resources`.
    fn shader_initialize(
        &mut self,
        shader: &mut Shader,
        resources: &ResourceSystem,
    ) -> RendererResult<()>;

    /// Binds the shader's pipeline.
    fn shader_use(&mut self, shader: &Shader) -> RendererResult<()>;

    /// Points the bound UBO offset at the global region.
    fn shader_bind_globals(&mut self, shader: &mut Shader) -> RendererResult<()>;

    /// Points the bound UBO offset at `instance_id`'s region.
    fn shader_bind_instance(&mut self, shader: &mut Shader, instance_id: u32)
        -> RendererResult<()>;

    /// Writes + binds the global descriptor set for the current image.
    fn shader_apply_globals(
        &mut self,
        shader: &Shader,
        textures: &TextureSystem,
    ) -> RendererResult<()>;

    /// Conditionally rewrites and binds the bound instance's descriptor
    /// set for the current image, gated by per-image generations.
    fn shader_apply_instance(
        &mut self,
        shader: &Shader,
        needs_update: bool,
        textures: &TextureSystem,
    ) -> RendererResult<()>;

    /// Routes a non-sampler uniform value: local scope issues a push
    /// constant immediately, global/instance scope copies into the mapped
    /// uniform buffer at `bound_ubo_offset + uniform.offset`.
    fn shader_set_uniform(
        &mut self,
        shader: &Shader,
        uniform: &ShaderUniform,
        value: &[u8],
    ) -> RendererResult<()>;

    /// Stores a texture map into the bound instance's sampler slot.
    fn shader_set_instance_sampler(
        &mut self,
        shader: &Shader,
        location: u16,
        map: &TextureMap,
    ) -> RendererResult<()>;

    /// Reserves an instance slot: copies map configs, allocates UBO space
    /// and per-image descriptor sets, and invalidates descriptor
    /// generations. Returns the instance id.
    fn shader_acquire_instance_resources(
        &mut self,
        shader: &Shader,
        maps: &[TextureMap],
    ) -> RendererResult<u32>;

    /// Frees an instance slot. Waits for the device to go idle first so
    /// in-use descriptor sets are never destroyed.
    fn shader_release_instance_resources(
        &mut self,
        shader: &Shader,
        instance_id: u32,
    ) -> RendererResult<()>;

    // --- misc -------------------------------------------------------------

    /// Blocks until the device is idle.
    fn wait_idle(&self) -> RendererResult<()>;
}

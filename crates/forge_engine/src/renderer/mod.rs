//! Renderer frontend
//!
//! An API-agnostic facade over the backend function table. Holds the world
//! projection/view, the UI orthographic projection, and the frame counter;
//! `draw_frame` runs the world pass followed by the UI pass and presents.

pub mod backend;
pub mod types;
pub mod vulkan;

#[cfg(test)]
pub(crate) mod test_support;

use crate::foundation::math::{deg_to_rad, Mat4, Mat4Ext, Vec3};
use crate::platform::Platform;
use crate::systems::geometry_system::GeometrySystem;
use crate::systems::material_system::MaterialSystem;
use crate::systems::resource_system::ResourceSystem;
use crate::systems::shader_system::ShaderSystem;
use crate::systems::texture_system::TextureSystem;

use backend::{RendererBackend, RendererResult};
use types::{
    BuiltinRenderpass, Geometry, Shader, ShaderStage, ShaderUniform, Texture, TextureMap,
};

pub use types::{GeometryRenderData, RenderPacket};

/// The renderer frontend.
pub struct Renderer {
    backend: Box<dyn RendererBackend>,

    projection: Mat4,
    view: Mat4,
    near_clip: f32,
    far_clip: f32,

    ui_projection: Mat4,
    ui_view: Mat4,

    frame_number: u64,
    framebuffer_width: u32,
    framebuffer_height: u32,
}

impl Renderer {
    /// Creates the renderer over a Vulkan backend bound to the platform
    /// window.
    pub fn new(
        platform: &mut Platform,
        application_name: &str,
        width: u32,
        height: u32,
    ) -> RendererResult<Self> {
        let backend = Box::new(vulkan::VulkanBackend::new(platform, application_name)?);
        Ok(Self::from_backend(backend, width, height))
    }

    /// Wraps an existing backend. Used internally and by tests.
    pub(crate) fn from_backend(
        backend: Box<dyn RendererBackend>,
        width: u32,
        height: u32,
    ) -> Self {
        let near_clip = 0.1;
        let far_clip = 1000.0;
        let aspect = width as f32 / height as f32;

        let view = Mat4::translation(Vec3::new(0.0, 0.0, 30.0)).inverse_or_identity();

        Self {
            backend,
            projection: Mat4::perspective(deg_to_rad(45.0), aspect, near_clip, far_clip),
            view,
            near_clip,
            far_clip,
            ui_projection: Mat4::orthographic(
                0.0,
                width as f32,
                height as f32,
                0.0,
                -100.0,
                100.0,
            ),
            ui_view: Mat4::identity(),
            frame_number: 0,
            framebuffer_width: width,
            framebuffer_height: height,
        }
    }

    /// Shuts the backend down, destroying every GPU object.
    pub fn shutdown(&mut self) {
        self.backend.shutdown();
    }

    /// Handles a framebuffer resize: re-derives both projections and
    /// notifies the backend.
    pub fn on_resized(&mut self, width: u32, height: u32) {
        self.framebuffer_width = width;
        self.framebuffer_height = height;
        let aspect = width as f32 / height as f32;
        self.projection =
            Mat4::perspective(deg_to_rad(45.0), aspect, self.near_clip, self.far_clip);
        self.ui_projection =
            Mat4::orthographic(0.0, width as f32, height as f32, 0.0, -100.0, 100.0);
        self.backend.on_resized(width, height);
    }

    /// Replaces the world view matrix.
    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    /// The number of successfully completed frames.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Draws a full frame from `packet`: world pass, then UI pass. A
    /// skipped frame (resize in progress) returns successfully without
    /// rendering.
    pub fn draw_frame(
        &mut self,
        packet: &RenderPacket,
        shaders: &mut ShaderSystem,
        materials: &mut MaterialSystem,
        geometries: &GeometrySystem,
        textures: &TextureSystem,
    ) -> RendererResult<()> {
        if !self.backend.begin_frame(packet.delta_time)? {
            return Ok(());
        }

        let frame_number = self.frame_number;
        let projection = self.projection;
        let view = self.view;
        let ui_projection = self.ui_projection;
        let ui_view = self.ui_view;

        // world pass
        self.backend.begin_renderpass(BuiltinRenderpass::World)?;
        shaders.use_by_id(materials.material_shader_id(), self)?;
        shaders.set_uniform_mat4("projection", &projection, self)?;
        shaders.set_uniform_mat4("view", &view, self)?;
        shaders.apply_global(self, textures)?;

        for render_data in &packet.geometries {
            let Some(geometry) = geometries.get(render_data.geometry) else {
                continue;
            };
            let internal_id = geometry.internal_id;
            materials.apply(geometry.material, shaders, self, textures, frame_number)?;
            shaders.set_uniform_mat4("model", &render_data.model, self)?;
            self.backend.draw_geometry(internal_id);
        }
        self.backend.end_renderpass(BuiltinRenderpass::World)?;

        // UI pass
        self.backend.begin_renderpass(BuiltinRenderpass::Ui)?;
        shaders.use_by_id(materials.ui_shader_id(), self)?;
        shaders.set_uniform_mat4("projection", &ui_projection, self)?;
        shaders.set_uniform_mat4("view", &ui_view, self)?;
        shaders.apply_global(self, textures)?;

        for render_data in &packet.ui_geometries {
            let Some(geometry) = geometries.get(render_data.geometry) else {
                continue;
            };
            let internal_id = geometry.internal_id;
            materials.apply(geometry.material, shaders, self, textures, frame_number)?;
            shaders.set_uniform_mat4("model", &render_data.model, self)?;
            self.backend.draw_geometry(internal_id);
        }
        self.backend.end_renderpass(BuiltinRenderpass::Ui)?;

        // a failed end is likely unrecoverable for this frame
        if let Err(err) = self.backend.end_frame(packet.delta_time) {
            log::error!("end_frame failed: {err}");
            return Err(err);
        }
        self.frame_number += 1;
        Ok(())
    }

    // --- backend passthroughs used by the resource systems ----------------

    /// Uploads pixels as a GPU texture.
    pub fn create_texture(
        &mut self,
        pixels: &[u8],
        texture: &mut Texture,
    ) -> RendererResult<()> {
        self.backend.create_texture(pixels, texture)
    }

    /// Destroys a GPU texture.
    pub fn destroy_texture(&mut self, texture: &mut Texture) {
        self.backend.destroy_texture(texture);
    }

    /// Creates a sampler for the map.
    pub fn texture_map_acquire_resources(&mut self, map: &mut TextureMap) -> RendererResult<()> {
        self.backend.texture_map_acquire_resources(map)
    }

    /// Destroys the map's sampler.
    pub fn texture_map_release_resources(&mut self, map: &mut TextureMap) {
        self.backend.texture_map_release_resources(map);
    }

    /// Uploads geometry data into the shared buffers.
    pub fn create_geometry(
        &mut self,
        geometry: &mut Geometry,
        vertex_element_size: u32,
        vertex_count: u32,
        vertices: &[u8],
        indices: &[u32],
    ) -> RendererResult<()> {
        self.backend.create_geometry(
            geometry,
            vertex_element_size,
            vertex_count,
            vertices,
            indices,
        )
    }

    /// Frees a geometry's buffer ranges.
    pub fn destroy_geometry(&mut self, geometry: &mut Geometry) {
        self.backend.destroy_geometry(geometry);
    }

    /// Resolves a renderpass by name.
    pub fn renderpass_id(&self, name: &str) -> Option<BuiltinRenderpass> {
        self.backend.renderpass_id(name)
    }

    /// Creates backend shader state.
    pub fn shader_create(
        &mut self,
        shader: &mut Shader,
        renderpass: BuiltinRenderpass,
        stages: &[ShaderStage],
        stage_filenames: &[String],
    ) -> RendererResult<()> {
        self.backend
            .shader_create(shader, renderpass, stages, stage_filenames)
    }

    /// Destroys backend shader state.
    pub fn shader_destroy(&mut self, shader: &mut Shader) {
        self.backend.shader_destroy(shader);
    }

    /// Materializes the shader's pipeline and descriptor state.
    pub fn shader_initialize(
        &mut self,
        shader: &mut Shader,
        resources: &ResourceSystem,
    ) -> RendererResult<()> {
        self.backend.shader_initialize(shader, resources)
    }

    /// Binds the shader's pipeline.
    pub fn shader_use(&mut self, shader: &Shader) -> RendererResult<()> {
        self.backend.shader_use(shader)
    }

    /// Binds the global UBO region.
    pub fn shader_bind_globals(&mut self, shader: &mut Shader) -> RendererResult<()> {
        self.backend.shader_bind_globals(shader)
    }

    /// Binds an instance's UBO region.
    pub fn shader_bind_instance(
        &mut self,
        shader: &mut Shader,
        instance_id: u32,
    ) -> RendererResult<()> {
        self.backend.shader_bind_instance(shader, instance_id)
    }

    /// Writes and binds the global descriptor set.
    pub fn shader_apply_globals(
        &mut self,
        shader: &Shader,
        textures: &TextureSystem,
    ) -> RendererResult<()> {
        self.backend.shader_apply_globals(shader, textures)
    }

    /// Conditionally rewrites and binds the bound instance's descriptors.
    pub fn shader_apply_instance(
        &mut self,
        shader: &Shader,
        needs_update: bool,
        textures: &TextureSystem,
    ) -> RendererResult<()> {
        self.backend
            .shader_apply_instance(shader, needs_update, textures)
    }

    /// Routes a non-sampler uniform value.
    pub fn shader_set_uniform(
        &mut self,
        shader: &Shader,
        uniform: &ShaderUniform,
        value: &[u8],
    ) -> RendererResult<()> {
        self.backend.shader_set_uniform(shader, uniform, value)
    }

    /// Stores an instance sampler map.
    pub fn shader_set_instance_sampler(
        &mut self,
        shader: &Shader,
        location: u16,
        map: &TextureMap,
    ) -> RendererResult<()> {
        self.backend.shader_set_instance_sampler(shader, location, map)
    }

    /// Reserves per-instance shader resources.
    pub fn shader_acquire_instance_resources(
        &mut self,
        shader: &Shader,
        maps: &[TextureMap],
    ) -> RendererResult<u32> {
        self.backend.shader_acquire_instance_resources(shader, maps)
    }

    /// Frees per-instance shader resources.
    pub fn shader_release_instance_resources(
        &mut self,
        shader: &Shader,
        instance_id: u32,
    ) -> RendererResult<()> {
        self.backend
            .shader_release_instance_resources(shader, instance_id)
    }

    /// Blocks until the GPU is idle.
    pub fn wait_idle(&self) -> RendererResult<()> {
        self.backend.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::test_support::MockBackend;
    use crate::systems::geometry_system::{GeometrySystem, GeometrySystemConfig};
    use crate::systems::material_system::{MaterialSystem, MaterialSystemConfig};
    use crate::systems::resource_system::ResourceSystemConfig;
    use crate::systems::shader_system::{
        builtin_material_shader_config, builtin_ui_shader_config, ShaderSystemConfig,
    };
    use crate::systems::texture_system::TextureSystemConfig;
    use crate::foundation::math::Mat4;

    struct Stack {
        renderer: Renderer,
        shaders: ShaderSystem,
        materials: MaterialSystem,
        geometries: GeometrySystem,
        textures: TextureSystem,
        counters: std::rc::Rc<std::cell::RefCell<test_support::MockCounters>>,
    }

    fn full_stack() -> Stack {
        let (backend, counters) = MockBackend::new();
        let mut renderer = Renderer::from_backend(Box::new(backend), 800, 600);
        let resources = ResourceSystem::new(ResourceSystemConfig::default());
        let mut textures = TextureSystem::new(
            TextureSystemConfig {
                max_texture_count: 16,
            },
            &mut renderer,
        )
        .unwrap();
        let mut shaders = ShaderSystem::new(ShaderSystemConfig::default());
        let material_shader = shaders
            .create(&builtin_material_shader_config(), &mut renderer, &resources)
            .unwrap();
        let ui_shader = shaders
            .create(&builtin_ui_shader_config(), &mut renderer, &resources)
            .unwrap();
        let mut materials = MaterialSystem::new(
            MaterialSystemConfig {
                max_material_count: 16,
            },
            material_shader,
            ui_shader,
            &mut renderer,
            &mut shaders,
        )
        .unwrap();
        let geometries = GeometrySystem::new(
            GeometrySystemConfig {
                max_geometry_count: 16,
            },
            &mut renderer,
            &resources,
            &mut textures,
            &mut materials,
            &mut shaders,
        )
        .unwrap();

        Stack {
            renderer,
            shaders,
            materials,
            geometries,
            textures,
            counters,
        }
    }

    #[test]
    fn test_frame_number_increments_per_ended_frame() {
        let mut stack = full_stack();
        let packet = RenderPacket {
            delta_time: 0.016,
            ..RenderPacket::default()
        };

        assert_eq!(stack.renderer.frame_number(), 0);
        for expected in 1..=3u64 {
            stack
                .renderer
                .draw_frame(
                    &packet,
                    &mut stack.shaders,
                    &mut stack.materials,
                    &stack.geometries,
                    &stack.textures,
                )
                .unwrap();
            assert_eq!(stack.renderer.frame_number(), expected);
        }
        assert_eq!(stack.counters.borrow().frames_ended, 3);
    }

    #[test]
    fn test_draw_frame_draws_packet_geometries() {
        let mut stack = full_stack();
        let mut packet = RenderPacket {
            delta_time: 0.016,
            ..RenderPacket::default()
        };
        packet.geometries.push(types::GeometryRenderData {
            model: Mat4::identity(),
            geometry: stack.geometries.default_geometry_id(),
        });
        packet.ui_geometries.push(types::GeometryRenderData {
            model: Mat4::identity(),
            geometry: stack.geometries.default_2d_geometry_id(),
        });
        // unknown geometry ids are skipped, not fatal
        packet.geometries.push(types::GeometryRenderData {
            model: Mat4::identity(),
            geometry: 9999,
        });

        stack
            .renderer
            .draw_frame(
                &packet,
                &mut stack.shaders,
                &mut stack.materials,
                &stack.geometries,
                &stack.textures,
            )
            .unwrap();

        let counters = stack.counters.borrow();
        assert_eq!(counters.draws, 2);
        // both passes applied their globals
        assert_eq!(counters.globals_applied, 2);
        assert_eq!(counters.instances_applied, 2);
    }

    #[test]
    fn test_resize_reprojects() {
        let mut stack = full_stack();
        let before = stack.renderer.projection;
        stack.renderer.on_resized(1920, 1080);
        assert_ne!(before, stack.renderer.projection);
        assert_eq!(stack.renderer.framebuffer_width, 1920);
    }
}

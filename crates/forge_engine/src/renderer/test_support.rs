//! Test-only mock backend
//!
//! Implements [`RendererBackend`] with shared call counters so system
//! tests can observe create/destroy pairing, instance lifecycles and
//! frame-skip behavior without a GPU.

use std::cell::RefCell;
use std::rc::Rc;

use slotmap::SlotMap;

use super::backend::{RendererBackend, RendererError, RendererResult};
use super::types::{
    BuiltinRenderpass, Geometry, SamplerKey, Shader, ShaderKey, ShaderStage, ShaderUniform,
    Texture, TextureKey, TextureMap, BUILTIN_RENDERPASS_UI_NAME, BUILTIN_RENDERPASS_WORLD_NAME,
};
use crate::foundation::math::get_aligned;
use crate::systems::resource_system::ResourceSystem;
use crate::systems::texture_system::TextureSystem;
use crate::INVALID_ID;

/// Observable call counts.
#[derive(Debug, Default)]
pub struct MockCounters {
    pub texture_creates: u32,
    pub texture_destroys: u32,
    pub sampler_acquires: u32,
    pub sampler_releases: u32,
    pub geometry_creates: u32,
    pub geometry_destroys: u32,
    pub shader_creates: u32,
    pub shader_initializes: u32,
    pub shader_destroys: u32,
    pub instance_acquires: u32,
    pub instance_releases: u32,
    pub frames_begun: u32,
    pub frames_ended: u32,
    pub draws: u32,
    pub globals_applied: u32,
    pub instances_applied: u32,
    pub uniform_sets: u32,
}

struct MockShaderState {
    instances: Vec<bool>,
    instance_maps: Vec<Vec<TextureMap>>,
}

/// A GPU-free backend double.
pub struct MockBackend {
    counters: Rc<RefCell<MockCounters>>,
    textures: SlotMap<TextureKey, ()>,
    samplers: SlotMap<SamplerKey, ()>,
    shaders: SlotMap<ShaderKey, MockShaderState>,
    next_geometry_id: u32,
}

impl MockBackend {
    /// Creates a mock backend and hands back the shared counters.
    pub fn new() -> (Self, Rc<RefCell<MockCounters>>) {
        let counters = Rc::new(RefCell::new(MockCounters::default()));
        (
            Self {
                counters: counters.clone(),
                textures: SlotMap::with_key(),
                samplers: SlotMap::with_key(),
                shaders: SlotMap::with_key(),
                next_geometry_id: 0,
            },
            counters,
        )
    }
}

impl RendererBackend for MockBackend {
    fn shutdown(&mut self) {}

    fn on_resized(&mut self, _width: u32, _height: u32) {}

    fn begin_frame(&mut self, _delta_time: f32) -> RendererResult<bool> {
        self.counters.borrow_mut().frames_begun += 1;
        Ok(true)
    }

    fn end_frame(&mut self, _delta_time: f32) -> RendererResult<()> {
        self.counters.borrow_mut().frames_ended += 1;
        Ok(())
    }

    fn begin_renderpass(&mut self, _pass: BuiltinRenderpass) -> RendererResult<()> {
        Ok(())
    }

    fn end_renderpass(&mut self, _pass: BuiltinRenderpass) -> RendererResult<()> {
        Ok(())
    }

    fn draw_geometry(&mut self, _geometry_internal_id: u32) {
        self.counters.borrow_mut().draws += 1;
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

    fn create_texture(&mut self, _pixels: &[u8], texture: &mut Texture) -> RendererResult<()> {
        self.counters.borrow_mut().texture_creates += 1;
        texture.internal = Some(self.textures.insert(()));
        Ok(())
    }

    fn destroy_texture(&mut self, texture: &mut Texture) {
        if let Some(key) = texture.internal.take() {
            self.textures.remove(key);
            self.counters.borrow_mut().texture_destroys += 1;
        }
    }

    fn texture_map_acquire_resources(&mut self, map: &mut TextureMap) -> RendererResult<()> {
        self.counters.borrow_mut().sampler_acquires += 1;
        map.sampler = Some(self.samplers.insert(()));
        Ok(())
    }

    fn texture_map_release_resources(&mut self, map: &mut TextureMap) {
        if let Some(key) = map.sampler.take() {
            self.samplers.remove(key);
            self.counters.borrow_mut().sampler_releases += 1;
        }
    }

    fn create_geometry(
        &mut self,
        geometry: &mut Geometry,
        _vertex_element_size: u32,
        _vertex_count: u32,
        vertices: &[u8],
        _indices: &[u32],
    ) -> RendererResult<()> {
        if vertices.is_empty() {
            return Err(RendererError::InvalidOperation(
                "create_geometry requires vertex data".to_string(),
            ));
        }
        self.counters.borrow_mut().geometry_creates += 1;
        if geometry.internal_id == INVALID_ID {
            geometry.internal_id = self.next_geometry_id;
            self.next_geometry_id += 1;
        }
        geometry.generation = if geometry.generation == INVALID_ID {
            0
        } else {
            geometry.generation + 1
        };
        Ok(())
    }

    fn destroy_geometry(&mut self, geometry: &mut Geometry) {
        if geometry.internal_id != INVALID_ID {
            self.counters.borrow_mut().geometry_destroys += 1;
            geometry.internal_id = INVALID_ID;
            geometry.generation = INVALID_ID;
        }
    }

    fn shader_create(
        &mut self,
        shader: &mut Shader,
        _renderpass: BuiltinRenderpass,
        _stages: &[ShaderStage],
        _stage_filenames: &[String],
    ) -> RendererResult<()> {
        self.counters.borrow_mut().shader_creates += 1;
        shader.internal = Some(self.shaders.insert(MockShaderState {
            instances: vec![false; 64],
            instance_maps: vec![Vec::new(); 64],
        }));
        Ok(())
    }

    fn shader_destroy(&mut self, shader: &mut Shader) {
        if let Some(key) = shader.internal.take() {
            self.shaders.remove(key);
            self.counters.borrow_mut().shader_destroys += 1;
        }
    }

    fn shader_initialize(
        &mut self,
        shader: &mut Shader,
        _resources: &ResourceSystem,
    ) -> RendererResult<()> {
        self.counters.borrow_mut().shader_initializes += 1;
        // mirror the real backend's alignment behavior
        shader.required_ubo_alignment = 256;
        shader.global_ubo_stride = get_aligned(shader.global_ubo_size, 256);
        shader.ubo_stride = get_aligned(shader.ubo_size, 256);
        shader.global_ubo_offset = 0;
        Ok(())
    }

    fn shader_use(&mut self, _shader: &Shader) -> RendererResult<()> {
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
        shader.bound_instance_id = instance_id;
        shader.bound_ubo_offset =
            shader.global_ubo_stride + u64::from(instance_id) * shader.ubo_stride;
        Ok(())
    }

    fn shader_apply_globals(
        &mut self,
        _shader: &Shader,
        _textures: &TextureSystem,
    ) -> RendererResult<()> {
        self.counters.borrow_mut().globals_applied += 1;
        Ok(())
    }

    fn shader_apply_instance(
        &mut self,
        _shader: &Shader,
        _needs_update: bool,
        _textures: &TextureSystem,
    ) -> RendererResult<()> {
        self.counters.borrow_mut().instances_applied += 1;
        Ok(())
    }

    fn shader_set_uniform(
        &mut self,
        _shader: &Shader,
        _uniform: &ShaderUniform,
        _value: &[u8],
    ) -> RendererResult<()> {
        self.counters.borrow_mut().uniform_sets += 1;
        Ok(())
    }

    fn shader_set_instance_sampler(
        &mut self,
        shader: &Shader,
        location: u16,
        map: &TextureMap,
    ) -> RendererResult<()> {
        let key = shader.internal.unwrap();
        let state = &mut self.shaders[key];
        let maps = &mut state.instance_maps[shader.bound_instance_id as usize];
        if usize::from(location) < maps.len() {
            maps[usize::from(location)] = map.clone();
        }
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
        self.counters.borrow_mut().instance_acquires += 1;
        let state = &mut self.shaders[key];
        let slot = state
            .instances
            .iter()
            .position(|used| !used)
            .ok_or_else(|| RendererError::ResourceShortage("instance slots".to_string()))?;
        state.instances[slot] = true;
        let mut stored = maps.to_vec();
        stored.resize_with(usize::from(shader.instance_texture_count), TextureMap::diffuse_default);
        state.instance_maps[slot] = stored;
        Ok(slot as u32)
    }

    fn shader_release_instance_resources(
        &mut self,
        shader: &Shader,
        instance_id: u32,
    ) -> RendererResult<()> {
        let key = shader.internal.ok_or_else(|| {
            RendererError::InvalidOperation("shader has no backend state".to_string())
        })?;
        self.counters.borrow_mut().instance_releases += 1;
        let state = &mut self.shaders[key];
        state.instances[instance_id as usize] = false;
        state.instance_maps[instance_id as usize].clear();
        Ok(())
    }

    fn wait_idle(&self) -> RendererResult<()> {
        Ok(())
    }
}

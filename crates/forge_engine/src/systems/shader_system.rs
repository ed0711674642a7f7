//! Shader system
//!
//! Shader creation runs in two phases: `create` allocates the record,
//! registers attributes and uniforms from the config, then the backend
//! materializes the pipeline and descriptor state. After initialization a
//! shader's layout is frozen. `use`/`bind_instance`/`set_uniform` operate
//! against the currently used shader and route values by scope.

use std::collections::HashMap;

use crate::foundation::math::{get_aligned_range, Mat4, Vec4};
use crate::renderer::types::{
    Shader, ShaderAttribute, ShaderAttributeConfig, ShaderConfig, ShaderScope, ShaderState,
    ShaderUniform, ShaderUniformConfig, ShaderUniformType, TextureMap, TextureUse,
    BUILTIN_RENDERPASS_UI_NAME, BUILTIN_RENDERPASS_WORLD_NAME, SHADER_MAX_PUSH_CONST_RANGES,
};
use crate::renderer::Renderer;
use crate::systems::resource_system::ResourceSystem;
use crate::systems::texture_system::TextureSystem;
use crate::{INVALID_ID, INVALID_ID_U8};

/// Name of the built-in world (material) shader.
pub const BUILTIN_MATERIAL_SHADER_NAME: &str = "Shader.Builtin.Material";
/// Name of the built-in UI shader.
pub const BUILTIN_UI_SHADER_NAME: &str = "Shader.Builtin.Ui";

/// Shader system configuration.
#[derive(Debug, Clone)]
pub struct ShaderSystemConfig {
    /// Maximum number of shaders held by the system.
    pub max_shader_count: u32,
    /// Maximum uniforms + samplers per shader.
    pub max_uniform_count: u8,
    /// Maximum global-scope samplers per shader.
    pub max_global_textures: u8,
    /// Maximum instance-scope samplers per shader.
    pub max_instance_textures: u8,
}

impl Default for ShaderSystemConfig {
    fn default() -> Self {
        Self {
            max_shader_count: 1024,
            max_uniform_count: 128,
            max_global_textures: 31,
            max_instance_textures: 31,
        }
    }
}

/// Named shader registry.
pub struct ShaderSystem {
    config: ShaderSystemConfig,
    lookup: HashMap<String, u32>,
    shaders: Vec<Option<Shader>>,
    current_shader_id: u32,
}

impl ShaderSystem {
    /// Creates an empty system.
    pub fn new(config: ShaderSystemConfig) -> Self {
        assert!(config.max_shader_count > 0, "max_shader_count must be > 0");
        let shaders = (0..config.max_shader_count).map(|_| None).collect();
        Self {
            config,
            lookup: HashMap::new(),
            shaders,
            current_shader_id: INVALID_ID,
        }
    }

    /// Creates a shader from `config`: registers attributes and uniforms,
    /// then initializes the backend state. Returns the shader id, or
    /// `None` on failure (partially built state is destroyed).
    pub fn create(
        &mut self,
        config: &ShaderConfig,
        renderer: &mut Renderer,
        resources: &ResourceSystem,
    ) -> Option<u32> {
        if self.lookup.contains_key(&config.name) {
            log::error!("A shader named '{}' already exists.", config.name);
            return None;
        }

        let Some(id) = self.shaders.iter().position(|s| s.is_none()) else {
            log::error!("Unable to find a free slot to create a new shader. Aborting.");
            return None;
        };
        let id = id as u32;

        let mut shader = Shader::new(id, &config.name, config.use_instances, config.use_locals);

        let Some(renderpass) = renderer.renderpass_id(&config.renderpass_name) else {
            log::error!("Unable to find renderpass '{}'.", config.renderpass_name);
            return None;
        };

        if let Err(err) =
            renderer.shader_create(&mut shader, renderpass, &config.stages, &config.stage_filenames)
        {
            log::error!("Error creating shader '{}': {err}", config.name);
            return None;
        }
        shader.state = ShaderState::Uninitialized;

        // attributes first: location follows registration order
        for attribute in &config.attributes {
            self.add_attribute(&mut shader, attribute);
        }

        // then uniforms, samplers routed to their per-scope slots
        for uniform in &config.uniforms {
            let ok = if uniform.uniform_type == ShaderUniformType::Sampler {
                self.add_sampler(&mut shader, uniform, renderer)
            } else {
                self.add_uniform(&mut shader, uniform)
            };
            if !ok {
                renderer.shader_destroy(&mut shader);
                return None;
            }
        }

        if let Err(err) = renderer.shader_initialize(&mut shader, resources) {
            log::error!(
                "shader_system.create: initialization failed for shader '{}': {err}",
                config.name
            );
            renderer.shader_destroy(&mut shader);
            return None;
        }
        shader.state = ShaderState::Initialized;

        self.lookup.insert(config.name.clone(), id);
        self.shaders[id as usize] = Some(shader);
        Some(id)
    }

    /// The id registered under `name`, if any.
    pub fn get_id(&self, name: &str) -> Option<u32> {
        self.lookup.get(name).copied()
    }

    /// The shader stored at `id`.
    pub fn get(&self, id: u32) -> Option<&Shader> {
        self.shaders.get(id as usize)?.as_ref()
    }

    /// The shader registered under `name`.
    pub fn get_by_name(&self, name: &str) -> Option<&Shader> {
        self.get(self.get_id(name)?)
    }

    /// Makes `name` the current shader and binds its pipeline + globals.
    pub fn use_by_name(&mut self, name: &str, renderer: &mut Renderer) -> Result<(), crate::renderer::backend::RendererError> {
        let Some(id) = self.get_id(name) else {
            return Err(crate::renderer::backend::RendererError::InvalidOperation(
                format!("there is no shader registered named '{name}'"),
            ));
        };
        self.use_by_id(id, renderer)
    }

    /// Makes `id` the current shader and binds its pipeline + globals.
    pub fn use_by_id(
        &mut self,
        id: u32,
        renderer: &mut Renderer,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        // only rebind when the shader actually changes
        if self.current_shader_id != id {
            let shader = self.shaders[id as usize].as_mut().ok_or_else(|| {
                crate::renderer::backend::RendererError::InvalidOperation(format!(
                    "no shader with id {id}"
                ))
            })?;
            self.current_shader_id = id;
            renderer.shader_use(shader)?;
            renderer.shader_bind_globals(shader)?;
            shader.bound_scope = ShaderScope::Global;
        }
        Ok(())
    }

    /// The uniform index for `name` on shader `id`.
    pub fn uniform_index(&self, shader_id: u32, name: &str) -> Option<u16> {
        let shader = self.get(shader_id)?;
        let index = shader.uniform_lookup.get(name).copied()?;
        Some(shader.uniforms[usize::from(index)].index)
    }

    /// Sets a non-sampler uniform on the current shader by name.
    pub fn set_uniform_bytes(
        &mut self,
        name: &str,
        value: &[u8],
        renderer: &mut Renderer,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        let index = self
            .uniform_index(self.current_shader_id, name)
            .ok_or_else(|| {
                crate::renderer::backend::RendererError::InvalidOperation(format!(
                    "no uniform named '{name}' on the current shader"
                ))
            })?;
        self.set_uniform_by_index(index, value, renderer)
    }

    /// Sets a mat4 uniform on the current shader.
    pub fn set_uniform_mat4(
        &mut self,
        name: &str,
        value: &Mat4,
        renderer: &mut Renderer,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        self.set_uniform_bytes(name, bytemuck::cast_slice(value.as_slice()), renderer)
    }

    /// Sets a vec4 uniform on the current shader.
    pub fn set_uniform_vec4(
        &mut self,
        name: &str,
        value: &Vec4,
        renderer: &mut Renderer,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        self.set_uniform_bytes(name, bytemuck::cast_slice(value.as_slice()), renderer)
    }

    /// Sets a non-sampler uniform on the current shader by index,
    /// rebinding the scope when it changed.
    pub fn set_uniform_by_index(
        &mut self,
        index: u16,
        value: &[u8],
        renderer: &mut Renderer,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        let shader = self.current_shader_mut()?;
        let uniform = shader.uniforms[usize::from(index)];

        if shader.bound_scope != uniform.scope {
            match uniform.scope {
                ShaderScope::Global => renderer.shader_bind_globals(shader)?,
                ShaderScope::Instance => {
                    let instance_id = shader.bound_instance_id;
                    renderer.shader_bind_instance(shader, instance_id)?;
                }
                ShaderScope::Local => {
                    // push constants need no binding
                }
            }
            shader.bound_scope = uniform.scope;
        }
        renderer.shader_set_uniform(shader, &uniform, value)
    }

    /// Stores a texture map in the named sampler slot of the current
    /// shader.
    pub fn set_sampler(
        &mut self,
        name: &str,
        map: &TextureMap,
        renderer: &mut Renderer,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        let index = self
            .uniform_index(self.current_shader_id, name)
            .ok_or_else(|| {
                crate::renderer::backend::RendererError::InvalidOperation(format!(
                    "no sampler named '{name}' on the current shader"
                ))
            })?;
        let shader = self.current_shader_mut()?;
        let uniform = shader.uniforms[usize::from(index)];
        if uniform.uniform_type != ShaderUniformType::Sampler {
            return Err(crate::renderer::backend::RendererError::InvalidOperation(
                format!("uniform '{name}' is not a sampler"),
            ));
        }
        match uniform.scope {
            ShaderScope::Global => {
                shader.global_texture_maps[usize::from(uniform.location)] = map.clone();
                Ok(())
            }
            ShaderScope::Instance => {
                renderer.shader_set_instance_sampler(shader, uniform.location, map)
            }
            ShaderScope::Local => unreachable!("local samplers are rejected at registration"),
        }
    }

    /// Applies global-scope uniforms of the current shader.
    pub fn apply_global(
        &mut self,
        renderer: &mut Renderer,
        textures: &TextureSystem,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        let shader = self.current_shader_mut()?;
        renderer.shader_apply_globals(shader, textures)
    }

    /// Applies instance-scope uniforms of the current shader.
    pub fn apply_instance(
        &mut self,
        needs_update: bool,
        renderer: &mut Renderer,
        textures: &TextureSystem,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        let shader = self.current_shader_mut()?;
        renderer.shader_apply_instance(shader, needs_update, textures)
    }

    /// Binds `instance_id` on the current shader.
    pub fn bind_instance(
        &mut self,
        instance_id: u32,
        renderer: &mut Renderer,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        let shader = self.current_shader_mut()?;
        shader.bound_instance_id = instance_id;
        renderer.shader_bind_instance(shader, instance_id)?;
        shader.bound_scope = ShaderScope::Instance;
        Ok(())
    }

    /// Acquires per-instance resources on shader `shader_id`.
    pub fn acquire_instance_resources(
        &mut self,
        shader_id: u32,
        maps: &[TextureMap],
        renderer: &mut Renderer,
    ) -> Result<u32, crate::renderer::backend::RendererError> {
        let shader = self.shaders[shader_id as usize].as_ref().ok_or_else(|| {
            crate::renderer::backend::RendererError::InvalidOperation(format!(
                "no shader with id {shader_id}"
            ))
        })?;
        renderer.shader_acquire_instance_resources(shader, maps)
    }

    /// Releases per-instance resources on shader `shader_id`.
    pub fn release_instance_resources(
        &mut self,
        shader_id: u32,
        instance_id: u32,
        renderer: &mut Renderer,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        let shader = self.shaders[shader_id as usize].as_ref().ok_or_else(|| {
            crate::renderer::backend::RendererError::InvalidOperation(format!(
                "no shader with id {shader_id}"
            ))
        })?;
        renderer.shader_release_instance_resources(shader, instance_id)
    }

    /// Destroys every shader.
    pub fn shutdown(&mut self, renderer: &mut Renderer) {
        for slot in &mut self.shaders {
            if let Some(shader) = slot.as_mut() {
                // release the global sampler resources owned by the record
                for map in &mut shader.global_texture_maps {
                    renderer.texture_map_release_resources(map);
                }
                renderer.shader_destroy(shader);
                shader.state = ShaderState::NotCreated;
            }
            *slot = None;
        }
        self.lookup.clear();
        self.current_shader_id = INVALID_ID;
    }

    fn current_shader_mut(
        &mut self,
    ) -> Result<&mut Shader, crate::renderer::backend::RendererError> {
        if self.current_shader_id == INVALID_ID {
            return Err(crate::renderer::backend::RendererError::InvalidOperation(
                "no shader is currently in use".to_string(),
            ));
        }
        self.shaders[self.current_shader_id as usize]
            .as_mut()
            .ok_or_else(|| {
                crate::renderer::backend::RendererError::InvalidOperation(
                    "current shader slot is empty".to_string(),
                )
            })
    }

    fn add_attribute(&self, shader: &mut Shader, config: &ShaderAttributeConfig) {
        let size = config.attribute_type.size();
        shader.attribute_stride += size as u16;
        shader.attributes.push(ShaderAttribute {
            name: config.name.clone(),
            attribute_type: config.attribute_type,
            size,
        });
    }

    fn add_sampler(
        &self,
        shader: &mut Shader,
        config: &ShaderUniformConfig,
        renderer: &mut Renderer,
    ) -> bool {
        if config.scope == ShaderScope::Instance && !shader.use_instances {
            log::error!(
                "add_sampler cannot add an instance sampler to a shader that does not use instances."
            );
            return false;
        }
        // samplers cannot live in push constants
        if config.scope == ShaderScope::Local {
            log::error!("add_sampler cannot add a sampler at local scope.");
            return false;
        }

        if !Self::uniform_name_valid(shader, &config.name)
            || !Self::uniform_add_state_valid(shader)
        {
            return false;
        }

        let location = if config.scope == ShaderScope::Global {
            let global_texture_count = shader.global_texture_maps.len();
            if global_texture_count + 1 > usize::from(self.config.max_global_textures) {
                log::error!(
                    "Shader global texture count {} exceeds the maximum of {}.",
                    global_texture_count + 1,
                    self.config.max_global_textures
                );
                return false;
            }

            // global slots are allocated eagerly, pointing at the default
            // texture until assigned
            let mut default_map = TextureMap {
                usage: TextureUse::Unknown,
                texture: INVALID_ID,
                ..TextureMap::default()
            };
            if renderer.texture_map_acquire_resources(&mut default_map).is_err() {
                log::error!(
                    "Failed to acquire resources for a global texture map during shader creation."
                );
                return false;
            }
            shader.global_texture_maps.push(default_map);
            global_texture_count as u16
        } else {
            if shader.instance_texture_count + 1 > self.config.max_instance_textures {
                log::error!(
                    "Shader instance texture count {} exceeds the maximum of {}.",
                    shader.instance_texture_count + 1,
                    self.config.max_instance_textures
                );
                return false;
            }
            let location = u16::from(shader.instance_texture_count);
            shader.instance_texture_count += 1;
            location
        };

        self.uniform_add(shader, &config.name, 0, config.uniform_type, config.scope, Some(location))
    }

    fn add_uniform(&self, shader: &mut Shader, config: &ShaderUniformConfig) -> bool {
        if !Self::uniform_add_state_valid(shader) || !Self::uniform_name_valid(shader, &config.name)
        {
            return false;
        }
        self.uniform_add(
            shader,
            &config.name,
            config.uniform_type.size(),
            config.uniform_type,
            config.scope,
            None,
        )
    }

    fn uniform_add(
        &self,
        shader: &mut Shader,
        name: &str,
        size: u16,
        uniform_type: ShaderUniformType,
        scope: ShaderScope,
        sampler_location: Option<u16>,
    ) -> bool {
        let uniform_count = shader.uniforms.len();
        if uniform_count + 1 > usize::from(self.config.max_uniform_count) {
            log::error!(
                "A shader can only accept a combined maximum of {} uniforms and samplers across global, instance and local scopes.",
                self.config.max_uniform_count
            );
            return false;
        }

        let index = uniform_count as u16;
        let is_sampler = sampler_location.is_some();

        let mut entry = ShaderUniform {
            offset: 0,
            // sampler location indexes the per-scope texture array;
            // everything else uses its own uniform index
            location: sampler_location.unwrap_or(index),
            index,
            size: if is_sampler { 0 } else { size },
            set_index: 0,
            scope,
            uniform_type,
        };

        if scope != ShaderScope::Local {
            entry.set_index = if scope == ShaderScope::Global { 0 } else { 1 };
            entry.offset = if is_sampler {
                0
            } else if scope == ShaderScope::Global {
                shader.global_ubo_size
            } else {
                shader.ubo_size
            };
        } else {
            if !shader.use_locals {
                log::error!(
                    "Cannot add a locally-scoped uniform to a shader that does not support locals."
                );
                return false;
            }
            entry.set_index = INVALID_ID_U8;

            // push a new range aligned to 4 bytes, as Vulkan requires
            let range = get_aligned_range(shader.push_constant_size, u64::from(size), 4);
            if shader.push_constant_size + range.size > shader.push_constant_stride {
                log::error!(
                    "Push constant registration for '{name}' would exceed the {}-byte budget.",
                    shader.push_constant_stride
                );
                return false;
            }
            if shader.push_constant_ranges.len() >= SHADER_MAX_PUSH_CONST_RANGES {
                log::error!("Shader exceeds the maximum of {SHADER_MAX_PUSH_CONST_RANGES} push constant ranges.");
                return false;
            }
            entry.offset = range.offset;
            entry.size = range.size as u16;

            shader.push_constant_ranges.push(range);
            shader.push_constant_size += range.size;
        }

        shader.uniform_lookup.insert(name.to_string(), entry.index);
        shader.uniforms.push(entry);

        if !is_sampler {
            if scope == ShaderScope::Global {
                shader.global_ubo_size += u64::from(entry.size);
            } else if scope == ShaderScope::Instance {
                shader.ubo_size += u64::from(entry.size);
            }
        }

        true
    }

    fn uniform_name_valid(shader: &Shader, name: &str) -> bool {
        if name.is_empty() {
            log::error!("Uniform name must exist.");
            return false;
        }
        if shader.uniform_lookup.contains_key(name) {
            log::error!(
                "A uniform named '{name}' already exists on shader '{}'.",
                shader.name
            );
            return false;
        }
        true
    }

    fn uniform_add_state_valid(shader: &Shader) -> bool {
        if shader.state != ShaderState::Uninitialized {
            log::error!("Uniforms may only be added to shaders before initialization.");
            return false;
        }
        true
    }
}

/// Configuration for the built-in world material shader.
pub fn builtin_material_shader_config() -> ShaderConfig {
    ShaderConfig {
        name: BUILTIN_MATERIAL_SHADER_NAME.to_string(),
        use_instances: true,
        use_locals: true,
        renderpass_name: BUILTIN_RENDERPASS_WORLD_NAME.to_string(),
        stages: vec![
            crate::renderer::types::ShaderStage::Vertex,
            crate::renderer::types::ShaderStage::Fragment,
        ],
        stage_filenames: vec![
            "shaders/Builtin.MaterialShader.vert.spv".to_string(),
            "shaders/Builtin.MaterialShader.frag.spv".to_string(),
        ],
        attributes: vec![
            ShaderAttributeConfig {
                name: "in_position".to_string(),
                attribute_type: crate::renderer::types::ShaderAttributeType::Float32x3,
            },
            ShaderAttributeConfig {
                name: "in_normal".to_string(),
                attribute_type: crate::renderer::types::ShaderAttributeType::Float32x3,
            },
            ShaderAttributeConfig {
                name: "in_texcoord".to_string(),
                attribute_type: crate::renderer::types::ShaderAttributeType::Float32x2,
            },
        ],
        uniforms: vec![
            ShaderUniformConfig {
                name: "projection".to_string(),
                uniform_type: ShaderUniformType::Matrix4,
                scope: ShaderScope::Global,
            },
            ShaderUniformConfig {
                name: "view".to_string(),
                uniform_type: ShaderUniformType::Matrix4,
                scope: ShaderScope::Global,
            },
            ShaderUniformConfig {
                name: "diffuse_colour".to_string(),
                uniform_type: ShaderUniformType::Float32x4,
                scope: ShaderScope::Instance,
            },
            ShaderUniformConfig {
                name: "diffuse_texture".to_string(),
                uniform_type: ShaderUniformType::Sampler,
                scope: ShaderScope::Instance,
            },
            ShaderUniformConfig {
                name: "model".to_string(),
                uniform_type: ShaderUniformType::Matrix4,
                scope: ShaderScope::Local,
            },
        ],
    }
}

/// Configuration for the built-in UI shader.
pub fn builtin_ui_shader_config() -> ShaderConfig {
    ShaderConfig {
        name: BUILTIN_UI_SHADER_NAME.to_string(),
        use_instances: true,
        use_locals: true,
        renderpass_name: BUILTIN_RENDERPASS_UI_NAME.to_string(),
        stages: vec![
            crate::renderer::types::ShaderStage::Vertex,
            crate::renderer::types::ShaderStage::Fragment,
        ],
        stage_filenames: vec![
            "shaders/Builtin.UIShader.vert.spv".to_string(),
            "shaders/Builtin.UIShader.frag.spv".to_string(),
        ],
        attributes: vec![
            ShaderAttributeConfig {
                name: "in_position".to_string(),
                attribute_type: crate::renderer::types::ShaderAttributeType::Float32x2,
            },
            ShaderAttributeConfig {
                name: "in_texcoord".to_string(),
                attribute_type: crate::renderer::types::ShaderAttributeType::Float32x2,
            },
        ],
        uniforms: vec![
            ShaderUniformConfig {
                name: "projection".to_string(),
                uniform_type: ShaderUniformType::Matrix4,
                scope: ShaderScope::Global,
            },
            ShaderUniformConfig {
                name: "view".to_string(),
                uniform_type: ShaderUniformType::Matrix4,
                scope: ShaderScope::Global,
            },
            ShaderUniformConfig {
                name: "diffuse_colour".to_string(),
                uniform_type: ShaderUniformType::Float32x4,
                scope: ShaderScope::Instance,
            },
            ShaderUniformConfig {
                name: "diffuse_texture".to_string(),
                uniform_type: ShaderUniformType::Sampler,
                scope: ShaderScope::Instance,
            },
            ShaderUniformConfig {
                name: "model".to_string(),
                uniform_type: ShaderUniformType::Matrix4,
                scope: ShaderScope::Local,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::test_support::MockBackend;
    use crate::renderer::types::ShaderAttributeType;
    use crate::systems::resource_system::ResourceSystemConfig;

    fn harness() -> (Renderer, ResourceSystem, ShaderSystem) {
        let (backend, _) = MockBackend::new();
        let renderer = Renderer::from_backend(Box::new(backend), 800, 600);
        let resources = ResourceSystem::new(ResourceSystemConfig::default());
        let shaders = ShaderSystem::new(ShaderSystemConfig::default());
        (renderer, resources, shaders)
    }

    #[test]
    fn test_create_builtin_material_shader_layout() {
        let (mut renderer, resources, mut shaders) = harness();
        let id = shaders
            .create(&builtin_material_shader_config(), &mut renderer, &resources)
            .expect("shader creation");
        let shader = shaders.get(id).unwrap();

        // attribute stride: vec3 + vec3 + vec2
        assert_eq!(shader.attribute_stride, 12 + 12 + 8);
        assert_eq!(shader.state, ShaderState::Initialized);

        // global UBO carries projection + view
        assert_eq!(shader.global_ubo_size, 128);
        // instance UBO carries the diffuse colour
        assert_eq!(shader.ubo_size, 16);
        // model goes to push constants
        assert_eq!(shader.push_constant_size, 64);
        assert_eq!(shader.push_constant_ranges.len(), 1);

        // one instance sampler, no global samplers
        assert_eq!(shader.instance_texture_count, 1);
        assert!(shader.global_texture_maps.is_empty());
    }

    #[test]
    fn test_uniform_locations_and_indices() {
        let (mut renderer, resources, mut shaders) = harness();
        let id = shaders
            .create(&builtin_material_shader_config(), &mut renderer, &resources)
            .unwrap();

        // non-sampler location == index
        assert_eq!(shaders.uniform_index(id, "projection"), Some(0));
        assert_eq!(shaders.uniform_index(id, "view"), Some(1));
        let shader = shaders.get(id).unwrap();
        assert_eq!(shader.uniforms[0].location, 0);
        assert_eq!(shader.uniforms[1].location, 1);
        // the view offset follows projection within the global UBO
        assert_eq!(shader.uniforms[1].offset, 64);

        // the sampler's location indexes the instance texture array
        let sampler = shader.uniforms[usize::from(
            shaders.uniform_index(id, "diffuse_texture").unwrap(),
        )];
        assert_eq!(sampler.location, 0);
        assert_eq!(sampler.size, 0);
    }

    #[test]
    fn test_duplicate_uniform_name_fails_creation() {
        let (mut renderer, resources, mut shaders) = harness();
        let mut config = builtin_material_shader_config();
        config.uniforms.push(ShaderUniformConfig {
            name: "view".to_string(),
            uniform_type: ShaderUniformType::Matrix4,
            scope: ShaderScope::Global,
        });
        assert!(shaders.create(&config, &mut renderer, &resources).is_none());
    }

    #[test]
    fn test_push_constant_budget_enforced() {
        let (mut renderer, resources, mut shaders) = harness();
        let mut config = builtin_material_shader_config();
        // 64 (model) + 64 + 64 > 128
        config.uniforms.push(ShaderUniformConfig {
            name: "extra_a".to_string(),
            uniform_type: ShaderUniformType::Matrix4,
            scope: ShaderScope::Local,
        });
        config.uniforms.push(ShaderUniformConfig {
            name: "extra_b".to_string(),
            uniform_type: ShaderUniformType::Matrix4,
            scope: ShaderScope::Local,
        });
        assert!(shaders.create(&config, &mut renderer, &resources).is_none());
    }

    #[test]
    fn test_local_sampler_rejected() {
        let (mut renderer, resources, mut shaders) = harness();
        let mut config = builtin_material_shader_config();
        config.uniforms.push(ShaderUniformConfig {
            name: "bad_sampler".to_string(),
            uniform_type: ShaderUniformType::Sampler,
            scope: ShaderScope::Local,
        });
        assert!(shaders.create(&config, &mut renderer, &resources).is_none());
    }

    #[test]
    fn test_duplicate_shader_name_rejected() {
        let (mut renderer, resources, mut shaders) = harness();
        assert!(shaders
            .create(&builtin_material_shader_config(), &mut renderer, &resources)
            .is_some());
        assert!(shaders
            .create(&builtin_material_shader_config(), &mut renderer, &resources)
            .is_none());
    }

    #[test]
    fn test_global_sampler_allocates_eager_slot() {
        let (mut renderer, resources, mut shaders) = harness();
        let mut config = builtin_material_shader_config();
        config.name = "test.globalsampler".to_string();
        config.uniforms.push(ShaderUniformConfig {
            name: "environment".to_string(),
            uniform_type: ShaderUniformType::Sampler,
            scope: ShaderScope::Global,
        });
        let id = shaders.create(&config, &mut renderer, &resources).unwrap();
        let shader = shaders.get(id).unwrap();
        assert_eq!(shader.global_texture_maps.len(), 1);
        // the eager slot points at the default texture
        assert_eq!(shader.global_texture_maps[0].texture, INVALID_ID);
        assert!(shader.global_texture_maps[0].sampler.is_some());
    }

    #[test]
    fn test_attribute_sizes() {
        assert_eq!(ShaderAttributeType::Float32.size(), 4);
        assert_eq!(ShaderAttributeType::Float32x2.size(), 8);
        assert_eq!(ShaderAttributeType::Float32x3.size(), 12);
        assert_eq!(ShaderAttributeType::Float32x4.size(), 16);
        assert_eq!(ShaderAttributeType::Int8.size(), 1);
        assert_eq!(ShaderAttributeType::UInt16.size(), 2);
    }

    #[test]
    fn test_instance_lifecycle_through_mock() {
        let (mut renderer, resources, mut shaders) = harness();
        let id = shaders
            .create(&builtin_material_shader_config(), &mut renderer, &resources)
            .unwrap();

        let maps = vec![TextureMap::diffuse_default()];
        let a = shaders
            .acquire_instance_resources(id, &maps, &mut renderer)
            .unwrap();
        let b = shaders
            .acquire_instance_resources(id, &maps, &mut renderer)
            .unwrap();
        assert_ne!(a, b);

        shaders
            .release_instance_resources(id, a, &mut renderer)
            .unwrap();
        // the freed slot is handed out again
        let c = shaders
            .acquire_instance_resources(id, &maps, &mut renderer)
            .unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn test_use_and_set_uniforms() {
        let (mut renderer, resources, mut shaders) = harness();
        let id = shaders
            .create(&builtin_material_shader_config(), &mut renderer, &resources)
            .unwrap();

        shaders.use_by_id(id, &mut renderer).unwrap();
        let projection = Mat4::identity();
        shaders
            .set_uniform_mat4("projection", &projection, &mut renderer)
            .unwrap();
        assert!(shaders
            .set_uniform_bytes("missing", &[0u8; 4], &mut renderer)
            .is_err());
    }

    #[test]
    fn test_uniforms_frozen_after_initialize() {
        let (mut renderer, resources, mut shaders) = harness();
        let id = shaders
            .create(&builtin_material_shader_config(), &mut renderer, &resources)
            .unwrap();
        // the shader is initialized; direct attempts to add uniforms are
        // rejected by the state check
        let shader = shaders.get(id).unwrap();
        assert!(!ShaderSystem::uniform_add_state_valid(shader));
    }

    // the u16 sentinel is part of the public uniform contract
    #[test]
    fn test_invalid_u16_is_reserved() {
        assert_eq!(crate::INVALID_ID_U16, u16::MAX);
    }
}

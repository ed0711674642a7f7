//! Material system
//!
//! Reference-counted named materials with the same slot-array + name
//! lookup lifecycle as textures. Materials load from `.kmt` files through
//! the material loader or from in-memory configs; creating one acquires
//! shader instance resources, destroying one releases the diffuse texture
//! and those resources. Two defaults exist, one per built-in shader.

use std::collections::HashMap;

use crate::renderer::types::{Material, MaterialConfig, TextureMap, TextureUse};
use crate::renderer::Renderer;
use crate::resources::ResourceType;
use crate::systems::resource_system::ResourceSystem;
use crate::systems::shader_system::ShaderSystem;
use crate::systems::texture_system::TextureSystem;
use crate::INVALID_ID;

/// Name of the default world material.
pub const DEFAULT_MATERIAL_NAME: &str = "default";
/// Name of the default UI material.
pub const DEFAULT_UI_MATERIAL_NAME: &str = "default_ui";

/// Material system configuration.
#[derive(Debug, Clone)]
pub struct MaterialSystemConfig {
    /// Maximum number of simultaneously loaded materials.
    pub max_material_count: u32,
}

impl Default for MaterialSystemConfig {
    fn default() -> Self {
        Self {
            max_material_count: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MaterialReference {
    reference_count: u64,
    handle: u32,
    auto_release: bool,
}

/// Reference-counted named material storage.
pub struct MaterialSystem {
    config: MaterialSystemConfig,
    materials: Vec<MaterialSlot>,
    lookup: HashMap<String, MaterialReference>,
    material_shader_id: u32,
    ui_shader_id: u32,
    default_material_id: u32,
    default_ui_material_id: u32,
}

struct MaterialSlot {
    material: Material,
    /// Shader the material's instance resources were acquired on.
    shader_id: u32,
}

impl MaterialSystem {
    /// Creates the system and the default world/UI materials, acquiring
    /// their shader instance resources.
    pub fn new(
        config: MaterialSystemConfig,
        material_shader_id: u32,
        ui_shader_id: u32,
        renderer: &mut Renderer,
        shaders: &mut ShaderSystem,
    ) -> Result<Self, crate::renderer::backend::RendererError> {
        assert!(
            config.max_material_count > 0,
            "max_material_count must be > 0"
        );

        let materials = (0..config.max_material_count)
            .map(|_| MaterialSlot {
                material: Material::default(),
                shader_id: INVALID_ID,
            })
            .collect();

        let mut system = Self {
            config,
            materials,
            lookup: HashMap::new(),
            material_shader_id,
            ui_shader_id,
            default_material_id: 0,
            default_ui_material_id: 1,
        };

        // defaults occupy the first two slots and are never released
        system.create_default(
            system.default_material_id,
            DEFAULT_MATERIAL_NAME,
            material_shader_id,
            renderer,
            shaders,
        )?;
        system.create_default(
            system.default_ui_material_id,
            DEFAULT_UI_MATERIAL_NAME,
            ui_shader_id,
            renderer,
            shaders,
        )?;
        Ok(system)
    }

    /// Id of the built-in world material shader.
    pub fn material_shader_id(&self) -> u32 {
        self.material_shader_id
    }

    /// Id of the built-in UI shader.
    pub fn ui_shader_id(&self) -> u32 {
        self.ui_shader_id
    }

    /// Id of the default world material.
    pub fn default_material_id(&self) -> u32 {
        self.default_material_id
    }

    /// Id of the default UI material.
    pub fn default_ui_material_id(&self) -> u32 {
        self.default_ui_material_id
    }

    /// Acquires `name` by loading its `.kmt` configuration from disk.
    pub fn acquire(
        &mut self,
        name: &str,
        renderer: &mut Renderer,
        resources: &ResourceSystem,
        textures: &mut TextureSystem,
        shaders: &mut ShaderSystem,
    ) -> Option<u32> {
        let resource = match resources.load(name, ResourceType::Material) {
            Ok(resource) => resource,
            Err(err) => {
                log::error!("Failed to load material file for '{name}': {err}. No material acquired.");
                return None;
            }
        };
        let config = resource.as_material()?.clone();
        let id = self.acquire_from_config(&config, renderer, resources, textures, shaders);
        resources.unload(resource);
        id
    }

    /// Acquires a material from an in-memory config, creating it on first
    /// use.
    pub fn acquire_from_config(
        &mut self,
        config: &MaterialConfig,
        renderer: &mut Renderer,
        resources: &ResourceSystem,
        textures: &mut TextureSystem,
        shaders: &mut ShaderSystem,
    ) -> Option<u32> {
        if config.name.eq_ignore_ascii_case(DEFAULT_MATERIAL_NAME) {
            return Some(self.default_material_id);
        }
        if config.name.eq_ignore_ascii_case(DEFAULT_UI_MATERIAL_NAME) {
            return Some(self.default_ui_material_id);
        }

        let mut reference = self
            .lookup
            .get(&config.name)
            .copied()
            .unwrap_or(MaterialReference {
                reference_count: 0,
                handle: INVALID_ID,
                auto_release: false,
            });

        if reference.reference_count == 0 {
            reference.auto_release = config.auto_release;
        }
        reference.reference_count += 1;

        if reference.handle == INVALID_ID {
            let Some(slot) = self
                .materials
                .iter()
                .position(|s| s.material.id == INVALID_ID)
            else {
                log::error!(
                    "MaterialSystem::acquire - the material system cannot hold any more materials. Adjust the configuration to allow more."
                );
                return None;
            };

            if !self.load_material(config, slot, renderer, resources, textures, shaders) {
                log::error!("Failed to load material '{}'.", config.name);
                return None;
            }

            let handle = slot as u32;
            let material = &mut self.materials[slot].material;
            material.id = handle;
            material.generation = if material.generation == INVALID_ID {
                0
            } else {
                material.generation + 1
            };
            reference.handle = handle;
            log::trace!(
                "Material '{}' did not exist yet. Created, and ref_count is now {}.",
                config.name,
                reference.reference_count
            );
        } else {
            log::trace!(
                "Material '{}' already exists, ref_count increased to {}.",
                config.name,
                reference.reference_count
            );
        }

        self.lookup.insert(config.name.clone(), reference);
        Some(reference.handle)
    }

    /// Releases one reference to `name`. At zero references with
    /// `auto_release`, the material and its backend resources are
    /// destroyed. Releasing a default material is ignored.
    pub fn release(
        &mut self,
        name: &str,
        renderer: &mut Renderer,
        textures: &mut TextureSystem,
        shaders: &mut ShaderSystem,
    ) {
        if name.eq_ignore_ascii_case(DEFAULT_MATERIAL_NAME)
            || name.eq_ignore_ascii_case(DEFAULT_UI_MATERIAL_NAME)
        {
            return;
        }

        let Some(mut reference) = self.lookup.get(name).copied() else {
            log::error!("MaterialSystem::release failed to release material '{name}'.");
            return;
        };
        if reference.reference_count == 0 {
            log::warn!("Tried to release non-existent material: '{name}'.");
            return;
        }

        reference.reference_count -= 1;
        if reference.reference_count == 0 && reference.auto_release {
            self.destroy_material(reference.handle as usize, renderer, textures, shaders);
            reference.handle = INVALID_ID;
            reference.auto_release = false;
            log::trace!(
                "Released material '{name}'. Material unloaded because reference count reached 0 with auto_release enabled."
            );
        } else {
            log::trace!(
                "Released material '{name}', now has a reference count of {} (auto_release = {}).",
                reference.reference_count,
                reference.auto_release
            );
        }

        self.lookup.insert(name.to_string(), reference);
    }

    /// The material stored at `id`, when the slot is live.
    pub fn get(&self, id: u32) -> Option<&Material> {
        self.materials
            .get(id as usize)
            .map(|s| &s.material)
            .filter(|m| m.id != INVALID_ID)
    }

    /// Resolves `id`, falling back to the default world material.
    pub fn get_or_default(&self, id: u32) -> &Material {
        self.get(id)
            .unwrap_or(&self.materials[self.default_material_id as usize].material)
    }

    /// Applies a material to the currently used shader: binds the
    /// instance, feeds the instance uniforms and runs `apply_instance`,
    /// gating descriptor updates to once per frame.
    pub fn apply(
        &mut self,
        material_id: u32,
        shaders: &mut ShaderSystem,
        renderer: &mut Renderer,
        textures: &TextureSystem,
        frame_number: u64,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        let id = if self.get(material_id).is_some() {
            material_id
        } else {
            self.default_material_id
        };
        let slot = &mut self.materials[id as usize];
        let material = &mut slot.material;

        let needs_update = material.render_frame_number != frame_number;
        let diffuse_colour = material.diffuse_colour;
        let diffuse_map = material.diffuse_map.clone();
        let instance_id = material.shader_instance_id;

        shaders.bind_instance(instance_id, renderer)?;
        shaders.set_uniform_vec4("diffuse_colour", &diffuse_colour, renderer)?;
        shaders.set_sampler("diffuse_texture", &diffuse_map, renderer)?;
        shaders.apply_instance(needs_update, renderer, textures)?;

        material.render_frame_number = frame_number;
        Ok(())
    }

    /// Destroys every loaded material, including the defaults.
    pub fn shutdown(
        &mut self,
        renderer: &mut Renderer,
        textures: &mut TextureSystem,
        shaders: &mut ShaderSystem,
    ) {
        for slot in 0..self.materials.len() {
            if self.materials[slot].material.id != INVALID_ID {
                self.destroy_material(slot, renderer, textures, shaders);
            }
        }
        self.lookup.clear();
    }

    fn create_default(
        &mut self,
        id: u32,
        name: &str,
        shader_id: u32,
        renderer: &mut Renderer,
        shaders: &mut ShaderSystem,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        let slot = id as usize;

        let mut diffuse_map = TextureMap::diffuse_default();
        renderer.texture_map_acquire_resources(&mut diffuse_map)?;

        let instance_id =
            shaders.acquire_instance_resources(shader_id, &[diffuse_map.clone()], renderer)?;

        let material = &mut self.materials[slot].material;
        material.id = id;
        material.generation = INVALID_ID;
        material.name = name.to_string();
        // white, with the default checkerboard
        material.diffuse_colour = crate::foundation::math::Vec4::new(1.0, 1.0, 1.0, 1.0);
        material.diffuse_map = diffuse_map;
        material.shader_instance_id = instance_id;
        self.materials[slot].shader_id = shader_id;

        self.lookup.insert(
            name.to_string(),
            MaterialReference {
                reference_count: 1,
                handle: id,
                auto_release: false,
            },
        );
        Ok(())
    }

    fn load_material(
        &mut self,
        config: &MaterialConfig,
        slot: usize,
        renderer: &mut Renderer,
        resources: &ResourceSystem,
        textures: &mut TextureSystem,
        shaders: &mut ShaderSystem,
    ) -> bool {
        let previous_generation = self.materials[slot].material.generation;

        let mut material = Material {
            name: config.name.clone(),
            diffuse_colour: config.diffuse_colour,
            generation: previous_generation,
            ..Material::default()
        };

        // diffuse map
        if !config.diffuse_map_name.is_empty() {
            material.diffuse_map.usage = TextureUse::MapDiffuse;
            match textures.acquire(&config.diffuse_map_name, true, renderer, resources) {
                Some(texture_id) => material.diffuse_map.texture = texture_id,
                None => {
                    log::warn!(
                        "Unable to load texture '{}' for material '{}', using the default.",
                        config.diffuse_map_name,
                        material.name
                    );
                    material.diffuse_map.texture = INVALID_ID;
                }
            }
        } else {
            material.diffuse_map = TextureMap::diffuse_default();
        }

        if renderer
            .texture_map_acquire_resources(&mut material.diffuse_map)
            .is_err()
        {
            log::error!(
                "Failed to acquire sampler resources for material '{}'.",
                material.name
            );
            return false;
        }

        // backend resources: an instance on the material shader
        let shader_id = self.material_shader_id;
        let instance_id = match shaders.acquire_instance_resources(
            shader_id,
            &[material.diffuse_map.clone()],
            renderer,
        ) {
            Ok(instance_id) => instance_id,
            Err(err) => {
                log::error!(
                    "Failed to acquire renderer resources for material '{}': {err}",
                    material.name
                );
                return false;
            }
        };
        material.shader_instance_id = instance_id;

        self.materials[slot].material = material;
        self.materials[slot].shader_id = shader_id;
        true
    }

    fn destroy_material(
        &mut self,
        slot: usize,
        renderer: &mut Renderer,
        textures: &mut TextureSystem,
        shaders: &mut ShaderSystem,
    ) {
        let shader_id = self.materials[slot].shader_id;
        let mut material = std::mem::replace(&mut self.materials[slot].material, Material::default());
        log::trace!("Destroying material '{}'...", material.name);

        // release the referenced diffuse texture
        if material.diffuse_map.texture != INVALID_ID {
            let texture_name = textures
                .get(material.diffuse_map.texture)
                .map(|t| t.name.clone());
            if let Some(texture_name) = texture_name {
                textures.release(&texture_name, renderer);
            }
        }
        renderer.texture_map_release_resources(&mut material.diffuse_map);

        // release backend instance resources
        if material.shader_instance_id != INVALID_ID && shader_id != INVALID_ID {
            if let Err(err) = shaders.release_instance_resources(
                shader_id,
                material.shader_instance_id,
                renderer,
            ) {
                log::error!(
                    "Failed to release shader resources for material '{}': {err}",
                    material.name
                );
            }
        }

        self.materials[slot].shader_id = INVALID_ID;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::test_support::MockBackend;
    use crate::systems::resource_system::ResourceSystemConfig;
    use crate::systems::shader_system::{
        builtin_material_shader_config, builtin_ui_shader_config, ShaderSystemConfig,
    };
    use crate::systems::texture_system::TextureSystemConfig;

    fn harness() -> (
        Renderer,
        ResourceSystem,
        TextureSystem,
        ShaderSystem,
        MaterialSystem,
        std::rc::Rc<std::cell::RefCell<crate::renderer::test_support::MockCounters>>,
    ) {
        let (backend, counters) = MockBackend::new();
        let mut renderer = Renderer::from_backend(Box::new(backend), 800, 600);
        let resources = ResourceSystem::new(ResourceSystemConfig::default());
        let textures =
            TextureSystem::new(TextureSystemConfig { max_texture_count: 16 }, &mut renderer)
                .unwrap();
        let mut shaders = ShaderSystem::new(ShaderSystemConfig::default());
        let material_shader = shaders
            .create(&builtin_material_shader_config(), &mut renderer, &resources)
            .unwrap();
        let ui_shader = shaders
            .create(&builtin_ui_shader_config(), &mut renderer, &resources)
            .unwrap();
        let materials = MaterialSystem::new(
            MaterialSystemConfig {
                max_material_count: 8,
            },
            material_shader,
            ui_shader,
            &mut renderer,
            &mut shaders,
        )
        .unwrap();
        (renderer, resources, textures, shaders, materials, counters)
    }

    #[test]
    fn test_defaults_exist_and_resolve() {
        let (_renderer, _resources, _textures, _shaders, materials, _counters) = harness();
        let default = materials.get_or_default(INVALID_ID);
        assert_eq!(default.name, DEFAULT_MATERIAL_NAME);
        assert_eq!(default.generation, INVALID_ID);
        assert!(materials.get(materials.default_ui_material_id()).is_some());
    }

    #[test]
    fn test_acquire_from_config_refcounts() {
        let (mut renderer, resources, mut textures, mut shaders, mut materials, counters) =
            harness();
        let config = MaterialConfig {
            name: "stone".to_string(),
            auto_release: true,
            ..MaterialConfig::default()
        };

        let id1 = materials
            .acquire_from_config(&config, &mut renderer, &resources, &mut textures, &mut shaders)
            .unwrap();
        let id2 = materials
            .acquire_from_config(&config, &mut renderer, &resources, &mut textures, &mut shaders)
            .unwrap();
        assert_eq!(id1, id2);

        let acquires_before = counters.borrow().instance_acquires;
        materials.release("stone", &mut renderer, &mut textures, &mut shaders);
        // refcount 1: still alive
        assert!(materials.get(id1).is_some());

        materials.release("stone", &mut renderer, &mut textures, &mut shaders);
        // refcount 0 + auto_release: destroyed
        assert!(materials.get(id1).is_none());
        assert_eq!(counters.borrow().instance_releases, 1);
        assert_eq!(counters.borrow().instance_acquires, acquires_before);
    }

    #[test]
    fn test_reacquire_after_release_bumps_generation() {
        let (mut renderer, resources, mut textures, mut shaders, mut materials, _counters) =
            harness();
        let config = MaterialConfig {
            name: "wood".to_string(),
            auto_release: true,
            ..MaterialConfig::default()
        };

        let id = materials
            .acquire_from_config(&config, &mut renderer, &resources, &mut textures, &mut shaders)
            .unwrap();
        assert_eq!(materials.get(id).unwrap().generation, 0);

        materials.release("wood", &mut renderer, &mut textures, &mut shaders);
        let id2 = materials
            .acquire_from_config(&config, &mut renderer, &resources, &mut textures, &mut shaders)
            .unwrap();
        // the slot was reset, so generation restarts
        assert_eq!(materials.get(id2).unwrap().generation, 0);
    }

    #[test]
    fn test_default_names_short_circuit() {
        let (mut renderer, resources, mut textures, mut shaders, mut materials, _counters) =
            harness();
        let config = MaterialConfig {
            name: DEFAULT_MATERIAL_NAME.to_string(),
            ..MaterialConfig::default()
        };
        let id = materials
            .acquire_from_config(&config, &mut renderer, &resources, &mut textures, &mut shaders)
            .unwrap();
        assert_eq!(id, materials.default_material_id());

        // releasing a default is a no-op
        materials.release(
            DEFAULT_MATERIAL_NAME,
            &mut renderer,
            &mut textures,
            &mut shaders,
        );
        assert!(materials.get(id).is_some());
    }

    #[test]
    fn test_capacity_exhaustion_errors_cleanly() {
        let (mut renderer, resources, mut textures, mut shaders, mut materials, _counters) =
            harness();
        // 8 slots, 2 taken by defaults
        for i in 0..6 {
            let config = MaterialConfig {
                name: format!("mat_{i}"),
                ..MaterialConfig::default()
            };
            assert!(materials
                .acquire_from_config(&config, &mut renderer, &resources, &mut textures, &mut shaders)
                .is_some());
        }
        let config = MaterialConfig {
            name: "overflow".to_string(),
            ..MaterialConfig::default()
        };
        assert!(materials
            .acquire_from_config(&config, &mut renderer, &resources, &mut textures, &mut shaders)
            .is_none());
        // existing slots were not overwritten
        for i in 0..6 {
            assert!(materials.get((i + 2) as u32).is_some());
        }
    }
}

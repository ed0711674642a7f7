//! Texture system
//!
//! Reference-counted named textures backed by a fixed-capacity slot array
//! and a name lookup. First acquire loads from disk through the image
//! loader; release with `auto_release` destroys the GPU texture once the
//! count reaches zero. A generated checkerboard serves as the default
//! texture and never touches disk.

use std::collections::HashMap;

use crate::renderer::types::Texture;
use crate::renderer::Renderer;
use crate::resources::ResourceType;
use crate::systems::resource_system::ResourceSystem;
use crate::INVALID_ID;

/// Name of the default texture.
pub const DEFAULT_TEXTURE_NAME: &str = "default";

const DEFAULT_TEXTURE_DIMENSION: u32 = 256;

/// Texture system configuration.
#[derive(Debug, Clone)]
pub struct TextureSystemConfig {
    /// Maximum number of simultaneously loaded textures.
    pub max_texture_count: u32,
}

impl Default for TextureSystemConfig {
    fn default() -> Self {
        Self {
            max_texture_count: 65536,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TextureReference {
    reference_count: u64,
    handle: u32,
    auto_release: bool,
    // survives slot teardown so a reload after a full release continues
    // the per-name generation sequence
    generation: u32,
}

/// Reference-counted named texture storage.
pub struct TextureSystem {
    config: TextureSystemConfig,
    textures: Vec<Texture>,
    lookup: HashMap<String, TextureReference>,
    default_texture: Texture,
}

impl TextureSystem {
    /// Creates the system and uploads the default checkerboard texture.
    pub fn new(
        config: TextureSystemConfig,
        renderer: &mut Renderer,
    ) -> Result<Self, crate::renderer::backend::RendererError> {
        assert!(config.max_texture_count > 0, "max_texture_count must be > 0");

        let textures = (0..config.max_texture_count)
            .map(|_| Texture::default())
            .collect();

        let mut system = Self {
            config,
            textures,
            lookup: HashMap::new(),
            default_texture: Texture::default(),
        };
        system.create_default_texture(renderer)?;
        Ok(system)
    }

    /// Acquires `name`, loading it on first use. Returns the texture id,
    /// or `None` on failure. Acquiring `"default"` warns and resolves to
    /// the default texture.
    pub fn acquire(
        &mut self,
        name: &str,
        auto_release: bool,
        renderer: &mut Renderer,
        resources: &ResourceSystem,
    ) -> Option<u32> {
        if name.eq_ignore_ascii_case(DEFAULT_TEXTURE_NAME) {
            log::warn!(
                "TextureSystem::acquire called for the default texture. Use default_texture() instead."
            );
            return Some(INVALID_ID);
        }

        let mut reference = self.lookup.get(name).copied().unwrap_or(TextureReference {
            reference_count: 0,
            handle: INVALID_ID,
            auto_release: false,
            generation: INVALID_ID,
        });

        // auto_release can only be set on the first acquire
        if reference.reference_count == 0 {
            reference.auto_release = auto_release;
        }
        reference.reference_count += 1;

        if reference.handle == INVALID_ID {
            // no texture exists yet; find a free slot
            let Some(slot) = self.textures.iter().position(|t| t.id == INVALID_ID) else {
                log::error!(
                    "TextureSystem::acquire - the texture system cannot hold any more textures. Adjust the configuration to allow more."
                );
                return None;
            };

            if !self.load_texture(name, slot, reference.generation, renderer, resources) {
                log::error!("Failed to load texture '{name}'.");
                return None;
            }

            let handle = slot as u32;
            self.textures[slot].id = handle;
            reference.handle = handle;
            reference.generation = self.textures[slot].generation;
            log::trace!(
                "Texture '{name}' did not exist yet. Created, and ref_count is now {}.",
                reference.reference_count
            );
        } else {
            log::trace!(
                "Texture '{name}' already exists, ref_count increased to {}.",
                reference.reference_count
            );
        }

        self.lookup.insert(name.to_string(), reference);
        Some(reference.handle)
    }

    /// Releases one reference to `name`. At zero references with
    /// `auto_release`, the GPU texture is destroyed and the slot freed.
    /// Releasing `"default"` is ignored.
    pub fn release(&mut self, name: &str, renderer: &mut Renderer) {
        if name.eq_ignore_ascii_case(DEFAULT_TEXTURE_NAME) {
            return;
        }

        let Some(mut reference) = self.lookup.get(name).copied() else {
            log::error!("TextureSystem::release failed to release texture '{name}'.");
            return;
        };
        if reference.reference_count == 0 {
            log::warn!("Tried to release non-existent texture: '{name}'.");
            return;
        }

        reference.reference_count -= 1;
        if reference.reference_count == 0 && reference.auto_release {
            let texture = &mut self.textures[reference.handle as usize];
            renderer.destroy_texture(texture);
            *texture = Texture::default();

            reference.handle = INVALID_ID;
            reference.auto_release = false;
            log::trace!(
                "Released texture '{name}'. Texture unloaded because reference count reached 0 with auto_release enabled."
            );
        } else {
            log::trace!(
                "Released texture '{name}', now has a reference count of {} (auto_release = {}).",
                reference.reference_count,
                reference.auto_release
            );
        }

        self.lookup.insert(name.to_string(), reference);
    }

    /// The texture stored at `id`, when the slot is live.
    pub fn get(&self, id: u32) -> Option<&Texture> {
        self.textures
            .get(id as usize)
            .filter(|t| t.id != INVALID_ID)
    }

    /// Resolves `id`, falling back to the default texture for
    /// [`INVALID_ID`] or dead slots.
    pub fn get_or_default(&self, id: u32) -> &Texture {
        self.get(id).unwrap_or(&self.default_texture)
    }

    /// The default checkerboard texture.
    pub fn default_texture(&self) -> &Texture {
        &self.default_texture
    }

    /// Destroys every loaded texture and the default texture.
    pub fn shutdown(&mut self, renderer: &mut Renderer) {
        for texture in &mut self.textures {
            if texture.generation != INVALID_ID || texture.internal.is_some() {
                renderer.destroy_texture(texture);
            }
        }
        renderer.destroy_texture(&mut self.default_texture);
        self.lookup.clear();
    }

    fn create_default_texture(&mut self, renderer: &mut Renderer) -> Result<(), crate::renderer::backend::RendererError> {
        log::trace!("Creating default texture...");
        let pixels = generate_default_pixels(DEFAULT_TEXTURE_DIMENSION);

        self.default_texture = Texture {
            id: INVALID_ID,
            width: DEFAULT_TEXTURE_DIMENSION,
            height: DEFAULT_TEXTURE_DIMENSION,
            channel_count: 4,
            has_transparency: false,
            generation: INVALID_ID,
            name: DEFAULT_TEXTURE_NAME.to_string(),
            internal: None,
        };
        renderer.create_texture(&pixels, &mut self.default_texture)?;
        // default textures keep an invalid generation
        self.default_texture.generation = INVALID_ID;
        Ok(())
    }

    fn load_texture(
        &mut self,
        name: &str,
        slot: usize,
        prior_generation: u32,
        renderer: &mut Renderer,
        resources: &ResourceSystem,
    ) -> bool {
        let resource = match resources.load(name, ResourceType::Image) {
            Ok(resource) => resource,
            Err(err) => {
                log::warn!("load_texture failed to load image for '{name}': {err}");
                return false;
            }
        };
        let Some(image) = resource.as_image() else {
            log::error!("Image loader returned a non-image payload for '{name}'.");
            return false;
        };

        let mut temp = Texture {
            id: self.textures[slot].id,
            width: image.width,
            height: image.height,
            channel_count: image.channel_count,
            has_transparency: has_transparency(&image.pixels, image.channel_count),
            generation: INVALID_ID,
            name: name.to_string(),
            internal: None,
        };

        if let Err(err) = renderer.create_texture(&image.pixels, &mut temp) {
            log::error!("Failed to create GPU texture for '{name}': {err}");
            return false;
        }

        // swap in the new texture, then destroy the old GPU resources
        let mut old = std::mem::replace(&mut self.textures[slot], temp);
        renderer.destroy_texture(&mut old);

        self.textures[slot].generation = if prior_generation == INVALID_ID {
            0
        } else {
            prior_generation + 1
        };

        resources.unload(resource);
        true
    }
}

/// Generates the default checkerboard pixels: white where row and column
/// parity match, blue elsewhere.
pub(crate) fn generate_default_pixels(dimension: u32) -> Vec<u8> {
    let channels = 4usize;
    let mut pixels = vec![255u8; (dimension * dimension) as usize * channels];

    for row in 0..dimension as usize {
        for col in 0..dimension as usize {
            if row % 2 != col % 2 {
                let index = (row * dimension as usize + col) * channels;
                pixels[index] = 0;
                pixels[index + 1] = 0;
                // blue and alpha stay at 255
            }
        }
    }
    pixels
}

fn has_transparency(pixels: &[u8], channel_count: u8) -> bool {
    if channel_count != 4 {
        return false;
    }
    pixels.chunks_exact(4).any(|px| px[3] < 255)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_checkerboard_pattern() {
        let dim = 4;
        let pixels = generate_default_pixels(dim);
        let px = |row: usize, col: usize| {
            let i = (row * dim as usize + col) * 4;
            (pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3])
        };

        // top-left 2x2 is [white, blue; blue, white]
        assert_eq!(px(0, 0), (255, 255, 255, 255));
        assert_eq!(px(0, 1), (0, 0, 255, 255));
        assert_eq!(px(1, 0), (0, 0, 255, 255));
        assert_eq!(px(1, 1), (255, 255, 255, 255));
    }

    #[test]
    fn test_transparency_scan() {
        let opaque = vec![10, 20, 30, 255, 40, 50, 60, 255];
        assert!(!has_transparency(&opaque, 4));

        let translucent = vec![10, 20, 30, 255, 40, 50, 60, 254];
        assert!(has_transparency(&translucent, 4));
    }

    mod with_backend {
        use super::super::*;
        use crate::renderer::test_support::MockBackend;
        use crate::systems::resource_system::ResourceSystemConfig;

        // writes a tiny png under <temp>/textures/<name>.png and returns
        // a resource system rooted at <temp>
        fn asset_fixture(test_name: &str, texture_name: &str) -> ResourceSystem {
            let base = std::env::temp_dir().join(format!("forge_engine_{test_name}"));
            let textures_dir = base.join("textures");
            std::fs::create_dir_all(&textures_dir).unwrap();

            let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([30, 60, 90, 255]));
            image
                .save(textures_dir.join(format!("{texture_name}.png")))
                .unwrap();

            ResourceSystem::new(ResourceSystemConfig {
                max_loader_count: 8,
                asset_base_path: base.to_string_lossy().into_owned(),
            })
        }

        #[test]
        fn test_acquire_release_destroys_only_at_zero() {
            let (backend, counters) = MockBackend::new();
            let mut renderer = Renderer::from_backend(Box::new(backend), 800, 600);
            let resources = asset_fixture("refcount", "wood");
            let mut textures = TextureSystem::new(
                TextureSystemConfig {
                    max_texture_count: 8,
                },
                &mut renderer,
            )
            .unwrap();

            let id1 = textures
                .acquire("wood", true, &mut renderer, &resources)
                .unwrap();
            let id2 = textures
                .acquire("wood", true, &mut renderer, &resources)
                .unwrap();
            assert_eq!(id1, id2);
            assert_eq!(textures.get(id1).unwrap().generation, 0);
            // one create for the default texture, one for the load
            assert_eq!(counters.borrow().texture_creates, 2);

            textures.release("wood", &mut renderer);
            // refcount 1: still alive
            assert!(textures.get(id1).is_some());
            assert_eq!(counters.borrow().texture_destroys, 0);

            textures.release("wood", &mut renderer);
            // refcount 0 with auto_release: destroyed
            assert!(textures.get(id1).is_none());
            assert_eq!(counters.borrow().texture_destroys, 1);

            // a fresh acquire reloads and continues the generation
            let id3 = textures
                .acquire("wood", true, &mut renderer, &resources)
                .unwrap();
            assert_eq!(textures.get(id3).unwrap().generation, 1);
        }

        #[test]
        fn test_acquire_missing_texture_fails() {
            let (backend, _) = MockBackend::new();
            let mut renderer = Renderer::from_backend(Box::new(backend), 800, 600);
            let resources = asset_fixture("missing", "present");
            let mut textures = TextureSystem::new(
                TextureSystemConfig {
                    max_texture_count: 8,
                },
                &mut renderer,
            )
            .unwrap();

            assert!(textures
                .acquire("not_on_disk", true, &mut renderer, &resources)
                .is_none());
        }

        #[test]
        fn test_default_texture_acquire_and_release_are_guarded() {
            let (backend, counters) = MockBackend::new();
            let mut renderer = Renderer::from_backend(Box::new(backend), 800, 600);
            let resources = asset_fixture("default_guard", "unused");
            let mut textures = TextureSystem::new(
                TextureSystemConfig {
                    max_texture_count: 8,
                },
                &mut renderer,
            )
            .unwrap();

            let id = textures
                .acquire(DEFAULT_TEXTURE_NAME, true, &mut renderer, &resources)
                .unwrap();
            assert_eq!(id, INVALID_ID);
            assert_eq!(textures.get_or_default(id).name, DEFAULT_TEXTURE_NAME);
            assert_eq!(textures.default_texture().generation, INVALID_ID);

            textures.release(DEFAULT_TEXTURE_NAME, &mut renderer);
            assert_eq!(counters.borrow().texture_destroys, 0);
        }

        #[test]
        fn test_capacity_exhaustion_does_not_overwrite() {
            let (backend, _) = MockBackend::new();
            let mut renderer = Renderer::from_backend(Box::new(backend), 800, 600);
            let base = std::env::temp_dir().join("forge_engine_capacity");
            let textures_dir = base.join("textures");
            std::fs::create_dir_all(&textures_dir).unwrap();
            for i in 0..3 {
                let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([i, i, i, 255]));
                image.save(textures_dir.join(format!("t{i}.png"))).unwrap();
            }
            let resources = ResourceSystem::new(ResourceSystemConfig {
                max_loader_count: 8,
                asset_base_path: base.to_string_lossy().into_owned(),
            });

            let mut textures = TextureSystem::new(
                TextureSystemConfig {
                    max_texture_count: 2,
                },
                &mut renderer,
            )
            .unwrap();

            let a = textures.acquire("t0", true, &mut renderer, &resources).unwrap();
            let b = textures.acquire("t1", true, &mut renderer, &resources).unwrap();
            assert!(textures.acquire("t2", true, &mut renderer, &resources).is_none());
            // the existing slots are untouched
            assert_eq!(textures.get(a).unwrap().name, "t0");
            assert_eq!(textures.get(b).unwrap().name, "t1");
        }
    }
}

//! Geometry system
//!
//! Reference-counted geometry slots whose vertex/index data lives in the
//! backend's shared buffers. Configurations come from the plane and cube
//! generators or from caller-built vertex arrays; two default geometries
//! (one 3D, one 2D) always exist.

use bytemuck::cast_slice;

use crate::renderer::types::{Geometry, Vertex2D, Vertex3D};
use crate::renderer::Renderer;
use crate::systems::material_system::{
    MaterialSystem, DEFAULT_MATERIAL_NAME, DEFAULT_UI_MATERIAL_NAME,
};
use crate::systems::resource_system::ResourceSystem;
use crate::systems::shader_system::ShaderSystem;
use crate::systems::texture_system::TextureSystem;
use crate::INVALID_ID;

/// Name of the default geometries.
pub const DEFAULT_GEOMETRY_NAME: &str = "default";
/// Name of the default 2D geometry.
pub const DEFAULT_2D_GEOMETRY_NAME: &str = "default_2d";

/// Geometry system configuration.
#[derive(Debug, Clone)]
pub struct GeometrySystemConfig {
    /// Maximum number of simultaneously loaded geometries.
    pub max_geometry_count: u32,
}

impl Default for GeometrySystemConfig {
    fn default() -> Self {
        Self {
            max_geometry_count: 4096,
        }
    }
}

/// Vertex payload of a geometry configuration.
#[derive(Debug, Clone)]
pub enum GeometryVertices {
    /// 3D vertices.
    ThreeD(Vec<Vertex3D>),
    /// 2D vertices.
    TwoD(Vec<Vertex2D>),
}

impl GeometryVertices {
    /// Number of vertices.
    pub fn count(&self) -> u32 {
        match self {
            Self::ThreeD(v) => v.len() as u32,
            Self::TwoD(v) => v.len() as u32,
        }
    }

    /// Size of one vertex in bytes.
    pub fn element_size(&self) -> u32 {
        match self {
            Self::ThreeD(_) => std::mem::size_of::<Vertex3D>() as u32,
            Self::TwoD(_) => std::mem::size_of::<Vertex2D>() as u32,
        }
    }

    /// The vertex data as raw bytes.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::ThreeD(v) => cast_slice(v),
            Self::TwoD(v) => cast_slice(v),
        }
    }
}

/// Everything needed to create a geometry.
#[derive(Debug, Clone)]
pub struct GeometryConfig {
    /// Vertex data.
    pub vertices: GeometryVertices,
    /// Index data (two triangles per quad).
    pub indices: Vec<u32>,
    /// Geometry name.
    pub name: String,
    /// Name of the material to acquire for this geometry.
    pub material_name: String,
}

struct GeometryReference {
    reference_count: u64,
    auto_release: bool,
    geometry: Geometry,
}

/// Reference-counted geometry storage.
pub struct GeometrySystem {
    registered: Vec<GeometryReference>,
    default_geometry_id: u32,
    default_2d_geometry_id: u32,
}

impl GeometrySystem {
    /// Creates the system and uploads the default 3D and 2D geometries.
    pub fn new(
        config: GeometrySystemConfig,
        renderer: &mut Renderer,
        resources: &ResourceSystem,
        textures: &mut TextureSystem,
        materials: &mut MaterialSystem,
        shaders: &mut ShaderSystem,
    ) -> Result<Self, crate::renderer::backend::RendererError> {
        assert!(
            config.max_geometry_count > 0,
            "max_geometry_count must be > 0"
        );

        let registered = (0..config.max_geometry_count)
            .map(|_| GeometryReference {
                reference_count: 0,
                auto_release: false,
                geometry: Geometry::default(),
            })
            .collect();

        let mut system = Self {
            registered,
            default_geometry_id: INVALID_ID,
            default_2d_geometry_id: INVALID_ID,
        };
        system.create_default_geometries(renderer, resources, textures, materials, shaders)?;
        Ok(system)
    }

    /// Acquires an existing geometry by id, incrementing its reference
    /// count.
    pub fn acquire_by_id(&mut self, id: u32) -> Option<u32> {
        let slot = self.registered.get_mut(id as usize)?;
        if slot.geometry.id == INVALID_ID {
            log::error!("acquire_by_id cannot load an invalid geometry id. Returning nothing.");
            return None;
        }
        slot.reference_count += 1;
        Some(id)
    }

    /// Registers and acquires a geometry from `config`, uploading its
    /// data to the GPU and acquiring its material.
    pub fn acquire_from_config(
        &mut self,
        config: &GeometryConfig,
        auto_release: bool,
        renderer: &mut Renderer,
        resources: &ResourceSystem,
        textures: &mut TextureSystem,
        materials: &mut MaterialSystem,
        shaders: &mut ShaderSystem,
    ) -> Option<u32> {
        let Some(slot) = self
            .registered
            .iter()
            .position(|r| r.geometry.id == INVALID_ID)
        else {
            log::error!(
                "Unable to obtain a free slot for geometry. Adjust the configuration to allow more. Returning nothing."
            );
            return None;
        };

        let reference = &mut self.registered[slot];
        reference.auto_release = auto_release;
        reference.reference_count = 1;
        reference.geometry.id = slot as u32;

        if !Self::create_geometry(
            &mut self.registered[slot].geometry,
            config,
            renderer,
            resources,
            textures,
            materials,
            shaders,
        ) {
            let reference = &mut self.registered[slot];
            reference.reference_count = 0;
            reference.auto_release = false;
            reference.geometry = Geometry::default();
            log::error!("Failed to create geometry. Returning nothing.");
            return None;
        }

        Some(slot as u32)
    }

    /// Releases one reference. At zero references with `auto_release`,
    /// the geometry's GPU ranges are freed and its material released.
    pub fn release(
        &mut self,
        id: u32,
        renderer: &mut Renderer,
        textures: &mut TextureSystem,
        materials: &mut MaterialSystem,
        shaders: &mut ShaderSystem,
    ) {
        let Some(reference) = self.registered.get_mut(id as usize) else {
            log::warn!("GeometrySystem::release cannot release an invalid geometry id. Nothing was done.");
            return;
        };
        if reference.geometry.id == INVALID_ID {
            log::warn!("GeometrySystem::release cannot release an invalid geometry id. Nothing was done.");
            return;
        }
        if reference.geometry.id != id {
            log::error!("FATAL: Geometry id mismatch. Check registration logic, as this should never occur.");
            return;
        }
        if id == self.default_geometry_id || id == self.default_2d_geometry_id {
            // default geometries live for the whole application
            return;
        }

        if reference.reference_count > 0 {
            reference.reference_count -= 1;
        }
        if reference.reference_count == 0 && reference.auto_release {
            Self::destroy_geometry(
                &mut self.registered[id as usize],
                renderer,
                textures,
                materials,
                shaders,
            );
        }
    }

    /// The geometry stored at `id`, when the slot is live.
    pub fn get(&self, id: u32) -> Option<&Geometry> {
        self.registered
            .get(id as usize)
            .map(|r| &r.geometry)
            .filter(|g| g.id != INVALID_ID)
    }

    /// Id of the default 3D geometry.
    pub fn default_geometry_id(&self) -> u32 {
        self.default_geometry_id
    }

    /// Id of the default 2D geometry.
    pub fn default_2d_geometry_id(&self) -> u32 {
        self.default_2d_geometry_id
    }

    /// Destroys every live geometry.
    pub fn shutdown(
        &mut self,
        renderer: &mut Renderer,
        textures: &mut TextureSystem,
        materials: &mut MaterialSystem,
        shaders: &mut ShaderSystem,
    ) {
        for slot in 0..self.registered.len() {
            if self.registered[slot].geometry.id != INVALID_ID {
                Self::destroy_geometry(
                    &mut self.registered[slot],
                    renderer,
                    textures,
                    materials,
                    shaders,
                );
            }
        }
    }

    /// Generates a plane configuration: `x_segment_count * y_segment_count`
    /// quads, four vertices and six indices per quad. Zero parameters are
    /// clamped to one with a warning.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_plane_config(
        mut width: f32,
        mut height: f32,
        mut x_segment_count: u32,
        mut y_segment_count: u32,
        mut tile_x: f32,
        mut tile_y: f32,
        name: &str,
        material_name: &str,
    ) -> GeometryConfig {
        if width == 0.0 {
            log::warn!("Width must be nonzero. Defaulting to one.");
            width = 1.0;
        }
        if height == 0.0 {
            log::warn!("Height must be nonzero. Defaulting to one.");
            height = 1.0;
        }
        if x_segment_count < 1 {
            log::warn!("x_segment_count must be a positive number. Defaulting to one.");
            x_segment_count = 1;
        }
        if y_segment_count < 1 {
            log::warn!("y_segment_count must be a positive number. Defaulting to one.");
            y_segment_count = 1;
        }
        if tile_x == 0.0 {
            log::warn!("tile_x must be nonzero. Defaulting to one.");
            tile_x = 1.0;
        }
        if tile_y == 0.0 {
            log::warn!("tile_y must be nonzero. Defaulting to one.");
            tile_y = 1.0;
        }

        let vertex_count = (x_segment_count * y_segment_count * 4) as usize;
        let index_count = (x_segment_count * y_segment_count * 6) as usize;
        let mut vertices = vec![Vertex3D::default(); vertex_count];
        let mut indices = vec![0u32; index_count];

        // NOTE: this duplicates vertices at segment seams; de-duplication
        // is a separate pass
        let seg_width = width / x_segment_count as f32;
        let seg_height = height / y_segment_count as f32;
        let half_width = width * 0.5;
        let half_height = height * 0.5;
        for y in 0..y_segment_count {
            for x in 0..x_segment_count {
                let min_x = (x as f32 * seg_width) - half_width;
                let min_y = (y as f32 * seg_height) - half_height;
                let max_x = min_x + seg_width;
                let max_y = min_y + seg_height;

                let min_uvx = (x as f32 / x_segment_count as f32) * tile_x;
                let min_uvy = (y as f32 / y_segment_count as f32) * tile_y;
                let max_uvx = ((x + 1) as f32 / x_segment_count as f32) * tile_x;
                let max_uvy = ((y + 1) as f32 / y_segment_count as f32) * tile_y;

                let v_offset = ((y * x_segment_count) + x) as usize * 4;
                vertices[v_offset] = Vertex3D {
                    position: [min_x, min_y, 0.0],
                    normal: [0.0, 0.0, 1.0],
                    texcoord: [min_uvx, min_uvy],
                };
                vertices[v_offset + 1] = Vertex3D {
                    position: [max_x, max_y, 0.0],
                    normal: [0.0, 0.0, 1.0],
                    texcoord: [max_uvx, max_uvy],
                };
                vertices[v_offset + 2] = Vertex3D {
                    position: [min_x, max_y, 0.0],
                    normal: [0.0, 0.0, 1.0],
                    texcoord: [min_uvx, max_uvy],
                };
                vertices[v_offset + 3] = Vertex3D {
                    position: [max_x, min_y, 0.0],
                    normal: [0.0, 0.0, 1.0],
                    texcoord: [max_uvx, min_uvy],
                };

                let i_offset = ((y * x_segment_count) + x) as usize * 6;
                let base = v_offset as u32;
                indices[i_offset] = base;
                indices[i_offset + 1] = base + 1;
                indices[i_offset + 2] = base + 2;
                indices[i_offset + 3] = base;
                indices[i_offset + 4] = base + 3;
                indices[i_offset + 5] = base + 1;
            }
        }

        GeometryConfig {
            vertices: GeometryVertices::ThreeD(vertices),
            indices,
            name: non_empty_or(name, DEFAULT_GEOMETRY_NAME),
            material_name: non_empty_or(material_name, DEFAULT_MATERIAL_NAME),
        }
    }

    /// Generates a cube configuration: six faces, four vertices per face
    /// with the face normal, `{0,1,2,0,3,1}` winding per face.
    pub fn generate_cube_config(
        mut width: f32,
        mut height: f32,
        mut depth: f32,
        mut tile_x: f32,
        mut tile_y: f32,
        name: &str,
        material_name: &str,
    ) -> GeometryConfig {
        if width == 0.0 {
            log::warn!("Width must be nonzero. Defaulting to one.");
            width = 1.0;
        }
        if height == 0.0 {
            log::warn!("Height must be nonzero. Defaulting to one.");
            height = 1.0;
        }
        if depth == 0.0 {
            log::warn!("Depth must be nonzero. Defaulting to one.");
            depth = 1.0;
        }
        if tile_x == 0.0 {
            log::warn!("tile_x must be nonzero. Defaulting to one.");
            tile_x = 1.0;
        }
        if tile_y == 0.0 {
            log::warn!("tile_y must be nonzero. Defaulting to one.");
            tile_y = 1.0;
        }

        let half_width = width * 0.5;
        let half_height = height * 0.5;
        let half_depth = depth * 0.5;
        let (min_x, min_y, min_z) = (-half_width, -half_height, -half_depth);
        let (max_x, max_y, max_z) = (half_width, half_height, half_depth);
        let (min_uvx, min_uvy) = (0.0, 0.0);
        let (max_uvx, max_uvy) = (tile_x, tile_y);

        // per face: positions of the four corners + the face normal
        let faces: [([[f32; 3]; 4], [f32; 3]); 6] = [
            // front
            (
                [
                    [min_x, min_y, max_z],
                    [max_x, max_y, max_z],
                    [min_x, max_y, max_z],
                    [max_x, min_y, max_z],
                ],
                [0.0, 0.0, 1.0],
            ),
            // back
            (
                [
                    [max_x, min_y, min_z],
                    [min_x, max_y, min_z],
                    [max_x, max_y, min_z],
                    [min_x, min_y, min_z],
                ],
                [0.0, 0.0, -1.0],
            ),
            // left
            (
                [
                    [min_x, min_y, min_z],
                    [min_x, max_y, max_z],
                    [min_x, max_y, min_z],
                    [min_x, min_y, max_z],
                ],
                [-1.0, 0.0, 0.0],
            ),
            // right
            (
                [
                    [max_x, min_y, max_z],
                    [max_x, max_y, min_z],
                    [max_x, max_y, max_z],
                    [max_x, min_y, min_z],
                ],
                [1.0, 0.0, 0.0],
            ),
            // bottom
            (
                [
                    [max_x, min_y, max_z],
                    [min_x, min_y, min_z],
                    [max_x, min_y, min_z],
                    [min_x, min_y, max_z],
                ],
                [0.0, -1.0, 0.0],
            ),
            // top
            (
                [
                    [min_x, max_y, max_z],
                    [max_x, max_y, min_z],
                    [min_x, max_y, min_z],
                    [max_x, max_y, max_z],
                ],
                [0.0, 1.0, 0.0],
            ),
        ];
        let corner_uvs = [
            [min_uvx, min_uvy],
            [max_uvx, max_uvy],
            [min_uvx, max_uvy],
            [max_uvx, min_uvy],
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (face_index, (positions, normal)) in faces.iter().enumerate() {
            for corner in 0..4 {
                vertices.push(Vertex3D {
                    position: positions[corner],
                    normal: *normal,
                    texcoord: corner_uvs[corner],
                });
            }
            let base = (face_index * 4) as u32;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 3, base + 1]);
        }

        GeometryConfig {
            vertices: GeometryVertices::ThreeD(vertices),
            indices,
            name: non_empty_or(name, DEFAULT_GEOMETRY_NAME),
            material_name: non_empty_or(material_name, DEFAULT_MATERIAL_NAME),
        }
    }

    fn create_geometry(
        geometry: &mut Geometry,
        config: &GeometryConfig,
        renderer: &mut Renderer,
        resources: &ResourceSystem,
        textures: &mut TextureSystem,
        materials: &mut MaterialSystem,
        shaders: &mut ShaderSystem,
    ) -> bool {
        geometry.name = config.name.clone();
        if renderer
            .create_geometry(
                geometry,
                config.vertices.element_size(),
                config.vertices.count(),
                config.vertices.bytes(),
                &config.indices,
            )
            .is_err()
        {
            return false;
        }

        if !config.material_name.is_empty() {
            geometry.material = materials
                .acquire(
                    &config.material_name,
                    renderer,
                    resources,
                    textures,
                    shaders,
                )
                .unwrap_or_else(|| {
                    let fallback = if config.material_name == DEFAULT_UI_MATERIAL_NAME {
                        materials.default_ui_material_id()
                    } else {
                        materials.default_material_id()
                    };
                    fallback
                });
        }
        true
    }

    fn destroy_geometry(
        reference: &mut GeometryReference,
        renderer: &mut Renderer,
        textures: &mut TextureSystem,
        materials: &mut MaterialSystem,
        shaders: &mut ShaderSystem,
    ) {
        let geometry = &mut reference.geometry;
        renderer.destroy_geometry(geometry);

        // release the material reference
        if geometry.material != INVALID_ID {
            let material_name = materials.get(geometry.material).map(|m| m.name.clone());
            if let Some(material_name) = material_name {
                materials.release(&material_name, renderer, textures, shaders);
            }
        }

        reference.geometry = Geometry::default();
        reference.reference_count = 0;
        reference.auto_release = false;
    }

    fn create_default_geometries(
        &mut self,
        renderer: &mut Renderer,
        resources: &ResourceSystem,
        textures: &mut TextureSystem,
        materials: &mut MaterialSystem,
        shaders: &mut ShaderSystem,
    ) -> Result<(), crate::renderer::backend::RendererError> {
        // a basic square plane
        let f = 10.0;
        let verts = vec![
            Vertex3D {
                position: [-0.5 * f, -0.5 * f, 0.0],
                normal: [0.0, 0.0, 1.0],
                texcoord: [0.0, 0.0],
            },
            Vertex3D {
                position: [0.5 * f, 0.5 * f, 0.0],
                normal: [0.0, 0.0, 1.0],
                texcoord: [1.0, 1.0],
            },
            Vertex3D {
                position: [-0.5 * f, 0.5 * f, 0.0],
                normal: [0.0, 0.0, 1.0],
                texcoord: [0.0, 1.0],
            },
            Vertex3D {
                position: [0.5 * f, -0.5 * f, 0.0],
                normal: [0.0, 0.0, 1.0],
                texcoord: [1.0, 0.0],
            },
        ];
        let config = GeometryConfig {
            vertices: GeometryVertices::ThreeD(verts),
            indices: vec![0, 1, 2, 0, 3, 1],
            name: DEFAULT_GEOMETRY_NAME.to_string(),
            material_name: DEFAULT_MATERIAL_NAME.to_string(),
        };
        self.default_geometry_id = self
            .acquire_from_config(
                &config,
                false,
                renderer,
                resources,
                textures,
                materials,
                shaders,
            )
            .ok_or_else(|| {
                crate::renderer::backend::RendererError::InitializationFailed(
                    "failed to create the default geometry".to_string(),
                )
            })?;

        // the 2D counterpart (counter-clockwise winding)
        let verts_2d = vec![
            Vertex2D {
                position: [-0.5 * f, -0.5 * f],
                texcoord: [0.0, 0.0],
            },
            Vertex2D {
                position: [0.5 * f, 0.5 * f],
                texcoord: [1.0, 1.0],
            },
            Vertex2D {
                position: [-0.5 * f, 0.5 * f],
                texcoord: [0.0, 1.0],
            },
            Vertex2D {
                position: [0.5 * f, -0.5 * f],
                texcoord: [1.0, 0.0],
            },
        ];
        let config_2d = GeometryConfig {
            vertices: GeometryVertices::TwoD(verts_2d),
            indices: vec![2, 1, 0, 3, 0, 1],
            name: DEFAULT_2D_GEOMETRY_NAME.to_string(),
            material_name: DEFAULT_UI_MATERIAL_NAME.to_string(),
        };
        self.default_2d_geometry_id = self
            .acquire_from_config(
                &config_2d,
                false,
                renderer,
                resources,
                textures,
                materials,
                shaders,
            )
            .ok_or_else(|| {
                crate::renderer::backend::RendererError::InitializationFailed(
                    "failed to create the default 2d geometry".to_string(),
                )
            })?;

        Ok(())
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_counts() {
        for (xs, ys) in [(1u32, 1u32), (2, 3), (4, 4)] {
            let config = GeometrySystem::generate_plane_config(
                4.0, 4.0, xs, ys, 1.0, 1.0, "plane", "mat",
            );
            assert_eq!(config.vertices.count(), 4 * xs * ys);
            assert_eq!(config.indices.len() as u32, 6 * xs * ys);
        }
    }

    #[test]
    fn test_single_segment_plane_layout() {
        let config =
            GeometrySystem::generate_plane_config(2.0, 2.0, 1, 1, 1.0, 1.0, "test_plane", "m");
        let GeometryVertices::ThreeD(verts) = &config.vertices else {
            panic!("plane generator must emit 3D vertices");
        };

        assert_eq!(verts.len(), 4);
        // corners at (+-1, +-1) with matching UVs
        assert_relative_eq!(verts[0].position[0], -1.0);
        assert_relative_eq!(verts[0].position[1], -1.0);
        assert_relative_eq!(verts[0].texcoord[0], 0.0);
        assert_relative_eq!(verts[0].texcoord[1], 0.0);

        assert_relative_eq!(verts[1].position[0], 1.0);
        assert_relative_eq!(verts[1].position[1], 1.0);
        assert_relative_eq!(verts[1].texcoord[0], 1.0);
        assert_relative_eq!(verts[1].texcoord[1], 1.0);

        assert_relative_eq!(verts[2].position[0], -1.0);
        assert_relative_eq!(verts[2].position[1], 1.0);
        assert_relative_eq!(verts[3].position[0], 1.0);
        assert_relative_eq!(verts[3].position[1], -1.0);

        assert_eq!(config.indices, vec![0, 1, 2, 0, 3, 1]);
    }

    #[test]
    fn test_plane_zero_parameters_are_clamped() {
        let config = GeometrySystem::generate_plane_config(0.0, 0.0, 0, 0, 0.0, 0.0, "", "");
        assert_eq!(config.vertices.count(), 4);
        assert_eq!(config.indices.len(), 6);
        assert_eq!(config.name, DEFAULT_GEOMETRY_NAME);
        assert_eq!(config.material_name, DEFAULT_MATERIAL_NAME);
    }

    #[test]
    fn test_plane_uv_tiling() {
        let config =
            GeometrySystem::generate_plane_config(2.0, 2.0, 2, 1, 3.0, 2.0, "tiled", "m");
        let GeometryVertices::ThreeD(verts) = &config.vertices else {
            panic!("plane generator must emit 3D vertices");
        };
        // second segment starts at u = (1/2) * tile_x
        assert_relative_eq!(verts[4].texcoord[0], 1.5);
        assert_relative_eq!(verts[5].texcoord[0], 3.0);
        assert_relative_eq!(verts[5].texcoord[1], 2.0);
    }

    #[test]
    fn test_cube_counts_and_windings() {
        let config = GeometrySystem::generate_cube_config(1.0, 1.0, 1.0, 1.0, 1.0, "cube", "m");
        assert_eq!(config.vertices.count(), 24);
        assert_eq!(config.indices.len(), 36);
        // each face uses the {0,1,2,0,3,1} pattern over its four vertices
        for face in 0..6u32 {
            let base = face * 4;
            let i = (face * 6) as usize;
            assert_eq!(
                &config.indices[i..i + 6],
                &[base, base + 1, base + 2, base, base + 3, base + 1]
            );
        }
    }

    #[test]
    fn test_cube_per_face_normals() {
        let config = GeometrySystem::generate_cube_config(2.0, 2.0, 2.0, 1.0, 1.0, "cube", "m");
        let GeometryVertices::ThreeD(verts) = &config.vertices else {
            panic!("cube generator must emit 3D vertices");
        };
        let expected_normals = [
            [0.0, 0.0, 1.0],
            [0.0, 0.0, -1.0],
            [-1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        for (face, expected) in expected_normals.iter().enumerate() {
            for corner in 0..4 {
                assert_eq!(&verts[face * 4 + corner].normal, expected);
            }
        }
        // all corners lie on the half-extent
        for v in verts {
            for &coordinate in &v.position {
                assert_relative_eq!(coordinate.abs(), 1.0);
            }
        }
    }
}

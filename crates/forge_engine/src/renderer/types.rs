//! Shared renderer-facing types
//!
//! Frontend records for textures, materials, geometries and shaders, the
//! vertex layouts, and the opaque keys that reference backend-owned GPU
//! payloads. The backend is the only code that can resolve a key; the
//! frontend just carries them around.

use bytemuck::{Pod, Zeroable};
use slotmap::new_key_type;

use crate::foundation::math::{Mat4, Range, Vec4};
use crate::INVALID_ID;

new_key_type! {
    /// Opaque handle to a backend-owned GPU texture payload.
    pub struct TextureKey;
    /// Opaque handle to a backend-owned sampler.
    pub struct SamplerKey;
    /// Opaque handle to a backend-owned shader payload.
    pub struct ShaderKey;
}

/// A texture as the frontend sees it. The pixel storage lives behind
/// `internal` in the backend.
#[derive(Debug, Clone)]
pub struct Texture {
    /// Stable id: the index of the slot this texture occupies.
    pub id: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channel count of the source data.
    pub channel_count: u8,
    /// True when any pixel has alpha below 255.
    pub has_transparency: bool,
    /// Bumped on every (re)load; [`INVALID_ID`] marks default/unloaded.
    pub generation: u32,
    /// The texture name.
    pub name: String,
    /// Backend payload handle.
    pub internal: Option<TextureKey>,
}

impl Default for Texture {
    fn default() -> Self {
        Self {
            id: INVALID_ID,
            width: 0,
            height: 0,
            channel_count: 0,
            has_transparency: false,
            generation: INVALID_ID,
            name: String::new(),
            internal: None,
        }
    }
}

/// What a texture map is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureUse {
    /// Unknown use.
    #[default]
    Unknown,
    /// Diffuse color map.
    MapDiffuse,
}

/// Texture filtering modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFilter {
    /// Nearest-neighbor filtering.
    Nearest,
    /// Linear filtering.
    #[default]
    Linear,
}

/// Texture addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureRepeat {
    /// Repeat the texture.
    #[default]
    Repeat,
    /// Mirror on every repeat.
    MirroredRepeat,
    /// Clamp to the edge texel.
    ClampToEdge,
    /// Clamp to the border color.
    ClampToBorder,
}

/// A texture plus its sampling configuration.
///
/// `texture` is the texture system id of the referenced texture;
/// [`INVALID_ID`] means "use the default texture". Ids stay stable across
/// reloads, so generation checks always read live state.
#[derive(Debug, Clone, Default)]
pub struct TextureMap {
    /// What the map is used for.
    pub usage: TextureUse,
    /// Texture system id, or [`INVALID_ID`] for the default texture.
    pub texture: u32,
    /// Minification filter.
    pub filter_minify: TextureFilter,
    /// Magnification filter.
    pub filter_magnify: TextureFilter,
    /// U addressing mode.
    pub repeat_u: TextureRepeat,
    /// V addressing mode.
    pub repeat_v: TextureRepeat,
    /// W addressing mode.
    pub repeat_w: TextureRepeat,
    /// Backend sampler handle.
    pub sampler: Option<SamplerKey>,
}

impl TextureMap {
    /// A diffuse map referencing the default texture.
    pub fn diffuse_default() -> Self {
        Self {
            usage: TextureUse::MapDiffuse,
            texture: INVALID_ID,
            ..Self::default()
        }
    }
}

/// A material: a named diffuse color + diffuse map combination with
/// backend (shader-instance) resources.
#[derive(Debug, Clone)]
pub struct Material {
    /// Slot index in the material system.
    pub id: u32,
    /// Bumped on every (re)load; [`INVALID_ID`] marks default/unloaded.
    pub generation: u32,
    /// The material name.
    pub name: String,
    /// Diffuse color.
    pub diffuse_colour: Vec4,
    /// Diffuse texture map.
    pub diffuse_map: TextureMap,
    /// Shader instance id acquired from the material shader.
    pub shader_instance_id: u32,
    /// Frame number this material was last applied on, used to avoid
    /// redundant descriptor updates within a frame.
    pub render_frame_number: u64,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            id: INVALID_ID,
            generation: INVALID_ID,
            name: String::new(),
            diffuse_colour: Vec4::new(1.0, 1.0, 1.0, 1.0),
            diffuse_map: TextureMap::diffuse_default(),
            shader_instance_id: INVALID_ID,
            render_frame_number: u64::MAX,
        }
    }
}

/// Configuration used to create a material, parsed from `.kmt` files or
/// built in code.
#[derive(Debug, Clone)]
pub struct MaterialConfig {
    /// The material name.
    pub name: String,
    /// Whether the material is released automatically at refcount zero.
    pub auto_release: bool,
    /// Diffuse color; defaults to white.
    pub diffuse_colour: Vec4,
    /// Name of the diffuse texture, empty for the default texture.
    pub diffuse_map_name: String,
}

impl Default for MaterialConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            auto_release: true,
            diffuse_colour: Vec4::new(1.0, 1.0, 1.0, 1.0),
            diffuse_map_name: String::new(),
        }
    }
}

/// A geometry as the frontend sees it. Vertex/index storage lives in the
/// backend's shared buffers, referenced through `internal_id`.
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Slot index in the geometry system.
    pub id: u32,
    /// Index into the backend's geometry table.
    pub internal_id: u32,
    /// Bumped on every re-upload.
    pub generation: u32,
    /// The geometry name.
    pub name: String,
    /// Material system id of the geometry's material.
    pub material: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            id: INVALID_ID,
            internal_id: INVALID_ID,
            generation: INVALID_ID,
            name: String::new(),
            material: INVALID_ID,
        }
    }
}

/// Vertex layout for 3D geometry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex3D {
    /// Object-space position.
    pub position: [f32; 3],
    /// Surface normal.
    pub normal: [f32; 3],
    /// Texture coordinate.
    pub texcoord: [f32; 2],
}

/// Vertex layout for 2D (UI) geometry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex2D {
    /// Screen-space position.
    pub position: [f32; 2],
    /// Texture coordinate.
    pub texcoord: [f32; 2],
}

/// The built-in renderpasses, executed world-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinRenderpass {
    /// 3D world pass: clears color + depth + stencil.
    World,
    /// UI overlay pass: loads the world output, presents.
    Ui,
}

/// Name the world renderpass is registered under.
pub const BUILTIN_RENDERPASS_WORLD_NAME: &str = "Renderpass.Builtin.World";
/// Name the UI renderpass is registered under.
pub const BUILTIN_RENDERPASS_UI_NAME: &str = "Renderpass.Builtin.Ui";

/// One geometry draw within a frame packet.
#[derive(Debug, Clone, Copy)]
pub struct GeometryRenderData {
    /// World transform of the geometry.
    pub model: Mat4,
    /// Geometry system id.
    pub geometry: u32,
}

/// Everything a frame needs to render.
#[derive(Debug, Default)]
pub struct RenderPacket {
    /// Seconds since the previous frame.
    pub delta_time: f32,
    /// World-pass geometries.
    pub geometries: Vec<GeometryRenderData>,
    /// UI-pass geometries.
    pub ui_geometries: Vec<GeometryRenderData>,
}

// ---------------------------------------------------------------------------
// Shader records
// ---------------------------------------------------------------------------

/// Lifecycle of a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderState {
    /// Not yet created; unusable.
    NotCreated,
    /// Created but not initialized; accepts attribute/uniform registration.
    Uninitialized,
    /// Fully initialized and usable.
    Initialized,
}

/// Scope of a uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderScope {
    /// One set per frame, shared across draws.
    Global,
    /// Per material/object, rebound on demand.
    Instance,
    /// Per draw, delivered via push constants.
    Local,
}

/// Shader pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex,
    /// Fragment stage.
    Fragment,
    /// Geometry stage (not yet supported by the backend).
    Geometry,
    /// Compute stage (not yet supported by the backend).
    Compute,
}

/// Vertex attribute data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ShaderAttributeType {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
}

impl ShaderAttributeType {
    /// Size of one attribute of this type, in bytes.
    pub fn size(self) -> u32 {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Float32 | Self::Int32 | Self::UInt32 => 4,
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }
}

/// Uniform data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ShaderUniformType {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Matrix4,
    Sampler,
}

impl ShaderUniformType {
    /// Size of one uniform of this type in bytes; samplers report 0.
    pub fn size(self) -> u16 {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Float32 | Self::Int32 | Self::UInt32 => 4,
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
            Self::Matrix4 => 64,
            Self::Sampler => 0,
        }
    }
}

/// One registered vertex attribute.
#[derive(Debug, Clone)]
pub struct ShaderAttribute {
    /// Attribute name.
    pub name: String,
    /// Attribute type.
    pub attribute_type: ShaderAttributeType,
    /// Size in bytes.
    pub size: u32,
}

/// One registered uniform.
#[derive(Debug, Clone, Copy)]
pub struct ShaderUniform {
    /// Byte offset from the beginning of its scope's region.
    pub offset: u64,
    /// For samplers: the texture slot within the scope. For everything
    /// else: equal to `index`.
    pub location: u16,
    /// Index into the shader's uniform array.
    pub index: u16,
    /// Size in bytes (0 for samplers).
    pub size: u16,
    /// Descriptor set index (0 = global, 1 = instance,
    /// [`crate::INVALID_ID_U8`] = local).
    pub set_index: u8,
    /// Scope of the uniform.
    pub scope: ShaderScope,
    /// Data type.
    pub uniform_type: ShaderUniformType,
}

/// Configuration for one attribute in a [`ShaderConfig`].
#[derive(Debug, Clone)]
pub struct ShaderAttributeConfig {
    /// Attribute name.
    pub name: String,
    /// Attribute type.
    pub attribute_type: ShaderAttributeType,
}

/// Configuration for one uniform in a [`ShaderConfig`].
#[derive(Debug, Clone)]
pub struct ShaderUniformConfig {
    /// Uniform name.
    pub name: String,
    /// Uniform type.
    pub uniform_type: ShaderUniformType,
    /// Scope the uniform lives in.
    pub scope: ShaderScope,
}

/// Everything needed to create a shader.
#[derive(Debug, Clone)]
pub struct ShaderConfig {
    /// Unique shader name.
    pub name: String,
    /// Whether the shader supports per-instance state.
    pub use_instances: bool,
    /// Whether the shader uses local (push-constant) uniforms.
    pub use_locals: bool,
    /// Name of the renderpass the shader renders in.
    pub renderpass_name: String,
    /// Pipeline stages, parallel to `stage_filenames`.
    pub stages: Vec<ShaderStage>,
    /// SPIR-V resource names, parallel to `stages`.
    pub stage_filenames: Vec<String>,
    /// Vertex attributes, in declaration order.
    pub attributes: Vec<ShaderAttributeConfig>,
    /// Uniforms, in declaration order.
    pub uniforms: Vec<ShaderUniformConfig>,
}

/// Upper bound on push-constant ranges per shader.
pub const SHADER_MAX_PUSH_CONST_RANGES: usize = 32;

/// A shader as the frontend sees it: layout bookkeeping plus an opaque
/// backend payload.
#[derive(Debug)]
pub struct Shader {
    /// Slot index in the shader system.
    pub id: u32,
    /// Unique shader name.
    pub name: String,
    /// Whether per-instance state is supported.
    pub use_instances: bool,
    /// Whether local (push-constant) uniforms are used.
    pub use_locals: bool,

    /// Device-required alignment for UBO strides.
    pub required_ubo_alignment: u64,
    /// Accumulated size of global-scope uniforms.
    pub global_ubo_size: u64,
    /// Aligned stride of the global UBO region.
    pub global_ubo_stride: u64,
    /// Offset of the global UBO region within the uniform buffer.
    pub global_ubo_offset: u64,
    /// Accumulated size of instance-scope uniforms.
    pub ubo_size: u64,
    /// Aligned stride of one instance UBO region.
    pub ubo_stride: u64,

    /// Total bytes consumed by push-constant ranges.
    pub push_constant_size: u64,
    /// Push-constant budget; the Vulkan guaranteed floor of 128 bytes.
    pub push_constant_stride: u64,
    /// Registered push-constant ranges (4-byte aligned).
    pub push_constant_ranges: Vec<Range>,

    /// Global-scope texture maps, indexed by sampler location.
    pub global_texture_maps: Vec<TextureMap>,
    /// Number of instance-scope samplers.
    pub instance_texture_count: u8,

    /// Scope most recently bound via `bind_globals`/`bind_instance`.
    pub bound_scope: ShaderScope,
    /// Currently bound instance id.
    pub bound_instance_id: u32,
    /// UBO offset of the currently bound scope.
    pub bound_ubo_offset: u64,

    /// Uniform name → index into `uniforms`.
    pub uniform_lookup: std::collections::HashMap<String, u16>,
    /// Registered uniforms in declaration order.
    pub uniforms: Vec<ShaderUniform>,
    /// Registered attributes in declaration order.
    pub attributes: Vec<ShaderAttribute>,
    /// Total size of all attributes; the vertex stride.
    pub attribute_stride: u16,

    /// Lifecycle state.
    pub state: ShaderState,
    /// Backend payload handle.
    pub internal: Option<ShaderKey>,
}

impl Shader {
    /// Creates an empty shader record in the `NotCreated` state.
    pub fn new(id: u32, name: &str, use_instances: bool, use_locals: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            use_instances,
            use_locals,
            required_ubo_alignment: 0,
            global_ubo_size: 0,
            global_ubo_stride: 0,
            global_ubo_offset: 0,
            ubo_size: 0,
            ubo_stride: 0,
            push_constant_size: 0,
            // Vulkan only guarantees 128 bytes of push constants, so that
            // is the budget
            push_constant_stride: 128,
            push_constant_ranges: Vec::new(),
            global_texture_maps: Vec::new(),
            instance_texture_count: 0,
            bound_scope: ShaderScope::Global,
            bound_instance_id: INVALID_ID,
            bound_ubo_offset: 0,
            uniform_lookup: std::collections::HashMap::new(),
            uniforms: Vec::new(),
            attributes: Vec::new(),
            attribute_stride: 0,
            state: ShaderState::NotCreated,
            internal: None,
        }
    }
}

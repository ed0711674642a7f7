//! Backend shader state
//!
//! Everything the Vulkan side holds per shader: stage modules, descriptor
//! set layouts and pool, the persistently mapped uniform buffer, the
//! pipeline, and the per-instance state table with per-image descriptor
//! generation stamps.

use ash::vk;

use super::buffer::VulkanBuffer;
use super::pipeline::Pipeline;
use crate::renderer::types::{
    BuiltinRenderpass, ShaderAttributeType, TextureFilter, TextureMap, TextureRepeat,
};
use crate::INVALID_ID;

/// Index of the global descriptor set.
pub const DESC_SET_INDEX_GLOBAL: usize = 0;
/// Index of the instance descriptor set.
pub const DESC_SET_INDEX_INSTANCE: usize = 1;
/// Binding index of the UBO within a set.
pub const BINDING_INDEX_UBO: u32 = 0;
/// Binding index of the sampler array within a set.
pub const BINDING_INDEX_SAMPLER: u32 = 1;

/// Maximum number of shader stages.
pub const VULKAN_SHADER_MAX_STAGES: usize = 8;
/// Per-shader instance state slots.
pub const VULKAN_SHADER_MAX_INSTANCES: usize = 1024;
/// Materials the uniform buffer is sized for.
pub const VULKAN_MAX_MATERIAL_COUNT: u64 = 1024;
/// Descriptor sets allocatable from a shader's pool.
pub const VULKAN_SHADER_MAX_DESCRIPTOR_ALLOCATE_COUNT: u32 = 1024;
/// Descriptor sets kept per in-flight image.
pub const IMAGE_SET_COUNT: usize = 3;

/// One shader stage: the SPIR-V resource name and its stage flag.
#[derive(Debug, Clone)]
pub struct VulkanShaderStageConfig {
    /// Stage flag bit.
    pub stage: vk::ShaderStageFlags,
    /// Resource name of the SPIR-V binary.
    pub file_name: String,
}

/// A created shader module for one stage.
#[derive(Debug, Clone, Copy)]
pub struct VulkanShaderStage {
    /// The compiled module.
    pub module: vk::ShaderModule,
    /// Stage flag bit.
    pub stage: vk::ShaderStageFlags,
}

/// Descriptor layout bindings for one set.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetConfig {
    /// Layout bindings, UBO first, samplers second.
    pub bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

/// Generation stamps for one descriptor binding, one entry per in-flight
/// image. [`INVALID_ID`] means "needs re-write on next use".
#[derive(Debug, Clone, Copy)]
pub struct VulkanDescriptorState {
    /// Per-image generation stamps.
    pub generations: [u32; IMAGE_SET_COUNT],
    /// Per-image resource ids (texture ids for samplers).
    pub ids: [u32; IMAGE_SET_COUNT],
}

impl Default for VulkanDescriptorState {
    fn default() -> Self {
        Self {
            generations: [INVALID_ID; IMAGE_SET_COUNT],
            ids: [INVALID_ID; IMAGE_SET_COUNT],
        }
    }
}

/// Descriptor sets + state for one instance.
#[derive(Debug, Clone, Default)]
pub struct VulkanShaderDescriptorSetState {
    /// One descriptor set per in-flight image.
    pub descriptor_sets: [vk::DescriptorSet; IMAGE_SET_COUNT],
    /// One state entry per binding in the set.
    pub descriptor_states: Vec<VulkanDescriptorState>,
}

/// Per-instance backend state: UBO offset, texture maps and descriptor
/// generations.
#[derive(Debug, Clone)]
pub struct VulkanShaderInstanceState {
    /// Instance id, [`INVALID_ID`] when free.
    pub id: u32,
    /// Offset of the instance's region within the uniform buffer.
    pub offset: u64,
    /// Descriptor sets and per-image generation stamps.
    pub descriptor_set_state: VulkanShaderDescriptorSetState,
    /// Instance-scope texture maps, indexed by sampler location.
    pub instance_texture_maps: Vec<TextureMap>,
}

impl Default for VulkanShaderInstanceState {
    fn default() -> Self {
        Self {
            id: INVALID_ID,
            offset: 0,
            descriptor_set_state: VulkanShaderDescriptorSetState::default(),
            instance_texture_maps: Vec::new(),
        }
    }
}

/// Backend-owned shader payload.
pub struct VulkanShader {
    /// Renderpass the pipeline renders in.
    pub renderpass: BuiltinRenderpass,
    /// Stage configuration recorded at create time.
    pub stage_configs: Vec<VulkanShaderStageConfig>,
    /// Created stage modules.
    pub stages: Vec<VulkanShaderStage>,
    /// Descriptor pool size policy.
    pub pool_sizes: [vk::DescriptorPoolSize; 2],
    /// Maximum descriptor sets allocatable from the pool.
    pub max_descriptor_set_count: u32,
    /// Per-set layout binding configuration (global, then instance).
    pub descriptor_set_configs: Vec<DescriptorSetConfig>,
    /// Descriptor pool, created with FREE_DESCRIPTOR_SET.
    pub descriptor_pool: vk::DescriptorPool,
    /// One layout per entry of `descriptor_set_configs`.
    pub descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
    /// Global descriptor sets, one per in-flight image.
    pub global_descriptor_sets: [vk::DescriptorSet; IMAGE_SET_COUNT],
    /// The uniform buffer backing global + instance UBOs.
    pub uniform_buffer: Option<VulkanBuffer>,
    /// Persistently mapped pointer into `uniform_buffer`.
    pub mapped_uniform_buffer: *mut u8,
    /// The graphics pipeline.
    pub pipeline: Pipeline,
    /// Instance state slots.
    pub instance_states: Vec<VulkanShaderInstanceState>,
}

impl VulkanShader {
    /// Creates an empty payload for `renderpass` with all instance slots
    /// free.
    pub fn new(renderpass: BuiltinRenderpass) -> Self {
        Self {
            renderpass,
            stage_configs: Vec::new(),
            stages: Vec::new(),
            pool_sizes: [
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    descriptor_count: 1024,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: 1024,
                },
            ],
            max_descriptor_set_count: VULKAN_SHADER_MAX_DESCRIPTOR_ALLOCATE_COUNT,
            descriptor_set_configs: Vec::new(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set_layouts: Vec::new(),
            global_descriptor_sets: [vk::DescriptorSet::null(); IMAGE_SET_COUNT],
            uniform_buffer: None,
            mapped_uniform_buffer: std::ptr::null_mut(),
            pipeline: Pipeline::default(),
            instance_states: vec![
                VulkanShaderInstanceState::default();
                VULKAN_SHADER_MAX_INSTANCES
            ],
        }
    }

    /// Sampler descriptor count of the instance set (0 when the set or
    /// binding does not exist).
    pub fn instance_sampler_count(&self) -> u32 {
        self.descriptor_set_configs
            .get(DESC_SET_INDEX_INSTANCE)
            .and_then(|set| set.bindings.get(BINDING_INDEX_SAMPLER as usize))
            .map_or(0, |b| b.descriptor_count)
    }
}

/// Maps an engine attribute type to the Vulkan format.
pub fn attribute_format(attribute_type: ShaderAttributeType) -> vk::Format {
    match attribute_type {
        ShaderAttributeType::Float32 => vk::Format::R32_SFLOAT,
        ShaderAttributeType::Float32x2 => vk::Format::R32G32_SFLOAT,
        ShaderAttributeType::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        ShaderAttributeType::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        ShaderAttributeType::Int8 => vk::Format::R8_SINT,
        ShaderAttributeType::UInt8 => vk::Format::R8_UINT,
        ShaderAttributeType::Int16 => vk::Format::R16_SINT,
        ShaderAttributeType::UInt16 => vk::Format::R16_UINT,
        ShaderAttributeType::Int32 => vk::Format::R32_SINT,
        ShaderAttributeType::UInt32 => vk::Format::R32_UINT,
    }
}

/// Maps a filter mode to the Vulkan filter.
pub fn convert_filter_type(filter: TextureFilter) -> vk::Filter {
    match filter {
        TextureFilter::Nearest => vk::Filter::NEAREST,
        TextureFilter::Linear => vk::Filter::LINEAR,
    }
}

/// Maps a repeat mode to the Vulkan sampler address mode.
pub fn convert_repeat_type(repeat: TextureRepeat) -> vk::SamplerAddressMode {
    match repeat {
        TextureRepeat::Repeat => vk::SamplerAddressMode::REPEAT,
        TextureRepeat::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        TextureRepeat::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        TextureRepeat::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

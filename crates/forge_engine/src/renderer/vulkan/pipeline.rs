//! Graphics pipeline wrapper
//!
//! One pipeline per shader. Viewport, scissor and line width are dynamic
//! state; everything else is baked at creation.

use ash::vk;

use super::command_buffer::CommandBuffer;
use crate::foundation::math::Range;
use crate::renderer::backend::{RendererError, RendererResult};

/// A graphics pipeline and its layout.
#[derive(Debug, Default)]
pub struct Pipeline {
    /// Raw pipeline handle.
    pub handle: vk::Pipeline,
    /// Pipeline layout (descriptor sets + push constants).
    pub layout: vk::PipelineLayout,
}

impl Pipeline {
    /// Creates a graphics pipeline.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        device: &ash::Device,
        renderpass: vk::RenderPass,
        stride: u32,
        attributes: &[vk::VertexInputAttributeDescription],
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        stages: &[vk::PipelineShaderStageCreateInfo],
        viewport: vk::Viewport,
        scissor: vk::Rect2D,
        is_wireframe: bool,
        depth_test_enabled: bool,
        push_constant_ranges: &[Range],
    ) -> RendererResult<Self> {
        let viewports = [viewport];
        let scissors = [scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(if is_wireframe {
                vk::PolygonMode::LINE
            } else {
                vk::PolygonMode::FILL
            })
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(depth_test_enabled)
            .depth_write_enable(depth_test_enabled)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // standard alpha blending
        let colour_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build();
        let colour_blend_attachments = [colour_blend_attachment];
        let colour_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&colour_blend_attachments);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::LINE_WIDTH,
        ];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let binding_description = vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(stride)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build();
        let binding_descriptions = [binding_description];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // push constants: vertex+fragment visibility over each range
        let vk_ranges: Vec<vk::PushConstantRange> = push_constant_ranges
            .iter()
            .map(|r| vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                offset: r.offset as u32,
                size: r.size as u32,
            })
            .collect();

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(&vk_ranges);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(RendererError::Api)?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&colour_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(renderpass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| RendererError::Api(err))?
        };

        log::debug!("Graphics pipeline created.");
        Ok(Self {
            handle: pipelines[0],
            layout,
        })
    }

    /// Binds the pipeline on `command_buffer`.
    pub fn bind(
        &self,
        device: &ash::Device,
        command_buffer: &CommandBuffer,
        bind_point: vk::PipelineBindPoint,
    ) {
        unsafe {
            device.cmd_bind_pipeline(command_buffer.handle, bind_point, self.handle);
        }
    }

    /// Destroys the pipeline and its layout.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.handle != vk::Pipeline::null() {
                device.destroy_pipeline(self.handle, None);
                self.handle = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
        }
    }
}

//! Vulkan renderpass wrapper
//!
//! Two passes exist: the world pass (clears color+depth+stencil, hands off
//! to the UI pass) and the UI pass (loads the world output, transitions to
//! present). Attachment layouts derive from the prev/next-pass flags.

use ash::vk;
use bitflags::bitflags;

use super::command_buffer::{CommandBuffer, CommandBufferState};
use crate::foundation::math::Vec4;
use crate::renderer::backend::{RendererError, RendererResult};

bitflags! {
    /// Which attachments a renderpass clears on begin.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClearFlags: u8 {
        /// Clear the color attachment.
        const COLOUR = 0b0000_0001;
        /// Clear the depth attachment.
        const DEPTH = 0b0000_0010;
        /// Clear the stencil attachment.
        const STENCIL = 0b0000_0100;
    }
}

/// The rectangle a renderpass renders into.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderArea {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// A renderpass plus its recorded clear state and render area.
#[derive(Debug)]
pub struct RenderPass {
    /// Raw renderpass handle.
    pub handle: vk::RenderPass,
    /// Area written on begin; re-synced with the framebuffer on resize.
    pub render_area: RenderArea,
    /// Clear color used when `ClearFlags::COLOUR` is set.
    pub clear_colour: Vec4,
    /// Depth clear value.
    pub depth: f32,
    /// Stencil clear value.
    pub stencil: u32,
    clear_flags: ClearFlags,
}

impl RenderPass {
    /// Creates a renderpass with one subpass over a color attachment and,
    /// when depth clearing is requested, a depth attachment.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        device: &ash::Device,
        colour_format: vk::Format,
        depth_format: vk::Format,
        render_area: RenderArea,
        clear_colour: Vec4,
        depth: f32,
        stencil: u32,
        clear_flags: ClearFlags,
        has_prev_pass: bool,
        has_next_pass: bool,
    ) -> RendererResult<Self> {
        let do_clear_colour = clear_flags.contains(ClearFlags::COLOUR);
        let do_clear_depth = clear_flags.contains(ClearFlags::DEPTH);

        let mut attachment_descriptions: Vec<vk::AttachmentDescription> = Vec::with_capacity(2);

        let colour_attachment = vk::AttachmentDescription::builder()
            .format(colour_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(if do_clear_colour {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::LOAD
            })
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(if has_prev_pass {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::UNDEFINED
            })
            .final_layout(if has_next_pass {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::PRESENT_SRC_KHR
            })
            .build();
        attachment_descriptions.push(colour_attachment);

        let colour_reference = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let colour_references = [colour_reference];

        let depth_reference = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&colour_references);

        if do_clear_depth {
            let depth_attachment = vk::AttachmentDescription::builder()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build();
            attachment_descriptions.push(depth_attachment);
            subpass = subpass.depth_stencil_attachment(&depth_reference);
        }

        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            );
        let dependencies = [dependency.build()];

        let subpasses = [subpass.build()];
        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachment_descriptions)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = unsafe {
            device
                .create_render_pass(&create_info, None)
                .map_err(RendererError::Api)?
        };

        Ok(Self {
            handle,
            render_area,
            clear_colour,
            depth,
            stencil,
            clear_flags,
        })
    }

    /// Records `vkCmdBeginRenderPass` with the pass's clear values and
    /// render area; moves the command buffer into the in-renderpass state.
    pub fn begin(
        &self,
        device: &ash::Device,
        command_buffer: &mut CommandBuffer,
        framebuffer: vk::Framebuffer,
    ) {
        let mut clear_values: Vec<vk::ClearValue> = Vec::with_capacity(2);
        if self.clear_flags.contains(ClearFlags::COLOUR) {
            clear_values.push(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [
                        self.clear_colour.x,
                        self.clear_colour.y,
                        self.clear_colour.z,
                        self.clear_colour.w,
                    ],
                },
            });
        }
        if self.clear_flags.contains(ClearFlags::DEPTH) {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.depth,
                    stencil: if self.clear_flags.contains(ClearFlags::STENCIL) {
                        self.stencil
                    } else {
                        0
                    },
                },
            });
        }

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.handle)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D {
                    x: self.render_area.x,
                    y: self.render_area.y,
                },
                extent: vk::Extent2D {
                    width: self.render_area.width,
                    height: self.render_area.height,
                },
            })
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(
                command_buffer.handle,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
        command_buffer.state = CommandBufferState::InRenderPass;
    }

    /// Records `vkCmdEndRenderPass`; the command buffer returns to the
    /// recording state.
    pub fn end(&self, device: &ash::Device, command_buffer: &mut CommandBuffer) {
        unsafe {
            device.cmd_end_render_pass(command_buffer.handle);
        }
        command_buffer.state = CommandBufferState::Recording;
    }

    /// Destroys the renderpass.
    pub fn destroy(&mut self, device: &ash::Device) {
        if self.handle != vk::RenderPass::null() {
            unsafe {
                device.destroy_render_pass(self.handle, None);
            }
            self.handle = vk::RenderPass::null();
        }
    }
}

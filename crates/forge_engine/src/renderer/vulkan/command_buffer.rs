//! Vulkan command buffer wrapper
//!
//! Tracks the recording lifecycle as an explicit state machine:
//! NotAllocated → Ready → Recording → InRenderPass → Recording →
//! RecordingEnded → Submitted → (reset) Ready.

use ash::vk;

use crate::renderer::backend::{RendererError, RendererResult};

/// Lifecycle states of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandBufferState {
    /// No Vulkan handle allocated.
    #[default]
    NotAllocated,
    /// Allocated and ready to begin recording.
    Ready,
    /// Between `begin` and `end`.
    Recording,
    /// Inside a renderpass.
    InRenderPass,
    /// Recording finished, not yet submitted.
    RecordingEnded,
    /// Submitted to a queue.
    Submitted,
}

/// A command buffer plus its recording state.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    /// Raw handle; null when not allocated.
    pub handle: vk::CommandBuffer,
    /// Current lifecycle state.
    pub state: CommandBufferState,
}

impl CommandBuffer {
    /// Allocates a command buffer from `pool`.
    pub fn allocate(
        device: &ash::Device,
        pool: vk::CommandPool,
        is_primary: bool,
    ) -> RendererResult<Self> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(if is_primary {
                vk::CommandBufferLevel::PRIMARY
            } else {
                vk::CommandBufferLevel::SECONDARY
            })
            .command_buffer_count(1);

        let handles = unsafe {
            device
                .allocate_command_buffers(&allocate_info)
                .map_err(RendererError::Api)?
        };

        Ok(Self {
            handle: handles[0],
            state: CommandBufferState::Ready,
        })
    }

    /// Returns the command buffer to `pool`.
    pub fn free(&mut self, device: &ash::Device, pool: vk::CommandPool) {
        if self.handle != vk::CommandBuffer::null() {
            unsafe {
                device.free_command_buffers(pool, &[self.handle]);
            }
        }
        self.handle = vk::CommandBuffer::null();
        self.state = CommandBufferState::NotAllocated;
    }

    /// Begins recording.
    pub fn begin(
        &mut self,
        device: &ash::Device,
        is_single_use: bool,
        is_renderpass_continue: bool,
        is_simultaneous_use: bool,
    ) -> RendererResult<()> {
        let mut flags = vk::CommandBufferUsageFlags::empty();
        if is_single_use {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        if is_renderpass_continue {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        if is_simultaneous_use {
            flags |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
        }

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe {
            device
                .begin_command_buffer(self.handle, &begin_info)
                .map_err(RendererError::Api)?;
        }
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Ends recording.
    pub fn end(&mut self, device: &ash::Device) -> RendererResult<()> {
        unsafe {
            device
                .end_command_buffer(self.handle)
                .map_err(RendererError::Api)?;
        }
        self.state = CommandBufferState::RecordingEnded;
        Ok(())
    }

    /// Marks the buffer as submitted.
    pub fn update_submitted(&mut self) {
        self.state = CommandBufferState::Submitted;
    }

    /// Marks the buffer ready for a fresh recording.
    pub fn reset(&mut self) {
        self.state = CommandBufferState::Ready;
    }

    /// Allocates a primary buffer and immediately begins a single-use
    /// recording.
    pub fn allocate_and_begin_single_use(
        device: &ash::Device,
        pool: vk::CommandPool,
    ) -> RendererResult<Self> {
        let mut buffer = Self::allocate(device, pool, true)?;
        buffer.begin(device, true, false, false)?;
        Ok(buffer)
    }

    /// Ends a single-use recording, submits it, waits for the queue to
    /// drain and frees the buffer.
    pub fn end_single_use(
        &mut self,
        device: &ash::Device,
        pool: vk::CommandPool,
        queue: vk::Queue,
    ) -> RendererResult<()> {
        self.end(device)?;

        let handles = [self.handle];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&handles);
        unsafe {
            device
                .queue_submit(queue, &[submit_info.build()], vk::Fence::null())
                .map_err(RendererError::Api)?;
            device.queue_wait_idle(queue).map_err(RendererError::Api)?;
        }
        self.update_submitted();
        self.free(device, pool);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_not_allocated() {
        let buffer = CommandBuffer::default();
        assert_eq!(buffer.state, CommandBufferState::NotAllocated);
        assert_eq!(buffer.handle, vk::CommandBuffer::null());
    }

    #[test]
    fn test_pure_transitions() {
        let mut buffer = CommandBuffer {
            handle: vk::CommandBuffer::null(),
            state: CommandBufferState::RecordingEnded,
        };
        buffer.update_submitted();
        assert_eq!(buffer.state, CommandBufferState::Submitted);
        buffer.reset();
        assert_eq!(buffer.state, CommandBufferState::Ready);
    }
}

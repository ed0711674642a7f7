//! Vulkan buffer wrapper and sub-allocation
//!
//! Large device-local buffers (the shared geometry vertex/index stores,
//! shader uniform buffers) hand out ranges through a first-fit free list;
//! `allocate`/`free` operate purely on offsets so callers can copy into
//! their range with a staging buffer.

use ash::vk;

use super::command_buffer::CommandBuffer;
use super::device::find_memory_index;
use crate::renderer::backend::{RendererError, RendererResult};

/// First-fit free list over a `[0, total_size)` byte range.
#[derive(Debug, Clone)]
pub struct FreeList {
    total_size: u64,
    // sorted by offset, non-adjacent
    free_blocks: Vec<(u64, u64)>,
}

impl FreeList {
    /// Creates a list with the whole range free.
    pub fn new(total_size: u64) -> Self {
        Self {
            total_size,
            free_blocks: vec![(0, total_size)],
        }
    }

    /// Reserves `size` bytes, returning the offset of the allocation.
    pub fn allocate(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        for i in 0..self.free_blocks.len() {
            let (offset, block_size) = self.free_blocks[i];
            if block_size >= size {
                if block_size == size {
                    self.free_blocks.remove(i);
                } else {
                    self.free_blocks[i] = (offset + size, block_size - size);
                }
                return Some(offset);
            }
        }
        None
    }

    /// Returns `[offset, offset + size)` to the free pool, merging with
    /// adjacent free blocks.
    pub fn free(&mut self, offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        let index = self
            .free_blocks
            .iter()
            .position(|&(o, _)| o > offset)
            .unwrap_or(self.free_blocks.len());
        self.free_blocks.insert(index, (offset, size));

        // merge with the following block
        if index + 1 < self.free_blocks.len() {
            let (next_offset, next_size) = self.free_blocks[index + 1];
            if offset + size == next_offset {
                self.free_blocks[index].1 += next_size;
                self.free_blocks.remove(index + 1);
            }
        }
        // merge with the preceding block
        if index > 0 {
            let (prev_offset, prev_size) = self.free_blocks[index - 1];
            if prev_offset + prev_size == offset {
                self.free_blocks[index - 1].1 += self.free_blocks[index].1;
                self.free_blocks.remove(index);
            }
        }
    }

    /// Grows the managed range to `new_total_size`.
    pub fn grow(&mut self, new_total_size: u64) {
        if new_total_size > self.total_size {
            let added = new_total_size - self.total_size;
            self.free(self.total_size, added);
            self.total_size = new_total_size;
        }
    }

    /// Total bytes currently free.
    pub fn free_space(&self) -> u64 {
        self.free_blocks.iter().map(|&(_, s)| s).sum()
    }
}

/// A Vulkan buffer with bound memory and offset bookkeeping.
#[derive(Debug)]
pub struct VulkanBuffer {
    /// Raw buffer handle.
    pub handle: vk::Buffer,
    memory: vk::DeviceMemory,
    /// Total buffer size in bytes.
    pub total_size: u64,
    usage: vk::BufferUsageFlags,
    memory_property_flags: vk::MemoryPropertyFlags,
    memory_index: u32,
    free_list: FreeList,
}

impl VulkanBuffer {
    /// An empty buffer with null handles, used as a placeholder before
    /// the real resource exists.
    pub fn null() -> Self {
        Self {
            handle: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            total_size: 0,
            usage: vk::BufferUsageFlags::empty(),
            memory_property_flags: vk::MemoryPropertyFlags::empty(),
            memory_index: 0,
            free_list: FreeList::new(0),
        }
    }

    /// Creates a buffer, allocates matching memory and optionally binds it.
    pub fn create(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_property_flags: vk::MemoryPropertyFlags,
        bind_on_create: bool,
    ) -> RendererResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(RendererError::Api)?
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };
        let memory_index = find_memory_index(
            memory_properties,
            requirements.memory_type_bits,
            memory_property_flags,
        )
        .ok_or(RendererError::NoSuitableMemoryType)?;

        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_index);

        let memory = unsafe {
            device
                .allocate_memory(&allocate_info, None)
                .map_err(RendererError::Api)?
        };

        let mut buffer = Self {
            handle,
            memory,
            total_size: size,
            usage,
            memory_property_flags,
            memory_index,
            free_list: FreeList::new(size),
        };

        if bind_on_create {
            buffer.bind(device, 0)?;
        }
        Ok(buffer)
    }

    /// Destroys the buffer and frees its memory.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
            if self.handle != vk::Buffer::null() {
                device.destroy_buffer(self.handle, None);
                self.handle = vk::Buffer::null();
            }
        }
        self.total_size = 0;
    }

    /// Binds the buffer's memory at `offset`.
    pub fn bind(&mut self, device: &ash::Device, offset: u64) -> RendererResult<()> {
        unsafe {
            device
                .bind_buffer_memory(self.handle, self.memory, offset)
                .map_err(RendererError::Api)
        }
    }

    /// Maps `size` bytes starting at `offset`, returning the host pointer.
    pub fn lock_memory(
        &self,
        device: &ash::Device,
        offset: u64,
        size: u64,
    ) -> RendererResult<*mut std::ffi::c_void> {
        unsafe {
            device
                .map_memory(self.memory, offset, size, vk::MemoryMapFlags::empty())
                .map_err(RendererError::Api)
        }
    }

    /// Unmaps previously locked memory.
    pub fn unlock_memory(&self, device: &ash::Device) {
        unsafe {
            device.unmap_memory(self.memory);
        }
    }

    /// Maps, copies `data` at `offset`, and unmaps.
    pub fn load_data(
        &self,
        device: &ash::Device,
        offset: u64,
        data: &[u8],
    ) -> RendererResult<()> {
        let dst = self.lock_memory(device, offset, data.len() as u64)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst.cast::<u8>(), data.len());
        }
        self.unlock_memory(device);
        Ok(())
    }

    /// Reserves `size` bytes within the buffer, returning the offset.
    pub fn allocate(&mut self, size: u64) -> RendererResult<u64> {
        self.free_list.allocate(size).ok_or_else(|| {
            RendererError::ResourceShortage(format!(
                "buffer cannot serve a {size}-byte sub-allocation"
            ))
        })
    }

    /// Returns a previously allocated range to the free pool.
    pub fn free(&mut self, size: u64, offset: u64) {
        self.free_list.free(offset, size);
    }

    /// Records a region copy between buffers through a single-use command
    /// buffer and waits for it to complete.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_to(
        device: &ash::Device,
        pool: vk::CommandPool,
        queue: vk::Queue,
        source: vk::Buffer,
        source_offset: u64,
        dest: vk::Buffer,
        dest_offset: u64,
        size: u64,
    ) -> RendererResult<()> {
        unsafe {
            device.queue_wait_idle(queue).map_err(RendererError::Api)?;
        }
        let mut temp = CommandBuffer::allocate_and_begin_single_use(device, pool)?;

        let copy_region = vk::BufferCopy::builder()
            .src_offset(source_offset)
            .dst_offset(dest_offset)
            .size(size);
        unsafe {
            device.cmd_copy_buffer(temp.handle, source, dest, &[copy_region.build()]);
        }

        temp.end_single_use(device, pool, queue)
    }

    /// Resizes the buffer: creates a new buffer + memory, copies the old
    /// contents on `queue`, waits idle and destroys the old pair.
    pub fn resize(
        &mut self,
        device: &ash::Device,
        new_size: u64,
        queue: vk::Queue,
        pool: vk::CommandPool,
    ) -> RendererResult<()> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(new_size)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let new_buffer = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(RendererError::Api)?
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(new_buffer) };
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(self.memory_index);

        let new_memory = unsafe {
            device
                .allocate_memory(&allocate_info, None)
                .map_err(RendererError::Api)?
        };
        unsafe {
            device
                .bind_buffer_memory(new_buffer, new_memory, 0)
                .map_err(RendererError::Api)?;
        }

        Self::copy_to(
            device,
            pool,
            queue,
            self.handle,
            0,
            new_buffer,
            0,
            self.total_size,
        )?;

        unsafe {
            device.device_wait_idle().map_err(RendererError::Api)?;
            device.free_memory(self.memory, None);
            device.destroy_buffer(self.handle, None);
        }

        self.free_list.grow(new_size);
        self.total_size = new_size;
        self.memory = new_memory;
        self.handle = new_buffer;
        Ok(())
    }

    /// The memory property flags the buffer was created with.
    pub fn memory_property_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_property_flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_list_first_fit() {
        let mut list = FreeList::new(100);
        assert_eq!(list.allocate(10), Some(0));
        assert_eq!(list.allocate(20), Some(10));
        assert_eq!(list.allocate(30), Some(30));
        assert_eq!(list.free_space(), 40);
    }

    #[test]
    fn test_free_list_reuses_freed_ranges() {
        let mut list = FreeList::new(100);
        let a = list.allocate(10).unwrap();
        let _b = list.allocate(10).unwrap();
        list.free(a, 10);
        // the freed head range is handed out again
        assert_eq!(list.allocate(10), Some(a));
    }

    #[test]
    fn test_free_list_merges_neighbors() {
        let mut list = FreeList::new(100);
        let a = list.allocate(25).unwrap();
        let b = list.allocate(25).unwrap();
        let c = list.allocate(25).unwrap();
        assert_eq!((a, b, c), (0, 25, 50));

        list.free(b, 25);
        list.free(a, 25);
        list.free(c, 25);
        // everything merged back into a single block
        assert_eq!(list.free_space(), 100);
        assert_eq!(list.allocate(100), Some(0));
    }

    #[test]
    fn test_free_list_exhaustion() {
        let mut list = FreeList::new(64);
        assert_eq!(list.allocate(64), Some(0));
        assert_eq!(list.allocate(1), None);
        list.free(0, 64);
        assert_eq!(list.allocate(1), Some(0));
    }

    #[test]
    fn test_free_list_fragmentation_respects_fit() {
        let mut list = FreeList::new(30);
        let a = list.allocate(10).unwrap();
        let _b = list.allocate(10).unwrap();
        let c = list.allocate(10).unwrap();
        list.free(a, 10);
        list.free(c, 10);
        // 20 bytes are free but not contiguous
        assert_eq!(list.allocate(20), None);
        assert_eq!(list.allocate(10), Some(0));
    }

    #[test]
    fn test_free_list_grow() {
        let mut list = FreeList::new(10);
        assert_eq!(list.allocate(10), Some(0));
        list.grow(30);
        assert_eq!(list.allocate(20), Some(10));
    }
}

//! Buffer creation and upload paths.
//!
//! [`Buffer`] owns a `VkBuffer` together with its gpu-allocator
//! allocation. Host-visible buffers are written through the persistent
//! mapping; device-local buffers are filled once through a staging copy
//! on the graphics queue.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::sync::Fence;

/// Role a buffer is created for; decides usage flags and memory placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Shader uniform data, rewritten by the CPU every frame.
    Uniform,
    /// Bulk shader-readable data.
    Storage,
    /// Transfer source for uploads.
    Staging,
}

impl BufferUsage {
    /// The Vulkan usage flags for this role.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Uniform => {
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Where the allocation should live.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Uniform => MemoryLocation::CpuToGpu,
            BufferUsage::Storage => MemoryLocation::GpuOnly,
            BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    /// Role name used in allocation labels and log lines.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
        }
    }
}

/// A buffer and its backing allocation. Not internally synchronized;
/// share behind external synchronization only.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Creates an uninitialized buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or if buffer creation, memory
    /// allocation, or binding fails.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "buffer size must be nonzero".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };
        let allocation = device.allocator().lock().unwrap().allocate(&AllocationCreateDesc {
            name: usage.name(),
            requirements,
            location: usage.memory_location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("Created {} buffer, {} bytes", usage.name(), size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Creates a host-visible buffer pre-filled with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails or the memory is not mapped.
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Creates a device-local buffer and fills it through a staging copy.
    ///
    /// The copy is recorded into a one-shot command buffer from `pool`,
    /// submitted on the graphics queue, and fence-waited before this
    /// returns, so the staging buffer can be dropped immediately. The
    /// usage's Vulkan flags must include `TRANSFER_DST`, which both
    /// [`BufferUsage::Uniform`] and [`BufferUsage::Storage`] do.
    ///
    /// # Errors
    ///
    /// Returns an error if creation, recording, or submission fails.
    pub fn new_device_local_with_data(
        device: Arc<Device>,
        usage: BufferUsage,
        data: &[u8],
        pool: &CommandPool,
    ) -> RhiResult<Self> {
        let buffer = Self::new(device.clone(), usage, data.len() as vk::DeviceSize)?;
        let staging = Self::new_with_data(device.clone(), BufferUsage::Staging, data)?;

        let cmd = CommandBuffer::new(device.clone(), pool)?;
        cmd.begin()?;
        let region = vk::BufferCopy::default().size(data.len() as vk::DeviceSize);
        cmd.copy_buffer(
            staging.handle(),
            buffer.handle(),
            std::slice::from_ref(&region),
        );
        cmd.end()?;

        let fence = Fence::new(device.clone(), false)?;
        let command_buffers = [cmd.handle()];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            device.submit_graphics(std::slice::from_ref(&submit), fence.handle())?;
        }
        fence.wait(u64::MAX)?;

        unsafe {
            device
                .handle()
                .free_command_buffers(pool.handle(), &command_buffers);
        }

        debug!(
            "Uploaded {} bytes into device-local {} buffer",
            data.len(),
            usage.name()
        );

        Ok(buffer)
    }

    /// Copies `data` into the mapped allocation at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write would overrun the buffer or the
    /// memory has no host mapping (device-local buffers).
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let fits = offset
            .checked_add(data.len() as vk::DeviceSize)
            .is_some_and(|end| end <= self.size);
        if !fits {
            return Err(RhiError::InvalidHandle(format!(
                "write of {} bytes at offset {} overruns {}-byte buffer",
                data.len(),
                offset,
                self.size
            )));
        }

        let mapped = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or_else(|| RhiError::InvalidHandle("buffer memory is not mapped".to_string()))?;

        unsafe {
            let dst = mapped.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// The raw buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // The allocation must be returned before the buffer handle dies.
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().lock().unwrap().free(allocation) {
                tracing::error!("Failed to free buffer allocation: {:?}", e);
            }
        }
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_flags_cover_their_roles() {
        let uniform = BufferUsage::Uniform.to_vk_usage();
        assert!(uniform.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(uniform.contains(vk::BufferUsageFlags::TRANSFER_DST));

        let storage = BufferUsage::Storage.to_vk_usage();
        assert!(storage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(storage.contains(vk::BufferUsageFlags::TRANSFER_DST));

        let staging = BufferUsage::Staging.to_vk_usage();
        assert!(staging.contains(vk::BufferUsageFlags::TRANSFER_SRC));
        assert!(!staging.contains(vk::BufferUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn memory_locations_match_access_patterns() {
        assert_eq!(BufferUsage::Uniform.memory_location(), MemoryLocation::CpuToGpu);
        assert_eq!(BufferUsage::Storage.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsage::Staging.memory_location(), MemoryLocation::CpuToGpu);
    }

    #[test]
    fn usage_names() {
        assert_eq!(BufferUsage::Uniform.name(), "uniform");
        assert_eq!(BufferUsage::Storage.name(), "storage");
        assert_eq!(BufferUsage::Staging.name(), "staging");
    }
}

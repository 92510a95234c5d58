//! Logical device, queues, and the GPU memory allocator.
//!
//! [`Device`] is the hub every other RHI object hangs off: it owns the
//! `VkDevice`, the graphics and present queues, and a `gpu-allocator`
//! instance behind a mutex. It is handed around as `Arc<Device>` so that
//! resources can keep the device alive from their drop glue.

use std::ffi::CStr;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Extensions the logical device is created with.
const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// The logical device plus the queues and allocator created with it.
///
/// Shared as `Arc<Device>`. Allocation goes through the internal mutex;
/// everything else is immutable after creation.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    allocator: Mutex<Allocator>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
}

impl Device {
    /// Creates the logical device on the selected physical device.
    ///
    /// One queue is created per unique family. The swapchain extension is
    /// enabled, along with the Vulkan 1.2 `buffer_device_address` feature
    /// that the allocator is configured for.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator setup fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let families = &physical_device_info.queue_families;
        let priorities = [1.0f32];

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique_families()
            .into_iter()
            .map(|index| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(index)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extensions: Vec<*const i8> =
            DEVICE_EXTENSIONS.iter().map(|name| name.as_ptr()).collect();

        let mut vulkan_12 =
            vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut vulkan_12);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        let graphics_family = families.graphics_family.unwrap();
        let present_family = families.present_family.unwrap();
        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved (graphics family {}, present family {})",
            graphics_family, present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        info!("Logical device and allocator ready");

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            allocator: Mutex::new(allocator),
            graphics_queue,
            present_queue,
            queue_families: physical_device_info.queue_families,
        }))
    }

    /// The raw `ash` device.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// The physical device this logical device was created on.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// The presentation queue.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// The queue family indices the device was built with.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// The GPU memory allocator, shared behind a mutex.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Blocks until every queue on the device has drained.
    ///
    /// # Errors
    ///
    /// Returns an error if the device was lost.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Blocks until the present queue has drained. Used by the
    /// wait-after-present throttle policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the device was lost.
    pub fn wait_present_queue_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.queue_wait_idle(self.present_queue)? };
        Ok(())
    }

    /// Submits recorded command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// Every command buffer in `submit_infos` must be fully recorded, the
    /// referenced semaphores must follow Vulkan's signaling rules, and
    /// `fence` must be unsignaled or null.
    ///
    /// # Errors
    ///
    /// Returns an error if the submission is rejected.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Device idle wait failed during drop: {:?}", e);
            }
            // The allocator drops with the mutex; callers must have freed
            // every allocation before the device goes away.
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Raw Vulkan handles are plain identifiers and the allocator sits behind
// a mutex, so sharing the device across threads is sound.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_extension_list_has_swapchain() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}

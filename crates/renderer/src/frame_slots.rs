//! Per-frame resource slots and frame synchronization.
//!
//! Each slot owns everything one CPU-recorded frame needs: a command
//! buffer, a host-visible uniform buffer, a descriptor pool arena, two
//! semaphores, and the fence that marks the slot's GPU work as retired.
//! Slots are reused round-robin; a slot is never touched again until its
//! fence has signaled.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use raytracer_rhi::buffer::{Buffer, BufferUsage};
use raytracer_rhi::command::{CommandBuffer, CommandPool};
use raytracer_rhi::descriptor::DescriptorPool;
use raytracer_rhi::device::Device;
use raytracer_rhi::swapchain::Swapchain;
use raytracer_rhi::sync::{Fence, Semaphore};
use raytracer_rhi::{RhiError, RhiResult};

use crate::ubo::GlobalUbo;

/// Descriptor sets written per frame: global, trace, accumulate, composite.
const SETS_PER_FRAME: u32 = 4;

/// Computes the slot index that follows `current` in the ring.
#[inline]
fn next_slot_index(current: usize, count: usize) -> usize {
    (current + 1) % count
}

/// Resources owned by a single frame slot.
pub struct FrameSlot {
    /// Command buffer re-recorded each time the slot is reused.
    command_buffer: CommandBuffer,
    /// Host-visible uniform buffer holding this frame's [`GlobalUbo`].
    global_ubo: Buffer,
    /// Arena pool the frame's descriptor sets are allocated from.
    descriptor_pool: DescriptorPool,
    /// Waited on by the submit, signaled by the acquire.
    image_available_semaphore: Semaphore,
    /// Signaled by the submit, waited on by the present.
    render_finished_semaphore: Semaphore,
    /// Signaled when this slot's GPU work has retired.
    in_flight_fence: Fence,
}

impl FrameSlot {
    fn new(device: Arc<Device>, command_pool: &CommandPool) -> RhiResult<Self> {
        let command_buffer = CommandBuffer::new(device.clone(), command_pool)?;

        let global_ubo = Buffer::new(
            device.clone(),
            BufferUsage::Uniform,
            GlobalUbo::SIZE as vk::DeviceSize,
        )?;

        // Sized for exactly one frame's worth of descriptor sets; the
        // arena is reset wholesale when the slot is reused.
        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::INPUT_ATTACHMENT)
                .descriptor_count(3),
        ];
        let descriptor_pool = DescriptorPool::new(device.clone(), SETS_PER_FRAME, &pool_sizes)?;

        let image_available_semaphore = Semaphore::new(device.clone())?;
        let render_finished_semaphore = Semaphore::new(device.clone())?;

        // Starts signaled: the first wait happens before any submit.
        let in_flight_fence = Fence::new(device, true)?;

        Ok(Self {
            command_buffer,
            global_ubo,
            descriptor_pool,
            image_available_semaphore,
            render_finished_semaphore,
            in_flight_fence,
        })
    }

    /// Returns the slot's command buffer.
    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    /// Returns the slot's uniform buffer.
    #[inline]
    pub fn global_ubo(&self) -> &Buffer {
        &self.global_ubo
    }

    /// Returns the slot's descriptor pool.
    #[inline]
    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.descriptor_pool
    }

    /// Writes this frame's uniform data into the slot's buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer memory is not mapped.
    pub fn write_global_ubo(&self, ubo: &GlobalUbo) -> RhiResult<()> {
        self.global_ubo.write_data(0, bytemuck::bytes_of(ubo))
    }
}

/// Ring of frame slots plus the index state of the frame in progress.
///
/// Drives the per-frame protocol: wait for the slot fence, acquire a
/// swapchain image, record, submit, present, advance. The acquire step
/// reports an out-of-date swapchain as `None` so the caller can abandon
/// the frame before any recording happens.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use raytracer_rhi::command::CommandPool;
/// use raytracer_rhi::device::Device;
/// use raytracer_renderer::frame_slots::FrameSlots;
///
/// # fn example(device: Arc<Device>, pool: &CommandPool) -> Result<(), raytracer_rhi::RhiError> {
/// let slots = FrameSlots::new(device, pool, 2)?;
/// assert_eq!(slots.frames_in_flight(), 2);
/// # Ok(())
/// # }
/// ```
pub struct FrameSlots {
    device: Arc<Device>,
    slots: Vec<FrameSlot>,
    current_slot: usize,
    image_index: u32,
}

impl FrameSlots {
    /// Creates `count` frame slots with command buffers from the given pool.
    ///
    /// # Errors
    ///
    /// Returns an error if `count` is zero or any resource creation fails.
    pub fn new(device: Arc<Device>, command_pool: &CommandPool, count: usize) -> RhiResult<Self> {
        if count == 0 {
            return Err(RhiError::InvalidHandle(
                "Frame slot count must be at least 1".to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            slots.push(FrameSlot::new(device.clone(), command_pool)?);
            debug!("Created frame slot {}", i);
        }

        info!("Frame slots created: {} frames in flight", count);

        Ok(Self {
            device,
            slots,
            current_slot: 0,
            image_index: 0,
        })
    }

    /// Returns the swapchain image index acquired for the current frame.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Returns the number of slots in the ring.
    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Blocks until the current slot's previous GPU work has retired,
    /// then returns the slot.
    ///
    /// This is the only way to get at a slot before reuse, so a slot can
    /// never be re-recorded while its commands are still executing.
    ///
    /// # Errors
    ///
    /// Returns an error if the fence wait fails.
    pub fn wait_current(&self) -> RhiResult<&FrameSlot> {
        let slot = &self.slots[self.current_slot];
        slot.in_flight_fence.wait(u64::MAX)?;
        Ok(slot)
    }

    /// Acquires the next swapchain image using the current slot's
    /// acquire semaphore.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(suboptimal))` - An image was acquired and its index
    ///   stored; `suboptimal` asks for recreation after the frame.
    /// - `Ok(None)` - The swapchain is out of date. Nothing was acquired
    ///   and the frame must be abandoned before recording.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than an out-of-date surface.
    pub fn acquire_image(&mut self, swapchain: &Swapchain) -> RhiResult<Option<bool>> {
        let semaphore = self.slots[self.current_slot]
            .image_available_semaphore
            .handle();

        match swapchain.acquire_next_image(semaphore)? {
            Some((image_index, suboptimal)) => {
                self.image_index = image_index;
                Ok(Some(suboptimal))
            }
            None => Ok(None),
        }
    }

    /// Begins command recording for the current slot.
    ///
    /// Resets the command buffer and the descriptor pool arena, then
    /// puts the command buffer in the recording state.
    ///
    /// # Errors
    ///
    /// Returns an error if any reset or the begin fails.
    pub fn begin_recording(&self) -> RhiResult<&FrameSlot> {
        let slot = &self.slots[self.current_slot];
        slot.command_buffer.reset()?;
        slot.descriptor_pool.reset()?;
        slot.command_buffer.begin()?;
        Ok(slot)
    }

    /// Ends command recording for the current slot.
    pub fn end_recording(&self) -> RhiResult<()> {
        self.slots[self.current_slot].command_buffer.end()
    }

    /// Submits the current slot's command buffer to the graphics queue.
    ///
    /// Waits on the acquire semaphore at the color-attachment-output
    /// stage, signals the render semaphore and the slot fence. The fence
    /// is reset immediately before submission, never earlier, so an
    /// abandoned frame leaves it signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if the fence reset or queue submission fails.
    pub fn submit(&self) -> RhiResult<()> {
        let slot = &self.slots[self.current_slot];

        slot.in_flight_fence.reset()?;

        let wait_semaphores = [slot.image_available_semaphore.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished_semaphore.handle()];
        let command_buffers = [slot.command_buffer.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.submit_graphics(
                std::slice::from_ref(&submit_info),
                slot.in_flight_fence.handle(),
            )?;
        }

        Ok(())
    }

    /// Presents the acquired image, waiting on the render semaphore.
    ///
    /// # Returns
    ///
    /// Returns true when the swapchain is out of date or suboptimal and
    /// should be recreated.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than an out-of-date surface.
    pub fn present(&self, swapchain: &Swapchain) -> RhiResult<bool> {
        let slot = &self.slots[self.current_slot];
        swapchain.present(
            self.device.present_queue(),
            self.image_index,
            slot.render_finished_semaphore.handle(),
        )
    }

    /// Advances to the next slot in the ring.
    pub fn next_frame(&mut self) {
        self.current_slot = next_slot_index(self.current_slot, self.slots.len());
    }

    /// Replaces both semaphores of every slot.
    ///
    /// A present that failed with an out-of-date surface may leave its
    /// wait semaphore in an indeterminate state, so the recreation path
    /// swaps in fresh ones. The caller must have drained the device
    /// first.
    pub fn reset_semaphores(&mut self) -> RhiResult<()> {
        for slot in &mut self.slots {
            slot.image_available_semaphore = Semaphore::new(self.device.clone())?;
            slot.render_finished_semaphore = Semaphore::new(self.device.clone())?;
        }

        debug!("Recreated semaphores for {} frame slots", self.slots.len());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_FRAMES_IN_FLIGHT;

    #[test]
    fn test_max_frames_in_flight_range() {
        // Sanity check on the default: 1 disables pipelining, large
        // values add latency without benefit.
        assert!(MAX_FRAMES_IN_FLIGHT >= 1);
        assert!(MAX_FRAMES_IN_FLIGHT <= 4);
    }

    #[test]
    fn test_sets_per_frame() {
        // One set per pass-facing layout: global, trace, accumulate,
        // composite.
        assert_eq!(SETS_PER_FRAME, 4);
    }

    #[test]
    fn test_slot_ring_wraps() {
        assert_eq!(next_slot_index(0, 2), 1);
        assert_eq!(next_slot_index(1, 2), 0);
        assert_eq!(next_slot_index(2, 3), 0);
        assert_eq!(next_slot_index(0, 1), 0);
    }

    #[test]
    fn test_frame_slots_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameSlot>();
        assert_send::<FrameSlots>();
    }
}

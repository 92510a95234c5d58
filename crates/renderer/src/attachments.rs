//! Offscreen render targets.
//!
//! The frame pipeline draws into three GPU-only color images: the
//! per-frame trace target and the two alternating accumulation images.
//! All three live at swapchain extent and are rebuilt together when the
//! surface is resized. Accumulation contents are cleared to black at
//! (re)build time, so the first frame after any rebuild reads defined
//! history instead of uninitialized memory.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, info};

use raytracer_rhi::command::{CommandBuffer, CommandPool};
use raytracer_rhi::device::Device;
use raytracer_rhi::sync::Fence;
use raytracer_rhi::{RhiError, RhiResult};

use crate::ping_pong::{ACCUMULATION_INDICES, TRACE_INDEX, frame_targets};

/// Format of every offscreen color target.
pub const OFFSCREEN_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Returns true when a resize request actually changes the extent.
///
/// Rebuilding for an unchanged extent would only churn GPU memory, so
/// the attachment set treats such requests as no-ops.
#[inline]
pub fn needs_rebuild(current: vk::Extent2D, requested: vk::Extent2D) -> bool {
    current.width != requested.width || current.height != requested.height
}

/// One GPU-only color image with its view.
///
/// Serves as a subpass color output, an input attachment, or both,
/// depending on the usage flags it was created with.
pub struct Attachment {
    device: Arc<Device>,
    image: vk::Image,
    image_view: vk::ImageView,
    allocation: Option<Allocation>,
}

impl Attachment {
    /// Creates the image, backs it with a GPU-only allocation, and
    /// opens a 2D color view over it.
    ///
    /// `name` labels the allocation in gpu-allocator reports.
    ///
    /// # Errors
    ///
    /// Fails on zero dimensions, or when image, allocation, or view
    /// creation fails.
    pub fn new(
        device: Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        name: &'static str,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidHandle(
                "Attachment dimensions must be greater than 0".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = {
            let mut allocator = device.allocator().lock().unwrap();
            allocator.allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false, // matches OPTIMAL tiling above
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_subresource_range());

        let image_view = unsafe { device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created attachment '{}': {}x{} ({:?})",
            name, extent.width, extent.height, format
        );

        Ok(Self {
            device,
            image,
            image_view,
            allocation: Some(allocation),
        })
    }

    /// Raw image handle.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// View over the whole image.
    #[inline]
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        // The view must go before the image it was opened on.
        unsafe {
            self.device
                .handle()
                .destroy_image_view(self.image_view, None);
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self.device.allocator().lock().unwrap();
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free attachment allocation: {:?}", e);
            }
        }
    }
}

/// The fixed, ordered set of offscreen attachments.
///
/// Index 0 is the trace target; indices 1 and 2 are the accumulation
/// pair whose roles alternate with frame parity. The set is rebuilt
/// atomically on resize; requests with an unchanged extent are no-ops.
pub struct AttachmentSet {
    device: Arc<Device>,
    attachments: [Attachment; Self::COUNT],
    extent: vk::Extent2D,
}

impl AttachmentSet {
    /// Number of offscreen attachments: one trace target plus the
    /// accumulation pair.
    pub const COUNT: usize = 3;

    /// Creates the attachment set at the given extent and clears the
    /// accumulation images to black.
    ///
    /// # Errors
    ///
    /// Returns an error if image creation or the one-time history
    /// initialization fails.
    pub fn new(device: Arc<Device>, extent: vk::Extent2D) -> RhiResult<Self> {
        let attachments = Self::build(&device, extent)?;
        Self::initialize_history(&device, &attachments)?;

        info!(
            "Created attachment set: {}x{} ({:?})",
            extent.width, extent.height, OFFSCREEN_COLOR_FORMAT
        );

        Ok(Self {
            device,
            attachments,
            extent,
        })
    }

    /// Rebuilds the set at a new extent.
    ///
    /// Returns `false` without touching any resource when the extent is
    /// unchanged. The caller must ensure no GPU work references the old
    /// images (the recreation path drains the device first).
    pub fn resize(&mut self, extent: vk::Extent2D) -> RhiResult<bool> {
        if !needs_rebuild(self.extent, extent) {
            debug!(
                "Attachment set already {}x{}, skipping rebuild",
                extent.width, extent.height
            );
            return Ok(false);
        }

        let attachments = Self::build(&self.device, extent)?;
        Self::initialize_history(&self.device, &attachments)?;

        // Old images drop here, after their replacements exist.
        self.attachments = attachments;
        self.extent = extent;

        info!(
            "Rebuilt attachment set: {}x{}",
            extent.width, extent.height
        );

        Ok(true)
    }

    fn build(device: &Arc<Device>, extent: vk::Extent2D) -> RhiResult<[Attachment; Self::COUNT]> {
        let trace_usage =
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT;
        // TRANSFER_DST so the history contents can be zeroed at build time.
        let accumulation_usage = trace_usage | vk::ImageUsageFlags::TRANSFER_DST;

        let trace = Attachment::new(
            device.clone(),
            extent,
            OFFSCREEN_COLOR_FORMAT,
            trace_usage,
            "trace_target",
        )?;
        let accumulation_a = Attachment::new(
            device.clone(),
            extent,
            OFFSCREEN_COLOR_FORMAT,
            accumulation_usage,
            "accumulation_a",
        )?;
        let accumulation_b = Attachment::new(
            device.clone(),
            extent,
            OFFSCREEN_COLOR_FORMAT,
            accumulation_usage,
            "accumulation_b",
        )?;

        Ok([trace, accumulation_a, accumulation_b])
    }

    /// Clears both accumulation images to black and moves them into the
    /// layout the render pass expects for history reads.
    ///
    /// Whichever image the next frame resolves as its history, it reads
    /// zeroes instead of uninitialized memory. The trace target needs no
    /// initialization: its first use discards prior contents.
    fn initialize_history(
        device: &Arc<Device>,
        attachments: &[Attachment; Self::COUNT],
    ) -> RhiResult<()> {
        let graphics_family = device.queue_families().graphics_family.unwrap();
        let pool = CommandPool::new_transient(device.clone(), graphics_family)?;
        let cmd = CommandBuffer::new(device.clone(), &pool)?;

        let range = color_subresource_range();

        cmd.begin()?;

        let to_transfer: Vec<vk::ImageMemoryBarrier> = ACCUMULATION_INDICES
            .iter()
            .map(|&index| {
                vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(attachments[index].image())
                    .subresource_range(range)
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            })
            .collect();
        cmd.pipeline_barrier(
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            &to_transfer,
        );

        let black = vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 0.0],
        };
        for &index in &ACCUMULATION_INDICES {
            cmd.clear_color_image(
                attachments[index].image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &black,
                std::slice::from_ref(&range),
            );
        }

        let to_shader_read: Vec<vk::ImageMemoryBarrier> = ACCUMULATION_INDICES
            .iter()
            .map(|&index| {
                vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(attachments[index].image())
                    .subresource_range(range)
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::INPUT_ATTACHMENT_READ)
            })
            .collect();
        cmd.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            &to_shader_read,
        );

        cmd.end()?;

        let fence = Fence::new(device.clone(), false)?;
        let command_buffers = [cmd.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            device.submit_graphics(std::slice::from_ref(&submit_info), fence.handle())?;
        }
        fence.wait(u64::MAX)?;

        debug!("Initialized accumulation history to black");

        Ok(())
    }

    /// Returns the image view at the given ordered-set index.
    #[inline]
    pub fn view(&self, index: usize) -> vk::ImageView {
        self.attachments[index].image_view()
    }

    /// Returns the current extent of all attachments in the set.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Resolves the framebuffer attachment list for one frame parity.
    ///
    /// The render pass binds [trace, history read, history write,
    /// display]; which accumulation image fills the read and write slots
    /// follows the ping-pong selection for the parity.
    pub fn framebuffer_views(
        &self,
        parity: usize,
        display_view: vk::ImageView,
    ) -> [vk::ImageView; 4] {
        let targets = frame_targets(parity as u64);
        [
            self.attachments[TRACE_INDEX].image_view(),
            self.attachments[targets.read].image_view(),
            self.attachments[targets.write].image_view(),
            display_view,
        ]
    }
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offscreen_format() {
        assert_eq!(OFFSCREEN_COLOR_FORMAT, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_rebuild_skipped_for_unchanged_extent() {
        let current = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert!(!needs_rebuild(current, current));
    }

    #[test]
    fn test_rebuild_required_for_changed_extent() {
        let current = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let wider = vk::Extent2D {
            width: 1024,
            height: 600,
        };
        let taller = vk::Extent2D {
            width: 800,
            height: 768,
        };
        assert!(needs_rebuild(current, wider));
        assert!(needs_rebuild(current, taller));
    }

    #[test]
    fn test_attachment_set_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Attachment>();
        assert_send::<AttachmentSet>();
    }
}

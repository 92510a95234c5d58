//! Render pass topology for the three-pass frame pipeline.
//!
//! This module builds the single VkRenderPass that carries every frame:
//! a trace pass, an accumulation pass, and a composite pass, expressed as
//! three subpasses over four attachment slots.
//!
//! # Attachment slots
//!
//! Attachments are addressed by role through [`AttachmentSlot`], not by raw
//! index:
//!
//! | Slot         | Index | Load  | Content                                  |
//! |--------------|-------|-------|------------------------------------------|
//! | `Trace`      | 0     | CLEAR | This frame's raw ray-traced samples      |
//! | `AccumPrev`  | 1     | LOAD  | Accumulated history from the last frame  |
//! | `AccumNext`  | 2     | CLEAR | Accumulated history for the next frame   |
//! | `Display`    | 3     | CLEAR | Swapchain image, presented after the pass|
//!
//! Which physical accumulation image occupies `AccumPrev` versus `AccumNext`
//! alternates with frame parity. The render pass itself is parity-agnostic;
//! the caller binds a [`Framebuffer`] whose view order encodes the parity.
//!
//! # Subpasses
//!
//! 1. [`TRACE_SUBPASS`]: no inputs, writes `Trace`.
//! 2. [`ACCUMULATE_SUBPASS`]: reads `Trace` and `AccumPrev` as input
//!    attachments, writes `AccumNext`.
//! 3. [`COMPOSITE_SUBPASS`]: reads `AccumNext` as an input attachment,
//!    writes `Display`.
//!
//! All dependencies are framebuffer-local (BY_REGION); each fragment only
//! ever reads its own pixel from earlier passes.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::RhiResult;

/// Index of the ray tracing subpass.
pub const TRACE_SUBPASS: u32 = 0;
/// Index of the temporal accumulation subpass.
pub const ACCUMULATE_SUBPASS: u32 = 1;
/// Index of the composite (display) subpass.
pub const COMPOSITE_SUBPASS: u32 = 2;
/// Total number of subpasses in the frame render pass.
pub const SUBPASS_COUNT: u32 = 3;

/// Attachment slot of the frame render pass, identified by role.
///
/// The slot determines the attachment index in the render pass and the
/// required view order when building a [`Framebuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentSlot {
    /// Raw per-frame ray tracing output.
    Trace,
    /// Accumulation image holding the previous frame's history (read).
    AccumPrev,
    /// Accumulation image receiving this frame's history (written).
    AccumNext,
    /// Swapchain image the composite pass writes to.
    Display,
}

impl AttachmentSlot {
    /// Number of attachment slots in the render pass.
    pub const COUNT: usize = 4;

    /// Returns the attachment index of this slot.
    #[inline]
    pub fn index(self) -> u32 {
        match self {
            AttachmentSlot::Trace => 0,
            AttachmentSlot::AccumPrev => 1,
            AttachmentSlot::AccumNext => 2,
            AttachmentSlot::Display => 3,
        }
    }

    /// Returns all slots in attachment index order.
    #[inline]
    pub fn all() -> [AttachmentSlot; Self::COUNT] {
        [
            AttachmentSlot::Trace,
            AttachmentSlot::AccumPrev,
            AttachmentSlot::AccumNext,
            AttachmentSlot::Display,
        ]
    }
}

/// The render pass driving one frame of the pipeline.
///
/// Owns the VkRenderPass shared by all three full-screen passes. Pipelines
/// are compiled against this render pass and one of the subpass index
/// constants; framebuffers bind concrete image views to the attachment
/// slots.
///
/// Immutable after creation and freely shareable across threads.
pub struct PassGraph {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
}

impl PassGraph {
    /// Creates the frame render pass.
    ///
    /// `color_format` is the format of the trace and accumulation
    /// attachments, `display_format` that of the swapchain images.
    ///
    /// # Errors
    ///
    /// Returns an error if render pass creation fails.
    pub fn new(
        device: Arc<Device>,
        color_format: vk::Format,
        display_format: vk::Format,
    ) -> RhiResult<Self> {
        // Trace target: cleared every frame, read back in the accumulation
        // subpass, never needed across frames.
        let trace = vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        // Previous history: contents must survive into this frame, so the
        // image arrives already in SHADER_READ_ONLY_OPTIMAL and is loaded.
        // After this frame the image is re-cleared as AccumNext, so the
        // contents need not be stored.
        let accum_prev = vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        // Next history: cleared, written, then left in the layout the next
        // frame expects for its AccumPrev slot.
        let accum_next = vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        // Display target: swapchain image, handed to presentation.
        let display = vk::AttachmentDescription::default()
            .format(display_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let attachments = [trace, accum_prev, accum_next, display];

        // Subpass 0: trace
        let trace_color = [vk::AttachmentReference::default()
            .attachment(AttachmentSlot::Trace.index())
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        // Subpass 1: accumulate
        let accumulate_inputs = [
            vk::AttachmentReference::default()
                .attachment(AttachmentSlot::Trace.index())
                .layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            vk::AttachmentReference::default()
                .attachment(AttachmentSlot::AccumPrev.index())
                .layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        ];
        let accumulate_color = [vk::AttachmentReference::default()
            .attachment(AttachmentSlot::AccumNext.index())
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        // Subpass 2: composite
        let composite_inputs = [vk::AttachmentReference::default()
            .attachment(AttachmentSlot::AccumNext.index())
            .layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let composite_color = [vk::AttachmentReference::default()
            .attachment(AttachmentSlot::Display.index())
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let subpasses = [
            vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&trace_color),
            vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .input_attachments(&accumulate_inputs)
                .color_attachments(&accumulate_color),
            vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .input_attachments(&composite_inputs)
                .color_attachments(&composite_color),
        ];

        let dependencies = [
            // The acquired swapchain image and the recycled trace target must
            // be free of prior-frame work before this frame's color writes.
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(TRACE_SUBPASS)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            // The previous frame's accumulation writes must be visible before
            // this frame samples them as history.
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(ACCUMULATE_SUBPASS)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(
                    vk::PipelineStageFlags::FRAGMENT_SHADER
                        | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                )
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(
                    vk::AccessFlags::INPUT_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            // Trace output must be written before the accumulation subpass
            // reads it per fragment.
            vk::SubpassDependency::default()
                .src_subpass(TRACE_SUBPASS)
                .dst_subpass(ACCUMULATE_SUBPASS)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(
                    vk::PipelineStageFlags::FRAGMENT_SHADER
                        | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                )
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(
                    vk::AccessFlags::INPUT_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            // Accumulation output must be written before the composite
            // subpass reads it per fragment.
            vk::SubpassDependency::default()
                .src_subpass(ACCUMULATE_SUBPASS)
                .dst_subpass(COMPOSITE_SUBPASS)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(
                    vk::PipelineStageFlags::FRAGMENT_SHADER
                        | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                )
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(
                    vk::AccessFlags::INPUT_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        ];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        info!(
            "Created frame render pass: {} subpasses, {} attachment slots, color format {:?}, display format {:?}",
            SUBPASS_COUNT,
            AttachmentSlot::COUNT,
            color_format,
            display_format
        );

        Ok(Self {
            device,
            render_pass,
        })
    }

    /// Returns the render pass handle.
    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Returns the clear values for a render pass instance, in slot order.
    ///
    /// History accumulates light additively, so cleared accumulation content
    /// is fully transparent black. The value for `AccumPrev` is ignored
    /// because that slot loads its contents.
    pub fn clear_values() -> [vk::ClearValue; AttachmentSlot::COUNT] {
        let transparent = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 0.0],
            },
        };
        let opaque_black = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        };
        [transparent, transparent, transparent, opaque_black]
    }
}

impl Drop for PassGraph {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Frame render pass destroyed");
    }
}

/// Vulkan framebuffer wrapper.
///
/// Binds concrete image views to the attachment slots of a render pass.
/// The view order must match [`AttachmentSlot`] order; swapping the two
/// accumulation views produces the odd-parity binding of the same render
/// pass.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Creates a framebuffer over `attachments`, which must be image
    /// views listed in attachment slot order.
    ///
    /// # Errors
    ///
    /// Returns an error if framebuffer creation fails.
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };

        debug!(
            "Created framebuffer: {}x{}, {} attachments",
            extent.width,
            extent.height,
            attachments.len()
        );

        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    /// Returns the framebuffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Returns the framebuffer extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_slot_indices() {
        assert_eq!(AttachmentSlot::Trace.index(), 0);
        assert_eq!(AttachmentSlot::AccumPrev.index(), 1);
        assert_eq!(AttachmentSlot::AccumNext.index(), 2);
        assert_eq!(AttachmentSlot::Display.index(), 3);
    }

    #[test]
    fn test_attachment_slot_all_is_in_index_order() {
        let all = AttachmentSlot::all();
        assert_eq!(all.len(), AttachmentSlot::COUNT);
        for (i, slot) in all.iter().enumerate() {
            assert_eq!(slot.index() as usize, i);
        }
    }

    #[test]
    fn test_subpass_constants() {
        assert_eq!(TRACE_SUBPASS, 0);
        assert_eq!(ACCUMULATE_SUBPASS, 1);
        assert_eq!(COMPOSITE_SUBPASS, 2);
        assert_eq!(SUBPASS_COUNT, 3);
    }

    #[test]
    fn test_clear_values_slot_order() {
        let values = PassGraph::clear_values();
        assert_eq!(values.len(), AttachmentSlot::COUNT);

        // Accumulation content clears to transparent black
        let next = unsafe { values[AttachmentSlot::AccumNext.index() as usize].color.float32 };
        assert_eq!(next, [0.0, 0.0, 0.0, 0.0]);

        // The display clears to opaque black
        let display = unsafe { values[AttachmentSlot::Display.index() as usize].color.float32 };
        assert_eq!(display, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_pass_graph_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PassGraph>();
        assert_send_sync::<Framebuffer>();
    }
}

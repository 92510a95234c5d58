//! Pass sequencing: descriptor layouts, pipelines, and frame recording.
//!
//! The sequencer owns everything needed to record one frame's render
//! pass instance: the four descriptor set layouts, one pipeline layout
//! and pipeline per subpass, and the recording routine that binds them
//! in order. Every pass draws a single full-screen triangle; geometry
//! comes from `gl_VertexIndex` in the vertex shader, so no vertex
//! buffers exist anywhere.
//!
//! Descriptor sets are written fresh each frame from the slot's arena
//! pool, which is how the alternating accumulation bindings follow the
//! frame parity without duplicated pipelines.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::info;

use raytracer_rhi::buffer::Buffer;
use raytracer_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorSetLayout, buffer_info, input_attachment_info,
    update_descriptor_sets,
};
use raytracer_rhi::device::Device;
use raytracer_rhi::pass_graph::{
    ACCUMULATE_SUBPASS, COMPOSITE_SUBPASS, Framebuffer, PassGraph, TRACE_SUBPASS,
};
use raytracer_rhi::pipeline::{CullMode, GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use raytracer_rhi::shader::{Shader, ShaderStage};
use raytracer_rhi::RhiResult;

use crate::attachments::AttachmentSet;
use crate::frame_slots::FrameSlot;
use crate::ping_pong::{FrameTargets, TRACE_INDEX};
use crate::ubo::GlobalUbo;

/// Vertices per full-screen draw: one triangle large enough to cover
/// the viewport after clipping.
pub const FULLSCREEN_VERTEX_COUNT: u32 = 3;

/// Builds the descriptor set layout bindings for the global set
/// (set 0 in every pipeline layout).
fn global_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 1] {
    [DescriptorBindingBuilder::uniform_buffer(
        0,
        vk::ShaderStageFlags::ALL_GRAPHICS,
    )]
}

/// Bindings for the trace pass set: the sphere storage buffer.
fn trace_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 1] {
    [DescriptorBindingBuilder::storage_buffer(
        0,
        vk::ShaderStageFlags::FRAGMENT,
    )]
}

/// Bindings for the accumulation pass set: this frame's trace output
/// and the previous frame's history, both as input attachments.
fn accumulate_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        DescriptorBindingBuilder::input_attachment(0, vk::ShaderStageFlags::FRAGMENT),
        DescriptorBindingBuilder::input_attachment(1, vk::ShaderStageFlags::FRAGMENT),
    ]
}

/// Bindings for the composite pass set: the freshly accumulated image.
fn composite_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 1] {
    [DescriptorBindingBuilder::input_attachment(
        0,
        vk::ShaderStageFlags::FRAGMENT,
    )]
}

/// Owns the pipelines and descriptor layouts for the three subpasses and
/// records complete frames.
pub struct PassSequencer {
    device: Arc<Device>,

    // Dropped before their layouts by declaration order.
    trace_pipeline: Pipeline,
    accumulate_pipeline: Pipeline,
    composite_pipeline: Pipeline,

    trace_pipeline_layout: PipelineLayout,
    accumulate_pipeline_layout: PipelineLayout,
    composite_pipeline_layout: PipelineLayout,

    global_layout: DescriptorSetLayout,
    trace_layout: DescriptorSetLayout,
    accumulate_layout: DescriptorSetLayout,
    composite_layout: DescriptorSetLayout,

    render_pass: vk::RenderPass,
}

impl PassSequencer {
    /// Creates descriptor layouts and builds the three pipelines against
    /// the pass graph's render pass.
    ///
    /// SPIR-V is loaded from `shader_dir`: a shared `fullscreen.vert.spv`
    /// plus one fragment stage per pass. Shader modules are destroyed
    /// again once the pipelines exist.
    ///
    /// # Errors
    ///
    /// Returns an error if shader loading, layout creation, or pipeline
    /// creation fails.
    pub fn new(device: Arc<Device>, pass_graph: &PassGraph, shader_dir: &Path) -> RhiResult<Self> {
        let global_layout = DescriptorSetLayout::new(device.clone(), &global_bindings())?;
        let trace_layout = DescriptorSetLayout::new(device.clone(), &trace_bindings())?;
        let accumulate_layout = DescriptorSetLayout::new(device.clone(), &accumulate_bindings())?;
        let composite_layout = DescriptorSetLayout::new(device.clone(), &composite_bindings())?;

        // Set 0 is the global UBO everywhere; set 1 is the pass-specific set.
        let trace_pipeline_layout = PipelineLayout::new(
            device.clone(),
            &[global_layout.handle(), trace_layout.handle()],
            &[],
        )?;
        let accumulate_pipeline_layout = PipelineLayout::new(
            device.clone(),
            &[global_layout.handle(), accumulate_layout.handle()],
            &[],
        )?;
        let composite_pipeline_layout = PipelineLayout::new(
            device.clone(),
            &[global_layout.handle(), composite_layout.handle()],
            &[],
        )?;

        let vertex_shader = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join("fullscreen.vert.spv"),
            ShaderStage::Vertex,
            "main",
        )?;
        let trace_fragment = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join("raytrace.frag.spv"),
            ShaderStage::Fragment,
            "main",
        )?;
        let accumulate_fragment = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join("accumulate.frag.spv"),
            ShaderStage::Fragment,
            "main",
        )?;
        let composite_fragment = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join("composite.frag.spv"),
            ShaderStage::Fragment,
            "main",
        )?;

        let trace_pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&trace_fragment)
            .cull_mode(CullMode::None)
            .render_pass(pass_graph.handle())
            .subpass(TRACE_SUBPASS)
            .build(device.clone(), &trace_pipeline_layout)?;

        let accumulate_pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&accumulate_fragment)
            .cull_mode(CullMode::None)
            .render_pass(pass_graph.handle())
            .subpass(ACCUMULATE_SUBPASS)
            .build(device.clone(), &accumulate_pipeline_layout)?;

        let composite_pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&composite_fragment)
            .cull_mode(CullMode::None)
            .render_pass(pass_graph.handle())
            .subpass(COMPOSITE_SUBPASS)
            .build(device.clone(), &composite_pipeline_layout)?;

        info!("Pass sequencer created: trace, accumulate, composite pipelines");

        Ok(Self {
            device,
            trace_pipeline,
            accumulate_pipeline,
            composite_pipeline,
            trace_pipeline_layout,
            accumulate_pipeline_layout,
            composite_pipeline_layout,
            global_layout,
            trace_layout,
            accumulate_layout,
            composite_layout,
            render_pass: pass_graph.handle(),
        })
    }

    /// Records one complete frame into the slot's command buffer.
    ///
    /// Allocates this frame's descriptor sets from the slot's arena pool
    /// (already reset by the caller), points the accumulation bindings at
    /// the parity-resolved history images, then records the render pass
    /// instance: trace, accumulate, composite, each a single full-screen
    /// triangle.
    ///
    /// The command buffer must be in the recording state.
    ///
    /// # Errors
    ///
    /// Returns an error if descriptor set allocation fails.
    pub fn record_frame(
        &self,
        slot: &FrameSlot,
        framebuffer: &Framebuffer,
        attachments: &AttachmentSet,
        targets: FrameTargets,
        scene_buffer: &Buffer,
    ) -> RhiResult<()> {
        let set_layouts = [
            self.global_layout.handle(),
            self.trace_layout.handle(),
            self.accumulate_layout.handle(),
            self.composite_layout.handle(),
        ];
        let sets = slot.descriptor_pool().allocate(&set_layouts)?;
        let (global_set, trace_set, accumulate_set, composite_set) =
            (sets[0], sets[1], sets[2], sets[3]);

        let ubo_infos = [buffer_info(
            slot.global_ubo().handle(),
            0,
            GlobalUbo::SIZE as vk::DeviceSize,
        )];
        let scene_infos = [buffer_info(scene_buffer.handle(), 0, vk::WHOLE_SIZE)];
        let trace_output_infos = [input_attachment_info(attachments.view(TRACE_INDEX))];
        let history_read_infos = [input_attachment_info(attachments.view(targets.read))];
        let history_write_infos = [input_attachment_info(attachments.view(targets.write))];

        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(global_set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&ubo_infos),
            vk::WriteDescriptorSet::default()
                .dst_set(trace_set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(&scene_infos),
            vk::WriteDescriptorSet::default()
                .dst_set(accumulate_set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                .image_info(&trace_output_infos),
            vk::WriteDescriptorSet::default()
                .dst_set(accumulate_set)
                .dst_binding(1)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                .image_info(&history_read_infos),
            vk::WriteDescriptorSet::default()
                .dst_set(composite_set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                .image_info(&history_write_infos),
        ];
        update_descriptor_sets(&self.device, &writes);

        let cmd = slot.command_buffer();
        let extent = framebuffer.extent();
        let clear_values = PassGraph::clear_values();

        cmd.begin_render_pass(self.render_pass, framebuffer.handle(), extent, &clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        cmd.set_viewport(&viewport);

        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        cmd.set_scissor(&scissor);

        cmd.bind_pipeline(self.trace_pipeline.bind_point(), self.trace_pipeline.handle());
        cmd.bind_descriptor_sets(
            self.trace_pipeline.bind_point(),
            self.trace_pipeline_layout.handle(),
            0,
            &[global_set, trace_set],
            &[],
        );
        cmd.draw(FULLSCREEN_VERTEX_COUNT, 1, 0, 0);

        cmd.next_subpass();

        cmd.bind_pipeline(
            self.accumulate_pipeline.bind_point(),
            self.accumulate_pipeline.handle(),
        );
        cmd.bind_descriptor_sets(
            self.accumulate_pipeline.bind_point(),
            self.accumulate_pipeline_layout.handle(),
            0,
            &[global_set, accumulate_set],
            &[],
        );
        cmd.draw(FULLSCREEN_VERTEX_COUNT, 1, 0, 0);

        cmd.next_subpass();

        cmd.bind_pipeline(
            self.composite_pipeline.bind_point(),
            self.composite_pipeline.handle(),
        );
        cmd.bind_descriptor_sets(
            self.composite_pipeline.bind_point(),
            self.composite_pipeline_layout.handle(),
            0,
            &[global_set, composite_set],
            &[],
        );
        cmd.draw(FULLSCREEN_VERTEX_COUNT, 1, 0, 0);

        cmd.end_render_pass();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fullscreen_vertex_count() {
        assert_eq!(FULLSCREEN_VERTEX_COUNT, 3);
    }

    #[test]
    fn test_global_bindings_shape() {
        let bindings = global_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(
            bindings[0].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::ALL_GRAPHICS);
    }

    #[test]
    fn test_trace_bindings_shape() {
        let bindings = trace_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(
            bindings[0].descriptor_type,
            vk::DescriptorType::STORAGE_BUFFER
        );
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_accumulate_bindings_shape() {
        let bindings = accumulate_bindings();
        assert_eq!(bindings.len(), 2);
        for (i, binding) in bindings.iter().enumerate() {
            assert_eq!(binding.binding, i as u32);
            assert_eq!(
                binding.descriptor_type,
                vk::DescriptorType::INPUT_ATTACHMENT
            );
            assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
        }
    }

    #[test]
    fn test_composite_bindings_shape() {
        let bindings = composite_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(
            bindings[0].descriptor_type,
            vk::DescriptorType::INPUT_ATTACHMENT
        );
    }

    #[test]
    fn test_pass_sequencer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<PassSequencer>();
    }
}

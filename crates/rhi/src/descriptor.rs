//! Descriptor set layouts, pools, and update helpers.
//!
//! Pools here are sized for a single frame slot and reclaimed wholesale
//! with [`DescriptorPool::reset`] when the slot is reused, so individual
//! sets are never freed.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Layout describing the bindings of one descriptor set.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} bindings",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Fixed-capacity descriptor pool owned by a frame slot.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Creates a pool with room for `max_sets` sets drawn from `pool_sizes`.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!("Created descriptor pool for {max_sets} sets");

        Ok(Self { device, pool })
    }

    /// Allocates one set per entry in `layouts`, in order.
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> RhiResult<Vec<vk::DescriptorSet>> {
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&allocate_info)? };

        Ok(sets)
    }

    /// Returns every set allocated from this pool to the free state.
    ///
    /// The caller must ensure the GPU is no longer reading any set from
    /// this pool, which the in-flight fence guarantees for frame slots.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Applies a batch of descriptor writes in one call.
pub fn update_descriptor_sets(device: &Device, writes: &[vk::WriteDescriptorSet]) {
    if writes.is_empty() {
        return;
    }
    unsafe {
        device.handle().update_descriptor_sets(writes, &[]);
    }
}

/// Describes a buffer range for a uniform or storage buffer write.
#[inline]
pub fn buffer_info(
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range)
}

/// Describes an input attachment image for a descriptor write.
///
/// Subpasses read input attachments in `SHADER_READ_ONLY_OPTIMAL`; the
/// render pass handles the transition, and no sampler is involved.
#[inline]
pub fn input_attachment_info(image_view: vk::ImageView) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
}

/// Shorthand constructors for the binding kinds this renderer uses.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::binding(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    #[inline]
    pub fn storage_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::binding(binding, vk::DescriptorType::STORAGE_BUFFER, stage_flags)
    }

    /// Input attachments are only readable from fragment shaders.
    #[inline]
    pub fn input_attachment(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::binding(binding, vk::DescriptorType::INPUT_ATTACHMENT, stage_flags)
    }

    fn binding(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_builder_sets_type_and_count() {
        let ubo = DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::ALL_GRAPHICS);
        assert_eq!(ubo.binding, 0);
        assert_eq!(ubo.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(ubo.descriptor_count, 1);
        assert_eq!(ubo.stage_flags, vk::ShaderStageFlags::ALL_GRAPHICS);

        let ssbo = DescriptorBindingBuilder::storage_buffer(0, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(ssbo.descriptor_type, vk::DescriptorType::STORAGE_BUFFER);

        let input = DescriptorBindingBuilder::input_attachment(1, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(input.binding, 1);
        assert_eq!(input.descriptor_type, vk::DescriptorType::INPUT_ATTACHMENT);
        assert_eq!(input.descriptor_count, 1);
    }

    #[test]
    fn buffer_info_carries_offset_and_range() {
        let info = buffer_info(vk::Buffer::null(), 64, 256);
        assert_eq!(info.offset, 64);
        assert_eq!(info.range, 256);
    }

    #[test]
    fn input_attachment_info_uses_read_only_layout() {
        let info = input_attachment_info(vk::ImageView::null());
        assert_eq!(info.sampler, vk::Sampler::null());
        assert_eq!(info.image_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}

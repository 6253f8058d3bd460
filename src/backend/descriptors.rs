// Descriptor set layout, pool and per-image sets
//
// Binding 0: uniform buffer (vertex stage)
// Binding 1: combined image sampler (fragment stage)

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub struct DescriptorSetLayout {
    pub layout: vk::DescriptorSetLayout,
    device: Arc<VulkanDevice>,
}

impl DescriptorSetLayout {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];

        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { device.device.create_descriptor_set_layout(&create_info, None) }
            .context("Failed to create descriptor set layout")?;

        Ok(Self { layout, device })
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// What each set points at.
#[derive(Debug, Clone, Copy)]
pub struct SetBinding {
    pub uniform_buffer: vk::Buffer,
    pub uniform_size: vk::DeviceSize,
    pub image_view: vk::ImageView,
    pub sampler: vk::Sampler,
}

/// Pool sized for exactly `count` sets; sets are freed with the pool.
pub struct DescriptorPool {
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    device: Arc<VulkanDevice>,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<VulkanDevice>,
        layout: &DescriptorSetLayout,
        bindings: &[SetBinding],
    ) -> Result<Self> {
        let count = bindings.len() as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            },
        ];

        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(count);
        let pool = unsafe { device.device.create_descriptor_pool(&create_info, None) }
            .context("Failed to create descriptor pool")?;

        let mut result = Self {
            pool,
            sets: Vec::new(),
            device,
        };

        let layouts = vec![layout.layout; bindings.len()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(result.pool)
            .set_layouts(&layouts);
        result.sets = unsafe { result.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")?;

        for (&set, binding) in result.sets.iter().zip(bindings) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: binding.uniform_buffer,
                offset: 0,
                range: binding.uniform_size,
            }];
            let image_info = [vk::DescriptorImageInfo {
                sampler: binding.sampler,
                image_view: binding.image_view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }];

            let writes = [
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info)
                    .build(),
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_info)
                    .build(),
            ];

            unsafe { result.device.device.update_descriptor_sets(&writes, &[]) };
        }

        Ok(result)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

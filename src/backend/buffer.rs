// Buffer utilities for vertex, index, and uniform buffers
//
// Memory comes from the device's gpu-allocator. Host-visible buffers stay
// mapped for their whole life; device-local ones are filled through a
// staging buffer.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::commands::CommandPool;
use super::VulkanDevice;
use crate::error::RenderError;

pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    name: &'static str,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it.
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &'static str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        let buffer = Self {
            buffer,
            size,
            allocation: Some(allocation),
            name,
            device,
        };

        // Dropping on failure releases both the handle and the allocation
        if let Some(allocation) = &buffer.allocation {
            unsafe {
                buffer.device.device.bind_buffer_memory(
                    buffer.buffer,
                    allocation.memory(),
                    allocation.offset(),
                )
            }
            .with_context(|| format!("Failed to bind memory for '{}'", name))?;
        }

        Ok(buffer)
    }

    /// Host-visible buffer initialised with `data`.
    pub fn with_data<T: Pod>(
        device: Arc<VulkanDevice>,
        name: &'static str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(
            device,
            name,
            bytes.len() as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Device-local buffer filled via a staging copy on `queue`.
    pub fn device_local<T: Pod>(
        device: Arc<VulkanDevice>,
        commands: &CommandPool,
        queue: vk::Queue,
        name: &'static str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let staging = Self::with_data(
            device.clone(),
            "staging",
            vk::BufferUsageFlags::TRANSFER_SRC,
            data,
        )?;

        let buffer = Self::new(
            device,
            name,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;

        commands.one_time_submit(queue, |device, cmd| {
            let region = vk::BufferCopy::builder().size(staging.size).build();
            unsafe { device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]) };
            Ok(())
        })?;

        log::debug!("Uploaded {} bytes to '{}'", buffer.size, name);
        Ok(buffer)
    }

    /// Copy `data` to the start of a mapped buffer.
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let name = self.name;
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or(RenderError::NotHostVisible(name))?;

        anyhow::ensure!(
            bytes.len() <= mapped.len(),
            "Write of {} bytes overflows '{}' ({} bytes)",
            bytes.len(),
            name,
            mapped.len()
        );
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::error!("Failed to free memory of '{}': {}", self.name, e);
            }
        }
    }
}

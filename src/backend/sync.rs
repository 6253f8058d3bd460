// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// One set per frame in flight.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on a slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device.device.create_semaphore(&semaphore_info, None)?;
            let render_finished = device.device.create_semaphore(&semaphore_info, None)?;
            let in_flight_fence = device.device.create_fence(&fence_info, None)?;

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
                device,
            })
        }
    }

    /// Block until the slot's last submission has finished.
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
        }?;
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight_fence]) }?;
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_semaphore(self.image_available, None);
            self.device
                .device
                .destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Create one sync set per frame slot.
pub fn create_frame_syncs(device: &Arc<VulkanDevice>, count: usize) -> Result<Vec<FrameSync>> {
    (0..count).map(|_| FrameSync::new(device.clone())).collect()
}

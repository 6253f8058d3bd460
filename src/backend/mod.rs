// Backend module - Vulkan abstraction layer
//
// Design: Thin owning wrappers around ash handles. Each wrapper holds an
// Arc<VulkanDevice> and destroys its handle on drop.

pub mod buffer;
pub mod commands;
pub mod descriptors;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use device::VulkanDevice;
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};

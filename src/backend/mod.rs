// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash; each type destroys what it created.

pub mod buffer;
pub mod commands;
pub mod device;
pub mod pipeline;
pub mod selection;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::{DeviceOptions, VulkanDevice};
pub use swapchain::Swapchain;

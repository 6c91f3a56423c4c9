// Backend module - Vulkan device and frame lifecycle
//
// Design: every GPU call goes through the InstanceApi/DeviceApi traits, every
// GPU object is owned by a wrapper that releases it on drop.
// Dependency order: surface -> device -> swapchain -> render passes ->
// framebuffers -> command pool / sync objects.

pub mod api;
pub mod command;
pub mod device;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

#[cfg(test)]
pub(crate) mod mock;

pub use api::{DeviceApi, InstanceApi};
pub use command::{CommandPool, CommandRecorder};
pub use device::{select_device, Device, QueueFamilies, QueueFamilyIndices, SelectedDevice};
pub use render_pass::{RenderPassKind, RenderTargets};
pub use surface::Surface;
pub use swapchain::{Swapchain, SwapchainPlan};
pub use sync::{AcquiredImage, FrameState, FrameSynchronizer};
pub use vulkan::{VulkanDevice, VulkanInstance};

// Error taxonomy for the frame engine
//
// InitError   - bring-up failures (all fatal, abort startup)
// FrameError  - steady-state failures while driving a frame
// RecordingError - command buffer construction failures

use ash::vk;
use thiserror::Error;

use crate::backend::render_pass::RenderPassKind;
use crate::backend::sync::FrameState;

/// Failures while bringing the device, surface and swap chain up.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("failed to create Vulkan instance: {0}")]
    InstanceCreation(vk::Result),

    #[error("failed to install debug messenger: {0}")]
    DebugMessenger(vk::Result),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("failed to create presentation surface: {0}")]
    SurfaceCreation(vk::Result),

    #[error("no Vulkan-capable GPU found")]
    NoCompatibleDevice,

    #[error("no GPU offers both a graphics queue and presentation to this surface")]
    NoSuitableDevice,

    #[error("failed to query {what}: {result}")]
    SurfaceQuery {
        what: &'static str,
        result: vk::Result,
    },

    #[error("failed to create logical device: {0}")]
    DeviceCreation(vk::Result),

    #[error("failed to create swap chain: {0}")]
    SwapchainCreation(vk::Result),

    #[error("failed to retrieve swap chain images: {0}")]
    SwapchainImages(vk::Result),

    #[error("failed to create view for swap chain image {index}: {result}")]
    ImageViewCreation { index: usize, result: vk::Result },

    #[error("failed to create {kind:?} render pass: {result}")]
    RenderPassCreation {
        kind: RenderPassKind,
        result: vk::Result,
    },

    #[error("failed to create {kind:?} framebuffer {index}: {result}")]
    FramebufferCreation {
        kind: RenderPassKind,
        index: usize,
        result: vk::Result,
    },

    #[error("failed to create command pool: {0}")]
    CommandPoolCreation(vk::Result),

    #[error("failed to create {what}: {result}")]
    SyncObjectCreation {
        what: &'static str,
        result: vk::Result,
    },
}

/// Failures while building a one-shot command buffer.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("failed to allocate command buffer: {0}")]
    Allocation(vk::Result),

    #[error("failed to begin command buffer: {0}")]
    Begin(vk::Result),

    #[error("failed to end command buffer: {0}")]
    End(vk::Result),

    #[error("framebuffer index {index} out of range ({count} framebuffers)")]
    FramebufferOutOfRange { index: usize, count: usize },
}

/// Failures while driving one acquire -> record -> submit -> present cycle.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("swap chain is out of date")]
    SwapchainOutOfDate,

    #[error("timed out acquiring the next swap chain image")]
    AcquireTimeout,

    #[error("failed to acquire swap chain image: {0}")]
    Acquire(vk::Result),

    #[error("failed waiting for the in-flight fence: {0}")]
    FenceWait(vk::Result),

    #[error("failed to reset the in-flight fence: {0}")]
    FenceReset(vk::Result),

    #[error("graphics queue rejected the command batch: {0}")]
    Submission(vk::Result),

    #[error("failed to present swap chain image {image_index}: {result}")]
    Presentation { image_index: u32, result: vk::Result },

    #[error("presentation queue failed to become idle: {0}")]
    QueueIdle(vk::Result),

    #[error("device failed to become idle: {0}")]
    DeviceIdle(vk::Result),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error("frame operation requires state {expected:?}, synchronizer is {actual:?}")]
    InvalidState {
        expected: FrameState,
        actual: FrameState,
    },

    #[error("failed to recreate swap chain: {0}")]
    Recreate(#[source] InitError),
}

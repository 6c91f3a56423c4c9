// Command recording
//
// Command buffers here are short-lived: allocated for one frame, recorded
// once, submitted once, and freed when the frame has been presented.

use ash::vk;
use glam::Vec3;
use std::sync::Arc;

use super::api::DeviceApi;
use super::render_pass::{RenderPassKind, RenderTargets};
use crate::error::{InitError, RecordingError};

/// Pool for per-frame command buffers on one queue family.
pub struct CommandPool<D: DeviceApi> {
    handle: vk::CommandPool,
    device: Arc<D>,
}

impl<D: DeviceApi> CommandPool<D> {
    pub fn new(device: &Arc<D>, queue_family_index: u32) -> Result<Self, InitError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(queue_family_index);

        let handle = unsafe { device.create_command_pool(&create_info) }
            .map_err(InitError::CommandPoolCreation)?;

        log::debug!("Created command pool for queue family {queue_family_index}");
        Ok(Self {
            handle,
            device: Arc::clone(device),
        })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    pub fn allocate_primary(&self) -> Result<vk::CommandBuffer, RecordingError> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .map_err(RecordingError::Allocation)?;
        buffers
            .into_iter()
            .next()
            .ok_or(RecordingError::Allocation(vk::Result::ERROR_UNKNOWN))
    }

    /// Return buffers to the pool. The GPU must be done with them.
    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.handle, buffers) }
        }
    }
}

impl<D: DeviceApi> Drop for CommandPool<D> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.handle) }
    }
}

/// Records one-shot command buffers against the current render targets.
pub struct CommandRecorder<'a, D: DeviceApi> {
    pool: &'a CommandPool<D>,
    targets: &'a RenderTargets<D>,
    extent: vk::Extent2D,
}

impl<'a, D: DeviceApi> CommandRecorder<'a, D> {
    pub fn new(pool: &'a CommandPool<D>, targets: &'a RenderTargets<D>, extent: vk::Extent2D) -> Self {
        Self {
            pool,
            targets,
            extent,
        }
    }

    /// Clear framebuffer `framebuffer_index` to `clear_color` (alpha 1.0).
    ///
    /// The render pass is begun and ended with nothing in between; the clear
    /// happens through the pass's load op.
    pub fn record_clear(
        &self,
        framebuffer_index: usize,
        clear_color: Vec3,
    ) -> Result<vk::CommandBuffer, RecordingError> {
        let pass = self.targets.get(RenderPassKind::Clear);
        let framebuffer =
            pass.framebuffer(framebuffer_index)
                .ok_or(RecordingError::FramebufferOutOfRange {
                    index: framebuffer_index,
                    count: pass.framebuffer_count(),
                })?;

        let buffer = self.pool.allocate_primary()?;
        if let Err(err) = self.record_render_pass(buffer, pass.render_pass(), framebuffer, clear_color)
        {
            self.pool.free(&[buffer]);
            return Err(err);
        }

        log::trace!("Recorded clear of framebuffer {framebuffer_index}");
        Ok(buffer)
    }

    fn record_render_pass(
        &self,
        buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        clear_color: Vec3,
    ) -> Result<(), RecordingError> {
        let device = &self.pool.device;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let begun = unsafe { device.begin_command_buffer(buffer, &begin_info) };
        begun.map_err(RecordingError::Begin)?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color.extend(1.0).to_array(),
            },
        }];
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            })
            .clear_values(&clear_values);

        let ended = unsafe {
            device.cmd_begin_render_pass(buffer, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_end_render_pass(buffer);
            device.end_command_buffer(buffer)
        };
        ended.map_err(RecordingError::End)
    }
}

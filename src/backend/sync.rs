// Synchronization primitives and the per-frame protocol
//
// Semaphores order GPU work (acquire -> submit -> present) without blocking
// the CPU. The single in-flight fence is the only point where the CPU waits,
// which keeps at most one frame on the GPU at any time.
//
//   Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::api::DeviceApi;
use super::command::CommandPool;
use super::swapchain::Swapchain;
use crate::error::{FrameError, InitError, RecordingError};

pub struct Semaphore<D: DeviceApi> {
    handle: vk::Semaphore,
    device: Arc<D>,
}

impl<D: DeviceApi> Semaphore<D> {
    pub fn new(device: &Arc<D>, what: &'static str) -> Result<Self, InitError> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let handle = unsafe { device.create_semaphore(&create_info) }
            .map_err(|result| InitError::SyncObjectCreation { what, result })?;
        Ok(Self {
            handle,
            device: Arc::clone(device),
        })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl<D: DeviceApi> Drop for Semaphore<D> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.handle) }
    }
}

pub struct Fence<D: DeviceApi> {
    handle: vk::Fence,
    device: Arc<D>,
}

impl<D: DeviceApi> Fence<D> {
    pub fn new(device: &Arc<D>, what: &'static str, signaled: bool) -> Result<Self, InitError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let handle = unsafe { device.create_fence(&create_info) }
            .map_err(|result| InitError::SyncObjectCreation { what, result })?;
        Ok(Self {
            handle,
            device: Arc::clone(device),
        })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Block until signaled, then unsignal.
    pub fn wait_and_reset(&self) -> Result<(), FrameError> {
        let fences = [self.handle];
        unsafe {
            self.device
                .wait_for_fences(&fences, u64::MAX)
                .map_err(FrameError::FenceWait)?;
            self.device
                .reset_fences(&fences)
                .map_err(FrameError::FenceReset)
        }
    }
}

impl<D: DeviceApi> Drop for Fence<D> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_fence(self.handle) }
    }
}

/// Frame synchronization objects
///
/// Declared in reverse creation order so they are released last-first.
pub struct FrameSync<D: DeviceApi> {
    pub in_flight: Fence<D>,
    pub render_finished: Semaphore<D>,
    pub image_available: Semaphore<D>,
}

impl<D: DeviceApi> FrameSync<D> {
    pub fn new(device: &Arc<D>) -> Result<Self, InitError> {
        let image_available = Semaphore::new(device, "image-available semaphore")?;
        let render_finished = Semaphore::new(device, "render-finished semaphore")?;
        // Start signaled so the first frame doesn't wait forever
        let in_flight = Fence::new(device, "in-flight fence", true)?;

        Ok(Self {
            in_flight,
            render_finished,
            image_available,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// Result of a successful acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The chain still works but no longer matches the surface exactly.
    pub suboptimal: bool,
}

/// Drives one frame at a time through acquire, record, submit and present.
///
/// Any failure other than a stale swap chain or an acquire timeout faults the
/// synchronizer: every later call returns `FrameError::InvalidState`.
pub struct FrameSynchronizer<D: DeviceApi> {
    sync: FrameSync<D>,
    state: FrameState,
    faulted: bool,
    image_index: Option<u32>,
    pending: Vec<vk::CommandBuffer>,
    acquire_timeout: u64,
    frames_presented: u64,
    device: Arc<D>,
}

impl<D: DeviceApi> FrameSynchronizer<D> {
    pub fn new(device: &Arc<D>) -> Result<Self, InitError> {
        Ok(Self {
            sync: FrameSync::new(device)?,
            state: FrameState::Idle,
            faulted: false,
            image_index: None,
            pending: Vec::new(),
            acquire_timeout: u64::MAX,
            frames_presented: 0,
            device: Arc::clone(device),
        })
    }

    /// Bound how long acquire may block. `None` waits forever.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout.map_or(u64::MAX, |timeout| {
            u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
        });
        self
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn sync_objects(&self) -> &FrameSync<D> {
        &self.sync
    }

    fn expect(&self, expected: &[FrameState]) -> Result<(), FrameError> {
        if self.faulted || !expected.contains(&self.state) {
            return Err(FrameError::InvalidState {
                expected: expected[0],
                actual: self.state,
            });
        }
        Ok(())
    }

    fn fault<T>(&mut self, err: FrameError) -> Result<T, FrameError> {
        log::error!("Frame failed in state {:?}: {err}", self.state);
        self.faulted = true;
        Err(err)
    }

    /// Idle -> Acquiring: ask the presentation engine for the next image.
    ///
    /// A stale swap chain or a timeout puts the synchronizer back to Idle so
    /// the caller can recreate or retry.
    pub fn acquire(&mut self, swapchain: &Swapchain<D>) -> Result<AcquiredImage, FrameError> {
        self.expect(&[FrameState::Idle])?;
        self.state = FrameState::Acquiring;

        match swapchain.acquire_next_image(self.acquire_timeout, self.sync.image_available.handle())
        {
            Ok((index, suboptimal)) => {
                log::trace!("Acquired image {index}");
                self.image_index = Some(index);
                Ok(AcquiredImage { index, suboptimal })
            }
            Err(err @ (FrameError::SwapchainOutOfDate | FrameError::AcquireTimeout)) => {
                log::debug!("Acquire skipped: {err}");
                self.state = FrameState::Idle;
                Err(err)
            }
            Err(err) => self.fault(err),
        }
    }

    /// Acquiring/Recording -> Recording: append a command buffer for the
    /// acquired image, produced by `record` from the image index.
    pub fn record<F>(&mut self, record: F) -> Result<(), FrameError>
    where
        F: FnOnce(u32) -> Result<vk::CommandBuffer, RecordingError>,
    {
        self.expect(&[FrameState::Acquiring, FrameState::Recording])?;
        let Some(index) = self.image_index else {
            return self.fault(FrameError::InvalidState {
                expected: FrameState::Acquiring,
                actual: self.state,
            });
        };

        match record(index) {
            Ok(buffer) => {
                self.pending.push(buffer);
                self.state = FrameState::Recording;
                Ok(())
            }
            Err(err) => self.fault(err.into()),
        }
    }

    /// Recording -> Submitted: wait for the previous frame, then submit every
    /// pending buffer as one batch.
    pub fn submit(&mut self, queue: vk::Queue) -> Result<(), FrameError> {
        self.expect(&[FrameState::Recording])?;

        if let Err(err) = self.sync.in_flight.wait_and_reset() {
            return self.fault(err);
        }

        let wait_semaphores = [self.sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&self.pending)
            .signal_semaphores(&signal_semaphores);

        let submitted = unsafe {
            self.device.queue_submit(
                queue,
                std::slice::from_ref(&submit_info),
                self.sync.in_flight.handle(),
            )
        };
        if let Err(result) = submitted {
            return self.fault(FrameError::Submission(result));
        }

        log::trace!("Submitted {} command buffer(s)", self.pending.len());
        self.state = FrameState::Submitted;
        Ok(())
    }

    /// Submitted -> Presenting -> Idle: present once rendering finished, wait
    /// for the present queue, then free the frame's command buffers.
    ///
    /// Returns true when the swap chain should be recreated.
    pub fn present(
        &mut self,
        swapchain: &Swapchain<D>,
        queue: vk::Queue,
        pool: &CommandPool<D>,
    ) -> Result<bool, FrameError> {
        self.expect(&[FrameState::Submitted])?;
        self.state = FrameState::Presenting;

        let Some(image_index) = self.image_index else {
            return self.fault(FrameError::InvalidState {
                expected: FrameState::Submitted,
                actual: self.state,
            });
        };

        let wait_semaphores = [self.sync.render_finished.handle()];
        let suboptimal = match swapchain.present(queue, image_index, &wait_semaphores) {
            Ok(suboptimal) => suboptimal,
            Err(err) => return self.fault(err),
        };

        // Conservative throttle: the frame is fully done after this
        if let Err(result) = unsafe { self.device.queue_wait_idle(queue) } {
            return self.fault(FrameError::QueueIdle(result));
        }

        pool.free(&self.pending);
        self.pending.clear();
        self.image_index = None;
        self.state = FrameState::Idle;
        self.frames_presented += 1;

        log::trace!("Presented image {image_index}");
        Ok(suboptimal)
    }
}

// =============================================================================
// RENDERER - Device and frame lifecycle in one context object
// =============================================================================
//
// Owns every GPU object from the surface down to the sync objects and drives
// one acquire -> record -> submit -> present cycle per render_frame() call.
//
// BRING-UP ORDER:
// 1. Device selection (graphics + present queue families)
// 2. Logical device + queues
// 3. Swap chain + image views
// 4. Clear/draw render passes + framebuffers
// 5. Command pool
// 6. Semaphores + in-flight fence
//
// Teardown is the exact reverse, both on drop and when bring-up fails midway.
//
// =============================================================================

use ash::vk;
use glam::Vec3;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{
    select_device, CommandPool, CommandRecorder, Device, FrameState, FrameSynchronizer,
    InstanceApi, RenderTargets, Surface, Swapchain, VulkanInstance,
};
use crate::error::{FrameError, InitError};

/// Knobs for bringing a renderer up.
#[derive(Debug, Clone)]
pub struct RendererSettings {
    /// Reported to the driver as application and engine name.
    pub app_name: String,
    /// Enable VK_LAYER_KHRONOS_validation and the debug messenger.
    pub enable_validation: bool,
    /// Upper bound for acquiring a swap chain image; `None` waits forever.
    pub acquire_timeout: Option<Duration>,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            app_name: "Vulkan".to_string(),
            enable_validation: cfg!(debug_assertions),
            acquire_timeout: None,
        }
    }
}

/// The frame engine.
///
/// IMPORTANT: Field order matters for Drop! Fields are declared in reverse
/// creation order so they are released last-created-first.
pub struct Renderer<I: InstanceApi> {
    // ─────────────────────────────────────────────────────────────────────────
    // PER-FRAME
    // ─────────────────────────────────────────────────────────────────────────
    frame: FrameSynchronizer<I::Device>,
    command_pool: CommandPool<I::Device>,

    // ─────────────────────────────────────────────────────────────────────────
    // SWAP CHAIN (replaced on recreation)
    // ─────────────────────────────────────────────────────────────────────────
    targets: RenderTargets<I::Device>,
    swapchain: Swapchain<I::Device>,

    // ─────────────────────────────────────────────────────────────────────────
    // DEVICE & SURFACE
    // ─────────────────────────────────────────────────────────────────────────
    device: Device<I::Device>,
    surface: Surface<I>,
    physical_device: vk::PhysicalDevice,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    desired_extent: vk::Extent2D,
    /// Set when the chain is stale or suboptimal; rebuilt before the next frame
    needs_recreate: bool,
    /// Set when the target has zero area - skip rendering
    is_minimized: bool,
}

impl Renderer<VulkanInstance> {
    /// Bring up Vulkan for a platform window.
    pub fn for_window<W>(
        window: &W,
        desired_extent: vk::Extent2D,
        settings: &RendererSettings,
    ) -> Result<Self, InitError>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let display_handle = window.display_handle()?.as_raw();
        let instance = VulkanInstance::new(
            &settings.app_name,
            settings.enable_validation,
            display_handle,
        )?;
        let surface = Surface::for_window(&instance, window)?;
        Self::init(surface, desired_extent, settings)
    }
}

impl<I: InstanceApi> Renderer<I> {
    /// Build everything below the surface.
    ///
    /// On failure every object created so far is released (surface included)
    /// in reverse order before the error is returned.
    pub fn init(
        surface: Surface<I>,
        desired_extent: vk::Extent2D,
        settings: &RendererSettings,
    ) -> Result<Self, InitError> {
        log::info!("Initializing renderer...");
        let instance = Arc::clone(surface.instance());

        // Step 1: Pick the GPU
        let selected = select_device(instance.as_ref(), surface.handle())?;

        // Step 2: Logical device and queues
        let device = Device::create(instance.as_ref(), &selected)?;

        // Step 3: Swap chain and views
        let swapchain = Swapchain::new(
            instance.as_ref(),
            &device,
            selected.physical_device,
            surface.handle(),
            desired_extent,
            None,
        )?;

        // Step 4: Render passes and framebuffers
        let targets = RenderTargets::new(device.raw(), &swapchain)?;

        // Step 5: Command pool on the graphics family
        let command_pool = CommandPool::new(device.raw(), device.families().graphics)?;

        // Step 6: Sync objects (survive swap chain recreation)
        let frame = FrameSynchronizer::new(device.raw())?
            .with_acquire_timeout(settings.acquire_timeout);

        log::info!("Renderer initialized successfully!");
        Ok(Self {
            frame,
            command_pool,
            targets,
            swapchain,
            device,
            surface,
            physical_device: selected.physical_device,
            desired_extent,
            needs_recreate: false,
            is_minimized: desired_extent.width == 0 || desired_extent.height == 0,
        })
    }

    /// Drive one full Idle -> Idle cycle clearing the image to `clear_color`.
    ///
    /// Does nothing while minimized. A stale swap chain skips the frame and is
    /// rebuilt before the next one.
    pub fn render_frame(&mut self, clear_color: Vec3) -> Result<(), FrameError> {
        if self.is_minimized {
            return Ok(());
        }
        if self.needs_recreate {
            self.recreate_swapchain()?;
        }

        // Step 1: Acquire the next image
        let acquired = match self.frame.acquire(&self.swapchain) {
            Ok(acquired) => acquired,
            Err(FrameError::SwapchainOutOfDate) => {
                log::info!("Swapchain out of date, skipping frame");
                self.needs_recreate = true;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        // Step 2: Record the clear into the matching framebuffer
        let recorder =
            CommandRecorder::new(&self.command_pool, &self.targets, self.swapchain.extent());
        self.frame
            .record(|index| recorder.record_clear(index as usize, clear_color))?;

        // Step 3: Submit after the previous frame's fence
        self.frame.submit(self.device.graphics_queue())?;

        // Step 4: Present and release the frame's command buffers
        let stale = self.frame.present(
            &self.swapchain,
            self.device.present_queue(),
            &self.command_pool,
        )?;

        if acquired.suboptimal || stale {
            log::debug!("Swapchain suboptimal, recreating before next frame");
            self.needs_recreate = true;
        }
        Ok(())
    }

    /// Track the presentation target's new size.
    ///
    /// A zero dimension pauses rendering until a non-zero size arrives.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::debug!("Target minimized, pausing rendering");
            self.is_minimized = true;
            return;
        }

        self.is_minimized = false;
        self.desired_extent = vk::Extent2D { width, height };
        self.needs_recreate = true;
    }

    /// Replace the swap chain, its views, render passes and framebuffers.
    ///
    /// The old chain is handed to the driver as `old_swapchain` and released
    /// (framebuffers, then views, then chain) once the new one exists.
    pub fn recreate_swapchain(&mut self) -> Result<(), FrameError> {
        // Nothing may still be using the old images
        self.device.wait_idle().map_err(FrameError::DeviceIdle)?;

        let instance = Arc::clone(self.surface.instance());
        let swapchain = Swapchain::new(
            instance.as_ref(),
            &self.device,
            self.physical_device,
            self.surface.handle(),
            self.desired_extent,
            Some(&self.swapchain),
        )
        .map_err(FrameError::Recreate)?;
        let targets =
            RenderTargets::new(self.device.raw(), &swapchain).map_err(FrameError::Recreate)?;

        self.targets = targets;
        self.swapchain = swapchain;
        self.needs_recreate = false;

        let extent = self.swapchain.extent();
        log::info!("Recreated swapchain: {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Wait for the GPU and release everything.
    pub fn shutdown(self) {
        log::info!(
            "Shutting down renderer after {} frames",
            self.frames_presented()
        );
        drop(self);
    }

    pub fn frames_presented(&self) -> u64 {
        self.frame.frames_presented()
    }

    pub fn frame_state(&self) -> FrameState {
        self.frame.state()
    }

    pub fn swapchain(&self) -> &Swapchain<I::Device> {
        &self.swapchain
    }

    pub fn device(&self) -> &Device<I::Device> {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }

    pub fn is_minimized(&self) -> bool {
        self.is_minimized
    }
}

impl<I: InstanceApi> Drop for Renderer<I> {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        if let Err(err) = self.device.wait_idle() {
            log::warn!("Device did not become idle before cleanup: {err}");
        }
    }
}

// Surface binding - a native window wrapped into something we can present to

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use super::api::InstanceApi;
use super::vulkan::VulkanInstance;
use crate::error::InitError;

/// Presentable surface, destroyed through its instance on drop.
pub struct Surface<I: InstanceApi> {
    handle: vk::SurfaceKHR,
    instance: Arc<I>,
}

impl<I: InstanceApi> Surface<I> {
    /// Take ownership of an already created surface handle.
    ///
    /// # Safety
    /// `handle` must have been created from `instance` and not be owned elsewhere.
    pub unsafe fn from_raw(instance: Arc<I>, handle: vk::SurfaceKHR) -> Self {
        Self { handle, instance }
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn instance(&self) -> &Arc<I> {
        &self.instance
    }
}

impl Surface<VulkanInstance> {
    /// Create a surface for a platform window.
    pub fn for_window<W>(instance: &Arc<VulkanInstance>, window: &W) -> Result<Self, InitError>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let display_handle = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        let handle = unsafe { instance.create_raw_surface(display_handle, window_handle) }
            .map_err(InitError::SurfaceCreation)?;

        log::debug!("Created presentation surface");
        Ok(unsafe { Self::from_raw(Arc::clone(instance), handle) })
    }
}

impl<I: InstanceApi> Drop for Surface<I> {
    fn drop(&mut self) {
        unsafe { self.instance.destroy_surface(self.handle) }
    }
}

// Device selection - the GPU we draw with and the queues we talk to
//
// Responsibilities:
// - Enumerate physical devices, find a graphics and a present queue family
// - Pick the first device offering both (no scoring beyond that)
// - Create the logical device with one queue per distinct family

use ash::prelude::VkResult;
use ash::{khr::swapchain, vk};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::api::{DeviceApi, InstanceApi};
use crate::error::InitError;

/// Queue families found on a physical device. Either role may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan every queue family of `physical_device`.
    ///
    /// Graphics and present support are tracked independently; the first
    /// family satisfying each wins, so they may or may not coincide.
    /// A family whose present-support query fails counts as not presenting.
    pub fn find<I: InstanceApi>(
        instance: &I,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Self {
        let families = unsafe { instance.queue_family_properties(physical_device) };
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            if family.queue_count == 0 {
                continue;
            }
            let index = index as u32;

            if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                indices.graphics = Some(index);
            }

            if indices.present.is_none() {
                let supported = unsafe {
                    instance.surface_support(physical_device, index, surface)
                }
                .unwrap_or_else(|err| {
                    log::warn!("Present support query failed for queue family {index}: {err}");
                    false
                });
                if supported {
                    indices.present = Some(index);
                }
            }

            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Both roles, or nothing.
    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Queue families of a usable device. Both roles are always filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// True when graphics and presentation run on the same family.
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, ascending.
    pub fn unique(&self) -> BTreeSet<u32> {
        [self.graphics, self.present].into_iter().collect()
    }
}

/// Outcome of device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub families: QueueFamilies,
}

/// Take the first physical device (in enumeration order) that can both draw
/// and present to `surface`.
pub fn select_device<I: InstanceApi>(
    instance: &I,
    surface: vk::SurfaceKHR,
) -> Result<SelectedDevice, InitError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.unwrap_or_else(|err| {
        log::warn!("Failed to enumerate physical devices: {err}");
        Vec::new()
    });

    if devices.is_empty() {
        return Err(InitError::NoCompatibleDevice);
    }

    for physical_device in devices {
        let name = unsafe { instance.physical_device_name(physical_device) };
        let indices = QueueFamilyIndices::find(instance, physical_device, surface);

        match indices.resolve() {
            Some(families) => {
                log::info!("Selected GPU: {name}");
                log::info!(
                    "Queue families: graphics={}, present={}",
                    families.graphics,
                    families.present
                );
                return Ok(SelectedDevice {
                    physical_device,
                    families,
                });
            }
            None => log::debug!("Skipping GPU {name}: {indices:?}"),
        }
    }

    Err(InitError::NoSuitableDevice)
}

/// Logical device plus the queues frames are submitted and presented on.
pub struct Device<D: DeviceApi> {
    raw: Arc<D>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    families: QueueFamilies,
}

impl<D: DeviceApi> Device<D> {
    /// Create the logical device for a selected GPU.
    ///
    /// One queue (priority 1.0) is requested per distinct family, and the
    /// swap chain extension is enabled. The queue handles are identical when
    /// the families coincide.
    pub fn create<I>(instance: &I, selected: &SelectedDevice) -> Result<Self, InitError>
    where
        I: InstanceApi<Device = D>,
    {
        let families = selected.families;
        let priorities = [1.0_f32];

        let queue_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extensions = [swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let raw = unsafe { instance.create_device(selected.physical_device, &create_info) }
            .map_err(InitError::DeviceCreation)?;

        let graphics_queue = unsafe { raw.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { raw.get_device_queue(families.present, 0) };

        log::info!("Created logical device with {} queue(s)", queue_infos.len());

        Ok(Self {
            raw: Arc::new(raw),
            graphics_queue,
            present_queue,
            families,
        })
    }

    /// Shared handle for objects that must destroy themselves through the device.
    pub fn raw(&self) -> &Arc<D> {
        &self.raw
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.raw.device_wait_idle() }
    }
}

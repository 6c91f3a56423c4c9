// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Surface properties are queried fresh for every (re)creation and turned into
// concrete settings by the choose_* rules below.

use ash::vk;
use std::sync::Arc;

use super::api::{DeviceApi, InstanceApi};
use super::device::Device;
use crate::error::{FrameError, InitError};

/// Format used when the surface has no preference, and preferred otherwise.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Everything a surface reports about what it can present.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query<I: InstanceApi>(
        instance: &I,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self, InitError> {
        unsafe {
            Ok(Self {
                capabilities: instance
                    .surface_capabilities(physical_device, surface)
                    .map_err(query_failed("surface capabilities"))?,
                formats: instance
                    .surface_formats(physical_device, surface)
                    .map_err(query_failed("surface formats"))?,
                present_modes: instance
                    .surface_present_modes(physical_device, surface)
                    .map_err(query_failed("present modes"))?,
            })
        }
    }
}

fn query_failed(what: &'static str) -> impl Fn(vk::Result) -> InitError {
    move |result| InitError::SurfaceQuery { what, result }
}

fn same_format(a: &vk::SurfaceFormatKHR, b: &vk::SurfaceFormatKHR) -> bool {
    a.format == b.format && a.color_space == b.color_space
}

/// BGRA8 + sRGB nonlinear if the surface allows it, else whatever it lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    match formats {
        [] => PREFERRED_SURFACE_FORMAT,
        [only] if only.format == vk::Format::UNDEFINED => PREFERRED_SURFACE_FORMAT,
        _ => formats
            .iter()
            .find(|format| same_format(format, &PREFERRED_SURFACE_FORMAT))
            .copied()
            .unwrap_or(formats[0]),
    }
}

/// MAILBOX, then IMMEDIATE, then FIFO.
//
// MAILBOX: No vsync, no tearing, triple buffered
// IMMEDIATE: No vsync, lowest latency, may tear
// FIFO: Vsync enabled, guaranteed available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|preferred| modes.contains(preferred))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent, unless it leaves the choice to us.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: desired.width.max(min.width).min(max.width),
        height: desired.height.max(min.height).min(max.height),
    }
}

/// One more than the minimum, bounded by the maximum (0 = unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Concrete swap chain settings derived from a surface's support.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn new(support: &SurfaceSupport, desired: vk::Extent2D) -> Self {
        Self {
            surface_format: choose_surface_format(&support.formats),
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, desired),
            image_count: choose_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        }
    }
}

/// 2D color view over one swap chain image.
pub struct ImageView<D: DeviceApi> {
    handle: vk::ImageView,
    device: Arc<D>,
}

impl<D: DeviceApi> ImageView<D> {
    fn new(device: &Arc<D>, image: vk::Image, format: vk::Format) -> Result<Self, vk::Result> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let handle = unsafe { device.create_image_view(&create_info) }?;
        Ok(Self {
            handle,
            device: Arc::clone(device),
        })
    }

    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }
}

impl<D: DeviceApi> Drop for ImageView<D> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_image_view(self.handle) }
    }
}

/// Presentable images plus one view per image, created and destroyed as a unit.
pub struct Swapchain<D: DeviceApi> {
    // Views are released before the chain that owns their images
    image_views: Vec<ImageView<D>>,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    sharing_mode: vk::SharingMode,
    device: Arc<D>,
}

impl<D: DeviceApi> Swapchain<D> {
    /// Build a swap chain for `surface`.
    ///
    /// `old` is handed to the driver as the chain being replaced; it stays
    /// owned by the caller and must be dropped after this returns.
    pub fn new<I>(
        instance: &I,
        device: &Device<D>,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        desired_extent: vk::Extent2D,
        old: Option<&Swapchain<D>>,
    ) -> Result<Self, InitError>
    where
        I: InstanceApi<Device = D>,
    {
        log::info!(
            "Creating swapchain: {}x{}",
            desired_extent.width,
            desired_extent.height
        );

        // Step 1: Query what the surface supports and decide
        let support = SurfaceSupport::query(instance, physical_device, surface)?;
        let plan = SwapchainPlan::new(&support, desired_extent);

        // Step 2: Images are shared between families only when they differ
        let families = device.families();
        let family_indices = [families.graphics, families.present];
        let sharing_mode = if families.is_shared() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |old| old.handle));
        if !families.is_shared() {
            create_info = create_info.queue_family_indices(&family_indices);
        }

        // Step 3: Create the chain
        let raw_device = device.raw();
        let handle = unsafe { raw_device.create_swapchain(&create_info) }
            .map_err(InitError::SwapchainCreation)?;

        let mut swapchain = Self {
            image_views: Vec::new(),
            handle,
            images: Vec::new(),
            surface_format: plan.surface_format,
            present_mode: plan.present_mode,
            extent: plan.extent,
            sharing_mode,
            device: Arc::clone(raw_device),
        };

        // Step 4: Images and views. On failure `swapchain` drops whatever exists.
        swapchain.images = unsafe { raw_device.get_swapchain_images(handle) }
            .map_err(InitError::SwapchainImages)?;

        for (index, &image) in swapchain.images.iter().enumerate() {
            let view = ImageView::new(raw_device, image, plan.surface_format.format)
                .map_err(|result| InitError::ImageViewCreation { index, result })?;
            swapchain.image_views.push(view);
        }

        log::info!("Present mode: {:?}", plan.present_mode);
        log::info!("Sharing mode: {:?}", sharing_mode);
        log::info!(
            "Created swapchain with {} images, extent {}x{}",
            swapchain.images.len(),
            plan.extent.width,
            plan.extent.height
        );

        Ok(swapchain)
    }

    /// Acquire next image for rendering
    ///
    /// Returns the image index and whether the chain no longer matches the
    /// surface exactly.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), FrameError> {
        match unsafe { self.device.acquire_next_image(self.handle, timeout, semaphore) } {
            Ok(acquired) => Ok(acquired),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(FrameError::SwapchainOutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(FrameError::AcquireTimeout),
            Err(result) => Err(FrameError::Acquire(result)),
        }
    }

    /// Present a rendered image to the screen.
    ///
    /// Returns true when the chain should be recreated (suboptimal or out of date).
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, FrameError> {
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.device.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(result) => Err(FrameError::Presentation {
                image_index,
                result,
            }),
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[ImageView<D>] {
        &self.image_views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn sharing_mode(&self) -> vk::SharingMode {
        self.sharing_mode
    }
}

impl<D: DeviceApi> Drop for Swapchain<D> {
    fn drop(&mut self) {
        while self.image_views.pop().is_some() {}
        unsafe { self.device.destroy_swapchain(self.handle) }
    }
}

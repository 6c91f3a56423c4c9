// Recording GPU for unit tests
//
// Every call lands in a journal. Fences and batches are simulated on a single
// timeline: a submitted batch stays pending until its fence is waited on or
// the queue/device goes idle. Protocol violations (submitting with an unreset
// fence, freeing buffers the GPU still uses, destroying twice...) are collected
// instead of panicking so tests can assert on them.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::api::{DeviceApi, InstanceApi};
use super::device::{select_device, Device, SelectedDevice};
use super::surface::Surface;
use super::swapchain::Swapchain;
use crate::error::InitError;

#[derive(Debug, Clone)]
pub struct SubmitRecord {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

#[derive(Debug, Clone)]
pub enum Call {
    CreateDevice {
        queue_families: Vec<u32>,
        priorities: Vec<f32>,
        extensions: Vec<CString>,
    },
    DestroyDevice,
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        min_image_count: u32,
        format: vk::Format,
        color_space: vk::ColorSpaceKHR,
        extent: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
        sharing_mode: vk::SharingMode,
        queue_family_indices: Vec<u32>,
        old_swapchain: vk::SwapchainKHR,
    },
    DestroySwapchain(vk::SwapchainKHR),
    CreateImageView {
        view: vk::ImageView,
        image: vk::Image,
        format: vk::Format,
        view_type: vk::ImageViewType,
        identity_swizzle: bool,
        subresource_range: vk::ImageSubresourceRange,
    },
    DestroyImageView(vk::ImageView),
    CreateRenderPass {
        render_pass: vk::RenderPass,
        attachments: Vec<vk::AttachmentDescription>,
        color_attachment_counts: Vec<u32>,
        dependencies: Vec<vk::SubpassDependency>,
    },
    DestroyRenderPass(vk::RenderPass),
    CreateFramebuffer {
        framebuffer: vk::Framebuffer,
        render_pass: vk::RenderPass,
        attachments: Vec<vk::ImageView>,
        width: u32,
        height: u32,
        layers: u32,
    },
    DestroyFramebuffer(vk::Framebuffer),
    CreateCommandPool {
        pool: vk::CommandPool,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    },
    DestroyCommandPool(vk::CommandPool),
    AllocateCommandBuffers {
        level: vk::CommandBufferLevel,
        buffers: Vec<vk::CommandBuffer>,
    },
    FreeCommandBuffers(Vec<vk::CommandBuffer>),
    BeginCommandBuffer {
        buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    },
    EndCommandBuffer(vk::CommandBuffer),
    BeginRenderPass {
        buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_colors: Vec<[f32; 4]>,
    },
    EndRenderPass(vk::CommandBuffer),
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    CreateFence {
        fence: vk::Fence,
        signaled: bool,
    },
    DestroyFence(vk::Fence),
    WaitForFences(Vec<vk::Fence>),
    ResetFences(Vec<vk::Fence>),
    AcquireNextImage {
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout: u64,
    },
    QueueSubmit {
        queue: vk::Queue,
        fence: vk::Fence,
        batches: Vec<SubmitRecord>,
    },
    QueuePresent {
        queue: vk::Queue,
        wait_semaphores: Vec<vk::Semaphore>,
        swapchains: Vec<vk::SwapchainKHR>,
        image_indices: Vec<u32>,
    },
    QueueWaitIdle(vk::Queue),
    DeviceWaitIdle,
    DestroySurface(vk::SurfaceKHR),
}

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    EnumeratePhysicalDevices,
    SurfaceSupport,
    SurfaceCapabilities,
    SurfaceFormats,
    SurfacePresentModes,
    CreateDevice,
    CreateSwapchain,
    CreateImageView,
    CreateRenderPass,
    CreateFramebuffer,
    CreateCommandPool,
    AllocateCommandBuffers,
    BeginCommandBuffer,
    EndCommandBuffer,
    CreateSemaphore,
    CreateFence,
    QueueSubmit,
    QueueWaitIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferState {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug, Clone)]
pub struct MockQueueFamily {
    pub flags: vk::QueueFlags,
    pub count: u32,
    pub present: bool,
}

impl MockQueueFamily {
    pub fn new(flags: vk::QueueFlags, present: bool) -> Self {
        Self {
            flags,
            count: 1,
            present,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockPhysicalDevice {
    pub name: String,
    pub queue_families: Vec<MockQueueFamily>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl MockPhysicalDevice {
    /// One queue family doing graphics and presentation.
    pub fn combined(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queue_families: vec![MockQueueFamily::new(vk::QueueFlags::GRAPHICS, true)],
            capabilities: unbounded_capabilities(),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    /// Graphics-only family 0, presentation-only family 1.
    pub fn split(name: &str) -> Self {
        Self {
            queue_families: vec![
                MockQueueFamily::new(vk::QueueFlags::GRAPHICS, false),
                MockQueueFamily::new(vk::QueueFlags::TRANSFER, true),
            ],
            ..Self::combined(name)
        }
    }
}

/// min 2 images, no max, window-defined extent within 1..=4096.
pub fn unbounded_capabilities() -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count: 2,
        max_image_count: 0,
        current_extent: vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        },
        min_image_extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 4096,
        },
        max_image_array_layers: 1,
        current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
        ..Default::default()
    }
}

struct GpuState {
    next_handle: u64,
    calls: Vec<Call>,
    failures: HashMap<Op, (usize, vk::Result)>,
    acquire_results: VecDeque<VkResult<(u32, bool)>>,
    present_results: VecDeque<VkResult<bool>>,
    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    next_image: u32,
    fences: HashMap<u64, FenceState>,
    buffers: HashMap<u64, BufferState>,
    buffer_pools: HashMap<u64, u64>,
    in_flight_buffers: Vec<u64>,
    pending_batches: usize,
    max_pending_batches: usize,
    live: HashMap<u64, &'static str>,
    violations: Vec<String>,
}

impl GpuState {
    fn new_handle(&mut self, kind: &'static str) -> u64 {
        self.next_handle += 1;
        self.live.insert(self.next_handle, kind);
        self.next_handle
    }

    fn release(&mut self, raw: u64, kind: &'static str) {
        match self.live.remove(&raw) {
            Some(live_kind) if live_kind == kind => {}
            Some(live_kind) => self
                .violations
                .push(format!("destroyed {live_kind} {raw:#x} as {kind}")),
            None => self
                .violations
                .push(format!("destroyed unknown or dead {kind} {raw:#x}")),
        }
    }

    fn check(&mut self, op: Op) -> VkResult<()> {
        if let Some((skip, result)) = self.failures.get_mut(&op) {
            if *skip == 0 {
                let result = *result;
                self.failures.remove(&op);
                return Err(result);
            }
            *skip -= 1;
        }
        Ok(())
    }

    fn complete_all(&mut self) {
        for state in self.fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
        self.pending_batches = 0;
        self.in_flight_buffers.clear();
    }
}

pub struct MockGpu {
    state: Mutex<GpuState>,
}

impl MockGpu {
    fn new() -> Self {
        Self {
            state: Mutex::new(GpuState {
                next_handle: 0x1000,
                calls: Vec::new(),
                failures: HashMap::new(),
                acquire_results: VecDeque::new(),
                present_results: VecDeque::new(),
                swapchain_images: HashMap::new(),
                next_image: 0,
                fences: HashMap::new(),
                buffers: HashMap::new(),
                buffer_pools: HashMap::new(),
                in_flight_buffers: Vec::new(),
                pending_batches: 0,
                max_pending_batches: 0,
                live: HashMap::new(),
                violations: Vec::new(),
            }),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Fail the next call of `op` with `result`.
    pub fn fail(&self, op: Op, result: vk::Result) {
        self.fail_after(op, 0, result);
    }

    /// Let `skip` calls of `op` succeed, then fail one with `result`.
    pub fn fail_after(&self, op: Op, skip: usize, result: vk::Result) {
        self.state.lock().failures.insert(op, (skip, result));
    }

    pub fn script_acquire(&self, result: VkResult<(u32, bool)>) {
        self.state.lock().acquire_results.push_back(result);
    }

    pub fn script_present(&self, result: VkResult<bool>) {
        self.state.lock().present_results.push_back(result);
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn max_pending_batches(&self) -> usize {
        self.state.lock().max_pending_batches
    }

    /// Objects created and not destroyed yet, by kind.
    pub fn live_objects(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.state.lock().live.values().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

unsafe fn slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, len as usize)
    }
}

pub struct MockInstance {
    gpu: Arc<MockGpu>,
    devices: Vec<MockPhysicalDevice>,
}

impl MockInstance {
    pub fn new(devices: Vec<MockPhysicalDevice>) -> Arc<Self> {
        Arc::new(Self {
            gpu: Arc::new(MockGpu::new()),
            devices,
        })
    }

    pub fn gpu(&self) -> &Arc<MockGpu> {
        &self.gpu
    }

    pub fn physical_device(index: usize) -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(index as u64 + 1)
    }

    pub fn create_surface(instance: &Arc<Self>) -> Surface<Self> {
        let raw = instance.gpu.state.lock().new_handle("surface");
        unsafe { Surface::from_raw(Arc::clone(instance), vk::SurfaceKHR::from_raw(raw)) }
    }

    fn device(&self, physical_device: vk::PhysicalDevice) -> &MockPhysicalDevice {
        &self.devices[physical_device.as_raw() as usize - 1]
    }
}

impl InstanceApi for MockInstance {
    type Device = MockDevice;

    unsafe fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        self.gpu.state.lock().check(Op::EnumeratePhysicalDevices)?;
        Ok((0..self.devices.len()).map(Self::physical_device).collect())
    }

    unsafe fn physical_device_name(&self, physical_device: vk::PhysicalDevice) -> String {
        self.device(physical_device).name.clone()
    }

    unsafe fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        self.device(physical_device)
            .queue_families
            .iter()
            .map(|family| vk::QueueFamilyProperties {
                queue_flags: family.flags,
                queue_count: family.count,
                ..Default::default()
            })
            .collect()
    }

    unsafe fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<bool> {
        self.gpu.state.lock().check(Op::SurfaceSupport)?;
        Ok(self
            .device(physical_device)
            .queue_families
            .get(queue_family_index as usize)
            .is_some_and(|family| family.present))
    }

    unsafe fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        self.gpu.state.lock().check(Op::SurfaceCapabilities)?;
        Ok(self.device(physical_device).capabilities)
    }

    unsafe fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        self.gpu.state.lock().check(Op::SurfaceFormats)?;
        Ok(self.device(physical_device).formats.clone())
    }

    unsafe fn surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        self.gpu.state.lock().check(Op::SurfacePresentModes)?;
        Ok(self.device(physical_device).present_modes.clone())
    }

    unsafe fn create_device(
        &self,
        _physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> VkResult<MockDevice> {
        let mut state = self.gpu.state.lock();
        state.check(Op::CreateDevice)?;

        let queue_infos = slice(
            create_info.p_queue_create_infos,
            create_info.queue_create_info_count,
        );
        let queue_families = queue_infos
            .iter()
            .map(|info| info.queue_family_index)
            .collect();
        let priorities = queue_infos
            .iter()
            .flat_map(|info| slice(info.p_queue_priorities, info.queue_count).iter().copied())
            .collect();
        let extensions = slice(
            create_info.pp_enabled_extension_names,
            create_info.enabled_extension_count,
        )
        .iter()
        .map(|&name| CStr::from_ptr(name).to_owned())
        .collect();

        state.live.insert(0, "device");
        state.calls.push(Call::CreateDevice {
            queue_families,
            priorities,
            extensions,
        });
        Ok(MockDevice {
            gpu: Arc::clone(&self.gpu),
        })
    }

    unsafe fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        let mut state = self.gpu.state.lock();
        state.release(surface.as_raw(), "surface");
        state.calls.push(Call::DestroySurface(surface));
    }
}

pub struct MockDevice {
    gpu: Arc<MockGpu>,
}

impl MockDevice {
    fn create(&self, op: Op, kind: &'static str) -> VkResult<u64> {
        let mut state = self.gpu.state.lock();
        state.check(op)?;
        Ok(state.new_handle(kind))
    }

    fn destroy(&self, raw: u64, kind: &'static str, call: Call) {
        let mut state = self.gpu.state.lock();
        state.release(raw, kind);
        state.calls.push(call);
    }
}

impl DeviceApi for MockDevice {
    unsafe fn get_device_queue(&self, queue_family_index: u32, _queue_index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x100 + queue_family_index as u64)
    }

    unsafe fn create_swapchain(
        &self,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let raw = self.create(Op::CreateSwapchain, "swapchain")?;
        let swapchain = vk::SwapchainKHR::from_raw(raw);

        let mut state = self.gpu.state.lock();
        let images = (0..create_info.min_image_count)
            .map(|i| vk::Image::from_raw(0x10_0000 + raw * 0x10 + i as u64))
            .collect();
        state.swapchain_images.insert(raw, images);
        state.next_image = 0;
        state.calls.push(Call::CreateSwapchain {
            swapchain,
            min_image_count: create_info.min_image_count,
            format: create_info.image_format,
            color_space: create_info.image_color_space,
            extent: create_info.image_extent,
            present_mode: create_info.present_mode,
            sharing_mode: create_info.image_sharing_mode,
            queue_family_indices: slice(
                create_info.p_queue_family_indices,
                create_info.queue_family_index_count,
            )
            .to_vec(),
            old_swapchain: create_info.old_swapchain,
        });
        Ok(swapchain)
    }

    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.gpu
            .state
            .lock()
            .swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.gpu
            .state
            .lock()
            .swapchain_images
            .remove(&swapchain.as_raw());
        self.destroy(
            swapchain.as_raw(),
            "swapchain",
            Call::DestroySwapchain(swapchain),
        );
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.gpu.state.lock();
        state.calls.push(Call::AcquireNextImage {
            swapchain,
            semaphore,
            timeout,
        });
        if let Some(result) = state.acquire_results.pop_front() {
            return result;
        }
        let count = state
            .swapchain_images
            .get(&swapchain.as_raw())
            .map_or(0, Vec::len) as u32;
        if count == 0 {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        }
        let index = state.next_image % count;
        state.next_image += 1;
        Ok((index, false))
    }

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        present_info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool> {
        let mut state = self.gpu.state.lock();
        let swapchain_count = present_info.swapchain_count;
        state.calls.push(Call::QueuePresent {
            queue,
            wait_semaphores: slice(
                present_info.p_wait_semaphores,
                present_info.wait_semaphore_count,
            )
            .to_vec(),
            swapchains: slice(present_info.p_swapchains, swapchain_count).to_vec(),
            image_indices: slice(present_info.p_image_indices, swapchain_count).to_vec(),
        });
        state.present_results.pop_front().unwrap_or(Ok(false))
    }

    unsafe fn create_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView> {
        let view = vk::ImageView::from_raw(self.create(Op::CreateImageView, "image view")?);
        let components = create_info.components;
        self.gpu.record(Call::CreateImageView {
            view,
            image: create_info.image,
            format: create_info.format,
            view_type: create_info.view_type,
            identity_swizzle: [components.r, components.g, components.b, components.a]
                .iter()
                .all(|&swizzle| swizzle == vk::ComponentSwizzle::IDENTITY),
            subresource_range: create_info.subresource_range,
        });
        Ok(view)
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy(view.as_raw(), "image view", Call::DestroyImageView(view));
    }

    unsafe fn create_render_pass(
        &self,
        create_info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        let render_pass = vk::RenderPass::from_raw(self.create(Op::CreateRenderPass, "render pass")?);
        self.gpu.record(Call::CreateRenderPass {
            render_pass,
            attachments: slice(create_info.p_attachments, create_info.attachment_count).to_vec(),
            color_attachment_counts: slice(create_info.p_subpasses, create_info.subpass_count)
                .iter()
                .map(|subpass| subpass.color_attachment_count)
                .collect(),
            dependencies: slice(create_info.p_dependencies, create_info.dependency_count).to_vec(),
        });
        Ok(render_pass)
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy(
            render_pass.as_raw(),
            "render pass",
            Call::DestroyRenderPass(render_pass),
        );
    }

    unsafe fn create_framebuffer(
        &self,
        create_info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        let framebuffer =
            vk::Framebuffer::from_raw(self.create(Op::CreateFramebuffer, "framebuffer")?);
        self.gpu.record(Call::CreateFramebuffer {
            framebuffer,
            render_pass: create_info.render_pass,
            attachments: slice(create_info.p_attachments, create_info.attachment_count).to_vec(),
            width: create_info.width,
            height: create_info.height,
            layers: create_info.layers,
        });
        Ok(framebuffer)
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy(
            framebuffer.as_raw(),
            "framebuffer",
            Call::DestroyFramebuffer(framebuffer),
        );
    }

    unsafe fn create_command_pool(
        &self,
        create_info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool> {
        let pool = vk::CommandPool::from_raw(self.create(Op::CreateCommandPool, "command pool")?);
        self.gpu.record(Call::CreateCommandPool {
            pool,
            queue_family_index: create_info.queue_family_index,
            flags: create_info.flags,
        });
        Ok(pool)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.gpu.state.lock();
        if state.pending_batches > 0 {
            state
                .violations
                .push("command pool destroyed while batches are pending".to_string());
        }
        // Destroying a pool frees every buffer still allocated from it
        let owned: Vec<u64> = state
            .buffer_pools
            .iter()
            .filter(|(_, owner)| **owner == pool.as_raw())
            .map(|(&buffer, _)| buffer)
            .collect();
        for buffer in owned {
            state.buffers.remove(&buffer);
            state.buffer_pools.remove(&buffer);
            state.live.remove(&buffer);
        }
        drop(state);
        self.destroy(pool.as_raw(), "command pool", Call::DestroyCommandPool(pool));
    }

    unsafe fn allocate_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.gpu.state.lock();
        state.check(Op::AllocateCommandBuffers)?;
        let buffers: Vec<_> = (0..allocate_info.command_buffer_count)
            .map(|_| {
                let raw = state.new_handle("command buffer");
                state.buffers.insert(raw, BufferState::Initial);
                state
                    .buffer_pools
                    .insert(raw, allocate_info.command_pool.as_raw());
                vk::CommandBuffer::from_raw(raw)
            })
            .collect();
        state.calls.push(Call::AllocateCommandBuffers {
            level: allocate_info.level,
            buffers: buffers.clone(),
        });
        Ok(buffers)
    }

    unsafe fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.gpu.state.lock();
        for buffer in buffers {
            let raw = buffer.as_raw();
            if state.in_flight_buffers.contains(&raw) {
                state
                    .violations
                    .push(format!("freed command buffer {raw:#x} while in flight"));
            }
            state.buffers.remove(&raw);
            state.buffer_pools.remove(&raw);
            state.release(raw, "command buffer");
        }
        state.calls.push(Call::FreeCommandBuffers(buffers.to_vec()));
    }

    unsafe fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        let mut state = self.gpu.state.lock();
        state.check(Op::BeginCommandBuffer)?;
        state.buffers.insert(buffer.as_raw(), BufferState::Recording);
        state.calls.push(Call::BeginCommandBuffer {
            buffer,
            flags: begin_info.flags,
        });
        Ok(())
    }

    unsafe fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.gpu.state.lock();
        state.check(Op::EndCommandBuffer)?;
        if state.buffers.get(&buffer.as_raw()) != Some(&BufferState::Recording) {
            state
                .violations
                .push(format!("ended command buffer {:#x} not recording", buffer.as_raw()));
        }
        state.buffers.insert(buffer.as_raw(), BufferState::Executable);
        state.calls.push(Call::EndCommandBuffer(buffer));
        Ok(())
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        buffer: vk::CommandBuffer,
        begin_info: &vk::RenderPassBeginInfo<'_>,
        _contents: vk::SubpassContents,
    ) {
        let clear_colors = slice(begin_info.p_clear_values, begin_info.clear_value_count)
            .iter()
            .map(|value| value.color.float32)
            .collect();
        self.gpu.record(Call::BeginRenderPass {
            buffer,
            render_pass: begin_info.render_pass,
            framebuffer: begin_info.framebuffer,
            render_area: begin_info.render_area,
            clear_colors,
        });
    }

    unsafe fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer) {
        self.gpu.record(Call::EndRenderPass(buffer));
    }

    unsafe fn create_semaphore(
        &self,
        _create_info: &vk::SemaphoreCreateInfo<'_>,
    ) -> VkResult<vk::Semaphore> {
        let semaphore = vk::Semaphore::from_raw(self.create(Op::CreateSemaphore, "semaphore")?);
        self.gpu.record(Call::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy(
            semaphore.as_raw(),
            "semaphore",
            Call::DestroySemaphore(semaphore),
        );
    }

    unsafe fn create_fence(&self, create_info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence> {
        let raw = self.create(Op::CreateFence, "fence")?;
        let signaled = create_info.flags.contains(vk::FenceCreateFlags::SIGNALED);
        let mut state = self.gpu.state.lock();
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(raw, initial);
        let fence = vk::Fence::from_raw(raw);
        state.calls.push(Call::CreateFence { fence, signaled });
        Ok(fence)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.gpu.state.lock();
        if state.fences.remove(&fence.as_raw()) == Some(FenceState::Pending) {
            state.violations.push("destroyed a pending fence".to_string());
        }
        drop(state);
        self.destroy(fence.as_raw(), "fence", Call::DestroyFence(fence));
    }

    unsafe fn wait_for_fences(&self, fences: &[vk::Fence], _timeout: u64) -> VkResult<()> {
        let mut state = self.gpu.state.lock();
        state.calls.push(Call::WaitForFences(fences.to_vec()));
        for fence in fences {
            match state.fences.get(&fence.as_raw()).copied() {
                Some(FenceState::Signaled) => {}
                Some(FenceState::Pending) => state.complete_all(),
                Some(FenceState::Unsignaled) => {
                    state
                        .violations
                        .push("waited on a fence nothing will signal".to_string());
                    return Err(vk::Result::TIMEOUT);
                }
                None => return Err(vk::Result::ERROR_DEVICE_LOST),
            }
        }
        Ok(())
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        let mut state = self.gpu.state.lock();
        state.calls.push(Call::ResetFences(fences.to_vec()));
        for fence in fences {
            if state.fences.get(&fence.as_raw()) == Some(&FenceState::Pending) {
                state.violations.push("reset a pending fence".to_string());
            }
            state.fences.insert(fence.as_raw(), FenceState::Unsignaled);
        }
        Ok(())
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.gpu.state.lock();
        state.check(Op::QueueSubmit)?;

        let batches: Vec<SubmitRecord> = submits
            .iter()
            .map(|submit| SubmitRecord {
                wait_semaphores: slice(submit.p_wait_semaphores, submit.wait_semaphore_count)
                    .to_vec(),
                wait_stages: slice(submit.p_wait_dst_stage_mask, submit.wait_semaphore_count)
                    .to_vec(),
                command_buffers: slice(submit.p_command_buffers, submit.command_buffer_count)
                    .to_vec(),
                signal_semaphores: slice(
                    submit.p_signal_semaphores,
                    submit.signal_semaphore_count,
                )
                .to_vec(),
            })
            .collect();

        if fence != vk::Fence::null() {
            match state.fences.get(&fence.as_raw()).copied() {
                Some(FenceState::Unsignaled) => {}
                other => state
                    .violations
                    .push(format!("submitted with fence in state {other:?}")),
            }
            state.fences.insert(fence.as_raw(), FenceState::Pending);
        }
        for buffer in batches.iter().flat_map(|batch| &batch.command_buffers) {
            let raw = buffer.as_raw();
            if state.buffers.get(&raw) != Some(&BufferState::Executable) {
                state
                    .violations
                    .push(format!("submitted command buffer {raw:#x} not executable"));
            }
            state.in_flight_buffers.push(raw);
        }
        state.pending_batches += 1;
        state.max_pending_batches = state.max_pending_batches.max(state.pending_batches);
        state.calls.push(Call::QueueSubmit {
            queue,
            fence,
            batches,
        });
        Ok(())
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        let mut state = self.gpu.state.lock();
        state.calls.push(Call::QueueWaitIdle(queue));
        state.check(Op::QueueWaitIdle)?;
        state.complete_all();
        Ok(())
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        let mut state = self.gpu.state.lock();
        state.calls.push(Call::DeviceWaitIdle);
        state.complete_all();
        Ok(())
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        let mut state = self.gpu.state.lock();
        state.release(0, "device");
        state.calls.push(Call::DestroyDevice);
    }
}

/// A mock GPU brought up to a logical device, ready for swap chains.
pub struct Rig {
    pub device: Device<MockDevice>,
    pub selected: SelectedDevice,
    pub surface: Surface<MockInstance>,
    pub instance: Arc<MockInstance>,
}

impl Rig {
    pub fn new(physical_device: MockPhysicalDevice) -> Self {
        let instance = MockInstance::new(vec![physical_device]);
        let surface = MockInstance::create_surface(&instance);
        let selected =
            select_device(instance.as_ref(), surface.handle()).expect("mock GPU is suitable");
        let device = Device::create(instance.as_ref(), &selected).expect("mock device");
        Self {
            device,
            selected,
            surface,
            instance,
        }
    }

    pub fn gpu(&self) -> &Arc<MockGpu> {
        self.instance.gpu()
    }

    pub fn swapchain(&self, width: u32, height: u32) -> Result<Swapchain<MockDevice>, InitError> {
        self.build_swapchain(width, height, None)
    }

    pub fn replace_swapchain(
        &self,
        old: &Swapchain<MockDevice>,
        width: u32,
        height: u32,
    ) -> Result<Swapchain<MockDevice>, InitError> {
        self.build_swapchain(width, height, Some(old))
    }

    fn build_swapchain(
        &self,
        width: u32,
        height: u32,
        old: Option<&Swapchain<MockDevice>>,
    ) -> Result<Swapchain<MockDevice>, InitError> {
        Swapchain::new(
            self.instance.as_ref(),
            &self.device,
            self.selected.physical_device,
            self.surface.handle(),
            vk::Extent2D { width, height },
            old,
        )
    }
}

// Render passes - how the swap chain image is loaded and stored
//
// Two variants over the same single color attachment:
// - Clear: discard previous contents, UNDEFINED -> PRESENT_SRC
// - Draw:  keep previous contents, PRESENT_SRC -> PRESENT_SRC
// Each comes with one framebuffer per swap chain image view.

use ash::vk;
use std::sync::Arc;

use super::api::DeviceApi;
use super::swapchain::{ImageView, Swapchain};
use crate::error::InitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPassKind {
    Clear,
    Draw,
}

impl RenderPassKind {
    pub fn load_op(self) -> vk::AttachmentLoadOp {
        match self {
            Self::Clear => vk::AttachmentLoadOp::CLEAR,
            Self::Draw => vk::AttachmentLoadOp::LOAD,
        }
    }

    pub fn initial_layout(self) -> vk::ImageLayout {
        match self {
            Self::Clear => vk::ImageLayout::UNDEFINED,
            Self::Draw => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

pub struct RenderPass<D: DeviceApi> {
    handle: vk::RenderPass,
    kind: RenderPassKind,
    device: Arc<D>,
}

impl<D: DeviceApi> RenderPass<D> {
    pub fn new(device: &Arc<D>, kind: RenderPassKind, format: vk::Format) -> Result<Self, InitError> {
        let attachments = [vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(kind.load_op())
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(kind.initial_layout())
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];

        // Don't write the attachment before presentation is done reading it
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = unsafe { device.create_render_pass(&create_info) }
            .map_err(|result| InitError::RenderPassCreation { kind, result })?;

        log::debug!("Created {kind:?} render pass");
        Ok(Self {
            handle,
            kind,
            device: Arc::clone(device),
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn kind(&self) -> RenderPassKind {
        self.kind
    }
}

impl<D: DeviceApi> Drop for RenderPass<D> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.handle) }
    }
}

pub struct Framebuffer<D: DeviceApi> {
    handle: vk::Framebuffer,
    device: Arc<D>,
}

impl<D: DeviceApi> Framebuffer<D> {
    fn new(
        device: &Arc<D>,
        render_pass: &RenderPass<D>,
        view: &ImageView<D>,
        extent: vk::Extent2D,
    ) -> Result<Self, vk::Result> {
        let attachments = [view.handle()];
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let handle = unsafe { device.create_framebuffer(&create_info) }?;
        Ok(Self {
            handle,
            device: Arc::clone(device),
        })
    }

    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }
}

impl<D: DeviceApi> Drop for Framebuffer<D> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_framebuffer(self.handle) }
    }
}

/// A render pass and one framebuffer per swap chain image.
pub struct PassTargets<D: DeviceApi> {
    // Framebuffers reference the pass, so they go first
    framebuffers: Vec<Framebuffer<D>>,
    render_pass: RenderPass<D>,
}

impl<D: DeviceApi> PassTargets<D> {
    pub fn new(
        device: &Arc<D>,
        kind: RenderPassKind,
        swapchain: &Swapchain<D>,
    ) -> Result<Self, InitError> {
        let mut targets = Self {
            framebuffers: Vec::with_capacity(swapchain.image_count()),
            render_pass: RenderPass::new(device, kind, swapchain.format())?,
        };

        // On failure `targets` drops whatever exists
        for (index, view) in swapchain.image_views().iter().enumerate() {
            let framebuffer =
                Framebuffer::new(device, &targets.render_pass, view, swapchain.extent())
                    .map_err(|result| InitError::FramebufferCreation {
                        kind,
                        index,
                        result,
                    })?;
            targets.framebuffers.push(framebuffer);
        }

        Ok(targets)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    pub fn kind(&self) -> RenderPassKind {
        self.render_pass.kind()
    }

    pub fn framebuffer(&self, index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index).map(Framebuffer::handle)
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }
}

impl<D: DeviceApi> Drop for PassTargets<D> {
    fn drop(&mut self) {
        while self.framebuffers.pop().is_some() {}
    }
}

/// Both render pass variants built over the current swap chain.
///
/// Rebuilt whenever the swap chain (and so its image views) is replaced.
pub struct RenderTargets<D: DeviceApi> {
    draw: PassTargets<D>,
    clear: PassTargets<D>,
}

impl<D: DeviceApi> RenderTargets<D> {
    pub fn new(device: &Arc<D>, swapchain: &Swapchain<D>) -> Result<Self, InitError> {
        let clear = PassTargets::new(device, RenderPassKind::Clear, swapchain)?;
        let draw = PassTargets::new(device, RenderPassKind::Draw, swapchain)?;

        log::info!(
            "Created render passes with {} framebuffers each",
            clear.framebuffer_count()
        );
        Ok(Self { draw, clear })
    }

    pub fn get(&self, kind: RenderPassKind) -> &PassTargets<D> {
        match kind {
            RenderPassKind::Clear => &self.clear,
            RenderPassKind::Draw => &self.draw,
        }
    }
}

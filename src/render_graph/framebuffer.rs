// Framebuffers - one image view per render pass attachment

use ash::vk;

use super::graph::RenderPass;
use crate::backend::Unique;
use crate::error::{Error, Result, VkResultExt};

/// Framebuffer borrowing the render pass it was created against
///
/// The pass cannot be dropped while a framebuffer built from it is alive:
///
/// ```compile_fail
/// # use vkgraph::render_graph::{AttachmentInfo, AttachmentRole, Framebuffer, RenderGraph, Subpass};
/// # use vkgraph::{vk, NullDevice, SharedDevice};
/// # use vkgraph::vk::Handle;
/// let device: SharedDevice = NullDevice::new();
/// let mut graph = RenderGraph::new(&device);
/// let color = graph
///     .add_attachment(AttachmentInfo::builder(AttachmentRole::Color, vk::Format::R8G8B8A8_UNORM).build().unwrap())
///     .unwrap();
/// let mut subpass = Subpass::new();
/// subpass.add_attachment(color).unwrap();
/// graph.add_subpass(subpass, vk::SubpassDescriptionFlags::empty(), vk::PipelineBindPoint::GRAPHICS).unwrap();
/// let pass = graph.finalize().unwrap();
/// let extent = vk::Extent2D { width: 8, height: 8 };
/// let framebuffer = Framebuffer::new(&pass, &[vk::ImageView::from_raw(1)], extent, 1).unwrap();
/// drop(pass);
/// framebuffer.handle();
/// ```
pub struct Framebuffer<'a> {
    handle: Unique<vk::Framebuffer>,
    render_pass: &'a RenderPass,
    extent: vk::Extent2D,
    layers: u32,
}

impl<'a> Framebuffer<'a> {
    /// `views` are matched to attachments by index
    pub fn new(render_pass: &'a RenderPass, views: &[vk::ImageView], extent: vk::Extent2D, layers: u32) -> Result<Self> {
        if views.len() != render_pass.attachment_count() {
            return Err(Error::config(format!(
                "framebuffer needs {} image views, got {}",
                render_pass.attachment_count(),
                views.len()
            )));
        }
        if extent.width == 0 || extent.height == 0 || layers == 0 {
            return Err(Error::config(format!(
                "framebuffer extent {}x{}x{} is empty",
                extent.width, extent.height, layers
            )));
        }

        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(layers);

        let device = render_pass.device();
        let handle = device
            .create_framebuffer(&framebuffer_info)
            .driver("vkCreateFramebuffer")?;

        Ok(Self {
            handle: Unique::new(device, handle),
            render_pass,
            extent,
            layers,
        })
    }

    /// One single-layer framebuffer per frame in flight
    pub fn for_frames(render_pass: &'a RenderPass, per_frame_views: &[Vec<vk::ImageView>], extent: vk::Extent2D) -> Result<Vec<Self>> {
        per_frame_views
            .iter()
            .map(|views| Self::new(render_pass, views, extent, 1))
            .collect()
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.handle.get()
    }

    /// Render pass this framebuffer was created against
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    pub fn pass(&self) -> &'a RenderPass {
        self.render_pass
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }
}

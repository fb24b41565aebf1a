// Render graph builder
//
// Attachment registry -> subpass descriptors -> `RenderGraph::finalize()`
// -> `RenderPass`, consumed by `Framebuffer` and graphics `Pipeline`s.

pub mod attachment;
pub mod description;
pub mod framebuffer;
pub mod graph;
pub mod subpass;

pub use attachment::{format_aspect, Attachment, AttachmentInfo, AttachmentInfoBuilder, AttachmentRole, ImageViewTemplate};
pub use description::RenderGraphDesc;
pub use framebuffer::Framebuffer;
pub use graph::{RenderGraph, RenderPass, SubpassDependency, SubpassRef};
pub use subpass::{AttachmentRef, FinalizedSubpass, Subpass};

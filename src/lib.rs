// =============================================================================
// VKGRAPH - render graphs and explicit synchronization on top of ash
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  RenderGraph (attachments, subpasses, dependencies)             │
// │    └── finalize() -> RenderPass -> Framebuffer / Pipeline       │
// │  CommandBuffer (state machine)                                  │
// │    └── barriers, render pass brackets, draws, dispatches        │
// │          └── submit: fences, binary / timeline semaphores       │
// │  GpuDevice: VulkanDevice (ash) | NullDevice (headless)          │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

pub mod backend;
pub mod command;
pub mod config;
pub mod error;
pub mod render_graph;
pub mod sync;

pub use ash::{self, vk};

pub use backend::{Buffer, GpuDevice, NullDevice, Pipeline, QueueType, ShaderModule, SharedDevice, VulkanDevice};
pub use command::{CommandBuffer, RecorderState, SubmitInfo};
pub use config::Config;
pub use error::{Error, Result};
pub use render_graph::{
    Attachment, AttachmentInfo, AttachmentRole, Framebuffer, RenderGraph, RenderGraphDesc, RenderPass, Subpass,
    SubpassDependency, SubpassRef,
};
pub use sync::{
    BarrierBatch, BinarySemaphore, BufferBarrier, Event, EventState, Fence, ImageBarrier, MemoryBarrier,
    TimelineSemaphore, WaitOutcome,
};

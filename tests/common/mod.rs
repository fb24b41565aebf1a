// Shared helpers for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use vkgraph::backend::NullDevice;
use vkgraph::{vk, AttachmentInfo, AttachmentRole, RenderGraph, RenderPass, SharedDevice, Subpass};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Null device plus the same device behind the trait object
pub fn null_device() -> (Arc<NullDevice>, SharedDevice) {
    init_logging();
    let null = NullDevice::new();
    let device: SharedDevice = null.clone();
    (null, device)
}

pub fn info(role: AttachmentRole, format: vk::Format) -> AttachmentInfo {
    AttachmentInfo::builder(role, format).build().unwrap()
}

/// Color + depth, one graphics subpass
pub fn color_depth_pass(device: &SharedDevice) -> RenderPass {
    let mut graph = RenderGraph::new(device);
    let color = graph
        .add_attachment(info(AttachmentRole::Color, vk::Format::B8G8R8A8_SRGB))
        .unwrap();
    let depth = graph
        .add_attachment(info(AttachmentRole::Depth, vk::Format::D32_SFLOAT))
        .unwrap();
    let mut subpass = Subpass::new();
    subpass.add_attachment(color).unwrap().add_attachment(depth).unwrap();
    graph
        .add_subpass(subpass, vk::SubpassDescriptionFlags::empty(), vk::PipelineBindPoint::GRAPHICS)
        .unwrap();
    graph.finalize().unwrap()
}

/// Minimal word stream the null device accepts as SPIR-V
pub const FAKE_SPIRV: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];

// =============================================================================
// VKGRAPH DEMO - headless render graph + synchronized submission
// =============================================================================
//
// FLOW:
// 1. Load config.toml and initialise logging
// 2. Create the Vulkan device (graphics / compute / transfer queues)
// 3. Build the render graph (description file or built-in forward pass)
//    and finalize it into a native render pass
// 4. Transfer queue: buffer barrier, signal timeline value 1
// 5. Graphics queue: wait for value 1, signal value 2 and a fence
// 6. Wait on the fence and the timeline from the CPU
//
// No window and no swapchain: the render pass is created, not drawn into.
//
// =============================================================================

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use vkgraph::{
    vk, AttachmentInfo, AttachmentRole, Buffer, BufferBarrier, CommandBuffer, Config, Fence, QueueType, RenderGraph,
    RenderGraphDesc, RenderPass, SharedDevice, Subpass, SubmitInfo, SubpassDependency, SubpassRef, TimelineSemaphore,
    VulkanDevice, WaitOutcome,
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting vkgraph demo");

    let vulkan = VulkanDevice::new(&config.device.app_name, config.debug.validation_layers)
        .context("Failed to create Vulkan device")?;
    let device: SharedDevice = vulkan.clone();

    let render_pass = build_render_pass(&config, &device)?;
    for (i, template) in render_pass.image_view_templates().iter().enumerate() {
        log::info!(
            "Attachment {}: {:?}, aspect {:?}",
            i,
            template.format,
            template.subresource_range.aspect_mask
        );
    }

    run_submission(&config, &device)?;

    vulkan.wait_idle().context("Failed to wait for device idle")?;
    log::info!("Done");
    Ok(())
}

/// Initialize logging with optional file output
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    // RUST_LOG wins over the config file
    builder.parse_env(Env::default());

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== vkgraph log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

// =============================================================================
// RENDER GRAPH
// =============================================================================

fn build_render_pass(config: &Config, device: &SharedDevice) -> Result<RenderPass> {
    let graph = match &config.graph.description {
        Some(path) => {
            let desc = RenderGraphDesc::load(path)
                .with_context(|| format!("Failed to load render graph description {:?}", path))?;
            desc.build(device)
                .with_context(|| format!("Invalid render graph description {:?}", path))?
        }
        None => forward_graph(device)?,
    };

    let render_pass = graph.finalize().context("Failed to finalize render graph")?;
    log::info!(
        "Render pass {:?}: {} attachments, {} subpasses, depth: {}",
        render_pass.handle(),
        render_pass.attachment_count(),
        render_pass.subpass_count(),
        render_pass.has_depth_stencil()
    );
    Ok(render_pass)
}

/// Color (presentable) + depth, one subpass
fn forward_graph(device: &SharedDevice) -> Result<RenderGraph> {
    let mut graph = RenderGraph::new(device);

    let color = graph.add_attachment(
        AttachmentInfo::builder(AttachmentRole::Color, vk::Format::B8G8R8A8_SRGB)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build()?,
    )?;
    let depth = graph.add_attachment(
        AttachmentInfo::builder(AttachmentRole::Depth, vk::Format::D32_SFLOAT)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .build()?,
    )?;

    let mut subpass = Subpass::new();
    subpass.add_attachment(color)?.add_attachment(depth)?;
    let main = graph.add_subpass(subpass, vk::SubpassDescriptionFlags::empty(), vk::PipelineBindPoint::GRAPHICS)?;

    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    graph.add_subpass_dependency(
        SubpassDependency::new(SubpassRef::External, main)
            .src_scope(attachment_stages, vk::AccessFlags::empty())
            .dst_scope(
                attachment_stages,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
    );
    Ok(graph)
}

// =============================================================================
// SUBMISSION
// =============================================================================

fn run_submission(config: &Config, device: &SharedDevice) -> Result<()> {
    let staging = Buffer::with_data(device, vk::BufferUsageFlags::TRANSFER_SRC, &[0u32; 64])
        .context("Failed to create staging buffer")?;
    let timeline = TimelineSemaphore::new(device, 0)?;
    let fence = Fence::new(device, false)?;

    // Transfer queue: make the host write visible to later transfers, then signal 1
    let mut upload = CommandBuffer::new(device, QueueType::Transfer)?;
    upload.add_barrier(
        BufferBarrier::builder(staging.handle())
            .src(vk::PipelineStageFlags::HOST, vk::AccessFlags::HOST_WRITE)
            .dst(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ)
            .build()?,
    )?;
    upload.submit_with(&SubmitInfo::new().signal_timeline(&timeline, 1), None)?;

    // Graphics queue: wait for the upload, signal 2 and the fence
    let mut frame = CommandBuffer::new(device, QueueType::Graphics)?;
    frame.begin()?;
    frame.submit_with(
        &SubmitInfo::new()
            .wait_timeline(&timeline, 1, vk::PipelineStageFlags::TOP_OF_PIPE)
            .signal_timeline(&timeline, 2),
        Some(&fence),
    )?;

    let timeout = config.sync.fence_timeout();
    if fence.wait(timeout)? == WaitOutcome::TimedOut {
        anyhow::bail!("Graphics submission did not complete within {:?}", timeout);
    }
    let reached = timeline.wait(2, timeout)?;
    log::info!(
        "Timeline at {} ({:?}), fence signaled: {}",
        timeline.counter()?,
        reached,
        fence.signaled()?
    );

    upload.reset()?;
    frame.reset()?;
    Ok(())
}

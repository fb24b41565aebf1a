// GpuDevice - the slice of the Vulkan device API this crate drives
//
// Everything above the backend talks to the GPU through this trait, so the
// same render graph / sync / command code runs on a real `VulkanDevice` or
// on the headless `NullDevice`.

use ash::prelude::VkResult;
use ash::vk;
use std::ops::Range;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Device shared by every object created from it
pub type SharedDevice = Arc<dyn GpuDevice>;

/// Hardware queue category a command buffer is recorded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Transfer];
}

/// Semaphore flavour requested at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreKind {
    Binary,
    Timeline { initial_value: u64 },
}

/// One semaphore wait of a queue submission
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreWait {
    pub semaphore: vk::Semaphore,
    /// Ignored for binary semaphores
    pub value: u64,
    pub stage: vk::PipelineStageFlags,
}

/// One semaphore signal of a queue submission
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreSignal {
    pub semaphore: vk::Semaphore,
    /// Ignored for binary semaphores
    pub value: u64,
}

/// A single batch handed to `GpuDevice::queue_submit`
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<SemaphoreSignal>,
    /// `vk::Fence::null()` when the submission is fire-and-forget
    pub fence: vk::Fence,
}

/// Barrier lists of one `vkCmdPipelineBarrier` / `vkCmdWaitEvents` call
#[derive(Clone, Copy)]
pub struct BarrierLists<'a> {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dependency_flags: vk::DependencyFlags,
    pub memory: &'a [vk::MemoryBarrier],
    pub buffer: &'a [vk::BufferMemoryBarrier],
    pub image: &'a [vk::ImageMemoryBarrier],
}

/// Device entry points used by the crate.
///
/// Creation calls return the native status untouched; callers map it with
/// the failing call's name. Destroy calls must accept handles that are
/// still referenced by nothing pending on the GPU.
pub trait GpuDevice: Send + Sync {
    fn queue_family_index(&self, queue: QueueType) -> u32;

    // Render passes & frame resources
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Fences
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    /// `Err(vk::Result::TIMEOUT)` when the timeout elapsed first
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;

    // Semaphores
    fn create_semaphore(&self, kind: SemaphoreKind) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn semaphore_counter(&self, semaphore: vk::Semaphore) -> VkResult<u64>;
    fn signal_semaphore(&self, semaphore: vk::Semaphore, value: u64) -> VkResult<()>;
    /// `Err(vk::Result::TIMEOUT)` when the timeout elapsed first
    fn wait_semaphore(&self, semaphore: vk::Semaphore, value: u64, timeout_ns: u64) -> VkResult<()>;

    // Events
    fn create_event(&self) -> VkResult<vk::Event>;
    fn destroy_event(&self, event: vk::Event);
    fn event_status(&self, event: vk::Event) -> VkResult<bool>;
    fn set_event(&self, event: vk::Event) -> VkResult<()>;
    fn reset_event(&self, event: vk::Event) -> VkResult<()>;

    // Command pools & buffers
    fn create_command_pool(&self, queue: QueueType) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer>;
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn queue_submit(&self, queue: QueueType, submission: &Submission) -> VkResult<()>;
    fn queue_wait_idle(&self, queue: QueueType) -> VkResult<()>;

    // Recording
    fn cmd_pipeline_barrier(&self, command_buffer: vk::CommandBuffer, barriers: BarrierLists<'_>);
    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
        contents: vk::SubpassContents,
    );
    fn cmd_next_subpass(&self, command_buffer: vk::CommandBuffer, contents: vk::SubpassContents);
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    fn cmd_draw(&self, command_buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32);
    fn cmd_set_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags);
    fn cmd_reset_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags);
    fn cmd_wait_events(&self, command_buffer: vk::CommandBuffer, events: &[vk::Event], barriers: BarrierLists<'_>);

    // Setup collaborators: buffers, shaders, pipelines
    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags, memory: vk::MemoryPropertyFlags) -> Result<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()>;
    fn read_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, out: &mut [u8]) -> Result<()>;
    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_compute_pipeline(&self, info: &vk::ComputePipelineCreateInfo) -> VkResult<vk::Pipeline>;
    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
}

/// Byte range of a host access of `len` bytes at `offset` within `size` bytes
pub(crate) fn host_range(offset: vk::DeviceSize, len: usize, size: usize) -> Result<Range<usize>> {
    usize::try_from(offset)
        .ok()
        .and_then(|start| start.checked_add(len).map(|end| start..end))
        .filter(|range| range.end <= size)
        .ok_or_else(|| Error::config(format!("access of {} bytes at {} overruns a {} byte buffer", len, offset, size)))
}

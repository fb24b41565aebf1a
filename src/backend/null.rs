// NullDevice - headless in-process device
//
// Hands out fake handles, tracks fence / semaphore / event state and records
// every command. Submissions execute synchronously, in FIFO order per queue,
// as soon as their semaphore waits are satisfied. Blocked CPU waits are woken
// through a condvar whenever a signal lands.
//
// Misuse that a validation layer would report comes back as
// `vk::Result::ERROR_VALIDATION_FAILED_EXT`.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::gpu_device::{
    host_range, BarrierLists, GpuDevice, QueueType, SemaphoreKind, SemaphoreSignal, SemaphoreWait, Submission,
};
use crate::error::{Error, Result};

const VALIDATION: vk::Result = vk::Result::ERROR_VALIDATION_FAILED_EXT;

/// Summary of one barrier call as the driver received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierRecord {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dependency_flags: vk::DependencyFlags,
    pub memory_count: usize,
    pub buffer_count: usize,
    pub image_count: usize,
    /// (old, new) layout per image barrier
    pub image_layouts: Vec<(vk::ImageLayout, vk::ImageLayout)>,
    /// (src, dst) queue family per buffer and image barrier
    pub queue_transfers: Vec<(u32, u32)>,
}

impl BarrierRecord {
    fn from_lists(lists: &BarrierLists<'_>) -> Self {
        let queue_transfers = lists
            .buffer
            .iter()
            .map(|b| (b.src_queue_family_index, b.dst_queue_family_index))
            .chain(lists.image.iter().map(|b| (b.src_queue_family_index, b.dst_queue_family_index)))
            .collect();

        Self {
            src_stage: lists.src_stage,
            dst_stage: lists.dst_stage,
            dependency_flags: lists.dependency_flags,
            memory_count: lists.memory.len(),
            buffer_count: lists.buffer.len(),
            image_count: lists.image.len(),
            image_layouts: lists.image.iter().map(|b| (b.old_layout, b.new_layout)).collect(),
            queue_transfers,
        }
    }
}

/// A command as recorded by the null device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NullCommand {
    PipelineBarrier(BarrierRecord),
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        clear_values: usize,
    },
    NextSubpass,
    EndRenderPass,
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        first_set: u32,
        count: usize,
    },
    PushConstants {
        offset: u32,
        size: usize,
    },
    BindVertexBuffers {
        first_binding: u32,
        count: usize,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    SetEvent {
        event: vk::Event,
        stage: vk::PipelineStageFlags,
    },
    ResetEvent {
        event: vk::Event,
        stage: vk::PipelineStageFlags,
    },
    WaitEvents {
        events: Vec<vk::Event>,
        barriers: BarrierRecord,
    },
}

/// Subpass table of a created render pass
#[derive(Debug, Clone)]
pub struct SubpassRecord {
    pub bind_point: vk::PipelineBindPoint,
    pub input: Vec<vk::AttachmentReference>,
    pub color: Vec<vk::AttachmentReference>,
    pub resolve: Vec<vk::AttachmentReference>,
    pub depth: Option<vk::AttachmentReference>,
    pub preserve: Vec<u32>,
}

/// Copy of everything passed to `vkCreateRenderPass`
#[derive(Debug, Clone)]
pub struct RenderPassRecord {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpasses: Vec<SubpassRecord>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferRecord {
    pub render_pass: vk::RenderPass,
    pub attachment_count: usize,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

/// A batch the null device has executed
#[derive(Debug, Clone)]
pub struct ExecutedBatch {
    pub queue: QueueType,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub commands: Vec<NullCommand>,
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<SemaphoreSignal>,
}

#[derive(Debug, Clone, Copy)]
enum SemaphoreState {
    Binary { signaled: bool },
    Timeline { value: u64 },
}

struct CommandStream {
    pool: vk::CommandPool,
    recording: bool,
    commands: Vec<NullCommand>,
}

struct NullBuffer {
    data: Vec<u8>,
    host_visible: bool,
}

struct PendingBatch {
    queue: QueueType,
    command_buffers: Vec<vk::CommandBuffer>,
    commands: Vec<NullCommand>,
    waits: Vec<SemaphoreWait>,
    signals: Vec<SemaphoreSignal>,
    fence: vk::Fence,
}

#[derive(Default)]
struct NullState {
    next_handle: u64,
    live: HashSet<u64>,
    destroyed: usize,
    injected: HashMap<&'static str, vk::Result>,
    fences: HashMap<vk::Fence, bool>,
    semaphores: HashMap<vk::Semaphore, SemaphoreState>,
    events: HashMap<vk::Event, bool>,
    buffers: HashMap<vk::Buffer, NullBuffer>,
    render_passes: HashMap<vk::RenderPass, RenderPassRecord>,
    framebuffers: HashMap<vk::Framebuffer, FramebufferRecord>,
    pools: HashMap<vk::CommandPool, QueueType>,
    streams: HashMap<vk::CommandBuffer, CommandStream>,
    pending: VecDeque<PendingBatch>,
    executed: Vec<ExecutedBatch>,
}

impl NullState {
    fn create<H: Handle>(&mut self, call: &'static str) -> VkResult<H> {
        if let Some(result) = self.injected.remove(call) {
            return Err(result);
        }
        self.next_handle += 1;
        self.live.insert(self.next_handle);
        Ok(H::from_raw(self.next_handle))
    }

    fn destroy<H: Handle>(&mut self, handle: H) {
        let raw = handle.as_raw();
        if self.live.remove(&raw) {
            self.destroyed += 1;
        } else {
            log::warn!("NullDevice: destroying unknown {:?} handle {:#x}", H::TYPE, raw);
        }
    }

    fn take_failure(&mut self, call: &'static str) -> VkResult<()> {
        match self.injected.remove(call) {
            Some(result) => Err(result),
            None => Ok(()),
        }
    }

    fn record(&mut self, command_buffer: vk::CommandBuffer, command: NullCommand) {
        match self.streams.get_mut(&command_buffer) {
            Some(stream) if stream.recording => stream.commands.push(command),
            Some(_) => log::warn!("NullDevice: {:?} recorded outside begin/end, dropped", command),
            None => log::warn!("NullDevice: unknown command buffer {:?}", command_buffer),
        }
    }

    fn waits_satisfied(&self, batch: &PendingBatch) -> bool {
        batch.waits.iter().all(|wait| match self.semaphores.get(&wait.semaphore) {
            Some(SemaphoreState::Binary { signaled }) => *signaled,
            Some(SemaphoreState::Timeline { value }) => *value >= wait.value,
            None => false,
        })
    }

    fn execute(&mut self, batch: PendingBatch) {
        for wait in &batch.waits {
            if let Some(SemaphoreState::Binary { signaled }) = self.semaphores.get_mut(&wait.semaphore) {
                *signaled = false;
            }
        }

        for command in &batch.commands {
            match command {
                NullCommand::SetEvent { event, .. } => {
                    self.events.insert(*event, true);
                }
                NullCommand::ResetEvent { event, .. } => {
                    self.events.insert(*event, false);
                }
                NullCommand::WaitEvents { events, .. } => {
                    if events.iter().any(|e| !self.events.get(e).copied().unwrap_or(false)) {
                        log::warn!("NullDevice: vkCmdWaitEvents on an unset event would stall the queue");
                    }
                }
                _ => {}
            }
        }

        for signal in &batch.signals {
            match self.semaphores.get_mut(&signal.semaphore) {
                Some(SemaphoreState::Binary { signaled }) => *signaled = true,
                Some(SemaphoreState::Timeline { value }) => *value = (*value).max(signal.value),
                None => log::warn!("NullDevice: signal of unknown semaphore {:?}", signal.semaphore),
            }
        }

        if batch.fence != vk::Fence::null() {
            self.fences.insert(batch.fence, true);
        }

        log::trace!("NullDevice: executed batch on {:?} ({} commands)", batch.queue, batch.commands.len());
        self.executed.push(ExecutedBatch {
            queue: batch.queue,
            command_buffers: batch.command_buffers,
            commands: batch.commands,
            waits: batch.waits,
            signals: batch.signals,
        });
    }

    /// Runs every pending batch whose waits are met; a blocked batch blocks its queue
    fn retire(&mut self) {
        loop {
            let mut progressed = false;
            let mut blocked = HashSet::new();
            let mut i = 0;
            while i < self.pending.len() {
                let queue = self.pending[i].queue;
                if blocked.contains(&queue) {
                    i += 1;
                    continue;
                }
                if self.waits_satisfied(&self.pending[i]) {
                    if let Some(batch) = self.pending.remove(i) {
                        self.execute(batch);
                        progressed = true;
                    }
                } else {
                    blocked.insert(queue);
                    i += 1;
                }
            }
            if !progressed {
                break;
            }
        }
    }
}

unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, count as usize)
    }
}

/// Headless device for tests and tooling
#[derive(Default)]
pub struct NullDevice {
    state: Mutex<NullState>,
    signal: Condvar,
}

impl NullDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next call named `call` (e.g. "vkCreateRenderPass") fail with `result`
    pub fn fail_next(&self, call: &'static str, result: vk::Result) {
        self.state.lock().injected.insert(call, result);
    }

    /// Commands currently recorded into `command_buffer`
    pub fn commands(&self, command_buffer: vk::CommandBuffer) -> Vec<NullCommand> {
        self.state
            .lock()
            .streams
            .get(&command_buffer)
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    pub fn executed(&self) -> Vec<ExecutedBatch> {
        self.state.lock().executed.clone()
    }

    pub fn pending_batches(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn render_pass(&self, render_pass: vk::RenderPass) -> Option<RenderPassRecord> {
        self.state.lock().render_passes.get(&render_pass).cloned()
    }

    pub fn framebuffer(&self, framebuffer: vk::Framebuffer) -> Option<FramebufferRecord> {
        self.state.lock().framebuffers.get(&framebuffer).copied()
    }

    /// Objects created and not yet destroyed (command buffers excluded)
    pub fn live_objects(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn destroyed_objects(&self) -> usize {
        self.state.lock().destroyed
    }

    /// Blocks until `ready` holds or the timeout elapses
    fn wait_until(&self, timeout_ns: u64, ready: impl Fn(&NullState) -> VkResult<bool>) -> VkResult<()> {
        let deadline = Instant::now().checked_add(Duration::from_nanos(timeout_ns));
        let mut state = self.state.lock();
        loop {
            if ready(&*state)? {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(vk::Result::TIMEOUT);
                    }
                    self.signal.wait_until(&mut state, deadline);
                }
                None => self.signal.wait(&mut state),
            }
        }
    }
}

impl GpuDevice for NullDevice {
    fn queue_family_index(&self, queue: QueueType) -> u32 {
        match queue {
            QueueType::Graphics => 0,
            QueueType::Compute => 1,
            QueueType::Transfer => 2,
        }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        let mut state = self.state.lock();
        let render_pass = state.create("vkCreateRenderPass")?;

        // Safety: the caller keeps every array referenced by `info` alive for this call
        let record = unsafe {
            let subpasses = raw_slice(info.p_subpasses, info.subpass_count)
                .iter()
                .map(|s| SubpassRecord {
                    bind_point: s.pipeline_bind_point,
                    input: raw_slice(s.p_input_attachments, s.input_attachment_count).to_vec(),
                    color: raw_slice(s.p_color_attachments, s.color_attachment_count).to_vec(),
                    resolve: raw_slice(s.p_resolve_attachments, s.color_attachment_count).to_vec(),
                    depth: s.p_depth_stencil_attachment.as_ref().copied(),
                    preserve: raw_slice(s.p_preserve_attachments, s.preserve_attachment_count).to_vec(),
                })
                .collect();

            RenderPassRecord {
                attachments: raw_slice(info.p_attachments, info.attachment_count).to_vec(),
                subpasses,
                dependencies: raw_slice(info.p_dependencies, info.dependency_count).to_vec(),
            }
        };

        state.render_passes.insert(render_pass, record);
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut state = self.state.lock();
        state.render_passes.remove(&render_pass);
        state.destroy(render_pass);
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer> {
        let mut state = self.state.lock();
        let expected = state.render_passes.get(&info.render_pass).map(|r| r.attachments.len());
        if expected != Some(info.attachment_count as usize) {
            log::error!("NullDevice: framebuffer attachment count does not match its render pass");
            return Err(VALIDATION);
        }
        let framebuffer = state.create("vkCreateFramebuffer")?;
        state.framebuffers.insert(
            framebuffer,
            FramebufferRecord {
                render_pass: info.render_pass,
                attachment_count: info.attachment_count as usize,
                width: info.width,
                height: info.height,
                layers: info.layers,
            },
        );
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state.lock();
        state.framebuffers.remove(&framebuffer);
        state.destroy(framebuffer);
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        let fence = state.create("vkCreateFence")?;
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.fences.remove(&fence);
        state.destroy(fence);
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        self.state.lock().fences.get(&fence).copied().ok_or(VALIDATION)
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        if state.pending.iter().any(|b| b.fence == fence) {
            log::error!("NullDevice: vkResetFences on a fence referenced by a pending submission");
            return Err(VALIDATION);
        }
        match state.fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(VALIDATION),
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        self.wait_until(timeout_ns, |state| state.fences.get(&fence).copied().ok_or(VALIDATION))
    }

    fn create_semaphore(&self, kind: SemaphoreKind) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore = state.create("vkCreateSemaphore")?;
        let initial = match kind {
            SemaphoreKind::Binary => SemaphoreState::Binary { signaled: false },
            SemaphoreKind::Timeline { initial_value } => SemaphoreState::Timeline { value: initial_value },
        };
        state.semaphores.insert(semaphore, initial);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        state.semaphores.remove(&semaphore);
        state.destroy(semaphore);
    }

    fn semaphore_counter(&self, semaphore: vk::Semaphore) -> VkResult<u64> {
        match self.state.lock().semaphores.get(&semaphore) {
            Some(SemaphoreState::Timeline { value }) => Ok(*value),
            _ => Err(VALIDATION),
        }
    }

    fn signal_semaphore(&self, semaphore: vk::Semaphore, value: u64) -> VkResult<()> {
        let mut state = self.state.lock();
        state.take_failure("vkSignalSemaphore")?;
        match state.semaphores.get_mut(&semaphore) {
            Some(SemaphoreState::Timeline { value: current }) if value > *current => *current = value,
            Some(SemaphoreState::Timeline { value: current }) => {
                log::error!("NullDevice: timeline signal {} is not greater than counter {}", value, current);
                return Err(VALIDATION);
            }
            _ => return Err(VALIDATION),
        }
        state.retire();
        drop(state);
        self.signal.notify_all();
        Ok(())
    }

    fn wait_semaphore(&self, semaphore: vk::Semaphore, value: u64, timeout_ns: u64) -> VkResult<()> {
        self.wait_until(timeout_ns, |state| match state.semaphores.get(&semaphore) {
            Some(SemaphoreState::Timeline { value: current }) => Ok(*current >= value),
            _ => Err(VALIDATION),
        })
    }

    fn create_event(&self) -> VkResult<vk::Event> {
        let mut state = self.state.lock();
        let event = state.create("vkCreateEvent")?;
        state.events.insert(event, false);
        Ok(event)
    }

    fn destroy_event(&self, event: vk::Event) {
        let mut state = self.state.lock();
        state.events.remove(&event);
        state.destroy(event);
    }

    fn event_status(&self, event: vk::Event) -> VkResult<bool> {
        self.state.lock().events.get(&event).copied().ok_or(VALIDATION)
    }

    fn set_event(&self, event: vk::Event) -> VkResult<()> {
        match self.state.lock().events.get_mut(&event) {
            Some(set) => {
                *set = true;
                Ok(())
            }
            None => Err(VALIDATION),
        }
    }

    fn reset_event(&self, event: vk::Event) -> VkResult<()> {
        match self.state.lock().events.get_mut(&event) {
            Some(set) => {
                *set = false;
                Ok(())
            }
            None => Err(VALIDATION),
        }
    }

    fn create_command_pool(&self, queue: QueueType) -> VkResult<vk::CommandPool> {
        let mut state = self.state.lock();
        let pool = state.create("vkCreateCommandPool")?;
        state.pools.insert(pool, queue);
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        state.pools.remove(&pool);
        state.streams.retain(|_, stream| stream.pool != pool);
        state.destroy(pool);
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state.lock();
        if !state.pools.contains_key(&pool) {
            return Err(VALIDATION);
        }
        state.take_failure("vkAllocateCommandBuffers")?;
        state.next_handle += 1;
        let command_buffer = vk::CommandBuffer::from_raw(state.next_handle);
        state.streams.insert(
            command_buffer,
            CommandStream {
                pool,
                recording: false,
                commands: Vec::new(),
            },
        );
        Ok(command_buffer)
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, _flags: vk::CommandBufferUsageFlags) -> VkResult<()> {
        let mut state = self.state.lock();
        state.take_failure("vkBeginCommandBuffer")?;
        let stream = state.streams.get_mut(&command_buffer).ok_or(VALIDATION)?;
        stream.commands.clear();
        stream.recording = true;
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        state.take_failure("vkEndCommandBuffer")?;
        match state.streams.get_mut(&command_buffer) {
            Some(stream) if stream.recording => {
                stream.recording = false;
                Ok(())
            }
            _ => Err(VALIDATION),
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        let stream = state.streams.get_mut(&command_buffer).ok_or(VALIDATION)?;
        stream.commands.clear();
        stream.recording = false;
        Ok(())
    }

    fn queue_submit(&self, queue: QueueType, submission: &Submission) -> VkResult<()> {
        let mut state = self.state.lock();
        state.take_failure("vkQueueSubmit")?;

        let mut commands = Vec::new();
        for command_buffer in &submission.command_buffers {
            let stream = state.streams.get(command_buffer).ok_or(VALIDATION)?;
            if stream.recording {
                log::error!("NullDevice: submitted command buffer {:?} is still recording", command_buffer);
                return Err(VALIDATION);
            }
            if state.pools.get(&stream.pool) != Some(&queue) {
                log::error!("NullDevice: command buffer {:?} submitted to the wrong queue", command_buffer);
                return Err(VALIDATION);
            }
            commands.extend(stream.commands.iter().cloned());
        }

        if submission.fence != vk::Fence::null() {
            match state.fences.get(&submission.fence) {
                Some(false) => {}
                _ => {
                    log::error!("NullDevice: vkQueueSubmit fence must exist and be unsignaled");
                    return Err(VALIDATION);
                }
            }
        }

        for signal in &submission.signals {
            match state.semaphores.get(&signal.semaphore) {
                Some(SemaphoreState::Timeline { value }) if signal.value <= *value => {
                    log::error!(
                        "NullDevice: timeline signal {} is not greater than counter {}",
                        signal.value,
                        value
                    );
                    return Err(VALIDATION);
                }
                Some(_) => {}
                None => return Err(VALIDATION),
            }
        }

        state.pending.push_back(PendingBatch {
            queue,
            command_buffers: submission.command_buffers.clone(),
            commands,
            waits: submission.waits.clone(),
            signals: submission.signals.clone(),
            fence: submission.fence,
        });
        state.retire();
        drop(state);
        self.signal.notify_all();
        Ok(())
    }

    fn queue_wait_idle(&self, queue: QueueType) -> VkResult<()> {
        self.wait_until(u64::MAX, |state| Ok(!state.pending.iter().any(|b| b.queue == queue)))
    }

    fn cmd_pipeline_barrier(&self, command_buffer: vk::CommandBuffer, barriers: BarrierLists<'_>) {
        self.state
            .lock()
            .record(command_buffer, NullCommand::PipelineBarrier(BarrierRecord::from_lists(&barriers)));
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
        _contents: vk::SubpassContents,
    ) {
        self.state.lock().record(
            command_buffer,
            NullCommand::BeginRenderPass {
                render_pass: info.render_pass,
                framebuffer: info.framebuffer,
                clear_values: info.clear_value_count as usize,
            },
        );
    }

    fn cmd_next_subpass(&self, command_buffer: vk::CommandBuffer, _contents: vk::SubpassContents) {
        self.state.lock().record(command_buffer, NullCommand::NextSubpass);
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.state.lock().record(command_buffer, NullCommand::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.state
            .lock()
            .record(command_buffer, NullCommand::BindPipeline { bind_point, pipeline });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.state.lock().record(
            command_buffer,
            NullCommand::BindDescriptorSets {
                first_set,
                count: sets.len(),
            },
        );
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.state.lock().record(
            command_buffer,
            NullCommand::PushConstants {
                offset,
                size: data.len(),
            },
        );
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.state.lock().record(
            command_buffer,
            NullCommand::BindVertexBuffers {
                first_binding,
                count: buffers.len(),
            },
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.state
            .lock()
            .record(command_buffer, NullCommand::BindIndexBuffer { buffer, index_type });
    }

    fn cmd_draw(&self, command_buffer: vk::CommandBuffer, vertex_count: u32, instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.state.lock().record(
            command_buffer,
            NullCommand::Draw {
                vertex_count,
                instance_count,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.state.lock().record(
            command_buffer,
            NullCommand::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.state.lock().record(command_buffer, NullCommand::Dispatch { x, y, z });
    }

    fn cmd_set_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags) {
        self.state.lock().record(command_buffer, NullCommand::SetEvent { event, stage });
    }

    fn cmd_reset_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags) {
        self.state.lock().record(command_buffer, NullCommand::ResetEvent { event, stage });
    }

    fn cmd_wait_events(&self, command_buffer: vk::CommandBuffer, events: &[vk::Event], barriers: BarrierLists<'_>) {
        self.state.lock().record(
            command_buffer,
            NullCommand::WaitEvents {
                events: events.to_vec(),
                barriers: BarrierRecord::from_lists(&barriers),
            },
        );
    }

    fn create_buffer(&self, size: vk::DeviceSize, _usage: vk::BufferUsageFlags, memory: vk::MemoryPropertyFlags) -> Result<vk::Buffer> {
        if size == 0 {
            return Err(Error::config("buffer size must be greater than zero"));
        }
        let mut state = self.state.lock();
        if let Err(result) = state.take_failure("vkAllocateMemory") {
            return Err(Error::OutOfMemory(format!("vkAllocateMemory returned {:?}", result)));
        }
        let buffer = state.create("vkCreateBuffer").map_err(|result| Error::Driver {
            call: "vkCreateBuffer",
            result,
        })?;
        state.buffers.insert(
            buffer,
            NullBuffer {
                data: vec![0; size as usize],
                host_visible: memory.contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
            },
        );
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        state.buffers.remove(&buffer);
        state.destroy(buffer);
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let target = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| Error::config(format!("unknown buffer {:?}", buffer)))?;
        if !target.host_visible {
            return Err(Error::config("buffer memory is not host visible"));
        }
        let range = host_range(offset, data.len(), target.data.len())?;
        target.data[range].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, out: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        let source = state
            .buffers
            .get(&buffer)
            .ok_or_else(|| Error::config(format!("unknown buffer {:?}", buffer)))?;
        if !source.host_visible {
            return Err(Error::config("buffer memory is not host visible"));
        }
        let range = host_range(offset, out.len(), source.data.len())?;
        out.copy_from_slice(&source.data[range]);
        Ok(())
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        if code.first() != Some(&0x0723_0203) {
            log::error!("NullDevice: shader code does not start with the SPIR-V magic number");
            return Err(VALIDATION);
        }
        self.state.lock().create("vkCreateShaderModule")
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state.lock().destroy(module);
    }

    fn create_pipeline_layout(&self, _info: &vk::PipelineLayoutCreateInfo) -> VkResult<vk::PipelineLayout> {
        self.state.lock().create("vkCreatePipelineLayout")
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.lock().destroy(layout);
    }

    fn create_compute_pipeline(&self, _info: &vk::ComputePipelineCreateInfo) -> VkResult<vk::Pipeline> {
        self.state.lock().create("vkCreateComputePipelines")
    }

    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline> {
        let mut state = self.state.lock();
        let subpasses = state.render_passes.get(&info.render_pass).map(|r| r.subpasses.len());
        match subpasses {
            Some(count) if (info.subpass as usize) < count => {}
            _ => {
                log::error!("NullDevice: graphics pipeline references an unknown render pass or subpass");
                return Err(VALIDATION);
            }
        }
        state.create("vkCreateGraphicsPipelines")
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state.lock().destroy(pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(device: &NullDevice, queue: QueueType, submission: Submission) -> vk::CommandBuffer {
        let pool = device.create_command_pool(queue).unwrap();
        let cb = device.allocate_command_buffer(pool).unwrap();
        device.begin_command_buffer(cb, vk::CommandBufferUsageFlags::empty()).unwrap();
        device.cmd_dispatch(cb, 1, 1, 1);
        device.end_command_buffer(cb).unwrap();
        let submission = Submission {
            command_buffers: vec![cb],
            ..submission
        };
        device.queue_submit(queue, &submission).unwrap();
        cb
    }

    #[test]
    fn blocked_batch_runs_once_timeline_reaches_value() {
        let device = NullDevice::new();
        let timeline = device
            .create_semaphore(SemaphoreKind::Timeline { initial_value: 0 })
            .unwrap();
        let fence = device.create_fence(false).unwrap();

        submit(
            &device,
            QueueType::Compute,
            Submission {
                waits: vec![SemaphoreWait {
                    semaphore: timeline,
                    value: 2,
                    stage: vk::PipelineStageFlags::COMPUTE_SHADER,
                }],
                fence,
                ..Default::default()
            },
        );
        assert_eq!(device.pending_batches(), 1);
        assert!(!device.fence_status(fence).unwrap());

        device.signal_semaphore(timeline, 1).unwrap();
        assert_eq!(device.pending_batches(), 1);

        device.signal_semaphore(timeline, 2).unwrap();
        assert_eq!(device.pending_batches(), 0);
        assert!(device.fence_status(fence).unwrap());
    }

    #[test]
    fn blocked_batch_blocks_later_batches_on_same_queue_only() {
        let device = NullDevice::new();
        let gate = device.create_semaphore(SemaphoreKind::Binary).unwrap();

        submit(
            &device,
            QueueType::Graphics,
            Submission {
                waits: vec![SemaphoreWait {
                    semaphore: gate,
                    value: 0,
                    stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                }],
                ..Default::default()
            },
        );
        submit(&device, QueueType::Graphics, Submission::default());
        submit(&device, QueueType::Transfer, Submission::default());

        assert_eq!(device.pending_batches(), 2);
        assert_eq!(device.executed().len(), 1);
        assert_eq!(device.executed()[0].queue, QueueType::Transfer);

        submit(
            &device,
            QueueType::Transfer,
            Submission {
                signals: vec![SemaphoreSignal { semaphore: gate, value: 0 }],
                ..Default::default()
            },
        );
        assert_eq!(device.pending_batches(), 0);
        assert_eq!(device.executed().len(), 4);
    }

    #[test]
    fn injected_failure_fires_once() {
        let device = NullDevice::new();
        device.fail_next("vkCreateFence", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(device.create_fence(false), Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert!(device.create_fence(false).is_ok());
    }

    #[test]
    fn host_signal_must_increase() {
        let device = NullDevice::new();
        let timeline = device
            .create_semaphore(SemaphoreKind::Timeline { initial_value: 3 })
            .unwrap();
        assert_eq!(device.signal_semaphore(timeline, 3), Err(VALIDATION));
        assert!(device.signal_semaphore(timeline, 4).is_ok());
    }
}

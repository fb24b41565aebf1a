// CommandBuffer - recorder state machine over one primary command buffer
//
// Record calls on an Initial recorder begin recording implicitly. Every
// command is checked against the recorder state, its queue usage and the
// render pass bracket before it reaches the device.

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::{RecorderState, SubmitInfo};
use crate::backend::{BarrierLists, Buffer, Pipeline, QueueType, SharedDevice, Submission, Unique};
use crate::error::{Error, Result, VkResultExt};
use crate::render_graph::{Framebuffer, RenderPass};
use crate::sync::event::EventMarks;
use crate::sync::{Barrier, BarrierBatch, Event, Fence, WaitOutcome};

#[derive(Debug, Clone, Copy)]
struct BoundPipeline {
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
    workgroup_size: Option<[u32; 3]>,
    push_constant_stages: vk::ShaderStageFlags,
}

#[derive(Debug, Clone, Copy)]
struct ActivePass {
    subpass: u32,
    subpass_count: u32,
}

pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    queue_type: QueueType,
    state: RecorderState,
    bound: Option<BoundPipeline>,
    index_bound: bool,
    render_pass: Option<ActivePass>,
    // Owned by compute_and_wait; kept after a timeout so reset() can check completion
    transient_fence: Option<Fence>,
    // Events set by the current recording; their pending marks go if it is discarded
    recorded_sets: Vec<Arc<EventMarks>>,
    pool: Unique<vk::CommandPool>,
}

impl CommandBuffer {
    /// Create a recorder with its own pool on the queue family of `queue_type`
    pub fn new(device: &SharedDevice, queue_type: QueueType) -> Result<Self> {
        let pool = device
            .create_command_pool(queue_type)
            .driver("vkCreateCommandPool")?;
        let pool = Unique::new(device, pool);
        let handle = device
            .allocate_command_buffer(pool.get())
            .driver("vkAllocateCommandBuffers")?;
        log::debug!("Allocated {:?} command buffer {:?}", queue_type, handle);

        Ok(Self {
            handle,
            queue_type,
            state: RecorderState::Initial,
            bound: None,
            index_bound: false,
            render_pass: None,
            transient_fence: None,
            recorded_sets: Vec::new(),
            pool,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_inside_render_pass(&self) -> bool {
        self.render_pass.is_some()
    }

    fn device(&self) -> &SharedDevice {
        self.pool.device()
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        log::error!("Cannot {} while the command buffer is {}", operation, self.state);
        Error::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn discard_recorded_sets(&mut self) {
        for marks in self.recorded_sets.drain(..) {
            marks.discard_set();
        }
    }

    fn require_queue(&self, operation: &'static str, required: QueueType) -> Result<()> {
        if self.queue_type != required {
            log::error!(
                "{} requires a {:?} command buffer, {:?} targets {:?}",
                operation,
                required,
                self.handle,
                self.queue_type
            );
            return Err(Error::QueueMismatch {
                operation,
                required,
                actual: self.queue_type,
            });
        }
        Ok(())
    }

    /// Begins implicitly from Initial; any other non-recording state is an error
    fn ensure_recording(&mut self, operation: &'static str) -> Result<()> {
        match self.state {
            RecorderState::Recording => Ok(()),
            RecorderState::Initial => self.begin(),
            _ => Err(self.invalid_state(operation)),
        }
    }

    fn require_render_pass(&self, operation: &'static str) -> Result<ActivePass> {
        self.render_pass.ok_or_else(|| self.invalid_state(operation))
    }

    fn require_outside_render_pass(&self, operation: &'static str) -> Result<()> {
        if self.render_pass.is_some() {
            return Err(Error::config(format!("{} is not allowed inside a render pass", operation)));
        }
        Ok(())
    }

    fn require_pipeline(&self, operation: &str, bind_point: vk::PipelineBindPoint) -> Result<BoundPipeline> {
        match self.bound {
            Some(bound) if bound.bind_point == bind_point => Ok(bound),
            _ => Err(Error::config(format!("{} requires a bound {:?} pipeline", operation, bind_point))),
        }
    }

    fn require_any_pipeline(&self, operation: &str) -> Result<BoundPipeline> {
        self.bound
            .ok_or_else(|| Error::config(format!("{} requires a bound pipeline", operation)))
    }

    // ---- lifecycle ----

    /// Initial -> Recording
    pub fn begin(&mut self) -> Result<()> {
        if self.state != RecorderState::Initial {
            return Err(self.invalid_state("begin recording"));
        }
        self.device()
            .begin_command_buffer(self.handle, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .driver("vkBeginCommandBuffer")?;
        self.state = RecorderState::Recording;
        Ok(())
    }

    /// Recording -> Executable
    pub fn end(&mut self) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(self.invalid_state("end recording"));
        }
        if self.render_pass.is_some() {
            return Err(Error::config("cannot end recording inside a render pass"));
        }
        if let Err(err) = self.device().end_command_buffer(self.handle).driver("vkEndCommandBuffer") {
            self.state = RecorderState::Invalid;
            return Err(err);
        }
        self.state = RecorderState::Executable;
        Ok(())
    }

    /// Back to Initial, discarding recorded commands
    ///
    /// A pending recorder whose transient fence has not signaled yet is left
    /// untouched and `Error::StillPending` is returned.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == RecorderState::Pending {
            if let Some(fence) = &self.transient_fence {
                if !fence.signaled()? {
                    log::warn!("Reset of {:?} refused: submission still in flight", self.handle);
                    return Err(Error::StillPending);
                }
            }
        }
        self.device()
            .reset_command_buffer(self.handle)
            .driver("vkResetCommandBuffer")?;
        if self.state == RecorderState::Pending {
            self.recorded_sets.clear();
        } else {
            self.discard_recorded_sets();
        }
        self.state = RecorderState::Initial;
        self.bound = None;
        self.index_bound = false;
        self.render_pass = None;
        self.transient_fence = None;
        Ok(())
    }

    // ---- pipeline state ----

    /// Bind a pipeline; its bind point must match the recorder's queue usage
    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) -> Result<()> {
        self.require_queue("bind_pipeline", pipeline.queue_type())?;
        self.ensure_recording("bind a pipeline")?;
        self.device()
            .cmd_bind_pipeline(self.handle, pipeline.bind_point(), pipeline.handle());
        self.bound = Some(BoundPipeline {
            layout: pipeline.layout(),
            bind_point: pipeline.bind_point(),
            workgroup_size: pipeline.workgroup_size(),
            push_constant_stages: pipeline.push_constant_stages(),
        });
        log::debug!("Bound pipeline {:?} on {:?}", pipeline.handle(), self.handle);
        Ok(())
    }

    /// Uses the layout of the bound pipeline
    pub fn bind_descriptor_sets(&mut self, first_set: u32, sets: &[vk::DescriptorSet]) -> Result<()> {
        self.ensure_recording("bind descriptor sets")?;
        let bound = self.require_any_pipeline("bind_descriptor_sets")?;
        if sets.is_empty() {
            return Ok(());
        }
        self.device()
            .cmd_bind_descriptor_sets(self.handle, bound.bind_point, bound.layout, first_set, sets);
        Ok(())
    }

    /// Offset and size must be multiples of 4
    pub fn push_constants(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.ensure_recording("push constants")?;
        let bound = self.require_any_pipeline("push_constants")?;
        if offset % 4 != 0 || data.is_empty() || data.len() % 4 != 0 {
            return Err(Error::config(format!(
                "push constant range {}+{} is not a non-empty multiple of 4 bytes",
                offset,
                data.len()
            )));
        }
        if bound.push_constant_stages.is_empty() {
            return Err(Error::config("bound pipeline declares no push constant ranges"));
        }
        self.device()
            .cmd_push_constants(self.handle, bound.layout, bound.push_constant_stages, offset, data);
        Ok(())
    }

    // ---- compute ----

    /// Dispatch enough workgroups to cover `x * y * z` invocations
    ///
    /// Each axis is rounded up: 20 invocations with a workgroup size of 8 run
    /// 3 workgroups.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.require_queue("dispatch", QueueType::Compute)?;
        self.ensure_recording("dispatch")?;
        let bound = self.require_pipeline("dispatch", vk::PipelineBindPoint::COMPUTE)?;
        let [wx, wy, wz] = bound
            .workgroup_size
            .ok_or_else(|| Error::config("bound compute pipeline has no workgroup size"))?;
        let groups = [x.div_ceil(wx), y.div_ceil(wy), z.div_ceil(wz)];
        log::debug!("Dispatch {:?} invocations as {:?} workgroups", [x, y, z], groups);
        self.device()
            .cmd_dispatch(self.handle, groups[0], groups[1], groups[2]);
        Ok(())
    }

    /// Dispatch raw workgroup counts
    pub fn dispatch_workgroups(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.require_queue("dispatch_workgroups", QueueType::Compute)?;
        self.ensure_recording("dispatch")?;
        self.require_pipeline("dispatch_workgroups", vk::PipelineBindPoint::COMPUTE)?;
        self.device().cmd_dispatch(self.handle, x, y, z);
        Ok(())
    }

    // ---- render pass bracket ----

    /// Start `render_pass` on `framebuffer`, covering the whole framebuffer
    ///
    /// `clear_values` must hold one entry per attachment up to the last one
    /// that is cleared on load.
    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer<'_>,
        clear_values: &[vk::ClearValue],
        contents: vk::SubpassContents,
    ) -> Result<()> {
        self.require_queue("begin_render_pass", QueueType::Graphics)?;
        self.ensure_recording("begin a render pass")?;
        if self.render_pass.is_some() {
            return Err(self.invalid_state("begin a render pass inside another"));
        }
        if framebuffer.render_pass() != render_pass.handle() {
            return Err(Error::config(format!(
                "framebuffer {:?} was not created for render pass {:?}",
                framebuffer.handle(),
                render_pass.handle()
            )));
        }
        if clear_values.len() < render_pass.clear_value_count() {
            return Err(Error::config(format!(
                "render pass needs {} clear values, got {}",
                render_pass.clear_value_count(),
                clear_values.len()
            )));
        }

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: framebuffer.extent(),
            })
            .clear_values(clear_values);

        self.device()
            .cmd_begin_render_pass(self.handle, &render_pass_info, contents);
        self.render_pass = Some(ActivePass {
            subpass: 0,
            subpass_count: render_pass.subpass_count() as u32,
        });
        Ok(())
    }

    pub fn next_subpass(&mut self, contents: vk::SubpassContents) -> Result<()> {
        let mut pass = self.require_render_pass("advance to the next subpass outside a render pass")?;
        if pass.subpass + 1 >= pass.subpass_count {
            return Err(Error::config(format!(
                "already in the last subpass ({} of {})",
                pass.subpass + 1,
                pass.subpass_count
            )));
        }
        self.device().cmd_next_subpass(self.handle, contents);
        pass.subpass += 1;
        self.render_pass = Some(pass);
        Ok(())
    }

    /// Only legal in the last subpass
    pub fn end_render_pass(&mut self) -> Result<()> {
        let pass = self.require_render_pass("end a render pass that was not begun")?;
        if pass.subpass + 1 != pass.subpass_count {
            return Err(Error::config(format!(
                "render pass ended in subpass {} of {}",
                pass.subpass + 1,
                pass.subpass_count
            )));
        }
        self.device().cmd_end_render_pass(self.handle);
        self.render_pass = None;
        Ok(())
    }

    // ---- drawing ----

    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[&Buffer]) -> Result<()> {
        self.ensure_recording("bind vertex buffers")?;
        if let Some(buffer) = buffers
            .iter()
            .find(|b| !b.usage().contains(vk::BufferUsageFlags::VERTEX_BUFFER))
        {
            return Err(Error::config(format!("buffer {:?} lacks VERTEX_BUFFER usage", buffer.handle())));
        }
        let handles: Vec<vk::Buffer> = buffers.iter().map(|b| b.handle()).collect();
        let offsets = vec![0; handles.len()];
        self.device()
            .cmd_bind_vertex_buffers(self.handle, first_binding, &handles, &offsets);
        Ok(())
    }

    pub fn bind_index_buffer(&mut self, buffer: &Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) -> Result<()> {
        self.ensure_recording("bind an index buffer")?;
        if !buffer.usage().contains(vk::BufferUsageFlags::INDEX_BUFFER) {
            return Err(Error::config(format!("buffer {:?} lacks INDEX_BUFFER usage", buffer.handle())));
        }
        self.device()
            .cmd_bind_index_buffer(self.handle, buffer.handle(), offset, index_type);
        self.index_bound = true;
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()> {
        self.require_render_pass("draw outside a render pass")?;
        self.require_pipeline("draw", vk::PipelineBindPoint::GRAPHICS)?;
        self.device()
            .cmd_draw(self.handle, vertex_count, instance_count, first_vertex, first_instance);
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        self.require_render_pass("draw outside a render pass")?;
        self.require_pipeline("draw_indexed", vk::PipelineBindPoint::GRAPHICS)?;
        if !self.index_bound {
            return Err(Error::config("draw_indexed requires a bound index buffer"));
        }
        self.device().cmd_draw_indexed(
            self.handle,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
        Ok(())
    }

    // ---- synchronization ----

    /// Insert a dependency of exactly one barrier
    pub fn add_barrier(&mut self, barrier: impl Into<Barrier>) -> Result<()> {
        self.add_barriers(BarrierBatch::from(barrier.into()))
    }

    /// One `vkCmdPipelineBarrier` carrying every barrier of `batch`
    ///
    /// Stage masks are the union of the members' masks. An empty batch
    /// records nothing.
    pub fn add_barriers(&mut self, batch: BarrierBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.ensure_recording("record a pipeline barrier")?;
        let native = batch.native();
        self.device().cmd_pipeline_barrier(
            self.handle,
            BarrierLists {
                src_stage: batch.src_stage(),
                dst_stage: batch.dst_stage(),
                dependency_flags: batch.dependency_flags(),
                memory: &native.memory,
                buffer: &native.buffer,
                image: &native.image,
            },
        );
        log::debug!(
            "Pipeline barrier on {:?}: {} memory, {} buffer, {} image",
            self.handle,
            native.memory.len(),
            native.buffer.len(),
            native.image.len()
        );
        Ok(())
    }

    /// Set `event` once every command before it reaches `stage`
    pub fn set_event(&mut self, event: &Event, stage: vk::PipelineStageFlags) -> Result<()> {
        self.require_outside_render_pass("set_event")?;
        self.ensure_recording("set an event")?;
        self.device().cmd_set_event(self.handle, event.handle(), stage);
        self.recorded_sets.push(event.mark_set_recorded(stage));
        Ok(())
    }

    pub fn reset_event(&mut self, event: &Event, stage: vk::PipelineStageFlags) -> Result<()> {
        self.require_outside_render_pass("reset_event")?;
        self.ensure_recording("reset an event")?;
        self.device().cmd_reset_event(self.handle, event.handle(), stage);
        event.mark_reset_recorded();
        Ok(())
    }

    /// Wait for every event, then apply `batch`
    ///
    /// The source scope is the union of the stages the events were set
    /// from; events never set by a recorder fall back to ALL_COMMANDS.
    pub fn wait_events(&mut self, events: &[&Event], batch: BarrierBatch) -> Result<()> {
        if events.is_empty() {
            return Err(Error::config("wait_events needs at least one event"));
        }
        self.ensure_recording("wait on events")?;

        let set_stages = events
            .iter()
            .fold(vk::PipelineStageFlags::empty(), |acc, e| acc | e.set_stages());
        let src_stage = if set_stages.is_empty() {
            vk::PipelineStageFlags::ALL_COMMANDS
        } else {
            set_stages
        };
        let dst_stage = if batch.is_empty() {
            vk::PipelineStageFlags::ALL_COMMANDS
        } else {
            batch.dst_stage()
        };

        let handles: Vec<vk::Event> = events.iter().map(|e| e.handle()).collect();
        let native = batch.native();
        self.device().cmd_wait_events(
            self.handle,
            &handles,
            BarrierLists {
                src_stage,
                dst_stage,
                dependency_flags: vk::DependencyFlags::empty(),
                memory: &native.memory,
                buffer: &native.buffer,
                image: &native.image,
            },
        );
        Ok(())
    }

    // ---- submission ----

    /// Submit with no semaphores
    pub fn submit(&mut self, fence: Option<&Fence>) -> Result<()> {
        self.submit_with(&SubmitInfo::default(), fence)
    }

    /// End recording if needed and enqueue on the queue matching the
    /// recorder's usage. A provided fence must be unsignaled.
    pub fn submit_with(&mut self, info: &SubmitInfo, fence: Option<&Fence>) -> Result<()> {
        match self.state {
            RecorderState::Recording => self.end()?,
            RecorderState::Executable => {}
            _ => return Err(self.invalid_state("submit")),
        }
        if let Some(fence) = fence {
            if fence.signaled()? {
                return Err(Error::config(format!("fence {:?} is already signaled; reset it before submitting", fence)));
            }
        }

        let submission = Submission {
            command_buffers: vec![self.handle],
            waits: info.waits().to_vec(),
            signals: info.signals().to_vec(),
            fence: fence.map_or(vk::Fence::null(), Fence::handle),
        };
        self.device()
            .queue_submit(self.queue_type, &submission)
            .driver("vkQueueSubmit")?;
        self.state = RecorderState::Pending;
        // Submitted sets are resolved by the device from here on
        self.recorded_sets.clear();
        log::debug!(
            "Submitted {:?} to {:?} queue ({} waits, {} signals)",
            self.handle,
            self.queue_type,
            submission.waits.len(),
            submission.signals.len()
        );
        Ok(())
    }

    /// Bind, push, dispatch over `global` invocations, submit and wait
    ///
    /// On `Ready` the recorder is reset and can be reused. On `TimedOut` it
    /// stays Pending and keeps its fence; a later `reset()` succeeds only
    /// once the work has completed.
    pub fn compute_and_wait(
        &mut self,
        pipeline: &Pipeline,
        sets: &[vk::DescriptorSet],
        push_constants: &[u8],
        global: [u32; 3],
        timeout: Duration,
    ) -> Result<WaitOutcome> {
        if self.state == RecorderState::Pending {
            self.reset()?;
        }
        self.bind_pipeline(pipeline)?;
        if !sets.is_empty() {
            self.bind_descriptor_sets(0, sets)?;
        }
        if !push_constants.is_empty() {
            self.push_constants(0, push_constants)?;
        }
        self.dispatch(global[0], global[1], global[2])?;

        let fence = Fence::new(self.device(), false)?;
        self.submit(Some(&fence))?;
        let outcome = fence.wait(timeout)?;
        self.transient_fence = Some(fence);

        match outcome {
            WaitOutcome::Ready => self.reset()?,
            WaitOutcome::TimedOut => {
                log::warn!("compute_and_wait on {:?} timed out after {:?}", self.handle, timeout)
            }
        }
        Ok(outcome)
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        // The pool must outlive any execution of its buffers
        if self.state != RecorderState::Pending {
            self.discard_recorded_sets();
            return;
        }
        let result = match &self.transient_fence {
            Some(fence) => fence.wait(Duration::MAX).map(|_| ()),
            None => self
                .device()
                .queue_wait_idle(self.queue_type)
                .driver("vkQueueWaitIdle"),
        };
        if let Err(err) = result {
            log::error!("Dropping pending command buffer {:?}: {}", self.handle, err);
        }
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("handle", &self.handle)
            .field("queue_type", &self.queue_type)
            .field("state", &self.state)
            .finish()
    }
}

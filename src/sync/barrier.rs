// Barrier descriptors
//
// Memory, buffer and image barriers are built through validating builders
// and consumed by exactly one `add_barrier` / `add_barriers` call. They keep
// raw handles only and never own the resource they describe.
//
// Stage masks are not part of the sync1 barrier structs, so each descriptor
// carries its own pair next to the native struct.

use ash::vk;

use crate::error::{Error, Result};

const SHADER_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER.as_raw()
        | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER.as_raw()
        | vk::PipelineStageFlags::GEOMETRY_SHADER.as_raw()
        | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw(),
);

const GRAPHICS_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::DRAW_INDIRECT.as_raw()
        | vk::PipelineStageFlags::VERTEX_INPUT.as_raw()
        | vk::PipelineStageFlags::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER.as_raw()
        | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER.as_raw()
        | vk::PipelineStageFlags::GEOMETRY_SHADER.as_raw()
        | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw(),
);

const FRAGMENT_TESTS: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
);

/// Stages able to perform `access`; `None` means any stage
fn supporting_stages(access: vk::AccessFlags) -> Option<vk::PipelineStageFlags> {
    use vk::AccessFlags as A;
    use vk::PipelineStageFlags as S;

    let stages = match access {
        A::INDIRECT_COMMAND_READ => S::DRAW_INDIRECT,
        A::INDEX_READ | A::VERTEX_ATTRIBUTE_READ => S::VERTEX_INPUT,
        A::UNIFORM_READ | A::SHADER_READ | A::SHADER_WRITE => SHADER_STAGES,
        A::INPUT_ATTACHMENT_READ => S::FRAGMENT_SHADER,
        A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE => S::COLOR_ATTACHMENT_OUTPUT,
        A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE => FRAGMENT_TESTS,
        A::TRANSFER_READ | A::TRANSFER_WRITE => S::TRANSFER,
        A::HOST_READ | A::HOST_WRITE => S::HOST,
        // MEMORY_READ / MEMORY_WRITE and extension bits
        _ => return None,
    };
    Some(stages)
}

fn check_stage_access(side: &str, stages: vk::PipelineStageFlags, access: vk::AccessFlags) -> Result<()> {
    if stages.is_empty() {
        return Err(Error::barrier(format!("{} stage mask is empty", side)));
    }
    if stages.contains(vk::PipelineStageFlags::ALL_COMMANDS) {
        return Ok(());
    }

    let mut expanded = stages;
    if stages.contains(vk::PipelineStageFlags::ALL_GRAPHICS) {
        expanded |= GRAPHICS_STAGES;
    }

    let raw = access.as_raw();
    for bit in (0..32).map(|shift| 1u32 << shift).filter(|bit| raw & bit != 0) {
        let flag = vk::AccessFlags::from_raw(bit);
        if let Some(supported) = supporting_stages(flag) {
            if !expanded.intersects(supported) {
                return Err(Error::barrier(format!(
                    "{} access {:?} is not performed by stages {:?}",
                    side, flag, stages
                )));
            }
        }
    }
    Ok(())
}

fn check_queue_families(src: u32, dst: u32) -> Result<()> {
    let src_ignored = src == vk::QUEUE_FAMILY_IGNORED;
    let dst_ignored = dst == vk::QUEUE_FAMILY_IGNORED;
    if src_ignored != dst_ignored {
        return Err(Error::barrier(format!(
            "queue family transfer needs both indices or neither (src {}, dst {})",
            src, dst
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Scope {
    stage: vk::PipelineStageFlags,
    access: vk::AccessFlags,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            stage: vk::PipelineStageFlags::empty(),
            access: vk::AccessFlags::empty(),
        }
    }
}

impl Scope {
    fn validate(&self, side: &str) -> Result<()> {
        check_stage_access(side, self.stage, self.access)
    }
}

// ---------------------------------------------------------------------------
// Global memory barrier
// ---------------------------------------------------------------------------

/// Global memory dependency between two pipeline scopes
#[derive(Debug)]
pub struct MemoryBarrier {
    inner: vk::MemoryBarrier,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
}

impl MemoryBarrier {
    pub fn builder() -> MemoryBarrierBuilder {
        MemoryBarrierBuilder::default()
    }

    pub fn get(&self) -> &vk::MemoryBarrier {
        &self.inner
    }

    pub fn src_stage(&self) -> vk::PipelineStageFlags {
        self.src_stage
    }

    pub fn dst_stage(&self) -> vk::PipelineStageFlags {
        self.dst_stage
    }
}

#[derive(Debug, Default)]
pub struct MemoryBarrierBuilder {
    src: Scope,
    dst: Scope,
}

impl MemoryBarrierBuilder {
    pub fn src(mut self, stage: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        self.src = Scope { stage, access };
        self
    }

    pub fn dst(mut self, stage: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        self.dst = Scope { stage, access };
        self
    }

    pub fn build(self) -> Result<MemoryBarrier> {
        self.src.validate("source")?;
        self.dst.validate("destination")?;

        Ok(MemoryBarrier {
            inner: vk::MemoryBarrier::builder()
                .src_access_mask(self.src.access)
                .dst_access_mask(self.dst.access)
                .build(),
            src_stage: self.src.stage,
            dst_stage: self.dst.stage,
        })
    }
}

// ---------------------------------------------------------------------------
// Buffer barrier
// ---------------------------------------------------------------------------

/// Memory dependency (and optional ownership transfer) on a buffer range
#[derive(Debug)]
pub struct BufferBarrier {
    inner: vk::BufferMemoryBarrier,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
}

impl BufferBarrier {
    pub fn builder(buffer: vk::Buffer) -> BufferBarrierBuilder {
        BufferBarrierBuilder {
            buffer,
            src: Scope::default(),
            dst: Scope::default(),
            queue_families: (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }

    pub fn get(&self) -> &vk::BufferMemoryBarrier {
        &self.inner
    }

    pub fn src_stage(&self) -> vk::PipelineStageFlags {
        self.src_stage
    }

    pub fn dst_stage(&self) -> vk::PipelineStageFlags {
        self.dst_stage
    }
}

#[derive(Debug)]
pub struct BufferBarrierBuilder {
    buffer: vk::Buffer,
    src: Scope,
    dst: Scope,
    queue_families: (u32, u32),
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
}

impl BufferBarrierBuilder {
    pub fn src(mut self, stage: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        self.src = Scope { stage, access };
        self
    }

    pub fn dst(mut self, stage: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        self.dst = Scope { stage, access };
        self
    }

    /// Release/acquire between queue families; defaults to no transfer
    pub fn queue_family_transfer(mut self, src: u32, dst: u32) -> Self {
        self.queue_families = (src, dst);
        self
    }

    /// Byte range; defaults to the whole buffer
    pub fn range(mut self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }

    pub fn build(self) -> Result<BufferBarrier> {
        if self.buffer == vk::Buffer::null() {
            return Err(Error::barrier("buffer barrier on a null buffer"));
        }
        if self.size == 0 {
            return Err(Error::barrier("buffer barrier covers zero bytes"));
        }
        self.src.validate("source")?;
        self.dst.validate("destination")?;
        check_queue_families(self.queue_families.0, self.queue_families.1)?;

        Ok(BufferBarrier {
            inner: vk::BufferMemoryBarrier::builder()
                .src_access_mask(self.src.access)
                .dst_access_mask(self.dst.access)
                .src_queue_family_index(self.queue_families.0)
                .dst_queue_family_index(self.queue_families.1)
                .buffer(self.buffer)
                .offset(self.offset)
                .size(self.size)
                .build(),
            src_stage: self.src.stage,
            dst_stage: self.dst.stage,
        })
    }
}

// ---------------------------------------------------------------------------
// Image barrier
// ---------------------------------------------------------------------------

/// Memory dependency plus layout transition on an image subresource range
#[derive(Debug)]
pub struct ImageBarrier {
    inner: vk::ImageMemoryBarrier,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
}

impl ImageBarrier {
    pub fn builder(image: vk::Image) -> ImageBarrierBuilder {
        ImageBarrierBuilder {
            image,
            src: Scope::default(),
            dst: Scope::default(),
            queue_families: (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
            layouts: None,
            range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            },
        }
    }

    pub fn get(&self) -> &vk::ImageMemoryBarrier {
        &self.inner
    }

    pub fn src_stage(&self) -> vk::PipelineStageFlags {
        self.src_stage
    }

    pub fn dst_stage(&self) -> vk::PipelineStageFlags {
        self.dst_stage
    }
}

#[derive(Debug)]
pub struct ImageBarrierBuilder {
    image: vk::Image,
    src: Scope,
    dst: Scope,
    queue_families: (u32, u32),
    layouts: Option<(vk::ImageLayout, vk::ImageLayout)>,
    range: vk::ImageSubresourceRange,
}

impl ImageBarrierBuilder {
    pub fn src(mut self, stage: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        self.src = Scope { stage, access };
        self
    }

    pub fn dst(mut self, stage: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        self.dst = Scope { stage, access };
        self
    }

    pub fn queue_family_transfer(mut self, src: u32, dst: u32) -> Self {
        self.queue_families = (src, dst);
        self
    }

    pub fn layout_transition(mut self, old: vk::ImageLayout, new: vk::ImageLayout) -> Self {
        self.layouts = Some((old, new));
        self
    }

    /// No transition, the image stays in `layout`
    pub fn layout(self, layout: vk::ImageLayout) -> Self {
        self.layout_transition(layout, layout)
    }

    /// Defaults to COLOR
    pub fn aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.range.aspect_mask = aspect;
        self
    }

    /// Defaults to every mip level and array layer
    pub fn subresource_range(mut self, range: vk::ImageSubresourceRange) -> Self {
        self.range = range;
        self
    }

    pub fn build(self) -> Result<ImageBarrier> {
        if self.image == vk::Image::null() {
            return Err(Error::barrier("image barrier on a null image"));
        }
        let (old_layout, new_layout) = self
            .layouts
            .ok_or_else(|| Error::barrier("image barrier needs a layout or layout transition"))?;
        if matches!(new_layout, vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED) {
            return Err(Error::barrier(format!("cannot transition an image to {:?}", new_layout)));
        }
        if self.range.aspect_mask.is_empty() {
            return Err(Error::barrier("image barrier aspect mask is empty"));
        }
        if self.range.level_count == 0 || self.range.layer_count == 0 {
            return Err(Error::barrier("image barrier covers zero mip levels or array layers"));
        }
        self.src.validate("source")?;
        self.dst.validate("destination")?;
        check_queue_families(self.queue_families.0, self.queue_families.1)?;

        Ok(ImageBarrier {
            inner: vk::ImageMemoryBarrier::builder()
                .src_access_mask(self.src.access)
                .dst_access_mask(self.dst.access)
                .old_layout(old_layout)
                .new_layout(new_layout)
                .src_queue_family_index(self.queue_families.0)
                .dst_queue_family_index(self.queue_families.1)
                .image(self.image)
                .subresource_range(self.range)
                .build(),
            src_stage: self.src.stage,
            dst_stage: self.dst.stage,
        })
    }
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// Any one barrier descriptor
#[derive(Debug)]
pub enum Barrier {
    Memory(MemoryBarrier),
    Buffer(BufferBarrier),
    Image(ImageBarrier),
}

impl From<MemoryBarrier> for Barrier {
    fn from(barrier: MemoryBarrier) -> Self {
        Barrier::Memory(barrier)
    }
}

impl From<BufferBarrier> for Barrier {
    fn from(barrier: BufferBarrier) -> Self {
        Barrier::Buffer(barrier)
    }
}

impl From<ImageBarrier> for Barrier {
    fn from(barrier: ImageBarrier) -> Self {
        Barrier::Image(barrier)
    }
}

/// Barriers recorded together as one pipeline barrier call
#[derive(Debug, Default)]
pub struct BarrierBatch {
    memory: Vec<MemoryBarrier>,
    buffer: Vec<BufferBarrier>,
    image: Vec<ImageBarrier>,
    dependency_flags: vk::DependencyFlags,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, barrier: impl Into<Barrier>) -> &mut Self {
        match barrier.into() {
            Barrier::Memory(b) => self.memory.push(b),
            Barrier::Buffer(b) => self.buffer.push(b),
            Barrier::Image(b) => self.image.push(b),
        }
        self
    }

    pub fn with(mut self, barrier: impl Into<Barrier>) -> Self {
        self.push(barrier);
        self
    }

    /// Framebuffer-local dependency (only meaningful inside a render pass)
    pub fn by_region(mut self) -> Self {
        self.dependency_flags |= vk::DependencyFlags::BY_REGION;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.memory.len() + self.buffer.len() + self.image.len()
    }

    pub fn dependency_flags(&self) -> vk::DependencyFlags {
        self.dependency_flags
    }

    /// Union of every member's source stages
    pub fn src_stage(&self) -> vk::PipelineStageFlags {
        self.memory
            .iter()
            .map(MemoryBarrier::src_stage)
            .chain(self.buffer.iter().map(BufferBarrier::src_stage))
            .chain(self.image.iter().map(ImageBarrier::src_stage))
            .fold(vk::PipelineStageFlags::empty(), |acc, s| acc | s)
    }

    /// Union of every member's destination stages
    pub fn dst_stage(&self) -> vk::PipelineStageFlags {
        self.memory
            .iter()
            .map(MemoryBarrier::dst_stage)
            .chain(self.buffer.iter().map(BufferBarrier::dst_stage))
            .chain(self.image.iter().map(ImageBarrier::dst_stage))
            .fold(vk::PipelineStageFlags::empty(), |acc, s| acc | s)
    }

    pub(crate) fn native(&self) -> NativeBarriers {
        NativeBarriers {
            memory: self.memory.iter().map(|b| *b.get()).collect(),
            buffer: self.buffer.iter().map(|b| *b.get()).collect(),
            image: self.image.iter().map(|b| *b.get()).collect(),
        }
    }
}

impl From<Barrier> for BarrierBatch {
    fn from(barrier: Barrier) -> Self {
        BarrierBatch::new().with(barrier)
    }
}

/// Native arrays handed to the device for one barrier call
pub(crate) struct NativeBarriers {
    pub memory: Vec<vk::MemoryBarrier>,
    pub buffer: Vec<vk::BufferMemoryBarrier>,
    pub image: Vec<vk::ImageMemoryBarrier>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn buffer() -> vk::Buffer {
        vk::Buffer::from_raw(7)
    }

    #[test]
    fn compute_to_transfer_buffer_barrier() {
        let barrier = BufferBarrier::builder(buffer())
            .src(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_WRITE)
            .dst(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ)
            .range(64, 256)
            .build()
            .unwrap();
        let native = barrier.get();
        assert_eq!(native.offset, 64);
        assert_eq!(native.size, 256);
        assert_eq!(native.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.src_stage(), vk::PipelineStageFlags::COMPUTE_SHADER);
    }

    #[test]
    fn access_must_match_stage() {
        let err = MemoryBarrier::builder()
            .src(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::SHADER_WRITE)
            .dst(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBarrier(_)));
    }

    #[test]
    fn all_commands_and_all_graphics_cover_access() {
        assert!(MemoryBarrier::builder()
            .src(vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::TRANSFER_WRITE)
            .dst(vk::PipelineStageFlags::ALL_GRAPHICS, vk::AccessFlags::COLOR_ATTACHMENT_READ)
            .build()
            .is_ok());
        assert!(MemoryBarrier::builder()
            .src(vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::MEMORY_WRITE)
            .dst(vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::empty())
            .build()
            .is_ok());
    }

    #[test]
    fn empty_stage_mask_is_rejected() {
        let err = MemoryBarrier::builder()
            .dst(vk::PipelineStageFlags::HOST, vk::AccessFlags::HOST_READ)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("source stage mask is empty"));
    }

    #[test]
    fn half_specified_queue_transfer_is_rejected() {
        let err = BufferBarrier::builder(buffer())
            .src(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
            .dst(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_READ)
            .queue_family_transfer(2, vk::QUEUE_FAMILY_IGNORED)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBarrier(_)));
    }

    #[test]
    fn image_barrier_validation() {
        let image = vk::Image::from_raw(3);
        let base = || {
            ImageBarrier::builder(image)
                .src(vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
                .dst(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
        };

        assert!(base().build().is_err());
        assert!(base()
            .layout_transition(vk::ImageLayout::GENERAL, vk::ImageLayout::UNDEFINED)
            .build()
            .is_err());
        assert!(ImageBarrier::builder(vk::Image::null())
            .layout(vk::ImageLayout::GENERAL)
            .build()
            .is_err());

        let barrier = base()
            .layout_transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .build()
            .unwrap();
        assert_eq!(barrier.get().new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.get().subresource_range.level_count, vk::REMAINING_MIP_LEVELS);
    }

    #[test]
    fn batch_unions_stage_masks() {
        let batch = BarrierBatch::new()
            .with(
                BufferBarrier::builder(buffer())
                    .src(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_WRITE)
                    .dst(vk::PipelineStageFlags::VERTEX_INPUT, vk::AccessFlags::VERTEX_ATTRIBUTE_READ)
                    .build()
                    .unwrap(),
            )
            .with(
                MemoryBarrier::builder()
                    .src(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
                    .dst(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ)
                    .build()
                    .unwrap(),
            );

        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.src_stage(),
            vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER
        );
        assert_eq!(
            batch.dst_stage(),
            vk::PipelineStageFlags::VERTEX_INPUT | vk::PipelineStageFlags::FRAGMENT_SHADER
        );
        let native = batch.native();
        assert_eq!((native.memory.len(), native.buffer.len(), native.image.len()), (1, 1, 0));
    }
}

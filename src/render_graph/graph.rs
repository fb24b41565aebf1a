// Render graph - attachments, subpasses and dependencies compiled into one
// native render pass
//
// The builder (`RenderGraph`) is append-only. `finalize` consumes it,
// validates the whole description and produces an immutable `RenderPass`.

use ash::vk;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::attachment::{Attachment, AttachmentInfo, ImageViewTemplate};
use super::subpass::{FinalizedSubpass, NativeSubpass, Subpass};
use crate::backend::{SharedDevice, Unique};
use crate::error::{Error, Result, VkResultExt};

/// Endpoint of a subpass dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubpassRef {
    /// Work outside the render pass
    External,
    Subpass(u32),
}

impl SubpassRef {
    fn to_vk(self) -> u32 {
        match self {
            SubpassRef::External => vk::SUBPASS_EXTERNAL,
            SubpassRef::Subpass(index) => index,
        }
    }
}

impl From<u32> for SubpassRef {
    fn from(index: u32) -> Self {
        SubpassRef::Subpass(index)
    }
}

/// Execution and memory dependency between two subpasses
#[derive(Debug, Clone, Copy)]
pub struct SubpassDependency {
    pub src: SubpassRef,
    pub dst: SubpassRef,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub flags: vk::DependencyFlags,
}

impl SubpassDependency {
    pub fn new(src: impl Into<SubpassRef>, dst: impl Into<SubpassRef>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            src_stage: vk::PipelineStageFlags::empty(),
            dst_stage: vk::PipelineStageFlags::empty(),
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::empty(),
            flags: vk::DependencyFlags::empty(),
        }
    }

    pub fn src_scope(mut self, stage: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        self.src_stage = stage;
        self.src_access = access;
        self
    }

    pub fn dst_scope(mut self, stage: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        self.dst_stage = stage;
        self.dst_access = access;
        self
    }

    pub fn flags(mut self, flags: vk::DependencyFlags) -> Self {
        self.flags = flags;
        self
    }

    fn to_vk(self) -> vk::SubpassDependency {
        vk::SubpassDependency::builder()
            .src_subpass(self.src.to_vk())
            .dst_subpass(self.dst.to_vk())
            .src_stage_mask(self.src_stage)
            .dst_stage_mask(self.dst_stage)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .dependency_flags(self.flags)
            .build()
    }
}

/// Render graph under construction
pub struct RenderGraph {
    device: SharedDevice,
    attachments: Vec<AttachmentInfo>,
    subpasses: Vec<FinalizedSubpass>,
    dependencies: Vec<SubpassDependency>,
    has_depth_stencil: bool,
}

impl RenderGraph {
    pub fn new(device: &SharedDevice) -> Self {
        Self {
            device: device.clone(),
            attachments: Vec::new(),
            subpasses: Vec::new(),
            dependencies: Vec::new(),
            has_depth_stencil: false,
        }
    }

    /// Registers an attachment; indices count up from 0 across every role
    pub fn add_attachment(&mut self, info: AttachmentInfo) -> Result<Attachment> {
        let index = u32::try_from(self.attachments.len())
            .map_err(|_| Error::config("too many attachments"))?;
        log::debug!(
            "Attachment {}: {} {:?} x{:?}",
            index,
            info.role(),
            info.format(),
            info.samples()
        );
        self.attachments.push(info);
        Ok(Attachment::new(info.role(), index))
    }

    /// Moves `subpass` into the graph and returns its index
    pub fn add_subpass(
        &mut self,
        subpass: Subpass,
        flags: vk::SubpassDescriptionFlags,
        bind_point: vk::PipelineBindPoint,
    ) -> Result<u32> {
        if bind_point != vk::PipelineBindPoint::GRAPHICS {
            return Err(Error::config(format!(
                "subpass bind point must be GRAPHICS, got {:?}",
                bind_point
            )));
        }

        let finalized = subpass.finalize(flags, bind_point);

        for (index, role) in finalized.references() {
            match self.attachments.get(index as usize) {
                Some(info) if info.role() == role => {}
                Some(info) => {
                    return Err(Error::config(format!(
                        "attachment {} is a {} attachment, referenced as {}",
                        index,
                        info.role(),
                        role
                    )));
                }
                None => {
                    return Err(Error::config(format!(
                        "subpass references attachment {} but only {} are registered",
                        index,
                        self.attachments.len()
                    )));
                }
            }
        }

        if finalized.resolve_ref().is_some() && finalized.color_refs().is_empty() {
            return Err(Error::config("resolve attachment without a color attachment to resolve"));
        }
        if let Some(index) = finalized.preserves_referenced() {
            return Err(Error::config(format!(
                "attachment {} is both preserved and used by the same subpass",
                index
            )));
        }

        let index = self.subpasses.len() as u32;
        if finalized.has_depth_stencil() {
            self.has_depth_stencil = true;
        }
        log::debug!(
            "Subpass {}: {} color, {} input, depth: {}",
            index,
            finalized.color_refs().len(),
            finalized.input_refs().len(),
            finalized.has_depth_stencil()
        );
        self.subpasses.push(finalized);
        Ok(index)
    }

    /// Appends a dependency; checked when the graph is finalized
    pub fn add_subpass_dependency(&mut self, dependency: SubpassDependency) -> usize {
        self.dependencies.push(dependency);
        self.dependencies.len() - 1
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn subpass_count(&self) -> usize {
        self.subpasses.len()
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }

    pub fn has_depth_stencil(&self) -> bool {
        self.has_depth_stencil
    }

    pub fn attachment(&self, index: u32) -> Option<&AttachmentInfo> {
        self.attachments.get(index as usize)
    }

    pub fn subpass(&self, index: u32) -> Option<&FinalizedSubpass> {
        self.subpasses.get(index as usize)
    }

    fn validate_dependencies(&self) -> Result<()> {
        let count = self.subpasses.len() as u32;
        let mut graph = DiGraph::<u32, ()>::new();
        let nodes: Vec<NodeIndex> = (0..count).map(|i| graph.add_node(i)).collect();

        for (i, dep) in self.dependencies.iter().enumerate() {
            if dep.src == SubpassRef::External && dep.dst == SubpassRef::External {
                return Err(Error::config(format!("dependency {} connects EXTERNAL to EXTERNAL", i)));
            }
            for endpoint in [dep.src, dep.dst] {
                if let SubpassRef::Subpass(s) = endpoint {
                    if s >= count {
                        return Err(Error::config(format!(
                            "dependency {} references subpass {} of {}",
                            i, s, count
                        )));
                    }
                }
            }
            if dep.src_stage.is_empty() || dep.dst_stage.is_empty() {
                return Err(Error::config(format!("dependency {} has an empty stage mask", i)));
            }
            if let (SubpassRef::Subpass(src), SubpassRef::Subpass(dst)) = (dep.src, dep.dst) {
                // Self-loops order work within one subpass and never form a cycle
                if src != dst {
                    graph.add_edge(nodes[src as usize], nodes[dst as usize], ());
                }
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let subpass = graph[cycle.node_id()];
            log::error!("subpass dependency cycle through subpass {}", subpass);
            return Err(Error::DependencyCycle(subpass));
        }

        if let Some(dep) = self.dependencies.iter().find(|d| match (d.src, d.dst) {
            (SubpassRef::Subpass(src), SubpassRef::Subpass(dst)) => src > dst,
            _ => false,
        }) {
            return Err(Error::config(format!(
                "dependency {:?} -> {:?} points backwards in subpass order",
                dep.src, dep.dst
            )));
        }
        Ok(())
    }

    /// Validates and compiles the graph into a native render pass
    pub fn finalize(self) -> Result<RenderPass> {
        if self.subpasses.is_empty() {
            return Err(Error::config("render graph has no subpasses"));
        }
        self.validate_dependencies()?;

        let attachments: Vec<_> = self.attachments.iter().map(AttachmentInfo::to_vk).collect();
        let native: Vec<NativeSubpass> = self.subpasses.iter().map(NativeSubpass::new).collect();
        let subpasses: Vec<_> = native
            .iter()
            .zip(&self.subpasses)
            .map(|(n, s)| n.description(s))
            .collect();
        let dependencies: Vec<_> = self.dependencies.iter().map(|d| d.to_vk()).collect();

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = self
            .device
            .create_render_pass(&create_info)
            .driver("vkCreateRenderPass")?;

        log::info!(
            "Created render pass {:?}: {} attachments, {} subpasses, {} dependencies",
            handle,
            attachments.len(),
            subpasses.len(),
            dependencies.len()
        );

        Ok(RenderPass {
            handle: Unique::new(&self.device, handle),
            attachments: self.attachments,
            subpasses: self.subpasses,
            dependencies: self.dependencies,
            has_depth_stencil: self.has_depth_stencil,
        })
    }
}

/// Immutable native render pass plus the description it was built from
pub struct RenderPass {
    handle: Unique<vk::RenderPass>,
    attachments: Vec<AttachmentInfo>,
    subpasses: Vec<FinalizedSubpass>,
    dependencies: Vec<SubpassDependency>,
    has_depth_stencil: bool,
}

impl RenderPass {
    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.handle.get()
    }

    pub fn device(&self) -> &SharedDevice {
        self.handle.device()
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn subpass_count(&self) -> usize {
        self.subpasses.len()
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }

    pub fn has_depth_stencil(&self) -> bool {
        self.has_depth_stencil
    }

    pub fn attachment(&self, index: u32) -> Option<&AttachmentInfo> {
        self.attachments.get(index as usize)
    }

    pub fn subpass(&self, index: u32) -> Option<&FinalizedSubpass> {
        self.subpasses.get(index as usize)
    }

    pub fn dependency(&self, index: usize) -> Option<&SubpassDependency> {
        self.dependencies.get(index)
    }

    /// One template per attachment, in attachment index order
    pub fn image_view_templates(&self) -> Vec<ImageViewTemplate> {
        self.attachments
            .iter()
            .map(AttachmentInfo::image_view_template)
            .collect()
    }

    /// Minimum clear value count for `vkCmdBeginRenderPass`
    pub fn clear_value_count(&self) -> usize {
        self.attachments
            .iter()
            .rposition(AttachmentInfo::needs_clear_value)
            .map_or(0, |i| i + 1)
    }
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("handle", &self.handle())
            .field("attachments", &self.attachments.len())
            .field("subpasses", &self.subpasses.len())
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullDevice;
    use crate::render_graph::AttachmentRole;

    fn color_info() -> AttachmentInfo {
        AttachmentInfo::builder(AttachmentRole::Color, vk::Format::B8G8R8A8_SRGB)
            .build()
            .unwrap()
    }

    fn graph_with_subpasses(device: &SharedDevice, count: usize) -> RenderGraph {
        let mut graph = RenderGraph::new(device);
        let color = graph.add_attachment(color_info()).unwrap();
        for _ in 0..count {
            let mut subpass = Subpass::new();
            subpass.add_attachment(color).unwrap();
            graph
                .add_subpass(subpass, vk::SubpassDescriptionFlags::empty(), vk::PipelineBindPoint::GRAPHICS)
                .unwrap();
        }
        graph
    }

    fn dependency(src: u32, dst: u32) -> SubpassDependency {
        SubpassDependency::new(src, dst)
            .src_scope(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
            .dst_scope(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ)
    }

    #[test]
    fn render_pass_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RenderPass>();
    }

    #[test]
    fn cycle_is_rejected() {
        let device: SharedDevice = NullDevice::new();
        let mut graph = graph_with_subpasses(&device, 3);
        graph.add_subpass_dependency(dependency(0, 1));
        graph.add_subpass_dependency(dependency(1, 2));
        graph.add_subpass_dependency(dependency(2, 0));
        assert!(matches!(graph.finalize(), Err(Error::DependencyCycle(_))));
    }

    #[test]
    fn self_loop_and_external_edges_are_fine() {
        let device: SharedDevice = NullDevice::new();
        let mut graph = graph_with_subpasses(&device, 2);
        graph.add_subpass_dependency(dependency(0, 0).flags(vk::DependencyFlags::BY_REGION));
        graph.add_subpass_dependency(dependency(0, 1));
        graph.add_subpass_dependency(
            SubpassDependency::new(SubpassRef::Subpass(1), SubpassRef::External)
                .src_scope(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .dst_scope(vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::empty()),
        );
        let pass = graph.finalize().unwrap();
        assert_eq!(pass.dependency_count(), 3);
    }

    #[test]
    fn backward_edge_without_cycle_is_rejected() {
        let device: SharedDevice = NullDevice::new();
        let mut graph = graph_with_subpasses(&device, 2);
        graph.add_subpass_dependency(dependency(1, 0));
        assert!(matches!(graph.finalize(), Err(Error::Configuration(_))));
    }

    #[test]
    fn out_of_range_and_external_to_external() {
        let device: SharedDevice = NullDevice::new();
        let mut graph = graph_with_subpasses(&device, 1);
        graph.add_subpass_dependency(dependency(0, 4));
        assert!(graph.finalize().is_err());

        let mut graph = graph_with_subpasses(&device, 1);
        graph.add_subpass_dependency(
            SubpassDependency::new(SubpassRef::External, SubpassRef::External)
                .src_scope(vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
                .dst_scope(vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::empty()),
        );
        assert!(graph.finalize().is_err());
    }

    #[test]
    fn empty_graph_cannot_finalize() {
        let device: SharedDevice = NullDevice::new();
        let graph = RenderGraph::new(&device);
        assert!(matches!(graph.finalize(), Err(Error::Configuration(_))));
    }

    #[test]
    fn driver_failure_constructs_nothing() {
        let null = NullDevice::new();
        let device: SharedDevice = null.clone();
        null.fail_next("vkCreateRenderPass", vk::Result::ERROR_INITIALIZATION_FAILED);
        let graph = graph_with_subpasses(&device, 1);
        let err = graph.finalize().unwrap_err();
        assert!(matches!(
            err,
            Error::Driver {
                call: "vkCreateRenderPass",
                result: vk::Result::ERROR_INITIALIZATION_FAILED
            }
        ));
        assert_eq!(null.live_objects(), 0);
    }

    #[test]
    fn clear_value_count_tracks_last_cleared_attachment() {
        let device: SharedDevice = NullDevice::new();
        let mut graph = RenderGraph::new(&device);
        let color = graph.add_attachment(color_info()).unwrap();
        graph
            .add_attachment(
                AttachmentInfo::builder(AttachmentRole::Input, vk::Format::R8G8B8A8_UNORM)
                    .ops(vk::AttachmentLoadOp::LOAD, vk::AttachmentStoreOp::DONT_CARE)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let mut subpass = Subpass::new();
        subpass.add_attachment(color).unwrap();
        graph
            .add_subpass(subpass, vk::SubpassDescriptionFlags::empty(), vk::PipelineBindPoint::GRAPHICS)
            .unwrap();
        let pass = graph.finalize().unwrap();
        assert_eq!(pass.clear_value_count(), 1);
        assert_eq!(pass.image_view_templates().len(), 2);
    }
}

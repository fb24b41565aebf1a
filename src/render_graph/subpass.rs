// Subpass descriptors
//
// A `Subpass` is an open, mutable list of attachment references. Handing it
// to `RenderGraph::add_subpass` moves it into the graph, where it is frozen
// as a `FinalizedSubpass`.

use ash::vk;

use super::attachment::{Attachment, AttachmentRole};
use crate::error::{Error, Result};

/// Attachment index plus the layout it is used in during the subpass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentRef {
    pub index: u32,
    pub layout: vk::ImageLayout,
}

impl AttachmentRef {
    pub(crate) fn to_vk(self) -> vk::AttachmentReference {
        vk::AttachmentReference {
            attachment: self.index,
            layout: self.layout,
        }
    }
}

#[derive(Debug, Default)]
struct References {
    input: Vec<AttachmentRef>,
    color: Vec<AttachmentRef>,
    resolve: Option<AttachmentRef>,
    depth: Option<AttachmentRef>,
    preserve: Vec<u32>,
}

impl References {
    fn referenced(&self) -> impl Iterator<Item = u32> + '_ {
        self.input
            .iter()
            .chain(self.color.iter())
            .chain(self.resolve.iter())
            .chain(self.depth.iter())
            .map(|r| r.index)
    }
}

/// Open subpass description
///
/// ```
/// # use vkgraph::render_graph::{AttachmentInfo, AttachmentRole, RenderGraph, Subpass};
/// # use vkgraph::backend::{NullDevice, SharedDevice};
/// # use vkgraph::vk;
/// let device: SharedDevice = NullDevice::new();
/// let mut graph = RenderGraph::new(&device);
/// let color = graph
///     .add_attachment(AttachmentInfo::builder(AttachmentRole::Color, vk::Format::R8G8B8A8_UNORM).build()?)?;
///
/// let mut subpass = Subpass::new();
/// subpass.add_attachment(color)?;
/// let index = graph.add_subpass(subpass, vk::SubpassDescriptionFlags::empty(), vk::PipelineBindPoint::GRAPHICS)?;
/// assert_eq!(index, 0);
/// # Ok::<(), vkgraph::Error>(())
/// ```
///
/// Once added, the descriptor is gone:
///
/// ```compile_fail
/// # use vkgraph::render_graph::{RenderGraph, Subpass};
/// # use vkgraph::backend::{NullDevice, SharedDevice};
/// # use vkgraph::vk;
/// let device: SharedDevice = NullDevice::new();
/// let mut graph = RenderGraph::new(&device);
/// let subpass = Subpass::new();
/// graph.add_subpass(subpass, vk::SubpassDescriptionFlags::empty(), vk::PipelineBindPoint::GRAPHICS).unwrap();
/// graph.add_subpass(subpass, vk::SubpassDescriptionFlags::empty(), vk::PipelineBindPoint::GRAPHICS).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct Subpass {
    refs: References,
}

impl Subpass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference `attachment` in its role's default layout
    pub fn add_attachment(&mut self, attachment: Attachment) -> Result<&mut Self> {
        match attachment.role().default_reference_layout() {
            Some(layout) => self.add_attachment_with_layout(attachment, layout),
            None => {
                self.push_preserve(attachment.index())?;
                Ok(self)
            }
        }
    }

    /// Reference `attachment` in an explicit layout
    pub fn add_attachment_with_layout(&mut self, attachment: Attachment, layout: vk::ImageLayout) -> Result<&mut Self> {
        let reference = AttachmentRef {
            index: attachment.index(),
            layout,
        };

        match attachment.role() {
            AttachmentRole::Input => self.refs.input.push(reference),
            AttachmentRole::Color => self.refs.color.push(reference),
            AttachmentRole::Depth => {
                if self.refs.depth.is_some() {
                    return Err(Error::config("subpass already has a depth attachment"));
                }
                self.refs.depth = Some(reference);
            }
            AttachmentRole::Resolve => {
                if self.refs.resolve.is_some() {
                    return Err(Error::config("subpass already has a resolve attachment"));
                }
                self.refs.resolve = Some(reference);
            }
            AttachmentRole::Preserve => {
                return Err(Error::config("preserve references carry no layout"));
            }
        }
        Ok(self)
    }

    fn push_preserve(&mut self, index: u32) -> Result<()> {
        if self.refs.preserve.contains(&index) {
            log::warn!("attachment {} preserved twice in one subpass", index);
            return Ok(());
        }
        self.refs.preserve.push(index);
        Ok(())
    }

    pub fn input_refs(&self) -> &[AttachmentRef] {
        &self.refs.input
    }

    pub fn color_refs(&self) -> &[AttachmentRef] {
        &self.refs.color
    }

    pub fn depth_ref(&self) -> Option<AttachmentRef> {
        self.refs.depth
    }

    pub fn resolve_ref(&self) -> Option<AttachmentRef> {
        self.refs.resolve
    }

    pub fn preserve_indices(&self) -> &[u32] {
        &self.refs.preserve
    }

    pub(crate) fn finalize(self, flags: vk::SubpassDescriptionFlags, bind_point: vk::PipelineBindPoint) -> FinalizedSubpass {
        FinalizedSubpass {
            refs: self.refs,
            flags,
            bind_point,
        }
    }
}

/// Frozen subpass owned by a render graph
#[derive(Debug)]
pub struct FinalizedSubpass {
    refs: References,
    flags: vk::SubpassDescriptionFlags,
    bind_point: vk::PipelineBindPoint,
}

impl FinalizedSubpass {
    pub fn input_refs(&self) -> &[AttachmentRef] {
        &self.refs.input
    }

    pub fn color_refs(&self) -> &[AttachmentRef] {
        &self.refs.color
    }

    pub fn depth_ref(&self) -> Option<AttachmentRef> {
        self.refs.depth
    }

    pub fn resolve_ref(&self) -> Option<AttachmentRef> {
        self.refs.resolve
    }

    pub fn preserve_indices(&self) -> &[u32] {
        &self.refs.preserve
    }

    pub fn flags(&self) -> vk::SubpassDescriptionFlags {
        self.flags
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn has_depth_stencil(&self) -> bool {
        self.refs.depth.is_some()
    }

    /// Every (index, role) pair the subpass references, preserve included
    pub(crate) fn references(&self) -> Vec<(u32, AttachmentRole)> {
        let refs = &self.refs;
        refs.input
            .iter()
            .map(|r| (r.index, AttachmentRole::Input))
            .chain(refs.color.iter().map(|r| (r.index, AttachmentRole::Color)))
            .chain(refs.resolve.iter().map(|r| (r.index, AttachmentRole::Resolve)))
            .chain(refs.depth.iter().map(|r| (r.index, AttachmentRole::Depth)))
            .chain(refs.preserve.iter().map(|&i| (i, AttachmentRole::Preserve)))
            .collect()
    }

    pub(crate) fn preserves_referenced(&self) -> Option<u32> {
        self.refs
            .preserve
            .iter()
            .copied()
            .find(|p| self.refs.referenced().any(|i| i == *p))
    }
}

/// Native arrays for one `vk::SubpassDescription`; must outlive it
pub(crate) struct NativeSubpass {
    pub input: Vec<vk::AttachmentReference>,
    pub color: Vec<vk::AttachmentReference>,
    pub resolve: Vec<vk::AttachmentReference>,
    pub depth: Option<vk::AttachmentReference>,
    pub preserve: Vec<u32>,
}

impl NativeSubpass {
    pub fn new(subpass: &FinalizedSubpass) -> Self {
        let color: Vec<_> = subpass.color_refs().iter().map(|r| r.to_vk()).collect();

        // A single resolve target resolves the first color attachment
        let resolve = match subpass.resolve_ref() {
            Some(target) => std::iter::once(target.to_vk())
                .chain(std::iter::repeat(vk::AttachmentReference {
                    attachment: vk::ATTACHMENT_UNUSED,
                    layout: vk::ImageLayout::UNDEFINED,
                }))
                .take(color.len())
                .collect(),
            None => Vec::new(),
        };

        Self {
            input: subpass.input_refs().iter().map(|r| r.to_vk()).collect(),
            color,
            resolve,
            depth: subpass.depth_ref().map(AttachmentRef::to_vk),
            preserve: subpass.preserve_indices().to_vec(),
        }
    }

    pub fn description(&self, subpass: &FinalizedSubpass) -> vk::SubpassDescription {
        let mut builder = vk::SubpassDescription::builder()
            .flags(subpass.flags())
            .pipeline_bind_point(subpass.bind_point())
            .input_attachments(&self.input)
            .color_attachments(&self.color)
            .preserve_attachments(&self.preserve);
        if !self.resolve.is_empty() {
            builder = builder.resolve_attachments(&self.resolve);
        }
        if let Some(depth) = self.depth.as_ref() {
            builder = builder.depth_stencil_attachment(depth);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(role: AttachmentRole, index: u32) -> Attachment {
        Attachment::new(role, index)
    }

    #[test]
    fn default_layouts_per_role() {
        let mut subpass = Subpass::new();
        subpass
            .add_attachment(attachment(AttachmentRole::Color, 0))
            .unwrap()
            .add_attachment(attachment(AttachmentRole::Depth, 1))
            .unwrap()
            .add_attachment(attachment(AttachmentRole::Input, 2))
            .unwrap()
            .add_attachment(attachment(AttachmentRole::Preserve, 3))
            .unwrap();

        assert_eq!(subpass.color_refs()[0].layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(
            subpass.depth_ref().map(|r| r.layout),
            Some(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        );
        assert_eq!(subpass.input_refs()[0].layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(subpass.preserve_indices(), &[3]);
    }

    #[test]
    fn second_depth_leaves_subpass_unchanged() {
        let mut subpass = Subpass::new();
        subpass.add_attachment(attachment(AttachmentRole::Depth, 0)).unwrap();
        assert!(subpass.add_attachment(attachment(AttachmentRole::Depth, 1)).is_err());
        assert_eq!(subpass.depth_ref().map(|r| r.index), Some(0));

        subpass.add_attachment(attachment(AttachmentRole::Resolve, 2)).unwrap();
        assert!(subpass
            .add_attachment_with_layout(attachment(AttachmentRole::Resolve, 3), vk::ImageLayout::GENERAL)
            .is_err());
        assert_eq!(subpass.resolve_ref().map(|r| r.index), Some(2));
    }

    #[test]
    fn resolve_pads_to_color_count() {
        let mut subpass = Subpass::new();
        subpass
            .add_attachment(attachment(AttachmentRole::Color, 0))
            .unwrap()
            .add_attachment(attachment(AttachmentRole::Color, 1))
            .unwrap()
            .add_attachment(attachment(AttachmentRole::Resolve, 2))
            .unwrap();
        let finalized = subpass.finalize(vk::SubpassDescriptionFlags::empty(), vk::PipelineBindPoint::GRAPHICS);
        let native = NativeSubpass::new(&finalized);
        assert_eq!(native.resolve.len(), 2);
        assert_eq!(native.resolve[0].attachment, 2);
        assert_eq!(native.resolve[1].attachment, vk::ATTACHMENT_UNUSED);

        let description = native.description(&finalized);
        assert_eq!(description.color_attachment_count, 2);
        assert!(!description.p_resolve_attachments.is_null());
        assert!(description.p_depth_stencil_attachment.is_null());
    }
}

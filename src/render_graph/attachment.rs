// Attachment descriptions
//
// An attachment is described once, registered once, and referenced by index
// from any number of subpasses. Descriptions are immutable values produced by
// `AttachmentInfoBuilder::build`.

use ash::vk;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// How a subpass uses an attachment; fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentRole {
    Input,
    Color,
    Depth,
    Resolve,
    Preserve,
}

impl AttachmentRole {
    /// Layout the attachment ends the render pass in unless overridden
    pub fn default_final_layout(self) -> vk::ImageLayout {
        match self {
            AttachmentRole::Color | AttachmentRole::Resolve => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            AttachmentRole::Depth => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            AttachmentRole::Input | AttachmentRole::Preserve => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Layout used while a subpass references the attachment; preserve has none
    pub fn default_reference_layout(self) -> Option<vk::ImageLayout> {
        match self {
            AttachmentRole::Color | AttachmentRole::Resolve => Some(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            AttachmentRole::Depth => Some(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            AttachmentRole::Input => Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            AttachmentRole::Preserve => None,
        }
    }
}

impl fmt::Display for AttachmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttachmentRole::Input => "input",
            AttachmentRole::Color => "color",
            AttachmentRole::Depth => "depth",
            AttachmentRole::Resolve => "resolve",
            AttachmentRole::Preserve => "preserve",
        };
        f.write_str(name)
    }
}

impl FromStr for AttachmentRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "input" => Ok(AttachmentRole::Input),
            "color" => Ok(AttachmentRole::Color),
            "depth" => Ok(AttachmentRole::Depth),
            "resolve" => Ok(AttachmentRole::Resolve),
            "preserve" => Ok(AttachmentRole::Preserve),
            _ => Err(Error::config(format!("unknown attachment role '{}'", s))),
        }
    }
}

/// Aspects a format carries
pub fn format_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::UNDEFINED => vk::ImageAspectFlags::empty(),
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Reference to a registered attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attachment {
    role: AttachmentRole,
    index: u32,
}

impl Attachment {
    pub(crate) fn new(role: AttachmentRole, index: u32) -> Self {
        Self { role, index }
    }

    #[inline]
    pub fn role(&self) -> AttachmentRole {
        self.role
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Image view parameters matching an attachment
#[derive(Debug, Clone, Copy)]
pub struct ImageViewTemplate {
    pub format: vk::Format,
    pub view_type: vk::ImageViewType,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl ImageViewTemplate {
    /// Create info for a view of `image`, ready for `vkCreateImageView`
    pub fn create_info(&self, image: vk::Image) -> vk::ImageViewCreateInfo {
        vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(self.view_type)
            .format(self.format)
            .subresource_range(self.subresource_range)
            .build()
    }
}

/// Validated, immutable description of one attachment
#[derive(Debug, Clone, Copy)]
pub struct AttachmentInfo {
    role: AttachmentRole,
    format: vk::Format,
    samples: vk::SampleCountFlags,
    aspect: vk::ImageAspectFlags,
    load_op: vk::AttachmentLoadOp,
    store_op: vk::AttachmentStoreOp,
    initial_layout: vk::ImageLayout,
    final_layout: vk::ImageLayout,
}

impl AttachmentInfo {
    pub fn builder(role: AttachmentRole, format: vk::Format) -> AttachmentInfoBuilder {
        AttachmentInfoBuilder {
            role,
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            aspect: None,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: None,
        }
    }

    pub fn role(&self) -> AttachmentRole {
        self.role
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub fn load_op(&self) -> vk::AttachmentLoadOp {
        self.load_op
    }

    pub fn store_op(&self) -> vk::AttachmentStoreOp {
        self.store_op
    }

    pub fn initial_layout(&self) -> vk::ImageLayout {
        self.initial_layout
    }

    pub fn final_layout(&self) -> vk::ImageLayout {
        self.final_layout
    }

    /// Whether beginning the render pass consumes a clear value for this attachment
    pub fn needs_clear_value(&self) -> bool {
        self.load_op == vk::AttachmentLoadOp::CLEAR
    }

    pub fn image_view_template(&self) -> ImageViewTemplate {
        ImageViewTemplate {
            format: self.format,
            view_type: vk::ImageViewType::TYPE_2D,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
        }
    }

    // Ops land on the color/depth component and the stencil component
    // according to the aspect; uncovered components are DONT_CARE.
    pub(crate) fn to_vk(&self) -> vk::AttachmentDescription {
        let main = self
            .aspect
            .intersects(vk::ImageAspectFlags::COLOR | vk::ImageAspectFlags::DEPTH);
        let stencil = self.aspect.contains(vk::ImageAspectFlags::STENCIL);

        vk::AttachmentDescription::builder()
            .format(self.format)
            .samples(self.samples)
            .load_op(if main { self.load_op } else { vk::AttachmentLoadOp::DONT_CARE })
            .store_op(if main { self.store_op } else { vk::AttachmentStoreOp::DONT_CARE })
            .stencil_load_op(if stencil { self.load_op } else { vk::AttachmentLoadOp::DONT_CARE })
            .stencil_store_op(if stencil { self.store_op } else { vk::AttachmentStoreOp::DONT_CARE })
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
            .build()
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentInfoBuilder {
    role: AttachmentRole,
    format: vk::Format,
    samples: vk::SampleCountFlags,
    aspect: Option<vk::ImageAspectFlags>,
    load_op: vk::AttachmentLoadOp,
    store_op: vk::AttachmentStoreOp,
    initial_layout: vk::ImageLayout,
    final_layout: Option<vk::ImageLayout>,
}

impl AttachmentInfoBuilder {
    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Defaults to every aspect of the format
    pub fn aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = Some(aspect);
        self
    }

    pub fn load_op(mut self, load_op: vk::AttachmentLoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    pub fn store_op(mut self, store_op: vk::AttachmentStoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    pub fn ops(self, load_op: vk::AttachmentLoadOp, store_op: vk::AttachmentStoreOp) -> Self {
        self.load_op(load_op).store_op(store_op)
    }

    pub fn initial_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.initial_layout = layout;
        self
    }

    pub fn final_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.final_layout = Some(layout);
        self
    }

    pub fn build(self) -> Result<AttachmentInfo> {
        if self.format == vk::Format::UNDEFINED {
            return Err(Error::config(format!("{} attachment needs a format", self.role)));
        }
        if self.samples.as_raw().count_ones() != 1 {
            return Err(Error::config(format!(
                "attachment sample count must be a single value, got {:?}",
                self.samples
            )));
        }

        let format_aspect = format_aspect(self.format);
        let depth_stencil = vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL;
        match self.role {
            AttachmentRole::Depth if !format_aspect.intersects(depth_stencil) => {
                return Err(Error::config(format!("depth attachment with color format {:?}", self.format)));
            }
            AttachmentRole::Color | AttachmentRole::Resolve if !format_aspect.contains(vk::ImageAspectFlags::COLOR) => {
                return Err(Error::config(format!("{} attachment with non-color format {:?}", self.role, self.format)));
            }
            AttachmentRole::Resolve if self.samples != vk::SampleCountFlags::TYPE_1 => {
                return Err(Error::config("resolve attachment must be single-sampled"));
            }
            _ => {}
        }

        let aspect = self.aspect.unwrap_or(format_aspect);
        if aspect.is_empty() {
            return Err(Error::config("attachment aspect mask is empty"));
        }

        let final_layout = self.final_layout.unwrap_or_else(|| self.role.default_final_layout());
        if matches!(final_layout, vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED) {
            return Err(Error::config(format!("attachment final layout cannot be {:?}", final_layout)));
        }

        Ok(AttachmentInfo {
            role: self.role,
            format: self.format,
            samples: self.samples,
            aspect,
            load_op: self.load_op,
            store_op: self.store_op,
            initial_layout: self.initial_layout,
            final_layout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_defaults() {
        let color = AttachmentInfo::builder(AttachmentRole::Color, vk::Format::B8G8R8A8_SRGB)
            .build()
            .unwrap();
        assert_eq!(color.samples(), vk::SampleCountFlags::TYPE_1);
        assert_eq!(color.aspect(), vk::ImageAspectFlags::COLOR);
        assert_eq!(color.load_op(), vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.initial_layout(), vk::ImageLayout::UNDEFINED);
        assert_eq!(color.final_layout(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let depth = AttachmentInfo::builder(AttachmentRole::Depth, vk::Format::D24_UNORM_S8_UINT)
            .build()
            .unwrap();
        assert_eq!(depth.aspect(), vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
        assert_eq!(depth.final_layout(), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn ops_follow_aspect() {
        let depth_only = AttachmentInfo::builder(AttachmentRole::Depth, vk::Format::D32_SFLOAT)
            .ops(vk::AttachmentLoadOp::CLEAR, vk::AttachmentStoreOp::STORE)
            .build()
            .unwrap()
            .to_vk();
        assert_eq!(depth_only.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth_only.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);

        let stencil_only = AttachmentInfo::builder(AttachmentRole::Depth, vk::Format::D24_UNORM_S8_UINT)
            .aspect(vk::ImageAspectFlags::STENCIL)
            .ops(vk::AttachmentLoadOp::LOAD, vk::AttachmentStoreOp::STORE)
            .build()
            .unwrap()
            .to_vk();
        assert_eq!(stencil_only.load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(stencil_only.stencil_load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(stencil_only.stencil_store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn invalid_descriptions_are_rejected() {
        assert!(AttachmentInfo::builder(AttachmentRole::Color, vk::Format::UNDEFINED)
            .build()
            .is_err());
        assert!(AttachmentInfo::builder(AttachmentRole::Depth, vk::Format::R8G8B8A8_UNORM)
            .build()
            .is_err());
        assert!(AttachmentInfo::builder(AttachmentRole::Resolve, vk::Format::R8G8B8A8_UNORM)
            .samples(vk::SampleCountFlags::TYPE_4)
            .build()
            .is_err());
        assert!(AttachmentInfo::builder(AttachmentRole::Color, vk::Format::R8G8B8A8_UNORM)
            .samples(vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4)
            .build()
            .is_err());
        assert!(AttachmentInfo::builder(AttachmentRole::Color, vk::Format::R8G8B8A8_UNORM)
            .final_layout(vk::ImageLayout::UNDEFINED)
            .build()
            .is_err());
    }

    #[test]
    fn role_names_parse() {
        assert_eq!("Color".parse::<AttachmentRole>().unwrap(), AttachmentRole::Color);
        assert_eq!("preserve".parse::<AttachmentRole>().unwrap(), AttachmentRole::Preserve);
        assert!(matches!("stencil".parse::<AttachmentRole>(), Err(Error::Configuration(_))));
    }

    #[test]
    fn view_template_matches_attachment() {
        let info = AttachmentInfo::builder(AttachmentRole::Depth, vk::Format::D32_SFLOAT)
            .build()
            .unwrap();
        let template = info.image_view_template();
        assert_eq!(template.format, vk::Format::D32_SFLOAT);
        assert_eq!(template.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
    }
}

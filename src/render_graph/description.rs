// =============================================================================
// RENDER GRAPH DESCRIPTION - Render graphs from TOML
// =============================================================================
//
// Attachments, subpasses and dependencies written as data. Names for
// formats, layouts, ops, stages and access flags follow the Vulkan enum
// names, case-insensitive, with or without their `VK_*_` prefix. Unknown
// names are configuration errors.
//
//   [[attachments]]
//   name = "color"
//   role = "color"
//   format = "B8G8R8A8_SRGB"
//   final_layout = "PRESENT_SRC_KHR"
//
//   [[subpasses]]
//   attachments = ["color"]

use ash::vk;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::attachment::{Attachment, AttachmentInfo, AttachmentRole};
use super::graph::{RenderGraph, SubpassDependency, SubpassRef};
use super::subpass::Subpass;
use crate::backend::SharedDevice;
use crate::error::{Error, Result};

/// Root of a render graph description file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderGraphDesc {
    #[serde(default)]
    pub name: String,
    pub attachments: Vec<AttachmentDesc>,
    pub subpasses: Vec<SubpassDesc>,
    #[serde(default)]
    pub dependencies: Vec<DependencyDesc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentDesc {
    pub name: String,
    pub role: String,
    pub format: String,
    #[serde(default = "single_sample")]
    pub samples: u32,
    pub aspect: Option<Vec<String>>,
    pub load_op: Option<String>,
    pub store_op: Option<String>,
    pub initial_layout: Option<String>,
    pub final_layout: Option<String>,
}

fn single_sample() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubpassDesc {
    pub name: Option<String>,
    pub attachments: Vec<AttachmentUse>,
}

/// Attachment reference by name, optionally with an explicit layout
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AttachmentUse {
    Name(String),
    WithLayout { name: String, layout: String },
}

/// `"external"`, a subpass name, or a subpass index
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SubpassTarget {
    Index(u32),
    Name(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyDesc {
    pub src: SubpassTarget,
    pub dst: SubpassTarget,
    pub src_stages: Vec<String>,
    #[serde(default)]
    pub src_access: Vec<String>,
    pub dst_stages: Vec<String>,
    #[serde(default)]
    pub dst_access: Vec<String>,
    #[serde(default)]
    pub by_region: bool,
}

impl RenderGraphDesc {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let desc = Self::from_toml_str(&content)?;
        log::info!("Loaded render graph description '{}' from {:?}", desc.name, path);
        Ok(desc)
    }

    /// Builds an unfinalized graph on `device`
    pub fn build(&self, device: &SharedDevice) -> Result<RenderGraph> {
        let mut graph = RenderGraph::new(device);

        let mut attachments: HashMap<&str, Attachment> = HashMap::new();
        for desc in &self.attachments {
            let attachment = graph.add_attachment(desc.to_info()?)?;
            if attachments.insert(desc.name.as_str(), attachment).is_some() {
                return Err(Error::config(format!("duplicate attachment name '{}'", desc.name)));
            }
        }

        let mut subpass_names: HashMap<&str, u32> = HashMap::new();
        for desc in &self.subpasses {
            let mut subpass = Subpass::new();
            for usage in &desc.attachments {
                let (name, layout) = match usage {
                    AttachmentUse::Name(name) => (name, None),
                    AttachmentUse::WithLayout { name, layout } => (name, Some(parse_layout(layout)?)),
                };
                let attachment = *attachments
                    .get(name.as_str())
                    .ok_or_else(|| Error::config(format!("unknown attachment '{}'", name)))?;
                match layout {
                    Some(layout) => subpass.add_attachment_with_layout(attachment, layout)?,
                    None => subpass.add_attachment(attachment)?,
                };
            }

            let index = graph.add_subpass(subpass, vk::SubpassDescriptionFlags::empty(), vk::PipelineBindPoint::GRAPHICS)?;
            if let Some(name) = &desc.name {
                if subpass_names.insert(name.as_str(), index).is_some() {
                    return Err(Error::config(format!("duplicate subpass name '{}'", name)));
                }
            }
        }

        for desc in &self.dependencies {
            let resolve = |target: &SubpassTarget| -> Result<SubpassRef> {
                match target {
                    SubpassTarget::Index(index) => Ok(SubpassRef::Subpass(*index)),
                    SubpassTarget::Name(name) if name.eq_ignore_ascii_case("external") => Ok(SubpassRef::External),
                    SubpassTarget::Name(name) => subpass_names
                        .get(name.as_str())
                        .map(|&i| SubpassRef::Subpass(i))
                        .ok_or_else(|| Error::config(format!("unknown subpass '{}'", name))),
                }
            };

            let flags = if desc.by_region {
                vk::DependencyFlags::BY_REGION
            } else {
                vk::DependencyFlags::empty()
            };
            graph.add_subpass_dependency(
                SubpassDependency::new(resolve(&desc.src)?, resolve(&desc.dst)?)
                    .src_scope(parse_flags(&desc.src_stages, parse_stage)?, parse_flags(&desc.src_access, parse_access)?)
                    .dst_scope(parse_flags(&desc.dst_stages, parse_stage)?, parse_flags(&desc.dst_access, parse_access)?)
                    .flags(flags),
            );
        }

        Ok(graph)
    }
}

impl AttachmentDesc {
    fn to_info(&self) -> Result<AttachmentInfo> {
        let role: AttachmentRole = self.role.parse()?;
        let mut builder = AttachmentInfo::builder(role, parse_format(&self.format)?).samples(parse_samples(self.samples)?);

        if let Some(aspect) = &self.aspect {
            builder = builder.aspect(parse_flags(aspect, parse_aspect)?);
        }
        if let Some(op) = &self.load_op {
            builder = builder.load_op(parse_load_op(op)?);
        }
        if let Some(op) = &self.store_op {
            builder = builder.store_op(parse_store_op(op)?);
        }
        if let Some(layout) = &self.initial_layout {
            builder = builder.initial_layout(parse_layout(layout)?);
        }
        if let Some(layout) = &self.final_layout {
            builder = builder.final_layout(parse_layout(layout)?);
        }
        builder.build()
    }
}

macro_rules! name_table {
    ($fn_name:ident, $what:literal, $ty:ty, $prefix:literal, [$($name:ident),* $(,)?]) => {
        pub(crate) fn $fn_name(name: &str) -> Result<$ty> {
            let upper = name.trim().to_ascii_uppercase();
            let bare = upper.strip_prefix($prefix).unwrap_or(&upper);
            match bare {
                $(stringify!($name) => Ok(<$ty>::$name),)*
                _ => Err(Error::config(format!("unknown {} '{}'", $what, name))),
            }
        }
    };
}

name_table!(parse_format, "format", vk::Format, "VK_FORMAT_", [
    R8_UNORM, R8G8_UNORM, R8G8B8A8_UNORM, R8G8B8A8_SRGB, B8G8R8A8_UNORM, B8G8R8A8_SRGB,
    A2B10G10R10_UNORM_PACK32, B10G11R11_UFLOAT_PACK32, R16_SFLOAT, R16G16_SFLOAT,
    R16G16B16A16_SFLOAT, R32_SFLOAT, R32_UINT, R32G32_SFLOAT, R32G32B32A32_SFLOAT,
    D16_UNORM, X8_D24_UNORM_PACK32, D32_SFLOAT, S8_UINT, D16_UNORM_S8_UINT,
    D24_UNORM_S8_UINT, D32_SFLOAT_S8_UINT,
]);

name_table!(parse_layout, "image layout", vk::ImageLayout, "VK_IMAGE_LAYOUT_", [
    UNDEFINED, GENERAL, COLOR_ATTACHMENT_OPTIMAL, DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    DEPTH_STENCIL_READ_ONLY_OPTIMAL, SHADER_READ_ONLY_OPTIMAL, TRANSFER_SRC_OPTIMAL,
    TRANSFER_DST_OPTIMAL, PREINITIALIZED, DEPTH_ATTACHMENT_OPTIMAL, DEPTH_READ_ONLY_OPTIMAL,
    STENCIL_ATTACHMENT_OPTIMAL, STENCIL_READ_ONLY_OPTIMAL, READ_ONLY_OPTIMAL,
    ATTACHMENT_OPTIMAL, PRESENT_SRC_KHR,
]);

name_table!(parse_load_op, "load op", vk::AttachmentLoadOp, "VK_ATTACHMENT_LOAD_OP_", [
    LOAD, CLEAR, DONT_CARE,
]);

name_table!(parse_store_op, "store op", vk::AttachmentStoreOp, "VK_ATTACHMENT_STORE_OP_", [
    STORE, DONT_CARE,
]);

name_table!(parse_aspect, "image aspect", vk::ImageAspectFlags, "VK_IMAGE_ASPECT_", [
    COLOR, DEPTH, STENCIL,
]);

name_table!(parse_stage, "pipeline stage", vk::PipelineStageFlags, "VK_PIPELINE_STAGE_", [
    TOP_OF_PIPE, DRAW_INDIRECT, VERTEX_INPUT, VERTEX_SHADER, TESSELLATION_CONTROL_SHADER,
    TESSELLATION_EVALUATION_SHADER, GEOMETRY_SHADER, FRAGMENT_SHADER, EARLY_FRAGMENT_TESTS,
    LATE_FRAGMENT_TESTS, COLOR_ATTACHMENT_OUTPUT, COMPUTE_SHADER, TRANSFER, BOTTOM_OF_PIPE,
    HOST, ALL_GRAPHICS, ALL_COMMANDS,
]);

name_table!(parse_access, "access flag", vk::AccessFlags, "VK_ACCESS_", [
    INDIRECT_COMMAND_READ, INDEX_READ, VERTEX_ATTRIBUTE_READ, UNIFORM_READ,
    INPUT_ATTACHMENT_READ, SHADER_READ, SHADER_WRITE, COLOR_ATTACHMENT_READ,
    COLOR_ATTACHMENT_WRITE, DEPTH_STENCIL_ATTACHMENT_READ, DEPTH_STENCIL_ATTACHMENT_WRITE,
    TRANSFER_READ, TRANSFER_WRITE, HOST_READ, HOST_WRITE, MEMORY_READ, MEMORY_WRITE,
]);

fn parse_flags<F>(names: &[String], parse: fn(&str) -> Result<F>) -> Result<F>
where
    F: Default + std::ops::BitOr<Output = F>,
{
    names
        .iter()
        .try_fold(F::default(), |acc, name| Ok(acc | parse(name)?))
}

fn parse_samples(count: u32) -> Result<vk::SampleCountFlags> {
    if count.is_power_of_two() && count <= 64 {
        Ok(vk::SampleCountFlags::from_raw(count))
    } else {
        Err(Error::config(format!("unsupported sample count {}", count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullDevice;

    const DEFERRED: &str = r#"
        name = "deferred"

        [[attachments]]
        name = "albedo"
        role = "input"
        format = "R8G8B8A8_UNORM"
        load_op = "dont_care"

        [[attachments]]
        name = "swapchain"
        role = "color"
        format = "VK_FORMAT_B8G8R8A8_SRGB"
        final_layout = "present_src_khr"

        [[attachments]]
        name = "depth"
        role = "depth"
        format = "D32_SFLOAT"
        store_op = "dont_care"

        [[subpasses]]
        name = "lighting"
        attachments = ["swapchain", "depth", { name = "albedo", layout = "general" }]

        [[dependencies]]
        src = "external"
        dst = "lighting"
        src_stages = ["color_attachment_output"]
        dst_stages = ["color_attachment_output", "early_fragment_tests"]
        dst_access = ["color_attachment_write", "depth_stencil_attachment_write"]
    "#;

    #[test]
    fn description_builds_and_finalizes() {
        let device: SharedDevice = NullDevice::new();
        let desc = RenderGraphDesc::from_toml_str(DEFERRED).unwrap();
        let graph = desc.build(&device).unwrap();
        assert_eq!(graph.attachment_count(), 3);
        assert!(graph.has_depth_stencil());

        let subpass = graph.subpass(0).unwrap();
        assert_eq!(subpass.input_refs()[0].layout, vk::ImageLayout::GENERAL);
        assert_eq!(graph.attachment(1).unwrap().final_layout(), vk::ImageLayout::PRESENT_SRC_KHR);

        let pass = graph.finalize().unwrap();
        assert_eq!(pass.dependency_count(), 1);
        assert_eq!(pass.dependency(0).unwrap().src, SubpassRef::External);
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        let device: SharedDevice = NullDevice::new();
        for (from, to) in [
            ("\"input\"", "\"stencil\""),
            ("\"R8G8B8A8_UNORM\"", "\"R8G8B8A8_WHATEVER\""),
            ("\"present_src_khr\"", "\"presentable\""),
            ("\"early_fragment_tests\"", "\"early_z\""),
            ("\"dont_care\"", "\"discard\""),
        ] {
            let broken = DEFERRED.replacen(from, to, 1);
            let err = RenderGraphDesc::from_toml_str(&broken)
                .and_then(|desc| desc.build(&device))
                .err()
                .unwrap();
            assert!(matches!(err, Error::Configuration(_)), "{} -> {}: {}", from, to, err);
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            RenderGraphDesc::from_toml_str("[[attachments]\nname ="),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn flag_lists_fold() {
        let names = vec!["fragment_shader".to_string(), "VK_PIPELINE_STAGE_COMPUTE_SHADER".to_string()];
        assert_eq!(
            parse_flags(&names, parse_stage).unwrap(),
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER
        );
        assert_eq!(parse_flags(&[], parse_access).unwrap(), vk::AccessFlags::empty());
        assert!(parse_samples(3).is_err());
    }
}

// Pipeline creation and management
//
// Compute pipelines carry their workgroup size so the recorder can turn a
// global invocation count into dispatch counts. Graphics pipelines are built
// against one subpass of a finalized render pass: depth state and the number
// of blend attachments follow that subpass.

use ash::vk;
use std::ffi::CString;

use super::{QueueType, ShaderModule, SharedDevice, Unique};
use crate::error::{Error, Result, VkResultExt};
use crate::render_graph::RenderPass;

pub struct Pipeline {
    // Declared before `layout` so the pipeline is destroyed first
    handle: Unique<vk::Pipeline>,
    layout: Unique<vk::PipelineLayout>,
    bind_point: vk::PipelineBindPoint,
    workgroup_size: Option<[u32; 3]>,
    push_constant_stages: vk::ShaderStageFlags,
}

/// Fixed-function state for a graphics pipeline
///
/// Viewport and scissor cover `extent`; there is no dynamic state.
pub struct GraphicsPipelineDesc<'a> {
    pub vertex_shader: &'a ShaderModule,
    pub fragment_shader: &'a ShaderModule,
    pub entry_point: &'a str,
    pub extent: vk::Extent2D,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_compare_op: vk::CompareOp,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl<'a> GraphicsPipelineDesc<'a> {
    pub fn new(vertex_shader: &'a ShaderModule, fragment_shader: &'a ShaderModule, extent: vk::Extent2D) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            entry_point: "main",
            extent,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_compare_op: vk::CompareOp::LESS,
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
        }
    }
}

fn entry_name(entry: &str) -> Result<CString> {
    CString::new(entry).map_err(|_| Error::config(format!("shader entry point {:?} contains a NUL byte", entry)))
}

fn create_layout(
    device: &SharedDevice,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<Unique<vk::PipelineLayout>> {
    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);
    let layout = device
        .create_pipeline_layout(&layout_info)
        .driver("vkCreatePipelineLayout")?;
    Ok(Unique::new(device, layout))
}

fn push_constant_stages(ranges: &[vk::PushConstantRange]) -> vk::ShaderStageFlags {
    ranges
        .iter()
        .fold(vk::ShaderStageFlags::empty(), |stages, range| stages | range.stage_flags)
}

impl Pipeline {
    /// Create a compute pipeline
    ///
    /// `workgroup_size` must match the shader's `local_size`; it is only used
    /// for dispatch arithmetic.
    pub fn compute(
        device: &SharedDevice,
        shader: &ShaderModule,
        entry_point: &str,
        workgroup_size: [u32; 3],
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        if workgroup_size.contains(&0) {
            return Err(Error::config(format!("workgroup size {:?} has a zero axis", workgroup_size)));
        }
        let entry = entry_name(entry_point)?;
        let layout = create_layout(device, set_layouts, push_constant_ranges)?;

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.handle())
            .name(&entry)
            .build();
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout.get())
            .build();

        let handle = device
            .create_compute_pipeline(&pipeline_info)
            .driver("vkCreateComputePipelines")?;
        log::info!("Created compute pipeline {:?} (workgroup {:?})", handle, workgroup_size);

        Ok(Self {
            handle: Unique::new(device, handle),
            layout,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            workgroup_size: Some(workgroup_size),
            push_constant_stages: push_constant_stages(push_constant_ranges),
        })
    }

    /// Create a graphics pipeline for `subpass` of a finalized render pass
    pub fn graphics(render_pass: &RenderPass, subpass: u32, desc: &GraphicsPipelineDesc<'_>) -> Result<Self> {
        let target = render_pass.subpass(subpass).ok_or_else(|| {
            Error::config(format!(
                "subpass {} out of range ({} subpasses)",
                subpass,
                render_pass.subpass_count()
            ))
        })?;
        let device = render_pass.device();
        let entry = entry_name(desc.entry_point)?;

        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(desc.vertex_shader.handle())
            .name(&entry)
            .build();
        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(desc.fragment_shader.handle())
            .name(&entry)
            .build();
        let shader_stages = &[vert_stage, frag_stage];

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        let viewport = vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(desc.extent.width as f32)
            .height(desc.extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0)
            .build();
        let scissor = vk::Rect2D::builder()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(desc.extent)
            .build();
        let viewports = &[viewport];
        let scissors = &[scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(viewports)
            .scissors(scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(false);

        // Sample count has to match the subpass' color attachments
        let samples = target
            .color_refs()
            .first()
            .and_then(|r| render_pass.attachment(r.index))
            .map(|a| a.samples())
            .unwrap_or(vk::SampleCountFlags::TYPE_1);
        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(samples);

        let has_depth = target.has_depth_stencil();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(has_depth)
            .depth_write_enable(has_depth)
            .depth_compare_op(desc.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // One opaque blend state per color attachment
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();
        let color_blend_attachments = vec![color_blend_attachment; target.color_refs().len()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let layout = create_layout(device, &desc.set_layouts, &desc.push_constant_ranges)?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout.get())
            .render_pass(render_pass.handle())
            .subpass(subpass)
            .build();

        let handle = device
            .create_graphics_pipeline(&pipeline_info)
            .driver("vkCreateGraphicsPipelines")?;
        log::info!(
            "Created graphics pipeline {:?} for subpass {} (depth: {})",
            handle,
            subpass,
            has_depth
        );

        Ok(Self {
            handle: Unique::new(device, handle),
            layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            workgroup_size: None,
            push_constant_stages: push_constant_stages(&desc.push_constant_ranges),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.handle.get()
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.get()
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    /// Queue a recorder must target to bind this pipeline
    pub fn queue_type(&self) -> QueueType {
        if self.bind_point == vk::PipelineBindPoint::COMPUTE {
            QueueType::Compute
        } else {
            QueueType::Graphics
        }
    }

    /// `None` for graphics pipelines
    pub fn workgroup_size(&self) -> Option<[u32; 3]> {
        self.workgroup_size
    }

    pub fn push_constant_stages(&self) -> vk::ShaderStageFlags {
        self.push_constant_stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullDevice;
    use crate::render_graph::{AttachmentInfo, AttachmentRole, RenderGraph, Subpass};

    fn shader(device: &SharedDevice) -> ShaderModule {
        ShaderModule::from_words(device, &[0x0723_0203, 0, 0, 0, 0]).unwrap()
    }

    #[test]
    fn compute_pipeline_keeps_workgroup_size() {
        let device: SharedDevice = NullDevice::new();
        let module = shader(&device);
        let ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: 16,
        }];
        let pipeline = Pipeline::compute(&device, &module, "main", [8, 8, 1], &[], &ranges).unwrap();
        assert_eq!(pipeline.workgroup_size(), Some([8, 8, 1]));
        assert_eq!(pipeline.queue_type(), QueueType::Compute);
        assert_eq!(pipeline.push_constant_stages(), vk::ShaderStageFlags::COMPUTE);

        assert!(Pipeline::compute(&device, &module, "main", [8, 0, 1], &[], &[]).is_err());
        assert!(Pipeline::compute(&device, &module, "ma\0in", [1, 1, 1], &[], &[]).is_err());
    }

    #[test]
    fn graphics_pipeline_targets_a_subpass() {
        let device: SharedDevice = NullDevice::new();
        let mut graph = RenderGraph::new(&device);
        let color = graph
            .add_attachment(
                AttachmentInfo::builder(AttachmentRole::Color, vk::Format::R8G8B8A8_UNORM)
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

        let (vert, frag) = (shader(&device), shader(&device));
        let desc = GraphicsPipelineDesc::new(&vert, &frag, vk::Extent2D { width: 32, height: 32 });
        let pipeline = Pipeline::graphics(&pass, 0, &desc).unwrap();
        assert_eq!(pipeline.queue_type(), QueueType::Graphics);
        assert_eq!(pipeline.workgroup_size(), None);

        assert!(matches!(Pipeline::graphics(&pass, 1, &desc), Err(Error::Configuration(_))));
    }
}

//! Graphics pipeline and pipeline layout.
//!
//! The pipeline is built once against the render pass. Viewport and scissor
//! are dynamic state, so swapchain rebuilds never touch it.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::render_pass::RenderPass;
use crate::shader::Shader;

/// Vulkan pipeline layout wrapper.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Self> {
        let create_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(descriptor_set_layouts);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout with {} descriptor set layout(s)",
            descriptor_set_layouts.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Vulkan graphics pipeline wrapper.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Graphics pipeline destroyed");
    }
}

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Winding order of front-facing triangles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Blend factors used by the color blend state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

impl BlendFactor {
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        }
    }
}

/// Color blend state for the single color attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
}

impl Default for ColorBlendAttachment {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
        }
    }
}

impl ColorBlendAttachment {
    /// `src * src_alpha + dst * (1 - src_alpha)` on color; alpha passes
    /// through from the source.
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            src_color_blend_factor: BlendFactor::SrcAlpha,
            dst_color_blend_factor: BlendFactor::OneMinusSrcAlpha,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
        }
    }

    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.blend_enable.into(),
            src_color_blend_factor: self.src_color_blend_factor.to_vk(),
            dst_color_blend_factor: self.dst_color_blend_factor.to_vk(),
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: self.src_alpha_blend_factor.to_vk(),
            dst_alpha_blend_factor: self.dst_alpha_blend_factor.to_vk(),
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

/// Builder for the renderer's graphics pipeline.
///
/// Defaults: triangle list, fill, back-face culling, counter-clockwise front
/// faces, depth test and write with `LESS`, one sample, no blending, dynamic
/// viewport and scissor.
pub struct GraphicsPipelineBuilder<'a> {
    vertex_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    cull_mode: CullMode,
    front_face: FrontFace,
    samples: vk::SampleCountFlags,
    min_sample_shading: Option<f32>,
    depth_test: bool,
    color_blend: ColorBlendAttachment,
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            cull_mode: CullMode::default(),
            front_face: FrontFace::default(),
            samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: None,
            depth_test: true,
            color_blend: ColorBlendAttachment::default(),
        }
    }

    pub fn vertex_shader(mut self, shader: &'a Shader) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    pub fn fragment_shader(mut self, shader: &'a Shader) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    pub fn vertex_binding(mut self, binding: vk::VertexInputBindingDescription) -> Self {
        self.vertex_bindings.push(binding);
        self
    }

    pub fn vertex_attributes(mut self, attributes: &[vk::VertexInputAttributeDescription]) -> Self {
        self.vertex_attributes.extend_from_slice(attributes);
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: FrontFace) -> Self {
        self.front_face = face;
        self
    }

    /// Rasterization samples; must match the render pass.
    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Enables per-sample shading with the given minimum fraction.
    ///
    /// Requires the `sampleRateShading` device feature.
    pub fn sample_shading(mut self, min_fraction: f32) -> Self {
        self.min_sample_shading = Some(min_fraction.clamp(0.0, 1.0));
        self
    }

    pub fn depth_test(mut self, enable: bool) -> Self {
        self.depth_test = enable;
        self
    }

    pub fn color_blend(mut self, blend: ColorBlendAttachment) -> Self {
        self.color_blend = blend;
        self
    }

    /// Builds the pipeline for subpass 0 of `render_pass`.
    ///
    /// # Errors
    ///
    /// [`RhiError::Pipeline`] if a shader stage is missing or the sample
    /// count disagrees with the render pass, otherwise any creation failure.
    pub fn build(
        self,
        device: Arc<Device>,
        layout: &PipelineLayout,
        render_pass: &RenderPass,
    ) -> RhiResult<Pipeline> {
        let vertex_shader = self
            .vertex_shader
            .ok_or_else(|| RhiError::Pipeline("vertex shader is required".to_string()))?;
        let fragment_shader = self
            .fragment_shader
            .ok_or_else(|| RhiError::Pipeline("fragment shader is required".to_string()))?;

        if self.samples != render_pass.samples() {
            return Err(RhiError::Pipeline(format!(
                "pipeline uses {:?} but render pass uses {:?}",
                self.samples,
                render_pass.samples()
            )));
        }

        let shader_stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(self.front_face.to_vk())
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(self.samples)
            .sample_shading_enable(self.min_sample_shading.is_some())
            .min_sample_shading(self.min_sample_shading.unwrap_or(0.0));

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_test)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false);

        let color_blend_attachments = [self.color_blend.to_vk()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments)
            .blend_constants([0.0; 4]);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass.handle())
            .subpass(0);

        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| RhiError::Vulkan(result))?
        }
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::Pipeline("driver returned no pipeline".to_string()))?;

        info!(
            "Graphics pipeline created: {:?}, sample shading {}",
            self.samples,
            self.min_sample_shading.is_some()
        );

        Ok(Pipeline { device, pipeline })
    }
}

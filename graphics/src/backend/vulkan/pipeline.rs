//! Scene descriptor set layout and graphics pipeline creation.

use ash::vk;
use aster_core::material::AlphaMode;

use crate::error::GraphicsError;
use crate::scene::bindings;
use crate::types::PipelineDescriptor;

use super::conversion::{convert_texture_format, convert_topology, convert_vertex_format};

/// Entry point of every stage.
const ENTRY_POINT: &std::ffi::CStr = c"main";

/// Stages that read the scene set.
fn scene_stages(ray_tracing: bool) -> vk::ShaderStageFlags {
    let mut stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
    if ray_tracing {
        stages |= vk::ShaderStageFlags::RAYGEN_KHR
            | vk::ShaderStageFlags::CLOSEST_HIT_KHR
            | vk::ShaderStageFlags::ANY_HIT_KHR
            | vk::ShaderStageFlags::MISS_KHR;
    }
    stages
}

/// Create the descriptor set layout shared by every scene pipeline.
///
/// The texture array is partially bound so that scenes with fewer textures
/// than `max_textures` leave the tail unwritten.
pub fn create_scene_set_layout(
    device: &ash::Device,
    max_textures: u32,
    ray_tracing: bool,
) -> Result<vk::DescriptorSetLayout, GraphicsError> {
    let stages = scene_stages(ray_tracing);

    let mut set_bindings = vec![
        vk::DescriptorSetLayoutBinding::default()
            .binding(bindings::TEXTURES)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(max_textures)
            .stage_flags(stages),
        vk::DescriptorSetLayoutBinding::default()
            .binding(bindings::MATERIALS)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(stages),
        vk::DescriptorSetLayoutBinding::default()
            .binding(bindings::TRANSFORMS)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(stages),
        vk::DescriptorSetLayoutBinding::default()
            .binding(bindings::FRAME_UNIFORMS)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stages),
    ];
    if ray_tracing {
        set_bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(bindings::TLAS)
                .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                .descriptor_count(1)
                .stage_flags(stages),
        );
        set_bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(bindings::INSTANCES)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(stages),
        );
    }

    let binding_flags: Vec<vk::DescriptorBindingFlags> = set_bindings
        .iter()
        .map(|binding| {
            if binding.binding == bindings::TEXTURES {
                vk::DescriptorBindingFlags::PARTIALLY_BOUND
            } else {
                vk::DescriptorBindingFlags::empty()
            }
        })
        .collect();
    let mut flags_info =
        vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

    let create_info = vk::DescriptorSetLayoutCreateInfo::default()
        .bindings(&set_bindings)
        .push_next(&mut flags_info);

    unsafe { device.create_descriptor_set_layout(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to create scene descriptor set layout: {:?}",
            e
        ))
    })
}

/// Create the pipeline layout: scene set at set 0 plus one push constant
/// range visible to vertex and fragment stages.
pub fn create_pipeline_layout(
    device: &ash::Device,
    set_layout: vk::DescriptorSetLayout,
    push_constant_size: u32,
) -> Result<vk::PipelineLayout, GraphicsError> {
    let set_layouts = [set_layout];
    let ranges = [vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .offset(0)
        .size(push_constant_size)];

    let mut create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    if push_constant_size > 0 {
        create_info = create_info.push_constant_ranges(&ranges);
    }

    unsafe { device.create_pipeline_layout(&create_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("Failed to create pipeline layout: {:?}", e))
    })
}

fn create_shader_module(
    device: &ash::Device,
    code: &[u32],
    stage: &str,
) -> Result<vk::ShaderModule, GraphicsError> {
    if code.is_empty() {
        return Err(GraphicsError::InvalidParameter(format!(
            "Empty {} shader",
            stage
        )));
    }
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!(
            "Failed to create {} shader module: {:?}",
            stage, e
        ))
    })
}

/// Create a graphics pipeline for dynamic rendering.
///
/// Shader modules are destroyed before returning; the pipeline keeps its own
/// copy of the code.
pub fn create_graphics_pipeline(
    device: &ash::Device,
    pipeline_layout: vk::PipelineLayout,
    descriptor: &PipelineDescriptor,
) -> Result<vk::Pipeline, GraphicsError> {
    let vertex_module = create_shader_module(device, &descriptor.shaders.vertex, "vertex")?;
    let fragment_module =
        match create_shader_module(device, &descriptor.shaders.fragment, "fragment") {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vertex_module, None) };
                return Err(e);
            }
        };

    let result = build_pipeline(
        device,
        pipeline_layout,
        descriptor,
        vertex_module,
        fragment_module,
    );

    unsafe {
        device.destroy_shader_module(vertex_module, None);
        device.destroy_shader_module(fragment_module, None);
    }
    result
}

fn build_pipeline(
    device: &ash::Device,
    pipeline_layout: vk::PipelineLayout,
    descriptor: &PipelineDescriptor,
    vertex_module: vk::ShaderModule,
    fragment_module: vk::ShaderModule,
) -> Result<vk::Pipeline, GraphicsError> {
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(ENTRY_POINT),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_module)
            .name(ENTRY_POINT),
    ];

    let layout = &descriptor.vertex_layout;
    let binding_descriptions = [vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(layout.stride)
        .input_rate(vk::VertexInputRate::VERTEX)];

    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = layout
        .attributes
        .iter()
        .map(|attr| {
            vk::VertexInputAttributeDescription::default()
                .location(attr.semantic.location())
                .binding(0)
                .format(convert_vertex_format(attr.format))
                .offset(attr.offset)
        })
        .collect();

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(descriptor.topology))
        .primitive_restart_enable(false);

    // Dynamic viewport and scissor
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let cull_mode = if descriptor.state.double_sided {
        vk::CullModeFlags::NONE
    } else {
        vk::CullModeFlags::BACK
    };
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let blended = descriptor.state.alpha_mode == AlphaMode::Blend;
    let depth_tested = descriptor.depth_format.is_some();
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(depth_tested)
        .depth_write_enable(depth_tested && !blended)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = [if blended {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    } else {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
    }];

    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_attachment_formats = [convert_texture_format(descriptor.color_format)];
    let depth_attachment_format = descriptor
        .depth_format
        .map(convert_texture_format)
        .unwrap_or(vk::Format::UNDEFINED);

    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_attachment_formats)
        .depth_attachment_format(depth_attachment_format);

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
        .layout(pipeline_layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| {
        GraphicsError::ResourceCreationFailed(format!(
            "Failed to create graphics pipeline{}: {:?}",
            descriptor
                .label
                .as_deref()
                .map(|label| format!(" '{}'", label))
                .unwrap_or_default(),
            e
        ))
    })?;

    pipelines.into_iter().next().ok_or_else(|| {
        GraphicsError::Internal("Pipeline creation returned no pipeline".to_string())
    })
}

// SPDX-License-Identifier: CEPL-1.0
//! Render pass, descriptor layout, graphics pipeline and framebuffers.
//!
//! Viewport and scissor are baked into the pipeline, so the pipeline is
//! rebuilt together with the chain. The descriptor set layout outlives
//! chains.

use std::mem::{offset_of, size_of};

use ash::vk;
use prism_render::Vertex;

use crate::device::DeviceContext;
use crate::error::{CallExt, VkResult};
use crate::swapchain::SwapChainState;
use crate::targets::RenderTargets;
use crate::teardown::{guarded, Record};

#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineState {
    pub render_pass: vk::RenderPass,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

#[derive(Clone, Debug)]
pub struct ShaderCode {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, pos) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, color) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(Vertex, tex_coord) as u32,
        },
    ]
}

pub fn viewport_for(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    (
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        },
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        },
    )
}

/// Framebuffer attachment order matching the render pass: the multisampled
/// color, depth, then the swap-chain image as resolve target. Without MSAA
/// the swap-chain image is attachment 0.
pub fn framebuffer_attachments(
    swap_view: vk::ImageView,
    targets: &RenderTargets,
) -> Vec<vk::ImageView> {
    match &targets.color {
        Some(color) => vec![color.view, targets.depth.view, swap_view],
        None => vec![swap_view, targets.depth.view],
    }
}

pub unsafe fn create_descriptor_set_layout(
    ctx: &DeviceContext,
) -> VkResult<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ];
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    unsafe { ctx.device.create_descriptor_set_layout(&ci, None) }
        .call("vkCreateDescriptorSetLayout")
}

pub unsafe fn create_render_pass(
    ctx: &DeviceContext,
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> VkResult<vk::RenderPass> {
    let msaa = samples != vk::SampleCountFlags::TYPE_1;

    let color = vk::AttachmentDescription {
        format: color_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: if msaa {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        },
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: if msaa {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        },
        ..Default::default()
    };
    let depth = vk::AttachmentDescription {
        format: depth_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    };
    let resolve = vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::DONT_CARE,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };

    let (attachments, color_ref, depth_ref, resolve_ref) = if msaa {
        (vec![color, depth, resolve], 0, 1, Some(2))
    } else {
        (vec![color, depth], 0, 1, None)
    };
    let color_ref = vk::AttachmentReference {
        attachment: color_ref,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: depth_ref,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let resolve_ref = resolve_ref.map(|attachment| vk::AttachmentReference {
        attachment,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    });

    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_resolve_attachments: resolve_ref
            .as_ref()
            .map_or(std::ptr::null(), |r| r as *const _),
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { ctx.device.create_render_pass(&ci, None) }.call("vkCreateRenderPass")
}

unsafe fn create_shader_module(ctx: &DeviceContext, words: &[u32]) -> VkResult<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: words.len() * 4,
        p_code: words.as_ptr(),
        ..Default::default()
    };
    unsafe { ctx.device.create_shader_module(&ci, None) }.call("vkCreateShaderModule")
}

pub unsafe fn create_pipeline(
    ctx: &DeviceContext,
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    shaders: &ShaderCode,
) -> VkResult<(vk::PipelineLayout, vk::Pipeline)> {
    let d = &ctx.device;
    let vs = unsafe { create_shader_module(ctx, &shaders.vertex) }?;
    let fs = match unsafe { create_shader_module(ctx, &shaders.fragment) } {
        Ok(m) => m,
        Err(e) => {
            unsafe { d.destroy_shader_module(vs, None) };
            return Err(e);
        }
    };
    let entry = c"main";

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    let vb = vertex_binding();
    let va = vertex_attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &vb,
        vertex_attribute_description_count: va.len() as u32,
        p_vertex_attribute_descriptions: va.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let (viewport, scissor) = viewport_for(extent);
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: samples,
        ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        logic_op: vk::LogicOp::COPY,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let result = unsafe {
        guarded(ctx, |undo| -> VkResult<(vk::PipelineLayout, vk::Pipeline)> {
            let layout_info = vk::PipelineLayoutCreateInfo {
                s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                set_layout_count: 1,
                p_set_layouts: &set_layout,
                ..Default::default()
            };
            let layout = d
                .create_pipeline_layout(&layout_info, None)
                .call("vkCreatePipelineLayout")?;
            undo.push(Record::PipelineLayout(layout));

            let pipeline_info = vk::GraphicsPipelineCreateInfo {
                s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
                stage_count: stages.len() as u32,
                p_stages: stages.as_ptr(),
                p_vertex_input_state: &vertex_input,
                p_input_assembly_state: &input_assembly,
                p_viewport_state: &viewport_state,
                p_rasterization_state: &raster,
                p_multisample_state: &multisample,
                p_depth_stencil_state: &depth_stencil,
                p_color_blend_state: &color_blend,
                layout,
                render_pass,
                subpass: 0,
                ..Default::default()
            };
            let pipelines = d
                .create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&pipeline_info),
                    None,
                )
                .map_err(|(_, e)| e)
                .call("vkCreateGraphicsPipelines")?;
            Ok((layout, pipelines[0]))
        })
    };

    unsafe {
        d.destroy_shader_module(vs, None);
        d.destroy_shader_module(fs, None);
    }
    result
}

pub unsafe fn create_framebuffers(
    ctx: &DeviceContext,
    chain: &mut SwapChainState,
    targets: &RenderTargets,
    render_pass: vk::RenderPass,
) -> VkResult<()> {
    let framebuffers = unsafe {
        guarded(ctx, |undo| -> VkResult<Vec<vk::Framebuffer>> {
            let mut out = Vec::with_capacity(chain.image_views.len());
            for &view in &chain.image_views {
                let attachments = framebuffer_attachments(view, targets);
                let ci = vk::FramebufferCreateInfo {
                    s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                    render_pass,
                    attachment_count: attachments.len() as u32,
                    p_attachments: attachments.as_ptr(),
                    width: chain.extent.width,
                    height: chain.extent.height,
                    layers: 1,
                    ..Default::default()
                };
                let fb = ctx
                    .device
                    .create_framebuffer(&ci, None)
                    .call("vkCreateFramebuffer")?;
                undo.push(Record::Framebuffer(fb));
                out.push(fb);
            }
            Ok(out)
        })
    }?;
    chain.framebuffers = framebuffers;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::GpuImage;
    use ash::vk::Handle;

    #[test]
    fn vertex_attributes_are_packed_in_order() {
        let a = vertex_attributes();
        assert_eq!(
            a.iter().map(|x| x.offset).collect::<Vec<_>>(),
            vec![0, 12, 24]
        );
        assert_eq!(a.iter().map(|x| x.location).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(vertex_binding().stride, 32);
    }

    #[test]
    fn viewport_covers_extent() {
        let (vp, sc) = viewport_for(vk::Extent2D { width: 640, height: 480 });
        assert_eq!((vp.width, vp.height), (640.0, 480.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
        assert_eq!(sc.extent, vk::Extent2D { width: 640, height: 480 });
    }

    #[test]
    fn attachments_follow_render_pass_layout() {
        let swap = vk::ImageView::from_raw(10);
        let depth = GpuImage {
            view: vk::ImageView::from_raw(20),
            ..Default::default()
        };
        let color = GpuImage {
            view: vk::ImageView::from_raw(30),
            ..Default::default()
        };

        let single = RenderTargets {
            depth,
            color: None,
            samples: vk::SampleCountFlags::TYPE_1,
        };
        assert_eq!(framebuffer_attachments(swap, &single), vec![swap, depth.view]);

        let msaa = RenderTargets {
            depth,
            color: Some(color),
            samples: vk::SampleCountFlags::TYPE_4,
        };
        assert_eq!(
            framebuffer_attachments(swap, &msaa),
            vec![color.view, depth.view, swap]
        );
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Host -> device uploads, image layout transitions and mip generation.
//!
//! Every upload here is blocking: record a one-shot command buffer, submit on
//! the graphics queue, wait for the queue to go idle.

use ash::vk;
use prism_render::ImageData;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{CallExt, VkError, VkResult};
use crate::memory::{create_buffer, create_image, write_mapped, GpuBuffer, GpuImage, ImageSpec};
use crate::teardown::{guarded, release_all, Record};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

pub unsafe fn begin_one_shot(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
) -> VkResult<vk::CommandBuffer> {
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = unsafe { ctx.device.allocate_command_buffers(&ai) }
        .call("vkAllocateCommandBuffers")?[0];
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    if let Err(e) = unsafe { ctx.device.begin_command_buffer(cmd, &bi) } {
        unsafe { ctx.device.free_command_buffers(pool, &[cmd]) };
        return Err(VkError::Vk {
            call: "vkBeginCommandBuffer",
            result: e,
        });
    }
    Ok(cmd)
}

pub unsafe fn end_one_shot(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
) -> VkResult<()> {
    let d = &ctx.device;
    let run = || -> VkResult<()> {
        unsafe {
            d.end_command_buffer(cmd).call("vkEndCommandBuffer")?;
            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            d.queue_submit(ctx.graphics.queue, std::slice::from_ref(&si), vk::Fence::null())
                .call("vkQueueSubmit")?;
            d.queue_wait_idle(ctx.graphics.queue)
                .call("vkQueueWaitIdle")
        }
    };
    let out = run();
    unsafe { d.free_command_buffers(pool, &[cmd]) };
    out
}

pub unsafe fn one_shot<F>(ctx: &DeviceContext, pool: vk::CommandPool, record: F) -> VkResult<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = unsafe { begin_one_shot(ctx, pool) }?;
    record(cmd);
    unsafe { end_one_shot(ctx, pool, cmd) }
}

unsafe fn staging_buffer(ctx: &DeviceContext, data: &[u8]) -> VkResult<GpuBuffer> {
    let staging = unsafe {
        create_buffer(
            ctx,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }?;
    if let Err(e) = unsafe { write_mapped(ctx, staging.memory, data) } {
        unsafe { release_all(ctx, staging.records()) };
        return Err(e);
    }
    Ok(staging)
}

pub(crate) fn staging_size(data: &[u8], usage: vk::BufferUsageFlags) -> VkResult<vk::DeviceSize> {
    if data.is_empty() {
        return Err(VkError::EmptyUpload(usage));
    }
    Ok(data.len() as vk::DeviceSize)
}

/// Device-local buffer holding `data`. `TRANSFER_DST` is added to `usage`.
pub unsafe fn upload_via_staging(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> VkResult<GpuBuffer> {
    let size = staging_size(data, usage)?;
    let staging = unsafe { staging_buffer(ctx, data) }?;
    let out = unsafe {
        guarded(ctx, |undo| -> VkResult<GpuBuffer> {
            let dst = create_buffer(
                ctx,
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;
            dst.records().into_iter().rev().for_each(|r| undo.push(r));
            one_shot(ctx, pool, |cmd| {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                };
                ctx.device
                    .cmd_copy_buffer(cmd, staging.handle, dst.handle, std::slice::from_ref(&region));
            })?;
            Ok(dst)
        })
    };
    unsafe { release_all(ctx, staging.records()) };
    debug!("uploaded {} bytes ({:?})", size, usage);
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// The only layout changes the renderer performs.
pub fn transition_masks(
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> VkResult<TransitionMasks> {
    use vk::ImageLayout as L;
    match (from, to) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        }),
        _ => Err(VkError::UnsupportedLayoutTransition { from, to }),
    }
}

pub unsafe fn transition_image_layout(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    from: vk::ImageLayout,
    to: vk::ImageLayout,
    mip_levels: u32,
) -> VkResult<()> {
    let masks = transition_masks(from, to)?;
    unsafe {
        one_shot(ctx, pool, |cmd| {
            let barrier = vk::ImageMemoryBarrier {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                src_access_mask: masks.src_access,
                dst_access_mask: masks.dst_access,
                old_layout: from,
                new_layout: to,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: 0,
                    level_count: mip_levels,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            ctx.device.cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            );
        })
    }
}

pub fn mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

pub fn next_mip_dim(dim: i32) -> i32 {
    (dim / 2).max(1)
}

pub fn supports_linear_blit(props: &vk::FormatProperties) -> bool {
    props
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
}

/// Fills levels `1..levels` by blitting from the level above. Expects every
/// level in TRANSFER_DST_OPTIMAL and leaves all of them SHADER_READ_ONLY.
pub unsafe fn generate_mipmaps(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    image: vk::Image,
    width: u32,
    height: u32,
    levels: u32,
) -> VkResult<()> {
    let d = &ctx.device;
    unsafe {
        one_shot(ctx, pool, |cmd| {
            let mut barrier = vk::ImageMemoryBarrier {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };

            let mut w = width as i32;
            let mut h = height as i32;
            for level in 1..levels {
                barrier.subresource_range.base_mip_level = level - 1;
                barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
                barrier.new_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
                barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
                barrier.dst_access_mask = vk::AccessFlags::TRANSFER_READ;
                d.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&barrier),
                );

                let (nw, nh) = (next_mip_dim(w), next_mip_dim(h));
                let blit = vk::ImageBlit {
                    src_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: level - 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    src_offsets: [vk::Offset3D { x: 0, y: 0, z: 0 }, vk::Offset3D { x: w, y: h, z: 1 }],
                    dst_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: level,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    dst_offsets: [vk::Offset3D { x: 0, y: 0, z: 0 }, vk::Offset3D { x: nw, y: nh, z: 1 }],
                };
                d.cmd_blit_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&blit),
                    vk::Filter::LINEAR,
                );

                barrier.old_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
                barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
                barrier.src_access_mask = vk::AccessFlags::TRANSFER_READ;
                barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;
                d.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&barrier),
                );
                w = nw;
                h = nh;
            }

            // last level was only ever written
            barrier.subresource_range.base_mip_level = levels - 1;
            barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
            barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
            barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;
            d.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            );
        })
    }
}

/// Sampled RGBA8 texture. With `mipmaps` the full chain is generated on the
/// GPU, which needs `format_props` to allow linear blits.
pub unsafe fn create_texture(
    ctx: &DeviceContext,
    pool: vk::CommandPool,
    img: &ImageData,
    format_props: &vk::FormatProperties,
    mipmaps: bool,
) -> VkResult<GpuImage> {
    let levels = if mipmaps {
        if !supports_linear_blit(format_props) {
            return Err(VkError::UnsupportedBlitFormat(TEXTURE_FORMAT));
        }
        mip_levels(img.width, img.height)
    } else {
        1
    };

    let staging = unsafe { staging_buffer(ctx, &img.pixels) }?;
    let out = unsafe {
        guarded(ctx, |undo| -> VkResult<GpuImage> {
            let tex = create_image(
                ctx,
                &ImageSpec {
                    extent: vk::Extent2D {
                        width: img.width,
                        height: img.height,
                    },
                    format: TEXTURE_FORMAT,
                    mip_levels: levels,
                    samples: vk::SampleCountFlags::TYPE_1,
                    usage: vk::ImageUsageFlags::TRANSFER_SRC
                        | vk::ImageUsageFlags::TRANSFER_DST
                        | vk::ImageUsageFlags::SAMPLED,
                    aspect: vk::ImageAspectFlags::COLOR,
                },
            )?;
            tex.records().into_iter().rev().for_each(|r| undo.push(r));

            transition_image_layout(
                ctx,
                pool,
                tex.handle,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                levels,
            )?;
            one_shot(ctx, pool, |cmd| {
                let region = vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                    image_extent: vk::Extent3D {
                        width: img.width,
                        height: img.height,
                        depth: 1,
                    },
                };
                ctx.device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle,
                    tex.handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                );
            })?;

            if levels > 1 {
                generate_mipmaps(ctx, pool, tex.handle, img.width, img.height, levels)?;
            } else {
                transition_image_layout(
                    ctx,
                    pool,
                    tex.handle,
                    vk::ImageAspectFlags::COLOR,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    levels,
                )?;
            }
            Ok(tex)
        })
    };
    unsafe { release_all(ctx, staging.records()) };
    debug!("texture {}x{} with {} mip levels", img.width, img.height, levels);
    out
}

pub unsafe fn create_sampler(ctx: &DeviceContext, mip_levels: u32) -> VkResult<vk::Sampler> {
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: if ctx.anisotropy { vk::TRUE } else { vk::FALSE },
        max_anisotropy: if ctx.anisotropy {
            ctx.properties.limits.max_sampler_anisotropy
        } else {
            1.0
        },
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        compare_op: vk::CompareOp::ALWAYS,
        min_lod: 0.0,
        max_lod: mip_levels as f32,
        ..Default::default()
    };
    unsafe { ctx.device.create_sampler(&ci, None) }.call("vkCreateSampler")
}

/// Sampler first, then the image it reads.
pub fn texture_records(sampler: vk::Sampler, tex: &GpuImage) -> Vec<Record> {
    let mut out = vec![Record::Sampler(sampler)];
    out.extend(tex.records());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_level_count() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(2, 1), 2);
        assert_eq!(mip_levels(512, 512), 10);
        assert_eq!(mip_levels(1024, 300), 11);
        assert_eq!(mip_levels(1023, 1), 10);
        assert_eq!(mip_levels(0, 0), 1);
    }

    #[test]
    fn mip_dims_halve_down_to_one() {
        let mut w = 300;
        let mut seen = vec![w];
        while w > 1 {
            w = next_mip_dim(w);
            seen.push(w);
        }
        assert_eq!(seen, vec![300, 150, 75, 37, 18, 9, 4, 2, 1]);
        assert_eq!(next_mip_dim(1), 1);
        // one level per halving step plus the base
        assert_eq!(seen.len() as u32, mip_levels(300, 1));
    }

    #[test]
    fn empty_upload_is_rejected_before_any_buffer() {
        let err = staging_size(&[], vk::BufferUsageFlags::INDEX_BUFFER).unwrap_err();
        assert!(matches!(err, VkError::EmptyUpload(u) if u == vk::BufferUsageFlags::INDEX_BUFFER));
        assert_eq!(
            staging_size(&[0u8; 12], vk::BufferUsageFlags::VERTEX_BUFFER).unwrap(),
            12
        );
    }

    #[test]
    fn supported_transitions() {
        use vk::ImageLayout as L;
        let up = transition_masks(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(up.dst_stage, vk::PipelineStageFlags::TRANSFER);
        let read = transition_masks(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(read.dst_access, vk::AccessFlags::SHADER_READ);
        let depth = transition_masks(L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(depth.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn other_transitions_are_rejected() {
        use vk::ImageLayout as L;
        let err = transition_masks(L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL).unwrap_err();
        assert!(matches!(
            err,
            VkError::UnsupportedLayoutTransition {
                from: L::SHADER_READ_ONLY_OPTIMAL,
                to: L::TRANSFER_DST_OPTIMAL
            }
        ));
        assert!(transition_masks(L::UNDEFINED, L::PRESENT_SRC_KHR).is_err());
    }

    #[test]
    fn blit_support_needs_linear_filter() {
        let yes = vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR,
            ..Default::default()
        };
        let no = vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::SAMPLED_IMAGE,
            linear_tiling_features: vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR,
            ..Default::default()
        };
        assert!(supports_linear_blit(&yes));
        assert!(!supports_linear_blit(&no));
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Depth and multisample color attachments. Rebuilt with every chain.

use ash::vk;

use crate::device::DeviceContext;
use crate::error::{VkError, VkResult};
use crate::memory::{create_image, GpuImage, ImageSpec};
use crate::teardown::{guarded, Record};

pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn pick_depth_format<F>(format_props: F) -> VkResult<vk::Format>
where
    F: Fn(vk::Format) -> vk::FormatProperties,
{
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| {
            format_props(f)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(VkError::NoDepthFormat)
}

pub fn has_stencil(format: vk::Format) -> bool {
    format == vk::Format::D32_SFLOAT_S8_UINT || format == vk::Format::D24_UNORM_S8_UINT
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Highest sample count both color and depth framebuffers support, no
/// higher than `cap`.
pub fn max_usable_samples(limits: &vk::PhysicalDeviceLimits, cap: u32) -> vk::SampleCountFlags {
    use vk::SampleCountFlags as S;
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        (64, S::TYPE_64),
        (32, S::TYPE_32),
        (16, S::TYPE_16),
        (8, S::TYPE_8),
        (4, S::TYPE_4),
        (2, S::TYPE_2),
    ]
    .into_iter()
    .find(|&(n, flag)| n <= cap && counts.contains(flag))
    .map(|(_, flag)| flag)
    .unwrap_or(S::TYPE_1)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RenderTargets {
    pub depth: GpuImage,
    /// Multisampled color, resolved into the swap-chain image. `None` at
    /// one sample.
    pub color: Option<GpuImage>,
    pub samples: vk::SampleCountFlags,
}

impl RenderTargets {
    pub unsafe fn new(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> VkResult<Self> {
        unsafe {
            guarded(ctx, |undo| -> VkResult<RenderTargets> {
                let depth = create_image(
                    ctx,
                    &ImageSpec {
                        extent,
                        format: depth_format,
                        mip_levels: 1,
                        samples,
                        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                        aspect: depth_aspect(depth_format),
                    },
                )?;
                depth.records().into_iter().rev().for_each(|r| undo.push(r));

                let color = if samples != vk::SampleCountFlags::TYPE_1 {
                    Some(create_image(
                        ctx,
                        &ImageSpec {
                            extent,
                            format: color_format,
                            mip_levels: 1,
                            samples,
                            usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                            aspect: vk::ImageAspectFlags::COLOR,
                        },
                    )?)
                } else {
                    None
                };

                Ok(RenderTargets {
                    depth,
                    color,
                    samples,
                })
            })
        }
    }

    pub fn records(&self) -> Vec<Record> {
        let mut out = self.depth.records().to_vec();
        if let Some(c) = &self.color {
            out.extend(c.records());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props_with(supported: &[vk::Format]) -> impl Fn(vk::Format) -> vk::FormatProperties + '_ {
        move |f| vk::FormatProperties {
            optimal_tiling_features: if supported.contains(&f) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    #[test]
    fn depth_format_prefers_d32() {
        let all = DEPTH_CANDIDATES;
        assert_eq!(pick_depth_format(props_with(&all)).unwrap(), vk::Format::D32_SFLOAT);
        let no_d32 = [vk::Format::D24_UNORM_S8_UINT, vk::Format::D32_SFLOAT_S8_UINT];
        assert_eq!(
            pick_depth_format(props_with(&no_d32)).unwrap(),
            vk::Format::D32_SFLOAT_S8_UINT
        );
        assert!(matches!(
            pick_depth_format(props_with(&[vk::Format::D16_UNORM])),
            Err(VkError::NoDepthFormat)
        ));
    }

    #[test]
    fn stencil_aspect_only_for_stencil_formats() {
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert!(depth_aspect(vk::Format::D24_UNORM_S8_UINT).contains(vk::ImageAspectFlags::STENCIL));
    }

    #[test]
    fn samples_limited_by_both_counts_and_cap() {
        use vk::SampleCountFlags as S;
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: S::TYPE_1 | S::TYPE_2 | S::TYPE_4 | S::TYPE_8,
            framebuffer_depth_sample_counts: S::TYPE_1 | S::TYPE_2 | S::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_samples(&limits, 64), S::TYPE_4);
        assert_eq!(max_usable_samples(&limits, 2), S::TYPE_2);
        assert_eq!(max_usable_samples(&limits, 1), S::TYPE_1);
    }
}

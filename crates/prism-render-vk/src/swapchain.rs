// SPDX-License-Identifier: CEPL-1.0
//! Swap-chain negotiation and creation.
//!
//! The `choose_*` functions are the whole selection policy and are pure over
//! the surface query results. `create_swap_chain` applies them and builds the
//! chain plus one color view per image; framebuffers are attached later by
//! the pipeline module once the render pass exists.

use ash::vk;
use tracing::info;

use crate::device::{DeviceContext, QueueFamilies};
use crate::error::{CallExt, VkError, VkResult};
use crate::memory::create_image_view;
use crate::surface::{SurfaceBinding, SurfaceSupport};
use crate::teardown::{guarded, Record};

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> VkResult<vk::SurfaceFormatKHR> {
    match formats {
        [] => Err(VkError::SurfaceIncompatible("surface reports no formats".into())),
        // A lone UNDEFINED entry means the surface takes anything.
        [only] if only.format == vk::Format::UNDEFINED => Ok(PREFERRED_FORMAT),
        _ => Ok(formats
            .iter()
            .copied()
            .find(|f| {
                f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
            })
            .unwrap_or(formats[0])),
    }
}

/// MAILBOX, then IMMEDIATE, then FIFO. `vsync` pins FIFO.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: desired
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: desired
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// `choose_extent`, or `None` while the surface has no area to draw into.
pub fn drawable_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    desired: vk::Extent2D,
) -> Option<vk::Extent2D> {
    let extent = choose_extent(caps, desired);
    (extent.width > 0 && extent.height > 0).then_some(extent)
}

/// `min_image_count`, clamped to `max_image_count` when that is non-zero.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count > 0 {
        caps.min_image_count.min(caps.max_image_count)
    } else {
        caps.min_image_count
    }
}

pub fn choose_sharing(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

#[derive(Clone, Debug)]
pub struct ChainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing: vk::SharingMode,
    pub queue_families: Vec<u32>,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

pub fn plan_chain(
    support: &SurfaceSupport,
    families: QueueFamilies,
    desired: vk::Extent2D,
    vsync: bool,
) -> VkResult<ChainPlan> {
    let caps = &support.capabilities;
    let (sharing, queue_families) = choose_sharing(families);
    Ok(ChainPlan {
        format: choose_surface_format(&support.formats)?,
        present_mode: choose_present_mode(&support.present_modes, vsync),
        extent: choose_extent(caps, desired),
        image_count: choose_image_count(caps),
        sharing,
        queue_families,
        pre_transform: caps.current_transform,
    })
}

pub fn format_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::A2B10G10R10_UNORM_PACK32 => "A2B10G10R10_UNORM",
        vk::Format::R16G16B16A16_SFLOAT => "R16G16B16A16_SFLOAT",
        _ => "other",
    }
}

pub fn color_space_name(cs: vk::ColorSpaceKHR) -> &'static str {
    match cs {
        vk::ColorSpaceKHR::SRGB_NONLINEAR => "SRGB_NONLINEAR",
        vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT => "EXTENDED_SRGB_LINEAR",
        vk::ColorSpaceKHR::HDR10_ST2084_EXT => "HDR10_ST2084",
        _ => "other",
    }
}

pub fn present_mode_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "other",
    }
}

#[derive(Clone, Debug, Default)]
pub struct SwapChainState {
    pub chain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl SwapChainState {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn is_complete(&self) -> bool {
        self.images.len() == self.image_views.len()
            && self.image_views.len() == self.framebuffers.len()
    }

    pub fn ensure_complete(&self) -> VkResult<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(VkError::IncompleteChain {
            images: self.images.len(),
            views: self.image_views.len(),
            framebuffers: self.framebuffers.len(),
        })
    }
}

pub unsafe fn create_swap_chain(
    ctx: &DeviceContext,
    surface: &SurfaceBinding,
    desired: vk::Extent2D,
    vsync: bool,
) -> VkResult<SwapChainState> {
    let support = unsafe { surface.query(ctx.physical) }?;
    let plan = plan_chain(&support, ctx.families(), desired, vsync)?;

    info!(
        "vk: swap chain {} / {}, present_mode {}, extent {}x{}, images {} (min={} max={})",
        format_name(plan.format.format),
        color_space_name(plan.format.color_space),
        present_mode_name(plan.present_mode),
        plan.extent.width,
        plan.extent.height,
        plan.image_count,
        support.capabilities.min_image_count,
        support.capabilities.max_image_count,
    );

    let info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface: surface.surface,
        min_image_count: plan.image_count,
        image_format: plan.format.format,
        image_color_space: plan.format.color_space,
        image_extent: plan.extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: plan.sharing,
        queue_family_index_count: plan.queue_families.len() as u32,
        p_queue_family_indices: plan.queue_families.as_ptr(),
        pre_transform: plan.pre_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode: plan.present_mode,
        clipped: vk::TRUE,
        ..Default::default()
    };

    let surface_err = |e: VkError| VkError::SurfaceIncompatible(e.to_string());
    unsafe {
        guarded(ctx, |undo| -> VkResult<SwapChainState> {
            let chain = ctx
                .swapchain_loader
                .create_swapchain(&info, None)
                .call("vkCreateSwapchainKHR")
                .map_err(surface_err)?;
            undo.push(Record::Swapchain(chain));
            let images = ctx
                .swapchain_loader
                .get_swapchain_images(chain)
                .call("vkGetSwapchainImagesKHR")
                .map_err(surface_err)?;

            let mut image_views = Vec::with_capacity(images.len());
            for &image in &images {
                let view = create_image_view(
                    ctx,
                    image,
                    plan.format.format,
                    vk::ImageAspectFlags::COLOR,
                    1,
                )
                .map_err(surface_err)?;
                undo.push(Record::ImageView(view));
                image_views.push(view);
            }

            Ok(SwapChainState {
                chain,
                format: plan.format.format,
                color_space: plan.format.color_space,
                extent: plan.extent,
                present_mode: plan.present_mode,
                images,
                image_views,
                framebuffers: Vec::new(),
            })
        })
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Per-frame sequencing: wait slot, acquire, update, submit, present, advance.
//!
//! The scheduler owns `current` and talks to the GPU only through
//! [`FrameBackend`], so the sequence can be driven by a scripted backend in
//! tests.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use prism_math::Trackball;
use tracing::{debug, trace};

use crate::device::DeviceContext;
use crate::error::{CallExt, VkResult};
use crate::lifecycle::{ChainBackend, ChainInfo, SwapchainLifecycle};
use crate::teardown::{guarded, Record};

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Matches the `UniformBufferObject` block in `mesh.vert` (std140, three
/// column-major mat4s).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

/// Camera state for a target of `extent`. `None` when the target has no
/// area, since the projection divides by its height.
pub fn frame_uniforms(camera: &Trackball, extent: vk::Extent2D) -> Option<UniformBufferObject> {
    let proj = camera.projection(extent.width, extent.height)?;
    Some(UniformBufferObject {
        model: camera.model().to_cols_array_2d(),
        view: camera.view().to_cols_array_2d(),
        proj: proj.to_cols_array_2d(),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// GPU side of one frame. `slot` is always the scheduler's current frame;
/// `image` is the index handed out by `acquire`.
pub trait FrameBackend: ChainBackend {
    fn wait_for_slot(&mut self, slot: usize) -> VkResult<()>;
    fn acquire(&mut self, slot: usize) -> VkResult<AcquireOutcome>;
    fn reset_slot(&mut self, slot: usize) -> VkResult<()>;
    fn extent(&self) -> vk::Extent2D;
    fn write_uniforms(&mut self, image: u32, ubo: &UniformBufferObject) -> VkResult<()>;
    /// Submit the command buffer recorded for `image`, waiting on the slot's
    /// acquire semaphore and arming its fence.
    fn submit(&mut self, slot: usize, image: u32) -> VkResult<()>;
    fn present(&mut self, slot: usize, image: u32) -> VkResult<PresentOutcome>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { image: u32 },
    /// Nothing was submitted; the chain was rebuilt and the same slot is
    /// retried next tick.
    AcquireOutOfDate,
    /// Submitted and presented (or refused by the surface), then rebuilt.
    PresentedThenRebuilt { image: u32 },
}

#[derive(Debug)]
pub struct FrameScheduler {
    current: usize,
    lifecycle: SwapchainLifecycle,
}

impl FrameScheduler {
    pub fn new(chain: ChainInfo) -> Self {
        Self {
            current: 0,
            lifecycle: SwapchainLifecycle::new(chain),
        }
    }

    pub fn current_frame(&self) -> usize {
        self.current
    }

    pub fn lifecycle(&self) -> &SwapchainLifecycle {
        &self.lifecycle
    }

    pub fn resize<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        extent: vk::Extent2D,
    ) -> VkResult<ChainInfo> {
        self.lifecycle.request_extent(extent);
        self.lifecycle.recreate(backend)
    }

    pub fn draw_frame<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        camera: &Trackball,
    ) -> VkResult<FrameStatus> {
        let slot = self.current;
        backend.wait_for_slot(slot)?;

        let (image, acquire_suboptimal) = match backend.acquire(slot)? {
            AcquireOutcome::Acquired { image, suboptimal } => (image, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!("vk: acquire out of date, rebuilding (frame {slot})");
                self.lifecycle.recreate(backend)?;
                return Ok(FrameStatus::AcquireOutOfDate);
            }
        };

        backend.reset_slot(slot)?;

        match frame_uniforms(camera, backend.extent()) {
            Some(ubo) => backend.write_uniforms(image, &ubo)?,
            None => trace!("vk: zero-area target, uniform update skipped"),
        }

        backend.submit(slot, image)?;
        let presented = backend.present(slot, image)?;
        self.current = (slot + 1) % MAX_FRAMES_IN_FLIGHT;

        if acquire_suboptimal || presented != PresentOutcome::Presented {
            debug!("vk: present {:?}, rebuilding", presented);
            self.lifecycle.recreate(backend)?;
            return Ok(FrameStatus::PresentedThenRebuilt { image });
        }
        Ok(FrameStatus::Presented { image })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameSyncSet {
    pub image_acquired: [vk::Semaphore; MAX_FRAMES_IN_FLIGHT],
    pub render_complete: [vk::Semaphore; MAX_FRAMES_IN_FLIGHT],
    pub in_flight: [vk::Fence; MAX_FRAMES_IN_FLIGHT],
}

impl FrameSyncSet {
    /// Fences start signaled so the first wait on each slot returns at once.
    pub unsafe fn new(ctx: &DeviceContext) -> VkResult<Self> {
        let sem_info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        unsafe {
            guarded(ctx, |undo| -> VkResult<FrameSyncSet> {
                let mut set = FrameSyncSet::default();
                for i in 0..MAX_FRAMES_IN_FLIGHT {
                    set.image_acquired[i] = ctx
                        .device
                        .create_semaphore(&sem_info, None)
                        .call("vkCreateSemaphore")?;
                    undo.push(Record::Semaphore(set.image_acquired[i]));
                    set.render_complete[i] = ctx
                        .device
                        .create_semaphore(&sem_info, None)
                        .call("vkCreateSemaphore")?;
                    undo.push(Record::Semaphore(set.render_complete[i]));
                    set.in_flight[i] = ctx
                        .device
                        .create_fence(&fence_info, None)
                        .call("vkCreateFence")?;
                    undo.push(Record::Fence(set.in_flight[i]));
                }
                Ok(set)
            })
        }
    }

    pub fn records(&self) -> Vec<Record> {
        let mut out = Vec::with_capacity(3 * MAX_FRAMES_IN_FLIGHT);
        for i in 0..MAX_FRAMES_IN_FLIGHT {
            out.push(Record::Semaphore(self.render_complete[i]));
            out.push(Record::Semaphore(self.image_acquired[i]));
            out.push(Record::Fence(self.in_flight[i]));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ubo_layout_is_three_mat4() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 3 * 64);
    }

    #[test]
    fn uniforms_follow_the_camera() {
        let cam = Trackball::default();
        let ubo = frame_uniforms(&cam, vk::Extent2D { width: 800, height: 600 }).unwrap();
        assert_eq!(ubo.model, cam.model().to_cols_array_2d());
        assert_eq!(ubo.view, cam.view().to_cols_array_2d());
        // Y flipped for Vulkan clip space.
        assert!(ubo.proj[1][1] < 0.0);
    }

    #[test]
    fn zero_area_has_no_uniforms() {
        let cam = Trackball::default();
        assert!(frame_uniforms(&cam, vk::Extent2D { width: 0, height: 0 }).is_none());
        assert!(frame_uniforms(&cam, vk::Extent2D { width: 640, height: 0 }).is_none());
    }
}

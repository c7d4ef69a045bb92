// SPDX-License-Identifier: CEPL-1.0
//! Ordered release of GPU objects.
//!
//! Handles are collected as `Record`s and released by a `Destroyer`. The
//! live backend destroys them through the device; tests record the order.

use ash::vk;

use crate::device::DeviceContext;
use crate::pipeline::PipelineState;
use crate::swapchain::SwapChainState;
use crate::targets::RenderTargets;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Record {
    Framebuffer(vk::Framebuffer),
    Pipeline(vk::Pipeline),
    PipelineLayout(vk::PipelineLayout),
    RenderPass(vk::RenderPass),
    ImageView(vk::ImageView),
    Swapchain(vk::SwapchainKHR),
    Image(vk::Image),
    Buffer(vk::Buffer),
    Memory(vk::DeviceMemory),
    Sampler(vk::Sampler),
    DescriptorPool(vk::DescriptorPool),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    Semaphore(vk::Semaphore),
    Fence(vk::Fence),
    CommandPool(vk::CommandPool),
}

pub trait Destroyer {
    /// # Safety
    /// The object must not be in use by the GPU.
    unsafe fn release(&self, record: Record);
}

impl Destroyer for DeviceContext {
    unsafe fn release(&self, record: Record) {
        let d = &self.device;
        unsafe {
            match record {
                Record::Framebuffer(h) => d.destroy_framebuffer(h, None),
                Record::Pipeline(h) => d.destroy_pipeline(h, None),
                Record::PipelineLayout(h) => d.destroy_pipeline_layout(h, None),
                Record::RenderPass(h) => d.destroy_render_pass(h, None),
                Record::ImageView(h) => d.destroy_image_view(h, None),
                Record::Swapchain(h) => self.swapchain_loader.destroy_swapchain(h, None),
                Record::Image(h) => d.destroy_image(h, None),
                Record::Buffer(h) => d.destroy_buffer(h, None),
                Record::Memory(h) => d.free_memory(h, None),
                Record::Sampler(h) => d.destroy_sampler(h, None),
                Record::DescriptorPool(h) => d.destroy_descriptor_pool(h, None),
                Record::DescriptorSetLayout(h) => d.destroy_descriptor_set_layout(h, None),
                Record::Semaphore(h) => d.destroy_semaphore(h, None),
                Record::Fence(h) => d.destroy_fence(h, None),
                Record::CommandPool(h) => d.destroy_command_pool(h, None),
            }
        }
    }
}

pub unsafe fn release_all<D: Destroyer + ?Sized>(d: &D, records: impl IntoIterator<Item = Record>) {
    for r in records {
        unsafe { d.release(r) };
    }
}

/// Objects created so far during a multi-step build. If the build fails
/// they are released newest first.
#[derive(Debug, Default)]
pub struct ReleaseStack {
    records: Vec<Record>,
}

impl ReleaseStack {
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub unsafe fn unwind<D: Destroyer + ?Sized>(&mut self, d: &D) {
        while let Some(r) = self.records.pop() {
            unsafe { d.release(r) };
        }
    }
}

/// Runs `build`; on error everything it pushed is released in reverse.
pub unsafe fn guarded<D, T, E>(
    d: &D,
    build: impl FnOnce(&mut ReleaseStack) -> Result<T, E>,
) -> Result<T, E>
where
    D: Destroyer + ?Sized,
{
    let mut stack = ReleaseStack::default();
    match build(&mut stack) {
        Ok(v) => Ok(v),
        Err(e) => {
            tracing::debug!("build failed, releasing {} objects", stack.len());
            unsafe { stack.unwind(d) };
            Err(e)
        }
    }
}

/// Everything tied to the current chain, in release order: framebuffers,
/// pipeline, pipeline layout, render pass, image views, swap chain, then the
/// depth and multisample attachments.
pub fn chain_teardown(
    chain: &SwapChainState,
    pipeline: &PipelineState,
    targets: &RenderTargets,
) -> Vec<Record> {
    let mut out = Vec::with_capacity(chain.framebuffers.len() + chain.image_views.len() + 10);
    out.extend(chain.framebuffers.iter().map(|&h| Record::Framebuffer(h)));
    out.push(Record::Pipeline(pipeline.pipeline));
    out.push(Record::PipelineLayout(pipeline.layout));
    out.push(Record::RenderPass(pipeline.render_pass));
    out.extend(chain.image_views.iter().map(|&h| Record::ImageView(h)));
    out.push(Record::Swapchain(chain.chain));
    out.extend(targets.records());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<Record>>);

    impl Destroyer for Recorder {
        unsafe fn release(&self, record: Record) {
            self.0.borrow_mut().push(record);
        }
    }

    #[test]
    fn failed_build_unwinds_newest_first() {
        let rec = Recorder::default();
        let out: Result<(), &str> = unsafe {
            guarded(&rec, |s| {
                s.push(Record::Buffer(vk::Buffer::from_raw(1)));
                s.push(Record::Memory(vk::DeviceMemory::from_raw(2)));
                s.push(Record::ImageView(vk::ImageView::from_raw(3)));
                Err("allocation failed")
            })
        };
        assert!(out.is_err());
        assert_eq!(
            *rec.0.borrow(),
            vec![
                Record::ImageView(vk::ImageView::from_raw(3)),
                Record::Memory(vk::DeviceMemory::from_raw(2)),
                Record::Buffer(vk::Buffer::from_raw(1)),
            ]
        );
    }

    #[test]
    fn successful_build_releases_nothing() {
        let rec = Recorder::default();
        let out: Result<u32, ()> = unsafe {
            guarded(&rec, |s| {
                s.push(Record::Fence(vk::Fence::from_raw(9)));
                Ok(7)
            })
        };
        assert_eq!(out, Ok(7));
        assert!(rec.0.borrow().is_empty());
    }

    #[test]
    fn chain_teardown_releases_leaf_first() {
        use crate::memory::GpuImage;

        let chain = SwapChainState {
            chain: vk::SwapchainKHR::from_raw(1),
            image_views: vec![vk::ImageView::from_raw(10), vk::ImageView::from_raw(11)],
            framebuffers: vec![vk::Framebuffer::from_raw(20), vk::Framebuffer::from_raw(21)],
            ..Default::default()
        };
        let pipeline = PipelineState {
            render_pass: vk::RenderPass::from_raw(30),
            descriptor_set_layout: vk::DescriptorSetLayout::from_raw(31),
            layout: vk::PipelineLayout::from_raw(32),
            pipeline: vk::Pipeline::from_raw(33),
        };
        let targets = RenderTargets {
            depth: GpuImage {
                handle: vk::Image::from_raw(40),
                view: vk::ImageView::from_raw(41),
                memory: vk::DeviceMemory::from_raw(42),
                ..Default::default()
            },
            color: None,
            samples: vk::SampleCountFlags::TYPE_1,
        };

        let rec = Recorder::default();
        unsafe { release_all(&rec, chain_teardown(&chain, &pipeline, &targets)) };
        assert_eq!(
            *rec.0.borrow(),
            vec![
                Record::Framebuffer(vk::Framebuffer::from_raw(20)),
                Record::Framebuffer(vk::Framebuffer::from_raw(21)),
                Record::Pipeline(vk::Pipeline::from_raw(33)),
                Record::PipelineLayout(vk::PipelineLayout::from_raw(32)),
                Record::RenderPass(vk::RenderPass::from_raw(30)),
                Record::ImageView(vk::ImageView::from_raw(10)),
                Record::ImageView(vk::ImageView::from_raw(11)),
                Record::Swapchain(vk::SwapchainKHR::from_raw(1)),
                Record::ImageView(vk::ImageView::from_raw(41)),
                Record::Image(vk::Image::from_raw(40)),
                Record::Memory(vk::DeviceMemory::from_raw(42)),
            ]
        );
        // The set layout outlives the chain.
        assert!(!rec
            .0
            .borrow()
            .contains(&Record::DescriptorSetLayout(vk::DescriptorSetLayout::from_raw(31))));
    }
}

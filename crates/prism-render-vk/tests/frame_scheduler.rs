// SPDX-License-Identifier: CEPL-1.0
//! Drives the real scheduler and lifecycle against a scripted GPU.

use std::collections::HashMap;

use ash::vk;
use prism_math::Trackball;
use prism_render_vk::{
    AcquireOutcome, ChainBackend, ChainInfo, ChainState, FrameBackend, FrameScheduler,
    FrameStatus, PresentOutcome, UniformBufferObject, VkError, VkResult, MAX_FRAMES_IN_FLIGHT,
};

#[derive(Clone, Debug, PartialEq)]
enum Event {
    WaitSlot(usize),
    Acquire(usize),
    ResetSlot(usize),
    Uniforms(u32),
    Submit { slot: usize, image: u32, cmd: u32 },
    Present(usize, u32),
    WaitIdle,
    DestroyChain,
    CreateChain(vk::Extent2D),
}

/// Fences, images and command buffers simulated on the CPU. GPU work for a
/// slot completes when that slot is waited on, or at device idle.
struct ScriptedGpu {
    events: Vec<Event>,
    extent: vk::Extent2D,
    image_count: u32,
    next_image: u32,
    /// Command buffer ids indexed by image; re-recording assigns new ids.
    command_buffers: Vec<u32>,
    recordings: u32,
    signaled: [bool; MAX_FRAMES_IN_FLIGHT],
    pending: [bool; MAX_FRAMES_IN_FLIGHT],
    max_outstanding: usize,
    last_acquired: Option<u32>,
    acquires: usize,
    acquire_script: HashMap<usize, VkResult<AcquireOutcome>>,
    presents: usize,
    present_script: HashMap<usize, PresentOutcome>,
}

impl ScriptedGpu {
    fn new(width: u32, height: u32, image_count: u32) -> Self {
        let mut gpu = Self {
            events: Vec::new(),
            extent: vk::Extent2D { width, height },
            image_count,
            next_image: 0,
            command_buffers: Vec::new(),
            recordings: 0,
            signaled: [true; MAX_FRAMES_IN_FLIGHT],
            pending: [false; MAX_FRAMES_IN_FLIGHT],
            max_outstanding: 0,
            last_acquired: None,
            acquires: 0,
            acquire_script: HashMap::new(),
            presents: 0,
            present_script: HashMap::new(),
        };
        gpu.record();
        gpu
    }

    fn info(&self) -> ChainInfo {
        ChainInfo {
            extent: self.extent,
            image_count: self.image_count,
        }
    }

    fn record(&mut self) {
        self.command_buffers = (0..self.image_count)
            .map(|i| self.recordings * 100 + i)
            .collect();
        self.recordings += 1;
    }

    fn outstanding(&self) -> usize {
        self.pending.iter().filter(|&&p| p).count()
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl ChainBackend for ScriptedGpu {
    fn wait_idle(&mut self) -> VkResult<()> {
        self.events.push(Event::WaitIdle);
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            if self.pending[slot] {
                self.pending[slot] = false;
                self.signaled[slot] = true;
            }
        }
        Ok(())
    }

    fn destroy_chain(&mut self) {
        assert_eq!(self.events.last(), Some(&Event::WaitIdle));
        assert_eq!(self.outstanding(), 0, "chain destroyed with GPU work in flight");
        self.events.push(Event::DestroyChain);
        self.command_buffers.clear();
    }

    fn create_chain(&mut self, desired: vk::Extent2D) -> VkResult<ChainInfo> {
        assert_eq!(self.events.last(), Some(&Event::DestroyChain));
        self.events.push(Event::CreateChain(desired));
        self.extent = desired;
        self.next_image = 0;
        self.record();
        Ok(self.info())
    }
}

impl FrameBackend for ScriptedGpu {
    fn wait_for_slot(&mut self, slot: usize) -> VkResult<()> {
        self.events.push(Event::WaitSlot(slot));
        if self.pending[slot] {
            self.pending[slot] = false;
            self.signaled[slot] = true;
        }
        assert!(self.signaled[slot]);
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> VkResult<AcquireOutcome> {
        self.events.push(Event::Acquire(slot));
        self.acquires += 1;
        if let Some(scripted) = self.acquire_script.remove(&self.acquires) {
            return scripted;
        }
        let image = self.next_image % self.image_count;
        self.next_image += 1;
        self.last_acquired = Some(image);
        Ok(AcquireOutcome::Acquired {
            image,
            suboptimal: false,
        })
    }

    fn reset_slot(&mut self, slot: usize) -> VkResult<()> {
        self.events.push(Event::ResetSlot(slot));
        assert!(self.signaled[slot], "reset of a fence that is still armed");
        self.signaled[slot] = false;
        Ok(())
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn write_uniforms(&mut self, image: u32, _ubo: &UniformBufferObject) -> VkResult<()> {
        assert!(self.extent.width > 0 && self.extent.height > 0);
        self.events.push(Event::Uniforms(image));
        Ok(())
    }

    fn submit(&mut self, slot: usize, image: u32) -> VkResult<()> {
        assert!(!self.signaled[slot] && !self.pending[slot], "fence not reset before submit");
        let cmd = self.command_buffers[image as usize];
        self.events.push(Event::Submit { slot, image, cmd });
        self.pending[slot] = true;
        self.max_outstanding = self.max_outstanding.max(self.outstanding());
        Ok(())
    }

    fn present(&mut self, slot: usize, image: u32) -> VkResult<PresentOutcome> {
        self.events.push(Event::Present(slot, image));
        self.presents += 1;
        Ok(self
            .present_script
            .remove(&self.presents)
            .unwrap_or(PresentOutcome::Presented))
    }
}

fn start(gpu: &ScriptedGpu) -> FrameScheduler {
    FrameScheduler::new(gpu.info())
}

#[test]
fn fences_bound_outstanding_frames() {
    let mut gpu = ScriptedGpu::new(800, 600, 3);
    let mut sched = start(&gpu);
    let cam = Trackball::default();

    for _ in 0..50 {
        assert!(matches!(
            sched.draw_frame(&mut gpu, &cam).unwrap(),
            FrameStatus::Presented { .. }
        ));
        assert!(gpu.outstanding() <= MAX_FRAMES_IN_FLIGHT);
    }
    assert_eq!(gpu.max_outstanding, MAX_FRAMES_IN_FLIGHT);
    assert_eq!(gpu.count(|e| matches!(e, Event::Submit { .. })), 50);
}

#[test]
fn submitted_buffer_matches_acquired_image() {
    // Three images, two slots: image and slot indices drift apart.
    let mut gpu = ScriptedGpu::new(800, 600, 3);
    let mut sched = start(&gpu);
    let cam = Trackball::default();

    for _ in 0..7 {
        let slot = sched.current_frame();
        let FrameStatus::Presented { image } = sched.draw_frame(&mut gpu, &cam).unwrap() else {
            panic!("frame not presented");
        };
        assert_eq!(gpu.last_acquired, Some(image));
        let submit = gpu
            .events
            .iter()
            .rev()
            .find(|e| matches!(e, Event::Submit { .. }))
            .cloned();
        assert_eq!(
            submit,
            Some(Event::Submit {
                slot,
                image,
                cmd: gpu.command_buffers[image as usize],
            })
        );
    }
    let slots_and_images: Vec<_> = gpu
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Submit { slot, image, .. } => Some((*slot, *image)),
            _ => None,
        })
        .collect();
    assert_eq!(
        slots_and_images,
        vec![(0, 0), (1, 1), (0, 2), (1, 0), (0, 1), (1, 2), (0, 0)]
    );
}

#[test]
fn frame_steps_run_in_order() {
    let mut gpu = ScriptedGpu::new(640, 480, 2);
    let mut sched = start(&gpu);
    sched.draw_frame(&mut gpu, &Trackball::default()).unwrap();
    assert_eq!(
        gpu.events,
        vec![
            Event::WaitSlot(0),
            Event::Acquire(0),
            Event::ResetSlot(0),
            Event::Uniforms(0),
            Event::Submit {
                slot: 0,
                image: 0,
                cmd: 0
            },
            Event::Present(0, 0),
        ]
    );
    assert_eq!(sched.current_frame(), 1);
}

#[test]
fn device_idle_precedes_destruction_on_resize() {
    let mut gpu = ScriptedGpu::new(800, 600, 2);
    let mut sched = start(&gpu);
    let cam = Trackball::default();
    sched.draw_frame(&mut gpu, &cam).unwrap();
    sched.draw_frame(&mut gpu, &cam).unwrap();
    assert_eq!(gpu.outstanding(), 2);

    let info = sched
        .resize(&mut gpu, vk::Extent2D { width: 1024, height: 768 })
        .unwrap();
    assert_eq!(info.extent, vk::Extent2D { width: 1024, height: 768 });

    let tail: Vec<_> = gpu.events.iter().rev().take(3).rev().cloned().collect();
    assert_eq!(
        tail,
        vec![
            Event::WaitIdle,
            Event::DestroyChain,
            Event::CreateChain(vk::Extent2D { width: 1024, height: 768 }),
        ]
    );
    assert_eq!(sched.lifecycle().state(), ChainState::Active);
    assert_eq!(sched.lifecycle().rebuilds(), 1);
}

#[test]
fn acquire_out_of_date_rebuilds_and_retries_same_slot() {
    let mut gpu = ScriptedGpu::new(800, 600, 3);
    gpu.acquire_script
        .insert(10, Ok(AcquireOutcome::OutOfDate));
    let mut sched = start(&gpu);
    let cam = Trackball::default();

    for _ in 0..9 {
        sched.draw_frame(&mut gpu, &cam).unwrap();
    }
    let before = sched.current_frame();
    let recordings = gpu.recordings;
    let mark = gpu.events.len();

    assert_eq!(
        sched.draw_frame(&mut gpu, &cam).unwrap(),
        FrameStatus::AcquireOutOfDate
    );
    assert_eq!(sched.current_frame(), before);
    assert_eq!(gpu.recordings, recordings + 1, "command buffers re-recorded");
    assert_eq!(
        gpu.events[mark..],
        [
            Event::WaitSlot(before),
            Event::Acquire(before),
            Event::WaitIdle,
            Event::DestroyChain,
            Event::CreateChain(vk::Extent2D { width: 800, height: 600 }),
        ]
    );

    // Next tick reuses the slot with the fresh buffers.
    let FrameStatus::Presented { image } = sched.draw_frame(&mut gpu, &cam).unwrap() else {
        panic!("retry not presented");
    };
    let submit = gpu
        .events
        .iter()
        .rev()
        .find(|e| matches!(e, Event::Submit { .. }))
        .cloned();
    assert_eq!(
        submit,
        Some(Event::Submit {
            slot: before,
            image,
            cmd: gpu.command_buffers[image as usize],
        })
    );
    assert!(gpu.command_buffers[image as usize] >= 100);
    assert_eq!(sched.current_frame(), (before + 1) % MAX_FRAMES_IN_FLIGHT);
}

#[test]
fn present_out_of_date_still_advances() {
    let mut gpu = ScriptedGpu::new(800, 600, 2);
    gpu.present_script.insert(1, PresentOutcome::OutOfDate);
    gpu.present_script.insert(2, PresentOutcome::Suboptimal);
    let mut sched = start(&gpu);
    let cam = Trackball::default();

    assert_eq!(
        sched.draw_frame(&mut gpu, &cam).unwrap(),
        FrameStatus::PresentedThenRebuilt { image: 0 }
    );
    assert_eq!(sched.current_frame(), 1);
    assert_eq!(
        sched.draw_frame(&mut gpu, &cam).unwrap(),
        FrameStatus::PresentedThenRebuilt { image: 0 }
    );
    assert_eq!(sched.current_frame(), 0);
    assert_eq!(sched.lifecycle().rebuilds(), 2);
}

#[test]
fn suboptimal_acquire_renders_then_rebuilds() {
    let mut gpu = ScriptedGpu::new(800, 600, 2);
    gpu.acquire_script.insert(
        1,
        Ok(AcquireOutcome::Acquired {
            image: 1,
            suboptimal: true,
        }),
    );
    let mut sched = start(&gpu);
    assert_eq!(
        sched.draw_frame(&mut gpu, &Trackball::default()).unwrap(),
        FrameStatus::PresentedThenRebuilt { image: 1 }
    );
    assert_eq!(gpu.count(|e| matches!(e, Event::Present(..))), 1);
    assert_eq!(gpu.count(|e| *e == Event::DestroyChain), 1);
}

#[test]
fn other_acquire_failures_propagate() {
    let mut gpu = ScriptedGpu::new(800, 600, 2);
    gpu.acquire_script.insert(
        1,
        Err(VkError::Vk {
            call: "vkAcquireNextImageKHR",
            result: vk::Result::ERROR_DEVICE_LOST,
        }),
    );
    let mut sched = start(&gpu);
    let err = sched.draw_frame(&mut gpu, &Trackball::default()).unwrap_err();
    assert!(!err.is_out_of_date());
    assert_eq!(gpu.count(|e| *e == Event::WaitIdle), 0);
    assert_eq!(gpu.count(|e| matches!(e, Event::ResetSlot(_))), 0);
    assert_eq!(sched.current_frame(), 0);
}

#[test]
fn zero_area_resize_skips_uniform_update() {
    let mut gpu = ScriptedGpu::new(800, 600, 2);
    let mut sched = start(&gpu);
    let cam = Trackball::default();

    let info = sched
        .resize(&mut gpu, vk::Extent2D { width: 0, height: 0 })
        .unwrap();
    assert_eq!(info.extent, vk::Extent2D { width: 0, height: 0 });
    assert_eq!(sched.lifecycle().state(), ChainState::Active);

    let mark = gpu.events.len();
    assert!(matches!(
        sched.draw_frame(&mut gpu, &cam).unwrap(),
        FrameStatus::Presented { .. }
    ));
    assert!(!gpu.events[mark..]
        .iter()
        .any(|e| matches!(e, Event::Uniforms(_))));
    assert_eq!(gpu.count(|e| matches!(e, Event::Submit { .. })), 1);

    // Restored size brings uniform updates back.
    sched
        .resize(&mut gpu, vk::Extent2D { width: 800, height: 600 })
        .unwrap();
    sched.draw_frame(&mut gpu, &cam).unwrap();
    assert_eq!(gpu.count(|e| matches!(e, Event::Uniforms(_))), 1);
}

#[test]
fn present_mode_switch_rebuilds_at_same_extent() {
    let mut gpu = ScriptedGpu::new(800, 600, 3);
    let mut sched = start(&gpu);
    let cam = Trackball::default();
    sched.draw_frame(&mut gpu, &cam).unwrap();
    let slot = sched.current_frame();

    let desired = sched.lifecycle().desired();
    sched.resize(&mut gpu, desired).unwrap();
    assert_eq!(
        gpu.events[gpu.events.len() - 3..],
        [
            Event::WaitIdle,
            Event::DestroyChain,
            Event::CreateChain(vk::Extent2D { width: 800, height: 600 }),
        ]
    );
    assert_eq!(sched.lifecycle().rebuilds(), 1);
    assert_eq!(sched.current_frame(), slot);

    // the next frame runs from the re-recorded buffers
    sched.draw_frame(&mut gpu, &cam).unwrap();
    let last_cmd = gpu.events.iter().rev().find_map(|e| match e {
        Event::Submit { cmd, .. } => Some(*cmd),
        _ => None,
    });
    assert!(last_cmd.is_some_and(|c| c >= 100));
}

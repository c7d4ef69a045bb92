// SPDX-License-Identifier: CEPL-1.0
//! Vulkan swap-chain lifecycle and frame synchronization.
//!
//! Leaf-first: `device` and `surface` bind the GPU to a window, `swapchain`
//! negotiates the chain, `pipeline`/`targets` build what renders into it,
//! `memory`/`upload` own buffers and images, and `frame`/`lifecycle` drive
//! the per-frame loop and chain recreation. `renderer` ties it together.

pub mod device;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod memory;
pub mod pipeline;
pub mod renderer;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod targets;
pub mod teardown;
pub mod upload;

pub use error::{VkError, VkResult};
pub use frame::{
    frame_uniforms, AcquireOutcome, FrameBackend, FrameScheduler, FrameStatus, PresentOutcome,
    UniformBufferObject, MAX_FRAMES_IN_FLIGHT,
};
pub use lifecycle::{ChainBackend, ChainInfo, ChainState, SwapchainLifecycle};
pub use renderer::VkRenderer;

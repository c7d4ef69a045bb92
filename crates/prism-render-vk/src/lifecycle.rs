// SPDX-License-Identifier: CEPL-1.0
//! Swap-chain recreation as a small state machine.
//!
//! ACTIVE -> TEARING_DOWN (device idle, release chain objects) ->
//! REBUILDING (new chain and everything sized from it) -> ACTIVE.

use ash::vk;
use tracing::info;

use crate::error::VkResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainInfo {
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

/// The operations recreation is made of. The live implementation lives in
/// `renderer.rs`.
pub trait ChainBackend {
    fn wait_idle(&mut self) -> VkResult<()>;
    /// Release framebuffers, pipeline, pipeline layout, render pass, image
    /// views, the chain, then depth/multisample attachments.
    fn destroy_chain(&mut self);
    /// Build a chain for `desired` and everything that depends on it, and
    /// re-record the command buffers.
    fn create_chain(&mut self, desired: vk::Extent2D) -> VkResult<ChainInfo>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainState {
    Active,
    TearingDown,
    Rebuilding,
}

#[derive(Debug)]
pub struct SwapchainLifecycle {
    state: ChainState,
    desired: vk::Extent2D,
    current: ChainInfo,
    rebuilds: u64,
}

impl SwapchainLifecycle {
    /// Starts ACTIVE around a chain that was built during init.
    pub fn new(current: ChainInfo) -> Self {
        Self {
            state: ChainState::Active,
            desired: current.extent,
            current,
            rebuilds: 0,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn current(&self) -> ChainInfo {
        self.current
    }

    pub fn desired(&self) -> vk::Extent2D {
        self.desired
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn request_extent(&mut self, desired: vk::Extent2D) {
        self.desired = desired;
    }

    pub fn recreate<B: ChainBackend + ?Sized>(&mut self, backend: &mut B) -> VkResult<ChainInfo> {
        self.state = ChainState::TearingDown;
        backend.wait_idle()?;
        backend.destroy_chain();

        self.state = ChainState::Rebuilding;
        let info = backend.create_chain(self.desired)?;

        let old = self.current;
        self.current = info;
        self.rebuilds += 1;
        self.state = ChainState::Active;
        info!(
            "vk: swap chain rebuilt {}x{} -> {}x{}, images {} -> {}",
            old.extent.width,
            old.extent.height,
            info.extent.width,
            info.extent.height,
            old.image_count,
            info.image_count
        );
        Ok(info)
    }
}

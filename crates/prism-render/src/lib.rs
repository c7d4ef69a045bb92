// SPDX-License-Identifier: CEPL-1.0
use std::hash::{Hash, Hasher};

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use prism_core::ResourcePaths;
use prism_math::Trackball;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    fn bits(&self) -> [u32; 8] {
        [
            self.pos[0].to_bits(),
            self.pos[1].to_bits(),
            self.pos[2].to_bits(),
            self.color[0].to_bits(),
            self.color[1].to_bits(),
            self.color[2].to_bits(),
            self.tex_coord[0].to_bits(),
            self.tex_coord[1].to_bits(),
        ]
    }
}

// Bitwise equality so vertices can key a dedup map.
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

/// Tightly packed RGBA8 pixels.
#[derive(Clone, Debug)]
pub struct ImageData {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ImageData {
    pub const CHANNELS: u32 = 4;

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * Self::CHANNELS as usize
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DevicePolicy {
    /// First discrete or integrated GPU in enumeration order.
    #[default]
    FirstGpu,
    /// A discrete GPU if there is one, otherwise the first integrated GPU.
    PreferDiscrete,
}

/// Everything a backend needs besides the window.
#[derive(Clone, Debug)]
pub struct RenderDesc {
    pub clear_color: [f32; 4],
    pub vsync: bool,
    /// Upper bound on MSAA samples; the device limit still applies.
    pub max_samples: u32,
    pub validation: bool,
    pub device_policy: DevicePolicy,
    pub mipmaps: bool,
    pub fov_degrees: f32,
    pub vertex_shader: String,
    pub fragment_shader: String,
    pub paths: ResourcePaths,
    pub mesh: MeshData,
    pub texture: ImageData,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        desc: RenderDesc,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    /// Switches present mode, rebuilding the chain when it changes.
    fn set_vsync(&mut self, on: bool) -> Result<()>;
    fn camera_mut(&mut self) -> &mut Trackball;
    fn wait_idle(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn vertex_equality_covers_every_attribute() {
        let a = Vertex {
            pos: [0.0, 1.0, 2.0],
            color: [1.0, 1.0, 1.0],
            tex_coord: [0.5, 0.5],
        };
        let mut b = a;
        assert_eq!(a, b);
        b.tex_coord[1] = 0.25;
        assert_ne!(a, b);

        let set: HashSet<Vertex> = [a, a, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
    }

    #[test]
    fn zero_area_detection() {
        assert!(RenderSize { width: 0, height: 10 }.is_zero_area());
        assert!(!RenderSize { width: 1, height: 1 }.is_zero_area());
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Window collaborator. Everything windowing goes through winit; this crate
//! pins the version and keeps the few helpers the app needs.
pub use winit;

use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowAttributes};

/// Attributes for a resizable window with an initial drawable size of
/// `width`x`height` physical pixels.
pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width, height))
        .with_resizable(true)
}

/// Current drawable size in physical pixels. Either component may be 0 while
/// the window is minimized.
pub fn drawable_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    tracing::debug!("drawable size {}x{}", size.width, size.height);
    (size.width, size.height)
}

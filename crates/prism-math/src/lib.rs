// SPDX-License-Identifier: CEPL-1.0
pub mod trackball;

pub use glam;
pub use trackball::Trackball;

// SPDX-License-Identifier: CEPL-1.0
//! Virtual trackball camera.
//!
//! Pointer deltas come in as window pixels; the camera keeps a model matrix
//! (object rotation) and a view matrix (eye placement + pan). Projection is
//! derived per call from the current target size.

use glam::{Mat3, Mat4, Vec2, Vec3};

const NEAR: f32 = 0.1;
const FAR: f32 = 10.0;

#[derive(Clone, Debug)]
pub struct Trackball {
    size: f32,
    fov_y: f32,
    eye: Vec3,
    origin: Vec3,
    up: Vec3,
    model: Mat4,
    view: Mat4,
}

impl Default for Trackball {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Trackball {
    /// `size` is the radius of the virtual ball in normalized window units.
    pub fn new(size: f32) -> Self {
        let mut t = Self {
            size,
            fov_y: 90f32.to_radians(),
            eye: Vec3::ZERO,
            origin: Vec3::ZERO,
            up: Vec3::Y,
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        };
        t.reset();
        t
    }

    pub fn reset(&mut self) {
        self.eye = Vec3::new(0.0, 0.0, -2.0);
        self.origin = Vec3::ZERO;
        self.up = Vec3::Y;
        self.model = Mat4::IDENTITY;
        self.view = Mat4::look_at_rh(self.eye, self.origin, self.up);
    }

    pub fn set_fov_degrees(&mut self, deg: f32) {
        self.fov_y = deg.clamp(1.0, 179.0).to_radians();
    }

    pub fn model(&self) -> Mat4 {
        self.model
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    /// Vulkan-style projection (0..1 depth, Y down) for a `width`x`height`
    /// target. `None` when either dimension is zero.
    pub fn projection(&self, width: u32, height: u32) -> Option<Mat4> {
        if width == 0 || height == 0 {
            return None;
        }
        let aspect = width as f32 / height as f32;
        let mut proj = Mat4::perspective_rh(self.fov_y, aspect, NEAR, FAR);
        proj.y_axis.y *= -1.0;
        Some(proj)
    }

    /// Wheel zoom: moves the eye along z by `steps / 100`, staying between
    /// the near and far planes so it never lands on the origin.
    pub fn zoom(&mut self, steps: f32) {
        self.eye.z = (self.eye.z + steps / 100.0).clamp(-FAR, -NEAR);
        self.view = Mat4::look_at_rh(self.eye, self.origin, self.up);
    }

    /// Pan by a pointer delta in pixels.
    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.view *= Mat4::from_translation(Vec3::new(-dx / 1000.0, dy / 1000.0, 0.0));
    }

    /// Rotate the model by dragging from `pos - delta` to `pos` inside a
    /// `width`x`height` window.
    pub fn rotate(&mut self, pos: Vec2, delta: Vec2, width: u32, height: u32) {
        if delta == Vec2::ZERO || width == 0 || height == 0 {
            return;
        }
        let old = pos - delta;
        let p1 = self.project_to_sphere(to_snorm(old, width, height));
        let p2 = self.project_to_sphere(to_snorm(pos, width, height));

        let axis = p1.cross(p2);
        if axis.length_squared() <= f32::EPSILON {
            return;
        }
        let camera_to_object =
            (Mat3::from_mat4(self.view) * Mat3::from_mat4(self.model)).inverse();
        let axis_obj = (camera_to_object * axis).normalize_or_zero();
        if axis_obj == Vec3::ZERO {
            return;
        }
        let angle = p1.dot(p2).clamp(-1.0, 1.0).acos();
        self.model *= Mat4::from_axis_angle(axis_obj, angle);
    }

    /// Point on the ball (or the hyperbolic sheet outside it), normalized.
    pub fn project_to_sphere(&self, xy: Vec2) -> Vec3 {
        let d = xy.length();
        let r = self.size;
        let z = if d < r * std::f32::consts::SQRT_2 / 2.0 {
            (r * r - d * d).sqrt()
        } else {
            r * r / (2.0 * d)
        };
        Vec3::new(xy.x, xy.y, z).normalize()
    }
}

fn to_snorm(p: Vec2, width: u32, height: u32) -> Vec2 {
    Vec2::new(
        p.x * 2.0 / width as f32 - 1.0,
        p.y * 2.0 / height as f32 - 1.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn projection_needs_non_zero_extent() {
        let cam = Trackball::default();
        assert!(cam.projection(800, 0).is_none());
        assert!(cam.projection(0, 600).is_none());
        assert!(cam.projection(800, 600).is_some());
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let cam = Trackball::default();
        let proj = cam.projection(100, 100).unwrap();
        assert!(proj.y_axis.y < 0.0);
        // 90 degree fov, square target
        assert_relative_eq!(proj.x_axis.x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn zoom_moves_eye_along_z() {
        let mut cam = Trackball::default();
        cam.zoom(50.0);
        assert_relative_eq!(cam.eye().z, -1.5, epsilon = 1e-6);
        cam.reset();
        assert_relative_eq!(cam.eye().z, -2.0, epsilon = 1e-6);
    }

    #[test]
    fn zoom_stops_short_of_the_origin() {
        let mut cam = Trackball::default();
        for _ in 0..500 {
            cam.zoom(1.0);
        }
        assert!(cam.view().is_finite());
        assert_relative_eq!(cam.eye().z, -NEAR, epsilon = 1e-6);

        cam.zoom(-1.0e6);
        assert!(cam.view().is_finite());
        assert_relative_eq!(cam.eye().z, -FAR, epsilon = 1e-6);
    }

    #[test]
    fn rotate_without_motion_keeps_model() {
        let mut cam = Trackball::default();
        cam.rotate(Vec2::new(10.0, 10.0), Vec2::ZERO, 800, 600);
        assert_eq!(cam.model(), Mat4::IDENTITY);
        cam.rotate(Vec2::new(10.0, 10.0), Vec2::new(3.0, 1.0), 800, 0);
        assert_eq!(cam.model(), Mat4::IDENTITY);
    }

    #[test]
    fn rotate_changes_model_but_stays_orthonormal() {
        let mut cam = Trackball::default();
        cam.rotate(Vec2::new(420.0, 300.0), Vec2::new(20.0, 0.0), 800, 600);
        let m = cam.model();
        assert_ne!(m, Mat4::IDENTITY);
        assert_relative_eq!(m.determinant(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn sphere_projection_is_unit_length() {
        let cam = Trackball::new(0.8);
        for xy in [Vec2::ZERO, Vec2::new(0.1, 0.2), Vec2::new(1.0, -1.0)] {
            assert_relative_eq!(cam.project_to_sphere(xy).length(), 1.0, epsilon = 1e-5);
        }
        assert_relative_eq!(cam.project_to_sphere(Vec2::ZERO).z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn pan_translates_view() {
        let mut cam = Trackball::default();
        let before = cam.view();
        cam.translate(100.0, 0.0);
        assert_ne!(before, cam.view());
    }
}

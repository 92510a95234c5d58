//! Free-flying perspective camera.
//!
//! The ray generation shader needs to walk clip space backwards, so the
//! camera hands out inverse matrices alongside the usual view and
//! projection. The projection carries the Vulkan Y flip, and its inverse
//! is taken after the flip so both directions agree on orientation.

use glam::{Mat4, Quat, Vec3};

#[derive(Clone, Debug)]
pub struct Camera {
    /// World-space position.
    pub position: Vec3,
    /// World-space orientation; identity looks down negative Z.
    pub rotation: Quat,
    fov_y: f32,
    aspect: f32,
    near: f32,
    far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            rotation: Quat::IDENTITY,
            fov_y: 50.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all perspective parameters at once.
    pub fn set_perspective(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32) {
        self.fov_y = fov_y;
        self.aspect = aspect;
        self.near = near;
        self.far = far;
    }

    /// Tracks the swapchain aspect ratio, leaving the rest untouched.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    /// Projection matrix with the Y axis flipped for Vulkan clip space.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn inverse_view_matrix(&self) -> Mat4 {
        self.view_matrix().inverse()
    }

    pub fn inverse_projection_matrix(&self) -> Mat4 {
        self.projection_matrix().inverse()
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Turns the camera toward `target` without moving it.
    pub fn look_at(&mut self, target: Vec3) {
        let to_target = target - self.position;
        if to_target.length_squared() > 0.0 {
            self.rotation = Quat::from_rotation_arc(Vec3::NEG_Z, to_target.normalize());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_y_scale_is_negative() {
        let camera = Camera::new();
        assert!(camera.projection_matrix().y_axis.y < 0.0);
    }

    #[test]
    fn inverse_matrices_undo_their_forward_pair() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(1.0, 2.0, 3.0);
        camera.look_at(Vec3::ZERO);

        let near_identity = |m: Mat4| m.abs_diff_eq(Mat4::IDENTITY, 1e-4);
        assert!(near_identity(camera.view_matrix() * camera.inverse_view_matrix()));
        assert!(near_identity(
            camera.projection_matrix() * camera.inverse_projection_matrix()
        ));
    }

    #[test]
    fn set_aspect_changes_only_the_aspect_term() {
        let mut camera = Camera::new();
        camera.set_perspective(1.2, 1.0, 0.5, 50.0);
        camera.set_aspect(2.0);

        let mut expected = Mat4::perspective_rh(1.2, 2.0, 0.5, 50.0);
        expected.y_axis.y *= -1.0;
        assert!(camera.projection_matrix().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn look_at_faces_the_target() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(0.0, 0.0, 10.0);
        camera.look_at(Vec3::ZERO);
        assert!(camera.forward().abs_diff_eq(Vec3::NEG_Z, 1e-5));
    }

    #[test]
    fn right_stays_perpendicular_to_forward() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(4.0, 1.0, -3.0);
        camera.look_at(Vec3::new(0.0, 2.0, 0.0));
        assert!(camera.forward().dot(camera.right()).abs() < 1e-5);
    }
}

//! GPU-facing uniform data.
//!
//! [`GlobalUbo`] mirrors the GLSL std140 uniform block byte for byte.
//! `#[repr(C)]` pins the field layout, and `Pod`/`Zeroable` let frame
//! slots copy the struct into mapped memory as plain bytes.

use bytemuck::{Pod, Zeroable};
use glam::{IVec4, Mat4, Vec4};

use raytracer_scene::Camera;

/// Global per-frame uniform data, shared by all three passes.
///
/// Matches the GLSL `GlobalUbo` uniform block at set 0, binding 0. The
/// fragment shaders reconstruct primary rays by walking clip-space
/// positions backwards through the inverse matrices, so the inverses
/// are computed once on the CPU rather than per fragment.
///
/// # Layout
///
/// Four `mat4`s at offsets 0/64/128/192, then two 16-byte vectors,
/// 288 bytes in total. std140 adds no padding here because every field
/// is already 16-byte aligned.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GlobalUbo {
    /// View to clip, with the Vulkan Y flip applied.
    pub projection: Mat4,
    /// World to view.
    pub view: Mat4,
    /// View back to world.
    pub inverse_view: Mat4,
    /// Clip back to view.
    pub inverse_projection: Mat4,
    /// Camera world position. The w component is unused and kept at 0.
    pub camera_position: Vec4,
    /// x: surface width, y: surface height, z: rays per pixel,
    /// w: frame number (drives the accumulation weight and RNG seed).
    pub screen_info: IVec4,
}

impl GlobalUbo {
    /// Byte size, which the shader block must agree with.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Builds the per-frame uniform data from the camera and frame state.
    pub fn new(
        camera: &Camera,
        width: u32,
        height: u32,
        rays_per_pixel: u32,
        frame_number: u64,
    ) -> Self {
        Self {
            projection: camera.projection_matrix(),
            view: camera.view_matrix(),
            inverse_view: camera.inverse_view_matrix(),
            inverse_projection: camera.inverse_projection_matrix(),
            camera_position: Vec4::new(camera.position.x, camera.position.y, camera.position.z, 0.0),
            screen_info: IVec4::new(
                width as i32,
                height as i32,
                rays_per_pixel as i32,
                frame_number as i32,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_global_ubo_size() {
        // Four mat4s plus two 16-byte vectors, no padding.
        assert_eq!(GlobalUbo::SIZE, 288);
    }

    #[test]
    fn test_global_ubo_alignment() {
        // Mat4 forces the 16-byte alignment std140 expects.
        assert_eq!(std::mem::align_of::<GlobalUbo>(), 16);
    }

    #[test]
    fn test_global_ubo_bytes() {
        let ubo = GlobalUbo::default();
        let bytes: &[u8] = bytemuck::bytes_of(&ubo);
        assert_eq!(bytes.len(), GlobalUbo::SIZE);
    }

    #[test]
    fn test_global_ubo_new() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(0.0, 1.0, -6.0);
        camera.set_perspective(50.0_f32.to_radians(), 800.0 / 600.0, 0.1, 100.0);

        let ubo = GlobalUbo::new(&camera, 800, 600, 1, 42);

        assert_eq!(ubo.projection, camera.projection_matrix());
        assert_eq!(ubo.view, camera.view_matrix());
        assert_eq!(ubo.camera_position, Vec4::new(0.0, 1.0, -6.0, 0.0));
        assert_eq!(ubo.screen_info, IVec4::new(800, 600, 1, 42));
    }

    #[test]
    fn test_global_ubo_inverses_match() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(3.0, 2.0, 1.0);
        camera.look_at(Vec3::ZERO);
        camera.set_perspective(50.0_f32.to_radians(), 1.5, 0.1, 100.0);

        let ubo = GlobalUbo::new(&camera, 900, 600, 1, 0);

        let view_round_trip = ubo.view * ubo.inverse_view;
        assert!(view_round_trip.abs_diff_eq(Mat4::IDENTITY, 1e-4));

        let proj_round_trip = ubo.projection * ubo.inverse_projection;
        assert!(proj_round_trip.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn test_frame_number_truncates_to_lane() {
        // The shader receives the low 32 bits of the frame counter.
        let camera = Camera::new();
        let ubo = GlobalUbo::new(&camera, 1, 1, 1, u64::from(u32::MAX) + 5);
        assert_eq!(ubo.screen_info.w, 4);
    }
}

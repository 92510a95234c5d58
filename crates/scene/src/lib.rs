//! Scene content for the ray tracer: the camera and the sphere list the
//! trace pass consumes.

pub mod camera;
pub mod sphere;

pub use camera::Camera;
pub use sphere::{Sphere, SphereMaterial, demo_scene, scene_bytes};

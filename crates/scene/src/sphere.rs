//! Sphere primitives for the ray-traced scene.
//!
//! Spheres are uploaded verbatim into a storage buffer read by the trace
//! shader, so the structs here are `#[repr(C)]` and mirror the shader-side
//! declaration field for field. Each `Vec4` packs a color or position in
//! xyz and a scalar parameter in w.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Surface properties of a ray-traced sphere.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SphereMaterial {
    /// Albedo in xyz, smoothness in w.
    pub color_smoothness: Vec4,
    /// Emitted color in xyz, emission strength in w.
    pub emission_strength: Vec4,
    /// Specular color in xyz, specular reflection probability in w.
    pub specular_probability: Vec4,
}

impl SphereMaterial {
    /// A matte surface with the given albedo and no emission.
    pub fn diffuse(color: Vec3, smoothness: f32) -> Self {
        Self {
            color_smoothness: color.extend(smoothness),
            emission_strength: Vec4::ZERO,
            specular_probability: Vec4::ZERO,
        }
    }

    /// A purely emissive surface; the color is radiated at the given strength.
    pub fn emissive(color: Vec3, strength: f32) -> Self {
        Self {
            color_smoothness: Vec4::ZERO,
            emission_strength: color.extend(strength),
            specular_probability: Vec4::ZERO,
        }
    }

    /// Adds a specular lobe with the given tint and sampling probability.
    pub fn with_specular(mut self, color: Vec3, probability: f32) -> Self {
        self.specular_probability = color.extend(probability);
        self
    }
}

/// A sphere with its material, laid out for direct storage buffer upload.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Sphere {
    /// Center in xyz, radius in w.
    pub position_radius: Vec4,
    /// Surface properties.
    pub material: SphereMaterial,
}

impl Sphere {
    /// Creates a sphere at `position` with the given radius and material.
    pub fn new(position: Vec3, radius: f32, material: SphereMaterial) -> Self {
        Self {
            position_radius: position.extend(radius),
            material,
        }
    }

    /// Returns this sphere's center.
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position_radius.truncate()
    }

    /// Returns this sphere's radius.
    #[inline]
    pub fn radius(&self) -> f32 {
        self.position_radius.w
    }
}

/// Returns the demo scene: two lit spheres under a single emissive sphere
/// acting as the light source.
pub fn demo_scene() -> Vec<Sphere> {
    let red = Sphere::new(
        Vec3::new(-2.0, 1.0, 0.0),
        1.0,
        SphereMaterial::diffuse(Vec3::new(0.9, 0.0, 0.1), 0.0)
            .with_specular(Vec3::ONE, 0.5),
    );

    let green = Sphere::new(
        Vec3::new(2.5, 1.0, 0.0),
        2.0,
        SphereMaterial::diffuse(Vec3::new(0.1, 0.8, 0.1), 1.0)
            .with_specular(Vec3::ONE, 0.9),
    );

    let light = Sphere::new(
        Vec3::new(0.0, 5.0, 0.0),
        0.5,
        SphereMaterial::emissive(Vec3::ONE, 1.0),
    );

    vec![red, green, light]
}

/// Returns the raw bytes of a sphere slice, ready for buffer upload.
pub fn scene_bytes(spheres: &[Sphere]) -> &[u8] {
    bytemuck::cast_slice(spheres)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_gpu_layout() {
        // Four packed vec4s per sphere, no implicit padding
        assert_eq!(std::mem::size_of::<SphereMaterial>(), 48);
        assert_eq!(std::mem::size_of::<Sphere>(), 64);
        assert_eq!(std::mem::align_of::<Sphere>(), 16);
    }

    #[test]
    fn test_scene_bytes_length() {
        let spheres = demo_scene();
        let bytes = scene_bytes(&spheres);
        assert_eq!(bytes.len(), spheres.len() * std::mem::size_of::<Sphere>());
    }

    #[test]
    fn test_demo_scene_contents() {
        let spheres = demo_scene();
        assert_eq!(spheres.len(), 3);

        assert_eq!(spheres[0].position(), Vec3::new(-2.0, 1.0, 0.0));
        assert_eq!(spheres[0].radius(), 1.0);
        assert_eq!(
            spheres[0].material.color_smoothness,
            Vec4::new(0.9, 0.0, 0.1, 0.0)
        );
        assert_eq!(
            spheres[0].material.specular_probability,
            Vec4::new(1.0, 1.0, 1.0, 0.5)
        );

        assert_eq!(spheres[1].radius(), 2.0);
        assert_eq!(
            spheres[1].material.specular_probability,
            Vec4::new(1.0, 1.0, 1.0, 0.9)
        );

        // The third sphere is the scene's only light
        assert_eq!(
            spheres[2].material.emission_strength,
            Vec4::new(1.0, 1.0, 1.0, 1.0)
        );
        assert_eq!(spheres[2].material.color_smoothness, Vec4::ZERO);
    }
}

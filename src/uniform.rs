// Per-frame transform uniforms
//
// Rewritten every frame from wall-clock time; one buffer per swapchain image.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Model spins 90 degrees per second about +Z, seen from (2, 2, 2).
    pub fn new(elapsed_secs: f32, width: u32, height: u32) -> Self {
        let model = Mat4::from_rotation_z(elapsed_secs * 90f32.to_radians());
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);

        let aspect = width as f32 / height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // Vulkan clip space has Y pointing down
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

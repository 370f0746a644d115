//! Uniform buffer layout for the vertex shader.
//!
//! The vertex shader declares
//!
//! ```glsl
//! layout(binding = 0) uniform UniformBufferObject {
//!     mat4 model;
//!     mat4 view;
//!     mat4 proj;
//! } ubo;
//! ```
//!
//! Three column-major `mat4`s with no padding, 192 bytes in total.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Degrees per second the model turns around +Z.
pub const SPIN_DEGREES_PER_SEC: f32 = 90.0;

const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);
const FOV_Y_DEGREES: f32 = 45.0;
const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 10.0;

/// Model, view and projection matrices.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Matrices for the spinning model `elapsed_secs` after start, viewed
    /// through a framebuffer of `width` x `height` pixels.
    pub fn spin(elapsed_secs: f32, width: u32, height: u32) -> Self {
        let model = Mat4::from_rotation_z(elapsed_secs * SPIN_DEGREES_PER_SEC.to_radians());
        let view = Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z);

        let aspect = width as f32 / height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
        // Vulkan clip space has +Y pointing down.
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

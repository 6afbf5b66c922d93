// SPDX-License-Identifier: CEPL-1.0
//! Camera and model transforms for the per-image uniform buffer.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

pub use glam;

/// Degrees per second the model spins about +Z.
pub const SPIN_DEG_PER_SEC: f32 = 90.0;
pub const FOV_Y_DEG: f32 = 45.0;
pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 10.0;
pub const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);

/// Matches `layout(binding = 0) uniform UniformBufferObject` in the vertex shader.
/// Each `mat4` is 64 bytes so std140 alignment holds without padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Transforms for `elapsed` seconds since start, rendered into a `width`x`height` target.
    pub fn at(elapsed: f32, width: u32, height: u32) -> Self {
        Self {
            model: spin(elapsed),
            view: Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z),
            proj: projection(width, height),
        }
    }
}

impl Default for UniformBufferObject {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

pub fn spin(elapsed: f32) -> Mat4 {
    Mat4::from_rotation_z((elapsed * SPIN_DEG_PER_SEC).to_radians())
}

/// Right-handed perspective with a [0, 1] depth range and Y pointing down in clip space.
pub fn projection(width: u32, height: u32) -> Mat4 {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    let mut proj = Mat4::perspective_rh(FOV_Y_DEG.to_radians(), aspect, Z_NEAR, Z_FAR);
    // GL-style matrices put +Y up; Vulkan's clip space has +Y down.
    proj.y_axis.y *= -1.0;
    proj
}

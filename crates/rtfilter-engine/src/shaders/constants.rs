//! Constant-buffer layouts shared between the CPU side and the shaders.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// `b0`: camera matrices and eye position.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct SceneConstants {
    pub view: Mat4,
    pub proj: Mat4,
    pub eye: Vec3,
    pub _pad: f32,
}

/// `b1`: per-actor world transform.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct TransformConstants {
    pub world: Mat4,
}

/// `b2`: per-material lighting terms.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    /// RGB diffuse, alpha in `w`.
    pub diffuse: [f32; 4],
    /// RGB specular, specularity exponent in `w`.
    pub specular: [f32; 4],
    pub ambient: [f32; 3],
    pub _pad: f32,
}

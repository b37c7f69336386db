//! Monochrome post filter.

use glam::{Vec3, Vec4, Vec4Swizzles};

use crate::device::{ShaderRegisters, ShaderSource};

pub const OUTPUT_UAV: u32 = 0;
pub const INPUT_SRV: u32 = 0;

/// Rec. 601 luma weights; `monochrome.wgsl` uses the same.
pub const LUMA: Vec3 = Vec3::new(0.299, 0.587, 0.114);

/// One invocation per pixel: reads `t0`, writes grey into `u0`.
///
/// The output must be `Rgba8Unorm`.
pub const MONOCHROME_SHADER: ShaderSource =
    ShaderSource::new("monochrome cs", include_str!("monochrome.wgsl"), "cs_main").with_registers(
        ShaderRegisters { cbv: &[], srv: &[INPUT_SRV], uav: &[OUTPUT_UAV], samplers: &[] },
    );

/// What the filter computes for one pixel, for checking readbacks.
pub fn monochrome(color: Vec4) -> Vec4 {
    let y = color.xyz().dot(LUMA);
    Vec4::new(y, y, y, color.w)
}

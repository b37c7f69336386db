//! Unlit textured quad.

use crate::device::{ShaderRegisters, ShaderSource};

pub const QUAD_TEXTURE: u32 = 0;
pub const QUAD_SAMPLER: u32 = 0;

const SOURCE: &str = include_str!("quad.wgsl");

/// Passes clip-space positions straight through.
pub const QUAD_VERTEX_SHADER: ShaderSource =
    ShaderSource::new("quad vs", SOURCE, "vs_main").with_inputs(&["POSITION", "TEXCOORD"]);

pub const QUAD_PIXEL_SHADER: ShaderSource =
    ShaderSource::new("quad ps", SOURCE, "fs_main").with_registers(ShaderRegisters {
        cbv: &[],
        srv: &[QUAD_TEXTURE],
        uav: &[],
        samplers: &[QUAD_SAMPLER],
    });

//! Toon-shaded PMD material shader.

use crate::device::{ShaderRegisters, ShaderSource};

pub const SCENE_REGISTER: u32 = 0;
pub const TRANSFORM_REGISTER: u32 = 1;
pub const MATERIAL_REGISTER: u32 = 2;

pub const BASE_TEXTURE: u32 = 0;
pub const SPHERE_TEXTURE: u32 = 1;
pub const ADDITIVE_TEXTURE: u32 = 2;
pub const TOON_TEXTURE: u32 = 3;

pub const WRAP_SAMPLER: u32 = 0;
pub const TOON_SAMPLER: u32 = 1;

const SOURCE: &str = include_str!("basic.wgsl");

pub const BASIC_VERTEX_SHADER: ShaderSource = ShaderSource::new("basic vs", SOURCE, "vs_main")
    .with_registers(ShaderRegisters {
        cbv: &[SCENE_REGISTER, TRANSFORM_REGISTER],
        srv: &[],
        uav: &[],
        samplers: &[],
    })
    .with_inputs(&["POSITION", "NORMAL", "TEXCOORD"]);

pub const BASIC_PIXEL_SHADER: ShaderSource =
    ShaderSource::new("basic ps", SOURCE, "fs_main").with_registers(ShaderRegisters {
        cbv: &[MATERIAL_REGISTER],
        srv: &[BASE_TEXTURE, SPHERE_TEXTURE, ADDITIVE_TEXTURE, TOON_TEXTURE],
        uav: &[],
        samplers: &[WRAP_SAMPLER, TOON_SAMPLER],
    });

//! WGSL shaders for the scene passes and the post filter, with the register
//! numbers the root signatures bind them by.

pub mod basic;
pub mod constants;
pub mod filter;
pub mod quad;

pub use basic::{BASIC_PIXEL_SHADER, BASIC_VERTEX_SHADER};
pub use constants::{MaterialConstants, SceneConstants, TransformConstants};
pub use filter::MONOCHROME_SHADER;
pub use quad::{QUAD_PIXEL_SHADER, QUAD_VERTEX_SHADER};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ShaderSource, testing};

    // ── compilation ──────────────────────────────────────────────────────

    #[test]
    fn every_shader_compiles() {
        let Some(device) = testing::device() else { return };
        let all: [ShaderSource; 5] =
            [BASIC_VERTEX_SHADER, BASIC_PIXEL_SHADER, QUAD_VERTEX_SHADER, QUAD_PIXEL_SHADER, MONOCHROME_SHADER];
        for shader in all {
            assert!(shader.compile(device.gpu()).is_ok(), "{} failed to compile", shader.label);
        }
    }

    // ── layouts ──────────────────────────────────────────────────────────

    #[test]
    fn constant_sizes_match_wgsl_uniforms() {
        assert_eq!(std::mem::size_of::<SceneConstants>(), 144);
        assert_eq!(std::mem::size_of::<TransformConstants>(), 64);
        assert_eq!(std::mem::size_of::<MaterialConstants>(), 48);
    }
}

//! Procedural textures bound where a material has no file.

use crate::device::{DeviceError, Resource};

use super::{DecodedImage, TextureLoader};

const STANDIN_SIZE: u32 = 4;
const GRADIENT_HEIGHT: u32 = 256;

pub fn white() -> DecodedImage {
    DecodedImage::solid(STANDIN_SIZE, STANDIN_SIZE, [0xff; 4])
}

pub fn black() -> DecodedImage {
    DecodedImage::solid(STANDIN_SIZE, STANDIN_SIZE, [0x00, 0x00, 0x00, 0xff])
}

/// Vertical ramp from white at the top to black at the bottom.
pub fn gradient() -> DecodedImage {
    let mut pixels = Vec::with_capacity((STANDIN_SIZE * GRADIENT_HEIGHT * 4) as usize);
    for y in 0..GRADIENT_HEIGHT {
        let v = (0xff - y) as u8;
        for _ in 0..STANDIN_SIZE {
            pixels.extend_from_slice(&[v, v, v, 0xff]);
        }
    }
    DecodedImage { width: STANDIN_SIZE, height: GRADIENT_HEIGHT, pixels }
}

/// Stand-ins for the base, sphere, additive sphere and toon slots.
#[derive(Debug, Clone)]
pub struct DefaultTextures {
    pub white: Resource,
    pub black: Resource,
    pub gradient: Resource,
}

impl DefaultTextures {
    pub fn new(loader: &mut TextureLoader) -> Result<Self, DeviceError> {
        let white = loader.upload(&white())?;
        white.set_name("stand-in white");
        let black = loader.upload(&black())?;
        black.set_name("stand-in black");
        let gradient = loader.upload(&gradient())?;
        gradient.set_name("stand-in gradient");
        Ok(Self { white, black, gradient })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_runs_white_to_black() {
        let g = gradient();
        assert_eq!(g.pixels.len(), (g.width * g.height * 4) as usize);
        assert_eq!(&g.pixels[..4], &[0xff, 0xff, 0xff, 0xff]);
        let last = g.pixels.len() - 4;
        assert_eq!(&g.pixels[last..], &[0x00, 0x00, 0x00, 0xff]);
    }
}

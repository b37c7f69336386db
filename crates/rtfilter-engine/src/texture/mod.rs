//! Texture decoding, upload and caching.

mod decoder;
mod format;
mod loader;
pub mod standin;

pub use decoder::{DecodedImage, ImageDecoder, TextureDecoder};
pub use format::DecodeFormat;
pub use loader::TextureLoader;
pub use standin::DefaultTextures;

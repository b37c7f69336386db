use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::device::{
    CommandListType, Device, DeviceError, Format, GpuContext, HeapType, Resource, ResourceBarrier,
    ResourceState, TextureCopyLocation, TextureDesc,
};
use crate::error::AssetError;
use crate::submit::CommandContext;

use super::{DecodeFormat, DecodedImage, ImageDecoder, TextureDecoder};

/// Loads textures once per path and keeps them for the life of the loader.
///
/// Asset failures are remembered too, so a missing file is reported once and
/// never decoded again. Device failures are not cached; they propagate.
pub struct TextureLoader {
    device: Device,
    commands: CommandContext,
    decoder: Box<dyn TextureDecoder>,
    table: HashMap<PathBuf, Option<Resource>>,
}

impl TextureLoader {
    pub fn new(ctx: &GpuContext) -> Result<Self, DeviceError> {
        Self::with_decoder(ctx, Box::new(ImageDecoder))
    }

    pub fn with_decoder(ctx: &GpuContext, decoder: Box<dyn TextureDecoder>) -> Result<Self, DeviceError> {
        Ok(Self {
            device: ctx.device.clone(),
            commands: CommandContext::new(ctx, CommandListType::Direct)?,
            decoder,
            table: HashMap::new(),
        })
    }

    /// Returns the texture for `path`, decoding and uploading it on first use.
    ///
    /// `Ok(None)` means the file could not be read or decoded; the reason was
    /// logged the first time. A device failure while uploading is an error and
    /// leaves the path uncached.
    pub fn get_or_load(&mut self, path: impl AsRef<Path>) -> Result<Option<Resource>, DeviceError> {
        let path = path.as_ref();
        if let Some(cached) = self.table.get(path) {
            return Ok(cached.clone());
        }
        let loaded = match self.load(path) {
            Ok(texture) => {
                log::debug!("loaded texture {}", path.display());
                Some(texture)
            }
            Err(TextureLoadError::Asset(e)) => {
                log::warn!("{e}");
                None
            }
            Err(TextureLoadError::Device(e)) => return Err(e),
        };
        self.table.insert(path.to_path_buf(), loaded.clone());
        Ok(loaded)
    }

    /// Number of paths seen so far, successful or not.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn load(&mut self, path: &Path) -> Result<Resource, TextureLoadError> {
        let format = DecodeFormat::from_path(path)
            .ok_or_else(|| AssetError::UnsupportedFormat { path: path.to_path_buf() })?;
        let image = self.decoder.decode(format, path)?;
        let texture = self.upload(&image)?;
        texture.set_name(path.display().to_string());
        Ok(texture)
    }

    /// Uploads pixels into a new shader-readable texture and waits for the copy.
    pub fn upload(&mut self, image: &DecodedImage) -> Result<Resource, DeviceError> {
        let desc = TextureDesc::new_2d(Format::Rgba8Unorm, image.width, image.height);
        let expected = desc.width as usize * desc.height as usize * 4;
        if image.pixels.len() != expected {
            return Err(DeviceError::InvalidResource(format!(
                "image has {} bytes, expected {expected} for {}x{}",
                image.pixels.len(),
                image.width,
                image.height
            )));
        }

        let texture = self
            .device
            .create_texture_2d(desc, HeapType::Default, ResourceState::CopyDest, None)?;
        let footprint = self.device.copyable_footprint(&desc)?;
        let staging = self.device.create_buffer(footprint.total_bytes, HeapType::Upload)?;
        staging.set_name("texture staging");
        {
            let mut mapped = staging.map()?;
            let row = footprint.row_size as usize;
            for (y, src) in image.pixels.chunks_exact(row).enumerate() {
                let at = footprint.offset as usize + y * footprint.row_pitch as usize;
                mapped[at..at + row].copy_from_slice(src);
            }
        }

        let list = self.commands.list();
        list.copy_texture_region(
            TextureCopyLocation::subresource(&texture, 0),
            TextureCopyLocation::footprint(&staging, footprint),
        );
        list.resource_barrier(&[ResourceBarrier::transition(
            &texture,
            ResourceState::CopyDest,
            ResourceState::PixelShaderResource,
        )]);
        self.commands.flush()?;
        Ok(texture)
    }
}

/// Either half of a failed load. Only the asset half is recoverable.
#[derive(Debug, thiserror::Error)]
enum TextureLoadError {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::device::{DeviceDesc, testing};

    struct CountingDecoder {
        calls: Rc<Cell<usize>>,
    }

    impl TextureDecoder for CountingDecoder {
        fn decode(&self, _format: DecodeFormat, path: &Path) -> Result<DecodedImage, AssetError> {
            self.calls.set(self.calls.get() + 1);
            if path.to_string_lossy().contains("missing") {
                return Err(AssetError::Decode { path: path.to_path_buf(), message: "no such file".into() });
            }
            if path.to_string_lossy().contains("large") {
                return Ok(DecodedImage::solid(1024, 1024, [10, 20, 30, 255]));
            }
            Ok(DecodedImage::solid(3, 2, [10, 20, 30, 255]))
        }
    }

    fn loader_with(desc: DeviceDesc) -> Option<(TextureLoader, Rc<Cell<usize>>)> {
        let ctx = testing::context_with(desc)?;
        let calls = Rc::new(Cell::new(0));
        let loader = TextureLoader::with_decoder(&ctx, Box::new(CountingDecoder { calls: Rc::clone(&calls) })).unwrap();
        Some((loader, calls))
    }

    fn loader() -> Option<(TextureLoader, Rc<Cell<usize>>)> {
        loader_with(DeviceDesc::default())
    }

    // ── cache ─────────────────────────────────────────────────────────────

    #[test]
    fn second_load_returns_same_handle_without_decoding() {
        let Some((mut loader, calls)) = loader() else { return };
        let a = loader.get_or_load("model/tex.png").unwrap().unwrap();
        let b = loader.get_or_load("model/tex.png").unwrap().unwrap();
        assert!(Resource::ptr_eq(&a, &b));
        assert_eq!(calls.get(), 1);
        assert_eq!(a.state(), ResourceState::PixelShaderResource);
    }

    #[test]
    fn failures_are_cached() {
        let Some((mut loader, calls)) = loader() else { return };
        assert!(loader.get_or_load("model/missing.png").unwrap().is_none());
        assert!(loader.get_or_load("model/missing.png").unwrap().is_none());
        assert_eq!(calls.get(), 1);
        assert_eq!(loader.len(), 1);
    }

    #[test]
    fn unsupported_extension_never_reaches_decoder() {
        let Some((mut loader, calls)) = loader() else { return };
        assert!(loader.get_or_load("model/tex.gif").unwrap().is_none());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn device_failures_propagate_and_are_not_cached() {
        let desc = DeviceDesc { memory_budget: Some(1 << 20), ..DeviceDesc::default() };
        let Some((mut loader, calls)) = loader_with(desc) else { return };
        assert!(loader.get_or_load("model/large.png").is_err());
        assert!(loader.is_empty());
        assert!(loader.get_or_load("model/large.png").is_err());
        assert_eq!(calls.get(), 2);

        // the loader stays usable for textures that fit
        assert!(loader.get_or_load("model/tex.png").unwrap().is_some());
    }

    // ── upload ────────────────────────────────────────────────────────────

    #[test]
    fn upload_rejects_short_pixel_buffers() {
        let Some((mut loader, _)) = loader() else { return };
        let image = DecodedImage { width: 4, height: 4, pixels: vec![0; 8] };
        assert!(loader.upload(&image).is_err());
    }
}

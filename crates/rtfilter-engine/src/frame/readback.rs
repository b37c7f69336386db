use crate::device::{
    DeviceError, HeapType, Resource, ResourceBarrier, ResourceState, TextureCopyLocation,
};
use crate::submit::CommandContext;

/// Copies a texture into a readback buffer and returns its pixels tightly packed.
///
/// `state` is the texture's current state; it is restored before returning.
pub fn readback_texture(
    commands: &mut CommandContext,
    texture: &Resource,
    state: ResourceState,
) -> Result<Vec<u8>, DeviceError> {
    let desc = *texture
        .texture_desc()
        .ok_or_else(|| DeviceError::InvalidResource(format!("{} is not a texture", texture.name())))?;
    let footprint = commands.device().copyable_footprint(&desc)?;
    let buffer = commands
        .device()
        .create_buffer(footprint.total_bytes, HeapType::Readback)?;
    buffer.set_name("readback");

    let list = commands.list();
    if state != ResourceState::CopySource {
        list.resource_barrier(&[ResourceBarrier::transition(texture, state, ResourceState::CopySource)]);
    }
    list.copy_texture_region(
        TextureCopyLocation::footprint(&buffer, footprint),
        TextureCopyLocation::subresource(texture, 0),
    );
    if state != ResourceState::CopySource {
        list.resource_barrier(&[ResourceBarrier::transition(texture, ResourceState::CopySource, state)]);
    }
    commands.flush()?;

    let raw = buffer.read_bytes()?;
    let row = footprint.row_size as usize;
    let mut pixels = Vec::with_capacity(row * footprint.num_rows as usize);
    for y in 0..footprint.num_rows as usize {
        let at = footprint.offset as usize + y * footprint.row_pitch as usize;
        pixels.extend_from_slice(&raw[at..at + row]);
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CommandListType, testing};
    use crate::texture::{DecodedImage, TextureLoader};

    #[test]
    fn round_trips_uploaded_pixels_and_restores_state() {
        let Some(ctx) = testing::context() else { return };
        let mut loader = TextureLoader::new(&ctx).unwrap();
        let image = DecodedImage {
            width: 3,
            height: 2,
            pixels: (0..24).collect(),
        };
        let texture = loader.upload(&image).unwrap();

        let mut commands = CommandContext::new(&ctx, CommandListType::Direct).unwrap();
        let pixels = readback_texture(&mut commands, &texture, ResourceState::PixelShaderResource).unwrap();
        assert_eq!(pixels, image.pixels);
        assert_eq!(texture.state(), ResourceState::PixelShaderResource);
    }
}

use crate::device::{
    CommandList, CommandListType, ComputePipelineDesc, DescriptorHeap, DescriptorHeapKind, DescriptorRange, DescriptorRangeKind,
    DeviceError, Format, GpuContext, HeapType, PipelineState, Resource, ResourceState, RootParameter, RootSignature,
    ResourceBarrier, RootSignatureDesc, ShaderVisibility, TextureDesc, TextureFlags, ViewDesc,
};
use crate::shaders::MONOCHROME_SHADER;
use crate::shaders::filter::{INPUT_SRV, OUTPUT_UAV};
use crate::submit::CommandContext;

/// Compute pass turning the scene target grey into its own output texture.
///
/// One table: slot 0 is the output UAV (`u0`), slot 1 the scene SRV (`t0`).
pub struct PostFilter {
    pipeline: PipelineState,
    root_signature: RootSignature,
    heap: DescriptorHeap,
    output: Resource,
    width: u32,
    height: u32,
}

impl PostFilter {
    pub fn new(ctx: &GpuContext, source: &Resource) -> Result<Self, DeviceError> {
        let device = &ctx.device;
        let desc = *source
            .texture_desc()
            .ok_or_else(|| DeviceError::InvalidResource("post filter source must be a texture".into()))?;
        if desc.format != Format::Rgba8Unorm {
            return Err(DeviceError::InvalidResource(format!(
                "post filter writes Rgba8Unorm, source is {:?}",
                desc.format
            )));
        }

        let output = device.create_texture_2d(
            TextureDesc::new_2d(desc.format, desc.width, desc.height).with_flags(TextureFlags::UNORDERED_ACCESS),
            HeapType::Default,
            ResourceState::UnorderedAccess,
            None,
        )?;
        output.set_name("filter output");

        let heap = device.create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 2, true)?;
        device.populate_view(&heap, 0, ViewDesc::uav(&output))?;
        device.populate_view(&heap, 1, ViewDesc::srv(source))?;

        let root_signature = device.create_root_signature(RootSignatureDesc {
            parameters: vec![RootParameter::table(
                vec![
                    DescriptorRange::new(DescriptorRangeKind::Uav, 1, OUTPUT_UAV).at_offset(0),
                    DescriptorRange::new(DescriptorRangeKind::Srv, 1, INPUT_SRV),
                ],
                ShaderVisibility::All,
            )],
            static_samplers: Vec::new(),
        })?;
        let pipeline = device.create_compute_pipeline(ComputePipelineDesc {
            root_signature: root_signature.clone(),
            compute_shader: MONOCHROME_SHADER,
        })?;

        Ok(Self { pipeline, root_signature, heap, output, width: desc.width, height: desc.height })
    }

    pub fn pipeline(&self) -> &PipelineState {
        &self.pipeline
    }

    /// Filtered image; rests in `UnorderedAccess` between frames.
    pub fn output(&self) -> &Resource {
        &self.output
    }

    /// One thread per pixel.
    pub fn record(&self, list: &mut CommandList) {
        list.set_pipeline_state(&self.pipeline);
        list.set_compute_root_signature(&self.root_signature);
        list.set_descriptor_heaps(&[&self.heap]);
        list.set_compute_root_descriptor_table(0, self.heap.gpu_start());
        list.dispatch(self.width, self.height, 1);
    }
}

/// Filters `source` once on the compute queue and returns the grey copy.
///
/// `source` must rest in `PixelShaderResource`, as loaded textures do; it is
/// left there, and so is the returned texture.
pub fn filter_texture(ctx: &GpuContext, source: &Resource) -> Result<Resource, DeviceError> {
    let filter = PostFilter::new(ctx, source)?;
    let output = filter.output().clone();
    output.set_name(format!("{} (monochrome)", source.name()));

    let mut compute = CommandContext::new(ctx, CommandListType::Compute)?;
    let list = compute.list();
    list.resource_barrier(&[ResourceBarrier::transition(
        source,
        ResourceState::PixelShaderResource,
        ResourceState::NonPixelShaderResource,
    )]);
    filter.record(list);
    compute.submit_and_wait()?;

    let mut direct = CommandContext::new(ctx, CommandListType::Direct)?;
    direct.list().resource_barrier(&[
        ResourceBarrier::transition(&output, ResourceState::UnorderedAccess, ResourceState::PixelShaderResource),
        ResourceBarrier::transition(source, ResourceState::NonPixelShaderResource, ResourceState::PixelShaderResource),
    ]);
    direct.submit_and_wait()?;
    log::debug!("filtered {} once", source.name());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Format, testing};
    use crate::frame::readback_texture;
    use crate::texture::{DecodedImage, TextureLoader};

    #[test]
    fn texture_is_filtered_once_and_left_sampleable() {
        let Some(ctx) = testing::context() else { return };
        let mut loader = TextureLoader::new(&ctx).unwrap();
        let image = DecodedImage { width: 200, height: 200, pixels: [255, 0, 0, 255].repeat(200 * 200) };
        let source = loader.upload(&image).unwrap();

        let filtered = filter_texture(&ctx, &source).unwrap();
        assert_eq!(source.state(), ResourceState::PixelShaderResource);
        assert_eq!(filtered.state(), ResourceState::PixelShaderResource);
        assert_eq!(filtered.texture_desc().unwrap().format, Format::Rgba8Unorm);

        let mut commands = CommandContext::new(&ctx, CommandListType::Direct).unwrap();
        let pixels = readback_texture(&mut commands, &filtered, ResourceState::PixelShaderResource).unwrap();
        // 0.299 * 255
        for texel in pixels.chunks_exact(4) {
            assert!(texel[0].abs_diff(76) <= 1 && texel[0] == texel[1] && texel[1] == texel[2], "{texel:?}");
            assert_eq!(texel[3], 255);
        }
    }

    #[test]
    fn non_rgba_sources_are_rejected() {
        let Some(ctx) = testing::context() else { return };
        let source = ctx
            .device
            .create_texture_2d(
                TextureDesc::new_2d(Format::R32Float, 4, 4),
                HeapType::Default,
                ResourceState::PixelShaderResource,
                None,
            )
            .unwrap();
        assert!(matches!(filter_texture(&ctx, &source), Err(DeviceError::InvalidResource(_))));
    }
}

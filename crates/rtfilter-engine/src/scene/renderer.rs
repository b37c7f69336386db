use crate::device::{
    AddressMode, CommandList, CullMode, DepthState, DescriptorRange, DescriptorRangeKind, DeviceError, Filter,
    Format, GpuContext, GraphicsPipelineDesc, InputElement, PipelineState, PrimitiveTopology, RootParameter,
    RootSignature, RootSignatureDesc, ShaderVisibility, StaticSampler, VertexFormat,
};
use crate::shaders::basic::{
    BASE_TEXTURE, MATERIAL_REGISTER, SCENE_REGISTER, TOON_SAMPLER, TRANSFORM_REGISTER, WRAP_SAMPLER,
};
use crate::shaders::{BASIC_PIXEL_SHADER, BASIC_VERTEX_SHADER};
use crate::texture::{DefaultTextures, TextureLoader};

pub const SCENE_PARAMETER: u32 = 0;
pub const TRANSFORM_PARAMETER: u32 = 1;
pub const MATERIAL_PARAMETER: u32 = 2;

/// Views per material: constants, base, sphere, additive sphere, toon.
pub const MATERIAL_DESCRIPTOR_COUNT: u32 = 5;

pub const SCENE_FORMAT: Format = Format::Rgba8Unorm;
pub const DEPTH_FORMAT: Format = Format::D32Float;

/// What an actor needs from the renderer.
#[derive(Debug, Clone)]
pub struct RendererResources {
    pub pipeline: PipelineState,
    pub root_signature: RootSignature,
    pub defaults: DefaultTextures,
}

/// Owns the PMD pipeline and the stand-in textures.
#[derive(Debug)]
pub struct PmdRenderer {
    resources: RendererResources,
}

impl PmdRenderer {
    pub fn new(ctx: &GpuContext, loader: &mut TextureLoader) -> Result<Self, DeviceError> {
        let device = &ctx.device;
        let root_signature = device.create_root_signature(root_signature_desc())?;
        let pipeline = device.create_graphics_pipeline(GraphicsPipelineDesc {
            root_signature: root_signature.clone(),
            vertex_shader: BASIC_VERTEX_SHADER,
            pixel_shader: BASIC_PIXEL_SHADER,
            input_layout: input_layout(),
            cull_mode: CullMode::None,
            blend: Default::default(),
            depth: Some(DepthState { test: true, write: true }),
            rtv_formats: vec![SCENE_FORMAT],
            dsv_format: DEPTH_FORMAT,
        })?;
        let defaults = DefaultTextures::new(loader)?;
        log::debug!("pmd renderer ready");
        Ok(Self { resources: RendererResources { pipeline, root_signature, defaults } })
    }

    pub fn resources(&self) -> &RendererResources {
        &self.resources
    }

    /// Binds the pipeline and root signature; tables follow from the scene and actors.
    pub fn begin(&self, list: &mut CommandList) {
        list.set_pipeline_state(&self.resources.pipeline);
        list.set_graphics_root_signature(&self.resources.root_signature);
        list.set_primitive_topology(PrimitiveTopology::TriangleList);
    }
}

fn root_signature_desc() -> RootSignatureDesc {
    RootSignatureDesc {
        parameters: vec![
            RootParameter::table(
                vec![DescriptorRange::new(DescriptorRangeKind::Cbv, 1, SCENE_REGISTER)],
                ShaderVisibility::All,
            ),
            RootParameter::table(
                vec![DescriptorRange::new(DescriptorRangeKind::Cbv, 1, TRANSFORM_REGISTER)],
                ShaderVisibility::All,
            ),
            RootParameter::table(
                vec![
                    DescriptorRange::new(DescriptorRangeKind::Cbv, 1, MATERIAL_REGISTER),
                    DescriptorRange::new(DescriptorRangeKind::Srv, 4, BASE_TEXTURE),
                ],
                ShaderVisibility::Pixel,
            ),
        ],
        static_samplers: vec![
            StaticSampler {
                register: WRAP_SAMPLER,
                filter: Filter::Linear,
                address: AddressMode::Wrap,
                visibility: ShaderVisibility::Pixel,
            },
            StaticSampler {
                register: TOON_SAMPLER,
                filter: Filter::Linear,
                address: AddressMode::Clamp,
                visibility: ShaderVisibility::Pixel,
            },
        ],
    }
}

/// Matches the 38-byte PMD vertex record.
fn input_layout() -> Vec<InputElement> {
    vec![
        InputElement::new("POSITION", VertexFormat::Float32x3, 0),
        InputElement::new("NORMAL", VertexFormat::Float32x3, 12),
        InputElement::new("TEXCOORD", VertexFormat::Float32x2, 24),
        InputElement::new("BONENO", VertexFormat::Uint16x2, 32),
        InputElement::new("WEIGHT", VertexFormat::Uint8, 36),
        InputElement::new("EDGE_FLG", VertexFormat::Uint8, 37),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtfilter_pmd::VERTEX_STRIDE;

    #[test]
    fn input_layout_covers_vertex_record() {
        let end = input_layout().iter().map(|e| e.offset + e.format.size()).max().unwrap();
        assert_eq!(end as usize, VERTEX_STRIDE);
    }
}

use std::path::Path;

use bytemuck::{Pod, Zeroable};

use crate::device::{
    AddressMode, CommandList, DescriptorHeap, DescriptorHeapKind, DescriptorRange, DescriptorRangeKind, DeviceError,
    Filter, GpuContext, GraphicsPipelineDesc, HeapType, IndexBufferView, IndexFormat, InputElement, PipelineState,
    PrimitiveTopology, Resource, RootParameter, RootSignature, RootSignatureDesc, ShaderVisibility, StaticSampler,
    VertexBufferView, VertexFormat, ViewDesc,
};
use crate::shaders::quad::{QUAD_SAMPLER, QUAD_TEXTURE};
use crate::shaders::{QUAD_PIXEL_SHADER, QUAD_VERTEX_SHADER};
use crate::texture::TextureLoader;

use super::renderer::{DEPTH_FORMAT, SCENE_FORMAT};

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 3],
    uv: [f32; 2],
}

const VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: [-0.4, -0.7, 0.0], uv: [0.0, 1.0] },
    QuadVertex { position: [-0.4, 0.7, 0.0], uv: [0.0, 0.0] },
    QuadVertex { position: [0.4, -0.7, 0.0], uv: [1.0, 1.0] },
    QuadVertex { position: [0.4, 0.7, 0.0], uv: [1.0, 0.0] },
];

const INDICES: [u16; 6] = [0, 1, 2, 2, 1, 3];

/// Screen-space textured rectangle drawn before the model.
pub struct TexturedQuad {
    pipeline: PipelineState,
    root_signature: RootSignature,
    vertex_view: VertexBufferView,
    index_view: IndexBufferView,
    heap: DescriptorHeap,
    texture: Resource,
}

impl TexturedQuad {
    /// Falls back to `fallback` when `texture_path` cannot be loaded.
    pub fn new(
        ctx: &GpuContext,
        loader: &mut TextureLoader,
        texture_path: &Path,
        fallback: &Resource,
    ) -> Result<Self, DeviceError> {
        let texture = loader.get_or_load(texture_path)?.unwrap_or_else(|| fallback.clone());
        Self::with_texture(ctx, texture)
    }

    /// Draws `texture`, which must rest in `PixelShaderResource`.
    pub fn with_texture(ctx: &GpuContext, texture: Resource) -> Result<Self, DeviceError> {
        let device = &ctx.device;

        let root_signature = device.create_root_signature(RootSignatureDesc {
            parameters: vec![RootParameter::table(
                vec![DescriptorRange::new(DescriptorRangeKind::Srv, 1, QUAD_TEXTURE)],
                ShaderVisibility::Pixel,
            )],
            static_samplers: vec![StaticSampler {
                register: QUAD_SAMPLER,
                filter: Filter::Point,
                address: AddressMode::Wrap,
                visibility: ShaderVisibility::Pixel,
            }],
        })?;
        // Shares the render pass with the model, so the depth format must match
        // even though the quad neither tests nor writes depth.
        let pipeline = device.create_graphics_pipeline(GraphicsPipelineDesc {
            root_signature: root_signature.clone(),
            vertex_shader: QUAD_VERTEX_SHADER,
            pixel_shader: QUAD_PIXEL_SHADER,
            input_layout: vec![
                InputElement::new("POSITION", VertexFormat::Float32x3, 0),
                InputElement::new("TEXCOORD", VertexFormat::Float32x2, 12),
            ],
            cull_mode: Default::default(),
            blend: Default::default(),
            depth: None,
            rtv_formats: vec![SCENE_FORMAT],
            dsv_format: DEPTH_FORMAT,
        })?;

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&VERTICES);
        let vertices = device.create_buffer(vertex_bytes.len() as u64, HeapType::Upload)?;
        vertices.set_name("quad vertices");
        vertices.write_bytes(0, vertex_bytes)?;
        let index_bytes: &[u8] = bytemuck::cast_slice(&INDICES);
        let indices = device.create_buffer(index_bytes.len() as u64, HeapType::Upload)?;
        indices.set_name("quad indices");
        indices.write_bytes(0, index_bytes)?;

        let heap = device.create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 1, true)?;
        device.create_view(ViewDesc::srv(&texture), heap.cpu_start())?;

        Ok(Self {
            pipeline,
            root_signature,
            vertex_view: VertexBufferView {
                resource: vertices,
                offset: 0,
                size_bytes: vertex_bytes.len() as u32,
                stride: std::mem::size_of::<QuadVertex>() as u32,
            },
            index_view: IndexBufferView {
                resource: indices,
                offset: 0,
                size_bytes: index_bytes.len() as u32,
                format: IndexFormat::Uint16,
            },
            heap,
            texture,
        })
    }

    pub fn texture(&self) -> &Resource {
        &self.texture
    }

    pub fn record(&self, list: &mut CommandList) {
        list.set_pipeline_state(&self.pipeline);
        list.set_graphics_root_signature(&self.root_signature);
        list.set_descriptor_heaps(&[&self.heap]);
        list.set_graphics_root_descriptor_table(0, self.heap.gpu_start());
        list.set_primitive_topology(PrimitiveTopology::TriangleList);
        list.set_vertex_buffer(self.vertex_view.clone());
        list.set_index_buffer(self.index_view.clone());
        list.draw_indexed_instanced(INDICES.len() as u32, 1, 0, 0, 0);
    }
}

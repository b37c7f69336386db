use std::path::{Path, PathBuf};

use glam::Mat4;
use rtfilter_pmd::{Material, Model, VERTEX_STRIDE};

use crate::device::{
    CONSTANT_BUFFER_ALIGNMENT, CommandList, DescriptorHeap, DescriptorHeapKind, Device, DeviceError, GpuContext,
    HeapType, IndexBufferView, IndexFormat, Resource, VertexBufferView, ViewDesc, align_to,
};
use crate::error::{AssetError, EngineError};
use crate::shaders::{MaterialConstants, TransformConstants};
use crate::texture::TextureLoader;

use super::renderer::{MATERIAL_DESCRIPTOR_COUNT, MATERIAL_PARAMETER, RendererResources, TRANSFORM_PARAMETER};

/// Radians per second about the Y axis.
const SPIN_SPEED: f32 = 1.8;

struct MaterialDraw {
    index_count: u32,
    first_index: u32,
}

/// A PMD model uploaded to the device, with its world transform and material tables.
pub struct PmdActor {
    path: PathBuf,
    vertex_view: VertexBufferView,
    index_view: IndexBufferView,
    transform: Resource,
    transform_heap: DescriptorHeap,
    material_heap: DescriptorHeap,
    draws: Vec<MaterialDraw>,
    increment: u32,
    angle: f32,
    // Keep the backing buffers alive alongside the views that name them.
    _material_constants: Option<Resource>,
}

impl PmdActor {
    pub fn load(
        ctx: &GpuContext,
        resources: &RendererResources,
        loader: &mut TextureLoader,
        path: impl AsRef<Path>,
    ) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| AssetError::Io { path: path.to_path_buf(), source })?;
        let model = Model::parse(&bytes).map_err(|source| AssetError::Model { path: path.to_path_buf(), source })?;
        log::info!(
            "model {} \"{}\": {} vertices, {} indices, {} materials",
            path.display(),
            model.header.name,
            model.vertex_count(),
            model.indices.len(),
            model.materials.len()
        );
        Ok(Self::from_model(ctx, resources, loader, path, &model)?)
    }

    /// Uploads an already parsed model; textures resolve relative to `path`'s folder.
    pub fn from_model(
        ctx: &GpuContext,
        resources: &RendererResources,
        loader: &mut TextureLoader,
        path: &Path,
        model: &Model,
    ) -> Result<Self, DeviceError> {
        let device = &ctx.device;
        let (vertex_view, index_view) = upload_geometry(device, model)?;

        let transform = device.create_buffer(
            align_to(std::mem::size_of::<TransformConstants>() as u64, CONSTANT_BUFFER_ALIGNMENT),
            HeapType::Upload,
        )?;
        transform.set_name(format!("{} transform", path.display()));
        transform.write_pod(0, &TransformConstants { world: Mat4::IDENTITY })?;
        let transform_heap = device.create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 1, true)?;
        device.create_view(ViewDesc::cbv(&transform), transform_heap.cpu_start())?;

        let increment = device.descriptor_increment_size(DescriptorHeapKind::CbvSrvUav);
        let material_count = model.materials.len() as u32;
        let material_heap = device.create_descriptor_heap(
            DescriptorHeapKind::CbvSrvUav,
            (material_count * MATERIAL_DESCRIPTOR_COUNT).max(1),
            true,
        )?;
        let material_constants = match material_count {
            0 => None,
            _ => Some(populate_materials(
                device,
                resources,
                loader,
                &material_heap,
                increment,
                path.parent().unwrap_or(Path::new("")),
                &model.materials,
            )?),
        };

        let draws = model
            .material_ranges()
            .map(|(m, first_index)| MaterialDraw { index_count: m.index_count, first_index })
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            vertex_view,
            index_view,
            transform,
            transform_heap,
            material_heap,
            draws,
            increment,
            angle: 0.0,
            _material_constants: material_constants,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn material_count(&self) -> usize {
        self.draws.len()
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Spins the model and rewrites its world matrix.
    pub fn update(&mut self, dt: f32) -> Result<(), DeviceError> {
        self.angle = (self.angle + SPIN_SPEED * dt) % std::f32::consts::TAU;
        self.transform.write_pod(0, &TransformConstants { world: Mat4::from_rotation_y(self.angle) })
    }

    /// Records one indexed draw per material. Returns the number of draws.
    pub fn record(&self, list: &mut CommandList) -> u32 {
        list.set_vertex_buffer(self.vertex_view.clone());
        list.set_index_buffer(self.index_view.clone());

        list.set_descriptor_heaps(&[&self.transform_heap]);
        list.set_graphics_root_descriptor_table(TRANSFORM_PARAMETER, self.transform_heap.gpu_start());

        list.set_descriptor_heaps(&[&self.material_heap]);
        let mut table = self.material_heap.gpu_start();
        let mut draws = 0;
        for draw in &self.draws {
            list.set_graphics_root_descriptor_table(MATERIAL_PARAMETER, table);
            if draw.index_count > 0 {
                list.draw_indexed_instanced(draw.index_count, 1, draw.first_index, 0, 0);
                draws += 1;
            }
            table = table.offset(MATERIAL_DESCRIPTOR_COUNT, self.increment);
        }
        draws
    }
}

fn upload_geometry(device: &Device, model: &Model) -> Result<(VertexBufferView, IndexBufferView), DeviceError> {
    let vertex_bytes = model.vertex_data();
    let vertex_buffer = device.create_buffer((vertex_bytes.len() as u64).max(1), HeapType::Upload)?;
    vertex_buffer.set_name("pmd vertices");
    vertex_buffer.write_bytes(0, vertex_bytes)?;

    let index_bytes: &[u8] = bytemuck::cast_slice(&model.indices);
    let index_buffer = device.create_buffer((index_bytes.len() as u64).max(1), HeapType::Upload)?;
    index_buffer.set_name("pmd indices");
    index_buffer.write_bytes(0, index_bytes)?;

    Ok((
        VertexBufferView {
            resource: vertex_buffer,
            offset: 0,
            size_bytes: vertex_bytes.len() as u32,
            stride: VERTEX_STRIDE as u32,
        },
        IndexBufferView {
            resource: index_buffer,
            offset: 0,
            size_bytes: index_bytes.len() as u32,
            format: IndexFormat::Uint16,
        },
    ))
}

fn material_constants(m: &Material) -> MaterialConstants {
    MaterialConstants {
        diffuse: [m.diffuse[0], m.diffuse[1], m.diffuse[2], m.alpha],
        specular: [m.specular[0], m.specular[1], m.specular[2], m.specularity],
        ambient: m.ambient,
        _pad: 0.0,
    }
}

/// Resolves a texture name from the model file against the model's folder.
fn resolve(dir: &Path, name: &str) -> PathBuf {
    name.split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .fold(dir.to_path_buf(), |path, part| path.join(part))
}

fn populate_materials(
    device: &Device,
    resources: &RendererResources,
    loader: &mut TextureLoader,
    heap: &DescriptorHeap,
    increment: u32,
    dir: &Path,
    materials: &[Material],
) -> Result<Resource, DeviceError> {
    let stride = align_to(std::mem::size_of::<MaterialConstants>() as u64, CONSTANT_BUFFER_ALIGNMENT);
    let constants = device.create_buffer(stride * materials.len() as u64, HeapType::Upload)?;
    constants.set_name("pmd materials");

    let defaults = &resources.defaults;
    let mut load = |name: Option<String>| -> Result<Option<Resource>, DeviceError> {
        match name {
            Some(n) => loader.get_or_load(resolve(dir, &n)),
            None => Ok(None),
        }
    };

    let mut handle = heap.cpu_start();
    for (i, material) in materials.iter().enumerate() {
        let offset = stride * i as u64;
        constants.write_pod(offset, &material_constants(material))?;

        let textures = material.textures();
        let base = load(textures.base)?.unwrap_or_else(|| defaults.white.clone());
        let sphere = load(textures.sphere)?.unwrap_or_else(|| defaults.white.clone());
        let additive = load(textures.additive)?.unwrap_or_else(|| defaults.black.clone());
        let toon = load(Some(material.toon_file_name()))?.unwrap_or_else(|| defaults.gradient.clone());

        let views = [
            ViewDesc::ConstantBuffer { resource: constants.clone(), offset, size: stride },
            ViewDesc::srv(&base),
            ViewDesc::srv(&sphere),
            ViewDesc::srv(&additive),
            ViewDesc::srv(&toon),
        ];
        for view in views {
            device.create_view(view, handle)?;
            handle = handle.offset(1, increment);
        }
    }
    Ok(constants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing;
    use crate::scene::PmdRenderer;

    fn material(texture_field: &str) -> Material {
        Material {
            diffuse: [1.0, 0.0, 0.0],
            alpha: 1.0,
            specularity: 5.0,
            specular: [0.0; 3],
            ambient: [0.0; 3],
            toon_index: 0,
            edge_flag: 0,
            index_count: 3,
            texture_field: texture_field.to_owned(),
        }
    }

    fn srv_at(heap: &DescriptorHeap, slot: u32) -> Resource {
        match heap.get(slot) {
            Some(ViewDesc::ShaderResource { resource, .. }) => resource,
            other => panic!("slot {slot} holds {other:?}"),
        }
    }

    // ── material tables ───────────────────────────────────────────────────

    #[test]
    fn texture_names_resolve_against_model_folder() {
        let dir = Path::new("model");
        assert_eq!(resolve(dir, "tex\\face.bmp"), Path::new("model").join("tex").join("face.bmp"));
        assert_eq!(resolve(dir, "toon/toon01.bmp"), Path::new("model").join("toon").join("toon01.bmp"));
    }

    #[test]
    fn material_constants_pack_alpha_and_specularity() {
        let m = Material {
            diffuse: [0.1, 0.2, 0.3],
            alpha: 0.5,
            specularity: 8.0,
            specular: [0.4, 0.5, 0.6],
            ambient: [0.7, 0.8, 0.9],
            toon_index: 0,
            edge_flag: 0,
            index_count: 3,
            texture_field: String::new(),
        };
        let c = material_constants(&m);
        assert_eq!(c.diffuse, [0.1, 0.2, 0.3, 0.5]);
        assert_eq!(c.specular, [0.4, 0.5, 0.6, 8.0]);
        assert_eq!(c.ambient, [0.7, 0.8, 0.9]);
    }

    #[test]
    fn each_material_gets_five_views_with_stand_ins() {
        let Some(ctx) = testing::context() else { return };
        let mut loader = TextureLoader::new(&ctx).unwrap();
        let renderer = PmdRenderer::new(&ctx, &mut loader).unwrap();
        let defaults = &renderer.resources().defaults;

        let dir = std::env::temp_dir().join(format!("rtfilter-materials-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]))
            .save(dir.join("face.png"))
            .unwrap();

        let materials = [material(""), material("face.png")];
        let heap = ctx.device.create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 10, true).unwrap();
        let increment = ctx.device.descriptor_increment_size(DescriptorHeapKind::CbvSrvUav);
        let constants =
            populate_materials(&ctx.device, renderer.resources(), &mut loader, &heap, increment, &dir, &materials)
                .unwrap();

        let stride = align_to(std::mem::size_of::<MaterialConstants>() as u64, CONSTANT_BUFFER_ALIGNMENT);
        for index in 0..materials.len() as u32 {
            let base = index * MATERIAL_DESCRIPTOR_COUNT;
            match heap.get(base) {
                Some(ViewDesc::ConstantBuffer { resource, offset, size }) => {
                    assert!(Resource::ptr_eq(&resource, &constants));
                    assert_eq!(offset, stride * u64::from(index));
                    assert_eq!(size, stride);
                }
                other => panic!("material {index} constants slot holds {other:?}"),
            }
            assert!(Resource::ptr_eq(&srv_at(&heap, base + 2), &defaults.white));
            assert!(Resource::ptr_eq(&srv_at(&heap, base + 3), &defaults.black));
            assert!(Resource::ptr_eq(&srv_at(&heap, base + 4), &defaults.gradient));
        }

        // Untextured material samples white; the textured one its own file.
        assert!(Resource::ptr_eq(&srv_at(&heap, 1), &defaults.white));
        let face = loader.get_or_load(dir.join("face.png")).unwrap().unwrap();
        assert!(Resource::ptr_eq(&srv_at(&heap, MATERIAL_DESCRIPTOR_COUNT + 1), &face));
    }
}

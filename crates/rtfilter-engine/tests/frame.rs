//! Full headless frames: scene pass, compute filter, copy, present.

use std::path::{Path, PathBuf};

use glam::Vec4;
use image::{Rgba, RgbaImage};

use rtfilter_engine::device::{CaptureSink, DeviceDesc, DeviceError, GpuContext, Resource, ResourceState};
use rtfilter_engine::frame::{FilterMode, FramePipeline, filter_texture};
use rtfilter_engine::scene::{CameraConfig, PmdActor, PmdRenderer, Scene, SceneView, TexturedQuad};
use rtfilter_engine::shaders::filter::monochrome;
use rtfilter_engine::texture::TextureLoader;
use rtfilter_engine::{AssetError, EngineError};

const SIZE: u32 = 200;
const QUAD_TEXTURE_SIZE: u32 = 200;

// ── fixtures ───────────────────────────────────────────────────────────────

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rtfilter-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Red left half, blue right half.
fn write_quad_texture(dir: &Path) -> PathBuf {
    let path = dir.join("quad.png");
    RgbaImage::from_fn(QUAD_TEXTURE_SIZE, QUAD_TEXTURE_SIZE, |x, _| {
        if x < QUAD_TEXTURE_SIZE / 2 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([0, 0, 255, 255])
        }
    })
    .save(&path)
    .unwrap();
    path
}

struct PmdBuilder {
    bytes: Vec<u8>,
}

impl PmdBuilder {
    fn new() -> Self {
        let mut bytes = b"Pmd".to_vec();
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        let mut name = [0u8; 20];
        name[..4].copy_from_slice(b"test");
        bytes.extend_from_slice(&name);
        bytes.extend_from_slice(&[0u8; 256]);
        Self { bytes }
    }

    fn f32s(&mut self, values: &[f32]) {
        for v in values {
            self.bytes.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn vertices(mut self, positions: &[[f32; 3]]) -> Self {
        self.bytes.extend_from_slice(&(positions.len() as u32).to_le_bytes());
        for p in positions {
            self.f32s(p);
            self.f32s(&[0.0, 0.0, -1.0]);
            self.f32s(&[0.5, 0.5]);
            self.bytes.extend_from_slice(&[0, 0, 0, 0, 100, 0]);
        }
        self
    }

    fn indices(mut self, indices: &[u16]) -> Self {
        self.bytes.extend_from_slice(&(indices.len() as u32).to_le_bytes());
        for i in indices {
            self.bytes.extend_from_slice(&i.to_le_bytes());
        }
        self
    }

    /// Untextured red materials, one per entry in `index_counts`.
    fn materials(mut self, index_counts: &[u32]) -> Self {
        self.bytes.extend_from_slice(&(index_counts.len() as u32).to_le_bytes());
        for count in index_counts {
            self.f32s(&[1.0, 0.0, 0.0]); // diffuse
            self.f32s(&[1.0]); // alpha
            self.f32s(&[5.0]); // specularity
            self.f32s(&[0.0, 0.0, 0.0]); // specular
            self.f32s(&[0.0, 0.0, 0.0]); // ambient
            self.bytes.extend_from_slice(&[0, 0]);
            self.bytes.extend_from_slice(&count.to_le_bytes());
            self.bytes.extend_from_slice(&[0u8; 20]);
        }
        self
    }

    fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Two triangles facing the default camera, one covering the view centre.
fn two_material_model() -> Vec<u8> {
    PmdBuilder::new()
        .vertices(&[
            [-30.0, -10.0, 0.0],
            [0.0, 50.0, 0.0],
            [30.0, -10.0, 0.0],
            [60.0, 40.0, 0.0],
            [70.0, 60.0, 0.0],
            [80.0, 40.0, 0.0],
        ])
        .indices(&[0, 1, 2, 3, 4, 5])
        .materials(&[3, 3])
        .build()
}

struct Harness {
    ctx: GpuContext,
    loader: TextureLoader,
    scene: Scene,
    pipeline: FramePipeline,
}

fn require_gpu() -> bool {
    std::env::var("RTFILTER_REQUIRE_GPU").is_ok_and(|v| matches!(v.trim(), "1" | "true" | "yes"))
}

fn context() -> Option<GpuContext> {
    match GpuContext::new(DeviceDesc::default()) {
        Ok(ctx) => Some(ctx),
        Err(DeviceError::AdapterUnavailable(reason)) if !require_gpu() => {
            eprintln!("skipping: {reason}");
            None
        }
        Err(err) => panic!("context creation failed: {err}"),
    }
}

fn harness_with(dir: &Path, mode: FilterMode) -> Option<Harness> {
    let ctx = context()?;
    let mut loader = TextureLoader::new(&ctx).unwrap();
    let renderer = PmdRenderer::new(&ctx, &mut loader).unwrap();
    let view = SceneView::new(&ctx, CameraConfig::default(), SIZE, SIZE).unwrap();

    let texture = write_quad_texture(dir);
    let fallback = renderer.resources().defaults.white.clone();
    let mut quad = TexturedQuad::new(&ctx, &mut loader, &texture, &fallback).unwrap();
    if mode == FilterMode::Texture {
        let filtered = filter_texture(&ctx, quad.texture()).unwrap();
        quad = TexturedQuad::with_texture(&ctx, filtered).unwrap();
    }

    let mut scene = Scene::new(view, renderer);
    scene.quad = Some(quad);
    let pipeline = FramePipeline::with_mode(&ctx, SIZE, SIZE, mode).unwrap();
    Some(Harness { ctx, loader, scene, pipeline })
}

fn harness(dir: &Path) -> Option<Harness> {
    harness_with(dir, FilterMode::RenderTarget)
}

fn expected_grey(rgba: &[u8]) -> [u8; 4] {
    let color = Vec4::new(
        f32::from(rgba[0]),
        f32::from(rgba[1]),
        f32::from(rgba[2]),
        f32::from(rgba[3]),
    ) / 255.0;
    monochrome(color)
        .to_array()
        .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

fn pixel(data: &[u8], x: u32, y: u32) -> &[u8] {
    let at = ((y * SIZE + x) * 4) as usize;
    &data[at..at + 4]
}

// ── presented frames ───────────────────────────────────────────────────────

#[test]
fn presented_frame_is_monochrome_of_scene() {
    let dir = scratch_dir("monochrome");
    let Some(mut h) = harness(&dir) else { return };
    let mut sink = CaptureSink::new();

    let stats = h.pipeline.render(&h.scene, &mut sink).unwrap();
    assert_eq!(stats.frame_index, 0);
    assert_eq!(stats.draw_calls, 1);
    assert!(stats.graphics_fence >= 2);
    assert_eq!(stats.compute_fence, 1);

    let scene = h.pipeline.read_scene_target().unwrap();
    let frame = sink.last().unwrap();
    assert_eq!((frame.width, frame.height), (SIZE, SIZE));
    assert_eq!(frame.pixels.len(), scene.len());

    for (got, src) in frame.pixels.chunks_exact(4).zip(scene.chunks_exact(4)) {
        let want = expected_grey(src);
        for c in 0..4 {
            assert!(
                got[c].abs_diff(want[c]) <= 1,
                "presented {got:?} vs monochrome {want:?} of {src:?}"
            );
        }
    }

    // Quad is coloured, background is the white clear.
    let left = pixel(&scene, 80, 100);
    assert_eq!(left, &[255, 0, 0, 255]);
    let right = pixel(&scene, 120, 100);
    assert_eq!(right, &[0, 0, 255, 255]);
    assert_eq!(pixel(&scene, 2, 2), &[255, 255, 255, 255]);
    assert_ne!(pixel(&frame.pixels, 80, 100), left);

    let output = h.pipeline.read_output().unwrap();
    assert_eq!(output, frame.pixels);
    assert_eq!(h.loader.len(), 1);
    assert!(h.ctx.device.check_health().is_ok());
}

#[test]
fn frames_cycle_back_buffers() {
    let dir = scratch_dir("cycle");
    let Some(mut h) = harness(&dir) else { return };
    let mut sink = CaptureSink::new();

    let first = h.pipeline.render(&h.scene, &mut sink).unwrap();
    let second = h.pipeline.render(&h.scene, &mut sink).unwrap();
    let third = h.pipeline.render(&h.scene, &mut sink).unwrap();

    assert_eq!(
        [first.back_buffer_index, second.back_buffer_index, third.back_buffer_index],
        [0, 1, 0]
    );
    assert!(second.graphics_fence > first.graphics_fence);
    assert!(third.compute_fence > second.compute_fence);
    assert_eq!(third.frame_index, 2);
    assert_eq!(sink.frames_presented(), 3);
    assert_eq!(sink.last().unwrap().index, 0);
}

#[test]
fn model_draws_once_per_material() {
    let dir = scratch_dir("model");
    let Some(mut h) = harness(&dir) else { return };
    let model_path = dir.join("tri.pmd");
    std::fs::write(&model_path, two_material_model()).unwrap();

    let actor = PmdActor::load(&h.ctx, h.scene.renderer.resources(), &mut h.loader, &model_path).unwrap();
    assert_eq!(actor.material_count(), 2);
    h.scene.actors.push(actor);

    let mut sink = CaptureSink::new();
    let stats = h.pipeline.render(&h.scene, &mut sink).unwrap();
    assert_eq!(stats.draw_calls, 3);

    let scene = h.pipeline.read_scene_target().unwrap();
    let centre = pixel(&scene, SIZE / 2, SIZE / 2);
    assert_ne!(centre, &[255, 255, 255, 255]);

    let frame = sink.last().unwrap();
    let grey = pixel(&frame.pixels, SIZE / 2, SIZE / 2);
    assert_eq!(grey[0], grey[1]);
    assert_eq!(grey[1], grey[2]);
    assert!(h.ctx.device.check_health().is_ok());
}

// ── asset failures ─────────────────────────────────────────────────────────

#[test]
fn truncated_model_is_an_asset_error() {
    let dir = scratch_dir("truncated");
    let Some(mut h) = harness(&dir) else { return };
    let model_path = dir.join("short.pmd");
    let mut bytes = two_material_model();
    bytes.truncate(300);
    std::fs::write(&model_path, bytes).unwrap();

    let err = PmdActor::load(&h.ctx, h.scene.renderer.resources(), &mut h.loader, &model_path)
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::Asset(AssetError::Model { .. })), "{err}");
}

#[test]
fn missing_model_is_an_io_error() {
    let dir = scratch_dir("missing");
    let Some(mut h) = harness(&dir) else { return };

    let err = PmdActor::load(&h.ctx, h.scene.renderer.resources(), &mut h.loader, dir.join("none.pmd"))
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::Asset(AssetError::Io { .. })), "{err}");
}

#[test]
fn missing_quad_texture_falls_back() {
    let dir = scratch_dir("fallback");
    let Some(h) = harness(&dir) else { return };
    let mut loader = TextureLoader::new(&h.ctx).unwrap();
    let fallback = h.scene.renderer.resources().defaults.black.clone();

    let quad = TexturedQuad::new(&h.ctx, &mut loader, &dir.join("absent.png"), &fallback).unwrap();
    assert!(Resource::ptr_eq(quad.texture(), &fallback));
}

// ── texture filter mode ────────────────────────────────────────────────────

#[test]
fn texture_mode_shows_the_prefiltered_quad() {
    let dir = scratch_dir("texture-mode");
    let Some(mut h) = harness_with(&dir, FilterMode::Texture) else { return };
    let mut sink = CaptureSink::new();

    let quad_texture = h.scene.quad.as_ref().unwrap().texture().clone();
    assert_eq!(quad_texture.state(), ResourceState::PixelShaderResource);
    let desc = quad_texture.texture_desc().unwrap();
    assert_eq!((desc.width, desc.height), (QUAD_TEXTURE_SIZE, QUAD_TEXTURE_SIZE));

    let stats = h.pipeline.render(&h.scene, &mut sink).unwrap();
    assert_eq!(stats.compute_fence, 0);
    let first = sink.last().unwrap().pixels.clone();

    // Grey quad halves over the untouched white clear.
    let red = expected_grey(&[255, 0, 0, 255]);
    let blue = expected_grey(&[0, 0, 255, 255]);
    for (x, want) in [(80, red), (120, blue)] {
        let got = pixel(&first, x, 100);
        for c in 0..4 {
            assert!(got[c].abs_diff(want[c]) <= 1, "x={x}: {got:?} vs {want:?}");
        }
    }
    assert_eq!(pixel(&first, 2, 2), &[255, 255, 255, 255]);

    // Later frames reuse the filtered texture.
    let again = h.pipeline.render(&h.scene, &mut sink).unwrap();
    assert_eq!(again.compute_fence, 0);
    assert_eq!(sink.last().unwrap().pixels, first);
}

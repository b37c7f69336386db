use std::path::Path;

use anyhow::{Context, Result};
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use rtfilter_engine::core::{App, AppControl, FrameCtx};
use rtfilter_engine::device::{CaptureSink, GpuContext};
use rtfilter_engine::EngineError;
use rtfilter_engine::frame::{FilterMode, FramePipeline, filter_texture};
use rtfilter_engine::scene::{CameraConfig, PmdActor, PmdRenderer, Scene, SceneView, TexturedQuad};
use rtfilter_engine::texture::TextureLoader;

use crate::config::ViewerConfig;

/// Fixed step for headless runs, so captures do not depend on wall time.
const HEADLESS_DT: f32 = 1.0 / 60.0;
const TITLE_INTERVAL: u64 = 60;

/// Owns the device, scene and frame pipeline for the lifetime of the process.
pub struct Viewer {
    _ctx: GpuContext,
    _loader: TextureLoader,
    scene: Scene,
    pipeline: FramePipeline,
    title: String,
}

impl Viewer {
    pub fn new(ctx: GpuContext, config: &ViewerConfig) -> Result<Self> {
        let mut loader = TextureLoader::new(&ctx).context("failed to create the texture loader")?;
        let renderer = PmdRenderer::new(&ctx, &mut loader).context("failed to create the PMD renderer")?;
        let view = SceneView::new(&ctx, CameraConfig::default(), config.width, config.height)
            .context("failed to create the scene constants")?;

        let fallback = renderer.resources().defaults.white.clone();
        let mut quad = TexturedQuad::new(&ctx, &mut loader, &config.quad_texture, &fallback)
            .context("failed to create the textured quad")?;
        if config.filter == FilterMode::Texture {
            let filtered = filter_texture(&ctx, quad.texture()).context("failed to filter the quad texture")?;
            quad = TexturedQuad::with_texture(&ctx, filtered).context("failed to create the filtered quad")?;
        }

        let mut scene = Scene::new(view, renderer);
        scene.quad = Some(quad);

        if config.filter == FilterMode::RenderTarget {
            let actor = PmdActor::load(&ctx, scene.renderer.resources(), &mut loader, &config.model);
            if let Some(actor) = skip_asset_error(actor).context("failed to upload the model")? {
                scene.actors.push(actor);
            }
        }

        let pipeline = FramePipeline::with_mode(&ctx, config.width, config.height, config.filter)
            .context("failed to create the frame pipeline")?;
        log::info!(
            "viewer ready: {}x{}, {} texture(s) cached",
            config.width,
            config.height,
            loader.len()
        );

        Ok(Self {
            _ctx: ctx,
            _loader: loader,
            scene,
            pipeline,
            title: format!("rtfilter - {}", config.model.display()),
        })
    }

    /// Renders `frames` frames into memory and optionally writes the last one.
    pub fn run_headless(&mut self, frames: u32, capture: Option<&Path>) -> Result<()> {
        let mut sink = CaptureSink::new();
        for _ in 0..frames {
            self.scene.update(HEADLESS_DT)?;
            let stats = self.pipeline.render(&self.scene, &mut sink)?;
            log::debug!("headless {stats:?}");
        }
        log::info!("rendered {} headless frame(s)", sink.frames_presented());

        let Some(path) = capture else {
            return Ok(());
        };
        let frame = sink.last().context("no frame was presented")?;
        image::save_buffer(
            path,
            &frame.pixels,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgba8,
        )
        .with_context(|| format!("failed to write capture {}", path.display()))?;
        log::info!("wrote {}", path.display());
        Ok(())
    }
}

/// A missing or broken asset is logged and skipped; device errors propagate.
fn skip_asset_error<T>(result: Result<T, EngineError>) -> Result<Option<T>, EngineError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(EngineError::Asset(err)) => {
            log::error!("model not loaded: {err}");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

impl App for Viewer {
    fn on_window_event(&mut self, event: &WindowEvent) -> AppControl {
        match event {
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape) =>
            {
                AppControl::Exit
            }
            _ => AppControl::Continue,
        }
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> Result<AppControl> {
        self.scene.update(ctx.time.dt)?;
        let stats = self.pipeline.render(&self.scene, &mut *ctx.presenter)?;

        if stats.frame_index % TITLE_INTERVAL == 0 {
            let fps = 1.0 / ctx.time.dt;
            ctx.runtime
                .set_title(format!("{} ({fps:.0} fps, {} draws)", self.title, stats.draw_calls));
        }
        Ok(AppControl::Continue)
    }
}

use anyhow::{Context, Result};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::device::{DeviceError, PresentFrame, PresentSink};

use super::blit::Blit;
use super::surface::{self, SurfaceTarget};
use super::{PresenterInit, SurfaceErrorAction};

/// Shows presented back buffers in a winit window.
///
/// The surface borrows the window, so the presenter cannot outlive it.
pub struct WindowPresenter<'w> {
    window: &'w Window,
    target: SurfaceTarget<'w>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    blit: Blit,
    skipped_frames: u64,
}

impl<'w> WindowPresenter<'w> {
    /// Adapter and device acquisition is asynchronous under wgpu.
    pub async fn new(window: &'w Window, init: PresenterInit) -> Result<Self> {
        let size = window.inner_size();
        anyhow::ensure!(size.width > 0 && size.height > 0, "window has zero size");

        let PresenterInit {
            prefer_srgb,
            present_mode,
            alpha_mode,
            power_preference,
            desired_maximum_frame_latency,
        } = init;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .context("failed to create wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;
        let info = adapter.get_info();
        log::info!("presenting through {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("rtfilter presenter device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let caps = surface.get_capabilities(&adapter);
        let format = surface::choose_surface_format(&caps, prefer_srgb)
            .context("no supported surface formats")?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width,
            height: size.height,
            present_mode,
            alpha_mode: surface::choose_alpha_mode(&caps, alpha_mode),
            view_formats: vec![],
            desired_maximum_frame_latency,
        };
        let target = SurfaceTarget::new(surface, &device, config);
        let blit = Blit::new(&device, format);

        Ok(Self {
            window,
            target,
            device,
            queue,
            blit,
            skipped_frames: 0,
        })
    }

    pub fn window(&self) -> &'w Window {
        self.window
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.target.format()
    }

    /// Current drawable size in physical pixels.
    pub fn size(&self) -> PhysicalSize<u32> {
        self.target.size()
    }

    /// Frames dropped because the surface could not be acquired.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.target.resize(&self.device, new_size);
    }

    /// Reconfigures after a lost or outdated surface and says what to do with the frame.
    pub fn handle_surface_error(&mut self, err: wgpu::SurfaceError) -> SurfaceErrorAction {
        self.target.recover(&self.device, err)
    }
}

impl PresentSink for WindowPresenter<'_> {
    fn present(&mut self, frame: &PresentFrame<'_>) -> Result<(), DeviceError> {
        if !self.target.is_drawable() {
            return Ok(());
        }

        self.blit.upload(&self.device, &self.queue, frame)?;

        let surface_texture = match self.target.acquire(&self.device) {
            Ok(texture) => texture,
            Err(SurfaceErrorAction::Fatal) => {
                return Err(DeviceError::DeviceRemoved("window surface is out of memory".into()));
            }
            Err(SurfaceErrorAction::Reconfigured | SurfaceErrorAction::SkipFrame) => {
                self.skipped_frames += 1;
                return Ok(());
            }
        };

        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("rtfilter present encoder"),
            });
        self.blit.draw(&mut encoder, &view);

        self.window.pre_present_notify();
        self.queue.submit(std::iter::once(encoder.finish()));
        surface_texture.present();
        Ok(())
    }
}

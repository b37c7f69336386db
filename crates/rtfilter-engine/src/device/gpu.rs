//! The wgpu device recorded command lists are replayed onto.

use std::sync::Arc;

use crossbeam::channel::bounded;
use parking_lot::Mutex;

use super::DeviceError;
use super::resource::{TEXTURE_DATA_PITCH_ALIGNMENT, TextureDesc, align_to};

/// Owns the wgpu device and queue behind a [`super::Device`].
///
/// wgpu validation errors are collected instead of panicking; whoever issued
/// the work drains them with [`GpuBackend::take_error`].
pub(crate) struct GpuBackend {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
    errors: Arc<Mutex<Vec<String>>>,
}

impl GpuBackend {
    /// Blocks on adapter and device acquisition.
    pub(crate) fn request(prefer_fallback: bool) -> Result<Self, DeviceError> {
        pollster::block_on(Self::request_async(prefer_fallback))
    }

    async fn request_async(prefer_fallback: bool) -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let options = |force_fallback_adapter| wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter,
        };
        let mut adapter = instance.request_adapter(&options(prefer_fallback)).await;
        if adapter.is_err() && prefer_fallback {
            log::debug!("no fallback adapter; trying hardware adapters");
            adapter = instance.request_adapter(&options(false)).await;
        }
        let adapter = adapter.map_err(|e| DeviceError::AdapterUnavailable(e.to_string()))?;
        let info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("rtfilter device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| DeviceError::AdapterUnavailable(format!("{}: {e}", info.name)))?;

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        device.on_uncaptured_error(Arc::new(move |error: wgpu::Error| {
            sink.lock().push(error.to_string());
        }));

        log::info!("replaying on {} ({:?}, {:?})", info.name, info.backend, info.device_type);
        Ok(Self { device, queue, info, errors })
    }

    pub(crate) fn adapter_name(&self) -> &str {
        &self.info.name
    }

    /// Validation errors raised since the last call, joined into one message.
    pub(crate) fn take_error(&self) -> Option<String> {
        let mut errors = self.errors.lock();
        if errors.is_empty() {
            return None;
        }
        let joined = errors.join("; ");
        errors.clear();
        Some(joined)
    }

    /// Fails with [`DeviceError::Backend`] if wgpu reported anything since the last check.
    pub(crate) fn check(&self) -> Result<(), DeviceError> {
        match self.take_error() {
            Some(error) => Err(DeviceError::Backend(error)),
            None => Ok(()),
        }
    }

    /// Blocks until everything submitted to the wgpu queue has finished.
    pub(crate) fn wait_idle(&self) -> Result<(), DeviceError> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| DeviceError::DeviceRemoved(format!("wgpu poll failed: {e}")))
    }

    /// Maps `buffer` and copies its first `len` bytes out.
    pub(crate) fn read_buffer(&self, buffer: &wgpu::Buffer, len: usize) -> Result<Vec<u8>, DeviceError> {
        let slice = buffer.slice(..);
        let (sender, receiver) = bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.wait_idle()?;
        receiver
            .recv()
            .map_err(|_| DeviceError::DeviceRemoved("buffer map callback dropped".into()))?
            .map_err(|e| DeviceError::Backend(format!("buffer map failed: {e}")))?;

        let mut bytes = slice.get_mapped_range().to_vec();
        buffer.unmap();
        bytes.truncate(len);
        Ok(bytes)
    }

    /// Copies a whole texture out, rows tightly packed.
    pub(crate) fn read_texture(&self, texture: &wgpu::Texture, desc: &TextureDesc) -> Result<Vec<u8>, DeviceError> {
        let row_size = desc.row_bytes();
        let row_pitch = align_to(row_size, u64::from(TEXTURE_DATA_PITCH_ALIGNMENT));
        let bytes_per_row = u32::try_from(row_pitch)
            .map_err(|_| DeviceError::InvalidResource(format!("row pitch {row_pitch} does not fit a copy")))?;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rtfilter texture readback"),
            size: row_pitch * u64::from(desc.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("rtfilter texture readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(desc.height),
                },
            },
            desc.extent(),
        );
        self.queue.submit([encoder.finish()]);
        self.check()?;

        let padded = self.read_buffer(&staging, (row_pitch * u64::from(desc.height)) as usize)?;
        let row = row_size as usize;
        Ok(padded
            .chunks_exact(row_pitch as usize)
            .flat_map(|line| &line[..row])
            .copied()
            .collect())
    }
}

//! Back buffers and presentation.

use std::sync::Arc;

use super::queue::CommandQueue;
use super::resource::{HeapType, ResourceState, TextureDesc, TextureFlags};
use super::{ClearValue, Device, DeviceError, Format, Resource};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub buffer_count: u32,
}

impl SwapChainDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, format: Format::Rgba8Unorm, buffer_count: 2 }
    }
}

/// One presented image, tightly packed.
#[derive(Debug)]
pub struct PresentFrame<'a> {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub pixels: &'a [u8],
}

/// Destination for presented back buffers.
pub trait PresentSink {
    fn present(&mut self, frame: &PresentFrame<'_>) -> Result<(), DeviceError>;
}

/// Keeps the most recent presented frame in memory.
#[derive(Debug, Default)]
pub struct CaptureSink {
    frames_presented: u64,
    last: Option<CapturedFrame>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub pixels: Vec<u8>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn last(&self) -> Option<&CapturedFrame> {
        self.last.as_ref()
    }
}

impl PresentSink for CaptureSink {
    fn present(&mut self, frame: &PresentFrame<'_>) -> Result<(), DeviceError> {
        self.frames_presented += 1;
        self.last = Some(CapturedFrame {
            index: frame.index,
            width: frame.width,
            height: frame.height,
            format: frame.format,
            pixels: frame.pixels.to_vec(),
        });
        Ok(())
    }
}

/// Ring of back buffers presented through a [`PresentSink`].
pub struct SwapChain {
    queue: Arc<CommandQueue>,
    desc: SwapChainDesc,
    buffers: Vec<Resource>,
    current: u32,
}

impl SwapChain {
    pub fn desc(&self) -> &SwapChainDesc {
        &self.desc
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn current_back_buffer_index(&self) -> u32 {
        self.current
    }

    pub fn buffer(&self, index: u32) -> Option<&Resource> {
        self.buffers.get(index as usize)
    }

    /// Hands the current back buffer to `sink` and advances to the next one.
    ///
    /// Waits for the presenting queue first; the buffer must be in `Present`.
    pub fn present(&mut self, sink: &mut dyn PresentSink) -> Result<(), DeviceError> {
        self.queue.wait_idle()?;
        let buffer = &self.buffers[self.current as usize];
        let state = buffer.state();
        if state != ResourceState::Present {
            return Err(DeviceError::InvalidResource(format!(
                "{} presented while in {state:?}",
                buffer.name()
            )));
        }
        let desc = *buffer
            .texture_desc()
            .ok_or_else(|| DeviceError::InvalidResource(format!("{} is not a texture", buffer.name())))?;
        let pixels = self.queue.device().gpu().read_texture(buffer.gpu_texture()?, &desc)?;
        sink.present(&PresentFrame {
            index: self.current,
            width: self.desc.width,
            height: self.desc.height,
            format: self.desc.format,
            pixels: &pixels,
        })?;
        self.current = (self.current + 1) % self.desc.buffer_count;
        Ok(())
    }
}

impl std::fmt::Debug for SwapChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapChain")
            .field("desc", &self.desc)
            .field("current", &self.current)
            .finish()
    }
}

impl Device {
    /// Creates `buffer_count` render-target back buffers in `Present` state.
    pub fn create_swap_chain(&self, queue: &Arc<CommandQueue>, desc: SwapChainDesc) -> Result<SwapChain, DeviceError> {
        if desc.buffer_count < 2 {
            return Err(DeviceError::InvalidResource(format!(
                "swap chain needs at least 2 buffers, got {}",
                desc.buffer_count
            )));
        }
        if !desc.format.is_color() {
            return Err(DeviceError::InvalidResource(format!("{:?} cannot be presented", desc.format)));
        }
        let texture = TextureDesc::new_2d(desc.format, desc.width, desc.height).with_flags(TextureFlags::RENDER_TARGET);
        let buffers = (0..desc.buffer_count)
            .map(|i| {
                let buffer = self.create_texture_2d(
                    texture,
                    HeapType::Default,
                    ResourceState::Present,
                    Some(ClearValue::Color([0.0, 0.0, 0.0, 1.0])),
                )?;
                buffer.set_name(format!("back buffer {i}"));
                Ok(buffer)
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;
        log::debug!(
            "swap chain: {} x {}x{} {:?}",
            desc.buffer_count,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(SwapChain { queue: Arc::clone(queue), desc, buffers, current: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CommandListType, testing};

    #[test]
    fn present_cycles_buffers() {
        let Some(device) = testing::device() else { return };
        let queue = Arc::new(device.create_command_queue(CommandListType::Direct).unwrap());
        let mut chain = device.create_swap_chain(&queue, SwapChainDesc::new(4, 4)).unwrap();
        let mut sink = CaptureSink::new();

        assert_eq!(chain.current_back_buffer_index(), 0);
        chain.present(&mut sink).unwrap();
        assert_eq!(chain.current_back_buffer_index(), 1);
        chain.present(&mut sink).unwrap();
        assert_eq!(chain.current_back_buffer_index(), 0);

        assert_eq!(sink.frames_presented(), 2);
        let last = sink.last().unwrap();
        assert_eq!(last.index, 1);
        assert_eq!(last.pixels.len(), 4 * 4 * 4);
    }

    #[test]
    fn single_buffer_chain_is_rejected() {
        let Some(device) = testing::device() else { return };
        let queue = Arc::new(device.create_command_queue(CommandListType::Direct).unwrap());
        let desc = SwapChainDesc { buffer_count: 1, ..SwapChainDesc::new(4, 4) };
        assert!(device.create_swap_chain(&queue, desc).is_err());
    }
}

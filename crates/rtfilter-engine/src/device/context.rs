use std::sync::Arc;

use super::command::CommandListType;
use super::queue::CommandQueue;
use super::{Device, DeviceDesc, DeviceError};

/// Device plus the graphics and compute queues every renderer component needs.
///
/// Passed explicitly to constructors; nothing in the engine reaches for a global.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Device,
    pub graphics_queue: Arc<CommandQueue>,
    pub compute_queue: Arc<CommandQueue>,
}

impl GpuContext {
    pub fn new(desc: DeviceDesc) -> Result<Self, DeviceError> {
        let device = Device::new(desc)?;
        let graphics_queue = Arc::new(device.create_command_queue(CommandListType::Direct)?);
        let compute_queue = Arc::new(device.create_command_queue(CommandListType::Compute)?);
        log::info!(
            "gpu context ready (profile: {}, gpu: {}, validation: {})",
            device.adapter().name(),
            device.adapter_name(),
            device.desc().validation
        );
        Ok(Self { device, graphics_queue, compute_queue })
    }

    pub fn queue(&self, kind: CommandListType) -> &Arc<CommandQueue> {
        match kind {
            CommandListType::Direct => &self.graphics_queue,
            CommandListType::Compute => &self.compute_queue,
        }
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext").field("device", &self.device).finish()
    }
}

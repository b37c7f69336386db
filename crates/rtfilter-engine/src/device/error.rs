/// Errors reported by the explicit device layer.
///
/// Validation failures discovered while a queue executes a command list do not
/// surface here directly; they remove the device and every later call reports
/// [`DeviceError::DeviceRemoved`] with the original reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("out of memory: requested {requested} bytes with {available} bytes left in budget")]
    OutOfMemory { requested: u64, available: u64 },
    #[error("invalid resource: {0}")]
    InvalidResource(String),
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),
    #[error("invalid command list: {0}")]
    InvalidCommandList(String),
    #[error("command allocator reset while {in_flight} submission(s) using it are still executing")]
    AllocatorInUse { in_flight: usize },
    #[error("device removed: {0}")]
    DeviceRemoved(String),
    #[error("no usable GPU adapter: {0}")]
    AdapterUnavailable(String),
    #[error("wgpu rejected the work: {0}")]
    Backend(String),
}

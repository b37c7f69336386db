use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::DeviceError;
use super::descriptor::{DescriptorHeapKind, HeapRegistry};
use super::gpu::GpuBackend;

/// Hardware profile the device emulates.
///
/// The profile changes values an application must query rather than assume,
/// such as descriptor handle increments. `Software` also asks wgpu for its
/// fallback adapter first.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum AdapterProfile {
    Nvidia,
    Amd,
    Intel,
    #[default]
    Software,
}

impl AdapterProfile {
    pub(crate) fn descriptor_increment(self, kind: DescriptorHeapKind) -> u32 {
        use DescriptorHeapKind::*;
        match (self, kind) {
            (Self::Nvidia, CbvSrvUav) => 32,
            (Self::Nvidia, Rtv | Dsv) => 32,
            (Self::Amd, CbvSrvUav) => 32,
            (Self::Amd, Rtv | Dsv) => 64,
            (Self::Intel, CbvSrvUav) => 64,
            (Self::Intel, Rtv | Dsv) => 16,
            (Self::Software, CbvSrvUav) => 48,
            (Self::Software, Rtv | Dsv) => 24,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nvidia => "nvidia",
            Self::Amd => "amd",
            Self::Intel => "intel",
            Self::Software => "software",
        }
    }

    /// Parses a profile name as printed by [`AdapterProfile::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "nvidia" => Some(Self::Nvidia),
            "amd" => Some(Self::Amd),
            "intel" => Some(Self::Intel),
            "software" | "warp" => Some(Self::Software),
            _ => None,
        }
    }
}

/// Device creation parameters.
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    pub adapter: AdapterProfile,

    /// Emit debug-layer warnings (redundant barriers, clear value mismatches).
    ///
    /// Errors such as barrier state mismatches are always enforced.
    pub validation: bool,

    /// Upper bound on live resource bytes. `None` means unbounded.
    pub memory_budget: Option<u64>,
}

impl Default for DeviceDesc {
    fn default() -> Self {
        Self {
            adapter: AdapterProfile::default(),
            validation: cfg!(debug_assertions),
            memory_budget: None,
        }
    }
}

pub(crate) struct DeviceShared {
    pub(crate) desc: DeviceDesc,
    pub(crate) allocated: Arc<AtomicU64>,
    next_id: AtomicU64,
    removed: Mutex<Option<String>>,
    pub(crate) heaps: Mutex<HeapRegistry>,
    pub(crate) gpu: GpuBackend,
}

/// Explicit device handle.
///
/// Cloning is cheap; every clone refers to the same device. All GPU objects are
/// created through it.
#[derive(Clone)]
pub struct Device {
    pub(crate) shared: Arc<DeviceShared>,
}

impl Device {
    /// Fails with [`DeviceError::AdapterUnavailable`] when wgpu finds no adapter.
    pub fn new(desc: DeviceDesc) -> Result<Self, DeviceError> {
        log::info!(
            "creating device: adapter={} validation={} budget={:?}",
            desc.adapter.name(),
            desc.validation,
            desc.memory_budget
        );
        let gpu = GpuBackend::request(desc.adapter == AdapterProfile::Software)?;
        Ok(Self {
            shared: Arc::new(DeviceShared {
                desc,
                allocated: Arc::new(AtomicU64::new(0)),
                next_id: AtomicU64::new(1),
                removed: Mutex::new(None),
                heaps: Mutex::new(HeapRegistry::default()),
                gpu,
            }),
        })
    }

    pub fn desc(&self) -> &DeviceDesc {
        &self.shared.desc
    }

    pub fn adapter(&self) -> AdapterProfile {
        self.shared.desc.adapter
    }

    /// Name wgpu reports for the adapter work is replayed on.
    pub fn adapter_name(&self) -> &str {
        self.shared.gpu.adapter_name()
    }

    pub(crate) fn gpu(&self) -> &GpuBackend {
        &self.shared.gpu
    }

    pub(crate) fn validation(&self) -> bool {
        self.shared.desc.validation
    }

    /// Bytes currently held by live resources.
    pub fn allocated_bytes(&self) -> u64 {
        self.shared.allocated.load(Ordering::Acquire)
    }

    pub(crate) fn next_object_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn release(&self, bytes: u64) {
        self.shared.allocated.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Charges `bytes` against the memory budget.
    pub(crate) fn reserve(&self, bytes: u64) -> Result<(), DeviceError> {
        let budget = self.shared.desc.memory_budget;
        self.shared
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                let next = live.checked_add(bytes)?;
                match budget {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            })
            .map(|_| ())
            .map_err(|live| DeviceError::OutOfMemory {
                requested: bytes,
                available: budget.map_or(u64::MAX, |limit| limit.saturating_sub(live)),
            })
    }

    /// Marks the device as removed. The first reason is kept.
    pub(crate) fn remove(&self, reason: impl Into<String>) {
        let mut removed = self.shared.removed.lock();
        if removed.is_none() {
            let reason = reason.into();
            log::error!("device removed: {reason}");
            *removed = Some(reason);
        }
    }

    pub fn removal_reason(&self) -> Option<String> {
        self.shared.removed.lock().clone()
    }

    /// Fails with [`DeviceError::DeviceRemoved`] once the device has been removed.
    pub fn check_health(&self) -> Result<(), DeviceError> {
        match self.removal_reason() {
            Some(reason) => Err(DeviceError::DeviceRemoved(reason)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("adapter", &self.shared.desc.adapter)
            .field("gpu", &self.adapter_name())
            .field("allocated_bytes", &self.allocated_bytes())
            .field("removed", &self.removal_reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing;

    #[test]
    fn budget_rejects_overcommit() {
        let Some(device) = testing::device_with(DeviceDesc {
            memory_budget: Some(1000),
            ..Default::default()
        }) else {
            return;
        };
        device.reserve(600).unwrap();
        let err = device.reserve(500).unwrap_err();
        assert_eq!(
            err,
            DeviceError::OutOfMemory {
                requested: 500,
                available: 400
            }
        );
        assert_eq!(device.allocated_bytes(), 600);
    }

    #[test]
    fn first_removal_reason_wins() {
        let Some(device) = testing::device() else { return };
        assert!(device.check_health().is_ok());
        device.remove("first");
        device.remove("second");
        assert_eq!(
            device.check_health(),
            Err(DeviceError::DeviceRemoved("first".into()))
        );
    }

    #[test]
    fn increments_differ_between_adapters() {
        let k = DescriptorHeapKind::Rtv;
        assert_ne!(
            AdapterProfile::Amd.descriptor_increment(k),
            AdapterProfile::Intel.descriptor_increment(k)
        );
    }
}

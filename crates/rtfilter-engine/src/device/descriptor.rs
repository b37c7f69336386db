use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::resource::{CONSTANT_BUFFER_ALIGNMENT, ResourceDesc, TextureFlags};
use super::{Device, DeviceError, Format, Resource};

/// Descriptor heap flavours.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorHeapKind {
    CbvSrvUav,
    Rtv,
    Dsv,
}

/// CPU-side descriptor address.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct CpuDescriptorHandle {
    pub ptr: u64,
}

impl CpuDescriptorHandle {
    /// Advances by `count` descriptors of `increment` bytes.
    pub fn offset(self, count: u32, increment: u32) -> Self {
        Self {
            ptr: self.ptr + u64::from(count) * u64::from(increment),
        }
    }
}

/// GPU-side descriptor address, valid only for shader-visible heaps.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    pub fn offset(self, count: u32, increment: u32) -> Self {
        Self {
            ptr: self.ptr + u64::from(count) * u64::from(increment),
        }
    }

    pub fn is_null(self) -> bool {
        self.ptr == 0
    }
}

/// A view written into a descriptor slot.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewDesc {
    /// `offset` and `size` must both be multiples of 256.
    ConstantBuffer { resource: Resource, offset: u64, size: u64 },
    /// `Format::Unknown` uses the resource format.
    ShaderResource { resource: Resource, format: Format },
    UnorderedAccess { resource: Resource, format: Format },
    RenderTarget { resource: Resource, format: Format },
    DepthStencil { resource: Resource },
}

impl ViewDesc {
    pub fn srv(resource: &Resource) -> Self {
        Self::ShaderResource { resource: resource.clone(), format: Format::Unknown }
    }

    pub fn uav(resource: &Resource) -> Self {
        Self::UnorderedAccess { resource: resource.clone(), format: Format::Unknown }
    }

    pub fn rtv(resource: &Resource) -> Self {
        Self::RenderTarget { resource: resource.clone(), format: Format::Unknown }
    }

    pub fn dsv(resource: &Resource) -> Self {
        Self::DepthStencil { resource: resource.clone() }
    }

    /// View over the whole buffer.
    pub fn cbv(resource: &Resource) -> Self {
        Self::ConstantBuffer {
            resource: resource.clone(),
            offset: 0,
            size: resource.size_bytes(),
        }
    }

    pub fn resource(&self) -> &Resource {
        match self {
            Self::ConstantBuffer { resource, .. }
            | Self::ShaderResource { resource, .. }
            | Self::UnorderedAccess { resource, .. }
            | Self::RenderTarget { resource, .. }
            | Self::DepthStencil { resource } => resource,
        }
    }

    fn heap_kind(&self) -> DescriptorHeapKind {
        match self {
            Self::ConstantBuffer { .. } | Self::ShaderResource { .. } | Self::UnorderedAccess { .. } => {
                DescriptorHeapKind::CbvSrvUav
            }
            Self::RenderTarget { .. } => DescriptorHeapKind::Rtv,
            Self::DepthStencil { .. } => DescriptorHeapKind::Dsv,
        }
    }

    /// Texel format the view reads or writes.
    pub fn format(&self) -> Format {
        let explicit = match self {
            Self::ShaderResource { format, .. }
            | Self::UnorderedAccess { format, .. }
            | Self::RenderTarget { format, .. } => *format,
            Self::ConstantBuffer { .. } | Self::DepthStencil { .. } => Format::Unknown,
        };
        match explicit {
            Format::Unknown => self
                .resource()
                .texture_desc()
                .map_or(Format::Unknown, |d| d.format),
            f => f,
        }
    }

    fn validate(&self) -> Result<(), DeviceError> {
        let invalid = |msg: String| Err(DeviceError::InvalidDescriptor(msg));
        let resource = self.resource();

        if let Self::ConstantBuffer { offset, size, .. } = self {
            let ResourceDesc::Buffer { size: buffer_size } = *resource.desc() else {
                return invalid(format!("CBV over texture {}", resource.name()));
            };
            if *size == 0 || offset % CONSTANT_BUFFER_ALIGNMENT != 0 || size % CONSTANT_BUFFER_ALIGNMENT != 0 {
                return invalid(format!(
                    "CBV offset {offset} / size {size} on {} must be non-empty multiples of {CONSTANT_BUFFER_ALIGNMENT}",
                    resource.name()
                ));
            }
            if offset + size > buffer_size {
                return invalid(format!(
                    "CBV [{offset}, {}) exceeds {} ({buffer_size} bytes)",
                    offset + size,
                    resource.name()
                ));
            }
            return Ok(());
        }

        let Some(desc) = resource.texture_desc() else {
            return invalid(format!("{} view over buffer {}", kind_name(self), resource.name()));
        };
        if self.format() != desc.format {
            return invalid(format!(
                "view format {:?} differs from {} format {:?}",
                self.format(),
                resource.name(),
                desc.format
            ));
        }
        let required = match self {
            Self::UnorderedAccess { .. } => Some(TextureFlags::UNORDERED_ACCESS),
            Self::RenderTarget { .. } => Some(TextureFlags::RENDER_TARGET),
            Self::DepthStencil { .. } => Some(TextureFlags::DEPTH_STENCIL),
            _ => None,
        };
        match required {
            Some(flag) if !desc.flags.contains(flag) => invalid(format!(
                "{} view needs {flag:?} on {}",
                kind_name(self),
                resource.name()
            )),
            _ => Ok(()),
        }
    }
}

fn kind_name(view: &ViewDesc) -> &'static str {
    match view {
        ViewDesc::ConstantBuffer { .. } => "CBV",
        ViewDesc::ShaderResource { .. } => "SRV",
        ViewDesc::UnorderedAccess { .. } => "UAV",
        ViewDesc::RenderTarget { .. } => "RTV",
        ViewDesc::DepthStencil { .. } => "DSV",
    }
}

pub(crate) struct HeapShared {
    id: u64,
    kind: DescriptorHeapKind,
    capacity: u32,
    shader_visible: bool,
    increment: u32,
    cpu_base: u64,
    gpu_base: u64,
    slots: RwLock<Vec<Option<ViewDesc>>>,
}

/// Fixed-capacity array of descriptors.
#[derive(Clone)]
pub struct DescriptorHeap {
    pub(crate) inner: Arc<HeapShared>,
}

impl DescriptorHeap {
    pub fn kind(&self) -> DescriptorHeapKind {
        self.inner.kind
    }

    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    pub fn is_shader_visible(&self) -> bool {
        self.inner.shader_visible
    }

    pub fn cpu_start(&self) -> CpuDescriptorHandle {
        CpuDescriptorHandle { ptr: self.inner.cpu_base }
    }

    /// Start of the GPU handle range; null for heaps that are not shader visible.
    pub fn gpu_start(&self) -> GpuDescriptorHandle {
        GpuDescriptorHandle { ptr: self.inner.gpu_base }
    }

    pub fn cpu_handle(&self, slot: u32) -> CpuDescriptorHandle {
        self.cpu_start().offset(slot, self.inner.increment)
    }

    pub fn gpu_handle(&self, slot: u32) -> GpuDescriptorHandle {
        if !self.inner.shader_visible {
            return GpuDescriptorHandle::default();
        }
        self.gpu_start().offset(slot, self.inner.increment)
    }

    /// Slot addressed by a CPU handle, if it points inside this heap on a slot boundary.
    pub(crate) fn cpu_slot(&self, handle: CpuDescriptorHandle) -> Option<u32> {
        slot_in(handle.ptr, self.inner.cpu_base, self.inner.increment, self.inner.capacity)
    }

    pub(crate) fn gpu_slot(&self, handle: GpuDescriptorHandle) -> Option<u32> {
        if !self.inner.shader_visible {
            return None;
        }
        slot_in(handle.ptr, self.inner.gpu_base, self.inner.increment, self.inner.capacity)
    }

    pub(crate) fn get(&self, slot: u32) -> Option<ViewDesc> {
        self.inner.slots.read().get(slot as usize).cloned().flatten()
    }

    pub fn ptr_eq(a: &DescriptorHeap, b: &DescriptorHeap) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl std::fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorHeap")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("capacity", &self.inner.capacity)
            .field("shader_visible", &self.inner.shader_visible)
            .finish()
    }
}

fn slot_in(ptr: u64, base: u64, increment: u32, capacity: u32) -> Option<u32> {
    let rel = ptr.checked_sub(base)?;
    let increment = u64::from(increment);
    if rel % increment != 0 {
        return None;
    }
    let slot = rel / increment;
    (slot < u64::from(capacity)).then_some(slot as u32)
}

// Heaps occupy disjoint address windows separated by an unmapped gap so a
// handle that runs off the end of one heap never lands in the next.
const CPU_ADDRESS_BASE: u64 = 0x0000_1000_0000;
const GPU_ADDRESS_BASE: u64 = 0x7F00_0000_0000;
const HEAP_WINDOW_ALIGN: u64 = 0x1_0000;

pub(crate) struct HeapRegistry {
    by_cpu_base: BTreeMap<u64, Weak<HeapShared>>,
    next_cpu: u64,
    next_gpu: u64,
}

impl Default for HeapRegistry {
    fn default() -> Self {
        Self {
            by_cpu_base: BTreeMap::new(),
            next_cpu: CPU_ADDRESS_BASE,
            next_gpu: GPU_ADDRESS_BASE,
        }
    }
}

impl HeapRegistry {
    fn reserve(&mut self, span: u64, shader_visible: bool) -> (u64, u64) {
        let window = (span / HEAP_WINDOW_ALIGN + 2) * HEAP_WINDOW_ALIGN;
        let cpu = self.next_cpu;
        self.next_cpu += window;
        let gpu = if shader_visible {
            let gpu = self.next_gpu;
            self.next_gpu += window;
            gpu
        } else {
            0
        };
        self.by_cpu_base.retain(|_, heap| heap.strong_count() > 0);
        (cpu, gpu)
    }

    fn lookup(&self, ptr: u64) -> Option<DescriptorHeap> {
        let (_, weak) = self.by_cpu_base.range(..=ptr).next_back()?;
        weak.upgrade().map(|inner| DescriptorHeap { inner })
    }
}

impl Device {
    /// Per-adapter distance between consecutive descriptors of `kind`.
    pub fn descriptor_increment_size(&self, kind: DescriptorHeapKind) -> u32 {
        self.adapter().descriptor_increment(kind)
    }

    pub fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeap, DeviceError> {
        self.check_health()?;
        if capacity == 0 {
            return Err(DeviceError::InvalidDescriptor("descriptor heap capacity is zero".into()));
        }
        if shader_visible && kind != DescriptorHeapKind::CbvSrvUav {
            return Err(DeviceError::InvalidDescriptor(format!(
                "{kind:?} heaps cannot be shader visible"
            )));
        }

        let increment = self.descriptor_increment_size(kind);
        let mut registry = self.shared.heaps.lock();
        let (cpu_base, gpu_base) =
            registry.reserve(u64::from(capacity) * u64::from(increment), shader_visible);
        let inner = Arc::new(HeapShared {
            id: self.next_object_id(),
            kind,
            capacity,
            shader_visible,
            increment,
            cpu_base,
            gpu_base,
            slots: RwLock::new(vec![None; capacity as usize]),
        });
        registry.by_cpu_base.insert(cpu_base, Arc::downgrade(&inner));
        log::trace!("descriptor heap#{}: {kind:?} x{capacity} visible={shader_visible}", inner.id);
        Ok(DescriptorHeap { inner })
    }

    /// Resolves a CPU handle to its heap and slot.
    pub(crate) fn resolve_cpu_handle(
        &self,
        handle: CpuDescriptorHandle,
    ) -> Result<(DescriptorHeap, u32), DeviceError> {
        let heap = self.shared.heaps.lock().lookup(handle.ptr);
        heap.and_then(|heap| heap.cpu_slot(handle).map(|slot| (heap, slot)))
            .ok_or_else(|| {
                DeviceError::InvalidDescriptor(format!(
                    "CPU handle {:#x} does not address a descriptor slot",
                    handle.ptr
                ))
            })
    }

    /// Writes `view` into the slot addressed by `dest`.
    pub fn create_view(&self, view: ViewDesc, dest: CpuDescriptorHandle) -> Result<(), DeviceError> {
        self.check_health()?;
        let (heap, slot) = self.resolve_cpu_handle(dest)?;
        if heap.kind() != view.heap_kind() {
            return Err(DeviceError::InvalidDescriptor(format!(
                "{} written into a {:?} heap",
                kind_name(&view),
                heap.kind()
            )));
        }
        view.validate()?;
        heap.inner.slots.write()[slot as usize] = Some(view);
        Ok(())
    }

    /// Writes `view` into `heap[slot]`.
    pub fn populate_view(&self, heap: &DescriptorHeap, slot: u32, view: ViewDesc) -> Result<(), DeviceError> {
        if slot >= heap.capacity() {
            return Err(DeviceError::InvalidDescriptor(format!(
                "slot {slot} out of range for heap of {}",
                heap.capacity()
            )));
        }
        self.create_view(view, heap.cpu_handle(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{AdapterProfile, DeviceDesc, HeapType, ResourceState, TextureDesc, testing};

    fn device(adapter: AdapterProfile) -> Option<Device> {
        testing::device_with(DeviceDesc { adapter, ..Default::default() })
    }

    #[test]
    fn handles_step_by_queried_increment() {
        for adapter in [AdapterProfile::Nvidia, AdapterProfile::Intel] {
            let Some(device) = device(adapter) else { continue };
            let heap = device
                .create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 4, true)
                .unwrap();
            let inc = device.descriptor_increment_size(DescriptorHeapKind::CbvSrvUav);
            let h2 = heap.cpu_start().offset(2, inc);
            assert_eq!(heap.cpu_slot(h2), Some(2));
            assert_eq!(heap.gpu_slot(heap.gpu_start().offset(3, inc)), Some(3));
        }
    }

    #[test]
    fn misaligned_handle_is_rejected() {
        let Some(device) = device(AdapterProfile::Nvidia) else { return };
        let heap = device
            .create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 4, true)
            .unwrap();
        let buf = device.create_buffer(256, HeapType::Upload).unwrap();
        let bad = CpuDescriptorHandle { ptr: heap.cpu_start().ptr + 1 };
        assert!(matches!(
            device.create_view(ViewDesc::cbv(&buf), bad),
            Err(DeviceError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn handle_past_capacity_is_rejected() {
        let Some(device) = device(AdapterProfile::Amd) else { return };
        let heap = device
            .create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 2, false)
            .unwrap();
        let buf = device.create_buffer(256, HeapType::Upload).unwrap();
        assert!(device.populate_view(&heap, 2, ViewDesc::cbv(&buf)).is_err());
        assert!(device.create_view(ViewDesc::cbv(&buf), heap.cpu_handle(2)).is_err());
        assert!(device.populate_view(&heap, 1, ViewDesc::cbv(&buf)).is_ok());
    }

    #[test]
    fn view_kind_must_match_heap() {
        let Some(device) = device(AdapterProfile::Software) else { return };
        let rtv_heap = device.create_descriptor_heap(DescriptorHeapKind::Rtv, 1, false).unwrap();
        let buf = device.create_buffer(256, HeapType::Upload).unwrap();
        assert!(device.populate_view(&rtv_heap, 0, ViewDesc::cbv(&buf)).is_err());
    }

    #[test]
    fn cbv_requires_256_alignment() {
        let Some(device) = device(AdapterProfile::Software) else { return };
        let heap = device
            .create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 1, true)
            .unwrap();
        let buf = device.create_buffer(512, HeapType::Upload).unwrap();
        let unaligned = ViewDesc::ConstantBuffer { resource: buf.clone(), offset: 0, size: 144 };
        assert!(device.populate_view(&heap, 0, unaligned).is_err());
        let aligned = ViewDesc::ConstantBuffer { resource: buf, offset: 256, size: 256 };
        assert!(device.populate_view(&heap, 0, aligned).is_ok());
    }

    #[test]
    fn uav_requires_flag() {
        let Some(device) = device(AdapterProfile::Software) else { return };
        let heap = device
            .create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 1, true)
            .unwrap();
        let tex = device
            .create_texture_2d(
                TextureDesc::new_2d(Format::Rgba8Unorm, 2, 2),
                HeapType::Default,
                ResourceState::Common,
                None,
            )
            .unwrap();
        assert!(device.populate_view(&heap, 0, ViewDesc::uav(&tex)).is_err());
        assert!(device.populate_view(&heap, 0, ViewDesc::srv(&tex)).is_ok());
    }

    #[test]
    fn rtv_heaps_are_never_shader_visible() {
        let Some(device) = device(AdapterProfile::Software) else { return };
        assert!(device.create_descriptor_heap(DescriptorHeapKind::Rtv, 2, true).is_err());
        let heap = device.create_descriptor_heap(DescriptorHeapKind::Rtv, 2, false).unwrap();
        assert!(heap.gpu_start().is_null());
    }
}

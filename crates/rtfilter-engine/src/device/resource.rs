use std::ops::{BitOr, Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytemuck::Pod;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use super::gpu::GpuBackend;
use super::{Device, DeviceError, Format};

/// Constant buffer views must start and end on this boundary.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Row pitch alignment for buffer <-> texture copies.
pub const TEXTURE_DATA_PITCH_ALIGNMENT: u32 = 256;

/// Rounds `size` up to the next multiple of `alignment` (a power of two).
///
/// Already-aligned sizes are returned unchanged.
pub fn align_to(size: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (size + alignment - 1) & !(alignment - 1)
}

/// Memory pool a resource lives in.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HeapType {
    /// GPU-local; not CPU visible.
    Default,
    /// CPU-writable staging memory, permanently in `GenericRead`.
    Upload,
    /// CPU-readable copy destination, permanently in `CopyDest`.
    Readback,
}

/// Usage state tracked per resource and changed only by barriers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    CopyDest,
    CopySource,
    PixelShaderResource,
    NonPixelShaderResource,
    UnorderedAccess,
    GenericRead,
}

impl ResourceState {
    /// Whether a shader may read the resource through an SRV in this state.
    pub fn is_shader_readable(self) -> bool {
        matches!(
            self,
            Self::PixelShaderResource | Self::NonPixelShaderResource | Self::GenericRead
        )
    }
}

/// Texture creation flags.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct TextureFlags(u8);

impl TextureFlags {
    pub const NONE: Self = Self(0);
    pub const RENDER_TARGET: Self = Self(1);
    pub const DEPTH_STENCIL: Self = Self(1 << 1);
    pub const UNORDERED_ACCESS: Self = Self(1 << 2);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TextureFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TextureDesc {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u16,
    pub array_size: u16,
    pub flags: TextureFlags,
}

impl TextureDesc {
    /// Single-mip, single-slice 2D texture without usage flags.
    pub fn new_2d(format: Format, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            mip_levels: 1,
            array_size: 1,
            flags: TextureFlags::NONE,
        }
    }

    pub fn with_flags(mut self, flags: TextureFlags) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn row_bytes(&self) -> u64 {
        u64::from(self.width) * u64::from(self.format.bytes_per_pixel())
    }

    pub(crate) fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d { width: self.width, height: self.height, depth_or_array_layers: 1 }
    }

    fn usage(&self) -> wgpu::TextureUsages {
        use wgpu::TextureUsages as U;
        let mut usage = U::TEXTURE_BINDING | U::COPY_SRC;
        if !self.format.is_depth() {
            usage |= U::COPY_DST;
        }
        if self.flags.contains(TextureFlags::RENDER_TARGET) || self.flags.contains(TextureFlags::DEPTH_STENCIL) {
            usage |= U::RENDER_ATTACHMENT;
        }
        if self.flags.contains(TextureFlags::UNORDERED_ACCESS) {
            usage |= U::STORAGE_BINDING;
        }
        usage
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ResourceDesc {
    Buffer { size: u64 },
    Texture2d(TextureDesc),
}

/// Optimized clear value supplied at creation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    Depth(f32),
}

/// Layout of a texture's data inside a buffer, as used by copies.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PlacedFootprint {
    /// Byte offset of the first row inside the buffer.
    pub offset: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    /// Distance between rows; a multiple of [`TEXTURE_DATA_PITCH_ALIGNMENT`].
    pub row_pitch: u32,
    pub num_rows: u32,
    /// Meaningful bytes per row.
    pub row_size: u64,
    /// Bytes needed from `offset` to the end of the last row.
    pub total_bytes: u64,
}

/// wgpu object backing a resource.
pub(crate) enum Allocation {
    Buffer(wgpu::Buffer),
    Texture(wgpu::Texture),
}

pub(crate) struct ResourceShared {
    id: u64,
    desc: ResourceDesc,
    heap: HeapType,
    size: u64,
    clear: Option<ClearValue>,
    name: Mutex<String>,
    /// CPU copy of upload and readback buffers; empty in the default heap.
    pub(crate) data: RwLock<Vec<u8>>,
    /// Set when the CPU copy of an upload buffer changed since the last flush.
    dirty: AtomicBool,
    pub(crate) gpu: Allocation,
    pub(crate) state: Mutex<ResourceState>,
    allocated: Arc<AtomicU64>,
}

impl Drop for ResourceShared {
    fn drop(&mut self) {
        self.allocated.fetch_sub(self.size, Ordering::AcqRel);
    }
}

/// Reference-counted GPU resource. Freed when the last handle drops.
#[derive(Clone)]
pub struct Resource {
    pub(crate) inner: Arc<ResourceShared>,
}

impl Resource {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.inner.desc
    }

    pub fn texture_desc(&self) -> Option<&TextureDesc> {
        match &self.inner.desc {
            ResourceDesc::Texture2d(desc) => Some(desc),
            ResourceDesc::Buffer { .. } => None,
        }
    }

    pub fn heap_type(&self) -> HeapType {
        self.inner.heap
    }

    pub fn size_bytes(&self) -> u64 {
        self.inner.size
    }

    pub fn clear_value(&self) -> Option<ClearValue> {
        self.inner.clear
    }

    /// State as of the last executed barrier.
    pub fn state(&self) -> ResourceState {
        *self.inner.state.lock()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.lock() = name.into();
    }

    pub fn name(&self) -> String {
        let name = self.inner.name.lock();
        if name.is_empty() {
            format!("resource#{}", self.inner.id)
        } else {
            name.clone()
        }
    }

    fn ensure_cpu_visible(&self) -> Result<(), DeviceError> {
        match self.inner.heap {
            HeapType::Upload | HeapType::Readback => Ok(()),
            HeapType::Default => Err(DeviceError::InvalidResource(format!(
                "{} lives in the default heap and cannot be mapped",
                self.name()
            ))),
        }
    }

    /// Maps the whole buffer for CPU access.
    ///
    /// Upload buffers reach the GPU the next time a queue executes a list
    /// that reads them.
    pub fn map(&self) -> Result<MappedBuffer<'_>, DeviceError> {
        self.ensure_cpu_visible()?;
        self.inner.dirty.store(true, Ordering::Release);
        Ok(MappedBuffer {
            guard: self.inner.data.write(),
        })
    }

    pub fn write_bytes(&self, offset: u64, bytes: &[u8]) -> Result<(), DeviceError> {
        let mut mapped = self.map()?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.checked_add(bytes.len()).filter(|&end| end <= mapped.len());
        let Some(end) = end else {
            return Err(DeviceError::InvalidResource(format!(
                "write of {} bytes at offset {offset} overruns {} ({} bytes)",
                bytes.len(),
                self.name(),
                self.inner.size
            )));
        };
        mapped[start..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_pod<T: Pod>(&self, offset: u64, value: &T) -> Result<(), DeviceError> {
        self.write_bytes(offset, bytemuck::bytes_of(value))
    }

    /// Copies the buffer contents out.
    pub fn read_bytes(&self) -> Result<Vec<u8>, DeviceError> {
        self.ensure_cpu_visible()?;
        Ok(self.inner.data.read().clone())
    }

    pub fn ptr_eq(a: &Resource, b: &Resource) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub(crate) fn gpu_buffer(&self) -> Result<&wgpu::Buffer, DeviceError> {
        match &self.inner.gpu {
            Allocation::Buffer(buffer) => Ok(buffer),
            Allocation::Texture(_) => Err(DeviceError::InvalidResource(format!("{} is not a buffer", self.name()))),
        }
    }

    pub(crate) fn gpu_texture(&self) -> Result<&wgpu::Texture, DeviceError> {
        match &self.inner.gpu {
            Allocation::Texture(texture) => Ok(texture),
            Allocation::Buffer(_) => Err(DeviceError::InvalidResource(format!("{} is not a texture", self.name()))),
        }
    }

    /// Pushes pending CPU writes of an upload buffer to its GPU copy.
    pub(crate) fn flush_upload(&self, gpu: &GpuBackend) -> Result<(), DeviceError> {
        if self.inner.heap != HeapType::Upload || !self.inner.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let buffer = self.gpu_buffer()?;
        let data = self.inner.data.read();
        let padded = align_to(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize;
        if padded == data.len() {
            gpu.queue.write_buffer(buffer, 0, &data);
        } else {
            let mut bytes = data.clone();
            bytes.resize(padded, 0);
            gpu.queue.write_buffer(buffer, 0, &bytes);
        }
        Ok(())
    }

    /// Refreshes the CPU copy of a readback buffer after the GPU wrote it.
    pub(crate) fn sync_readback(&self, gpu: &GpuBackend) -> Result<(), DeviceError> {
        let len = self.inner.data.read().len();
        let bytes = gpu.read_buffer(self.gpu_buffer()?, len)?;
        self.inner.data.write().copy_from_slice(&bytes);
        Ok(())
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        Resource::ptr_eq(self, other)
    }
}

impl Eq for Resource {}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name())
            .field("desc", &self.inner.desc)
            .field("heap", &self.inner.heap)
            .field("state", &self.state())
            .finish()
    }
}

/// CPU mapping of an upload or readback buffer.
pub struct MappedBuffer<'a> {
    guard: RwLockWriteGuard<'a, Vec<u8>>,
}

impl Deref for MappedBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard
    }
}

impl DerefMut for MappedBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard
    }
}

impl Device {
    /// Creates a committed buffer. The size is used as given.
    pub fn create_buffer(&self, size_bytes: u64, heap: HeapType) -> Result<Resource, DeviceError> {
        self.check_health()?;
        if size_bytes == 0 {
            return Err(DeviceError::InvalidResource("buffer size is zero".into()));
        }
        let state = match heap {
            HeapType::Default => ResourceState::Common,
            HeapType::Upload => ResourceState::GenericRead,
            HeapType::Readback => ResourceState::CopyDest,
        };
        self.commit(ResourceDesc::Buffer { size: size_bytes }, size_bytes, heap, state, None)
    }

    /// Creates a committed 2D texture in the default heap.
    pub fn create_texture_2d(
        &self,
        desc: TextureDesc,
        heap: HeapType,
        initial_state: ResourceState,
        clear: Option<ClearValue>,
    ) -> Result<Resource, DeviceError> {
        self.check_health()?;
        validate_texture(&desc, heap, initial_state, clear)?;
        let size = desc.row_bytes() * u64::from(desc.height);
        self.commit(ResourceDesc::Texture2d(desc), size, heap, initial_state, clear)
    }

    fn commit(
        &self,
        desc: ResourceDesc,
        size: u64,
        heap: HeapType,
        state: ResourceState,
        clear: Option<ClearValue>,
    ) -> Result<Resource, DeviceError> {
        let host_len = match heap {
            HeapType::Default => 0,
            HeapType::Upload | HeapType::Readback => usize::try_from(size).map_err(|_| DeviceError::OutOfMemory {
                requested: size,
                available: usize::MAX as u64,
            })?,
        };
        self.reserve(size)?;

        let id = self.next_object_id();
        let label = format!("resource#{id}");
        let gpu = self.gpu();
        let allocation = match &desc {
            ResourceDesc::Buffer { size } => Allocation::Buffer(gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&label),
                size: align_to(*size, wgpu::COPY_BUFFER_ALIGNMENT),
                usage: buffer_usage(heap),
                mapped_at_creation: false,
            })),
            ResourceDesc::Texture2d(texture) => {
                let format = texture
                    .format
                    .to_wgpu()
                    .ok_or_else(|| DeviceError::InvalidResource("texture format is unknown".into()));
                let format = match format {
                    Ok(format) => format,
                    Err(e) => {
                        self.release(size);
                        return Err(e);
                    }
                };
                Allocation::Texture(gpu.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&label),
                    size: texture.extent(),
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: texture.usage(),
                    view_formats: &[],
                }))
            }
        };
        if let Some(error) = gpu.take_error() {
            self.release(size);
            return Err(DeviceError::InvalidResource(format!("{label}: {error}")));
        }

        log::trace!("{label}: {desc:?} in {heap:?} ({size} bytes) as {state:?}");
        Ok(Resource {
            inner: Arc::new(ResourceShared {
                id,
                desc,
                heap,
                size,
                clear,
                name: Mutex::new(String::new()),
                data: RwLock::new(vec![0; host_len]),
                dirty: AtomicBool::new(false),
                gpu: allocation,
                state: Mutex::new(state),
                allocated: Arc::clone(&self.shared.allocated),
            }),
        })
    }

    /// Buffer layout for copying a whole texture through a staging or readback buffer.
    pub fn copyable_footprint(&self, desc: &TextureDesc) -> Result<PlacedFootprint, DeviceError> {
        footprint(desc)
    }
}

fn footprint(desc: &TextureDesc) -> Result<PlacedFootprint, DeviceError> {
    let row_size = desc.row_bytes();
    let row_pitch = align_to(row_size, u64::from(TEXTURE_DATA_PITCH_ALIGNMENT));
    let num_rows = desc.height;
    let total_bytes = match num_rows {
        0 => 0,
        n => row_pitch * u64::from(n - 1) + row_size,
    };
    let row_pitch = u32::try_from(row_pitch).map_err(|_| {
        DeviceError::InvalidResource(format!(
            "{}-pixel rows of {:?} need a {row_pitch}-byte pitch, past the 32-bit copy limit",
            desc.width, desc.format
        ))
    })?;
    Ok(PlacedFootprint {
        offset: 0,
        format: desc.format,
        width: desc.width,
        height: desc.height,
        row_pitch,
        num_rows,
        row_size,
        total_bytes,
    })
}

fn buffer_usage(heap: HeapType) -> wgpu::BufferUsages {
    use wgpu::BufferUsages as U;
    match heap {
        HeapType::Default => U::COPY_SRC | U::COPY_DST | U::VERTEX | U::INDEX | U::UNIFORM | U::STORAGE,
        HeapType::Upload => U::COPY_SRC | U::COPY_DST | U::VERTEX | U::INDEX | U::UNIFORM,
        HeapType::Readback => U::MAP_READ | U::COPY_DST,
    }
}

fn validate_texture(
    desc: &TextureDesc,
    heap: HeapType,
    initial_state: ResourceState,
    clear: Option<ClearValue>,
) -> Result<(), DeviceError> {
    let invalid = |msg: String| Err(DeviceError::InvalidResource(msg));

    if heap != HeapType::Default {
        return invalid(format!("textures must be created in the default heap, not {heap:?}"));
    }
    if desc.width == 0 || desc.height == 0 {
        return invalid(format!("texture size {}x{} is empty", desc.width, desc.height));
    }
    if desc.mip_levels != 1 || desc.array_size != 1 {
        return invalid(format!(
            "only single-mip single-slice textures are supported (mips={}, slices={})",
            desc.mip_levels, desc.array_size
        ));
    }
    if desc.format == Format::Unknown {
        return invalid("texture format is unknown".into());
    }

    let flags = desc.flags;
    if desc.format.is_depth() != flags.contains(TextureFlags::DEPTH_STENCIL) {
        return invalid(format!("{:?} does not match the depth-stencil flag", desc.format));
    }
    if flags.contains(TextureFlags::RENDER_TARGET) && !desc.format.is_color() {
        return invalid(format!("{:?} cannot be a render target", desc.format));
    }
    if flags.contains(TextureFlags::UNORDERED_ACCESS) && !desc.format.supports_storage() {
        return invalid(format!("{:?} cannot allow unordered access", desc.format));
    }

    let required = match initial_state {
        ResourceState::RenderTarget => Some(TextureFlags::RENDER_TARGET),
        ResourceState::DepthWrite => Some(TextureFlags::DEPTH_STENCIL),
        ResourceState::UnorderedAccess => Some(TextureFlags::UNORDERED_ACCESS),
        ResourceState::GenericRead => {
            return invalid("default-heap textures cannot start in GenericRead".into());
        }
        _ => None,
    };
    if let Some(flag) = required {
        if !flags.contains(flag) {
            return invalid(format!("initial state {initial_state:?} requires {flag:?}"));
        }
    }

    match clear {
        Some(ClearValue::Color(_)) if !flags.contains(TextureFlags::RENDER_TARGET) => {
            invalid("color clear value on a texture that is not a render target".into())
        }
        Some(ClearValue::Depth(_)) if !flags.contains(TextureFlags::DEPTH_STENCIL) => {
            invalid("depth clear value on a texture that is not depth-stencil".into())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing;

    // ── alignment ─────────────────────────────────────────────────────────

    #[test]
    fn align_to_rounds_up_only_when_needed() {
        assert_eq!(align_to(0, 256), 0);
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(144, CONSTANT_BUFFER_ALIGNMENT), 256);
    }

    #[test]
    fn footprint_pads_rows() {
        let desc = TextureDesc::new_2d(Format::Rgba8Unorm, 200, 3);
        let fp = footprint(&desc).unwrap();
        assert_eq!(fp.row_size, 800);
        assert_eq!(fp.row_pitch, 1024);
        assert_eq!(fp.num_rows, 3);
        assert_eq!(fp.total_bytes, 1024 * 2 + 800);
    }

    #[test]
    fn footprint_keeps_aligned_rows() {
        let desc = TextureDesc::new_2d(Format::Rgba8Unorm, 64, 2);
        assert_eq!(footprint(&desc).unwrap().row_pitch, 256);
    }

    #[test]
    fn footprint_rejects_pitch_past_u32() {
        // 2^30 + 1 texels of 4 bytes need a pitch just over 4 GiB.
        let desc = TextureDesc::new_2d(Format::Rgba8Unorm, (1 << 30) + 1, 1);
        assert!(matches!(footprint(&desc), Err(DeviceError::InvalidResource(_))));
    }

    // ── allocation ────────────────────────────────────────────────────────

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let Some(device) = testing::device() else { return };
        assert!(matches!(
            device.create_buffer(0, HeapType::Upload),
            Err(DeviceError::InvalidResource(_))
        ));
    }

    #[test]
    fn live_bytes_follow_handles() {
        let Some(device) = testing::device() else { return };
        let a = device.create_buffer(512, HeapType::Upload).unwrap();
        let b = a.clone();
        assert_eq!(device.allocated_bytes(), 512);
        drop(a);
        assert_eq!(device.allocated_bytes(), 512);
        drop(b);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn heap_decides_buffer_state() {
        let Some(device) = testing::device() else { return };
        let up = device.create_buffer(16, HeapType::Upload).unwrap();
        let rb = device.create_buffer(16, HeapType::Readback).unwrap();
        assert_eq!(up.state(), ResourceState::GenericRead);
        assert_eq!(rb.state(), ResourceState::CopyDest);
    }

    #[test]
    fn buffers_and_textures_get_matching_allocations() {
        let Some(device) = testing::device() else { return };
        // 38-byte vertex streams are padded up to the copy alignment.
        let buf = device.create_buffer(38, HeapType::Upload).unwrap();
        assert_eq!(buf.gpu_buffer().unwrap().size(), 40);
        assert!(buf.gpu_texture().is_err());

        let desc = TextureDesc::new_2d(Format::Rgba8Unorm, 8, 4).with_flags(TextureFlags::UNORDERED_ACCESS);
        let tex = device
            .create_texture_2d(desc, HeapType::Default, ResourceState::UnorderedAccess, None)
            .unwrap();
        let gpu = tex.gpu_texture().unwrap();
        assert_eq!((gpu.width(), gpu.height()), (8, 4));
        assert!(gpu.usage().contains(wgpu::TextureUsages::STORAGE_BINDING));
    }

    #[test]
    fn storage_needs_a_storage_format() {
        let Some(device) = testing::device() else { return };
        let desc = TextureDesc::new_2d(Format::Bgra8Unorm, 4, 4).with_flags(TextureFlags::UNORDERED_ACCESS);
        let err = device
            .create_texture_2d(desc, HeapType::Default, ResourceState::UnorderedAccess, None)
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidResource(_)));
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn render_target_state_needs_flag() {
        let Some(device) = testing::device() else { return };
        let desc = TextureDesc::new_2d(Format::Rgba8Unorm, 4, 4);
        let err = device
            .create_texture_2d(desc, HeapType::Default, ResourceState::RenderTarget, None)
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidResource(_)));
    }

    #[test]
    fn depth_format_needs_depth_flag() {
        let Some(device) = testing::device() else { return };
        let desc = TextureDesc::new_2d(Format::D32Float, 4, 4);
        assert!(
            device
                .create_texture_2d(desc, HeapType::Default, ResourceState::Common, None)
                .is_err()
        );
        let ok = desc.with_flags(TextureFlags::DEPTH_STENCIL);
        assert!(
            device
                .create_texture_2d(ok, HeapType::Default, ResourceState::DepthWrite, Some(ClearValue::Depth(1.0)))
                .is_ok()
        );
    }

    // ── cpu access ────────────────────────────────────────────────────────

    #[test]
    fn default_heap_is_not_mappable() {
        let Some(device) = testing::device() else { return };
        let buf = device.create_buffer(16, HeapType::Default).unwrap();
        assert!(buf.map().is_err());
    }

    #[test]
    fn write_pod_at_offset() {
        let Some(device) = testing::device() else { return };
        let buf = device.create_buffer(16, HeapType::Upload).unwrap();
        buf.write_pod(4, &0xAABB_CCDDu32).unwrap();
        let bytes = buf.read_bytes().unwrap();
        assert_eq!(&bytes[4..8], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert!(buf.write_bytes(14, &[0; 4]).is_err());
    }

    #[test]
    fn mapping_marks_upload_for_flush() {
        let Some(device) = testing::device() else { return };
        let buf = device.create_buffer(6, HeapType::Upload).unwrap();
        buf.write_bytes(0, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert!(buf.inner.dirty.load(Ordering::Acquire));
        buf.flush_upload(device.gpu()).unwrap();
        assert!(!buf.inner.dirty.load(Ordering::Acquire));
        device.gpu().check().unwrap();
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::descriptor::{CpuDescriptorHandle, DescriptorHeap, DescriptorHeapKind, GpuDescriptorHandle, ViewDesc};
use super::pipeline::{PipelineState, RootSignature};
use super::resource::{PlacedFootprint, ResourceState};
use super::{Device, DeviceError, Resource};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CommandListType {
    /// Graphics, compute and copy.
    Direct,
    /// Compute and copy only.
    Compute,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CommandListState {
    Open,
    Closed,
    /// Handed to a queue and still executing.
    Submitted,
    /// Finished executing; may be reset.
    Retired,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub top_left_x: f32,
    pub top_left_y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            top_left_x: 0.0,
            top_left_y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle in pixels; `right`/`bottom` are exclusive.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn new(width: u32, height: u32) -> Self {
        Self { left: 0, top: 0, right: width as i32, bottom: height as i32 }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexBufferView {
    pub resource: Resource,
    pub offset: u64,
    pub size_bytes: u32,
    pub stride: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(self) -> u32 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexBufferView {
    pub resource: Resource,
    pub offset: u64,
    pub size_bytes: u32,
    pub format: IndexFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceBarrier {
    Transition {
        resource: Resource,
        before: ResourceState,
        after: ResourceState,
    },
    /// Orders unordered-access writes; `None` covers every UAV.
    Uav { resource: Option<Resource> },
}

impl ResourceBarrier {
    pub fn transition(resource: &Resource, before: ResourceState, after: ResourceState) -> Self {
        Self::Transition { resource: resource.clone(), before, after }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextureCopyLocation {
    Subresource { resource: Resource, index: u32 },
    Footprint { resource: Resource, footprint: PlacedFootprint },
}

impl TextureCopyLocation {
    pub fn subresource(resource: &Resource, index: u32) -> Self {
        Self::Subresource { resource: resource.clone(), index }
    }

    pub fn footprint(resource: &Resource, footprint: PlacedFootprint) -> Self {
        Self::Footprint { resource: resource.clone(), footprint }
    }

    pub fn resource(&self) -> &Resource {
        match self {
            Self::Subresource { resource, .. } | Self::Footprint { resource, .. } => resource,
        }
    }
}

/// Recorded command. CPU descriptor handles are resolved when recorded.
#[derive(Clone)]
pub(crate) enum Command {
    SetPipeline(PipelineState),
    SetGraphicsRootSignature(RootSignature),
    SetComputeRootSignature(RootSignature),
    SetDescriptorHeaps(Vec<DescriptorHeap>),
    SetGraphicsRootTable { index: u32, base: GpuDescriptorHandle },
    SetComputeRootTable { index: u32, base: GpuDescriptorHandle },
    SetRenderTargets { rtvs: Vec<ViewDesc>, dsv: Option<ViewDesc> },
    ClearRenderTarget { view: ViewDesc, color: [f32; 4] },
    ClearDepth { view: ViewDesc, depth: f32 },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetTopology(PrimitiveTopology),
    SetVertexBuffer(VertexBufferView),
    SetIndexBuffer(IndexBufferView),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
    Dispatch { x: u32, y: u32, z: u32 },
    Barriers(Vec<ResourceBarrier>),
    CopyTextureRegion { dst: TextureCopyLocation, src: TextureCopyLocation },
    CopyResource { dst: Resource, src: Resource },
}

pub(crate) struct AllocatorShared {
    kind: CommandListType,
    pub(crate) in_flight: AtomicUsize,
    recording: AtomicBool,
}

/// Backing storage for recorded commands.
///
/// Resetting is only legal once every submission that used it has finished.
#[derive(Clone)]
pub struct CommandAllocator {
    pub(crate) shared: Arc<AllocatorShared>,
}

impl CommandAllocator {
    pub fn kind(&self) -> CommandListType {
        self.shared.kind
    }

    pub fn reset(&self) -> Result<(), DeviceError> {
        let in_flight = self.shared.in_flight.load(Ordering::Acquire);
        if in_flight > 0 {
            return Err(DeviceError::AllocatorInUse { in_flight });
        }
        if self.shared.recording.load(Ordering::Acquire) {
            return Err(DeviceError::InvalidCommandList(
                "allocator reset while a list is still recording into it".into(),
            ));
        }
        Ok(())
    }
}

/// A closed list ready to hand to a queue worker.
pub(crate) struct SubmittedList {
    pub(crate) label: String,
    pub(crate) kind: CommandListType,
    pub(crate) commands: Arc<[Command]>,
    list_in_flight: Arc<AtomicUsize>,
    allocator: Arc<AllocatorShared>,
}

impl SubmittedList {
    /// Called by the queue once execution has finished, successfully or not.
    pub(crate) fn retire(self) {
        self.list_in_flight.fetch_sub(1, Ordering::AcqRel);
        self.allocator.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Phase {
    Open,
    Closed,
    Submitted,
}

/// Single-writer command recorder.
///
/// Recording calls never fail directly. Misuse poisons the list and is reported
/// by [`CommandList::close`] or at submission.
pub struct CommandList {
    device: Device,
    id: u64,
    kind: CommandListType,
    phase: Phase,
    allocator: Arc<AllocatorShared>,
    commands: Vec<Command>,
    recorded: Option<Arc<[Command]>>,
    poison: Option<String>,
    in_flight: Arc<AtomicUsize>,
}

impl CommandList {
    pub fn kind(&self) -> CommandListType {
        self.kind
    }

    pub fn state(&self) -> CommandListState {
        match self.phase {
            Phase::Open => CommandListState::Open,
            Phase::Closed => CommandListState::Closed,
            Phase::Submitted if self.in_flight.load(Ordering::Acquire) > 0 => CommandListState::Submitted,
            Phase::Submitted => CommandListState::Retired,
        }
    }

    pub fn poison_reason(&self) -> Option<&str> {
        self.poison.as_deref()
    }

    fn label(&self) -> String {
        format!("{:?} list#{}", self.kind, self.id)
    }

    fn poison(&mut self, reason: String) {
        if self.poison.is_none() {
            log::debug!("{}: {reason}", self.label());
            self.poison = Some(reason);
        }
    }

    fn record(&mut self, command: Command) {
        if self.phase != Phase::Open {
            self.poison(format!("recorded into a list that is {:?}", self.state()));
            return;
        }
        self.commands.push(command);
    }

    fn record_graphics(&mut self, what: &str, command: Command) {
        if self.kind == CommandListType::Compute {
            self.poison(format!("{what} is not allowed on a compute list"));
            return;
        }
        self.record(command);
    }

    pub fn close(&mut self) -> Result<(), DeviceError> {
        if self.phase != Phase::Open {
            return Err(DeviceError::InvalidCommandList(format!(
                "{} closed while {:?}",
                self.label(),
                self.state()
            )));
        }
        self.phase = Phase::Closed;
        self.allocator.recording.store(false, Ordering::Release);
        self.recorded = Some(std::mem::take(&mut self.commands).into());
        match &self.poison {
            Some(reason) => Err(DeviceError::InvalidCommandList(reason.clone())),
            None => Ok(()),
        }
    }

    /// Reopens the list on `allocator`, optionally with an initial pipeline bound.
    pub fn reset(
        &mut self,
        allocator: &CommandAllocator,
        initial_pipeline: Option<&PipelineState>,
    ) -> Result<(), DeviceError> {
        match self.state() {
            CommandListState::Closed | CommandListState::Retired => {}
            state => {
                return Err(DeviceError::InvalidCommandList(format!(
                    "{} reset while {state:?}",
                    self.label()
                )));
            }
        }
        claim_allocator(allocator, self.kind)?;

        self.allocator = Arc::clone(&allocator.shared);
        self.phase = Phase::Open;
        self.commands.clear();
        self.recorded = None;
        self.poison = None;
        self.in_flight = Arc::new(AtomicUsize::new(0));
        if let Some(pipeline) = initial_pipeline {
            self.set_pipeline_state(pipeline);
        }
        Ok(())
    }

    /// Freezes a closed list for execution and marks it in flight.
    pub(crate) fn submit(&mut self) -> Result<SubmittedList, DeviceError> {
        if let Some(reason) = &self.poison {
            return Err(DeviceError::InvalidCommandList(format!(
                "{} is poisoned: {reason}",
                self.label()
            )));
        }
        let commands = match (self.phase, &self.recorded) {
            (Phase::Closed, Some(commands)) => Arc::clone(commands),
            _ => {
                return Err(DeviceError::InvalidCommandList(format!(
                    "{} submitted while {:?}",
                    self.label(),
                    self.state()
                )));
            }
        };
        self.phase = Phase::Submitted;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.allocator.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(SubmittedList {
            label: self.label(),
            kind: self.kind,
            commands,
            list_in_flight: Arc::clone(&self.in_flight),
            allocator: Arc::clone(&self.allocator),
        })
    }

    // ── pipeline state ────────────────────────────────────────────────────

    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) {
        if !pipeline.is_compute() {
            self.record_graphics("graphics pipeline", Command::SetPipeline(pipeline.clone()));
        } else {
            self.record(Command::SetPipeline(pipeline.clone()));
        }
    }

    pub fn set_graphics_root_signature(&mut self, root: &RootSignature) {
        self.record_graphics("SetGraphicsRootSignature", Command::SetGraphicsRootSignature(root.clone()));
    }

    pub fn set_compute_root_signature(&mut self, root: &RootSignature) {
        self.record(Command::SetComputeRootSignature(root.clone()));
    }

    pub fn set_descriptor_heaps(&mut self, heaps: &[&DescriptorHeap]) {
        if let Some(h) = heaps.iter().find(|h| !h.is_shader_visible()) {
            self.poison(format!("bound {h:?} which is not shader visible"));
            return;
        }
        let shader_heaps = heaps.iter().filter(|h| h.kind() == DescriptorHeapKind::CbvSrvUav).count();
        if shader_heaps > 1 {
            self.poison("more than one CBV/SRV/UAV heap bound at once".into());
            return;
        }
        self.record(Command::SetDescriptorHeaps(heaps.iter().map(|h| (*h).clone()).collect()));
    }

    pub fn set_graphics_root_descriptor_table(&mut self, index: u32, base: GpuDescriptorHandle) {
        self.record_graphics("SetGraphicsRootDescriptorTable", Command::SetGraphicsRootTable { index, base });
    }

    pub fn set_compute_root_descriptor_table(&mut self, index: u32, base: GpuDescriptorHandle) {
        self.record(Command::SetComputeRootTable { index, base });
    }

    // ── output merger ─────────────────────────────────────────────────────

    fn resolve(&mut self, handle: CpuDescriptorHandle, kind: DescriptorHeapKind) -> Option<ViewDesc> {
        let resolved = self.device.resolve_cpu_handle(handle).and_then(|(heap, slot)| {
            if heap.kind() != kind {
                return Err(DeviceError::InvalidDescriptor(format!(
                    "handle {:#x} is in a {:?} heap, expected {kind:?}",
                    handle.ptr,
                    heap.kind()
                )));
            }
            heap.get(slot).ok_or_else(|| {
                DeviceError::InvalidDescriptor(format!("handle {:#x} addresses an empty slot", handle.ptr))
            })
        });
        match resolved {
            Ok(view) => Some(view),
            Err(e) => {
                self.poison(e.to_string());
                None
            }
        }
    }

    pub fn set_render_targets(&mut self, rtvs: &[CpuDescriptorHandle], dsv: Option<CpuDescriptorHandle>) {
        if self.kind == CommandListType::Compute {
            self.poison("OMSetRenderTargets is not allowed on a compute list".into());
            return;
        }
        let mut views = Vec::with_capacity(rtvs.len());
        for &h in rtvs {
            let Some(view) = self.resolve(h, DescriptorHeapKind::Rtv) else { return };
            views.push(view);
        }
        let dsv = match dsv {
            Some(h) => match self.resolve(h, DescriptorHeapKind::Dsv) {
                Some(view) => Some(view),
                None => return,
            },
            None => None,
        };
        self.record(Command::SetRenderTargets { rtvs: views, dsv });
    }

    pub fn clear_render_target_view(&mut self, rtv: CpuDescriptorHandle, color: [f32; 4]) {
        if self.kind == CommandListType::Compute {
            self.poison("ClearRenderTargetView is not allowed on a compute list".into());
            return;
        }
        if let Some(view) = self.resolve(rtv, DescriptorHeapKind::Rtv) {
            self.record(Command::ClearRenderTarget { view, color });
        }
    }

    pub fn clear_depth_stencil_view(&mut self, dsv: CpuDescriptorHandle, depth: f32) {
        if self.kind == CommandListType::Compute {
            self.poison("ClearDepthStencilView is not allowed on a compute list".into());
            return;
        }
        if let Some(view) = self.resolve(dsv, DescriptorHeapKind::Dsv) {
            self.record(Command::ClearDepth { view, depth });
        }
    }

    // ── rasterizer / input assembler ──────────────────────────────────────

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.record_graphics("RSSetViewports", Command::SetViewport(viewport));
    }

    pub fn set_scissor_rect(&mut self, rect: ScissorRect) {
        self.record_graphics("RSSetScissorRects", Command::SetScissor(rect));
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.record_graphics("IASetPrimitiveTopology", Command::SetTopology(topology));
    }

    pub fn set_vertex_buffer(&mut self, view: VertexBufferView) {
        self.record_graphics("IASetVertexBuffers", Command::SetVertexBuffer(view));
    }

    pub fn set_index_buffer(&mut self, view: IndexBufferView) {
        self.record_graphics("IASetIndexBuffer", Command::SetIndexBuffer(view));
    }

    // ── work ──────────────────────────────────────────────────────────────

    pub fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        self.record_graphics(
            "DrawInstanced",
            Command::Draw { vertex_count, instance_count, start_vertex, start_instance },
        );
    }

    pub fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) {
        self.record_graphics(
            "DrawIndexedInstanced",
            Command::DrawIndexed { index_count, instance_count, start_index, base_vertex, start_instance },
        );
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(Command::Dispatch { x, y, z });
    }

    pub fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) {
        if barriers.is_empty() {
            return;
        }
        self.record(Command::Barriers(barriers.to_vec()));
    }

    pub fn copy_texture_region(&mut self, dst: TextureCopyLocation, src: TextureCopyLocation) {
        self.record(Command::CopyTextureRegion { dst, src });
    }

    pub fn copy_resource(&mut self, dst: &Resource, src: &Resource) {
        self.record(Command::CopyResource { dst: dst.clone(), src: src.clone() });
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        if self.phase == Phase::Open {
            self.allocator.recording.store(false, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("commands", &self.commands.len())
            .field("poison", &self.poison)
            .finish()
    }
}

fn claim_allocator(allocator: &CommandAllocator, kind: CommandListType) -> Result<(), DeviceError> {
    if allocator.kind() != kind {
        return Err(DeviceError::InvalidCommandList(format!(
            "{:?} allocator used for a {kind:?} list",
            allocator.kind()
        )));
    }
    if allocator.shared.recording.swap(true, Ordering::AcqRel) {
        return Err(DeviceError::InvalidCommandList(
            "allocator already has a list recording into it".into(),
        ));
    }
    Ok(())
}

impl Device {
    pub fn create_command_allocator(&self, kind: CommandListType) -> CommandAllocator {
        CommandAllocator {
            shared: Arc::new(AllocatorShared {
                kind,
                in_flight: AtomicUsize::new(0),
                recording: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a list in the open state.
    pub fn create_command_list(
        &self,
        kind: CommandListType,
        allocator: &CommandAllocator,
        initial_pipeline: Option<&PipelineState>,
    ) -> Result<CommandList, DeviceError> {
        self.check_health()?;
        claim_allocator(allocator, kind)?;
        let mut list = CommandList {
            device: self.clone(),
            id: self.next_object_id(),
            kind,
            phase: Phase::Open,
            allocator: Arc::clone(&allocator.shared),
            commands: Vec::new(),
            recorded: None,
            poison: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
        };
        if let Some(pipeline) = initial_pipeline {
            list.set_pipeline_state(pipeline);
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing;

    fn setup(kind: CommandListType) -> Option<(Device, CommandAllocator, CommandList)> {
        let device = testing::device()?;
        let alloc = device.create_command_allocator(kind);
        let list = device.create_command_list(kind, &alloc, None).unwrap();
        Some((device, alloc, list))
    }

    #[test]
    fn list_starts_open_and_closes() {
        let Some((_, _, mut list)) = setup(CommandListType::Direct) else { return };
        assert_eq!(list.state(), CommandListState::Open);
        list.close().unwrap();
        assert_eq!(list.state(), CommandListState::Closed);
        assert!(list.close().is_err());
    }

    #[test]
    fn graphics_command_poisons_compute_list() {
        let Some((_, _, mut list)) = setup(CommandListType::Compute) else { return };
        list.set_viewport(Viewport::new(4.0, 4.0));
        assert!(matches!(list.close(), Err(DeviceError::InvalidCommandList(_))));
        assert!(list.submit().is_err());
    }

    #[test]
    fn recording_into_closed_list_poisons_it() {
        let Some((_, alloc, mut list)) = setup(CommandListType::Direct) else { return };
        list.close().unwrap();
        list.dispatch(1, 1, 1);
        assert!(list.poison_reason().is_some());
        alloc.reset().unwrap();
        list.reset(&alloc, None).unwrap();
        assert!(list.poison_reason().is_none());
    }

    #[test]
    fn allocator_reset_fails_while_submission_in_flight() {
        let Some((_, alloc, mut list)) = setup(CommandListType::Direct) else { return };
        list.close().unwrap();
        let submitted = list.submit().unwrap();
        assert_eq!(list.state(), CommandListState::Submitted);
        assert_eq!(alloc.reset(), Err(DeviceError::AllocatorInUse { in_flight: 1 }));
        assert!(list.reset(&alloc, None).is_err());

        submitted.retire();
        assert_eq!(list.state(), CommandListState::Retired);
        alloc.reset().unwrap();
        list.reset(&alloc, None).unwrap();
        assert_eq!(list.state(), CommandListState::Open);
    }

    #[test]
    fn allocator_serves_one_recording_list() {
        let Some((device, alloc, _list)) = setup(CommandListType::Direct) else { return };
        assert!(device.create_command_list(CommandListType::Direct, &alloc, None).is_err());
        assert!(alloc.reset().is_err());
    }

    #[test]
    fn allocator_kind_must_match() {
        let Some(device) = testing::device() else { return };
        let alloc = device.create_command_allocator(CommandListType::Compute);
        assert!(device.create_command_list(CommandListType::Direct, &alloc, None).is_err());
    }

    #[test]
    fn unknown_rtv_handle_poisons() {
        let Some((_, _, mut list)) = setup(CommandListType::Direct) else { return };
        list.clear_render_target_view(CpuDescriptorHandle { ptr: 42 }, [0.0; 4]);
        assert!(list.close().is_err());
    }
}

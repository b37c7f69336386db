//! Queue-side replay of recorded commands onto wgpu.
//!
//! Every command is validated against the live resource states before it is
//! encoded. Any violation aborts the list and the queue removes the device,
//! the way a real driver reports a hung or faulted GPU. Draws and dispatches
//! become one wgpu pass each; the whole list is one command buffer.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::ops::Range;

use wgpu::util::DeviceExt;

use super::command::{
    Command, IndexBufferView, IndexFormat, PrimitiveTopology, ResourceBarrier, ScissorRect, SubmittedList,
    TextureCopyLocation, VertexBufferView, Viewport,
};
use super::descriptor::{DescriptorHeap, GpuDescriptorHandle, ViewDesc};
use super::gpu::GpuBackend;
use super::pipeline::{DescriptorRangeKind, GraphicsPipelineDesc, PipelineKind, PipelineState, RootSignature, ShaderStage};
use super::resource::{ClearValue, HeapType, PlacedFootprint, ResourceDesc, ResourceState, align_to};
use super::shader::ShaderRegisters;
use super::{Device, DeviceError, Format, Resource};

/// Required placement alignment for footprints inside a buffer.
const TEXTURE_DATA_PLACEMENT_ALIGNMENT: u64 = 512;

pub(crate) fn execute(device: &Device, list: &SubmittedList) -> Result<(), DeviceError> {
    let gpu = device.gpu();
    let mut state = ExecState::new(gpu, &list.label);
    for (index, command) in list.commands.iter().enumerate() {
        state
            .apply(device, command)
            .map_err(|e| at_command(e, index))?;
    }
    state.finish(gpu)?;
    log::trace!("{}: {} command(s) executed", list.label, list.commands.len());
    Ok(())
}

fn at_command(error: DeviceError, index: usize) -> DeviceError {
    let prefix = |msg: String| format!("command {index}: {msg}");
    match error {
        DeviceError::InvalidResource(m) => DeviceError::InvalidResource(prefix(m)),
        DeviceError::InvalidDescriptor(m) => DeviceError::InvalidDescriptor(prefix(m)),
        DeviceError::InvalidPipeline(m) => DeviceError::InvalidPipeline(prefix(m)),
        DeviceError::InvalidCommandList(m) => DeviceError::InvalidCommandList(prefix(m)),
        other => other,
    }
}

#[derive(Clone)]
struct TableBinding {
    heap: DescriptorHeap,
    first_slot: u32,
}

/// Vertex buffer re-laid out to a 4-byte stride, keyed by resource, view
/// offset, view size and source stride.
type RepackKey = (u64, u64, u32, u32);

struct ExecState {
    encoder: wgpu::CommandEncoder,
    /// Readback buffers written by this list; refreshed after it completes.
    readbacks: Vec<Resource>,
    repacked: HashMap<RepackKey, wgpu::Buffer>,
    pipeline: Option<PipelineState>,
    graphics_root: Option<RootSignature>,
    compute_root: Option<RootSignature>,
    heaps: Vec<DescriptorHeap>,
    graphics_tables: Vec<Option<TableBinding>>,
    compute_tables: Vec<Option<TableBinding>>,
    rtvs: Vec<ViewDesc>,
    dsv: Option<ViewDesc>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    topology: PrimitiveTopology,
    vertex_buffer: Option<VertexBufferView>,
    index_buffer: Option<IndexBufferView>,
}

/// Draw arguments as recorded.
#[derive(Debug, Copy, Clone)]
enum DrawCall {
    Vertices { count: u32, instances: u32, start: u32, start_instance: u32 },
    Indexed { count: u32, instances: u32, start: u32, base_vertex: i32, start_instance: u32 },
}

impl DrawCall {
    fn is_empty(self) -> bool {
        match self {
            Self::Vertices { count, instances, .. } | Self::Indexed { count, instances, .. } => {
                count == 0 || instances == 0
            }
        }
    }
}

impl ExecState {
    fn new(gpu: &GpuBackend, label: &str) -> Self {
        Self {
            encoder: gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) }),
            readbacks: Vec::new(),
            repacked: HashMap::new(),
            pipeline: None,
            graphics_root: None,
            compute_root: None,
            heaps: Vec::new(),
            graphics_tables: Vec::new(),
            compute_tables: Vec::new(),
            rtvs: Vec::new(),
            dsv: None,
            viewport: None,
            scissor: None,
            topology: PrimitiveTopology::default(),
            vertex_buffer: None,
            index_buffer: None,
        }
    }

    fn apply(&mut self, device: &Device, command: &Command) -> Result<(), DeviceError> {
        let gpu = device.gpu();
        match command {
            Command::SetPipeline(p) => self.pipeline = Some(p.clone()),
            Command::SetGraphicsRootSignature(root) => {
                self.graphics_tables = vec![None; root.parameter_count() as usize];
                self.graphics_root = Some(root.clone());
            }
            Command::SetComputeRootSignature(root) => {
                self.compute_tables = vec![None; root.parameter_count() as usize];
                self.compute_root = Some(root.clone());
            }
            Command::SetDescriptorHeaps(heaps) => self.heaps = heaps.clone(),
            Command::SetGraphicsRootTable { index, base } => {
                let binding = self.resolve_table(*base)?;
                bind_table(&mut self.graphics_tables, *index, binding, "graphics")?;
            }
            Command::SetComputeRootTable { index, base } => {
                let binding = self.resolve_table(*base)?;
                bind_table(&mut self.compute_tables, *index, binding, "compute")?;
            }
            Command::SetRenderTargets { rtvs, dsv } => {
                self.rtvs = rtvs.clone();
                self.dsv = dsv.clone();
            }
            Command::ClearRenderTarget { view, color } => self.clear_render_target(device, view, *color)?,
            Command::ClearDepth { view, depth } => self.clear_depth(device, view, *depth)?,
            Command::SetViewport(v) => self.viewport = Some(*v),
            Command::SetScissor(s) => self.scissor = Some(*s),
            Command::SetTopology(t) => self.topology = *t,
            Command::SetVertexBuffer(v) => self.vertex_buffer = Some(v.clone()),
            Command::SetIndexBuffer(v) => self.index_buffer = Some(v.clone()),
            Command::Draw { vertex_count, instance_count, start_vertex, start_instance } => self.draw(
                gpu,
                DrawCall::Vertices {
                    count: *vertex_count,
                    instances: *instance_count,
                    start: *start_vertex,
                    start_instance: *start_instance,
                },
            )?,
            Command::DrawIndexed { index_count, instance_count, start_index, base_vertex, start_instance } => self
                .draw(
                    gpu,
                    DrawCall::Indexed {
                        count: *index_count,
                        instances: *instance_count,
                        start: *start_index,
                        base_vertex: *base_vertex,
                        start_instance: *start_instance,
                    },
                )?,
            Command::Dispatch { x, y, z } => self.dispatch(gpu, [*x, *y, *z])?,
            Command::Barriers(barriers) => apply_barriers(device, barriers)?,
            Command::CopyTextureRegion { dst, src } => self.copy_texture_region(gpu, dst, src)?,
            Command::CopyResource { dst, src } => self.copy_resource(gpu, dst, src)?,
        }
        Ok(())
    }

    /// Submits the encoded work, waits for it and refreshes readback buffers.
    fn finish(self, gpu: &GpuBackend) -> Result<(), DeviceError> {
        gpu.queue.submit([self.encoder.finish()]);
        gpu.wait_idle()?;
        gpu.check()?;
        for buffer in &self.readbacks {
            buffer.sync_readback(gpu)?;
        }
        Ok(())
    }

    /// Finds the bound shader-visible heap containing `base`.
    fn resolve_table(&self, base: GpuDescriptorHandle) -> Result<TableBinding, DeviceError> {
        if base.is_null() {
            return Err(DeviceError::InvalidDescriptor("null descriptor table handle".into()));
        }
        self.heaps
            .iter()
            .find_map(|heap| {
                heap.gpu_slot(base)
                    .map(|first_slot| TableBinding { heap: heap.clone(), first_slot })
            })
            .ok_or_else(|| {
                DeviceError::InvalidDescriptor(format!(
                    "table handle {:#x} is not inside any bound descriptor heap",
                    base.ptr
                ))
            })
    }

    // ── draw ──────────────────────────────────────────────────────────────

    fn draw(&mut self, gpu: &GpuBackend, call: DrawCall) -> Result<(), DeviceError> {
        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| DeviceError::InvalidCommandList("draw without a pipeline".into()))?;
        let desc = match pipeline.kind() {
            PipelineKind::Graphics { desc, .. } => desc,
            PipelineKind::Compute { .. } => {
                return Err(DeviceError::InvalidPipeline("draw with a compute pipeline bound".into()));
            }
        };
        let root = self
            .graphics_root
            .clone()
            .ok_or_else(|| DeviceError::InvalidCommandList("draw without a graphics root signature".into()))?;
        if !RootSignature::ptr_eq(&root, &desc.root_signature) {
            return Err(DeviceError::InvalidPipeline(
                "bound graphics root signature differs from the pipeline's".into(),
            ));
        }
        let viewport = self
            .viewport
            .ok_or_else(|| DeviceError::InvalidCommandList("draw without a viewport".into()))?;
        let scissor = self
            .scissor
            .ok_or_else(|| DeviceError::InvalidCommandList("draw without a scissor rect".into()))?;

        let dsv = self.check_targets(desc)?;
        let (width, height) = target_size(&self.rtvs, dsv.as_ref())?;
        check_viewport(&viewport, width, height)?;

        let vb = self
            .vertex_buffer
            .clone()
            .ok_or_else(|| DeviceError::InvalidCommandList("draw without a vertex buffer".into()))?;
        let vertex_count = check_vertex_buffer(desc, &vb)?;
        match call {
            DrawCall::Vertices { count, start, .. } => {
                if u64::from(start) + u64::from(count) > u64::from(vertex_count) {
                    return Err(DeviceError::InvalidResource(format!(
                        "vertices [{start}, {}) out of range; buffer holds {vertex_count}",
                        u64::from(start) + u64::from(count)
                    )));
                }
            }
            DrawCall::Indexed { count, start, base_vertex, .. } => {
                self.check_indices(count, start, base_vertex, vertex_count)?;
            }
        }

        let vs_views = resolve_views(&root, &self.graphics_tables, &desc.vertex_shader.registers, ShaderStage::Vertex)?;
        let ps_views = resolve_views(&root, &self.graphics_tables, &desc.pixel_shader.registers, ShaderStage::Pixel)?;

        let Some(scissor) = clamp_scissor(scissor, width, height) else {
            log::trace!("draw skipped: scissor rect is empty");
            return Ok(());
        };
        if call.is_empty() {
            return Ok(());
        }

        let (vertex_buffer, vertex_range, stride) = self.vertex_stream(gpu, &vb)?;
        let render = pipeline.render_pipeline(gpu, self.topology, stride)?;
        let mut entries = vs_views.entries(&root, gpu)?;
        entries.extend(ps_views.entries(&root, gpu)?);
        let groups = bind_groups(gpu, pipeline.group_count(), |g| render.get_bind_group_layout(g), &entries);

        let index = match call {
            DrawCall::Indexed { .. } => {
                let ib = self
                    .index_buffer
                    .as_ref()
                    .ok_or_else(|| DeviceError::InvalidCommandList("indexed draw without an index buffer".into()))?;
                ib.resource.flush_upload(gpu)?;
                let format = match ib.format {
                    IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                    IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                };
                Some((ib.resource.gpu_buffer()?.clone(), ib.offset, ib.size_bytes, format))
            }
            DrawCall::Vertices { .. } => None,
        };

        let colors = self.rtvs.iter().map(texture_view).collect::<Result<Vec<_>, _>>()?;
        let depth = dsv.as_ref().map(texture_view).transpose()?;
        let color_attachments: Vec<_> = colors
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
                })
            })
            .collect();

        let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(desc.vertex_shader.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth.as_ref().map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            ..Default::default()
        });
        pass.set_viewport(
            viewport.top_left_x,
            viewport.top_left_y,
            viewport.width,
            viewport.height,
            viewport.min_depth,
            viewport.max_depth,
        );
        pass.set_scissor_rect(scissor[0], scissor[1], scissor[2], scissor[3]);
        pass.set_pipeline(&render);
        for (g, group) in groups.iter().enumerate() {
            pass.set_bind_group(g as u32, group, &[]);
        }
        pass.set_vertex_buffer(0, vertex_buffer.slice(vertex_range));
        match (call, index) {
            (DrawCall::Vertices { count, instances, start, start_instance }, _) => {
                pass.draw(start..start + count, start_instance..start_instance + instances);
            }
            (
                DrawCall::Indexed { count, instances, start, base_vertex, start_instance },
                Some((buffer, offset, size, format)),
            ) => {
                pass.set_index_buffer(buffer.slice(offset..offset + u64::from(size)), format);
                pass.draw_indexed(start..start + count, base_vertex, start_instance..start_instance + instances);
            }
            (DrawCall::Indexed { .. }, None) => {}
        }
        Ok(())
    }

    /// Checks the bound targets against the pipeline; returns the depth view it writes.
    fn check_targets(&self, desc: &GraphicsPipelineDesc) -> Result<Option<ViewDesc>, DeviceError> {
        if self.rtvs.len() != desc.rtv_formats.len() {
            return Err(DeviceError::InvalidPipeline(format!(
                "pipeline writes {} render target(s) but {} are bound",
                desc.rtv_formats.len(),
                self.rtvs.len()
            )));
        }
        for (i, (view, format)) in self.rtvs.iter().zip(&desc.rtv_formats).enumerate() {
            if view.format() != *format {
                return Err(DeviceError::InvalidPipeline(format!(
                    "render target {i} is {:?} but the pipeline expects {format:?}",
                    view.format()
                )));
            }
            expect_state(view.resource(), &[ResourceState::RenderTarget], "render target")?;
            if self.rtvs[..i].iter().any(|o| Resource::ptr_eq(o.resource(), view.resource())) {
                return Err(DeviceError::InvalidResource(format!(
                    "{} bound as more than one render target",
                    view.resource().name()
                )));
            }
        }
        match (desc.dsv_format, &self.dsv) {
            (Format::Unknown, _) => Ok(None),
            (format, Some(view)) if view.format() == format => {
                expect_state(view.resource(), &[ResourceState::DepthWrite], "depth buffer")?;
                Ok(Some(view.clone()))
            }
            (format, Some(view)) => Err(DeviceError::InvalidPipeline(format!(
                "depth buffer is {:?} but the pipeline expects {format:?}",
                view.format()
            ))),
            (format, None) => Err(DeviceError::InvalidPipeline(format!(
                "pipeline expects a {format:?} depth buffer but none is bound"
            ))),
        }
    }

    /// Validates index reads. Indices are range checked when the buffer has a CPU copy.
    fn check_indices(&self, count: u32, start: u32, base_vertex: i32, vertex_count: u32) -> Result<(), DeviceError> {
        let ib = self
            .index_buffer
            .as_ref()
            .ok_or_else(|| DeviceError::InvalidCommandList("indexed draw without an index buffer".into()))?;
        expect_state(&ib.resource, &[ResourceState::GenericRead, ResourceState::Common], "index buffer")?;

        let size = u64::from(ib.format.size());
        if ib.offset % size != 0 {
            return Err(DeviceError::InvalidResource(format!(
                "index buffer offset {} is not a multiple of {size}",
                ib.offset
            )));
        }
        let begin = u64::from(start) * size;
        let end = begin + u64::from(count) * size;
        if end > u64::from(ib.size_bytes) || ib.offset + end > ib.resource.size_bytes() {
            return Err(DeviceError::InvalidResource(format!(
                "index read [{begin}, {end}) past the end of {} ({} bytes)",
                ib.resource.name(),
                ib.size_bytes
            )));
        }
        if ib.resource.heap_type() == HeapType::Default {
            return Ok(());
        }

        let data = ib.resource.inner.data.read_recursive();
        let bytes = &data[(ib.offset + begin) as usize..(ib.offset + end) as usize];
        let raw = |c: &[u8]| match ib.format {
            IndexFormat::Uint16 => u32::from(u16::from_le_bytes([c[0], c[1]])),
            IndexFormat::Uint32 => u32::from_le_bytes([c[0], c[1], c[2], c[3]]),
        };
        for i in bytes.chunks_exact(size as usize).map(raw) {
            let vertex = i64::from(i) + i64::from(base_vertex);
            if vertex < 0 {
                return Err(DeviceError::InvalidResource(format!(
                    "index {i} + base vertex {base_vertex} is negative"
                )));
            }
            if vertex >= i64::from(vertex_count) {
                return Err(DeviceError::InvalidResource(format!(
                    "vertex {vertex} out of range; buffer holds {vertex_count}"
                )));
            }
        }
        Ok(())
    }

    /// GPU buffer and stride the draw reads vertices from.
    ///
    /// wgpu needs 4-byte strides and offsets. Views that break that are
    /// re-laid out from the CPU copy of an upload buffer, once per list.
    fn vertex_stream(
        &mut self,
        gpu: &GpuBackend,
        vb: &VertexBufferView,
    ) -> Result<(wgpu::Buffer, Range<u64>, u32), DeviceError> {
        vb.resource.flush_upload(gpu)?;
        if vb.stride % 4 == 0 && vb.offset % 4 == 0 {
            let range = vb.offset..vb.offset + u64::from(vb.size_bytes);
            return Ok((vb.resource.gpu_buffer()?.clone(), range, vb.stride));
        }

        if vb.resource.heap_type() != HeapType::Upload {
            return Err(DeviceError::InvalidResource(format!(
                "vertex stride {} at offset {} in {:?} heap buffer {} is not 4-byte aligned",
                vb.stride,
                vb.offset,
                vb.resource.heap_type(),
                vb.resource.name()
            )));
        }
        let stride = align_to(u64::from(vb.stride), 4) as u32;
        let key = (vb.resource.id(), vb.offset, vb.size_bytes, vb.stride);
        if let Some(buffer) = self.repacked.get(&key) {
            return Ok((buffer.clone(), 0..buffer.size(), stride));
        }
        let data = vb.resource.inner.data.read_recursive();
        let begin = vb.offset as usize;
        let source = &data[begin..begin + vb.size_bytes as usize];
        let contents = repack(source, vb.stride as usize, stride as usize);
        let buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("repacked vertices"),
            contents: &contents,
            usage: wgpu::BufferUsages::VERTEX,
        });
        log::trace!(
            "{}: repacked {} vertices from stride {} to {stride}",
            vb.resource.name(),
            source.len() / vb.stride as usize,
            vb.stride
        );
        self.repacked.insert(key, buffer.clone());
        Ok((buffer.clone(), 0..buffer.size(), stride))
    }

    // ── dispatch ──────────────────────────────────────────────────────────

    fn dispatch(&mut self, gpu: &GpuBackend, groups: [u32; 3]) -> Result<(), DeviceError> {
        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| DeviceError::InvalidCommandList("dispatch without a pipeline".into()))?;
        let (desc, compute) = match pipeline.kind() {
            PipelineKind::Compute { desc, pipeline } => (desc, pipeline),
            PipelineKind::Graphics { .. } => {
                return Err(DeviceError::InvalidPipeline("dispatch with a graphics pipeline bound".into()));
            }
        };
        let root = self
            .compute_root
            .as_ref()
            .ok_or_else(|| DeviceError::InvalidCommandList("dispatch without a compute root signature".into()))?;
        if !RootSignature::ptr_eq(root, &desc.root_signature) {
            return Err(DeviceError::InvalidPipeline(
                "bound compute root signature differs from the pipeline's".into(),
            ));
        }

        let views = resolve_views(root, &self.compute_tables, &desc.compute_shader.registers, ShaderStage::Compute)?;
        let entries = views.entries(root, gpu)?;
        let bound = bind_groups(gpu, pipeline.group_count(), |g| compute.get_bind_group_layout(g), &entries);
        if groups.contains(&0) {
            return Ok(());
        }

        let mut pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(desc.compute_shader.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(compute);
        for (g, group) in bound.iter().enumerate() {
            pass.set_bind_group(g as u32, group, &[]);
        }
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        Ok(())
    }

    // ── clears ────────────────────────────────────────────────────────────

    fn clear_render_target(&mut self, device: &Device, view: &ViewDesc, color: [f32; 4]) -> Result<(), DeviceError> {
        expect_state(view.resource(), &[ResourceState::RenderTarget], "cleared render target")?;
        if device.validation() {
            if let Some(ClearValue::Color(optimized)) = view.resource().clear_value() {
                if optimized != color {
                    log::debug!(
                        "clear of {} with {color:?} differs from its optimized clear value {optimized:?}",
                        view.resource().name()
                    );
                }
            }
        }
        let target = texture_view(view)?;
        let [r, g, b, a] = color.map(f64::from);
        self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear render target"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        Ok(())
    }

    fn clear_depth(&mut self, device: &Device, view: &ViewDesc, depth: f32) -> Result<(), DeviceError> {
        expect_state(view.resource(), &[ResourceState::DepthWrite], "cleared depth buffer")?;
        if device.validation() {
            if let Some(ClearValue::Depth(optimized)) = view.resource().clear_value() {
                if optimized != depth {
                    log::debug!(
                        "depth clear of {} with {depth} differs from its optimized clear value {optimized}",
                        view.resource().name()
                    );
                }
            }
        }
        let target = texture_view(view)?;
        self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear depth"),
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &target,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(depth), store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            ..Default::default()
        });
        Ok(())
    }

    // ── copies ────────────────────────────────────────────────────────────

    fn copy_texture_region(
        &mut self,
        gpu: &GpuBackend,
        dst: &TextureCopyLocation,
        src: &TextureCopyLocation,
    ) -> Result<(), DeviceError> {
        match (dst, src) {
            (
                TextureCopyLocation::Subresource { resource: texture, index },
                TextureCopyLocation::Footprint { resource: buffer, footprint },
            ) => {
                check_subresource(texture, *index)?;
                check_copy_destination(texture)?;
                expect_state(texture, &[ResourceState::CopyDest], "copy destination")?;
                expect_state(
                    buffer,
                    &[ResourceState::GenericRead, ResourceState::CopySource, ResourceState::Common],
                    "copy source",
                )?;
                let extent = check_footprint(texture, buffer, footprint)?;
                buffer.flush_upload(gpu)?;
                self.encoder.copy_buffer_to_texture(
                    buffer_copy(buffer.gpu_buffer()?, footprint),
                    texture_copy(texture.gpu_texture()?),
                    extent,
                );
                Ok(())
            }
            (
                TextureCopyLocation::Footprint { resource: buffer, footprint },
                TextureCopyLocation::Subresource { resource: texture, index },
            ) => {
                check_subresource(texture, *index)?;
                expect_state(texture, &[ResourceState::CopySource], "copy source")?;
                expect_state(buffer, &[ResourceState::CopyDest], "copy destination")?;
                let extent = check_footprint(texture, buffer, footprint)?;
                self.encoder.copy_texture_to_buffer(
                    texture_copy(texture.gpu_texture()?),
                    buffer_copy(buffer.gpu_buffer()?, footprint),
                    extent,
                );
                self.track_readback(buffer);
                Ok(())
            }
            (
                TextureCopyLocation::Subresource { resource: d, index: di },
                TextureCopyLocation::Subresource { resource: s, index: si },
            ) => {
                check_subresource(d, *di)?;
                check_subresource(s, *si)?;
                self.copy_resource(gpu, d, s)
            }
            (TextureCopyLocation::Footprint { .. }, TextureCopyLocation::Footprint { .. }) => Err(
                DeviceError::InvalidResource("buffer-to-buffer copies must use CopyResource".into()),
            ),
        }
    }

    fn copy_resource(&mut self, gpu: &GpuBackend, dst: &Resource, src: &Resource) -> Result<(), DeviceError> {
        if Resource::ptr_eq(dst, src) {
            return Err(DeviceError::InvalidResource(format!("{} copied onto itself", dst.name())));
        }
        let compatible = match (dst.desc(), src.desc()) {
            (ResourceDesc::Buffer { size: a }, ResourceDesc::Buffer { size: b }) => a == b,
            // Usage flags may differ; layout may not.
            (ResourceDesc::Texture2d(a), ResourceDesc::Texture2d(b)) => {
                a.format == b.format && a.width == b.width && a.height == b.height
            }
            _ => false,
        };
        if !compatible {
            return Err(DeviceError::InvalidResource(format!(
                "copy between mismatched resources {:?} and {:?}",
                dst.desc(),
                src.desc()
            )));
        }
        let is_buffer = matches!(dst.desc(), ResourceDesc::Buffer { .. });
        let dst_ok: &[ResourceState] = if is_buffer {
            &[ResourceState::CopyDest, ResourceState::Common]
        } else {
            &[ResourceState::CopyDest]
        };
        let src_ok: &[ResourceState] = if is_buffer {
            &[ResourceState::CopySource, ResourceState::GenericRead, ResourceState::Common]
        } else {
            &[ResourceState::CopySource]
        };
        expect_state(dst, dst_ok, "copy destination")?;
        expect_state(src, src_ok, "copy source")?;

        match dst.desc() {
            ResourceDesc::Buffer { size } => {
                src.flush_upload(gpu)?;
                self.encoder.copy_buffer_to_buffer(
                    src.gpu_buffer()?,
                    0,
                    dst.gpu_buffer()?,
                    0,
                    align_to(*size, wgpu::COPY_BUFFER_ALIGNMENT),
                );
                self.track_readback(dst);
            }
            ResourceDesc::Texture2d(desc) => {
                check_copy_destination(dst)?;
                self.encoder.copy_texture_to_texture(
                    texture_copy(src.gpu_texture()?),
                    texture_copy(dst.gpu_texture()?),
                    desc.extent(),
                );
            }
        }
        Ok(())
    }

    fn track_readback(&mut self, buffer: &Resource) {
        if buffer.heap_type() == HeapType::Readback && !self.readbacks.iter().any(|r| Resource::ptr_eq(r, buffer)) {
            self.readbacks.push(buffer.clone());
        }
    }
}

fn bind_table(
    tables: &mut [Option<TableBinding>],
    index: u32,
    binding: TableBinding,
    what: &str,
) -> Result<(), DeviceError> {
    let slot = tables.get_mut(index as usize).ok_or_else(|| {
        DeviceError::InvalidCommandList(format!(
            "{what} root parameter {index} does not exist in the bound root signature"
        ))
    })?;
    *slot = Some(binding);
    Ok(())
}

fn expect_state(resource: &Resource, allowed: &[ResourceState], what: &str) -> Result<(), DeviceError> {
    let state = resource.state();
    if allowed.contains(&state) {
        Ok(())
    } else {
        Err(DeviceError::InvalidResource(format!(
            "{what} {} is in {state:?}; expected {}",
            resource.name(),
            allowed
                .iter()
                .map(|s| format!("{s:?}"))
                .collect::<Vec<_>>()
                .join(" or ")
        )))
    }
}

/// Returns the number of whole vertices the view holds.
fn check_vertex_buffer(desc: &GraphicsPipelineDesc, vb: &VertexBufferView) -> Result<u32, DeviceError> {
    expect_state(&vb.resource, &[ResourceState::GenericRead, ResourceState::Common], "vertex buffer")?;
    if vb.stride == 0 {
        return Err(DeviceError::InvalidResource("vertex buffer stride is zero".into()));
    }
    if let Some(e) = desc.input_layout.iter().find(|e| e.end() > vb.stride) {
        return Err(DeviceError::InvalidPipeline(format!(
            "input element {} ends at byte {} beyond the {}-byte stride",
            e.semantic,
            e.end(),
            vb.stride
        )));
    }
    if vb.offset + u64::from(vb.size_bytes) > vb.resource.size_bytes() {
        return Err(DeviceError::InvalidResource("vertex buffer view exceeds its resource".into()));
    }
    Ok(vb.size_bytes / vb.stride)
}

/// Size shared by every bound attachment.
fn target_size(rtvs: &[ViewDesc], dsv: Option<&ViewDesc>) -> Result<(u32, u32), DeviceError> {
    let mut size = None;
    for view in rtvs.iter().chain(dsv) {
        let resource = view.resource();
        let desc = resource
            .texture_desc()
            .ok_or_else(|| DeviceError::InvalidResource(format!("{} is not a texture", resource.name())))?;
        match size {
            None => size = Some((desc.width, desc.height)),
            Some((w, h)) if (w, h) != (desc.width, desc.height) => {
                return Err(DeviceError::InvalidResource(format!(
                    "{} is {}x{} but the other attachments are {w}x{h}",
                    resource.name(),
                    desc.width,
                    desc.height
                )));
            }
            Some(_) => {}
        }
    }
    size.ok_or_else(|| DeviceError::InvalidCommandList("draw without render targets".into()))
}

fn check_viewport(v: &Viewport, width: u32, height: u32) -> Result<(), DeviceError> {
    let inside = v.top_left_x >= 0.0
        && v.top_left_y >= 0.0
        && v.width >= 0.0
        && v.height >= 0.0
        && v.top_left_x + v.width <= width as f32
        && v.top_left_y + v.height <= height as f32
        && (0.0..=1.0).contains(&v.min_depth)
        && (0.0..=1.0).contains(&v.max_depth);
    if inside {
        Ok(())
    } else {
        Err(DeviceError::InvalidCommandList(format!(
            "viewport {v:?} does not fit the {width}x{height} render target"
        )))
    }
}

/// Scissor clipped to the target as `[x, y, width, height]`, or `None` when nothing is left.
fn clamp_scissor(rect: ScissorRect, width: u32, height: u32) -> Option<[u32; 4]> {
    let clamp = |v: i32, max: u32| v.clamp(0, i32::try_from(max).unwrap_or(i32::MAX)) as u32;
    let (left, right) = (clamp(rect.left, width), clamp(rect.right, width));
    let (top, bottom) = (clamp(rect.top, height), clamp(rect.bottom, height));
    if right <= left || bottom <= top {
        return None;
    }
    Some([left, top, right - left, bottom - top])
}

/// Copies `stride`-byte vertices into `packed`-byte slots, zero filling the tail.
fn repack(source: &[u8], stride: usize, packed: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(source.len() / stride * packed);
    for vertex in source.chunks_exact(stride) {
        out.extend_from_slice(vertex);
        out.resize(out.len() + packed - stride, 0);
    }
    out
}

fn texture_view(view: &ViewDesc) -> Result<wgpu::TextureView, DeviceError> {
    Ok(view
        .resource()
        .gpu_texture()?
        .create_view(&wgpu::TextureViewDescriptor::default()))
}

fn texture_copy(texture: &wgpu::Texture) -> wgpu::TexelCopyTextureInfo<'_> {
    wgpu::TexelCopyTextureInfo {
        texture,
        mip_level: 0,
        origin: wgpu::Origin3d::ZERO,
        aspect: wgpu::TextureAspect::All,
    }
}

fn buffer_copy<'a>(buffer: &'a wgpu::Buffer, fp: &PlacedFootprint) -> wgpu::TexelCopyBufferInfo<'a> {
    wgpu::TexelCopyBufferInfo {
        buffer,
        layout: wgpu::TexelCopyBufferLayout {
            offset: fp.offset,
            bytes_per_row: Some(fp.row_pitch),
            rows_per_image: Some(fp.num_rows),
        },
    }
}

// ── bindings ──────────────────────────────────────────────────────────────

/// Views a shader stage reads, resolved from the bound tables.
struct ResolvedViews {
    stage: ShaderStage,
    cbvs: Vec<(u32, ViewDesc)>,
    srvs: Vec<(u32, ViewDesc)>,
    uavs: Vec<(u32, ViewDesc)>,
    samplers: Vec<u32>,
}

/// One wgpu binding of a draw or dispatch.
struct BindEntry {
    group: u32,
    binding: u32,
    resource: BoundResource,
}

enum BoundResource {
    Buffer { buffer: wgpu::Buffer, offset: u64, size: u64 },
    Texture(wgpu::TextureView),
    Sampler(wgpu::Sampler),
}

impl ResolvedViews {
    fn entries(&self, root: &RootSignature, gpu: &GpuBackend) -> Result<Vec<BindEntry>, DeviceError> {
        let slot = |kind: DescriptorRangeKind, register: u32| {
            root.locate(kind, register, self.stage).ok_or_else(|| {
                DeviceError::InvalidPipeline(format!("{kind:?} register {register} is not in the root signature"))
            })
        };
        let mut entries = Vec::new();
        for (reg, view) in &self.cbvs {
            let ViewDesc::ConstantBuffer { resource, offset, size } = view else { continue };
            resource.flush_upload(gpu)?;
            let (group, binding) = slot(DescriptorRangeKind::Cbv, *reg)?;
            entries.push(BindEntry {
                group: group as u32,
                binding,
                resource: BoundResource::Buffer { buffer: resource.gpu_buffer()?.clone(), offset: *offset, size: *size },
            });
        }
        let textures = [(DescriptorRangeKind::Srv, &self.srvs), (DescriptorRangeKind::Uav, &self.uavs)];
        for (kind, views) in textures {
            for (reg, view) in views {
                let (group, binding) = slot(kind, *reg)?;
                entries.push(BindEntry { group: group as u32, binding, resource: BoundResource::Texture(texture_view(view)?) });
            }
        }
        for &reg in &self.samplers {
            let sampler = root
                .gpu_sampler(reg, self.stage)
                .ok_or_else(|| DeviceError::InvalidPipeline(format!("sampler s{reg} is not declared")))?;
            entries.push(BindEntry {
                group: root.parameter_count(),
                binding: reg,
                resource: BoundResource::Sampler(sampler.clone()),
            });
        }
        Ok(entries)
    }
}

/// One bind group per layout slot. Stages that bind the same slot share one
/// entry; groups nothing binds stay empty.
fn bind_groups(
    gpu: &GpuBackend,
    count: u32,
    layout: impl Fn(u32) -> wgpu::BindGroupLayout,
    entries: &[BindEntry],
) -> Vec<wgpu::BindGroup> {
    (0..count)
        .map(|group| {
            let mut seen = Vec::new();
            let wgpu_entries: Vec<wgpu::BindGroupEntry<'_>> = entries
                .iter()
                .filter(|e| e.group == group)
                .filter(|e| {
                    let fresh = !seen.contains(&e.binding);
                    seen.push(e.binding);
                    fresh
                })
                .map(|e| wgpu::BindGroupEntry {
                    binding: e.binding,
                    resource: match &e.resource {
                        BoundResource::Buffer { buffer, offset, size } => {
                            wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer,
                                offset: *offset,
                                size: NonZeroU64::new(*size),
                            })
                        }
                        BoundResource::Texture(view) => wgpu::BindingResource::TextureView(view),
                        BoundResource::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                    },
                })
                .collect();
            gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &layout(group),
                entries: &wgpu_entries,
            })
        })
        .collect()
}

fn srv_state(stage: ShaderStage) -> &'static [ResourceState] {
    match stage {
        ShaderStage::Pixel => &[ResourceState::PixelShaderResource, ResourceState::GenericRead],
        ShaderStage::Vertex | ShaderStage::Compute => {
            &[ResourceState::NonPixelShaderResource, ResourceState::GenericRead]
        }
    }
}

fn resolve_views(
    root: &RootSignature,
    tables: &[Option<TableBinding>],
    regs: &ShaderRegisters,
    stage: ShaderStage,
) -> Result<ResolvedViews, DeviceError> {
    let fetch = |kind: DescriptorRangeKind, register: u32| -> Result<ViewDesc, DeviceError> {
        let (param, offset) = root.locate(kind, register, stage).ok_or_else(|| {
            DeviceError::InvalidPipeline(format!("{kind:?} register {register} is not in the root signature"))
        })?;
        let binding = tables.get(param).and_then(Option::as_ref).ok_or_else(|| {
            DeviceError::InvalidDescriptor(format!("root parameter {param} has no descriptor table set"))
        })?;
        let slot = binding.first_slot + offset;
        binding.heap.get(slot).ok_or_else(|| {
            DeviceError::InvalidDescriptor(format!(
                "{stage:?} {kind:?} register {register}: heap slot {slot} is empty or out of range"
            ))
        })
    };
    let mismatch = |kind: DescriptorRangeKind, register: u32| {
        DeviceError::InvalidDescriptor(format!(
            "{stage:?} {kind:?} register {register} points at a descriptor of another type"
        ))
    };

    let mut cbvs = Vec::with_capacity(regs.cbv.len());
    for &reg in regs.cbv {
        let view = fetch(DescriptorRangeKind::Cbv, reg)?;
        if !matches!(view, ViewDesc::ConstantBuffer { .. }) {
            return Err(mismatch(DescriptorRangeKind::Cbv, reg));
        }
        expect_state(
            view.resource(),
            &[ResourceState::GenericRead, ResourceState::Common],
            "constant buffer",
        )?;
        cbvs.push((reg, view));
    }

    let mut srvs = Vec::with_capacity(regs.srv.len());
    for &reg in regs.srv {
        let view = fetch(DescriptorRangeKind::Srv, reg)?;
        if !matches!(view, ViewDesc::ShaderResource { .. }) {
            return Err(mismatch(DescriptorRangeKind::Srv, reg));
        }
        expect_state(view.resource(), srv_state(stage), "shader resource")?;
        srvs.push((reg, view));
    }

    let mut uavs: Vec<(u32, ViewDesc)> = Vec::with_capacity(regs.uav.len());
    for &reg in regs.uav {
        let view = fetch(DescriptorRangeKind::Uav, reg)?;
        if !matches!(view, ViewDesc::UnorderedAccess { .. }) {
            return Err(mismatch(DescriptorRangeKind::Uav, reg));
        }
        expect_state(view.resource(), &[ResourceState::UnorderedAccess], "unordered access view")?;
        if uavs.iter().any(|(_, o)| Resource::ptr_eq(o.resource(), view.resource())) {
            return Err(DeviceError::InvalidDescriptor(format!(
                "{} bound to more than one UAV register",
                view.resource().name()
            )));
        }
        uavs.push((reg, view));
    }

    for &reg in regs.samplers {
        if root.sampler(reg, stage).is_none() {
            return Err(DeviceError::InvalidPipeline(format!("sampler s{reg} is not declared")));
        }
    }

    Ok(ResolvedViews { stage, cbvs, srvs, uavs, samplers: regs.samplers.to_vec() })
}

// ── barriers ──────────────────────────────────────────────────────────────

fn apply_barriers(device: &Device, barriers: &[ResourceBarrier]) -> Result<(), DeviceError> {
    for barrier in barriers {
        let ResourceBarrier::Transition { resource, before, after } = barrier else {
            // wgpu orders storage writes between passes on its own.
            continue;
        };
        if resource.heap_type() != HeapType::Default {
            return Err(DeviceError::InvalidResource(format!(
                "{} lives in a {:?} heap and cannot change state",
                resource.name(),
                resource.heap_type()
            )));
        }
        let mut state = resource.inner.state.lock();
        if *state != *before {
            return Err(DeviceError::InvalidResource(format!(
                "transition of {} expects {before:?} but the resource is in {:?}",
                resource.name(),
                *state
            )));
        }
        if before == after && device.validation() {
            log::warn!("redundant transition of {} in {before:?}", resource.name());
        }
        *state = *after;
    }
    Ok(())
}

// ── copy checks ───────────────────────────────────────────────────────────

fn check_subresource(texture: &Resource, index: u32) -> Result<(), DeviceError> {
    if texture.texture_desc().is_none() {
        return Err(DeviceError::InvalidResource(format!("{} is not a texture", texture.name())));
    }
    if index != 0 {
        return Err(DeviceError::InvalidResource(format!(
            "subresource {index} of {} does not exist",
            texture.name()
        )));
    }
    Ok(())
}

fn check_copy_destination(texture: &Resource) -> Result<(), DeviceError> {
    match texture.texture_desc() {
        Some(desc) if desc.format.is_depth() => Err(DeviceError::InvalidResource(format!(
            "depth texture {} cannot be a copy destination",
            texture.name()
        ))),
        _ => Ok(()),
    }
}

/// Returns the copy extent on success.
fn check_footprint(texture: &Resource, buffer: &Resource, fp: &PlacedFootprint) -> Result<wgpu::Extent3d, DeviceError> {
    let invalid = |msg: String| Err(DeviceError::InvalidResource(msg));
    let Some(desc) = texture.texture_desc() else {
        return invalid(format!("{} is not a texture", texture.name()));
    };
    if !matches!(buffer.desc(), ResourceDesc::Buffer { .. }) {
        return invalid(format!("{} is not a buffer", buffer.name()));
    }
    if fp.format != desc.format || fp.width != desc.width || fp.height != desc.height {
        return invalid(format!(
            "footprint {:?} {}x{} does not match {} ({:?} {}x{})",
            fp.format,
            fp.width,
            fp.height,
            texture.name(),
            desc.format,
            desc.width,
            desc.height
        ));
    }
    if fp.offset % TEXTURE_DATA_PLACEMENT_ALIGNMENT != 0 {
        return invalid(format!("footprint offset {} is not 512-byte aligned", fp.offset));
    }
    if fp.row_pitch % super::TEXTURE_DATA_PITCH_ALIGNMENT != 0 || u64::from(fp.row_pitch) < fp.row_size {
        return invalid(format!("footprint row pitch {} is invalid", fp.row_pitch));
    }
    if fp.row_size != desc.row_bytes() || fp.num_rows != desc.height {
        return invalid("footprint rows do not cover the texture".into());
    }
    if fp.offset + fp.total_bytes > buffer.size_bytes() {
        return invalid(format!(
            "footprint needs {} bytes but {} holds {}",
            fp.offset + fp.total_bytes,
            buffer.name(),
            buffer.size_bytes()
        ));
    }
    Ok(desc.extent())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        CommandListType, DescriptorHeapKind, DescriptorRange, GpuContext, RootParameter, RootSignatureDesc,
        ShaderVisibility, TextureDesc, TextureFlags, testing,
    };
    use crate::device::{ComputePipelineDesc, ShaderSource};
    use crate::submit::CommandContext;

    // ── helpers ───────────────────────────────────────────────────────────

    #[test]
    fn repack_pads_every_vertex() {
        let packed = repack(&[1, 2, 3, 4, 5, 6], 3, 4);
        assert_eq!(packed, vec![1, 2, 3, 0, 4, 5, 6, 0]);
    }

    #[test]
    fn scissor_is_clipped_to_the_target() {
        let rect = ScissorRect { left: -4, top: 2, right: 300, bottom: 10 };
        assert_eq!(clamp_scissor(rect, 200, 100), Some([0, 2, 200, 8]));
        let outside = ScissorRect { left: 250, top: 0, right: 300, bottom: 10 };
        assert_eq!(clamp_scissor(outside, 200, 100), None);
    }

    #[test]
    fn viewport_must_fit_the_target() {
        assert!(check_viewport(&Viewport::new(200.0, 100.0), 200, 100).is_ok());
        assert!(check_viewport(&Viewport::new(201.0, 100.0), 200, 100).is_err());
    }

    #[test]
    fn zero_sized_draws_are_empty() {
        let call = DrawCall::Vertices { count: 3, instances: 0, start: 0, start_instance: 0 };
        assert!(call.is_empty());
        let call = DrawCall::Indexed { count: 3, instances: 1, start: 0, base_vertex: 0, start_instance: 0 };
        assert!(!call.is_empty());
    }

    // ── replay ────────────────────────────────────────────────────────────

    const INVERT: &str = r#"
@group(0) @binding(0) var dst: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(1) var src: texture_2d<f32>;

@compute @workgroup_size(1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let c = textureLoad(src, id.xy, 0);
    textureStore(dst, id.xy, vec4<f32>(1.0 - c.rgb, c.a));
}
"#;

    fn upload_texture(ctx: &GpuContext, texture: &Resource, pixels: &[u8]) {
        let device = &ctx.device;
        let desc = *texture.texture_desc().unwrap();
        let fp = device.copyable_footprint(&desc).unwrap();
        let staging = device.create_buffer(fp.total_bytes, HeapType::Upload).unwrap();
        let row = fp.row_size as usize;
        for (y, line) in pixels.chunks_exact(row).enumerate() {
            staging.write_bytes((y * fp.row_pitch as usize) as u64, line).unwrap();
        }
        let mut commands = CommandContext::new(ctx, CommandListType::Direct).unwrap();
        commands.list().copy_texture_region(
            TextureCopyLocation::subresource(texture, 0),
            TextureCopyLocation::footprint(&staging, fp),
        );
        commands.flush().unwrap();
    }

    fn read_texture(ctx: &GpuContext, texture: &Resource, state: ResourceState) -> Vec<u8> {
        let mut commands = CommandContext::new(ctx, CommandListType::Direct).unwrap();
        crate::frame::readback_texture(&mut commands, texture, state).unwrap()
    }

    #[test]
    fn dispatch_runs_on_the_gpu() {
        let Some(ctx) = testing::context() else { return };
        let device = &ctx.device;
        let desc = TextureDesc::new_2d(Format::Rgba8Unorm, 3, 2);
        let src = device
            .create_texture_2d(desc, HeapType::Default, ResourceState::CopyDest, None)
            .unwrap();
        let dst = device
            .create_texture_2d(
                desc.with_flags(TextureFlags::UNORDERED_ACCESS),
                HeapType::Default,
                ResourceState::UnorderedAccess,
                None,
            )
            .unwrap();
        let pixels: Vec<u8> = (0..24).map(|i| (i * 10) as u8).collect();
        upload_texture(&ctx, &src, &pixels);

        let root = device
            .create_root_signature(RootSignatureDesc {
                parameters: vec![RootParameter::table(
                    vec![
                        DescriptorRange::new(DescriptorRangeKind::Uav, 1, 0),
                        DescriptorRange::new(DescriptorRangeKind::Srv, 1, 0),
                    ],
                    ShaderVisibility::All,
                )],
                static_samplers: vec![],
            })
            .unwrap();
        let pipeline = device
            .create_compute_pipeline(ComputePipelineDesc {
                root_signature: root.clone(),
                compute_shader: ShaderSource::new("invert", INVERT, "main")
                    .with_registers(ShaderRegisters { srv: &[0], uav: &[0], ..Default::default() }),
            })
            .unwrap();
        let heap = device.create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 2, true).unwrap();
        device.populate_view(&heap, 0, ViewDesc::uav(&dst)).unwrap();
        device.populate_view(&heap, 1, ViewDesc::srv(&src)).unwrap();

        let mut commands = CommandContext::new(&ctx, CommandListType::Direct).unwrap();
        let list = commands.list();
        list.resource_barrier(&[ResourceBarrier::transition(
            &src,
            ResourceState::CopyDest,
            ResourceState::NonPixelShaderResource,
        )]);
        list.set_pipeline_state(&pipeline);
        list.set_compute_root_signature(&root);
        list.set_descriptor_heaps(&[&heap]);
        list.set_compute_root_descriptor_table(0, heap.gpu_start());
        list.dispatch(3, 2, 1);
        commands.flush().unwrap();

        let out = read_texture(&ctx, &dst, ResourceState::UnorderedAccess);
        for (got, want) in out.chunks_exact(4).zip(pixels.chunks_exact(4)) {
            assert_eq!(got[3], want[3]);
            for c in 0..3 {
                assert!((i32::from(got[c]) - (255 - i32::from(want[c]))).abs() <= 1, "{got:?} vs {want:?}");
            }
        }
        assert!(device.removal_reason().is_none());
    }

    #[test]
    fn clear_and_copy_reach_readback() {
        let Some(ctx) = testing::context() else { return };
        let device = &ctx.device;
        let desc = TextureDesc::new_2d(Format::Rgba8Unorm, 5, 3).with_flags(TextureFlags::RENDER_TARGET);
        let target = device
            .create_texture_2d(desc, HeapType::Default, ResourceState::RenderTarget, None)
            .unwrap();
        let heap = device.create_descriptor_heap(DescriptorHeapKind::Rtv, 1, false).unwrap();
        device.populate_view(&heap, 0, ViewDesc::rtv(&target)).unwrap();

        let mut commands = CommandContext::new(&ctx, CommandListType::Direct).unwrap();
        commands.list().clear_render_target_view(heap.cpu_start(), [1.0, 0.0, 0.0, 1.0]);
        commands.flush().unwrap();

        let out = read_texture(&ctx, &target, ResourceState::RenderTarget);
        assert_eq!(out.len(), 5 * 3 * 4);
        assert!(out.chunks_exact(4).all(|p| p == [255, 0, 0, 255]));
    }

    #[test]
    fn invalid_state_removes_the_device() {
        let Some(ctx) = testing::context() else { return };
        let device = &ctx.device;
        let desc = TextureDesc::new_2d(Format::Rgba8Unorm, 2, 2).with_flags(TextureFlags::RENDER_TARGET);
        let target = device
            .create_texture_2d(desc, HeapType::Default, ResourceState::PixelShaderResource, None)
            .unwrap();
        let heap = device.create_descriptor_heap(DescriptorHeapKind::Rtv, 1, false).unwrap();
        device.populate_view(&heap, 0, ViewDesc::rtv(&target)).unwrap();

        let mut commands = CommandContext::new(&ctx, CommandListType::Direct).unwrap();
        commands.list().clear_render_target_view(heap.cpu_start(), [0.0; 4]);
        assert!(commands.flush().is_err());
        let reason = device.removal_reason().unwrap();
        assert!(reason.contains("command 0"), "{reason}");
    }
}

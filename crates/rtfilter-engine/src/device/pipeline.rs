use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::command::PrimitiveTopology;
use super::gpu::GpuBackend;
use super::resource::align_to;
use super::shader::{ShaderRegisters, ShaderSource};
use super::{Device, DeviceError, Format};

/// Place a range directly after the previous one in its table.
pub const OFFSET_APPEND: u32 = u32::MAX;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorRangeKind {
    Cbv,
    Srv,
    Uav,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DescriptorRange {
    pub kind: DescriptorRangeKind,
    pub count: u32,
    pub base_register: u32,
    /// Slot offset inside the table, or [`OFFSET_APPEND`].
    pub offset: u32,
}

impl DescriptorRange {
    pub fn new(kind: DescriptorRangeKind, count: u32, base_register: u32) -> Self {
        Self { kind, count, base_register, offset: OFFSET_APPEND }
    }

    pub fn at_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShaderVisibility {
    All,
    Vertex,
    Pixel,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

impl ShaderVisibility {
    fn includes(self, stage: ShaderStage) -> bool {
        match self {
            Self::All => true,
            Self::Vertex => stage == ShaderStage::Vertex,
            Self::Pixel => stage == ShaderStage::Pixel,
        }
    }

    fn overlaps(self, other: Self) -> bool {
        self == Self::All || other == Self::All || self == other
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RootParameter {
    DescriptorTable {
        ranges: Vec<DescriptorRange>,
        visibility: ShaderVisibility,
    },
}

impl RootParameter {
    pub fn table(ranges: Vec<DescriptorRange>, visibility: ShaderVisibility) -> Self {
        Self::DescriptorTable { ranges, visibility }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Filter {
    Point,
    Linear,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AddressMode {
    Wrap,
    Clamp,
}

impl StaticSampler {
    fn create(&self, gpu: &GpuBackend) -> wgpu::Sampler {
        let filter = match self.filter {
            Filter::Point => wgpu::FilterMode::Nearest,
            Filter::Linear => wgpu::FilterMode::Linear,
        };
        let address = match self.address {
            AddressMode::Wrap => wgpu::AddressMode::Repeat,
            AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
        };
        gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("static sampler"),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StaticSampler {
    pub register: u32,
    pub filter: Filter,
    pub address: AddressMode,
    pub visibility: ShaderVisibility,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
    pub static_samplers: Vec<StaticSampler>,
}

/// One descriptor of a resolved table.
#[derive(Debug, Copy, Clone)]
pub(crate) struct TableSlot {
    pub kind: DescriptorRangeKind,
    pub register: u32,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedTable {
    pub slots: Vec<TableSlot>,
    pub visibility: ShaderVisibility,
}

struct RootSignatureShared {
    id: u64,
    desc: RootSignatureDesc,
    tables: Vec<ResolvedTable>,
    /// One per entry of `desc.static_samplers`.
    samplers: Vec<wgpu::Sampler>,
}

/// Immutable binding layout shared by pipelines and command lists.
#[derive(Clone)]
pub struct RootSignature {
    inner: Arc<RootSignatureShared>,
}

impl RootSignature {
    pub fn desc(&self) -> &RootSignatureDesc {
        &self.inner.desc
    }

    pub fn parameter_count(&self) -> u32 {
        self.inner.tables.len() as u32
    }

    pub(crate) fn tables(&self) -> &[ResolvedTable] {
        &self.inner.tables
    }

    pub(crate) fn sampler(&self, register: u32, stage: ShaderStage) -> Option<StaticSampler> {
        self.inner
            .desc
            .static_samplers
            .iter()
            .find(|s| s.register == register && s.visibility.includes(stage))
            .copied()
    }

    pub(crate) fn gpu_sampler(&self, register: u32, stage: ShaderStage) -> Option<&wgpu::Sampler> {
        self.inner
            .desc
            .static_samplers
            .iter()
            .position(|s| s.register == register && s.visibility.includes(stage))
            .map(|at| &self.inner.samplers[at])
    }

    /// Root parameter and table slot that bind `register` for `stage`.
    pub(crate) fn locate(
        &self,
        kind: DescriptorRangeKind,
        register: u32,
        stage: ShaderStage,
    ) -> Option<(usize, u32)> {
        self.inner.tables.iter().enumerate().find_map(|(index, table)| {
            if !table.visibility.includes(stage) {
                return None;
            }
            table
                .slots
                .iter()
                .find(|s| s.kind == kind && s.register == register)
                .map(|s| (index, s.offset))
        })
    }

    pub fn ptr_eq(a: &RootSignature, b: &RootSignature) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl std::fmt::Debug for RootSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootSignature")
            .field("id", &self.inner.id)
            .field("parameters", &self.inner.tables.len())
            .field("static_samplers", &self.inner.desc.static_samplers.len())
            .finish()
    }
}

fn resolve_tables(desc: &RootSignatureDesc) -> Result<Vec<ResolvedTable>, DeviceError> {
    let invalid = |msg: String| Err(DeviceError::InvalidPipeline(msg));
    let mut tables: Vec<ResolvedTable> = Vec::with_capacity(desc.parameters.len());

    for (index, param) in desc.parameters.iter().enumerate() {
        let RootParameter::DescriptorTable { ranges, visibility } = param;
        if ranges.is_empty() {
            return invalid(format!("root parameter {index} has an empty descriptor table"));
        }

        let mut slots = Vec::new();
        let mut next = 0u32;
        for range in ranges {
            if range.count == 0 {
                return invalid(format!("root parameter {index} has an empty {:?} range", range.kind));
            }
            let start = if range.offset == OFFSET_APPEND { next } else { range.offset };
            for i in 0..range.count {
                let offset = start + i;
                if slots.iter().any(|s: &TableSlot| s.offset == offset) {
                    return invalid(format!("root parameter {index}: table slot {offset} bound twice"));
                }
                slots.push(TableSlot {
                    kind: range.kind,
                    register: range.base_register + i,
                    offset,
                });
            }
            next = start + range.count;
        }

        for slot in &slots {
            let clash = tables.iter().any(|t| {
                t.visibility.overlaps(*visibility)
                    && t.slots.iter().any(|s| s.kind == slot.kind && s.register == slot.register)
            });
            if clash {
                return invalid(format!(
                    "{:?} register {} bound by more than one root parameter",
                    slot.kind, slot.register
                ));
            }
        }
        tables.push(ResolvedTable { slots, visibility: *visibility });
    }

    for (i, a) in desc.static_samplers.iter().enumerate() {
        let dup = desc.static_samplers[..i]
            .iter()
            .any(|b| b.register == a.register && b.visibility.overlaps(a.visibility));
        if dup {
            return invalid(format!("static sampler register s{} declared twice", a.register));
        }
    }

    Ok(tables)
}

/// Vertex attribute encodings.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Uint16x2,
    Uint8,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
            Self::Uint16x2 => 4,
            Self::Uint8 => 1,
        }
    }

    pub(crate) fn to_wgpu(self) -> wgpu::VertexFormat {
        match self {
            Self::Float32x2 => wgpu::VertexFormat::Float32x2,
            Self::Float32x3 => wgpu::VertexFormat::Float32x3,
            Self::Float32x4 => wgpu::VertexFormat::Float32x4,
            Self::Uint16x2 => wgpu::VertexFormat::Uint16x2,
            Self::Uint8 => wgpu::VertexFormat::Uint8,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct InputElement {
    pub semantic: &'static str,
    pub format: VertexFormat,
    /// Byte offset inside one vertex.
    pub offset: u32,
}

impl InputElement {
    pub fn new(semantic: &'static str, format: VertexFormat, offset: u32) -> Self {
        Self { semantic, format, offset }
    }

    pub(crate) fn end(&self) -> u32 {
        self.offset + self.format.size()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    /// `src * a + dst * (1 - a)` on color, `src + dst * (1 - a)` on alpha.
    AlphaBlend,
}

/// Depth test with `LESS` comparison.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
}

#[derive(Clone)]
pub struct GraphicsPipelineDesc {
    pub root_signature: RootSignature,
    pub vertex_shader: ShaderSource,
    pub pixel_shader: ShaderSource,
    pub input_layout: Vec<InputElement>,
    pub cull_mode: CullMode,
    pub blend: BlendMode,
    pub depth: Option<DepthState>,
    pub rtv_formats: Vec<Format>,
    /// `Format::Unknown` when no depth buffer is bound.
    pub dsv_format: Format,
}

#[derive(Clone)]
pub struct ComputePipelineDesc {
    pub root_signature: RootSignature,
    pub compute_shader: ShaderSource,
}

/// Where one register of a stage lands in the wgpu bind groups.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct BindingSlot {
    pub group: u32,
    pub binding: u32,
}

/// Compiled modules of a graphics pipeline plus the render pipelines built
/// from them so far, one per topology and vertex stride.
///
/// Each variant derives its own bind group layouts, so bind groups are built
/// against the variant that draws with them.
pub(crate) struct GraphicsProgram {
    vertex: wgpu::ShaderModule,
    pixel: wgpu::ShaderModule,
    variants: Mutex<HashMap<(PrimitiveTopology, u32), wgpu::RenderPipeline>>,
}

pub(crate) enum PipelineKind {
    Graphics { desc: GraphicsPipelineDesc, program: GraphicsProgram },
    Compute { desc: ComputePipelineDesc, pipeline: wgpu::ComputePipeline },
}

struct PipelineShared {
    id: u64,
    kind: PipelineKind,
    /// Bind groups the pipeline layout declares.
    group_count: u32,
}

/// Immutable compiled pipeline.
#[derive(Clone)]
pub struct PipelineState {
    inner: Arc<PipelineShared>,
}

impl PipelineState {
    pub fn is_compute(&self) -> bool {
        matches!(self.inner.kind, PipelineKind::Compute { .. })
    }

    pub(crate) fn kind(&self) -> &PipelineKind {
        &self.inner.kind
    }

    pub(crate) fn group_count(&self) -> u32 {
        self.inner.group_count
    }

    pub fn root_signature(&self) -> &RootSignature {
        match &self.inner.kind {
            PipelineKind::Graphics { desc, .. } => &desc.root_signature,
            PipelineKind::Compute { desc, .. } => &desc.root_signature,
        }
    }

    /// Render pipeline for `topology` over vertices `stride` bytes apart.
    pub(crate) fn render_pipeline(
        &self,
        gpu: &GpuBackend,
        topology: PrimitiveTopology,
        stride: u32,
    ) -> Result<wgpu::RenderPipeline, DeviceError> {
        let PipelineKind::Graphics { desc, program } = &self.inner.kind else {
            return Err(DeviceError::InvalidPipeline("draw with a compute pipeline bound".into()));
        };
        let mut variants = program.variants.lock();
        if let Some(pipeline) = variants.get(&(topology, stride)) {
            return Ok(pipeline.clone());
        }
        let pipeline = build_render_pipeline(gpu, desc, program, topology, stride)?;
        log::trace!("pipeline#{}: built {topology:?} variant for stride {stride}", self.inner.id);
        variants.insert((topology, stride), pipeline.clone());
        Ok(pipeline)
    }
}

impl std::fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineState")
            .field("id", &self.inner.id)
            .field("compute", &self.is_compute())
            .finish()
    }
}

fn check_registers(
    root: &RootSignature,
    regs: &ShaderRegisters,
    stage: ShaderStage,
) -> Result<Vec<BindingSlot>, DeviceError> {
    let kinds = [
        (DescriptorRangeKind::Cbv, regs.cbv, 'b'),
        (DescriptorRangeKind::Srv, regs.srv, 't'),
        (DescriptorRangeKind::Uav, regs.uav, 'u'),
    ];
    let mut slots = Vec::new();
    for (kind, registers, prefix) in kinds {
        for &reg in registers {
            let Some((param, offset)) = root.locate(kind, reg, stage) else {
                return Err(DeviceError::InvalidPipeline(format!(
                    "{stage:?} shader reads {prefix}{reg} which the root signature does not bind"
                )));
            };
            slots.push(BindingSlot { group: param as u32, binding: offset });
        }
    }
    for &reg in regs.samplers {
        if root.sampler(reg, stage).is_none() {
            return Err(DeviceError::InvalidPipeline(format!(
                "{stage:?} shader samples s{reg} which the root signature does not declare"
            )));
        }
        slots.push(BindingSlot { group: root.parameter_count(), binding: reg });
    }
    Ok(slots)
}

fn group_count(slots: &[BindingSlot]) -> u32 {
    slots.iter().map(|s| s.group + 1).max().unwrap_or(0)
}

fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    match mode {
        BlendMode::Opaque => None,
        BlendMode::AlphaBlend => Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        }),
    }
}

fn depth_stencil_state(desc: &GraphicsPipelineDesc) -> Option<wgpu::DepthStencilState> {
    let format = desc.dsv_format.to_wgpu()?;
    let (compare, write) = match desc.depth {
        Some(DepthState { test: true, write }) => (wgpu::CompareFunction::Less, write),
        Some(DepthState { test: false, write }) => (wgpu::CompareFunction::Always, write),
        None => (wgpu::CompareFunction::Always, false),
    };
    Some(wgpu::DepthStencilState {
        format,
        depth_write_enabled: write,
        depth_compare: compare,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    })
}

fn build_render_pipeline(
    gpu: &GpuBackend,
    desc: &GraphicsPipelineDesc,
    program: &GraphicsProgram,
    topology: PrimitiveTopology,
    stride: u32,
) -> Result<wgpu::RenderPipeline, DeviceError> {
    let attributes: Vec<wgpu::VertexAttribute> = desc
        .vertex_shader
        .inputs
        .iter()
        .enumerate()
        .filter_map(|(location, semantic)| {
            let element = desc.input_layout.iter().find(|e| e.semantic == *semantic)?;
            Some(wgpu::VertexAttribute {
                format: element.format.to_wgpu(),
                offset: u64::from(element.offset),
                shader_location: location as u32,
            })
        })
        .collect();
    let buffers = [wgpu::VertexBufferLayout {
        array_stride: u64::from(stride),
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &attributes,
    }];

    let blend = blend_state(desc.blend);
    let targets: Vec<Option<wgpu::ColorTargetState>> = desc
        .rtv_formats
        .iter()
        .map(|f| {
            f.to_wgpu().map(|format| wgpu::ColorTargetState {
                format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })
        })
        .collect();

    let pipeline = gpu.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(desc.vertex_shader.label),
        layout: None,
        vertex: wgpu::VertexState {
            module: &program.vertex,
            entry_point: Some(desc.vertex_shader.entry_point),
            buffers: &buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &program.pixel,
            entry_point: Some(desc.pixel_shader.entry_point),
            targets: &targets,
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: match topology {
                PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
                PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
            },
            front_face: wgpu::FrontFace::Cw,
            cull_mode: match desc.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        },
        depth_stencil: depth_stencil_state(desc),
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    });
    match gpu.take_error() {
        Some(error) => Err(DeviceError::InvalidPipeline(format!("{}: {error}", desc.vertex_shader.label))),
        None => Ok(pipeline),
    }
}

impl Device {
    pub fn create_root_signature(&self, desc: RootSignatureDesc) -> Result<RootSignature, DeviceError> {
        self.check_health()?;
        let tables = resolve_tables(&desc)?;
        let samplers = desc.static_samplers.iter().map(|s| s.create(self.gpu())).collect();
        Ok(RootSignature {
            inner: Arc::new(RootSignatureShared { id: self.next_object_id(), desc, tables, samplers }),
        })
    }

    pub fn create_graphics_pipeline(&self, desc: GraphicsPipelineDesc) -> Result<PipelineState, DeviceError> {
        self.check_health()?;
        let invalid = |msg: String| Err(DeviceError::InvalidPipeline(msg));

        if desc.rtv_formats.is_empty() || desc.rtv_formats.len() > 8 {
            return invalid(format!("{} render target formats; expected 1..=8", desc.rtv_formats.len()));
        }
        if let Some(f) = desc.rtv_formats.iter().find(|f| !f.is_color()) {
            return invalid(format!("{f:?} is not a render target format"));
        }
        if desc.dsv_format != Format::Unknown && !desc.dsv_format.is_depth() {
            return invalid(format!("{:?} is not a depth format", desc.dsv_format));
        }
        if desc.depth.is_some() && desc.dsv_format == Format::Unknown {
            return invalid("depth state set without a depth-stencil format".into());
        }

        for (i, e) in desc.input_layout.iter().enumerate() {
            if desc.input_layout[..i].iter().any(|o| o.semantic == e.semantic) {
                return invalid(format!("input semantic {} declared twice", e.semantic));
            }
        }
        for semantic in desc.vertex_shader.inputs {
            if !desc.input_layout.iter().any(|e| e.semantic == *semantic) {
                return invalid(format!("vertex shader input {semantic} missing from input layout"));
            }
        }

        let mut slots = check_registers(&desc.root_signature, &desc.vertex_shader.registers, ShaderStage::Vertex)?;
        slots.extend(check_registers(&desc.root_signature, &desc.pixel_shader.registers, ShaderStage::Pixel)?);

        let gpu = self.gpu();
        let program = GraphicsProgram {
            vertex: desc.vertex_shader.compile(gpu)?,
            pixel: desc.pixel_shader.compile(gpu)?,
            variants: Mutex::new(HashMap::new()),
        };
        // Building the packed triangle-list variant now surfaces shader and
        // layout mismatches at creation.
        let end = desc.input_layout.iter().map(InputElement::end).max().unwrap_or(0);
        let key = (PrimitiveTopology::TriangleList, align_to(u64::from(end), 4) as u32);
        let first = build_render_pipeline(gpu, &desc, &program, key.0, key.1)?;
        program.variants.lock().insert(key, first);

        Ok(PipelineState {
            inner: Arc::new(PipelineShared {
                id: self.next_object_id(),
                kind: PipelineKind::Graphics { desc, program },
                group_count: group_count(&slots),
            }),
        })
    }

    pub fn create_compute_pipeline(&self, desc: ComputePipelineDesc) -> Result<PipelineState, DeviceError> {
        self.check_health()?;
        let slots = check_registers(&desc.root_signature, &desc.compute_shader.registers, ShaderStage::Compute)?;

        let gpu = self.gpu();
        let module = desc.compute_shader.compile(gpu)?;
        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(desc.compute_shader.label),
            layout: None,
            module: &module,
            entry_point: Some(desc.compute_shader.entry_point),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(error) = gpu.take_error() {
            return Err(DeviceError::InvalidPipeline(format!("{}: {error}", desc.compute_shader.label)));
        }

        Ok(PipelineState {
            inner: Arc::new(PipelineShared {
                id: self.next_object_id(),
                kind: PipelineKind::Compute { desc, pipeline },
                group_count: group_count(&slots),
            }),
        })
    }
}

//! Explicit GPU device.
//!
//! This module is responsible for:
//! - resources, descriptor heaps and their handle arithmetic
//! - root signatures, pipelines and WGSL shader stages
//! - command allocators, lists, queues and fences
//! - replaying recorded commands onto wgpu and presenting back buffers
//!
//! Queues run on worker threads. Whatever a debug layer would report at
//! execution time removes the device instead.

mod command;
mod context;
mod descriptor;
mod error;
mod exec;
mod fence;
mod format;
mod gpu;
mod logical;
mod pipeline;
mod queue;
mod resource;
mod shader;
mod swapchain;
#[cfg(test)]
pub(crate) mod testing;

pub use command::{
    CommandAllocator, CommandList, CommandListState, CommandListType, IndexBufferView, IndexFormat,
    PrimitiveTopology, ResourceBarrier, ScissorRect, TextureCopyLocation, VertexBufferView, Viewport,
};
pub use context::GpuContext;
pub use descriptor::{CpuDescriptorHandle, DescriptorHeap, DescriptorHeapKind, GpuDescriptorHandle, ViewDesc};
pub use error::DeviceError;
pub use fence::Fence;
pub use format::Format;
pub use logical::{AdapterProfile, Device, DeviceDesc};
pub use pipeline::{
    AddressMode, BlendMode, ComputePipelineDesc, CullMode, DepthState, DescriptorRange, DescriptorRangeKind,
    Filter, GraphicsPipelineDesc, InputElement, OFFSET_APPEND, PipelineState, RootParameter, RootSignature,
    RootSignatureDesc, ShaderStage, ShaderVisibility, StaticSampler, VertexFormat,
};
pub use queue::CommandQueue;
pub use resource::{
    CONSTANT_BUFFER_ALIGNMENT, ClearValue, HeapType, MappedBuffer, PlacedFootprint, Resource, ResourceDesc,
    ResourceState, TEXTURE_DATA_PITCH_ALIGNMENT, TextureDesc, TextureFlags, align_to,
};
pub use shader::{ShaderRegisters, ShaderSource};
pub use swapchain::{CaptureSink, CapturedFrame, PresentFrame, PresentSink, SwapChain, SwapChainDesc};

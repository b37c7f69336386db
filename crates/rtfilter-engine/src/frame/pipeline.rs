use crate::device::{
    ClearValue, CommandListType, DescriptorHeap, DescriptorHeapKind, DeviceError, GpuContext, HeapType,
    PresentSink, Resource, ResourceBarrier, ResourceState, ScissorRect, SwapChain, SwapChainDesc, TextureCopyLocation,
    TextureDesc, TextureFlags, ViewDesc, Viewport,
};
use crate::scene::{DEPTH_FORMAT, SCENE_FORMAT, Scene};
use crate::submit::CommandContext;

use super::post_filter::PostFilter;
use super::readback::readback_texture;

const CLEAR_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
const CLEAR_DEPTH: f32 = 1.0;

/// Where the monochrome filter runs.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum FilterMode {
    /// Every frame, over the rendered scene.
    #[default]
    RenderTarget,
    /// Never per frame; the scene is copied out as drawn. Used when a texture
    /// was filtered once up front with [`filter_texture`](super::filter_texture).
    Texture,
}

/// What one call to [`FramePipeline::render`] did.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameStats {
    pub frame_index: u64,
    pub back_buffer_index: u32,
    pub graphics_fence: u64,
    pub compute_fence: u64,
    pub draw_calls: u32,
}

/// Scene pass, compute post filter and copy into the swap chain, in that order.
///
/// Every stage waits for its fence before the next one starts, so the scene
/// target is never touched by both queues at once. A failed frame reopens
/// both lists and returns every frame resource to its resting state, so the
/// next call starts clean.
pub struct FramePipeline {
    graphics: CommandContext,
    compute: CommandContext,
    swap_chain: SwapChain,
    scene_target: Resource,
    rtv_heap: DescriptorHeap,
    depth: Resource,
    dsv_heap: DescriptorHeap,
    viewport: Viewport,
    scissor: ScissorRect,
    filter: Option<PostFilter>,
    frame_index: u64,
}

impl FramePipeline {
    pub fn new(ctx: &GpuContext, width: u32, height: u32) -> Result<Self, DeviceError> {
        Self::with_mode(ctx, width, height, FilterMode::RenderTarget)
    }

    pub fn with_mode(ctx: &GpuContext, width: u32, height: u32, mode: FilterMode) -> Result<Self, DeviceError> {
        let device = &ctx.device;
        let swap_chain = device.create_swap_chain(&ctx.graphics_queue, SwapChainDesc::new(width, height))?;

        let scene_target = device.create_texture_2d(
            TextureDesc::new_2d(SCENE_FORMAT, width, height).with_flags(TextureFlags::RENDER_TARGET),
            HeapType::Default,
            ResourceState::RenderTarget,
            Some(ClearValue::Color(CLEAR_COLOR)),
        )?;
        scene_target.set_name("scene target");
        let rtv_heap = device.create_descriptor_heap(DescriptorHeapKind::Rtv, 1, false)?;
        device.create_view(ViewDesc::rtv(&scene_target), rtv_heap.cpu_start())?;

        let depth = device.create_texture_2d(
            TextureDesc::new_2d(DEPTH_FORMAT, width, height).with_flags(TextureFlags::DEPTH_STENCIL),
            HeapType::Default,
            ResourceState::DepthWrite,
            Some(ClearValue::Depth(CLEAR_DEPTH)),
        )?;
        depth.set_name("depth");
        let dsv_heap = device.create_descriptor_heap(DescriptorHeapKind::Dsv, 1, false)?;
        device.create_view(ViewDesc::dsv(&depth), dsv_heap.cpu_start())?;

        let filter = match mode {
            FilterMode::RenderTarget => Some(PostFilter::new(ctx, &scene_target)?),
            FilterMode::Texture => None,
        };

        log::info!("frame pipeline {width}x{height} ready, filter on {mode:?}");
        Ok(Self {
            graphics: CommandContext::new(ctx, CommandListType::Direct)?,
            compute: CommandContext::new(ctx, CommandListType::Compute)?,
            swap_chain,
            scene_target,
            rtv_heap,
            depth,
            dsv_heap,
            viewport: Viewport::new(width as f32, height as f32),
            scissor: ScissorRect::new(width, height),
            filter,
            frame_index: 0,
        })
    }

    pub fn swap_chain(&self) -> &SwapChain {
        &self.swap_chain
    }

    /// Render target of the scene pass; in `RenderTarget` between frames.
    pub fn scene_target(&self) -> &Resource {
        &self.scene_target
    }

    pub fn mode(&self) -> FilterMode {
        match self.filter {
            Some(_) => FilterMode::RenderTarget,
            None => FilterMode::Texture,
        }
    }

    /// What gets copied into the back buffer: the filtered image, or the scene
    /// target itself in [`FilterMode::Texture`].
    pub fn output(&self) -> &Resource {
        match &self.filter {
            Some(filter) => filter.output(),
            None => &self.scene_target,
        }
    }

    fn output_rest_state(&self) -> ResourceState {
        match self.filter {
            Some(_) => ResourceState::UnorderedAccess,
            None => ResourceState::RenderTarget,
        }
    }

    pub fn depth(&self) -> &Resource {
        &self.depth
    }

    /// Renders, filters and presents one frame.
    pub fn render(&mut self, scene: &Scene, sink: &mut dyn PresentSink) -> Result<FrameStats, DeviceError> {
        let result = self.record_frame(scene, sink);
        if let Err(err) = &result {
            log::warn!("frame {} failed: {err}", self.frame_index);
            if let Err(recover) = self.recover() {
                log::error!("frame {} could not be recovered: {recover}", self.frame_index);
            }
        }
        result
    }

    fn record_frame(&mut self, scene: &Scene, sink: &mut dyn PresentSink) -> Result<FrameStats, DeviceError> {
        let back_buffer_index = self.swap_chain.current_back_buffer_index();
        let back_buffer = self
            .swap_chain
            .buffer(back_buffer_index)
            .cloned()
            .ok_or_else(|| DeviceError::InvalidResource(format!("no back buffer {back_buffer_index}")))?;
        let output = self.output().clone();

        // Scene pass.
        let rtv = self.rtv_heap.cpu_start();
        let dsv = self.dsv_heap.cpu_start();
        let list = self.graphics.list();
        list.resource_barrier(&[ResourceBarrier::transition(
            &back_buffer,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )]);
        list.set_render_targets(&[rtv], Some(dsv));
        list.clear_depth_stencil_view(dsv, CLEAR_DEPTH);
        list.clear_render_target_view(rtv, CLEAR_COLOR);
        list.set_viewport(self.viewport);
        list.set_scissor_rect(self.scissor);
        let draw_calls = scene.record(list);

        let compute_fence = match &self.filter {
            Some(filter) => {
                list.resource_barrier(&[ResourceBarrier::transition(
                    &self.scene_target,
                    ResourceState::RenderTarget,
                    ResourceState::NonPixelShaderResource,
                )]);
                self.graphics.submit_and_wait()?;
                self.graphics.reset(None)?;

                // Post filter.
                filter.record(self.compute.list());
                let value = self.compute.submit_and_wait()?;
                self.compute.reset(Some(filter.pipeline()))?;

                self.graphics.list().resource_barrier(&[ResourceBarrier::transition(
                    &self.scene_target,
                    ResourceState::NonPixelShaderResource,
                    ResourceState::RenderTarget,
                )]);
                value
            }
            None => self.compute.fence_value(),
        };

        // Copy into the back buffer.
        let rest = self.output_rest_state();
        let list = self.graphics.list();
        list.resource_barrier(&[
            ResourceBarrier::transition(&back_buffer, ResourceState::RenderTarget, ResourceState::CopyDest),
            ResourceBarrier::transition(&output, rest, ResourceState::CopySource),
        ]);
        list.copy_texture_region(
            TextureCopyLocation::subresource(&back_buffer, 0),
            TextureCopyLocation::subresource(&output, 0),
        );
        list.resource_barrier(&[
            ResourceBarrier::transition(&back_buffer, ResourceState::CopyDest, ResourceState::RenderTarget),
            ResourceBarrier::transition(&output, ResourceState::CopySource, rest),
        ]);
        list.resource_barrier(&[ResourceBarrier::transition(
            &back_buffer,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )]);
        let graphics_fence = self.graphics.submit_and_wait()?;
        self.graphics.reset(None)?;

        self.swap_chain.present(sink)?;

        let stats = FrameStats {
            frame_index: self.frame_index,
            back_buffer_index,
            graphics_fence,
            compute_fence,
            draw_calls,
        };
        log::trace!("{stats:?}");
        self.frame_index += 1;
        Ok(stats)
    }

    /// Reopens both lists and transitions every frame resource back to where
    /// the next frame expects it.
    fn recover(&mut self) -> Result<(), DeviceError> {
        self.graphics.reopen()?;
        self.compute.reopen()?;

        let mut resting = vec![(self.scene_target.clone(), ResourceState::RenderTarget)];
        if let Some(filter) = &self.filter {
            resting.push((filter.output().clone(), ResourceState::UnorderedAccess));
        }
        for index in 0..self.swap_chain.desc().buffer_count {
            if let Some(buffer) = self.swap_chain.buffer(index) {
                resting.push((buffer.clone(), ResourceState::Present));
            }
        }
        let barriers: Vec<_> = resting
            .iter()
            .filter(|(resource, state)| resource.state() != *state)
            .map(|(resource, state)| ResourceBarrier::transition(resource, resource.state(), *state))
            .collect();
        if barriers.is_empty() {
            return Ok(());
        }
        log::debug!("restoring {} frame resource state(s)", barriers.len());
        self.graphics.list().resource_barrier(&barriers);
        self.graphics.flush()?;
        Ok(())
    }

    /// Pixels of the scene target as last rendered.
    pub fn read_scene_target(&mut self) -> Result<Vec<u8>, DeviceError> {
        readback_texture(&mut self.graphics, &self.scene_target, ResourceState::RenderTarget)
    }

    /// Pixels of the image last copied into the back buffer.
    pub fn read_output(&mut self) -> Result<Vec<u8>, DeviceError> {
        let output = self.output().clone();
        let rest = self.output_rest_state();
        readback_texture(&mut self.graphics, &output, rest)
    }
}

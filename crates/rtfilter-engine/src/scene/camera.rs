use glam::{Mat4, Vec3};

use crate::device::{
    CONSTANT_BUFFER_ALIGNMENT, CommandList, DescriptorHeap, DescriptorHeapKind, DeviceError, GpuContext, HeapType,
    Resource, ViewDesc, align_to,
};
use crate::shaders::SceneConstants;

use super::renderer::SCENE_PARAMETER;

/// Fixed camera looking at the model from the front.
#[derive(Debug, Clone, Copy)]
pub struct CameraConfig {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 15.0, -300.0),
            target: Vec3::new(0.0, 15.0, 0.0),
            up: Vec3::Y,
            fov_y: std::f32::consts::FRAC_PI_4,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl CameraConfig {
    /// Left-handed view and projection for a `width` x `height` target.
    pub fn constants(&self, width: u32, height: u32) -> SceneConstants {
        let aspect = width as f32 / height.max(1) as f32;
        SceneConstants {
            view: Mat4::look_at_lh(self.eye, self.target, self.up),
            proj: Mat4::perspective_lh(self.fov_y, aspect, self.near, self.far),
            eye: self.eye,
            _pad: 0.0,
        }
    }
}

/// Scene constant buffer and the one-descriptor heap that exposes it as `b0`.
pub struct SceneView {
    config: CameraConfig,
    constants: Resource,
    heap: DescriptorHeap,
}

impl SceneView {
    pub fn new(ctx: &GpuContext, config: CameraConfig, width: u32, height: u32) -> Result<Self, DeviceError> {
        let device = &ctx.device;
        let size = align_to(std::mem::size_of::<SceneConstants>() as u64, CONSTANT_BUFFER_ALIGNMENT);
        let constants = device.create_buffer(size, HeapType::Upload)?;
        constants.set_name("scene constants");
        constants.write_pod(0, &config.constants(width, height))?;

        let heap = device.create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 1, true)?;
        device.create_view(ViewDesc::cbv(&constants), heap.cpu_start())?;
        Ok(Self { config, constants, heap })
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Rewrites the matrices for a new target size.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), DeviceError> {
        self.constants.write_pod(0, &self.config.constants(width, height))
    }

    pub fn record(&self, list: &mut CommandList) {
        list.set_descriptor_heaps(&[&self.heap]);
        list.set_graphics_root_descriptor_table(SCENE_PARAMETER, self.heap.gpu_start());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn target_projects_to_screen_centre() {
        let c = CameraConfig::default().constants(200, 200);
        let clip = c.proj * c.view * Vec4::new(0.0, 15.0, 0.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn constants_fit_one_aligned_block() {
        assert!(std::mem::size_of::<SceneConstants>() as u64 <= CONSTANT_BUFFER_ALIGNMENT);
    }
}

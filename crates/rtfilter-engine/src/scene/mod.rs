//! Scene content: camera, PMD actors and the textured quad.

mod actor;
mod camera;
mod quad;
mod renderer;

pub use actor::PmdActor;
pub use camera::{CameraConfig, SceneView};
pub use quad::TexturedQuad;
pub use renderer::{
    DEPTH_FORMAT, MATERIAL_DESCRIPTOR_COUNT, MATERIAL_PARAMETER, PmdRenderer, RendererResources, SCENE_FORMAT,
    SCENE_PARAMETER, TRANSFORM_PARAMETER,
};

use crate::device::{CommandList, DeviceError};

/// Everything drawn in the scene pass.
pub struct Scene {
    pub view: SceneView,
    pub renderer: PmdRenderer,
    pub quad: Option<TexturedQuad>,
    pub actors: Vec<PmdActor>,
}

impl Scene {
    pub fn new(view: SceneView, renderer: PmdRenderer) -> Self {
        Self { view, renderer, quad: None, actors: Vec::new() }
    }

    pub fn update(&mut self, dt: f32) -> Result<(), DeviceError> {
        for actor in &mut self.actors {
            actor.update(dt)?;
        }
        Ok(())
    }

    /// Records the quad, then every actor. Render targets must already be bound.
    ///
    /// Returns the number of draw calls.
    pub fn record(&self, list: &mut CommandList) -> u32 {
        let mut draws = 0;
        if let Some(quad) = &self.quad {
            quad.record(list);
            draws += 1;
        }
        if self.actors.is_empty() {
            return draws;
        }
        self.renderer.begin(list);
        self.view.record(list);
        for actor in &self.actors {
            draws += actor.record(list);
        }
        draws
    }
}

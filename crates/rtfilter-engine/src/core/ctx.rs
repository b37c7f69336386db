use winit::window::{Window, WindowId};

use crate::present::WindowPresenter;
use crate::time::FrameTime;
use crate::window::RuntimeCtx;

pub struct WindowCtx<'a> {
    pub id: WindowId,
    pub window: &'a Window,
}

impl WindowCtx<'_> {
    /// Physical size as `(width, height)`.
    pub fn physical_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }
}

/// Per-frame context passed to [`App::on_frame`](super::App::on_frame).
///
/// `'a` is the callback; `'w` is the window borrow carried by the presenter.
pub struct FrameCtx<'a, 'w> {
    pub window: WindowCtx<'a>,
    /// Present sink for [`FramePipeline::render`](crate::frame::FramePipeline::render).
    pub presenter: &'a mut WindowPresenter<'w>,
    pub time: FrameTime,
    pub runtime: &'a mut RuntimeCtx,
}

//! Per-frame orchestration: scene pass, compute filter, copy and present,
//! plus the one-shot filter over a loaded texture.

mod pipeline;
mod post_filter;
mod readback;

pub use pipeline::{FilterMode, FramePipeline, FrameStats};
pub use post_filter::{PostFilter, filter_texture};
pub use readback::readback_texture;

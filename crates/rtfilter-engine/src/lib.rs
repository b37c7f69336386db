//! rtfilter engine crate.
//!
//! An explicit, queue-based GPU device that renders a PMD actor and a
//! textured quad offscreen, runs a compute monochrome filter over the
//! result, copies it into the swap chain and presents. Presentation goes to
//! a [`device::PresentSink`]: in memory for tests and headless runs, or a
//! winit window through [`present::WindowPresenter`].

pub mod core;
pub mod device;
pub mod frame;
pub mod logging;
pub mod present;
pub mod scene;
pub mod shaders;
pub mod submit;
pub mod texture;
pub mod time;
pub mod window;

mod error;

pub use error::{AssetError, EngineError};

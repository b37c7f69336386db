//! Window presentation through wgpu.
//!
//! [`WindowPresenter`] is a [`PresentSink`](crate::device::PresentSink): each
//! presented back buffer is uploaded to a wgpu texture and drawn to the
//! window surface with a fullscreen triangle.

mod blit;
mod error;
mod init;
mod presenter;
mod surface;

pub use error::SurfaceErrorAction;
pub use init::PresenterInit;
pub use presenter::WindowPresenter;

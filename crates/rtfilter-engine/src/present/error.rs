/// What to do after acquiring the surface texture failed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceErrorAction {
    /// Surface was reconfigured; the next frame can present.
    Reconfigured,
    /// Transient failure; drop this frame.
    SkipFrame,
    /// The surface is unusable (commonly out of memory).
    Fatal,
}

use std::path::PathBuf;

use rtfilter_pmd::ParseError;

use crate::device::DeviceError;

/// Failure to read or decode a model or texture file.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("no decoder for {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("invalid model {}", path.display())]
    Model {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

/// Error from constructors that touch both the device and asset files.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Asset(#[from] AssetError),
}

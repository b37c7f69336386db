/// Texel formats understood by the device.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Format {
    /// Placeholder for views that inherit the resource format.
    #[default]
    Unknown,
    Rgba8Unorm,
    Bgra8Unorm,
    R32Float,
    D32Float,
}

impl Format {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Float | Self::D32Float => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32Float)
    }

    pub fn is_color(self) -> bool {
        matches!(self, Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Float)
    }

    /// Whether compute shaders may write it through a UAV without extra features.
    pub fn supports_storage(self) -> bool {
        matches!(self, Self::Rgba8Unorm | Self::R32Float)
    }

    pub(crate) fn to_wgpu(self) -> Option<wgpu::TextureFormat> {
        match self {
            Self::Unknown => None,
            Self::Rgba8Unorm => Some(wgpu::TextureFormat::Rgba8Unorm),
            Self::Bgra8Unorm => Some(wgpu::TextureFormat::Bgra8Unorm),
            Self::R32Float => Some(wgpu::TextureFormat::R32Float),
            Self::D32Float => Some(wgpu::TextureFormat::Depth32Float),
        }
    }
}

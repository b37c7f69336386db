use std::path::Path;

/// Decoder family selected from a file extension.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DecodeFormat {
    /// Formats the decoder can sniff from content: `bmp`, `png`, `jpg` and sphere maps.
    Generic,
    Tga,
    Dds,
}

impl DecodeFormat {
    /// Matches the exact lowercase extension; anything else is unsupported.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "sph" | "spa" | "bmp" | "png" | "jpg" => Some(Self::Generic),
            "tga" => Some(Self::Tga),
            "dds" => Some(Self::Dds),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_on_extension() {
        assert_eq!(DecodeFormat::from_path(Path::new("a/b.png")), Some(DecodeFormat::Generic));
        assert_eq!(DecodeFormat::from_path(Path::new("m.sph")), Some(DecodeFormat::Generic));
        assert_eq!(DecodeFormat::from_path(Path::new("m.tga")), Some(DecodeFormat::Tga));
        assert_eq!(DecodeFormat::from_path(Path::new("m.dds")), Some(DecodeFormat::Dds));
    }

    #[test]
    fn unknown_and_uppercase_are_unsupported() {
        assert_eq!(DecodeFormat::from_path(Path::new("m.gif")), None);
        assert_eq!(DecodeFormat::from_path(Path::new("m.PNG")), None);
        assert_eq!(DecodeFormat::from_path(Path::new("noext")), None);
    }
}

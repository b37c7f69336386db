/// Role a texture plays in a material, decided by its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureRole {
    Base,
    /// `.sph`: multiplicative sphere map.
    Sphere,
    /// `.spa`: additive sphere map.
    Additive,
}

impl TextureRole {
    pub fn classify(file: &str) -> Self {
        match extension(file) {
            Some("sph") => Self::Sphere,
            Some("spa") => Self::Additive,
            _ => Self::Base,
        }
    }
}

/// The texture files named by a material's 20-byte texture field.
///
/// The field is either empty, a single file, or two files joined by `*`.
/// Sphere maps are recognised by extension alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TexturePaths {
    pub base: Option<String>,
    pub sphere: Option<String>,
    pub additive: Option<String>,
}

impl TexturePaths {
    pub fn parse(field: &str) -> Self {
        let mut out = Self::default();
        if field.is_empty() {
            return out;
        }

        match field.split_once('*') {
            None => out.assign(field),
            Some((first, second)) => {
                let first_role = TextureRole::classify(first);
                out.assign(first);
                if first_role == TextureRole::Base {
                    // A second base texture has nowhere to go; only sphere maps count.
                    if TextureRole::classify(second) != TextureRole::Base {
                        out.assign(second);
                    }
                } else if !second.is_empty() {
                    out.base = Some(second.to_owned());
                }
            }
        }
        out
    }

    fn assign(&mut self, file: &str) {
        if file.is_empty() {
            return;
        }
        let slot = match TextureRole::classify(file) {
            TextureRole::Base => &mut self.base,
            TextureRole::Sphere => &mut self.sphere,
            TextureRole::Additive => &mut self.additive,
        };
        *slot = Some(file.to_owned());
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_none() && self.sphere.is_none() && self.additive.is_none()
    }
}

/// File name of the shared toon ramp for a stored toon index.
///
/// Stored indices are zero-based while the shipped ramps are numbered from 1,
/// so index 0 maps to `toon/toon01.bmp` and 255 (no toon) to `toon/toon256.bmp`,
/// which is simply never found on disk.
pub fn toon_file_name(stored_index: u8) -> String {
    format!("toon/toon{:02}.bmp", u32::from(stored_index) + 1)
}

/// Extension of a file name without the dot, case preserved.
pub fn extension(file: &str) -> Option<&str> {
    let name = file.rsplit(['/', '\\']).next().unwrap_or(file);
    name.rsplit_once('.').map(|(_, ext)| ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(base: Option<&str>, sphere: Option<&str>, additive: Option<&str>) -> TexturePaths {
        TexturePaths {
            base: base.map(str::to_owned),
            sphere: sphere.map(str::to_owned),
            additive: additive.map(str::to_owned),
        }
    }

    // ── texture field split ───────────────────────────────────────────────

    #[test]
    fn empty_field_has_no_textures() {
        assert!(TexturePaths::parse("").is_empty());
    }

    #[test]
    fn single_base_texture() {
        assert_eq!(TexturePaths::parse("face.bmp"), paths(Some("face.bmp"), None, None));
    }

    #[test]
    fn base_then_sphere() {
        assert_eq!(
            TexturePaths::parse("tex.bmp*glow.sph"),
            paths(Some("tex.bmp"), Some("glow.sph"), None)
        );
    }

    #[test]
    fn sphere_then_base() {
        assert_eq!(
            TexturePaths::parse("metal.sph*body.png"),
            paths(Some("body.png"), Some("metal.sph"), None)
        );
    }

    #[test]
    fn lone_additive_sphere_has_no_base() {
        assert_eq!(TexturePaths::parse("glow.spa"), paths(None, None, Some("glow.spa")));
    }

    #[test]
    fn base_then_additive() {
        assert_eq!(
            TexturePaths::parse("hair.png*shine.spa"),
            paths(Some("hair.png"), None, Some("shine.spa"))
        );
    }

    #[test]
    fn second_base_is_dropped() {
        assert_eq!(TexturePaths::parse("a.bmp*b.bmp"), paths(Some("a.bmp"), None, None));
    }

    #[test]
    fn extension_is_case_sensitive() {
        assert_eq!(TextureRole::classify("GLOW.SPH"), TextureRole::Base);
    }

    // ── toon ramps ────────────────────────────────────────────────────────

    #[test]
    fn toon_index_is_one_based_on_disk() {
        assert_eq!(toon_file_name(0), "toon/toon01.bmp");
        assert_eq!(toon_file_name(9), "toon/toon10.bmp");
    }

    #[test]
    fn extension_ignores_dots_in_folders() {
        assert_eq!(extension("v1.2/face"), None);
        assert_eq!(extension("v1.2\\face.png"), Some("png"));
    }
}

use crate::error::{ParseError, ParseErrorKind};
use crate::material::{TexturePaths, toon_file_name};
use crate::reader::{Reader, fixed_str, le_f32, le_f32x2, le_f32x3, le_u16, le_u32};

pub const SIGNATURE: &[u8; 3] = b"Pmd";
/// Bytes per packed vertex record.
pub const VERTEX_STRIDE: usize = 38;
/// Bytes per packed material record.
pub const MATERIAL_STRIDE: usize = 70;

const NAME_LEN: usize = 20;
const COMMENT_LEN: usize = 256;
const TEXTURE_FIELD_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: f32,
    pub name: String,
    pub comment: String,
}

/// One decoded vertex record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub bone_ids: [u16; 2],
    pub bone_weight: u8,
    pub edge_flag: u8,
}

impl Vertex {
    /// Decodes a packed 38-byte record. `rec` must be exactly [`VERTEX_STRIDE`] long.
    pub fn decode(rec: &[u8]) -> Self {
        debug_assert_eq!(rec.len(), VERTEX_STRIDE);
        Self {
            position: le_f32x3(rec, 0),
            normal: le_f32x3(rec, 12),
            uv: le_f32x2(rec, 24),
            bone_ids: [le_u16(rec, 32), le_u16(rec, 34)],
            bone_weight: rec[36],
            edge_flag: rec[37],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub diffuse: [f32; 3],
    pub alpha: f32,
    pub specularity: f32,
    pub specular: [f32; 3],
    pub ambient: [f32; 3],
    pub toon_index: u8,
    pub edge_flag: u8,
    /// Number of consecutive indices drawn with this material.
    pub index_count: u32,
    /// Raw texture field, possibly `base*sphere`.
    pub texture_field: String,
}

impl Material {
    fn decode(rec: &[u8]) -> Self {
        Self {
            diffuse: le_f32x3(rec, 0),
            alpha: le_f32(rec, 12),
            specularity: le_f32(rec, 16),
            specular: le_f32x3(rec, 20),
            ambient: le_f32x3(rec, 32),
            toon_index: rec[44],
            edge_flag: rec[45],
            index_count: le_u32(rec, 46),
            texture_field: fixed_str(&rec[50..50 + TEXTURE_FIELD_LEN]),
        }
    }

    pub fn textures(&self) -> TexturePaths {
        TexturePaths::parse(&self.texture_field)
    }

    pub fn toon_file_name(&self) -> String {
        toon_file_name(self.toon_index)
    }
}

/// A parsed PMD model.
///
/// Vertex records are kept in their packed on-disk layout so they can be
/// copied into a vertex buffer as-is; [`Model::vertices`] decodes on demand.
#[derive(Debug, Clone)]
pub struct Model {
    pub header: Header,
    vertex_data: Vec<u8>,
    vertex_count: u32,
    pub indices: Vec<u16>,
    pub materials: Vec<Material>,
}

impl Model {
    /// Parses a PMD byte stream.
    ///
    /// Sections after the material table (bones, IK, morphs) are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut r = Reader::new(bytes);

        let sig_at = r.position();
        let sig = r.take(SIGNATURE.len(), "signature")?;
        if sig != SIGNATURE {
            return Err(ParseError::new(
                ParseErrorKind::BadSignature([sig[0], sig[1], sig[2]]),
                sig_at,
            ));
        }
        let version = r.f32("header")?;
        let name = fixed_str(r.take(NAME_LEN, "header")?);
        let comment = fixed_str(r.take(COMMENT_LEN, "header")?);

        let vertex_count = r.u32("vertex count")?;
        let vertex_data = r.take_array(vertex_count, VERTEX_STRIDE, "vertices")?.to_vec();

        let index_count = r.u32("index count")?;
        let index_at = r.position();
        let raw_indices = r.take_array(index_count, 2, "indices")?;
        let mut indices = Vec::with_capacity(index_count as usize);
        for (i, pair) in raw_indices.chunks_exact(2).enumerate() {
            let index = u16::from_le_bytes([pair[0], pair[1]]);
            if u32::from(index) >= vertex_count {
                return Err(ParseError::new(
                    ParseErrorKind::IndexOutOfRange { index, vertex_count },
                    index_at + i * 2,
                ));
            }
            indices.push(index);
        }

        let material_count = r.u32("material count")?;
        let material_at = r.position();
        let raw_materials = r.take_array(material_count, MATERIAL_STRIDE, "materials")?;
        let materials: Vec<Material> = raw_materials
            .chunks_exact(MATERIAL_STRIDE)
            .map(Material::decode)
            .collect();

        let claimed: u64 = materials.iter().map(|m| u64::from(m.index_count)).sum();
        if claimed > u64::from(index_count) {
            return Err(ParseError::new(
                ParseErrorKind::MaterialOverrun { claimed, index_count },
                material_at,
            ));
        }

        Ok(Self {
            header: Header { version, name, comment },
            vertex_data,
            vertex_count,
            indices,
            materials,
        })
    }

    /// Packed vertex records, [`VERTEX_STRIDE`] bytes each.
    pub fn vertex_data(&self) -> &[u8] {
        &self.vertex_data
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn vertex(&self, index: u32) -> Option<Vertex> {
        let start = (index as usize).checked_mul(VERTEX_STRIDE)?;
        self.vertex_data
            .get(start..start + VERTEX_STRIDE)
            .map(Vertex::decode)
    }

    pub fn vertices(&self) -> impl Iterator<Item = Vertex> + '_ {
        self.vertex_data.chunks_exact(VERTEX_STRIDE).map(Vertex::decode)
    }

    /// Iterates `(material, first_index)` pairs in draw order.
    pub fn material_ranges(&self) -> impl Iterator<Item = (&Material, u32)> + '_ {
        self.materials.iter().scan(0u32, |offset, m| {
            let first = *offset;
            *offset += m.index_count;
            Some((m, first))
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ModelBytes;
    use super::*;

    // ── happy path ────────────────────────────────────────────────────────

    #[test]
    fn parses_triangle() {
        let model = Model::parse(&ModelBytes::triangle().to_bytes()).unwrap();
        assert_eq!(model.header.name, "test");
        assert_eq!(model.header.version, 1.0);
        assert_eq!(model.vertex_count(), 3);
        assert_eq!(model.vertex_data().len(), 3 * VERTEX_STRIDE);
        assert_eq!(model.indices, vec![0, 1, 2]);

        let v1 = model.vertex(1).unwrap();
        assert_eq!(v1.position, [1.0, 0.0, 0.0]);
        assert_eq!(v1.uv, [1.0, 0.0]);
        assert_eq!(v1.bone_ids, [0, 1]);
        assert_eq!(v1.bone_weight, 100);
        assert!(model.vertex(3).is_none());
    }

    #[test]
    fn material_record_fields() {
        let model = Model::parse(&ModelBytes::triangle().to_bytes()).unwrap();
        let m = &model.materials[0];
        assert_eq!(m.diffuse, [0.8, 0.7, 0.6]);
        assert_eq!(m.alpha, 1.0);
        assert_eq!(m.specularity, 5.0);
        assert_eq!(m.ambient, [0.3, 0.3, 0.3]);
        assert_eq!(m.index_count, 3);
        assert_eq!(m.texture_field, "skin.bmp*glow.sph");
        assert_eq!(m.textures().base.as_deref(), Some("skin.bmp"));
        assert_eq!(m.toon_file_name(), "toon/toon03.bmp");
    }

    #[test]
    fn trailing_sections_are_ignored() {
        let mut bytes = ModelBytes::triangle().to_bytes();
        bytes.extend_from_slice(&[0xAB; 64]);
        assert!(Model::parse(&bytes).is_ok());
    }

    #[test]
    fn material_ranges_accumulate() {
        let mut mb = ModelBytes::triangle();
        mb.indices = vec![0, 1, 2, 2, 1, 0];
        mb.materials = vec![(3, "", 0), (3, "b.png", 0)];
        let model = Model::parse(&mb.to_bytes()).unwrap();
        let firsts: Vec<u32> = model.material_ranges().map(|(_, first)| first).collect();
        assert_eq!(firsts, vec![0, 3]);
    }

    // ── rejection ─────────────────────────────────────────────────────────

    #[test]
    fn bad_signature() {
        let mut bytes = ModelBytes::triangle().to_bytes();
        bytes[0] = b'X';
        let err = Model::parse(&bytes).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::BadSignature(*b"Xmd"));
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn truncated_vertex_section() {
        let bytes = ModelBytes::triangle().to_bytes();
        // Header is 283 bytes, count is 4; cut inside the second vertex.
        let cut = 283 + 4 + VERTEX_STRIDE + 10;
        let err = Model::parse(&bytes[..cut]).unwrap_err();
        match err.kind {
            ParseErrorKind::Truncated { section, needed, available } => {
                assert_eq!(section, "vertices");
                assert_eq!(needed, 3 * VERTEX_STRIDE);
                assert_eq!(available, VERTEX_STRIDE + 10);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_materials() {
        let bytes = ModelBytes::triangle().to_bytes();
        let err = Model::parse(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(
            err.kind,
            ParseErrorKind::Truncated { section: "materials", .. }
        ));
    }

    #[test]
    fn empty_stream_is_truncated_signature() {
        let err = Model::parse(&[]).unwrap_err();
        assert!(matches!(
            err.kind,
            ParseErrorKind::Truncated { section: "signature", .. }
        ));
    }

    #[test]
    fn huge_vertex_count_does_not_allocate() {
        let mut bytes = ModelBytes::triangle().to_bytes();
        bytes[283..287].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = Model::parse(&bytes).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Truncated { .. }));
    }

    #[test]
    fn index_past_vertex_count() {
        let mut mb = ModelBytes::triangle();
        mb.indices = vec![0, 1, 7];
        let err = Model::parse(&mb.to_bytes()).unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::IndexOutOfRange { index: 7, vertex_count: 3 }
        );
    }

    #[test]
    fn materials_overrunning_indices() {
        let mut mb = ModelBytes::triangle();
        mb.materials = vec![(3, "", 0), (3, "", 0)];
        let err = Model::parse(&mb.to_bytes()).unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::MaterialOverrun { claimed: 6, index_count: 3 }
        );
    }

    #[test]
    fn error_display_names_section() {
        let err = Model::parse(b"Pmd").unwrap_err();
        assert!(err.to_string().contains("header"));
    }
}

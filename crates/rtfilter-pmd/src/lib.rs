//! Reader for PMD (Polygon Model Data) files.
//!
//! Parses the header, vertex, index and material sections of a PMD stream.
//! Bone, IK and morph sections are not read.
//!
//! ```ignore
//! let model = rtfilter_pmd::Model::parse(&std::fs::read("model.pmd")?)?;
//! for (material, first_index) in model.material_ranges() {
//!     println!("{} indices from {first_index}: {}", material.index_count, material.texture_field);
//! }
//! ```

mod error;
mod material;
mod model;
mod reader;

pub use error::{ParseError, ParseErrorKind};
pub use material::{TexturePaths, TextureRole, extension, toon_file_name};
pub use model::{Header, MATERIAL_STRIDE, Material, Model, SIGNATURE, VERTEX_STRIDE, Vertex};

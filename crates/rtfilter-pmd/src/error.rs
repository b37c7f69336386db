use std::fmt;

/// Why a PMD byte stream was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    /// The leading three bytes were not `Pmd`.
    BadSignature([u8; 3]),
    /// A section needed more bytes than the stream had left.
    Truncated {
        section: &'static str,
        needed: usize,
        available: usize,
    },
    /// An index referenced a vertex past the end of the vertex array.
    IndexOutOfRange { index: u16, vertex_count: u32 },
    /// The materials claim more indices than the index array holds.
    MaterialOverrun { claimed: u64, index_count: u32 },
}

/// A parse error from a PMD byte stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// Byte offset into the stream where the failing section starts.
    pub offset: usize,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ParseErrorKind::BadSignature(sig) => {
                write!(f, "pmd: bad signature {:?} at offset {}", sig, self.offset)
            }
            ParseErrorKind::Truncated { section, needed, available } => write!(
                f,
                "pmd: truncated {section} at offset {}: needed {needed} bytes, {available} left",
                self.offset
            ),
            ParseErrorKind::IndexOutOfRange { index, vertex_count } => write!(
                f,
                "pmd: index {index} out of range for {vertex_count} vertices (offset {})",
                self.offset
            ),
            ParseErrorKind::MaterialOverrun { claimed, index_count } => write!(
                f,
                "pmd: materials claim {claimed} indices but only {index_count} exist (offset {})",
                self.offset
            ),
        }
    }
}

impl std::error::Error for ParseError {}

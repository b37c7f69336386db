use crate::error::{ParseError, ParseErrorKind};

/// Little-endian cursor over a byte slice.
///
/// Every read names the section it belongs to so a short stream reports
/// where it ran out instead of yielding partial data.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn take(&mut self, len: usize, section: &'static str) -> Result<&'a [u8], ParseError> {
        let available = self.bytes.len() - self.pos;
        if len > available {
            return Err(ParseError::new(
                ParseErrorKind::Truncated { section, needed: len, available },
                self.pos,
            ));
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Takes `count * stride` bytes, treating an overflowing product as truncation.
    pub(crate) fn take_array(
        &mut self,
        count: u32,
        stride: usize,
        section: &'static str,
    ) -> Result<&'a [u8], ParseError> {
        let len = (count as usize).checked_mul(stride).ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::Truncated {
                    section,
                    needed: usize::MAX,
                    available: self.bytes.len() - self.pos,
                },
                self.pos,
            )
        })?;
        self.take(len, section)
    }

    pub(crate) fn u32(&mut self, section: &'static str) -> Result<u32, ParseError> {
        let b = self.take(4, section)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn f32(&mut self, section: &'static str) -> Result<f32, ParseError> {
        Ok(f32::from_bits(self.u32(section)?))
    }
}

// ── fixed-layout field helpers ────────────────────────────────────────────

pub(crate) fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

pub(crate) fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

pub(crate) fn le_f32(b: &[u8], at: usize) -> f32 {
    f32::from_bits(le_u32(b, at))
}

pub(crate) fn le_f32x2(b: &[u8], at: usize) -> [f32; 2] {
    [le_f32(b, at), le_f32(b, at + 4)]
}

pub(crate) fn le_f32x3(b: &[u8], at: usize) -> [f32; 3] {
    [le_f32(b, at), le_f32(b, at + 4), le_f32(b, at + 8)]
}

/// Decodes a NUL-padded fixed-width text field.
///
/// Model files store Shift-JIS text; non-UTF-8 bytes are replaced rather than
/// rejected since names are informational and texture paths are ASCII in
/// practice.
pub(crate) fn fixed_str(b: &[u8]) -> String {
    let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
    String::from_utf8_lossy(&b[..end]).into_owned()
}

//! Alignment file headers.
//!
//! ```text
//! BAM header (inside the first BGZF blocks):
//! - 4 bytes: magic "BAM\1"
//! - int32 l_text, then l_text bytes of SAM header text (may be NUL padded)
//! - int32 n_ref
//! - per reference: int32 l_name, name with NUL, int32 l_ref
//! ```
//!
//! CRAM files carry only the SAM text; their reference table comes from
//! the `@SQ` lines via [`Header::from_sam_text`].

use super::error::DecodeError;
use std::io::Read;

/// BAM magic bytes.
pub const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// One reference sequence from the header dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Name as written in the file, e.g. `chr1` or `1`
    pub name: String,
    /// Length in bases
    pub length: u32,
}

impl Reference {
    /// Create a new reference.
    pub fn new(name: impl Into<String>, length: u32) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

/// Header text plus reference dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// SAM header text (`@HD`, `@SQ`, `@RG`, `@PG` lines)
    pub text: String,
    /// References in declaration order
    pub references: Vec<Reference>,
}

impl Header {
    /// Create a new header.
    pub fn new(text: String, references: Vec<Reference>) -> Self {
        Self { text, references }
    }

    /// Build the reference table from `@SQ` lines (`SN` and `LN` fields).
    ///
    /// Lines missing either field are skipped; an unparsable `LN` counts
    /// as length 0.
    pub fn from_sam_text(text: String) -> Self {
        let references = text
            .lines()
            .filter(|line| line.starts_with("@SQ"))
            .filter_map(|line| {
                let mut name = None;
                let mut length = None;
                for field in line.split('\t').skip(1) {
                    if let Some(v) = field.strip_prefix("SN:") {
                        name = Some(v);
                    } else if let Some(v) = field.strip_prefix("LN:") {
                        length = Some(v.parse().unwrap_or(0));
                    }
                }
                Some(Reference::new(name?, length?))
            })
            .collect();
        Self { text, references }
    }

    /// Reference by index.
    pub fn reference(&self, id: usize) -> Option<&Reference> {
        self.references.get(id)
    }

    /// Reference name by index. Negative ids have no name.
    pub fn reference_name(&self, id: i32) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|id| self.reference(id))
            .map(|r| r.name.as_str())
    }

    /// Index of the reference called exactly `name`.
    pub fn reference_id(&self, name: &str) -> Option<usize> {
        self.references.iter().position(|r| r.name == name)
    }

    /// Number of references.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32, DecodeError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_len<R: Read>(reader: &mut R, what: &str) -> Result<usize, DecodeError> {
    let value = read_i32(reader)?;
    usize::try_from(value).map_err(|_| DecodeError::invalid(format!("negative {}: {}", what, value)))
}

/// Read `len` bytes. Memory grows with what the stream delivers, not
/// with the declared length.
pub(crate) fn read_declared<R: Read>(reader: &mut R, len: usize, what: &'static str) -> Result<Vec<u8>, DecodeError> {
    let mut bytes = Vec::with_capacity(len.min(64 * 1024));
    reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(DecodeError::eof(what, len, bytes.len()));
    }
    Ok(bytes)
}

/// Check the four magic bytes.
pub fn read_magic<R: Read>(reader: &mut R) -> Result<(), DecodeError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != BAM_MAGIC {
        return Err(DecodeError::InvalidMagic {
            expected: BAM_MAGIC,
            actual: magic.to_vec(),
        });
    }
    Ok(())
}

/// Read the length-prefixed SAM text, dropping NUL padding.
pub fn read_header_text<R: Read>(reader: &mut R) -> Result<String, DecodeError> {
    let len = read_len(reader, "SAM header length")?;
    let mut bytes = read_declared(reader, len, "SAM header text")?;
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    String::from_utf8(bytes)
        .map_err(|e| DecodeError::invalid(format!("SAM header is not UTF-8: {}", e)))
}

/// Read one dictionary entry.
pub fn read_reference<R: Read>(reader: &mut R) -> Result<Reference, DecodeError> {
    let name_len = read_len(reader, "reference name length")?;
    if name_len == 0 {
        return Err(DecodeError::invalid("reference name length is zero"));
    }
    let mut name = read_declared(reader, name_len, "reference name")?;
    if name.pop() != Some(0) {
        return Err(DecodeError::invalid("reference name is not NUL-terminated"));
    }
    let name = String::from_utf8(name)
        .map_err(|e| DecodeError::invalid(format!("reference name is not UTF-8: {}", e)))?;
    let length = read_len(reader, "reference length")?;
    Ok(Reference::new(name, length as u32))
}

/// Read a complete BAM header, magic included.
pub fn read_header<R: Read>(reader: &mut R) -> Result<Header, DecodeError> {
    read_magic(reader)?;
    let text = read_header_text(reader)?;
    let n_ref = read_len(reader, "reference count")?;
    let references = (0..n_ref)
        .map(|_| read_reference(reader))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Header::new(text, references))
}

#[cfg(test)]
pub(crate) fn encode_header(text: &str, references: &[(&str, u32)]) -> Vec<u8> {
    let mut out = BAM_MAGIC.to_vec();
    out.extend_from_slice(&(text.len() as i32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(&(references.len() as i32).to_le_bytes());
    for (name, len) in references {
        out.extend_from_slice(&(name.len() as i32 + 1).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(&len.to_le_bytes());
    }
    out
}

//! CIGAR unit decoding.
//!
//! BAM stores each CIGAR operation as one little-endian `u32`:
//! - Low 4 bits: operation code, an index into `MIDNSHP=X`
//! - High 28 bits: run length
//!
//! Codes 9..=15 are not part of the format. Decoding one is a
//! [`DecodeError::InvalidCigarOp`]; the codec never guesses.

use super::error::DecodeError;
use std::fmt;

/// Operation alphabet, indexed by the low nibble of a packed unit.
pub const CIGAR_ALPHABET: &[u8; 9] = b"MIDNSHP=X";

/// CIGAR operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarKind {
    /// Alignment match or mismatch (M)
    Match,
    /// Insertion to the reference (I)
    Insertion,
    /// Deletion from the reference (D)
    Deletion,
    /// Skipped reference region (N)
    Skip,
    /// Soft clip (S)
    SoftClip,
    /// Hard clip (H)
    HardClip,
    /// Padding (P)
    Padding,
    /// Sequence match (=)
    SeqMatch,
    /// Sequence mismatch (X)
    SeqMismatch,
}

impl CigarKind {
    const ALL: [CigarKind; 9] = [
        CigarKind::Match,
        CigarKind::Insertion,
        CigarKind::Deletion,
        CigarKind::Skip,
        CigarKind::SoftClip,
        CigarKind::HardClip,
        CigarKind::Padding,
        CigarKind::SeqMatch,
        CigarKind::SeqMismatch,
    ];

    /// Map a low-nibble operation code to its kind.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Operation code as stored in BAM (0..=8).
    pub fn code(self) -> u32 {
        self as u32
    }

    /// SAM character for this operation.
    pub fn as_char(self) -> char {
        CIGAR_ALPHABET[self as usize] as char
    }

    /// M, D, N, = and X advance along the reference.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarKind::Match
                | CigarKind::Deletion
                | CigarKind::Skip
                | CigarKind::SeqMatch
                | CigarKind::SeqMismatch
        )
    }

    /// M, I, S, = and X advance along the stored query.
    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            CigarKind::Match
                | CigarKind::Insertion
                | CigarKind::SoftClip
                | CigarKind::SeqMatch
                | CigarKind::SeqMismatch
        )
    }
}

/// One decoded CIGAR run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarUnit {
    /// Run length
    pub len: u32,
    /// Operation
    pub kind: CigarKind,
}

impl CigarUnit {
    /// Build a unit from its parts.
    pub fn new(len: u32, kind: CigarKind) -> Self {
        Self { len, kind }
    }

    /// Pack back into the on-disk `u32` form.
    pub fn encode(self) -> u32 {
        (self.len << 4) | self.kind.code()
    }
}

impl fmt::Display for CigarUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len, self.kind.as_char())
    }
}

/// Decode one packed CIGAR unit.
///
/// # Errors
///
/// [`DecodeError::InvalidCigarOp`] when the low nibble is 9 or above.
///
/// # Example
///
/// ```
/// use bamfetch::io::bam::cigar::{decode_unit, CigarKind};
///
/// // 100M = 100 << 4 | 0
/// let unit = decode_unit(1600).unwrap();
/// assert_eq!(unit.len, 100);
/// assert_eq!(unit.kind, CigarKind::Match);
/// assert!(decode_unit((3 << 4) | 9).is_err());
/// ```
pub fn decode_unit(unit: u32) -> Result<CigarUnit, DecodeError> {
    let code = unit & 0x0F;
    let kind = CigarKind::from_code(code).ok_or(DecodeError::InvalidCigarOp { code, unit })?;
    Ok(CigarUnit::new(unit >> 4, kind))
}

/// Iterator over the packed CIGAR array of a record.
///
/// Yields one decoded unit per 4 bytes and stops after the first error.
#[derive(Debug, Clone)]
pub struct CigarUnits<'a> {
    data: &'a [u8],
    failed: bool,
}

impl<'a> CigarUnits<'a> {
    /// Wrap a packed CIGAR array. Length must be a multiple of 4.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            failed: false,
        }
    }

    /// Number of units left, counting any undecodable one.
    pub fn remaining(&self) -> usize {
        self.data.len() / 4
    }
}

impl Iterator for CigarUnits<'_> {
    type Item = Result<CigarUnit, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.data.len() < 4 {
            return None;
        }
        let (head, rest) = self.data.split_at(4);
        self.data = rest;
        let raw = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let decoded = decode_unit(raw);
        self.failed = decoded.is_err();
        Some(decoded)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

/// Decode a whole packed CIGAR array.
pub fn decode_all(data: &[u8]) -> Result<Vec<CigarUnit>, DecodeError> {
    CigarUnits::new(data).collect()
}

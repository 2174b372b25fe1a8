//! Alignment record views.
//!
//! A BAM record is one length-prefixed block:
//!
//! ```text
//! block_size  int32    bytes that follow (not included in the view)
//! refID       int32    reference index, -1 for none
//! pos         int32    0-based leftmost position
//! l_read_name uint8    read name length including NUL
//! mapq        uint8
//! bin         uint16   BAI bin
//! n_cigar_op  uint16
//! flag        uint16
//! l_seq       int32
//! next_refID  int32
//! next_pos    int32
//! tlen        int32
//! read_name   char[l_read_name]
//! cigar       uint32[n_cigar_op]
//! seq         uint8[(l_seq+1)/2]   4-bit packed
//! qual        uint8[l_seq]         0xFF in the first byte = absent
//! aux         remaining bytes      typed tag stream
//! ```
//!
//! [`RecordView`] borrows the block from the reader's buffer and is only
//! valid inside one consumer call. [`RecordView::to_record`] copies the
//! block into an owned [`AlignmentRecord`] for callers that keep records.

use super::cigar::{CigarKind, CigarUnit, CigarUnits};
use super::error::DecodeError;
use super::sequence::{decode_sequence, reverse_complement};
use super::tags::{self, AuxCursor, AuxField, AuxValue};
use std::fmt;

/// Size of the fixed-width prefix of a record block.
pub const FIXED_LEN: usize = 32;

/// Quality byte marking "no qualities stored".
pub const QUAL_ABSENT: u8 = 0xFF;

/// SAM flag bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(pub u16);

impl Flags {
    /// Template has multiple segments
    pub const PAIRED: u16 = 0x1;
    /// Each segment properly aligned
    pub const PROPER_PAIR: u16 = 0x2;
    /// Segment unmapped
    pub const UNMAPPED: u16 = 0x4;
    /// Next segment unmapped
    pub const MATE_UNMAPPED: u16 = 0x8;
    /// Sequence is reverse complemented
    pub const REVERSE: u16 = 0x10;
    /// Next segment reverse complemented
    pub const MATE_REVERSE: u16 = 0x20;
    /// First segment in template
    pub const READ1: u16 = 0x40;
    /// Last segment in template
    pub const READ2: u16 = 0x80;
    /// Secondary alignment
    pub const SECONDARY: u16 = 0x100;
    /// Failed QC
    pub const QC_FAIL: u16 = 0x200;
    /// PCR or optical duplicate
    pub const DUPLICATE: u16 = 0x400;
    /// Supplementary alignment
    pub const SUPPLEMENTARY: u16 = 0x800;

    /// Raw bits.
    pub fn bits(self) -> u16 {
        self.0
    }

    /// True if every bit of `mask` is set.
    pub fn contains(self, mask: u16) -> bool {
        self.0 & mask == mask
    }

    /// Reverse-strand bit.
    pub fn is_reverse(self) -> bool {
        self.contains(Self::REVERSE)
    }

    /// Paired bit.
    pub fn is_paired(self) -> bool {
        self.contains(Self::PAIRED)
    }

    /// Unmapped bit.
    pub fn is_unmapped(self) -> bool {
        self.contains(Self::UNMAPPED)
    }

    /// Secondary bit.
    pub fn is_secondary(self) -> bool {
        self.contains(Self::SECONDARY)
    }

    /// Duplicate bit.
    pub fn is_duplicate(self) -> bool {
        self.contains(Self::DUPLICATE)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:#06x})", self.0)
    }
}

/// Clip lengths at both CIGAR edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftClipping {
    /// Soft clip at the start of the alignment
    pub low: usize,
    /// Soft clip at the end of the alignment
    pub high: usize,
    /// Query length minus both clips
    pub clipped_len: usize,
}

/// Byte offsets of the variable-length sections inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    name_end: usize,
    cigar_start: usize,
    cigar_end: usize,
    seq_start: usize,
    qual_start: usize,
    aux_start: usize,
    l_seq: usize,
}

fn le_i32(b: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn check_reference_id(value: i32, field: &'static str) -> Result<(), DecodeError> {
    if value < -1 {
        return Err(DecodeError::InvalidReferenceId { value, field });
    }
    Ok(())
}

impl Layout {
    fn parse(block: &[u8]) -> Result<Self, DecodeError> {
        if block.len() < FIXED_LEN {
            return Err(DecodeError::eof("record fixed fields", FIXED_LEN, block.len()));
        }
        check_reference_id(le_i32(block, 0), "read")?;
        check_reference_id(le_i32(block, 20), "mate")?;

        let l_read_name = block[8] as usize;
        if l_read_name == 0 {
            return Err(DecodeError::invalid("read name length is zero"));
        }
        let n_cigar = le_u16(block, 12) as usize;
        let l_seq = le_i32(block, 16);
        let l_seq = usize::try_from(l_seq)
            .map_err(|_| DecodeError::invalid(format!("negative sequence length {}", l_seq)))?;

        let name_end = FIXED_LEN + l_read_name;
        let cigar_end = name_end + n_cigar * 4;
        let qual_start = l_seq
            .checked_add(1)
            .map(|n| cigar_end + n / 2)
            .ok_or_else(|| DecodeError::invalid("sequence length overflows"))?;
        let aux_start = qual_start
            .checked_add(l_seq)
            .ok_or_else(|| DecodeError::invalid("sequence length overflows"))?;

        if aux_start > block.len() {
            return Err(DecodeError::eof("record variable fields", aux_start, block.len()));
        }
        if block[name_end - 1] != 0 {
            return Err(DecodeError::invalid("read name is not NUL-terminated"));
        }

        let mut layout = Layout {
            name_end,
            cigar_start: name_end,
            cigar_end,
            seq_start: cigar_end,
            qual_start,
            aux_start,
            l_seq,
        };
        layout.redirect_long_cigar(block)?;
        Ok(layout)
    }

    /// Records with more than 65535 CIGAR units store a `<l_seq>S<ref_len>N`
    /// placeholder and keep the real units in a `CG:B:I` tag.
    fn redirect_long_cigar(&mut self, block: &[u8]) -> Result<(), DecodeError> {
        if self.cigar_end - self.cigar_start != 8 {
            return Ok(());
        }
        let mut units = CigarUnits::new(&block[self.cigar_start..self.cigar_end]);
        let first = units.next().transpose()?;
        let second = units.next().transpose()?;
        let placeholder = matches!(
            (first, second),
            (Some(CigarUnit { len, kind: CigarKind::SoftClip }), Some(CigarUnit { kind: CigarKind::Skip, .. }))
                if len as usize == self.l_seq
        );
        if !placeholder {
            return Ok(());
        }

        let mut cursor = AuxCursor::new(&block[self.aux_start..]);
        if let Some(field) = cursor.find_tag(*b"CG")? {
            if let AuxValue::Array(array) = field.value {
                if matches!(array.subtype(), b'I' | b'i') {
                    // the array payload ends where the cursor stopped
                    let end = self.aux_start + cursor.position();
                    self.cigar_start = end - array.len() * 4;
                    self.cigar_end = end;
                }
            }
        }
        Ok(())
    }
}

/// Read-only view over one record block.
#[derive(Clone, Copy)]
pub struct RecordView<'a> {
    block: &'a [u8],
    layout: Layout,
}

impl<'a> RecordView<'a> {
    /// Validate section boundaries of a record block (the bytes after
    /// `block_size`) and wrap it.
    ///
    /// # Errors
    ///
    /// [`DecodeError`] if the block is shorter than its own length fields
    /// claim, a reference id is below -1, or the read name is malformed.
    pub fn parse(block: &'a [u8]) -> Result<Self, DecodeError> {
        let layout = Layout::parse(block)?;
        Ok(Self { block, layout })
    }

    /// The whole record block.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.block
    }

    /// Reference index, -1 when none.
    pub fn reference_id(&self) -> i32 {
        le_i32(self.block, 0)
    }

    /// 0-based leftmost position, -1 when none.
    pub fn position(&self) -> i32 {
        le_i32(self.block, 4)
    }

    /// Mapping quality (255 = unavailable).
    pub fn mapq(&self) -> u8 {
        self.block[9]
    }

    /// BAI bin stored with the record.
    pub fn bin(&self) -> u16 {
        le_u16(self.block, 10)
    }

    /// Flag bits.
    pub fn flags(&self) -> Flags {
        Flags(le_u16(self.block, 14))
    }

    /// Number of stored query bases.
    pub fn query_len(&self) -> usize {
        self.layout.l_seq
    }

    /// Mate reference index.
    pub fn mate_reference_id(&self) -> i32 {
        le_i32(self.block, 20)
    }

    /// Mate position.
    pub fn mate_position(&self) -> i32 {
        le_i32(self.block, 24)
    }

    /// Observed template length.
    pub fn template_length(&self) -> i32 {
        le_i32(self.block, 28)
    }

    /// Read name without its NUL terminator.
    pub fn read_name(&self) -> &'a [u8] {
        &self.block[FIXED_LEN..self.layout.name_end - 1]
    }

    /// Read name as text, replacing invalid UTF-8.
    pub fn read_name_lossy(&self) -> String {
        String::from_utf8_lossy(self.read_name()).into_owned()
    }

    /// Packed CIGAR units, lazily decoded.
    pub fn cigar(&self) -> CigarUnits<'a> {
        CigarUnits::new(&self.block[self.layout.cigar_start..self.layout.cigar_end])
    }

    /// Number of CIGAR units.
    pub fn cigar_len(&self) -> usize {
        (self.layout.cigar_end - self.layout.cigar_start) / 4
    }

    /// Raw 4-bit sequence bytes.
    pub fn packed_sequence(&self) -> &'a [u8] {
        &self.block[self.layout.seq_start..self.layout.qual_start]
    }

    /// Raw quality bytes (Phred, not offset by 33).
    pub fn raw_qualities(&self) -> &'a [u8] {
        &self.block[self.layout.qual_start..self.layout.aux_start]
    }

    /// Raw auxiliary tag stream.
    pub fn aux_data(&self) -> &'a [u8] {
        &self.block[self.layout.aux_start..]
    }

    /// Cursor over the auxiliary tags.
    pub fn aux(&self) -> AuxCursor<'a> {
        AuxCursor::new(self.aux_data())
    }

    /// True when the read is on the reverse strand.
    pub fn is_reverse_strand(&self) -> bool {
        self.flags().is_reverse()
    }

    /// Soft clip lengths at the two alignment edges.
    ///
    /// A single-unit CIGAR is checked as both first and last unit. A record
    /// without CIGAR units has no clipping.
    pub fn soft_clipping(&self) -> Result<SoftClipping, DecodeError> {
        let mut units = self.cigar();
        let first = units.next().transpose()?;
        let last = match units.last().transpose()? {
            Some(unit) => Some(unit),
            None => first,
        };

        let clip = |unit: Option<CigarUnit>| match unit {
            Some(CigarUnit {
                len,
                kind: CigarKind::SoftClip,
            }) => len as usize,
            _ => 0,
        };
        let low = clip(first);
        let high = clip(last);

        Ok(SoftClipping {
            low,
            high,
            clipped_len: self.query_len().saturating_sub(low + high),
        })
    }

    /// Query bases as ASCII.
    ///
    /// With `use_strand`, reverse-strand reads are reverse-complemented back
    /// to the orientation the read was sequenced in.
    pub fn query_sequence(&self, use_strand: bool) -> Result<Vec<u8>, DecodeError> {
        let mut bases = decode_sequence(self.packed_sequence(), self.query_len())?;
        if use_strand && self.is_reverse_strand() {
            reverse_complement(&mut bases);
        }
        Ok(bases)
    }

    /// Query base qualities, one byte per base.
    ///
    /// Absent qualities come back as an all-`0xFF` array whatever the
    /// strand. With `use_strand`, reverse-strand qualities are read
    /// back-to-front.
    pub fn query_qualities(&self, use_strand: bool) -> Vec<u8> {
        let raw = self.raw_qualities();
        if raw.first() == Some(&QUAL_ABSENT) {
            return vec![QUAL_ABSENT; raw.len()];
        }
        if use_strand && self.is_reverse_strand() {
            raw.iter().rev().copied().collect()
        } else {
            raw.to_vec()
        }
    }

    /// CIGAR in SAM text form, e.g. `5S10M5S`. Empty for no units.
    pub fn cigar_string(&self) -> Result<String, DecodeError> {
        let mut out = String::with_capacity(self.cigar_len() * 4);
        for unit in self.cigar() {
            out.push_str(&unit?.to_string());
        }
        Ok(out)
    }

    /// Reference bases covered: the sum of M, D, N, = and X runs.
    pub fn target_length(&self) -> Result<u64, DecodeError> {
        let mut total = 0u64;
        for unit in self.cigar() {
            let unit = unit?;
            if unit.kind.consumes_reference() {
                total += u64::from(unit.len);
            }
        }
        Ok(total)
    }

    /// Exclusive end on the reference (`pos + target_length`).
    pub fn alignment_end(&self) -> Result<i64, DecodeError> {
        Ok(i64::from(self.position()) + self.target_length()? as i64)
    }

    /// First tag named `key`. The key must be alpha followed by alnum.
    pub fn find_tag(&self, key: &str) -> Result<Option<AuxField<'a>>, DecodeError> {
        let key = tags::validate_key(key)?;
        self.aux().find_tag(key)
    }

    /// Value of tag `key` as text, cut to fit a `capacity`-byte buffer
    /// including its terminator.
    pub fn tag_string(&self, key: &str, capacity: usize) -> Result<Option<String>, DecodeError> {
        tags::tag_string(self.aux_data(), key, capacity)
    }

    /// All tags as tab-separated `KEY:TYPE:VALUE`.
    pub fn aux_text(&self) -> Result<String, DecodeError> {
        tags::aux_text(self.aux_data())
    }

    /// Deep copy with an independent lifetime.
    pub fn to_record(&self) -> AlignmentRecord {
        AlignmentRecord {
            block: self.block.to_vec(),
            layout: self.layout,
        }
    }
}

impl fmt::Debug for RecordView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordView")
            .field("name", &self.read_name_lossy())
            .field("reference_id", &self.reference_id())
            .field("position", &self.position())
            .field("flags", &self.flags())
            .field("query_len", &self.query_len())
            .finish()
    }
}

/// Owned alignment record.
#[derive(Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    block: Vec<u8>,
    layout: Layout,
}

impl AlignmentRecord {
    /// Take ownership of a record block (the bytes after `block_size`).
    pub fn from_block(block: Vec<u8>) -> Result<Self, DecodeError> {
        let layout = Layout::parse(&block)?;
        Ok(Self { block, layout })
    }

    /// Borrow as a view.
    pub fn view(&self) -> RecordView<'_> {
        RecordView {
            block: &self.block,
            layout: self.layout,
        }
    }

    /// Give back the record block.
    pub fn into_block(self) -> Vec<u8> {
        self.block
    }
}

impl fmt::Debug for AlignmentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.view(), f)
    }
}

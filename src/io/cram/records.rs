//! CRAM record decoding.
//!
//! [`decode_slice`] walks the data series of one slice in record order
//! and returns [`CramRecord`]s: flags, position, mate, tags and the read
//! features that describe the read against the reference. Nothing here
//! touches reference bases; [`CramRecord::to_bam`] does that once a
//! record is known to overlap the query, producing a BAM record block
//! so both container formats reach the consumer as a
//! [`RecordView`](crate::io::bam::RecordView).

use super::codec::{CompressionHeader, DataSeries, SliceBlocks, SubstitutionMatrix};
use super::container::SliceHeader;
use crate::error::{FetchError, Result};
use crate::io::bam::cigar::{CigarKind, CigarUnit};
use crate::io::bam::error::DecodeError;
use crate::io::bam::index::reg2bin;
use crate::io::bam::sequence::SEQ_LOOKUP;

/// CRAM record flags (`CF`).
pub mod cram_flags {
    /// Quality scores stored as one array
    pub const QUALITY_ARRAY: i32 = 0x1;
    /// Mate stored explicitly (`MF NS NP TS`)
    pub const DETACHED: i32 = 0x2;
    /// Mate is a later record in the slice (`NF`)
    pub const MATE_DOWNSTREAM: i32 = 0x4;
    /// Sequence is `*`
    pub const UNKNOWN_BASES: i32 = 0x8;
}

const FLAG_PAIRED: u16 = 0x1;
const FLAG_UNMAPPED: u16 = 0x4;
const FLAG_MATE_UNMAPPED: u16 = 0x8;
const FLAG_REVERSE: u16 = 0x10;
const FLAG_MATE_REVERSE: u16 = 0x20;

const MATE_REVERSE: i32 = 0x1;
const MATE_UNMAPPED: i32 = 0x2;

/// Difference between a read and the reference, at a 1-based read
/// position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feature {
    /// `B`: base and quality score
    ReadBase {
        /// Read position
        pos: usize,
        /// Base
        base: u8,
        /// Quality score
        quality: u8,
    },
    /// `X`: substitution, coded through the substitution matrix
    Substitution {
        /// Read position
        pos: usize,
        /// 2-bit substitution code
        code: u8,
    },
    /// `I`: inserted bases
    Insertion {
        /// Read position
        pos: usize,
        /// Bases
        bases: Vec<u8>,
    },
    /// `i`: one inserted base
    InsertBase {
        /// Read position
        pos: usize,
        /// Base
        base: u8,
    },
    /// `S`: soft clipped bases
    SoftClip {
        /// Read position
        pos: usize,
        /// Bases
        bases: Vec<u8>,
    },
    /// `H`: hard clip
    HardClip {
        /// Read position
        pos: usize,
        /// Clipped length
        len: u32,
    },
    /// `P`: padding
    Padding {
        /// Read position
        pos: usize,
        /// Padding length
        len: u32,
    },
    /// `D`: deletion
    Deletion {
        /// Read position
        pos: usize,
        /// Deleted length
        len: u32,
    },
    /// `N`: reference skip
    RefSkip {
        /// Read position
        pos: usize,
        /// Skipped length
        len: u32,
    },
    /// `b`: stretch of bases aligned to the reference
    Bases {
        /// Read position
        pos: usize,
        /// Bases
        bases: Vec<u8>,
    },
    /// `q`: stretch of quality scores
    Scores {
        /// Read position
        pos: usize,
        /// Quality scores
        qualities: Vec<u8>,
    },
    /// `Q`: one quality score
    Score {
        /// Read position
        pos: usize,
        /// Quality score
        quality: u8,
    },
}

impl Feature {
    /// 1-based read position.
    pub fn position(&self) -> usize {
        match self {
            Feature::ReadBase { pos, .. }
            | Feature::Substitution { pos, .. }
            | Feature::Insertion { pos, .. }
            | Feature::InsertBase { pos, .. }
            | Feature::SoftClip { pos, .. }
            | Feature::HardClip { pos, .. }
            | Feature::Padding { pos, .. }
            | Feature::Deletion { pos, .. }
            | Feature::RefSkip { pos, .. }
            | Feature::Bases { pos, .. }
            | Feature::Scores { pos, .. }
            | Feature::Score { pos, .. } => *pos,
        }
    }

    /// Read bases and reference bases this feature consumes.
    fn consumes(&self) -> (usize, u64) {
        match self {
            Feature::ReadBase { .. } | Feature::Substitution { .. } => (1, 1),
            Feature::Bases { bases, .. } => (bases.len(), bases.len() as u64),
            Feature::Insertion { bases, .. } | Feature::SoftClip { bases, .. } => (bases.len(), 0),
            Feature::InsertBase { .. } => (1, 0),
            Feature::Deletion { len, .. } | Feature::RefSkip { len, .. } => (0, u64::from(*len)),
            Feature::HardClip { .. } | Feature::Padding { .. } | Feature::Scores { .. } | Feature::Score { .. } => (0, 0),
        }
    }
}

/// Reference bases available while rebuilding reads.
#[derive(Debug, Clone, Copy)]
pub enum ReferenceBases<'a> {
    /// `bases[0]` sits at 0-based reference position `offset`
    Bases {
        /// Position of the first base
        offset: u64,
        /// Uppercase bases
        bases: &'a [u8],
    },
    /// The container does not need the reference; gaps read as `N`
    NotRequired,
    /// Needed but not identified by any checksum
    Unknown,
}

impl ReferenceBases<'_> {
    fn base(&self, pos: u64) -> Result<u8> {
        match self {
            ReferenceBases::Bases { offset, bases } => Ok(pos
                .checked_sub(*offset)
                .and_then(|i| bases.get(usize::try_from(i).ok()?))
                .copied()
                .unwrap_or(b'N')),
            ReferenceBases::NotRequired => Ok(b'N'),
            ReferenceBases::Unknown => Err(FetchError::Unsupported(
                "CRAM slice needs reference bases but records no reference checksum".to_string(),
            )),
        }
    }
}

/// One decoded CRAM record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CramRecord {
    /// BAM flags
    pub bam_flags: u16,
    /// See [`cram_flags`]
    pub cram_flags: i32,
    /// Reference id, -1 if unplaced
    pub reference_id: i32,
    /// Read length
    pub read_length: usize,
    /// 1-based alignment start, 0 if unplaced
    pub alignment_start: i32,
    /// Read group index into the header's `@RG` lines, -1 for none
    pub read_group: i32,
    /// Read name
    pub name: Vec<u8>,
    /// Mate reference id
    pub mate_reference_id: i32,
    /// Mate 1-based alignment start, 0 if none
    pub mate_start: i32,
    /// Template length
    pub template_length: i32,
    /// Records to skip to reach the mate, for attached mates
    pub next_fragment: Option<usize>,
    /// Tags in BAM binary form
    pub aux: Vec<u8>,
    /// Read features, by position
    pub features: Vec<Feature>,
    /// Mapping quality
    pub mapq: u8,
    /// Bases of an unmapped read
    pub bases: Vec<u8>,
    /// Quality scores, empty if not stored as an array
    pub qualities: Vec<u8>,
}

impl CramRecord {
    /// True if BAM flag 0x4 is set.
    pub fn is_unmapped(&self) -> bool {
        self.bam_flags & FLAG_UNMAPPED != 0
    }

    /// Reference bases covered, from the read features alone.
    pub fn reference_span(&self) -> u64 {
        if self.is_unmapped() {
            return 0;
        }
        let mut read_pos = 1usize;
        let mut span = 0u64;
        for feature in &self.features {
            let pos = feature.position();
            if pos > read_pos {
                span += (pos - read_pos) as u64;
                read_pos = pos;
            }
            let (read, reference) = feature.consumes();
            read_pos += read;
            span += reference;
        }
        if self.read_length + 1 > read_pos {
            span += (self.read_length + 1 - read_pos) as u64;
        }
        span
    }

    /// 1-based inclusive end on the reference.
    pub fn alignment_end(&self) -> i64 {
        i64::from(self.alignment_start) + self.reference_span().max(1) as i64 - 1
    }

    /// Sequence, qualities and CIGAR rebuilt against `reference`.
    fn rebuild(
        &self,
        reference: &ReferenceBases<'_>,
        matrix: &SubstitutionMatrix,
    ) -> Result<(Vec<u8>, Vec<u8>, Vec<CigarUnit>)> {
        let mut qual = if self.qualities.is_empty() {
            vec![0xFF; self.read_length]
        } else {
            self.qualities.clone()
        };
        if self.is_unmapped() {
            return Ok((self.bases.clone(), qual, Vec::new()));
        }

        let mut seq = Vec::with_capacity(self.read_length);
        let mut cigar: Vec<CigarUnit> = Vec::new();
        let mut push = |kind: CigarKind, len: usize| {
            if len == 0 {
                return;
            }
            match cigar.last_mut() {
                Some(last) if last.kind == kind => last.len += len as u32,
                _ => cigar.push(CigarUnit::new(len as u32, kind)),
            }
        };
        let mut ref_pos = u64::try_from(self.alignment_start - 1).unwrap_or(0);
        let mut read_pos = 1usize;

        for feature in &self.features {
            let pos = feature.position();
            if pos > read_pos {
                let n = pos - read_pos;
                for i in 0..n as u64 {
                    seq.push(reference.base(ref_pos + i)?);
                }
                push(CigarKind::Match, n);
                ref_pos += n as u64;
                read_pos = pos;
            }
            match feature {
                Feature::ReadBase { base, quality, .. } => {
                    seq.push(*base);
                    if let Some(q) = qual.get_mut(read_pos - 1) {
                        *q = *quality;
                    }
                    push(CigarKind::Match, 1);
                }
                Feature::Substitution { code, .. } => {
                    seq.push(matrix.base(reference.base(ref_pos)?, *code));
                    push(CigarKind::Match, 1);
                }
                Feature::Insertion { bases, .. } => {
                    seq.extend_from_slice(bases);
                    push(CigarKind::Insertion, bases.len());
                }
                Feature::InsertBase { base, .. } => {
                    seq.push(*base);
                    push(CigarKind::Insertion, 1);
                }
                Feature::SoftClip { bases, .. } => {
                    seq.extend_from_slice(bases);
                    push(CigarKind::SoftClip, bases.len());
                }
                Feature::Bases { bases, .. } => {
                    seq.extend_from_slice(bases);
                    push(CigarKind::Match, bases.len());
                }
                Feature::HardClip { len, .. } => push(CigarKind::HardClip, *len as usize),
                Feature::Padding { len, .. } => push(CigarKind::Padding, *len as usize),
                Feature::Deletion { len, .. } => push(CigarKind::Deletion, *len as usize),
                Feature::RefSkip { len, .. } => push(CigarKind::Skip, *len as usize),
                Feature::Scores { qualities, .. } => {
                    for (q, &value) in qual.iter_mut().skip(read_pos - 1).zip(qualities) {
                        *q = value;
                    }
                }
                Feature::Score { quality, .. } => {
                    if let Some(q) = qual.get_mut(read_pos - 1) {
                        *q = *quality;
                    }
                }
            }
            let (read, reference_len) = feature.consumes();
            read_pos += read;
            ref_pos += reference_len;
        }

        if self.read_length + 1 > read_pos {
            let n = self.read_length + 1 - read_pos;
            for i in 0..n as u64 {
                seq.push(reference.base(ref_pos + i)?);
            }
            push(CigarKind::Match, n);
        }
        if seq.len() != self.read_length {
            return Err(DecodeError::invalid(format!(
                "features of {} rebuild {} bases, read length is {}",
                String::from_utf8_lossy(&self.name),
                seq.len(),
                self.read_length
            ))
            .into());
        }
        Ok((seq, qual, cigar))
    }

    /// BAM record block (without `block_size`) for this record.
    pub fn to_bam(&self, reference: &ReferenceBases<'_>, matrix: &SubstitutionMatrix) -> Result<Vec<u8>> {
        let (mut seq, mut qual, cigar) = self.rebuild(reference, matrix)?;
        if self.cram_flags & cram_flags::UNKNOWN_BASES != 0 {
            seq.clear();
            qual.clear();
        }
        let n_cigar = u16::try_from(cigar.len())
            .map_err(|_| FetchError::Unsupported(format!("CRAM record with {} CIGAR operations", cigar.len())))?;

        let mut name: &[u8] = if self.name.is_empty() { &b"*"[..] } else { &self.name[..] };
        name = &name[..name.len().min(254)];
        let pos = self.alignment_start - 1;
        let beg = u64::try_from(pos).unwrap_or(0);
        let bin = reg2bin(beg, beg + self.reference_span().max(1));

        let mut b = Vec::with_capacity(32 + name.len() + 4 * cigar.len() + seq.len() * 2 + self.aux.len());
        b.extend_from_slice(&self.reference_id.to_le_bytes());
        b.extend_from_slice(&pos.to_le_bytes());
        b.push(name.len() as u8 + 1);
        b.push(self.mapq);
        b.extend_from_slice(&(bin as u16).to_le_bytes());
        b.extend_from_slice(&n_cigar.to_le_bytes());
        b.extend_from_slice(&self.bam_flags.to_le_bytes());
        b.extend_from_slice(&(seq.len() as i32).to_le_bytes());
        b.extend_from_slice(&self.mate_reference_id.to_le_bytes());
        b.extend_from_slice(&(self.mate_start - 1).to_le_bytes());
        b.extend_from_slice(&self.template_length.to_le_bytes());
        b.extend_from_slice(name);
        b.push(0);
        for unit in &cigar {
            b.extend_from_slice(&unit.encode().to_le_bytes());
        }
        b.extend(pack_sequence(&seq));
        b.extend_from_slice(&qual);
        b.extend_from_slice(&self.aux);
        Ok(b)
    }
}

fn pack_sequence(seq: &[u8]) -> Vec<u8> {
    let code = |c: u8| {
        SEQ_LOOKUP
            .iter()
            .position(|&x| x == c.to_ascii_uppercase())
            .unwrap_or(15) as u8
    };
    seq.chunks(2)
        .map(|pair| (code(pair[0]) << 4) | pair.get(1).map_or(0, |&c| code(c)))
        .collect()
}

fn non_negative(value: i32, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| DecodeError::invalid(format!("negative {}: {}", what, value)).into())
}

/// Slice-wide inputs to record decoding.
pub struct SliceContext<'a> {
    /// Compression header of the enclosing container
    pub compression: &'a CompressionHeader,
    /// Slice header
    pub slice: &'a SliceHeader,
    /// `ID` of each `@RG` line, in header order
    pub read_groups: &'a [String],
}

fn decode_features(ch: &CompressionHeader, blocks: &mut SliceBlocks<'_>) -> Result<Vec<Feature>> {
    let count = non_negative(ch.series(DataSeries::FN)?.decode_int(blocks)?, "feature count")?;
    let mut features = Vec::with_capacity(count);
    let mut pos = 0usize;
    for _ in 0..count {
        let code = ch.series(DataSeries::FC)?.decode_byte(blocks)?;
        pos += non_negative(ch.series(DataSeries::FP)?.decode_int(blocks)?, "feature position")?;
        let len = |ds: DataSeries, blocks: &mut SliceBlocks<'_>| -> Result<u32> {
            let value = ch.series(ds)?.decode_int(blocks)?;
            u32::try_from(value).map_err(|_| DecodeError::invalid(format!("negative {} length {}", ds, value)).into())
        };
        let feature = match code {
            b'B' => Feature::ReadBase {
                pos,
                base: ch.series(DataSeries::BA)?.decode_byte(blocks)?,
                quality: ch.series(DataSeries::QS)?.decode_byte(blocks)?,
            },
            b'X' => Feature::Substitution {
                pos,
                code: ch.series(DataSeries::BS)?.decode_byte(blocks)?,
            },
            b'I' => Feature::Insertion {
                pos,
                bases: ch.series(DataSeries::IN)?.decode_bytes(blocks)?,
            },
            b'i' => Feature::InsertBase {
                pos,
                base: ch.series(DataSeries::BA)?.decode_byte(blocks)?,
            },
            b'S' => Feature::SoftClip {
                pos,
                bases: ch.series(DataSeries::SC)?.decode_bytes(blocks)?,
            },
            b'H' => Feature::HardClip {
                pos,
                len: len(DataSeries::HC, blocks)?,
            },
            b'P' => Feature::Padding {
                pos,
                len: len(DataSeries::PD, blocks)?,
            },
            b'D' => Feature::Deletion {
                pos,
                len: len(DataSeries::DL, blocks)?,
            },
            b'N' => Feature::RefSkip {
                pos,
                len: len(DataSeries::RS, blocks)?,
            },
            b'b' => Feature::Bases {
                pos,
                bases: ch.series(DataSeries::BB)?.decode_bytes(blocks)?,
            },
            b'q' => Feature::Scores {
                pos,
                qualities: ch.series(DataSeries::QQ)?.decode_bytes(blocks)?,
            },
            b'Q' => Feature::Score {
                pos,
                quality: ch.series(DataSeries::QS)?.decode_byte(blocks)?,
            },
            other => {
                return Err(DecodeError::invalid(format!("unknown read feature code {:?}", other as char)).into())
            }
        };
        features.push(feature);
    }
    Ok(features)
}

fn decode_record(
    ctx: &SliceContext<'_>,
    blocks: &mut SliceBlocks<'_>,
    index: usize,
    prev_start: &mut i32,
) -> Result<CramRecord> {
    let ch = ctx.compression;
    let keep = &ch.preservation;
    let int = |ds: DataSeries, blocks: &mut SliceBlocks<'_>| ch.series(ds)?.decode_int(blocks);

    let bam_flags = int(DataSeries::BF, blocks)?;
    let bam_flags = u16::try_from(bam_flags).map_err(|_| DecodeError::invalid(format!("BAM flags {}", bam_flags)))?;
    let cram_flags = int(DataSeries::CF, blocks)?;
    let reference_id = if ctx.slice.reference_id == -2 {
        int(DataSeries::RI, blocks)?
    } else {
        ctx.slice.reference_id
    };
    let read_length = non_negative(int(DataSeries::RL, blocks)?, "read length")?;
    let ap = int(DataSeries::AP, blocks)?;
    let alignment_start = if keep.delta_positions {
        *prev_start = prev_start.wrapping_add(ap);
        *prev_start
    } else {
        ap
    };
    let read_group = int(DataSeries::RG, blocks)?;

    let mut name = if keep.read_names {
        ch.series(DataSeries::RN)?.decode_bytes(blocks)?
    } else {
        Vec::new()
    };

    let mut record = CramRecord {
        bam_flags,
        cram_flags,
        reference_id,
        read_length,
        alignment_start,
        read_group,
        name: Vec::new(),
        mate_reference_id: -1,
        mate_start: 0,
        template_length: 0,
        next_fragment: None,
        aux: Vec::new(),
        features: Vec::new(),
        mapq: 0,
        bases: Vec::new(),
        qualities: Vec::new(),
    };

    if cram_flags & cram_flags::DETACHED != 0 {
        let mate_flags = int(DataSeries::MF, blocks)?;
        if mate_flags & MATE_REVERSE != 0 {
            record.bam_flags |= FLAG_MATE_REVERSE;
        }
        if mate_flags & MATE_UNMAPPED != 0 {
            record.bam_flags |= FLAG_MATE_UNMAPPED;
        }
        if !keep.read_names {
            name = ch.series(DataSeries::RN)?.decode_bytes(blocks)?;
        }
        record.mate_reference_id = int(DataSeries::NS, blocks)?;
        record.mate_start = int(DataSeries::NP, blocks)?;
        record.template_length = int(DataSeries::TS, blocks)?;
    } else if cram_flags & cram_flags::MATE_DOWNSTREAM != 0 {
        record.next_fragment = Some(non_negative(int(DataSeries::NF, blocks)?, "next fragment distance")?);
    }
    if name.is_empty() {
        name = (ctx.slice.record_counter + index as i64 + 1).to_string().into_bytes();
    }
    record.name = name;

    let line = int(DataSeries::TL, blocks)?;
    let tag_line = usize::try_from(line)
        .ok()
        .and_then(|i| keep.tag_lines.get(i))
        .ok_or_else(|| DecodeError::invalid(format!("tag line {} not in the tag dictionary", line)))?;
    for &id in tag_line {
        let value = ch.tag(id)?.decode_bytes(blocks)?;
        record.aux.extend_from_slice(&id);
        record.aux.extend(value);
    }
    if read_group >= 0 {
        let rg = usize::try_from(read_group)
            .ok()
            .and_then(|i| ctx.read_groups.get(i))
            .ok_or_else(|| DecodeError::invalid(format!("read group {} not in the header", read_group)))?;
        record.aux.extend_from_slice(b"RGZ");
        record.aux.extend_from_slice(rg.as_bytes());
        record.aux.push(0);
    }

    if record.is_unmapped() {
        record.bases = ch.series(DataSeries::BA)?.decode_byte_run(blocks, read_length)?;
    } else {
        record.features = decode_features(ch, blocks)?;
        let mapq = int(DataSeries::MQ, blocks)?;
        record.mapq = u8::try_from(mapq).map_err(|_| DecodeError::invalid(format!("mapping quality {}", mapq)))?;
    }
    if cram_flags & cram_flags::QUALITY_ARRAY != 0 {
        record.qualities = ch.series(DataSeries::QS)?.decode_byte_run(blocks, read_length)?;
    }
    Ok(record)
}

fn set_mate(this: &mut CramRecord, mate: &CramRecord) {
    this.bam_flags |= FLAG_PAIRED;
    this.mate_reference_id = mate.reference_id;
    this.mate_start = mate.alignment_start;
    if mate.bam_flags & FLAG_REVERSE != 0 {
        this.bam_flags |= FLAG_MATE_REVERSE;
    }
    if mate.is_unmapped() {
        this.bam_flags |= FLAG_MATE_UNMAPPED;
    }
}

/// Fill in mate fields of records whose mate is later in the same slice.
fn link_mates(records: &mut [CramRecord], names_stored: bool) {
    for i in 0..records.len() {
        let Some(skip) = records[i].next_fragment else {
            continue;
        };
        let j = i + skip + 1;
        if j >= records.len() {
            continue;
        }
        let (head, tail) = records.split_at_mut(j);
        let (a, b) = (&mut head[i], &mut tail[0]);
        set_mate(a, b);
        set_mate(b, a);
        if !names_stored {
            b.name = a.name.clone();
        }
        if !a.is_unmapped() && !b.is_unmapped() && a.reference_id == b.reference_id {
            let left = i64::from(a.alignment_start.min(b.alignment_start));
            let right = a.alignment_end().max(b.alignment_end());
            let tlen = i32::try_from(right - left + 1).unwrap_or(i32::MAX);
            a.template_length = if a.alignment_start <= b.alignment_start { tlen } else { -tlen };
            b.template_length = -a.template_length;
        }
    }
}

/// Decode every record of a slice.
pub fn decode_slice(ctx: &SliceContext<'_>, blocks: &mut SliceBlocks<'_>) -> Result<Vec<CramRecord>> {
    let count = non_negative(ctx.slice.record_count, "slice record count")?;
    let mut records = Vec::with_capacity(count.min(1 << 16));
    let mut prev_start = ctx.slice.start;
    for index in 0..count {
        records.push(decode_record(ctx, blocks, index, &mut prev_start)?);
    }
    link_mates(&mut records, ctx.compression.preservation.read_names);
    Ok(records)
}


#[cfg(test)]
mod tests {
    use super::super::codec::test_support::HeaderWriter;
    use super::test_support::*;
    use super::*;
    use crate::io::bam::RecordView;
    use std::collections::HashMap;

    fn slice(start: i32, record_count: i32) -> SliceHeader {
        SliceHeader {
            reference_id: 0,
            start,
            span: 1000,
            record_count,
            record_counter: 0,
            block_count: 0,
            content_ids: Vec::new(),
            embedded_reference: -1,
            reference_md5: [0; 16],
        }
    }

    fn decode(header: &HeaderWriter, records: &[RecordSpec], start: i32) -> Vec<CramRecord> {
        let compression = CompressionHeader::parse(&header.build()).unwrap();
        let data = encode_records(header, records, start);
        let external: HashMap<i32, &[u8]> = data.iter().map(|(&id, d)| (id, &d[..])).collect();
        let mut blocks = SliceBlocks::new(&[], external);
        let slice = slice(start, records.len() as i32);
        let ctx = SliceContext {
            compression: &compression,
            slice: &slice,
            read_groups: &[],
        };
        decode_slice(&ctx, &mut blocks).unwrap()
    }

    fn header() -> HeaderWriter {
        let mut header = HeaderWriter::new();
        header.tag_lines = vec![vec![]];
        header
    }

    // reference bases 0..40 at position 100 (0-based)
    const REFERENCE: &[u8] = b"ACGTACGTACGTACGTACGTAAAACCCCGGGGTTTTACGT";

    fn bases() -> ReferenceBases<'static> {
        ReferenceBases::Bases {
            offset: 100,
            bases: REFERENCE,
        }
    }

    #[test]
    fn test_perfect_match_from_reference() {
        let records = decode(&header(), &[RecordSpec::mapped("r1", 101, 8)], 101);
        let r = &records[0];
        assert_eq!((r.alignment_start, r.read_length, r.reference_span()), (101, 8, 8));
        assert_eq!(r.name, b"r1");

        let block = r.to_bam(&bases(), &SubstitutionMatrix::default()).unwrap();
        let view = RecordView::parse(&block).unwrap();
        assert_eq!(view.position(), 100);
        assert_eq!(view.read_name(), b"r1");
        assert_eq!(view.cigar_string().unwrap(), "8M");
        assert_eq!(view.query_sequence(false).unwrap(), b"ACGTACGT");
        assert_eq!(view.raw_qualities()[0], 0xFF);
    }

    #[test]
    fn test_features_rebuild_read() {
        // 2S 3M X 2M 2I 2M 3D 3M
        let record = RecordSpec::mapped("f", 103, 15)
            .feature(b'S', 1, b"TT")
            .feature(b'X', 6, &[0])
            .feature(b'I', 9, b"GG")
            .feature(b'D', 13, &[3]);
        let mut header = header();
        header.delta_positions = false;
        let records = decode(&header, &[record], 1);
        let r = &records[0];
        assert_eq!(r.features.len(), 4);
        assert_eq!(r.reference_span(), 3 + 1 + 2 + 2 + 3 + 3);

        let block = r.to_bam(&bases(), &SubstitutionMatrix::default()).unwrap();
        let view = RecordView::parse(&block).unwrap();
        assert_eq!(view.cigar_string().unwrap(), "2S6M2I2M3D3M");
        // GTA, then C substituted by A under code 0, GT, GG inserted, AC, GTA deleted, CGT
        assert_eq!(view.query_sequence(false).unwrap(), b"TTGTAAGTGGACCGT");
        assert_eq!(view.target_length().unwrap(), r.reference_span());
    }

    #[test]
    fn test_delta_positions_and_qualities() {
        let mut first = RecordSpec::mapped("a", 110, 4);
        first.qualities = vec![30, 31, 32, 33];
        let second = RecordSpec::mapped("b", 115, 4).feature(b'Q', 2, &[7]);
        let records = decode(&header(), &[first, second], 101);
        assert_eq!(records[0].alignment_start, 110);
        assert_eq!(records[1].alignment_start, 115);

        let view_block = records[0].to_bam(&bases(), &SubstitutionMatrix::default()).unwrap();
        let view = RecordView::parse(&view_block).unwrap();
        assert_eq!(view.raw_qualities(), &[30, 31, 32, 33]);

        let block = records[1].to_bam(&bases(), &SubstitutionMatrix::default()).unwrap();
        assert_eq!(RecordView::parse(&block).unwrap().raw_qualities()[1], 7);
    }

    #[test]
    fn test_unmapped_read_and_tags() {
        let mut header = header().tag(*b"NMi").tag(*b"XAZ");
        header.tag_lines = vec![vec![], vec![*b"NMi", *b"XAZ"]];
        let mut unmapped = RecordSpec::mapped("u", 0, 5);
        unmapped.flags = 0x4;
        unmapped.bases = b"NACGT".to_vec();
        let mut tagged = RecordSpec::mapped("t", 120, 4);
        tagged.tags = vec![(*b"NMi", 2i32.to_le_bytes().to_vec()), (*b"XAZ", b"hi\0".to_vec())];

        let mut header_abs = header;
        header_abs.delta_positions = false;
        let records = decode(&header_abs, &[unmapped, tagged], 1);

        assert!(records[0].is_unmapped());
        assert_eq!(records[0].bases, b"NACGT");
        let block = records[0].to_bam(&ReferenceBases::Unknown, &SubstitutionMatrix::default()).unwrap();
        let view = RecordView::parse(&block).unwrap();
        assert_eq!(view.cigar_len(), 0);
        assert_eq!(view.query_sequence(false).unwrap(), b"NACGT");

        let block = records[1].to_bam(&bases(), &SubstitutionMatrix::default()).unwrap();
        let view = RecordView::parse(&block).unwrap();
        assert_eq!(view.tag_string("NM", 16).unwrap().as_deref(), Some("2"));
        assert_eq!(view.tag_string("XA", 16).unwrap().as_deref(), Some("hi"));
    }

    #[test]
    fn test_unknown_reference_is_unsupported() {
        let records = decode(&header(), &[RecordSpec::mapped("r", 101, 4)], 101);
        assert!(matches!(
            records[0].to_bam(&ReferenceBases::Unknown, &SubstitutionMatrix::default()),
            Err(FetchError::Unsupported(_))
        ));
        let block = records[0]
            .to_bam(&ReferenceBases::NotRequired, &SubstitutionMatrix::default())
            .unwrap();
        assert_eq!(RecordView::parse(&block).unwrap().query_sequence(false).unwrap(), b"NNNN");
    }

    #[test]
    fn test_attached_mates_linked() {
        let mut first = RecordSpec::mapped("pair", 101, 10);
        first.next_fragment = Some(0);
        let mut second = RecordSpec::mapped("pair", 121, 10);
        second.flags = 0x10;
        let records = decode(&header(), &[first, second], 101);

        let (a, b) = (&records[0], &records[1]);
        assert_eq!((a.mate_reference_id, a.mate_start), (0, 121));
        assert_eq!((b.mate_reference_id, b.mate_start), (0, 101));
        assert_ne!(a.bam_flags & FLAG_MATE_REVERSE, 0);
        assert_eq!(a.template_length, 30);
        assert_eq!(b.template_length, -30);
    }

    #[test]
    fn test_generated_names_without_read_names() {
        let mut header = header();
        header.read_names = false;
        let records = decode(&header, &[RecordSpec::mapped("ignored", 101, 4)], 101);
        assert_eq!(records[0].name, b"1");
    }

    #[test]
    fn test_feature_overrun_rejected() {
        // insertion longer than the read
        let record = RecordSpec::mapped("bad", 101, 2).feature(b'I', 1, b"AAAA");
        let records = decode(&header(), &[record], 101);
        assert!(matches!(
            records[0].to_bam(&bases(), &SubstitutionMatrix::default()),
            Err(FetchError::Format(_))
        ));
    }
}

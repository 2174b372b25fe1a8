//! BAI index.
//!
//! ```text
//! magic    "BAI\1"
//! n_ref    int32
//! per reference:
//!   n_bin  int32
//!   per bin: bin uint32, n_chunk int32, (beg uint64, end uint64) * n_chunk
//!   n_intv int32
//!   ioffset uint64 * n_intv      linear index, one per 16 kbp window
//! n_no_coor uint64               optional
//! ```
//!
//! Bins form a six-level hierarchy over 2^29 bases (one 512 Mbp bin down
//! to 32768 bins of 16 kbp). Bin 37450 is a pseudo-bin holding mapped and
//! unmapped counts and is not used for queries.

use super::error::DecodeError;
use crate::io::bgzf::VirtualOffset;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// BAI magic bytes.
pub const BAI_MAGIC: &[u8; 4] = b"BAI\x01";

/// Metadata pseudo-bin.
pub const PSEUDO_BIN: u32 = 37450;

/// Largest coordinate the binning scheme covers.
pub const MAX_COORD: u64 = 1 << 29;

const LINEAR_SHIFT: u32 = 14;

/// A half-open range of virtual offsets holding candidate records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// First virtual offset
    pub start: VirtualOffset,
    /// End virtual offset (exclusive)
    pub end: VirtualOffset,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Self { start, end }
    }
}

/// Per-reference part of the index.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    bins: HashMap<u32, Vec<Chunk>>,
    intervals: Vec<VirtualOffset>,
}

impl ReferenceIndex {
    /// Chunks stored under `bin`.
    pub fn bin(&self, bin: u32) -> Option<&[Chunk]> {
        self.bins.get(&bin).map(Vec::as_slice)
    }

    /// Linear index entries.
    pub fn intervals(&self) -> &[VirtualOffset] {
        &self.intervals
    }

    /// Smallest offset any record overlapping `beg` can start at.
    fn min_offset(&self, beg: u64) -> VirtualOffset {
        let window = (beg >> LINEAR_SHIFT) as usize;
        self.intervals
            .get(window)
            .or_else(|| self.intervals.last())
            .copied()
            .unwrap_or_default()
    }
}

/// Parsed BAI index.
#[derive(Debug, Clone, Default)]
pub struct BaiIndex {
    /// One entry per header reference, same order
    pub references: Vec<ReferenceIndex>,
    /// Count of unplaced unmapped reads, if recorded
    pub unplaced_unmapped: Option<u64>,
}

fn read_bytes<const N: usize, R: Read>(reader: &mut R) -> Result<[u8; N], DecodeError> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize, DecodeError> {
    let value = i32::from_le_bytes(read_bytes(reader)?);
    usize::try_from(value).map_err(|_| DecodeError::invalid(format!("negative {}: {}", what, value)))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, DecodeError> {
    Ok(u64::from_le_bytes(read_bytes(reader)?))
}

impl BaiIndex {
    /// Load an index file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let file = File::open(path)?;
        Self::from_reader(&mut BufReader::new(file))
    }

    /// Parse an index held in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::from_reader(&mut &bytes[..])
    }

    /// Parse an index from a stream.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let magic: [u8; 4] = read_bytes(reader)?;
        if &magic != BAI_MAGIC {
            return Err(DecodeError::InvalidMagic {
                expected: BAI_MAGIC,
                actual: magic.to_vec(),
            });
        }

        let n_ref = read_count(reader, "reference count")?;
        let mut references = Vec::with_capacity(n_ref.min(1 << 16));
        for _ in 0..n_ref {
            let mut reference = ReferenceIndex::default();

            let n_bin = read_count(reader, "bin count")?;
            for _ in 0..n_bin {
                let bin = u32::from_le_bytes(read_bytes(reader)?);
                let n_chunk = read_count(reader, "chunk count")?;
                let mut chunks = Vec::with_capacity(n_chunk.min(1 << 16));
                for _ in 0..n_chunk {
                    let start = VirtualOffset::from_raw(read_u64(reader)?);
                    let end = VirtualOffset::from_raw(read_u64(reader)?);
                    chunks.push(Chunk::new(start, end));
                }
                if bin != PSEUDO_BIN {
                    reference.bins.insert(bin, chunks);
                }
            }

            let n_intv = read_count(reader, "interval count")?;
            reference.intervals = (0..n_intv)
                .map(|_| read_u64(reader).map(VirtualOffset::from_raw))
                .collect::<Result<_, _>>()?;

            references.push(reference);
        }

        let mut tail = [0u8; 8];
        let unplaced_unmapped = match reader.read_exact(&mut tail) {
            Ok(()) => Some(u64::from_le_bytes(tail)),
            Err(_) => None,
        };

        Ok(Self {
            references,
            unplaced_unmapped,
        })
    }

    /// Merged chunks that may hold records of reference `tid`
    /// overlapping `[beg, end)`.
    pub fn query(&self, tid: usize, beg: u64, end: u64) -> Vec<Chunk> {
        let Some(reference) = self.references.get(tid) else {
            return Vec::new();
        };
        let beg = beg.min(MAX_COORD - 1);
        let end = end.clamp(beg + 1, MAX_COORD);

        let min_offset = reference.min_offset(beg);
        let mut chunks: Vec<Chunk> = reg2bins(beg, end)
            .into_iter()
            .filter_map(|bin| reference.bin(bin))
            .flatten()
            .filter(|chunk| chunk.end > min_offset)
            .copied()
            .collect();

        chunks.sort_by_key(|c| c.start);
        merge_chunks(chunks)
    }
}

/// Bins at every level overlapping `[beg, end)`.
pub fn reg2bins(beg: u64, end: u64) -> Vec<u32> {
    let last = end.saturating_sub(1).max(beg);
    let mut bins = vec![0];
    for level in 1..=5u32 {
        let offset = ((1u64 << (3 * level)) - 1) / 7;
        let shift = 29 - 3 * level;
        let first_bin = offset + (beg >> shift);
        let last_bin = offset + (last >> shift);
        bins.extend((first_bin..=last_bin).map(|b| b as u32));
    }
    bins
}

/// Bin holding a record spanning `[beg, end)`, as stored in BAM records.
pub fn reg2bin(beg: u64, end: u64) -> u32 {
    let last = end.saturating_sub(1).max(beg);
    for level in (1..=5u32).rev() {
        let shift = 29 - 3 * level;
        if beg >> shift == last >> shift {
            let offset = ((1u64 << (3 * level)) - 1) / 7;
            return (offset + (beg >> shift)) as u32;
        }
    }
    0
}

fn merge_chunks(sorted: Vec<Chunk>) -> Vec<Chunk> {
    let mut merged: Vec<Chunk> = Vec::with_capacity(sorted.len());
    for chunk in sorted {
        match merged.last_mut() {
            Some(current) if chunk.start <= current.end => {
                current.end = current.end.max(chunk.end);
            }
            _ => merged.push(chunk),
        }
    }
    merged
}

#[cfg(test)]
pub(crate) fn encode_index(references: &[(Vec<(u32, Vec<(u64, u64)>)>, Vec<u64>)]) -> Vec<u8> {
    let mut out = BAI_MAGIC.to_vec();
    out.extend_from_slice(&(references.len() as i32).to_le_bytes());
    for (bins, intervals) in references {
        out.extend_from_slice(&(bins.len() as i32).to_le_bytes());
        for (bin, chunks) in bins {
            out.extend_from_slice(&bin.to_le_bytes());
            out.extend_from_slice(&(chunks.len() as i32).to_le_bytes());
            for (beg, end) in chunks {
                out.extend_from_slice(&beg.to_le_bytes());
                out.extend_from_slice(&end.to_le_bytes());
            }
        }
        out.extend_from_slice(&(intervals.len() as i32).to_le_bytes());
        for ioff in intervals {
            out.extend_from_slice(&ioff.to_le_bytes());
        }
    }
    out
}

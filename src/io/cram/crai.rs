//! CRAI index.
//!
//! A gzipped text file, one slice per line, six tab-separated columns:
//!
//! ```text
//! ref_id  alignment_start  alignment_span  container_offset  slice_offset  slice_size
//! ```
//!
//! `alignment_start` is 1-based. `container_offset` is the absolute file
//! offset of the container; `slice_offset` counts from the end of that
//! container's header.

use crate::io::bam::error::DecodeError;
use flate2::read::MultiGzDecoder;
use std::io::Read;

/// One indexed slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CraiEntry {
    /// Reference id, -1 for unmapped slices
    pub reference_id: i32,
    /// 1-based alignment start
    pub start: u64,
    /// Reference bases covered
    pub span: u64,
    /// File offset of the container
    pub container_offset: u64,
    /// Slice offset after the container header
    pub slice_offset: u64,
    /// Slice size in bytes
    pub slice_size: u64,
}

impl CraiEntry {
    /// True if the slice overlaps 0-based half-open `[beg, end)`.
    pub fn overlaps(&self, beg: u64, end: u64) -> bool {
        let first = self.start.saturating_sub(1);
        let last = first.saturating_add(self.span.max(1));
        first < end && last > beg
    }
}

fn field<T: std::str::FromStr>(value: Option<&str>, name: &str, line: usize) -> Result<T, DecodeError> {
    let value = value.ok_or_else(|| DecodeError::invalid(format!("CRAI line {}: missing {}", line, name)))?;
    value
        .parse()
        .map_err(|_| DecodeError::invalid(format!("CRAI line {}: bad {} '{}'", line, name, value)))
}

/// Parsed CRAI index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CraiIndex {
    /// Entries in file order
    pub entries: Vec<CraiEntry>,
}

impl CraiIndex {
    /// Parse index bytes, gzipped or already inflated.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut text = String::new();
        if bytes.starts_with(&[0x1f, 0x8b]) {
            MultiGzDecoder::new(bytes)
                .read_to_string(&mut text)
                .map_err(|e| DecodeError::invalid(format!("CRAI is not valid gzip text: {}", e)))?;
        } else {
            text = String::from_utf8(bytes.to_vec())
                .map_err(|_| DecodeError::invalid("CRAI is not text"))?;
        }
        Self::parse_text(&text)
    }

    /// Parse inflated index text.
    pub fn parse_text(text: &str) -> Result<Self, DecodeError> {
        let mut entries = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line_no = n + 1;
            if line.trim().is_empty() {
                continue;
            }
            let mut cols = line.split_whitespace();
            entries.push(CraiEntry {
                reference_id: field(cols.next(), "reference id", line_no)?,
                start: field(cols.next(), "alignment start", line_no)?,
                span: field(cols.next(), "alignment span", line_no)?,
                container_offset: field(cols.next(), "container offset", line_no)?,
                slice_offset: field(cols.next(), "slice offset", line_no)?,
                slice_size: field(cols.next(), "slice size", line_no)?,
            });
        }
        Ok(Self { entries })
    }

    /// Slices of reference `tid` overlapping `[beg, end)`, ordered by file
    /// position, each slice once.
    pub fn query(&self, tid: usize, beg: u64, end: u64) -> Vec<CraiEntry> {
        let mut hits: Vec<CraiEntry> = self
            .entries
            .iter()
            .filter(|e| usize::try_from(e.reference_id).is_ok_and(|id| id == tid))
            .filter(|e| e.overlaps(beg, end))
            .copied()
            .collect();
        hits.sort_by_key(|e| (e.container_offset, e.slice_offset));
        hits.dedup_by_key(|e| (e.container_offset, e.slice_offset));
        hits
    }
}

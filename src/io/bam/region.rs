//! Region strings.
//!
//! `name`, `name:start`, `name:start-end`, 1-based and inclusive, commas
//! allowed in numbers. Internally every interval is 0-based half-open, so
//! `chr1:100-200` becomes `[99, 200)`.

use super::catalog;
use super::header::Header;
use crate::error::{FetchError, Result};
use std::fmt;
use std::str::FromStr;

/// A parsed, not yet resolved, region query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionQuery {
    text: String,
    name: String,
    start: u64,
    end: Option<u64>,
}

/// A region pinned to one reference of a specific file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRegion {
    /// Reference index in the file header
    pub tid: usize,
    /// Reference name as the file spells it
    pub name: String,
    /// 0-based inclusive start
    pub start: u64,
    /// 0-based exclusive end, clamped to the reference length
    pub end: u64,
}

impl ResolvedRegion {
    /// True if `[beg, end)` overlaps this region. Zero-length spans
    /// count as one base.
    pub fn overlaps(&self, beg: u64, end: u64) -> bool {
        let end = end.max(beg + 1);
        beg < self.end && end > self.start
    }
}

fn parse_coord(s: &str, text: &str) -> Result<u64> {
    let digits: String = s.chars().filter(|&c| c != ',').collect();
    digits
        .parse::<u64>()
        .map_err(|_| FetchError::InvalidRegion(format!("bad coordinate '{}' in '{}'", s, text)))
}

impl RegionQuery {
    /// Parse a region string.
    ///
    /// A `:` suffix is only treated as an interval if it is made of digits,
    /// commas and at most one `-`; anything else is part of the name.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FetchError::InvalidRegion("empty region".to_string()));
        }

        let split = text.rsplit_once(':').filter(|(name, range)| {
            !name.is_empty()
                && !range.is_empty()
                && range.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '-')
        });

        let Some((name, range)) = split else {
            return Ok(Self {
                text: text.to_string(),
                name: text.to_string(),
                start: 0,
                end: None,
            });
        };

        let (beg, end) = match range.split_once('-') {
            Some((beg, "")) => (parse_coord(beg, text)?, None),
            Some((beg, end)) => (parse_coord(beg, text)?, Some(parse_coord(end, text)?)),
            None => (parse_coord(range, text)?, None),
        };
        let start = beg.saturating_sub(1);
        if let Some(end) = end {
            if end < start {
                return Err(FetchError::InvalidRegion(format!(
                    "end before start in '{}'",
                    text
                )));
            }
        }

        Ok(Self {
            text: text.to_string(),
            name: name.to_string(),
            start,
            end,
        })
    }

    /// Reference name part.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 0-based start.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// 0-based exclusive end, `None` for "to the end of the reference".
    pub fn end(&self) -> Option<u64> {
        self.end
    }

    /// Pin the query to a reference of `header`.
    ///
    /// Tries the name as given, then without a `chr` prefix. A reference
    /// whose own name contains `:` is matched against the full text first.
    /// `None` means this file has no such reference.
    pub fn resolve(&self, header: &Header) -> Option<ResolvedRegion> {
        if self.text != self.name {
            if let Some(tid) = header.reference_id(&self.text) {
                let reference = &header.references[tid];
                return Some(ResolvedRegion {
                    tid,
                    name: reference.name.clone(),
                    start: 0,
                    end: u64::from(reference.length),
                });
            }
        }

        let (tid, name) = catalog::lookup(header, &self.name)?;
        let length = u64::from(header.references[tid].length);
        let end = self.end.map_or(length, |end| end.min(length));
        Some(ResolvedRegion {
            tid,
            name: name.to_string(),
            start: self.start,
            end,
        })
    }
}

impl FromStr for RegionQuery {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RegionQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

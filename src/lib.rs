//! bamfetch: indexed region queries over BAM and CRAM alignment files
//!
//! # Overview
//!
//! Given a local path or URL, a region string such as `chr1:100-200` and
//! a consumer callback, bamfetch opens the file, loads its BAI or CRAI
//! index and hands every overlapping alignment record to the consumer as
//! a zero-copy [`RecordView`](io::bam::RecordView). Record fields (CIGAR,
//! sequence, qualities, aux tags) are decoded on demand.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bamfetch::{FetchOptions, RegionFetcher};
//!
//! # fn main() -> bamfetch::Result<()> {
//! let fetcher = RegionFetcher::new(FetchOptions::new())?;
//! fetcher.fetch("sample.bam", "chr1:100-200", |record, header| {
//!     let chrom = header.reference_name(record.reference_id()).unwrap_or("*");
//!     let clip = record.soft_clipping()?;
//!     let nm = record.tag_string("NM", 16)?;
//!     println!("{} {}:{} clipped {}/{} NM={:?}", record.read_name_lossy(), chrom, record.position(), clip.low, clip.high, nm);
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! Regions written with a `chr` prefix also match files whose references
//! are unprefixed (`chr1` finds `1`). A region on a reference the file
//! does not have returns zero records.
//!
//! ## CRAM
//!
//! Fetching from a CRAM file needs a reference cache directory. The fetch
//! path checks the reference checksum of every slice it would read; a
//! missing reference leaves a download request under `<cache>/pending/`
//! and fails with [`FetchError::ReferencePending`]. Once the references
//! are cached, records are rebuilt against them and reach the consumer
//! as the same [`RecordView`] a BAM fetch delivers.
//!
//! ## Module Organization
//!
//! - [`fetch`]: the region fetcher, options and backends
//! - [`io`]: BGZF, BAM, CRAM and byte sources (local files, HTTP ranges)
//! - [`error`]: error types
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`] facade; install any logger to see
//! them. The library never installs one itself.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod fetch;
pub mod io;

pub use error::{FetchError, Result};
pub use fetch::{AlignmentSource, FetchOptions, FetchSummary, Format, RegionFetcher};
pub use io::bam::{AlignmentRecord, ChromEntry, DecodeError, Header, RecordView};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

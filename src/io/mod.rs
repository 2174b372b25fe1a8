//! I/O: containers, codecs and byte sources.

pub mod bam;
pub mod bgzf;
pub mod cram;
pub mod source;

#[cfg(feature = "network")]
pub mod network;
#[cfg(feature = "network")]
pub use network::{HttpClient, HttpReader};

pub use bam::BamReader;
pub use cram::CramReader;
pub use source::{DataSource, ReadSeek};

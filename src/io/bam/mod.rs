//! BAM decoding.
//!
//! The pieces, bottom up:
//!
//! - [`cigar`], [`sequence`], [`tags`]: decoders for the packed fields of
//!   a record. They borrow from the record block and never copy more than
//!   the caller asks for.
//! - [`record`]: [`RecordView`], a validated read-only view over one
//!   record block, and [`AlignmentRecord`], its owned counterpart.
//! - [`header`], [`catalog`], [`region`]: reference dictionary, the
//!   chromosome list and region strings resolved against it.
//! - [`index`] and [`reader`]: BAI queries and the record stream that
//!   walks them.
//!
//! # Example
//!
//! ```no_run
//! use bamfetch::io::bam::{BaiIndex, BamReader, RegionQuery};
//!
//! # fn main() -> bamfetch::Result<()> {
//! let mut bam = BamReader::from_path("alignments.bam")?;
//! let index = BaiIndex::from_path("alignments.bam.bai")?;
//!
//! let query = RegionQuery::parse("chr1:10,000-20,000")?;
//! if let Some(region) = query.resolve(bam.header()) {
//!     bam.fetch(&index, &region, |record, _| {
//!         println!("{}\t{}\t{}", record.read_name_lossy(), record.position(), record.cigar_string()?);
//!         Ok(())
//!     })?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod cigar;
pub mod error;
pub mod header;
pub mod index;
pub mod reader;
pub mod record;
pub mod region;
pub mod sequence;
pub mod tags;

pub use catalog::{list_chroms, lookup, ChromEntry};
pub use cigar::{decode_unit, CigarKind, CigarUnit, CigarUnits};
pub use error::DecodeError;
pub use header::{read_header, Header, Reference};
pub use index::{BaiIndex, Chunk};
pub use reader::{BamReader, Records};
pub use record::{AlignmentRecord, Flags, RecordView, SoftClipping};
pub use region::{RegionQuery, ResolvedRegion};
pub use sequence::{decode_sequence, reverse_complement};
pub use tags::{AuxArray, AuxCursor, AuxField, AuxValue};

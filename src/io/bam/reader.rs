//! BAM reader.
//!
//! Reads the header once, then streams record blocks through a single
//! reusable buffer. [`BamReader::fetch`] walks the chunks a BAI index
//! returns for a region and hands each overlapping record to a consumer
//! as a borrowed [`RecordView`].
//!
//! # Usage
//!
//! ```no_run
//! use bamfetch::io::bam::BamReader;
//!
//! # fn main() -> Result<(), bamfetch::io::bam::DecodeError> {
//! let mut bam = BamReader::from_path("alignments.bam")?;
//! println!("{} references", bam.header().reference_count());
//!
//! for record in bam.records() {
//!     let record = record?;
//!     println!("{}", record.view().read_name_lossy());
//! }
//! # Ok(())
//! # }
//! ```

use super::error::DecodeError;
use super::header::{read_header, Header};
use super::index::BaiIndex;
use super::record::{AlignmentRecord, RecordView};
use super::region::ResolvedRegion;
use crate::error::Result;
use crate::io::bgzf::{read_up_to, BgzfReader, VirtualOffset};
use log::debug;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Streaming BAM reader.
pub struct BamReader<R> {
    inner: BgzfReader<R>,
    header: Header,
}

impl<R: Read> BamReader<R> {
    /// Wrap a raw (still compressed) BAM stream and read its header.
    pub fn new(reader: R) -> std::result::Result<Self, DecodeError> {
        let mut inner = BgzfReader::new(reader);
        let header = read_header(&mut inner)?;
        Ok(Self { inner, header })
    }

    /// File header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Virtual offset of the next record.
    pub fn virtual_position(&self) -> VirtualOffset {
        self.inner.virtual_position()
    }

    /// Read the next record block (without `block_size`) into `buf`.
    ///
    /// Returns `false` at end of stream. A stream ending inside a record
    /// is an error.
    pub fn read_record_into(&mut self, buf: &mut Vec<u8>) -> std::result::Result<bool, DecodeError> {
        let mut size = [0u8; 4];
        match read_up_to(&mut self.inner, &mut size)? {
            0 => return Ok(false),
            4 => {}
            n => return Err(DecodeError::eof("record block_size", 4, n)),
        }
        let block_size = i32::from_le_bytes(size);
        let block_size = usize::try_from(block_size)
            .map_err(|_| DecodeError::invalid(format!("negative block size {}", block_size)))?;

        buf.clear();
        let got = (&mut self.inner).take(block_size as u64).read_to_end(buf)?;
        if got != block_size {
            return Err(DecodeError::eof("record block", block_size, got));
        }
        Ok(true)
    }

    /// Iterate over all remaining records as owned values.
    pub fn records(&mut self) -> Records<'_, R> {
        Records { reader: self }
    }
}

impl<R: Read + Seek> BamReader<R> {
    /// Call `consumer` for every record of `region.tid` overlapping
    /// `[region.start, region.end)`, in file order. Returns how many
    /// records were delivered.
    ///
    /// Iteration stops at the first record on another reference or
    /// starting at or past `region.end`. Records without reference span
    /// (unmapped reads placed next to their mate) cover one base.
    pub fn fetch<F>(&mut self, index: &BaiIndex, region: &ResolvedRegion, mut consumer: F) -> Result<u64>
    where
        F: FnMut(&RecordView<'_>, &Header) -> Result<()>,
    {
        let chunks = index.query(region.tid, region.start, region.end);
        debug!(
            "{}:{}-{}: {} chunk(s) to scan",
            region.name,
            region.start,
            region.end,
            chunks.len()
        );

        let tid = i32::try_from(region.tid).unwrap_or(i32::MAX);
        let start = region.start as i64;
        let end = region.end as i64;
        let mut buf = Vec::with_capacity(512);
        let mut delivered = 0;

        'chunks: for chunk in &chunks {
            self.inner.seek(chunk.start)?;
            while self.inner.virtual_position() < chunk.end {
                if !self.read_record_into(&mut buf)? {
                    break;
                }
                let view = RecordView::parse(&buf)?;
                let pos = i64::from(view.position());
                if view.reference_id() != tid || pos >= end {
                    break 'chunks;
                }
                let span = view.target_length()?.max(1) as i64;
                if pos + span <= start {
                    continue;
                }
                consumer(&view, &self.header)?;
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}

impl BamReader<BufReader<File>> {
    /// Open a local BAM file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> std::result::Result<Self, DecodeError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

/// Iterator returned by [`BamReader::records`].
pub struct Records<'a, R> {
    reader: &'a mut BamReader<R>,
}

impl<R: Read> Iterator for Records<'_, R> {
    type Item = std::result::Result<AlignmentRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut block = Vec::new();
        match self.reader.read_record_into(&mut block) {
            Ok(true) => Some(AlignmentRecord::from_block(block)),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::io::bam::cigar::CigarKind::*;
    use crate::io::bam::header::encode_header;
    use crate::io::bam::index::encode_index;
    use crate::io::bam::record::test_support::BlockBuilder;
    use crate::io::bgzf::{compress_block, EOF_MARKER};
    use std::io::Cursor;

    struct Fixture {
        file: Vec<u8>,
        index: BaiIndex,
    }

    /// Header in the first block, all records in the second.
    fn fixture() -> Fixture {
        let records = [
            BlockBuilder::new("early").at(0, 10).cigar(&[(10, Match)]).seq(b"ACGTACGTAC"),
            BlockBuilder::new("hit").at(0, 100).cigar(&[(50, Match)]),
            BlockBuilder::new("spans").at(0, 150).cigar(&[(10, Match), (200, Skip), (10, Match)]),
            BlockBuilder::new("late").at(0, 5000).cigar(&[(10, Match)]),
            BlockBuilder::new("other").at(1, 20).cigar(&[(10, Match)]),
        ];
        let body: Vec<u8> = records.iter().flat_map(|r| r.build_prefixed()).collect();

        let mut file = compress_block(&encode_header("@HD\tVN:1.6\n", &[("1", 10_000), ("2", 10_000)]));
        let records_at = file.len() as u64;
        file.extend(compress_block(&body));
        let eof_at = file.len() as u64;
        file.extend_from_slice(&EOF_MARKER);

        let second_ref: usize = records[..4].iter().map(|r| r.build_prefixed().len()).sum();
        let first = VirtualOffset::new(records_at, 0).as_raw();
        let other = VirtualOffset::new(records_at, second_ref as u16).as_raw();
        let end = VirtualOffset::new(eof_at, 0).as_raw();
        let bytes = encode_index(&[
            (vec![(4681, vec![(first, other)])], vec![first]),
            (vec![(4681, vec![(other, end)])], vec![other]),
        ]);
        Fixture {
            file,
            index: BaiIndex::from_bytes(&bytes).unwrap(),
        }
    }

    fn region(tid: usize, start: u64, end: u64) -> ResolvedRegion {
        ResolvedRegion {
            tid,
            name: (tid + 1).to_string(),
            start,
            end,
        }
    }

    fn names(fx: &Fixture, region: &ResolvedRegion) -> Vec<String> {
        let mut bam = BamReader::new(Cursor::new(fx.file.clone())).unwrap();
        let mut seen = Vec::new();
        let count = bam
            .fetch(&fx.index, region, |rec, header| {
                assert_eq!(header.reference_count(), 2);
                seen.push(rec.read_name_lossy());
                Ok(())
            })
            .unwrap();
        assert_eq!(count as usize, seen.len());
        seen
    }

    #[test]
    fn test_sequential_records() {
        let fx = fixture();
        let mut bam = BamReader::new(Cursor::new(fx.file)).unwrap();
        assert_eq!(bam.header().text, "@HD\tVN:1.6\n");

        let records: Vec<_> = bam.records().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].view().query_sequence(false).unwrap(), b"ACGTACGTAC");
        assert_eq!(records[4].view().reference_id(), 1);
    }

    #[test]
    fn test_fetch_overlapping_only() {
        let fx = fixture();
        assert_eq!(names(&fx, &region(0, 120, 200)), ["hit", "spans"]);
        assert_eq!(names(&fx, &region(0, 300, 400)), ["spans"]);
        assert_eq!(names(&fx, &region(0, 0, 10_000)), ["early", "hit", "spans", "late"]);
    }

    #[test]
    fn test_fetch_second_reference() {
        let fx = fixture();
        assert_eq!(names(&fx, &region(1, 0, 100)), ["other"]);
    }

    #[test]
    fn test_fetch_empty_window() {
        let fx = fixture();
        assert!(names(&fx, &region(0, 1000, 2000)).is_empty());
        assert!(names(&fx, &region(5, 0, 100)).is_empty());
    }

    #[test]
    fn test_consumer_error_propagates() {
        let fx = fixture();
        let mut bam = BamReader::new(Cursor::new(fx.file)).unwrap();
        let err = bam
            .fetch(&fx.index, &region(0, 0, 10_000), |_, _| {
                Err(FetchError::Unsupported("stop".into()))
            })
            .unwrap_err();
        assert!(matches!(err, FetchError::Unsupported(_)));
    }

    #[test]
    fn test_truncated_record() {
        let mut body = BlockBuilder::new("cut").at(0, 1).build_prefixed();
        body.truncate(body.len() - 3);
        let mut file = compress_block(&encode_header("", &[("1", 100)]));
        file.extend(compress_block(&body));
        let mut bam = BamReader::new(Cursor::new(file)).unwrap();
        let err = bam.records().next().unwrap().unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_oversized_block_size() {
        let mut body = i32::MAX.to_le_bytes().to_vec();
        body.extend_from_slice(&[0; 40]);
        let mut file = compress_block(&encode_header("", &[("1", 100)]));
        file.extend(compress_block(&body));
        file.extend_from_slice(&EOF_MARKER);
        let mut bam = BamReader::new(Cursor::new(file)).unwrap();
        let mut buf = Vec::new();
        match bam.read_record_into(&mut buf) {
            Err(DecodeError::UnexpectedEof { expected, actual, .. }) => {
                assert_eq!(expected, i32::MAX as usize);
                assert_eq!(actual, 40);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(buf.capacity() < 1 << 20);
    }

    #[test]
    fn test_not_bam() {
        let file = compress_block(b"CRAM\x03\x00");
        assert!(BamReader::new(Cursor::new(file)).is_err());
    }
}

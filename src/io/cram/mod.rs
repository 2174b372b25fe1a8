//! CRAM reader.
//!
//! Reads the file definition, the SAM header container and, through a
//! CRAI index, the slices covering a region. Slice headers carry the MD5
//! of the reference bases the slice was compressed against;
//! [`CramReader::fetch`] makes sure each of those references is in the
//! [`ReferenceCache`] before decoding anything, then rebuilds every
//! overlapping record as a BAM record block and hands it to the consumer
//! as a [`RecordView`].
//!
//! ```no_run
//! use bamfetch::io::cram::{CraiIndex, CramReader};
//!
//! # fn main() -> bamfetch::Result<()> {
//! let mut cram = CramReader::from_path("sample.cram")?;
//! let index = CraiIndex::from_bytes(&std::fs::read("sample.cram.crai")?)?;
//! for slice in cram.slices(&index, 0, 0, 1_000_000)? {
//!     println!("{}:{}+{} {:?}", slice.reference_id, slice.start, slice.span, slice.required_reference());
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod container;
pub mod crai;
pub mod itf8;
pub mod records;
pub mod reference;

pub use codec::{CompressionHeader, DataSeries, Encoding, PreservationMap, SliceBlocks, SubstitutionMatrix};
pub use container::{
    content_type, read_file_header, Block, ContainerHeader, FileDefinition, SliceHeader, CRAM_MAGIC,
};
pub use crai::{CraiEntry, CraiIndex};
pub use itf8::{read_itf8, read_ltf8, write_itf8, write_ltf8};
pub use records::{decode_slice, CramRecord, Feature, ReferenceBases, SliceContext};
pub use reference::{ReferenceCache, DEFAULT_REFERENCE_URL};

use crate::error::Result;
use crate::io::bam::error::DecodeError;
use crate::io::bam::{Header, RecordView, ResolvedRegion};
use log::debug;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// One uncompressed block of a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceBlock {
    /// See [`content_type`]
    pub content_type: u8,
    /// External block id
    pub content_id: i32,
    /// Uncompressed content
    pub data: Vec<u8>,
}

/// A slice read into memory with the compression header of its container.
#[derive(Debug, Clone)]
pub struct LoadedSlice {
    /// Compression header of the container
    pub compression: CompressionHeader,
    /// Slice header
    pub header: SliceHeader,
    /// Core and external blocks, uncompressed
    pub blocks: Vec<SliceBlock>,
}

impl LoadedSlice {
    fn block(&self, content_id: i32) -> Option<&SliceBlock> {
        self.blocks
            .iter()
            .find(|b| b.content_type == content_type::EXTERNAL && b.content_id == content_id)
    }

    /// Decode every record of the slice; `read_groups` are the `@RG` ids
    /// of the file header.
    pub fn decode(&self, read_groups: &[String]) -> Result<Vec<CramRecord>> {
        let core = self
            .blocks
            .iter()
            .find(|b| b.content_type == content_type::CORE)
            .map_or(&[][..], |b| &b.data[..]);
        let external: HashMap<i32, &[u8]> = self
            .blocks
            .iter()
            .filter(|b| b.content_type == content_type::EXTERNAL)
            .map(|b| (b.content_id, &b.data[..]))
            .collect();
        let ctx = SliceContext {
            compression: &self.compression,
            slice: &self.header,
            read_groups,
        };
        decode_slice(&ctx, &mut SliceBlocks::new(core, external))
    }
}

/// Where the reference bases of a slice come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReferenceSource {
    Cached { md5: String, offset: u64 },
    Embedded { content_id: i32, offset: u64 },
    NotRequired,
    Unknown,
}

/// Values of `tag` on every header line of type `record`, in order.
fn header_values(header: &Header, record: &str, tag: &str) -> Vec<Option<String>> {
    header
        .text
        .lines()
        .filter(|line| line.split('\t').next() == Some(record))
        .map(|line| {
            line.split('\t')
                .skip(1)
                .find_map(|field| field.strip_prefix(tag)?.strip_prefix(':'))
                .map(str::to_string)
        })
        .collect()
}

/// CRAM reader.
pub struct CramReader<R> {
    reader: R,
    definition: FileDefinition,
    header: Header,
    read_groups: Vec<String>,
}

impl<R: Read> CramReader<R> {
    /// Read the file definition and SAM header.
    pub fn new(mut reader: R) -> Result<Self> {
        let definition = FileDefinition::read(&mut reader)?;
        let header = read_file_header(&mut reader, &definition)?;
        let read_groups = header_values(&header, "@RG", "ID")
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        Ok(Self {
            reader,
            definition,
            header,
            read_groups,
        })
    }

    /// Header, with the reference table taken from `@SQ` lines.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Format version and file id.
    pub fn definition(&self) -> &FileDefinition {
        &self.definition
    }

    /// `M5` checksum of reference `tid` declared in the header.
    pub fn sequence_md5(&self, tid: usize) -> Option<String> {
        let names = header_values(&self.header, "@SQ", "SN");
        header_values(&self.header, "@SQ", "M5")
            .into_iter()
            .zip(names)
            .filter_map(|(md5, name)| name.map(|_| md5))
            .nth(tid)
            .flatten()
            .map(|md5| md5.to_ascii_lowercase())
    }
}

impl CramReader<BufReader<File>> {
    /// Open a local CRAM file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> CramReader<R> {
    /// Seek to an indexed container and read its header.
    fn seek_container(&mut self, entry: &CraiEntry) -> Result<ContainerHeader> {
        self.reader.seek(SeekFrom::Start(entry.container_offset))?;
        Ok(ContainerHeader::read(&mut self.reader, &self.definition)?
            .ok_or_else(|| DecodeError::eof("container at indexed offset", 1, 0))?)
    }

    fn read_slice_block(&mut self, entry: &CraiEntry) -> Result<SliceHeader> {
        let block = Block::read(&mut self.reader, &self.definition)?;
        if block.content_type != content_type::SLICE_HEADER {
            return Err(DecodeError::invalid(format!(
                "block at container {} + {} has content type {}, expected a slice header",
                entry.container_offset, entry.slice_offset, block.content_type
            ))
            .into());
        }
        SliceHeader::parse(&block.decode()?, &self.definition)
    }

    /// Read the header of the slice an index entry points at.
    pub fn slice_header(&mut self, entry: &CraiEntry) -> Result<SliceHeader> {
        let container = self.seek_container(entry)?;
        let slice_offset = i64::try_from(entry.slice_offset)
            .map_err(|_| DecodeError::invalid("slice offset overflows"))?;
        self.reader.seek(SeekFrom::Current(slice_offset))?;

        let slice = self.read_slice_block(entry)?;
        debug!(
            "slice at {}+{} (+{} header bytes): ref {} start {} span {}",
            entry.container_offset, entry.slice_offset, container.header_len, slice.reference_id, slice.start, slice.span
        );
        Ok(slice)
    }

    /// Headers of the slices overlapping `[beg, end)` on reference `tid`.
    pub fn slices(&mut self, index: &CraiIndex, tid: usize, beg: u64, end: u64) -> Result<Vec<SliceHeader>> {
        index
            .query(tid, beg, end)
            .iter()
            .map(|entry| self.slice_header(entry))
            .collect()
    }

    /// Read an indexed slice with its blocks and the compression header
    /// of its container.
    pub fn load_slice(&mut self, entry: &CraiEntry) -> Result<LoadedSlice> {
        let container = self.seek_container(entry)?;
        let first = Block::read(&mut self.reader, &self.definition)?;
        if first.content_type != content_type::COMPRESSION_HEADER {
            return Err(DecodeError::invalid(format!(
                "container at {} starts with content type {}, expected a compression header",
                entry.container_offset, first.content_type
            ))
            .into());
        }
        let compression = CompressionHeader::parse(&first.decode()?)?;

        let slice_at = entry
            .container_offset
            .checked_add(container.header_len)
            .and_then(|at| at.checked_add(entry.slice_offset))
            .ok_or_else(|| DecodeError::invalid("slice offset overflows"))?;
        self.reader.seek(SeekFrom::Start(slice_at))?;
        let header = self.read_slice_block(entry)?;

        let block_count = usize::try_from(header.block_count)
            .map_err(|_| DecodeError::invalid(format!("negative block count {}", header.block_count)))?;
        let mut blocks = Vec::with_capacity(block_count.min(1024));
        for _ in 0..block_count {
            let block = Block::read(&mut self.reader, &self.definition)?;
            blocks.push(SliceBlock {
                content_type: block.content_type,
                content_id: block.content_id,
                data: block.decode()?,
            });
        }
        debug!(
            "loaded slice at {}+{}: {} record(s), {} block(s)",
            entry.container_offset,
            entry.slice_offset,
            header.record_count,
            blocks.len()
        );
        Ok(LoadedSlice {
            compression,
            header,
            blocks,
        })
    }

    fn reference_source(&self, slice: &LoadedSlice, tid: usize) -> ReferenceSource {
        if !slice.compression.preservation.reference_required || slice.header.reference_id == -1 {
            return ReferenceSource::NotRequired;
        }
        let slice_offset = u64::try_from(slice.header.start - 1).unwrap_or(0);
        if slice.header.embedded_reference >= 0 {
            return ReferenceSource::Embedded {
                content_id: slice.header.embedded_reference,
                offset: slice_offset,
            };
        }
        if let Some(md5) = self.sequence_md5(tid) {
            return ReferenceSource::Cached { md5, offset: 0 };
        }
        match slice.header.required_reference() {
            Some(md5) => ReferenceSource::Cached {
                md5,
                offset: slice_offset,
            },
            None => ReferenceSource::Unknown,
        }
    }

    /// Call `consumer` for every record of `region.tid` overlapping
    /// `[region.start, region.end)`, in file order. Returns how many
    /// records were delivered; 0 when no slice overlaps.
    ///
    /// Every external reference the overlapping slices need is checked
    /// before the first record is decoded, so a fetch either fails up
    /// front or delivers all its records.
    ///
    /// # Errors
    ///
    /// - [`FetchError::ReferencePending`](crate::FetchError::ReferencePending)
    ///   or [`FetchError::ReferenceError`](crate::FetchError::ReferenceError)
    ///   for the first reference not in the cache;
    /// - [`FetchError::Unsupported`](crate::FetchError::Unsupported) for
    ///   block codecs and encodings this reader does not implement;
    /// - [`FetchError::Format`](crate::FetchError::Format) for malformed
    ///   containers, blocks or records.
    pub fn fetch<F>(
        &mut self,
        index: &CraiIndex,
        region: &ResolvedRegion,
        cache: &ReferenceCache,
        mut consumer: F,
    ) -> Result<u64>
    where
        F: FnMut(&RecordView<'_>, &Header) -> Result<()>,
    {
        let entries = index.query(region.tid, region.start, region.end);
        debug!(
            "{}:{}-{}: {} slice(s) to decode",
            region.name,
            region.start,
            region.end,
            entries.len()
        );
        if entries.is_empty() {
            return Ok(0);
        }

        let slices = entries
            .iter()
            .map(|entry| self.load_slice(entry))
            .collect::<Result<Vec<_>>>()?;
        let sources: Vec<ReferenceSource> = slices.iter().map(|s| self.reference_source(s, region.tid)).collect();

        let mut required: Vec<&str> = sources
            .iter()
            .filter_map(|source| match source {
                ReferenceSource::Cached { md5, .. } => Some(md5.as_str()),
                _ => None,
            })
            .collect();
        required.sort_unstable();
        required.dedup();
        for md5 in &required {
            cache.require(md5)?;
        }
        let mut sequences: HashMap<&str, Vec<u8>> = HashMap::new();
        for md5 in required {
            sequences.insert(md5, cache.load(md5)?);
        }

        let tid = i32::try_from(region.tid).unwrap_or(i32::MAX);
        let start = region.start as i64;
        let end = region.end as i64;
        let mut delivered = 0;

        for (slice, source) in slices.iter().zip(&sources) {
            let reference = match source {
                ReferenceSource::Cached { md5, offset } => ReferenceBases::Bases {
                    offset: *offset,
                    bases: sequences.get(md5.as_str()).map_or(&[][..], |s| &s[..]),
                },
                ReferenceSource::Embedded { content_id, offset } => ReferenceBases::Bases {
                    offset: *offset,
                    bases: &slice
                        .block(*content_id)
                        .ok_or_else(|| {
                            DecodeError::invalid(format!("embedded reference block {} is missing", content_id))
                        })?
                        .data,
                },
                ReferenceSource::NotRequired => ReferenceBases::NotRequired,
                ReferenceSource::Unknown => ReferenceBases::Unknown,
            };
            let matrix = slice.compression.preservation.substitution_matrix;

            for record in slice.decode(&self.read_groups)? {
                if record.reference_id != tid || record.alignment_start <= 0 {
                    continue;
                }
                let pos = i64::from(record.alignment_start) - 1;
                let span = record.reference_span().max(1) as i64;
                if pos >= end || pos + span <= start {
                    continue;
                }
                let block = record.to_bam(&reference, &matrix)?;
                consumer(&RecordView::parse(&block)?, &self.header)?;
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}

//! CRAM file definition, containers, blocks and slice headers.
//!
//! ```text
//! file definition  "CRAM" major(u8) minor(u8) file_id[20]
//! container        length(i32 LE) ref_id start span n_records (ITF-8)
//!                  record_counter bases (LTF-8) n_blocks (ITF-8)
//!                  n_landmarks landmarks... (ITF-8) crc32 (u32 LE, v3)
//!                  then `length` bytes of blocks
//! block            method(u8) content_type(u8) content_id size raw_size (ITF-8)
//!                  data[size] crc32 (u32 LE, v3)
//! ```
//!
//! Raw, gzip, bzip2 and lzma blocks are inflated. The rANS, arithmetic,
//! fqzcomp and name tokenizer codecs of CRAM 3.1 are reported as
//! unsupported.

use super::itf8::{read_itf8, read_ltf8};
use crate::error::{FetchError, Result};
use crate::io::bam::error::DecodeError;
use crate::io::bam::header::read_declared;
use crate::io::bam::Header;
use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;
use std::io::{self, Read};
use xz2::read::XzDecoder;

/// CRAM magic bytes.
pub const CRAM_MAGIC: &[u8; 4] = b"CRAM";

/// Reference start recorded in the CRAM 3 end-of-file container ("EOF").
const EOF_START: i32 = 0x454F46;

/// Block content types.
pub mod content_type {
    /// SAM header text
    pub const FILE_HEADER: u8 = 0;
    /// Compression header
    pub const COMPRESSION_HEADER: u8 = 1;
    /// Slice header
    pub const SLICE_HEADER: u8 = 2;
    /// External data series
    pub const EXTERNAL: u8 = 4;
    /// Core bit stream
    pub const CORE: u8 = 5;
}

/// Leading 26 bytes of a CRAM file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDefinition {
    /// Major format version
    pub major: u8,
    /// Minor format version
    pub minor: u8,
    /// Free-form file identifier
    pub file_id: [u8; 20],
}

impl FileDefinition {
    /// Read and check the file definition.
    ///
    /// # Errors
    ///
    /// [`FetchError::Format`] on a bad magic, [`FetchError::Unsupported`]
    /// for major versions other than 2 and 3.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; 26];
        reader
            .read_exact(&mut bytes)
            .map_err(|_| DecodeError::eof("CRAM file definition", 26, 0))?;
        if &bytes[..4] != CRAM_MAGIC {
            return Err(DecodeError::InvalidMagic {
                expected: CRAM_MAGIC,
                actual: bytes[..4].to_vec(),
            }
            .into());
        }
        let (major, minor) = (bytes[4], bytes[5]);
        if !matches!(major, 2 | 3) {
            return Err(FetchError::Unsupported(format!(
                "CRAM version {}.{}",
                major, minor
            )));
        }
        let mut file_id = [0u8; 20];
        file_id.copy_from_slice(&bytes[6..]);
        Ok(Self {
            major,
            minor,
            file_id,
        })
    }

    fn has_crc(&self) -> bool {
        self.major >= 3
    }
}

/// Reader adapter that hashes every byte it passes through.
struct CrcReader<'r, R> {
    inner: &'r mut R,
    hasher: crc32fast::Hasher,
    consumed: u64,
}

impl<'r, R: Read> CrcReader<'r, R> {
    fn new(inner: &'r mut R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            consumed: 0,
        }
    }

    /// Read the stored CRC (not hashed) and compare.
    fn verify(self, what: &str) -> Result<u64> {
        let mut stored = [0u8; 4];
        self.inner
            .read_exact(&mut stored)
            .map_err(|_| DecodeError::eof("CRAM CRC32", 4, 0))?;
        let stored = u32::from_le_bytes(stored);
        let computed = self.hasher.finalize();
        if stored != computed {
            return Err(DecodeError::invalid(format!(
                "{} CRC32 mismatch: stored {:08x}, computed {:08x}",
                what, stored, computed
            ))
            .into());
        }
        Ok(self.consumed + 4)
    }
}

impl<R: Read> Read for CrcReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.consumed += n as u64;
        Ok(n)
    }
}

fn non_negative(value: i32, what: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| DecodeError::invalid(format!("negative {}: {}", what, value)).into())
}

/// Container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Bytes of block data following the header
    pub length: i32,
    /// Reference id; -1 unmapped, -2 multiple references
    pub reference_id: i32,
    /// 1-based alignment start
    pub start: i32,
    /// Reference bases covered
    pub span: i32,
    /// Records in the container
    pub record_count: i32,
    /// Index of the first record in the file
    pub record_counter: i64,
    /// Total read bases
    pub bases: i64,
    /// Blocks in the container
    pub block_count: i32,
    /// Slice offsets relative to the end of this header
    pub landmarks: Vec<i32>,
    /// Encoded size of the header itself
    pub header_len: u64,
}

impl ContainerHeader {
    /// Read the next container header. `None` at a clean end of stream.
    pub fn read<R: Read>(reader: &mut R, def: &FileDefinition) -> Result<Option<Self>> {
        let mut crc = CrcReader::new(reader);

        let mut length = [0u8; 4];
        match crate::io::bgzf::read_up_to(&mut crc, &mut length)? {
            0 => return Ok(None),
            4 => {}
            n => return Err(DecodeError::eof("container length", 4, n).into()),
        }
        let length = i32::from_le_bytes(length);

        let reference_id = read_itf8(&mut crc)?;
        let start = read_itf8(&mut crc)?;
        let span = read_itf8(&mut crc)?;
        let record_count = read_itf8(&mut crc)?;
        let (record_counter, bases) = if def.major >= 3 {
            (read_ltf8(&mut crc)?, read_ltf8(&mut crc)?)
        } else {
            (i64::from(read_itf8(&mut crc)?), read_ltf8(&mut crc)?)
        };
        let block_count = read_itf8(&mut crc)?;
        let n_landmarks = non_negative(read_itf8(&mut crc)?, "landmark count")?;
        let landmarks = (0..n_landmarks)
            .map(|_| read_itf8(&mut crc))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let header_len = if def.has_crc() {
            crc.verify("container header")?
        } else {
            crc.consumed
        };

        Ok(Some(Self {
            length,
            reference_id,
            start,
            span,
            record_count,
            record_counter,
            bases,
            block_count,
            landmarks,
            header_len,
        }))
    }

    /// True for the CRAM 3 end-of-file container.
    pub fn is_eof(&self) -> bool {
        self.record_count == 0 && self.reference_id == -1 && self.start == EOF_START
    }
}

/// One block, still compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Compression method; 0 raw, 1 gzip, 2 bzip2, 3 lzma
    pub method: u8,
    /// See [`content_type`]
    pub content_type: u8,
    /// External block id
    pub content_id: i32,
    /// Uncompressed size
    pub raw_size: usize,
    /// Stored bytes
    pub data: Vec<u8>,
}

impl Block {
    /// Read one block.
    pub fn read<R: Read>(reader: &mut R, def: &FileDefinition) -> Result<Self> {
        let mut crc = CrcReader::new(reader);
        let mut head = [0u8; 2];
        crc.read_exact(&mut head)
            .map_err(|_| DecodeError::eof("block header", 2, 0))?;
        let content_id = read_itf8(&mut crc)?;
        let size = non_negative(read_itf8(&mut crc)?, "block size")?;
        let raw_size = non_negative(read_itf8(&mut crc)?, "block raw size")?;

        let data = read_declared(&mut crc, size, "block data")?;
        if def.has_crc() {
            crc.verify("block")?;
        }

        Ok(Self {
            method: head[0],
            content_type: head[1],
            content_id,
            raw_size,
            data,
        })
    }

    /// Uncompressed content.
    pub fn decode(&self) -> Result<Vec<u8>> {
        let out = match self.method {
            0 => self.data.clone(),
            1 => inflate(MultiGzDecoder::new(&self.data[..]), "gzip", self.raw_size)?,
            2 => inflate(BzDecoder::new(&self.data[..]), "bzip2", self.raw_size)?,
            3 => inflate(XzDecoder::new(&self.data[..]), "lzma", self.raw_size)?,
            other => {
                return Err(FetchError::Unsupported(format!(
                    "CRAM block compression method {} ({})",
                    other,
                    method_name(other)
                )))
            }
        };
        if out.len() != self.raw_size {
            return Err(DecodeError::invalid(format!(
                "block decoded to {} bytes, header says {}",
                out.len(),
                self.raw_size
            ))
            .into());
        }
        Ok(out)
    }
}

fn inflate<R: Read>(decoder: R, method: &str, raw_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(raw_size.min(1 << 24));
    decoder
        .take(raw_size as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::invalid(format!("{} block: {}", method, e)))?;
    Ok(out)
}

fn method_name(method: u8) -> &'static str {
    match method {
        4 => "rANS 4x8",
        5 => "rANS 4x16",
        6 => "adaptive arithmetic",
        7 => "fqzcomp",
        8 => "name tokenizer",
        _ => "unknown",
    }
}

/// Slice header, decoded from a block of type [`content_type::SLICE_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    /// Reference id; -1 unmapped, -2 multiple references
    pub reference_id: i32,
    /// 1-based alignment start
    pub start: i32,
    /// Reference bases covered
    pub span: i32,
    /// Records in the slice
    pub record_count: i32,
    /// Index of the first record in the file
    pub record_counter: i64,
    /// Blocks following the slice header
    pub block_count: i32,
    /// Content ids of those blocks
    pub content_ids: Vec<i32>,
    /// Content id of an embedded reference block, -1 if none
    pub embedded_reference: i32,
    /// MD5 of the covered reference bases, zero if not recorded
    pub reference_md5: [u8; 16],
}

impl SliceHeader {
    /// Decode from the uncompressed block content.
    pub fn parse(data: &[u8], def: &FileDefinition) -> Result<Self> {
        let mut r = data;
        let reference_id = read_itf8(&mut r)?;
        let start = read_itf8(&mut r)?;
        let span = read_itf8(&mut r)?;
        let record_count = read_itf8(&mut r)?;
        let record_counter = if def.major >= 3 {
            read_ltf8(&mut r)?
        } else {
            i64::from(read_itf8(&mut r)?)
        };
        let block_count = read_itf8(&mut r)?;
        let n_ids = non_negative(read_itf8(&mut r)?, "content id count")?;
        let content_ids = (0..n_ids)
            .map(|_| read_itf8(&mut r))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let embedded_reference = read_itf8(&mut r)?;

        let mut reference_md5 = [0u8; 16];
        r.read_exact(&mut reference_md5)
            .map_err(|_| DecodeError::eof("slice reference MD5", 16, r.len()))?;

        Ok(Self {
            reference_id,
            start,
            span,
            record_count,
            record_counter,
            block_count,
            content_ids,
            embedded_reference,
            reference_md5,
        })
    }

    /// Lowercase hex MD5 of the external reference this slice needs, or
    /// `None` if it needs none (no checksum recorded, or the reference is
    /// embedded in the slice).
    pub fn required_reference(&self) -> Option<String> {
        if self.embedded_reference >= 0 || self.reference_md5 == [0u8; 16] {
            return None;
        }
        Some(self.reference_md5.iter().map(|b| format!("{:02x}", b)).collect())
    }
}

/// Read the SAM header held by the first container.
pub fn read_file_header<R: Read>(reader: &mut R, def: &FileDefinition) -> Result<Header> {
    let container = ContainerHeader::read(reader, def)?
        .ok_or_else(|| DecodeError::eof("CRAM header container", 1, 0))?;
    let body = read_declared(reader, non_negative(container.length, "container length")?, "CRAM header container")?;

    let block = Block::read(&mut &body[..], def)?;
    if block.content_type != content_type::FILE_HEADER {
        return Err(DecodeError::invalid(format!(
            "first CRAM block has content type {}, expected the file header",
            block.content_type
        ))
        .into());
    }
    let data = block.decode()?;
    if data.len() < 4 {
        return Err(DecodeError::eof("SAM header length", 4, data.len()).into());
    }
    let text_len = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let text_len = non_negative(text_len, "SAM header length")?;
    let text = data
        .get(4..4 + text_len)
        .ok_or_else(|| DecodeError::eof("SAM header text", text_len, data.len() - 4))?;
    let text = String::from_utf8_lossy(text).trim_end_matches('\0').to_string();
    Ok(Header::from_sam_text(text))
}

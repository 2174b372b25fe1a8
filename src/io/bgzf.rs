//! BGZF block reader with virtual-offset seeking.
//!
//! A BGZF file is a series of gzip members, each at most 64 KB, whose
//! header carries a `BC` extra subfield holding the member size minus one.
//! Any byte is addressed by a virtual offset: the compressed offset of
//! its block in the high 48 bits and the offset inside the decompressed
//! block in the low 16 bits.
//!
//! ```text
//! ID1=31 ID2=139 CM=8 FLG=4 MTIME(4) XFL OS XLEN(2)
//! extra: SI1='B' SI2='C' SLEN=2 BSIZE(2)   (other subfields allowed)
//! deflate payload
//! CRC32(4) ISIZE(4)
//! ```
//!
//! An empty member (ISIZE 0) marks end of file; empty members in the
//! middle are skipped.

use flate2::read::DeflateDecoder;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

/// Largest possible BGZF member.
pub const MAX_BLOCK_SIZE: usize = 65536;

const HEADER_LEN: usize = 12;
const FOOTER_LEN: usize = 8;

/// The 28-byte empty block that terminates a BGZF file.
pub const EOF_MARKER: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Position in a BGZF stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Combine a compressed block offset and an in-block offset.
    pub fn new(compressed: u64, uncompressed: u16) -> Self {
        Self((compressed << 16) | u64::from(uncompressed))
    }

    /// Wrap a raw 64-bit value as stored in index files.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw 64-bit value.
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// File offset of the containing block.
    pub fn compressed(self) -> u64 {
        self.0 >> 16
    }

    /// Offset inside the decompressed block.
    pub fn uncompressed(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Debug for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.compressed(), self.uncompressed())
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Fill `buf` as far as the stream allows; returns bytes read.
pub(crate) fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Find BSIZE among the extra subfields.
fn find_bsize(extra: &[u8]) -> Option<u16> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        if extra[pos] == b'B' && extra[pos + 1] == b'C' && slen == 2 && pos + 6 <= extra.len() {
            return Some(u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]));
        }
        pos += 4 + slen;
    }
    None
}

/// Decompressing reader over a BGZF stream.
pub struct BgzfReader<R> {
    inner: R,
    compressed: Vec<u8>,
    block: Vec<u8>,
    block_pos: usize,
    block_offset: u64,
    next_block_offset: u64,
}

impl<R: Read> BgzfReader<R> {
    /// Wrap a stream positioned at the start of a block.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            compressed: Vec::with_capacity(MAX_BLOCK_SIZE),
            block: Vec::with_capacity(MAX_BLOCK_SIZE),
            block_pos: 0,
            block_offset: 0,
            next_block_offset: 0,
        }
    }

    /// Virtual offset of the next byte `read` would return.
    pub fn virtual_position(&self) -> VirtualOffset {
        if self.block_pos >= self.block.len() {
            VirtualOffset::new(self.next_block_offset, 0)
        } else {
            VirtualOffset::new(self.block_offset, self.block_pos as u16)
        }
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Load the next member. Returns `false` at a clean end of stream.
    fn read_block(&mut self) -> io::Result<bool> {
        let mut header = [0u8; HEADER_LEN];
        match read_up_to(&mut self.inner, &mut header)? {
            0 => {
                self.block.clear();
                self.block_pos = 0;
                return Ok(false);
            }
            HEADER_LEN => {}
            n => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("truncated BGZF header at offset {}: {} bytes", self.next_block_offset, n),
                ))
            }
        }

        if header[0] != 31 || header[1] != 139 || header[2] != 8 {
            return Err(invalid(format!(
                "invalid gzip magic at offset {}: [{}, {}, {}]",
                self.next_block_offset, header[0], header[1], header[2]
            )));
        }
        if header[3] & 0x04 == 0 {
            return Err(invalid(format!(
                "gzip member at offset {} has no extra field; not BGZF",
                self.next_block_offset
            )));
        }

        let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
        self.compressed.clear();
        self.compressed.resize(xlen, 0);
        self.inner.read_exact(&mut self.compressed)?;
        let block_size = find_bsize(&self.compressed).map(|b| b as usize + 1).ok_or_else(|| {
            invalid(format!(
                "gzip member at offset {} has no BC subfield; not BGZF",
                self.next_block_offset
            ))
        })?;

        let payload_len = block_size
            .checked_sub(HEADER_LEN + xlen + FOOTER_LEN)
            .ok_or_else(|| invalid(format!("BGZF block size {} too small", block_size)))?;
        self.compressed.resize(payload_len + FOOTER_LEN, 0);
        self.inner.read_exact(&mut self.compressed)?;

        let (payload, footer) = self.compressed.split_at(payload_len);
        let crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let isize = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]) as usize;
        if isize > MAX_BLOCK_SIZE {
            return Err(invalid(format!("BGZF block claims {} bytes", isize)));
        }

        self.block.clear();
        self.block.reserve(isize);
        DeflateDecoder::new(payload).read_to_end(&mut self.block)?;
        if self.block.len() != isize {
            return Err(invalid(format!(
                "BGZF block at offset {} inflated to {} bytes, header says {}",
                self.next_block_offset,
                self.block.len(),
                isize
            )));
        }
        if crc32fast::hash(&self.block) != crc {
            return Err(invalid(format!(
                "CRC mismatch in BGZF block at offset {}",
                self.next_block_offset
            )));
        }

        self.block_offset = self.next_block_offset;
        self.next_block_offset += block_size as u64;
        self.block_pos = 0;
        Ok(true)
    }
}

impl<R: Read + Seek> BgzfReader<R> {
    /// Jump to a virtual offset.
    pub fn seek(&mut self, pos: VirtualOffset) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(pos.compressed()))?;
        self.next_block_offset = pos.compressed();
        self.block.clear();
        self.block_pos = 0;

        let target = pos.uncompressed() as usize;
        if !self.read_block()? {
            if target == 0 {
                return Ok(());
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("seek past end of BGZF stream: {:?}", pos),
            ));
        }
        if target > self.block.len() {
            return Err(invalid(format!(
                "virtual offset {:?} beyond block of {} bytes",
                pos,
                self.block.len()
            )));
        }
        self.block_pos = target;
        Ok(())
    }
}

impl<R: Read> Read for BgzfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.block_pos >= self.block.len() {
            if !self.read_block()? {
                return Ok(0);
            }
        }
        let available = &self.block[self.block_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.block_pos += n;
        Ok(n)
    }
}

#[cfg(test)]
pub(crate) fn compress_block(data: &[u8]) -> Vec<u8> {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
    deflate.write_all(data).unwrap();
    let deflated = deflate.finish().unwrap();

    let mut block = vec![31, 139, 8, 4, 0, 0, 0, 0, 0, 255, 6, 0, b'B', b'C', 2, 0, 0, 0];
    block.extend_from_slice(&deflated);
    block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());
    let bsize = (block.len() - 1) as u16;
    block[16..18].copy_from_slice(&bsize.to_le_bytes());
    block
}

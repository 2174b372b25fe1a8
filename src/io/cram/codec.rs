//! Compression header and data series codecs.
//!
//! A container's compression header says, for every data series (`BF`
//! flags, `RL` read lengths, `FC` feature codes, ...) and every tag, how
//! its values are stored in the slice blocks:
//!
//! ```text
//! preservation map   size count { key[2] value }...
//! data series map    size count { key[2] encoding }...
//! tag encoding map   size count { tag_id(ITF-8) encoding }...
//! encoding           id(ITF-8) param_size(ITF-8) params[param_size]
//! ```
//!
//! Values live either in the core block, read bit by bit (Huffman, Beta,
//! Gamma), or in an external block named by its content id (External,
//! ByteArrayStop). [`SliceBlocks`] holds the read position in all of
//! them while the records of one slice are decoded.

use super::itf8::read_itf8;
use crate::error::{FetchError, Result};
use crate::io::bam::error::DecodeError;
use log::debug;
use std::collections::HashMap;
use std::fmt;

/// CRAM data series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSeries {
    /// BAM bit flags
    BF,
    /// CRAM bit flags
    CF,
    /// Reference id, multi-reference slices only
    RI,
    /// Read length
    RL,
    /// Alignment start
    AP,
    /// Read group index
    RG,
    /// Read name
    RN,
    /// Next mate bit flags
    MF,
    /// Next fragment reference id
    NS,
    /// Next mate alignment start
    NP,
    /// Template size
    TS,
    /// Distance to the next fragment in the slice
    NF,
    /// Tag line index
    TL,
    /// Number of read features
    FN,
    /// Read feature code
    FC,
    /// Read feature position
    FP,
    /// Deletion length
    DL,
    /// Stretch of bases
    BB,
    /// Stretch of quality scores
    QQ,
    /// Base substitution code
    BS,
    /// Inserted bases
    IN,
    /// Reference skip length
    RS,
    /// Padding length
    PD,
    /// Hard clip length
    HC,
    /// Soft clipped bases
    SC,
    /// Mapping quality
    MQ,
    /// Base
    BA,
    /// Quality score
    QS,
    /// Tag count (CRAM 1.0)
    TC,
    /// Tag name and type (CRAM 1.0)
    TN,
}

impl DataSeries {
    const ALL: [DataSeries; 30] = [
        DataSeries::BF,
        DataSeries::CF,
        DataSeries::RI,
        DataSeries::RL,
        DataSeries::AP,
        DataSeries::RG,
        DataSeries::RN,
        DataSeries::MF,
        DataSeries::NS,
        DataSeries::NP,
        DataSeries::TS,
        DataSeries::NF,
        DataSeries::TL,
        DataSeries::FN,
        DataSeries::FC,
        DataSeries::FP,
        DataSeries::DL,
        DataSeries::BB,
        DataSeries::QQ,
        DataSeries::BS,
        DataSeries::IN,
        DataSeries::RS,
        DataSeries::PD,
        DataSeries::HC,
        DataSeries::SC,
        DataSeries::MQ,
        DataSeries::BA,
        DataSeries::QS,
        DataSeries::TC,
        DataSeries::TN,
    ];

    /// Look up a two-letter key.
    pub fn from_key(key: [u8; 2]) -> Option<Self> {
        Self::ALL.iter().copied().find(|ds| ds.key() == key)
    }

    /// Two-letter key as stored in the compression header.
    pub fn key(self) -> [u8; 2] {
        let name = format!("{:?}", self);
        let b = name.as_bytes();
        [b[0], b[1]]
    }
}

impl fmt::Display for DataSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// MSB-first reader over the core block.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte: usize,
    bit: u8,
}

impl<'a> BitReader<'a> {
    /// Start at the first bit of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, byte: 0, bit: 0 }
    }

    /// One bit.
    pub fn read_bit(&mut self) -> std::result::Result<u32, DecodeError> {
        let byte = *self
            .data
            .get(self.byte)
            .ok_or_else(|| DecodeError::eof("CRAM core bit stream", 1, 0))?;
        let value = (byte >> (7 - self.bit)) & 1;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.byte += 1;
        }
        Ok(u32::from(value))
    }

    /// `n` bits (at most 32) as an unsigned value.
    pub fn read_bits(&mut self, n: u32) -> std::result::Result<u32, DecodeError> {
        if n > 32 {
            return Err(DecodeError::invalid(format!("{}-bit read from the core block", n)));
        }
        (0..n).try_fold(0u32, |acc, _| Ok(acc.wrapping_shl(1) | self.read_bit()?))
    }
}

/// Read positions in the core block and every external block of a slice.
#[derive(Debug, Clone)]
pub struct SliceBlocks<'a> {
    core: BitReader<'a>,
    external: HashMap<i32, &'a [u8]>,
}

impl<'a> SliceBlocks<'a> {
    /// Blocks of one slice: the core bit stream and external blocks keyed
    /// by content id.
    pub fn new(core: &'a [u8], external: HashMap<i32, &'a [u8]>) -> Self {
        Self {
            core: BitReader::new(core),
            external,
        }
    }

    /// Core block reader.
    pub fn core(&mut self) -> &mut BitReader<'a> {
        &mut self.core
    }

    fn external(&mut self, content_id: i32) -> std::result::Result<&mut &'a [u8], DecodeError> {
        self.external
            .get_mut(&content_id)
            .ok_or_else(|| DecodeError::invalid(format!("slice has no external block {}", content_id)))
    }

    /// Unread bytes of external block `content_id`.
    pub fn remaining(&self, content_id: i32) -> Option<usize> {
        self.external.get(&content_id).map(|b| b.len())
    }

    /// One ITF-8 integer from an external block.
    pub fn read_itf8(&mut self, content_id: i32) -> std::result::Result<i32, DecodeError> {
        read_itf8(self.external(content_id)?)
    }

    /// One byte from an external block.
    pub fn read_byte(&mut self, content_id: i32) -> std::result::Result<u8, DecodeError> {
        let block = self.external(content_id)?;
        let data: &'a [u8] = *block;
        let (&first, rest) = data
            .split_first()
            .ok_or_else(|| DecodeError::eof("external block byte", 1, 0))?;
        *block = rest;
        Ok(first)
    }

    /// `n` bytes from an external block.
    pub fn read_bytes(&mut self, content_id: i32, n: usize) -> std::result::Result<Vec<u8>, DecodeError> {
        let block = self.external(content_id)?;
        let data: &'a [u8] = *block;
        if data.len() < n {
            return Err(DecodeError::eof("external block bytes", n, data.len()));
        }
        let (head, tail) = data.split_at(n);
        *block = tail;
        Ok(head.to_vec())
    }

    /// Bytes up to (not including) `stop`, consuming the stop byte.
    pub fn read_until(&mut self, content_id: i32, stop: u8) -> std::result::Result<Vec<u8>, DecodeError> {
        let block = self.external(content_id)?;
        let data: &'a [u8] = *block;
        let end = data
            .iter()
            .position(|&b| b == stop)
            .ok_or_else(|| DecodeError::eof("stop-terminated byte array", data.len() + 1, data.len()))?;
        *block = &data[end + 1..];
        Ok(data[..end].to_vec())
    }
}

/// One canonical Huffman code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HuffmanCode {
    symbol: i32,
    len: u32,
    code: u32,
}

/// Canonical Huffman table, codes ordered by length then symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Huffman {
    codes: Vec<HuffmanCode>,
}

impl Huffman {
    /// Build the canonical codes for `alphabet` with the given bit lengths.
    pub fn new(alphabet: &[i32], bit_lengths: &[u32]) -> std::result::Result<Self, DecodeError> {
        if alphabet.len() != bit_lengths.len() || alphabet.is_empty() {
            return Err(DecodeError::invalid(format!(
                "Huffman table with {} symbols and {} lengths",
                alphabet.len(),
                bit_lengths.len()
            )));
        }
        if let Some(&len) = bit_lengths.iter().find(|&&len| len > 31) {
            return Err(DecodeError::invalid(format!("{}-bit Huffman code", len)));
        }
        let mut codes: Vec<HuffmanCode> = alphabet
            .iter()
            .zip(bit_lengths)
            .map(|(&symbol, &len)| HuffmanCode { symbol, len, code: 0 })
            .collect();
        codes.sort_by_key(|c| (c.len, c.symbol));

        let mut code = 0u32;
        let mut prev_len = codes[0].len;
        for entry in &mut codes {
            code <<= entry.len - prev_len;
            entry.code = code;
            code += 1;
            prev_len = entry.len;
        }
        Ok(Self { codes })
    }

    fn decode(&self, bits: &mut BitReader<'_>) -> std::result::Result<i32, DecodeError> {
        if let [only] = &self.codes[..] {
            if only.len == 0 {
                return Ok(only.symbol);
            }
        }
        let mut code = 0u32;
        let mut len = 0u32;
        for entry in &self.codes {
            while len < entry.len {
                code = (code << 1) | bits.read_bit()?;
                len += 1;
            }
            if entry.code == code {
                return Ok(entry.symbol);
            }
        }
        Err(DecodeError::invalid(format!("no Huffman symbol for {}-bit code {:b}", len, code)))
    }
}

/// How one data series or tag is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// No data
    Null,
    /// Bytes or ITF-8 integers in an external block
    External {
        /// Block content id
        content_id: i32,
    },
    /// Canonical Huffman codes in the core block
    Huffman(Huffman),
    /// Length, then that many values
    ByteArrayLen {
        /// Encoding of the length
        len: Box<Encoding>,
        /// Encoding of each byte
        value: Box<Encoding>,
    },
    /// Bytes up to a stop byte in an external block
    ByteArrayStop {
        /// Terminator
        stop: u8,
        /// Block content id
        content_id: i32,
    },
    /// Fixed-width binary in the core block
    Beta {
        /// Subtracted from the stored value
        offset: i32,
        /// Bits per value
        bits: u32,
    },
    /// Elias gamma in the core block
    Gamma {
        /// Subtracted from the stored value
        offset: i32,
    },
    /// Golomb, Golomb-Rice, sub-exponential and anything newer
    Other {
        /// Encoding id
        id: i32,
    },
}

fn itf8_list(r: &mut &[u8]) -> Result<Vec<i32>> {
    let n = read_itf8(r)?;
    let n = usize::try_from(n).map_err(|_| DecodeError::invalid(format!("negative list length {}", n)))?;
    if n > r.len() {
        return Err(DecodeError::eof("ITF-8 list", n, r.len()).into());
    }
    (0..n).map(|_| read_itf8(r).map_err(FetchError::from)).collect()
}

/// Take `len` bytes off the front of `r`.
fn take<'a>(r: &mut &'a [u8], len: i32, what: &'static str) -> Result<&'a [u8]> {
    let len = usize::try_from(len).map_err(|_| DecodeError::invalid(format!("negative {} size {}", what, len)))?;
    let data: &'a [u8] = *r;
    if data.len() < len {
        return Err(DecodeError::eof(what, len, data.len()).into());
    }
    let (head, tail) = data.split_at(len);
    *r = tail;
    Ok(head)
}

impl Encoding {
    /// Parse `id param_size params` from the front of `r`.
    pub fn parse(r: &mut &[u8]) -> Result<Self> {
        let id = read_itf8(r)?;
        let size = read_itf8(r)?;
        let mut params = take(r, size, "encoding parameters")?;
        let p = &mut params;

        let encoding = match id {
            0 => Encoding::Null,
            1 => Encoding::External {
                content_id: read_itf8(p)?,
            },
            3 => {
                let alphabet = itf8_list(p)?;
                let bit_lengths = itf8_list(p)?
                    .into_iter()
                    .map(|len| u32::try_from(len).map_err(|_| DecodeError::invalid(format!("negative Huffman code length {}", len))))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Encoding::Huffman(Huffman::new(&alphabet, &bit_lengths)?)
            }
            4 => Encoding::ByteArrayLen {
                len: Box::new(Encoding::parse(p)?),
                value: Box::new(Encoding::parse(p)?),
            },
            5 => {
                let params: &[u8] = *p;
                let (&stop, rest) = params
                    .split_first()
                    .ok_or_else(|| DecodeError::eof("ByteArrayStop parameters", 1, 0))?;
                *p = rest;
                Encoding::ByteArrayStop {
                    stop,
                    content_id: read_itf8(p)?,
                }
            }
            6 => {
                let offset = read_itf8(p)?;
                let bits = read_itf8(p)?;
                Encoding::Beta {
                    offset,
                    bits: u32::try_from(bits).map_err(|_| DecodeError::invalid(format!("Beta width {}", bits)))?,
                }
            }
            9 => Encoding::Gamma {
                offset: read_itf8(p)?,
            },
            other => Encoding::Other { id: other },
        };
        Ok(encoding)
    }

    fn name(&self) -> String {
        match self {
            Encoding::Null => "null".to_string(),
            Encoding::External { .. } => "external".to_string(),
            Encoding::Huffman(_) => "Huffman".to_string(),
            Encoding::ByteArrayLen { .. } => "byte array length".to_string(),
            Encoding::ByteArrayStop { .. } => "byte array stop".to_string(),
            Encoding::Beta { .. } => "Beta".to_string(),
            Encoding::Gamma { .. } => "Gamma".to_string(),
            Encoding::Other { id } => format!("encoding {}", id),
        }
    }

    fn unsupported(&self, what: &str) -> FetchError {
        FetchError::Unsupported(format!("CRAM {} for {}", self.name(), what))
    }

    /// Decode one integer.
    pub fn decode_int(&self, blocks: &mut SliceBlocks<'_>) -> Result<i32> {
        match self {
            Encoding::External { content_id } => Ok(blocks.read_itf8(*content_id)?),
            Encoding::Huffman(table) => Ok(table.decode(blocks.core())?),
            Encoding::Beta { offset, bits } => Ok((blocks.core().read_bits(*bits)? as i32).wrapping_sub(*offset)),
            Encoding::Gamma { offset } => {
                let core = blocks.core();
                let mut zeros = 0;
                while core.read_bit()? == 0 {
                    zeros += 1;
                    if zeros > 31 {
                        return Err(DecodeError::invalid("Gamma code longer than 32 bits").into());
                    }
                }
                let value = (1u32 << zeros) | core.read_bits(zeros)?;
                Ok((value as i32).wrapping_sub(*offset))
            }
            other => Err(other.unsupported("integer data")),
        }
    }

    /// Decode one byte.
    pub fn decode_byte(&self, blocks: &mut SliceBlocks<'_>) -> Result<u8> {
        match self {
            Encoding::External { content_id } => Ok(blocks.read_byte(*content_id)?),
            Encoding::Huffman(_) | Encoding::Beta { .. } | Encoding::Gamma { .. } => Ok(self.decode_int(blocks)? as u8),
            other => Err(other.unsupported("byte data")),
        }
    }

    /// Decode exactly `n` single-byte values.
    pub fn decode_byte_run(&self, blocks: &mut SliceBlocks<'_>, n: usize) -> Result<Vec<u8>> {
        match self {
            Encoding::External { content_id } => Ok(blocks.read_bytes(*content_id, n)?),
            _ => (0..n).map(|_| self.decode_byte(blocks)).collect(),
        }
    }

    /// Decode one byte array.
    pub fn decode_bytes(&self, blocks: &mut SliceBlocks<'_>) -> Result<Vec<u8>> {
        match self {
            Encoding::ByteArrayLen { len, value } => {
                let n = len.decode_int(blocks)?;
                let n = usize::try_from(n).map_err(|_| DecodeError::invalid(format!("negative byte array length {}", n)))?;
                value.decode_byte_run(blocks, n)
            }
            Encoding::ByteArrayStop { stop, content_id } => Ok(blocks.read_until(*content_id, *stop)?),
            other => Err(other.unsupported("byte arrays")),
        }
    }
}

/// Base substitution matrix: for each reference base `ACGTN`, the 2-bit
/// code of each of the four other bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubstitutionMatrix([u8; 5]);

impl Default for SubstitutionMatrix {
    fn default() -> Self {
        // codes 0, 1, 2, 3 in alphabetical order
        Self([0x1b; 5])
    }
}

const SUBSTITUTION_BASES: &[u8; 5] = b"ACGTN";

impl SubstitutionMatrix {
    /// Matrix from its 5-byte encoding.
    pub fn new(bytes: [u8; 5]) -> Self {
        Self(bytes)
    }

    /// The read base substituted for `reference` under `code`.
    pub fn base(&self, reference: u8, code: u8) -> u8 {
        let row = SUBSTITUTION_BASES
            .iter()
            .position(|&b| b == reference.to_ascii_uppercase())
            .unwrap_or(4);
        let byte = self.0[row];
        SUBSTITUTION_BASES
            .iter()
            .filter(|&&b| b != SUBSTITUTION_BASES[row])
            .enumerate()
            .find(|(i, _)| (byte >> (6 - 2 * i)) & 0b11 == code)
            .map_or(b'N', |(_, &b)| b)
    }
}

/// A tag as listed in the tag dictionary: key and BAM type code.
pub type TagId = [u8; 3];

/// Integer key of a tag in the tag encoding map.
pub fn tag_key(id: TagId) -> i32 {
    (i32::from(id[0]) << 16) | (i32::from(id[1]) << 8) | i32::from(id[2])
}

/// Container-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservationMap {
    /// Read names are stored (`RN`)
    pub read_names: bool,
    /// Alignment starts are deltas from the previous record (`AP`)
    pub delta_positions: bool,
    /// Decoding needs the reference sequence (`RR`)
    pub reference_required: bool,
    /// `SM`
    pub substitution_matrix: SubstitutionMatrix,
    /// `TD`: the tag lines records point into with `TL`
    pub tag_lines: Vec<Vec<TagId>>,
}

impl Default for PreservationMap {
    fn default() -> Self {
        Self {
            read_names: true,
            delta_positions: true,
            reference_required: true,
            substitution_matrix: SubstitutionMatrix::default(),
            tag_lines: Vec::new(),
        }
    }
}

fn read_bool(r: &mut &[u8], key: &str) -> Result<bool> {
    let data: &[u8] = *r;
    let (&value, rest) = data
        .split_first()
        .ok_or_else(|| DecodeError::eof("preservation map value", 1, 0))?;
    *r = rest;
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DecodeError::invalid(format!("preservation flag {} = {}", key, other)).into()),
    }
}

/// Split the `TD` byte array into NUL-terminated lines of 3-byte ids.
fn parse_tag_lines(mut data: &[u8]) -> Result<Vec<Vec<TagId>>> {
    let mut lines = Vec::new();
    while !data.is_empty() {
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        let line = &data[..end];
        if line.len() % 3 != 0 {
            return Err(DecodeError::invalid(format!("tag dictionary line of {} bytes", line.len())).into());
        }
        lines.push(line.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect());
        data = data.get(end + 1..).unwrap_or(&[]);
    }
    Ok(lines)
}

impl PreservationMap {
    fn parse(r: &mut &[u8]) -> Result<Self> {
        let size = read_itf8(r)?;
        let mut body = take(r, size, "preservation map")?;
        let b = &mut body;
        let count = read_itf8(b)?;

        let mut map = Self::default();
        for _ in 0..count {
            let key = take(b, 2, "preservation map key")?;
            match key {
                b"RN" => map.read_names = read_bool(b, "RN")?,
                b"AP" => map.delta_positions = read_bool(b, "AP")?,
                b"RR" => map.reference_required = read_bool(b, "RR")?,
                b"SM" => {
                    let sm = take(b, 5, "substitution matrix")?;
                    map.substitution_matrix = SubstitutionMatrix::new([sm[0], sm[1], sm[2], sm[3], sm[4]]);
                }
                b"TD" => {
                    let len = read_itf8(b)?;
                    map.tag_lines = parse_tag_lines(take(b, len, "tag dictionary")?)?;
                }
                other => {
                    return Err(DecodeError::invalid(format!(
                        "unknown preservation map key {}",
                        String::from_utf8_lossy(other)
                    ))
                    .into())
                }
            }
        }
        Ok(map)
    }
}

/// Decoded compression header block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressionHeader {
    /// Preservation map
    pub preservation: PreservationMap,
    /// Encoding per data series
    pub series: HashMap<DataSeries, Encoding>,
    /// Encoding per tag, keyed by [`tag_key`]
    pub tags: HashMap<i32, Encoding>,
}

impl CompressionHeader {
    /// Parse the uncompressed content of a compression header block.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = data;
        let preservation = PreservationMap::parse(&mut r)?;

        let size = read_itf8(&mut r)?;
        let mut body = take(&mut r, size, "data series map")?;
        let count = read_itf8(&mut body)?;
        let mut series = HashMap::new();
        for _ in 0..count {
            let key = take(&mut body, 2, "data series key")?;
            let encoding = Encoding::parse(&mut body)?;
            match DataSeries::from_key([key[0], key[1]]) {
                Some(ds) => {
                    series.insert(ds, encoding);
                }
                None => debug!("skipping unknown data series {}", String::from_utf8_lossy(key)),
            }
        }

        let size = read_itf8(&mut r)?;
        let mut body = take(&mut r, size, "tag encoding map")?;
        let count = read_itf8(&mut body)?;
        let mut tags = HashMap::new();
        for _ in 0..count {
            let key = read_itf8(&mut body)?;
            tags.insert(key, Encoding::parse(&mut body)?);
        }

        Ok(Self {
            preservation,
            series,
            tags,
        })
    }

    /// Encoding of data series `ds`.
    pub fn series(&self, ds: DataSeries) -> Result<&Encoding> {
        self.series
            .get(&ds)
            .ok_or_else(|| DecodeError::invalid(format!("compression header has no encoding for {}", ds)).into())
    }

    /// Encoding of tag `id`.
    pub fn tag(&self, id: TagId) -> Result<&Encoding> {
        self.tags.get(&tag_key(id)).ok_or_else(|| {
            DecodeError::invalid(format!(
                "compression header has no encoding for tag {}{}:{}",
                id[0] as char, id[1] as char, id[2] as char
            ))
            .into()
        })
    }
}

//! Synthetic BAM/BAI and CRAM/CRAI files for integration tests.

#![allow(dead_code)]

use bamfetch::io::cram::{write_itf8, write_ltf8};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const CIGAR_OPS: &[u8] = b"MIDNSHP=X";
const SEQ_CODES: &[u8] = b"=ACMGRSVTWYHKDBN";

pub fn bgzf_block(data: &[u8]) -> Vec<u8> {
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

pub fn voffset(compressed: u64, uncompressed: u16) -> u64 {
    compressed << 16 | u64::from(uncompressed)
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// One alignment to write.
#[derive(Debug, Clone)]
pub struct Read {
    pub name: String,
    pub tid: i32,
    pub pos: i32,
    pub flags: u16,
    pub cigar: Vec<(u32, char)>,
    pub seq: Vec<u8>,
    pub qual: Option<Vec<u8>>,
    pub aux: Vec<u8>,
}

impl Read {
    pub fn new(name: &str, tid: i32, pos: i32, cigar: &[(u32, char)]) -> Self {
        Self {
            name: name.to_string(),
            tid,
            pos,
            flags: 0,
            cigar: cigar.to_vec(),
            seq: Vec::new(),
            qual: None,
            aux: Vec::new(),
        }
    }

    pub fn seq(mut self, bases: &[u8]) -> Self {
        self.seq = bases.to_vec();
        self
    }

    pub fn qual(mut self, qual: &[u8]) -> Self {
        self.qual = Some(qual.to_vec());
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Append a `Z` string tag.
    pub fn string_tag(mut self, tag: &str, value: &str) -> Self {
        self.aux.extend_from_slice(tag.as_bytes());
        self.aux.push(b'Z');
        self.aux.extend_from_slice(value.as_bytes());
        self.aux.push(0);
        self
    }

    /// Append an `i` integer tag.
    pub fn int_tag(mut self, tag: &str, value: i32) -> Self {
        self.aux.extend_from_slice(tag.as_bytes());
        self.aux.push(b'i');
        self.aux.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Record with its block_size prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&self.tid.to_le_bytes());
        b.extend_from_slice(&self.pos.to_le_bytes());
        b.push(self.name.len() as u8 + 1);
        b.push(60);
        b.extend_from_slice(&0u16.to_le_bytes());
        b.extend_from_slice(&(self.cigar.len() as u16).to_le_bytes());
        b.extend_from_slice(&self.flags.to_le_bytes());
        b.extend_from_slice(&(self.seq.len() as i32).to_le_bytes());
        b.extend_from_slice(&(-1i32).to_le_bytes());
        b.extend_from_slice(&(-1i32).to_le_bytes());
        b.extend_from_slice(&0i32.to_le_bytes());
        b.extend_from_slice(self.name.as_bytes());
        b.push(0);
        for &(len, op) in &self.cigar {
            let code = CIGAR_OPS.iter().position(|&c| c == op as u8).unwrap() as u32;
            b.extend_from_slice(&(len << 4 | code).to_le_bytes());
        }
        let code = |c: u8| SEQ_CODES.iter().position(|&x| x == c).unwrap_or(15) as u8;
        for pair in self.seq.chunks(2) {
            let lo = pair.get(1).map_or(0, |&c| code(c));
            b.push(code(pair[0]) << 4 | lo);
        }
        match &self.qual {
            Some(q) => b.extend_from_slice(q),
            None => b.extend(std::iter::repeat(0xFF).take(self.seq.len())),
        }
        b.extend_from_slice(&self.aux);

        let mut out = (b.len() as i32).to_le_bytes().to_vec();
        out.extend(b);
        out
    }
}

pub fn bam_header(text: &str, references: &[(&str, u32)]) -> Vec<u8> {
    let mut out = b"BAM\x01".to_vec();
    out.extend_from_slice(&(text.len() as i32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(&(references.len() as i32).to_le_bytes());
    for (name, len) in references {
        out.extend_from_slice(&(name.len() as i32 + 1).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(&len.to_le_bytes());
    }
    out
}

/// Build a BAM file and its BAI.
///
/// The header sits in the first BGZF block and each reference's records
/// in a block of their own, indexed under bin 0 with a flat linear index.
/// `reads` must be sorted by reference then position.
pub fn bam_with_index(references: &[(&str, u32)], reads: &[Read]) -> (Vec<u8>, Vec<u8>) {
    let text: String = references
        .iter()
        .map(|(name, len)| format!("@SQ\tSN:{}\tLN:{}\n", name, len))
        .collect();
    let mut file = bgzf_block(&bam_header(&format!("@HD\tVN:1.6\tSO:coordinate\n{}", text), references));

    let mut bai = b"BAI\x01".to_vec();
    bai.extend_from_slice(&(references.len() as i32).to_le_bytes());
    for (tid, (_, len)) in references.iter().enumerate() {
        let body: Vec<u8> = reads
            .iter()
            .filter(|r| r.tid == tid as i32)
            .flat_map(Read::encode)
            .collect();
        if body.is_empty() {
            bai.extend_from_slice(&0i32.to_le_bytes());
            bai.extend_from_slice(&0i32.to_le_bytes());
            continue;
        }
        let start = voffset(file.len() as u64, 0);
        file.extend(bgzf_block(&body));
        let end = voffset(file.len() as u64, 0);

        bai.extend_from_slice(&1i32.to_le_bytes());
        bai.extend_from_slice(&0u32.to_le_bytes());
        bai.extend_from_slice(&1i32.to_le_bytes());
        bai.extend_from_slice(&start.to_le_bytes());
        bai.extend_from_slice(&end.to_le_bytes());

        let windows = (*len as usize >> 14) + 1;
        bai.extend_from_slice(&(windows as i32).to_le_bytes());
        for _ in 0..windows {
            bai.extend_from_slice(&start.to_le_bytes());
        }
    }
    file.extend_from_slice(&BGZF_EOF);
    (file, bai)
}

/// Write `<dir>/<name>` and `<dir>/<name>.bai`; returns the BAM path.
pub fn write_bam(dir: &Path, name: &str, references: &[(&str, u32)], reads: &[Read]) -> PathBuf {
    let (bam, bai) = bam_with_index(references, reads);
    let path = dir.join(name);
    std::fs::write(&path, bam).unwrap();
    std::fs::write(dir.join(format!("{}.bai", name)), bai).unwrap();
    path
}

pub fn cram_block(content_type: u8, data: &[u8]) -> Vec<u8> {
    cram_external(content_type, 0, data)
}

pub fn cram_external(content_type: u8, content_id: i32, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0, content_type];
    write_itf8(&mut out, content_id);
    write_itf8(&mut out, data.len() as i32);
    write_itf8(&mut out, data.len() as i32);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc32fast::hash(&out).to_le_bytes());
    out
}

pub fn cram_container(reference_id: i32, start: i32, span: i32, n_records: i32, landmarks: &[i32], body: &[u8]) -> Vec<u8> {
    let mut out = (body.len() as i32).to_le_bytes().to_vec();
    for v in [reference_id, start, span, n_records] {
        write_itf8(&mut out, v);
    }
    write_ltf8(&mut out, 0);
    write_ltf8(&mut out, 0);
    write_itf8(&mut out, 1 + landmarks.len() as i32);
    write_itf8(&mut out, landmarks.len() as i32);
    for &l in landmarks {
        write_itf8(&mut out, l);
    }
    out.extend_from_slice(&crc32fast::hash(&out).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Data series written by [`CramSlice`], each in the external block
/// numbered by its position here.
const CRAM_SERIES: [&[u8; 2]; 12] = [
    b"BF", b"CF", b"RL", b"AP", b"RG", b"RN", b"TL", b"FN", b"FC", b"FP", b"BS", b"MQ",
];

fn series_block(key: &[u8; 2]) -> i32 {
    CRAM_SERIES.iter().position(|k| *k == key).unwrap() as i32 + 1
}

/// One single-slice container of mapped, untagged reads.
#[derive(Debug, Clone)]
pub struct CramSlice {
    pub reference_id: i32,
    pub start: i32,
    pub span: i32,
    /// All zeroes marks a slice stored without a reference
    pub md5: [u8; 16],
    /// `(name, 1-based start, length, substitutions as (read pos, code))`
    pub reads: Vec<(String, i32, i32, Vec<(i32, u8)>)>,
}

impl CramSlice {
    pub fn new(reference_id: i32, start: i32, span: i32, md5: [u8; 16]) -> Self {
        Self {
            reference_id,
            start,
            span,
            md5,
            reads: Vec::new(),
        }
    }

    pub fn read(mut self, name: &str, start: i32, length: i32) -> Self {
        self.reads.push((name.to_string(), start, length, Vec::new()));
        self
    }

    pub fn substituted(mut self, name: &str, start: i32, length: i32, at: i32, code: u8) -> Self {
        self.reads.push((name.to_string(), start, length, vec![(at, code)]));
        self
    }

    fn compression_header(&self) -> Vec<u8> {
        let mut preservation = Vec::new();
        write_itf8(&mut preservation, 5);
        for (key, value) in [(b"RN", 1), (b"AP", 1), (b"RR", u8::from(self.md5 != [0; 16]))] {
            preservation.extend_from_slice(key);
            preservation.push(value);
        }
        preservation.extend_from_slice(b"SM");
        preservation.extend_from_slice(&[0x1b; 5]);
        preservation.extend_from_slice(b"TD");
        write_itf8(&mut preservation, 1);
        preservation.push(0);

        let mut series = Vec::new();
        write_itf8(&mut series, CRAM_SERIES.len() as i32);
        for key in CRAM_SERIES {
            series.extend_from_slice(key);
            let mut params = Vec::new();
            let id = if key == b"RN" {
                params.push(0);
                5
            } else {
                1
            };
            write_itf8(&mut params, series_block(key));
            write_itf8(&mut series, id);
            write_itf8(&mut series, params.len() as i32);
            series.extend(params);
        }

        let mut tags = Vec::new();
        write_itf8(&mut tags, 0);

        let mut out = Vec::new();
        for section in [preservation, series, tags] {
            write_itf8(&mut out, section.len() as i32);
            out.extend(section);
        }
        out
    }

    fn external_blocks(&self) -> Vec<Vec<u8>> {
        let mut blocks = vec![Vec::new(); CRAM_SERIES.len()];
        let mut int = |key: &[u8; 2], v: i32| write_itf8(&mut blocks[series_block(key) as usize - 1], v);
        let mut prev = self.start;
        let mut names = Vec::new();
        let mut codes = Vec::new();
        for (name, start, length, substitutions) in &self.reads {
            int(b"BF", 0);
            int(b"CF", 0);
            int(b"RL", *length);
            int(b"AP", start - prev);
            prev = *start;
            int(b"RG", -1);
            names.extend_from_slice(name.as_bytes());
            names.push(0);
            int(b"TL", 0);
            int(b"FN", substitutions.len() as i32);
            let mut last = 0;
            for &(at, code) in substitutions {
                codes.push((b'X', code));
                int(b"FP", at - last);
                last = at;
            }
            int(b"MQ", 60);
        }
        blocks[series_block(b"RN") as usize - 1] = names;
        let (fc, bs): (Vec<u8>, Vec<u8>) = codes.into_iter().unzip();
        blocks[series_block(b"FC") as usize - 1] = fc;
        blocks[series_block(b"BS") as usize - 1] = bs;
        blocks
    }

    /// Slice header block followed by the core and external blocks.
    fn slice_blocks(&self) -> Vec<u8> {
        let externals = self.external_blocks();
        let mut header = Vec::new();
        for v in [self.reference_id, self.start, self.span, self.reads.len() as i32] {
            write_itf8(&mut header, v);
        }
        write_ltf8(&mut header, 0);
        write_itf8(&mut header, externals.len() as i32 + 1);
        write_itf8(&mut header, externals.len() as i32 + 1);
        for id in 0..=externals.len() as i32 {
            write_itf8(&mut header, id);
        }
        write_itf8(&mut header, -1);
        header.extend_from_slice(&self.md5);

        let mut out = cram_block(2, &header);
        out.extend(cram_external(5, 0, b""));
        for (i, data) in externals.iter().enumerate() {
            out.extend(cram_external(4, i as i32 + 1, data));
        }
        out
    }
}

/// CRAM 3.0 file with one single-slice container per entry of `slices`,
/// plus its CRAI text.
pub fn cram_with_index(references: &[(&str, u32)], slices: &[CramSlice]) -> (Vec<u8>, String) {
    let mut file = b"CRAM\x03\x00".to_vec();
    file.extend_from_slice(&[b'f'; 20]);

    let text: String = std::iter::once("@HD\tVN:1.6\n".to_string())
        .chain(references.iter().map(|(name, len)| format!("@SQ\tSN:{}\tLN:{}\n", name, len)))
        .collect();
    let mut header = (text.len() as i32).to_le_bytes().to_vec();
    header.extend_from_slice(text.as_bytes());
    file.extend(cram_container(0, 0, 0, 0, &[], &cram_block(0, &header)));

    let mut crai = String::new();
    for slice in slices {
        let compression = cram_block(1, &slice.compression_header());
        let slice_blocks = slice.slice_blocks();
        let mut body = compression.clone();
        body.extend_from_slice(&slice_blocks);

        let container_offset = file.len();
        file.extend(cram_container(
            slice.reference_id,
            slice.start,
            slice.span,
            slice.reads.len() as i32,
            &[compression.len() as i32],
            &body,
        ));
        crai.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            slice.reference_id,
            slice.start,
            slice.span,
            container_offset,
            compression.len(),
            slice_blocks.len()
        ));
    }
    file.extend(cram_container(-1, 0x454F46, 0, 0, &[], &cram_block(1, b"")));
    (file, crai)
}

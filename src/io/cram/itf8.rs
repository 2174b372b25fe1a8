//! ITF-8 and LTF-8 variable-length integers.
//!
//! The count of leading 1 bits in the first byte gives the number of
//! bytes that follow. ITF-8 carries 32 bits in at most 5 bytes (the last
//! one contributing only its low nibble); LTF-8 carries 64 bits in at
//! most 9.

use crate::io::bam::error::DecodeError;
use std::io::Read;

fn read_byte<R: Read>(reader: &mut R, context: &'static str) -> Result<u8, DecodeError> {
    let mut buf = [0u8; 1];
    reader
        .read_exact(&mut buf)
        .map_err(|_| DecodeError::eof(context, 1, 0))?;
    Ok(buf[0])
}

/// Decode one ITF-8 integer.
pub fn read_itf8<R: Read>(reader: &mut R) -> Result<i32, DecodeError> {
    let first = read_byte(reader, "ITF-8 integer")?;
    let extra = (first.leading_ones() as usize).min(4);
    if extra == 0 {
        return Ok(i32::from(first));
    }

    let mut rest = [0u8; 4];
    reader
        .read_exact(&mut rest[..extra])
        .map_err(|_| DecodeError::eof("ITF-8 integer", extra + 1, 1))?;

    let value = if extra == 4 {
        (u32::from(first & 0x0F) << 28)
            | (u32::from(rest[0]) << 20)
            | (u32::from(rest[1]) << 12)
            | (u32::from(rest[2]) << 4)
            | u32::from(rest[3] & 0x0F)
    } else {
        let head = u32::from(first & (0xFF >> (extra + 1)));
        rest[..extra]
            .iter()
            .fold(head, |acc, &b| (acc << 8) | u32::from(b))
    };
    Ok(value as i32)
}

/// Decode one LTF-8 integer.
pub fn read_ltf8<R: Read>(reader: &mut R) -> Result<i64, DecodeError> {
    let first = read_byte(reader, "LTF-8 integer")?;
    let extra = first.leading_ones() as usize;
    if extra == 0 {
        return Ok(i64::from(first));
    }

    let mut rest = [0u8; 8];
    reader
        .read_exact(&mut rest[..extra])
        .map_err(|_| DecodeError::eof("LTF-8 integer", extra + 1, 1))?;

    let head = if extra >= 7 {
        0
    } else {
        u64::from(first & (0xFF >> (extra + 1)))
    };
    let value = rest[..extra]
        .iter()
        .fold(head, |acc, &b| (acc << 8) | u64::from(b));
    Ok(value as i64)
}

/// Append the ITF-8 encoding of `value`.
pub fn write_itf8(out: &mut Vec<u8>, value: i32) {
    let v = value as u32;
    if v < 0x80 {
        out.push(v as u8);
    } else if v < 0x4000 {
        out.extend_from_slice(&[0x80 | (v >> 8) as u8, v as u8]);
    } else if v < 0x20_0000 {
        out.extend_from_slice(&[0xC0 | (v >> 16) as u8, (v >> 8) as u8, v as u8]);
    } else if v < 0x1000_0000 {
        out.extend_from_slice(&[0xE0 | (v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]);
    } else {
        out.extend_from_slice(&[
            0xF0 | ((v >> 28) as u8 & 0x0F),
            (v >> 20) as u8,
            (v >> 12) as u8,
            (v >> 4) as u8,
            v as u8 & 0x0F,
        ]);
    }
}

/// Append the LTF-8 encoding of `value`.
pub fn write_ltf8(out: &mut Vec<u8>, value: i64) {
    let v = value as u64;
    for extra in 0..8u32 {
        if v < 1u64 << (7 * (extra + 1)) {
            let prefix = !(0xFFu8 >> extra);
            let bytes = v.to_be_bytes();
            let body = &bytes[7 - extra as usize..];
            out.push(prefix | body[0]);
            out.extend_from_slice(&body[1..]);
            return;
        }
    }
    out.push(0xFF);
    out.extend_from_slice(&v.to_be_bytes());
}

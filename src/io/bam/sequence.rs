//! 4-bit packed sequence decoding.
//!
//! Two bases per byte, high nibble first. Each nibble indexes
//! `=ACMGRSVTWYHKDBN`. An odd-length sequence leaves the final low
//! nibble unused.

use super::error::DecodeError;

/// Nibble to ASCII base table.
pub const SEQ_LOOKUP: [u8; 16] = *b"=ACMGRSVTWYHKDBN";

/// Decode `length` bases from a packed buffer.
///
/// # Errors
///
/// [`DecodeError::UnexpectedEof`] if `data` holds fewer than
/// `ceil(length / 2)` bytes.
///
/// # Example
///
/// ```
/// use bamfetch::io::bam::sequence::decode_sequence;
///
/// // 0x12 packs 'A' (1) then 'C' (2)
/// assert_eq!(decode_sequence(&[0x12, 0x80], 3).unwrap(), b"ACT");
/// ```
pub fn decode_sequence(data: &[u8], length: usize) -> Result<Vec<u8>, DecodeError> {
    let needed = length.div_ceil(2);
    if data.len() < needed {
        return Err(DecodeError::eof("packed sequence", needed, data.len()));
    }

    let mut bases = Vec::with_capacity(length);
    for &byte in &data[..length / 2] {
        bases.push(SEQ_LOOKUP[(byte >> 4) as usize]);
        bases.push(SEQ_LOOKUP[(byte & 0x0F) as usize]);
    }
    if length % 2 == 1 {
        bases.push(SEQ_LOOKUP[(data[length / 2] >> 4) as usize]);
    }
    Ok(bases)
}

/// IUPAC complement of one base. Unknown bytes map to `N`.
pub fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'M' => b'K',
        b'K' => b'M',
        b'R' => b'Y',
        b'Y' => b'R',
        b'V' => b'B',
        b'B' => b'V',
        b'H' => b'D',
        b'D' => b'H',
        b'S' | b'W' | b'N' | b'=' => base,
        b'a' => b't',
        b't' => b'a',
        b'c' => b'g',
        b'g' => b'c',
        b'n' => b'n',
        _ => b'N',
    }
}

/// Reverse-complement a sequence in place.
pub fn reverse_complement(bases: &mut [u8]) {
    bases.reverse();
    for base in bases.iter_mut() {
        *base = complement(*base);
    }
}

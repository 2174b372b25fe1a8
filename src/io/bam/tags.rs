//! Auxiliary tag stream.
//!
//! The tail of every BAM record is a run of typed fields with no length
//! prefix of their own:
//!
//! - 2 bytes: key (e.g. `NM`)
//! - 1 byte: type code
//! - value, whose width depends on the type code
//!
//! | type        | width                                  |
//! |-------------|----------------------------------------|
//! | `A` `C` `c` | 1                                      |
//! | `S` `s`     | 2                                      |
//! | `I` `i` `f` | 4                                      |
//! | `d`         | 8                                      |
//! | `Z` `H`     | up to and including a NUL byte         |
//! | `B`         | subtype byte, `u32` count, count × width |
//!
//! A wrong width silently shifts every following field, so [`AuxCursor`]
//! rejects unknown type codes and bounds-checks every advance instead of
//! trusting the stream.

use super::error::DecodeError;
use std::fmt;

/// Decoded value of one auxiliary field. String payloads borrow the record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuxValue<'a> {
    /// `A`: printable character
    Char(u8),
    /// `C`
    UInt8(u8),
    /// `c`
    Int8(i8),
    /// `S`
    UInt16(u16),
    /// `s`
    Int16(i16),
    /// `I`
    UInt32(u32),
    /// `i`
    Int32(i32),
    /// `f`
    Float(f32),
    /// `d`
    Double(f64),
    /// `Z`: text without the NUL terminator
    String(&'a [u8]),
    /// `H`: hex digits without the NUL terminator
    Hex(&'a [u8]),
    /// `B`: typed numeric array
    Array(AuxArray<'a>),
}

impl AuxValue<'_> {
    /// Integer value of any integral type, widened.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            AuxValue::UInt8(v) => Some(v.into()),
            AuxValue::Int8(v) => Some(v.into()),
            AuxValue::UInt16(v) => Some(v.into()),
            AuxValue::Int16(v) => Some(v.into()),
            AuxValue::UInt32(v) => Some(v.into()),
            AuxValue::Int32(v) => Some(v.into()),
            _ => None,
        }
    }
}

impl fmt::Display for AuxValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuxValue::Char(c) => write!(f, "{}", *c as char),
            AuxValue::UInt8(v) => write!(f, "{}", v),
            AuxValue::Int8(v) => write!(f, "{}", v),
            AuxValue::UInt16(v) => write!(f, "{}", v),
            AuxValue::Int16(v) => write!(f, "{}", v),
            AuxValue::UInt32(v) => write!(f, "{}", v),
            AuxValue::Int32(v) => write!(f, "{}", v),
            AuxValue::Float(v) => f.write_str(&format_general(f64::from(*v))),
            AuxValue::Double(v) => f.write_str(&format_general(*v)),
            AuxValue::String(s) | AuxValue::Hex(s) => f.write_str(&String::from_utf8_lossy(s)),
            AuxValue::Array(array) => write!(f, "{}", array),
        }
    }
}

/// Raw `B` array payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxArray<'a> {
    subtype: u8,
    count: usize,
    data: &'a [u8],
}

impl<'a> AuxArray<'a> {
    /// Element type code (`c C s S i I f`).
    pub fn subtype(&self) -> u8 {
        self.subtype
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True for a zero-length array.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Elements widened to `f64`, in stream order.
    pub fn values(&self) -> impl Iterator<Item = f64> + 'a {
        let subtype = self.subtype;
        let width = array_width(subtype).unwrap_or(1);
        self.data.chunks_exact(width).map(move |b| match subtype {
            b'c' => f64::from(b[0] as i8),
            b'C' => f64::from(b[0]),
            b's' => f64::from(i16::from_le_bytes([b[0], b[1]])),
            b'S' => f64::from(u16::from_le_bytes([b[0], b[1]])),
            b'i' => f64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            b'I' => f64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            _ => f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        })
    }
}

impl fmt::Display for AuxArray<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subtype as char)?;
        for v in self.values() {
            if self.subtype == b'f' {
                write!(f, ",{}", format_general(v))?;
            } else {
                write!(f, ",{}", v as i64)?;
            }
        }
        Ok(())
    }
}

/// One field of the tag stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuxField<'a> {
    /// Two-character key
    pub key: [u8; 2],
    /// Type code as stored
    pub type_code: u8,
    /// Decoded value
    pub value: AuxValue<'a>,
}

impl AuxField<'_> {
    /// Key as a string slice (lossy for non-ASCII keys).
    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// `KEY:TYPE:VALUE`
impl fmt::Display for AuxField<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}:{}",
            self.key[0] as char, self.key[1] as char, self.type_code as char, self.value
        )
    }
}

/// Forward-only cursor over a record's tag stream.
///
/// Each call to `next` consumes exactly one field. After an error the
/// cursor is exhausted; the stream cannot be resynchronised.
///
/// # Example
///
/// ```
/// use bamfetch::io::bam::tags::AuxCursor;
///
/// let mut stream = b"NMi".to_vec();
/// stream.extend_from_slice(&3i32.to_le_bytes());
/// stream.extend_from_slice(b"RGZgroup1\0");
///
/// let text: Vec<String> = AuxCursor::new(&stream)
///     .map(|field| field.map(|f| f.to_string()))
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(text, ["NM:i:3", "RG:Z:group1"]);
/// ```
#[derive(Debug, Clone)]
pub struct AuxCursor<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> AuxCursor<'a> {
    /// Start at the first field of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            failed: false,
        }
    }

    /// Byte offset of the next field.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Scan forward to the first field with `key`.
    ///
    /// Fields before the match are fully decoded, so a corrupt field ahead
    /// of the target is reported rather than skipped over.
    pub fn find_tag(&mut self, key: [u8; 2]) -> Result<Option<AuxField<'a>>, DecodeError> {
        for field in self.by_ref() {
            let field = field?;
            if field.key == key {
                return Ok(Some(field));
            }
        }
        Ok(None)
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(DecodeError::eof(context, n, remaining));
        }
        let data = self.data;
        let bytes = &data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_cstr(&mut self, key: [u8; 2]) -> Result<&'a [u8], DecodeError> {
        let data = self.data;
        let rest = &data[self.pos..];
        let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            DecodeError::invalid(format!(
                "tag {}{} string runs past the end of the record",
                key[0] as char, key[1] as char
            ))
        })?;
        self.pos += nul + 1;
        Ok(&rest[..nul])
    }

    fn read_field(&mut self) -> Result<AuxField<'a>, DecodeError> {
        let head = self.take(3, "aux tag header")?;
        let key = [head[0], head[1]];
        let type_code = head[2];

        let value = match type_code {
            b'A' => AuxValue::Char(self.take(1, "aux A value")?[0]),
            b'C' => AuxValue::UInt8(self.take(1, "aux C value")?[0]),
            b'c' => AuxValue::Int8(self.take(1, "aux c value")?[0] as i8),
            b'S' => {
                let b = self.take(2, "aux S value")?;
                AuxValue::UInt16(u16::from_le_bytes([b[0], b[1]]))
            }
            b's' => {
                let b = self.take(2, "aux s value")?;
                AuxValue::Int16(i16::from_le_bytes([b[0], b[1]]))
            }
            b'I' => {
                let b = self.take(4, "aux I value")?;
                AuxValue::UInt32(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            b'i' => {
                let b = self.take(4, "aux i value")?;
                AuxValue::Int32(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            b'f' => {
                let b = self.take(4, "aux f value")?;
                AuxValue::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            b'd' => {
                let b = self.take(8, "aux d value")?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                AuxValue::Double(f64::from_le_bytes(raw))
            }
            b'Z' => AuxValue::String(self.take_cstr(key)?),
            b'H' => AuxValue::Hex(self.take_cstr(key)?),
            b'B' => {
                let head = self.take(5, "aux B header")?;
                let subtype = head[0];
                let count = u32::from_le_bytes([head[1], head[2], head[3], head[4]]) as usize;
                let width = array_width(subtype)
                    .ok_or(DecodeError::InvalidArraySubtype { tag: key, subtype })?;
                let len = count.checked_mul(width).ok_or_else(|| {
                    DecodeError::invalid(format!("array count {} overflows", count))
                })?;
                let data = self.take(len, "aux B payload")?;
                AuxValue::Array(AuxArray {
                    subtype,
                    count,
                    data,
                })
            }
            _ => {
                return Err(DecodeError::InvalidTagType {
                    tag: key,
                    type_code,
                })
            }
        };

        Ok(AuxField {
            key,
            type_code,
            value,
        })
    }
}

impl<'a> Iterator for AuxCursor<'a> {
    type Item = Result<AuxField<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        let field = self.read_field();
        self.failed = field.is_err();
        Some(field)
    }
}

fn array_width(subtype: u8) -> Option<usize> {
    match subtype {
        b'c' | b'C' => Some(1),
        b's' | b'S' => Some(2),
        b'i' | b'I' | b'f' => Some(4),
        _ => None,
    }
}

/// Check a lookup key: alphabetic then alphanumeric, exactly two bytes.
pub fn validate_key(key: &str) -> Result<[u8; 2], DecodeError> {
    match key.as_bytes() {
        &[a, b] if a.is_ascii_alphabetic() && b.is_ascii_alphanumeric() => Ok([a, b]),
        _ => Err(DecodeError::InvalidTagKey {
            key: key.to_string(),
        }),
    }
}

/// Look up `key` and format its value so it fits a `capacity`-byte text
/// buffer with its terminator: at most `capacity - 1` bytes are kept.
///
/// Returns `Ok(None)` when the stream has no such tag.
pub fn tag_string(data: &[u8], key: &str, capacity: usize) -> Result<Option<String>, DecodeError> {
    let key = validate_key(key)?;
    let found = AuxCursor::new(data).find_tag(key)?;
    Ok(found.map(|field| truncate(field.value.to_string(), capacity)))
}

/// Render the whole stream as tab-separated `KEY:TYPE:VALUE` fields.
pub fn aux_text(data: &[u8]) -> Result<String, DecodeError> {
    let mut out = String::new();
    for field in AuxCursor::new(data) {
        if !out.is_empty() {
            out.push('\t');
        }
        out.push_str(&field?.to_string());
    }
    Ok(out)
}

fn truncate(mut s: String, capacity: usize) -> String {
    let limit = capacity.saturating_sub(1);
    if s.len() > limit {
        let mut cut = limit;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

/// Shortest-form float rendering in the style of C's `%g`:
/// six significant digits, trailing zeros dropped, exponent form below
/// 1e-4 or from 1e6 upward.
pub fn format_general(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let sci = format!("{:.5e}", v);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if !(-4..6).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", strip_fraction_zeros(mantissa), sign, exp.abs())
    } else {
        let precision = (5 - exp) as usize;
        strip_fraction_zeros(&format!("{:.*}", precision, v)).to_string()
    }
}

fn strip_fraction_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(key: &[u8; 2], type_code: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = key.to_vec();
        out.push(type_code);
        out.extend_from_slice(payload);
        out
    }

    fn sample_stream() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(field(b"XA", b'A', b"Q"));
        data.extend(field(b"XC", b'C', &[200]));
        data.extend(field(b"Xc", b'c', &[0xFE]));
        data.extend(field(b"XS", b'S', &60000u16.to_le_bytes()));
        data.extend(field(b"Xs", b's', &(-300i16).to_le_bytes()));
        data.extend(field(b"XI", b'I', &4_000_000_000u32.to_le_bytes()));
        data.extend(field(b"NM", b'i', &3i32.to_le_bytes()));
        data.extend(field(b"Xf", b'f', &1.5f32.to_le_bytes()));
        data.extend(field(b"Xd", b'd', &0.000_012_5f64.to_le_bytes()));
        data.extend(field(b"RG", b'Z', b"sample-1\0"));
        data.extend(field(b"XH", b'H', b"1AE3\0"));
        data
    }

    #[test]
    fn test_enumerate_all_types() {
        let text = aux_text(&sample_stream()).unwrap();
        let fields: Vec<&str> = text.split('\t').collect();
        assert_eq!(
            fields,
            [
                "XA:A:Q",
                "XC:C:200",
                "Xc:c:-2",
                "XS:S:60000",
                "Xs:s:-300",
                "XI:I:4000000000",
                "NM:i:3",
                "Xf:f:1.5",
                "Xd:d:1.25e-05",
                "RG:Z:sample-1",
                "XH:H:1AE3",
            ]
        );
    }

    #[test]
    fn test_find_and_missing() {
        let data = sample_stream();
        assert_eq!(tag_string(&data, "NM", 64).unwrap().as_deref(), Some("3"));
        assert_eq!(tag_string(&data, "ZZ", 64).unwrap(), None);
        assert_eq!(tag_string(&[], "NM", 64).unwrap(), None);
    }

    #[test]
    fn test_find_truncates_to_capacity() {
        let data = sample_stream();
        // room for the terminator is kept
        assert_eq!(tag_string(&data, "RG", 5).unwrap().as_deref(), Some("samp"));
        assert_eq!(tag_string(&data, "RG", 9).unwrap().as_deref(), Some("sample-1"));
        assert_eq!(tag_string(&data, "RG", 8).unwrap().as_deref(), Some("sample-"));
        assert_eq!(tag_string(&data, "RG", 1).unwrap().as_deref(), Some(""));
        assert_eq!(tag_string(&data, "RG", 0).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_invalid_lookup_key() {
        for key in ["1A", "N", "NMX", "N-"] {
            assert!(matches!(
                tag_string(&sample_stream(), key, 8),
                Err(DecodeError::InvalidTagKey { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_type_code_is_fenced() {
        let mut data = field(b"XX", b'q', &[1, 2, 3, 4]);
        data.extend(field(b"NM", b'i', &3i32.to_le_bytes()));
        let err = tag_string(&data, "NM", 8).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidTagType {
                tag: [b'X', b'X'],
                type_code: b'q'
            }
        ));
    }

    #[test]
    fn test_truncated_value_fails() {
        let data = field(b"NM", b'i', &[3, 0]);
        assert!(matches!(
            AuxCursor::new(&data).next(),
            Some(Err(DecodeError::UnexpectedEof { .. }))
        ));

        let unterminated = field(b"RG", b'Z', b"abc");
        assert!(aux_text(&unterminated).is_err());

        // fewer than three bytes of trailing garbage
        assert!(aux_text(b"N").is_err());
    }

    #[test]
    fn test_cursor_stops_after_error() {
        let data = field(b"XX", b'?', &[]);
        let mut cursor = AuxCursor::new(&data);
        assert!(cursor.next().unwrap().is_err());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_array_field() {
        let mut payload = vec![b'I'];
        payload.extend_from_slice(&3u32.to_le_bytes());
        for v in [10u32, 20, 30] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        let mut data = field(b"CG", b'B', &payload);
        data.extend(field(b"NM", b'i', &1i32.to_le_bytes()));

        let mut cursor = AuxCursor::new(&data);
        let cg = cursor.next().unwrap().unwrap();
        match cg.value {
            AuxValue::Array(array) => {
                assert_eq!(array.len(), 3);
                assert_eq!(array.values().collect::<Vec<_>>(), [10.0, 20.0, 30.0]);
            }
            other => panic!("expected array, got {:?}", other),
        }
        assert_eq!(cg.to_string(), "CG:B:I,10,20,30");
        assert_eq!(cursor.next().unwrap().unwrap().value.as_i64(), Some(1));
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_array_bad_subtype() {
        let mut payload = vec![b'd'];
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&[0; 8]);
        let data = field(b"XB", b'B', &payload);
        assert!(matches!(
            aux_text(&data),
            Err(DecodeError::InvalidArraySubtype { subtype: b'd', .. })
        ));
    }

    #[test]
    fn test_format_general() {
        assert_eq!(format_general(1.5), "1.5");
        assert_eq!(format_general(100000.0), "100000");
        assert_eq!(format_general(1_000_000.0), "1e+06");
        assert_eq!(format_general(123456789.0), "1.23457e+08");
        assert_eq!(format_general(0.0001), "0.0001");
        assert_eq!(format_general(0.00001), "1e-05");
        assert_eq!(format_general(-2.25), "-2.25");
        assert_eq!(format_general(1.0 / 3.0), "0.333333");
        assert_eq!(format_general(0.0), "0");
        assert_eq!(format_general(999999.5), "1e+06");
    }
}

//! Record codec error types.
//!
//! Every variant here means the bytes on disk do not match the packed
//! encoding the codec assumes. Callers are not expected to recover from
//! these; [`crate::FetchError::is_fatal`] reports them as fatal.

use std::{error, fmt, io};

/// Errors raised while decoding packed alignment data.
///
/// # Example
///
/// ```
/// use bamfetch::io::bam::error::DecodeError;
///
/// fn describe(err: &DecodeError) -> String {
///     match err {
///         DecodeError::InvalidCigarOp { code, .. } => format!("bad CIGAR code {}", code),
///         DecodeError::InvalidTagType { tag, .. } => {
///             format!("bad tag {}{}", tag[0] as char, tag[1] as char)
///         }
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error while pulling record bytes
    Io(io::Error),

    /// CIGAR unit whose low nibble is outside `MIDNSHP=X`
    InvalidCigarOp {
        /// The offending operation code (low nibble)
        code: u32,
        /// The raw 32-bit unit
        unit: u32,
    },

    /// Auxiliary field with a type code outside the known table
    InvalidTagType {
        /// The tag key
        tag: [u8; 2],
        /// The unknown type code
        type_code: u8,
    },

    /// `B` array with an unknown element subtype
    InvalidArraySubtype {
        /// The tag key
        tag: [u8; 2],
        /// The unknown subtype code
        subtype: u8,
    },

    /// Tag key rejected before lookup (must be alpha followed by alnum)
    InvalidTagKey {
        /// The key as supplied
        key: String,
    },

    /// Reference id other than -1 or a non-negative index
    InvalidReferenceId {
        /// The value found
        value: i32,
        /// Which field held it ("read" or "mate")
        field: &'static str,
    },

    /// Not enough bytes left for the field being decoded
    UnexpectedEof {
        /// What was being decoded
        context: &'static str,
        /// Bytes needed
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Wrong magic bytes at the start of a file
    InvalidMagic {
        /// Expected magic
        expected: &'static [u8],
        /// Bytes actually found
        actual: Vec<u8>,
    },

    /// Anything else that breaks the layout
    InvalidData {
        /// Description of the problem
        message: String,
    },
}

impl DecodeError {
    pub(crate) fn eof(context: &'static str, expected: usize, actual: usize) -> Self {
        Self::UnexpectedEof {
            context,
            expected,
            actual,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }
}

impl error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),

            Self::InvalidCigarOp { code, unit } => {
                write!(
                    f,
                    "Invalid CIGAR operation code {} in unit {:#010x} (known: MIDNSHP=X)",
                    code, unit
                )
            }

            Self::InvalidTagType { tag, type_code } => {
                write!(
                    f,
                    "Invalid type code '{}' for tag {}{}",
                    type_code.escape_ascii(),
                    tag[0] as char,
                    tag[1] as char
                )
            }

            Self::InvalidArraySubtype { tag, subtype } => {
                write!(
                    f,
                    "Invalid array subtype '{}' for tag {}{}",
                    subtype.escape_ascii(),
                    tag[0] as char,
                    tag[1] as char
                )
            }

            Self::InvalidTagKey { key } => write!(f, "Invalid tag '{}'", key),

            Self::InvalidReferenceId { value, field } => {
                write!(
                    f,
                    "Invalid {} reference ID: {} (must be -1 or >= 0)",
                    field, value
                )
            }

            Self::UnexpectedEof {
                context,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Truncated {}: need {} bytes, have {}",
                    context, expected, actual
                )
            }

            Self::InvalidMagic { expected, actual } => {
                write!(
                    f,
                    "Invalid magic bytes: expected [{}], got [{}]",
                    expected.escape_ascii(),
                    actual.escape_ascii()
                )
            }

            Self::InvalidData { message } => write!(f, "Invalid data: {}", message),
        }
    }
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DecodeError> for io::Error {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Io(io_err) => io_err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_cigar_op() {
        let err = DecodeError::InvalidCigarOp { code: 9, unit: 0x59 };
        let msg = err.to_string();
        assert!(msg.contains("code 9"));
        assert!(msg.contains("0x00000059"));
    }

    #[test]
    fn test_display_tag_type() {
        let err = DecodeError::InvalidTagType {
            tag: *b"XY",
            type_code: b'q',
        };
        assert_eq!(err.to_string(), "Invalid type code 'q' for tag XY");
    }

    #[test]
    fn test_into_io_error_keeps_kind() {
        let io_err: io::Error = DecodeError::invalid("broken").into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);

        let orig = io::Error::new(io::ErrorKind::UnexpectedEof, "short");
        let back: io::Error = DecodeError::from(orig).into();
        assert_eq!(back.kind(), io::ErrorKind::UnexpectedEof);
    }
}

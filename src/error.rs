//! Error types for bamfetch

use crate::io::bam::error::DecodeError;
use thiserror::Error;

/// Result type alias for bamfetch operations
pub type Result<T> = std::result::Result<T, FetchError>;

/// Hint appended to open failures on network sources
pub const URL_OPEN_HINT: &str =
    ". If you are able to access the URL with your web browser, please try reloading this page.";

/// Hint appended when a local file opens but its header does not parse
pub const HEADER_PARSE_HINT: &str = ": parser error while reading the file header";

/// Error types that can occur while opening, indexing or fetching
#[derive(Debug, Error)]
pub enum FetchError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packed data broke the encoding contract (fatal)
    #[error("Format error: {0}")]
    Format(#[from] DecodeError),

    /// Source could not be opened or its header parsed
    #[error("Failed to open {source_name}{hint}")]
    Open {
        /// Path or URL that failed
        source_name: String,
        /// Trailing explanation, already punctuated
        hint: String,
    },

    /// No usable index next to the source
    #[error("failed to read index file ({extension}) corresponding to {source_name}: {reason}")]
    Index {
        /// Path or URL of the indexed file
        source_name: String,
        /// Index flavour, e.g. ".bai"
        extension: &'static str,
        /// Underlying cause
        reason: String,
    },

    /// Region string could not be parsed
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// Reference download was requested; retry later
    #[error("Cannot find reference {md5}. Downloading from {url}; retry once it is cached")]
    ReferencePending {
        /// Reference checksum
        md5: String,
        /// Where the reference is being fetched from
        url: String,
    },

    /// An earlier reference download failed
    #[error("cannot find reference {md5}. Error: {message}")]
    ReferenceError {
        /// Reference checksum
        md5: String,
        /// Error line recorded by the downloader
        message: String,
    },

    /// Valid input that this crate cannot decode
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Caller-supplied configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error
    #[cfg(feature = "network")]
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP error
    #[cfg(feature = "network")]
    #[error("HTTP error {status}: {url}")]
    Http {
        /// HTTP status code
        status: u16,
        /// URL that failed
        url: String,
    },

    /// Network timeout
    #[cfg(feature = "network")]
    #[error("Network timeout after {seconds}s: {url}")]
    Timeout {
        /// Timeout duration in seconds
        seconds: u64,
        /// URL that timed out
        url: String,
    },
}

impl FetchError {
    /// True for errors the caller may report and move past
    /// (missing index, reference not yet cached or failed to download).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Index { .. } | Self::ReferencePending { .. } | Self::ReferenceError { .. }
        )
    }

    /// True when the data violated the binary encoding.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Format(_))
    }

    pub(crate) fn open(source_name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Open {
            source_name: source_name.into(),
            hint: hint.into(),
        }
    }
}

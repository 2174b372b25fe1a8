//! On-disk reference cache for CRAM decoding.
//!
//! ```text
//! <dir>/<md5>           reference sequence, present once downloaded
//! <dir>/pending/<md5>   download requested; content is the source URL
//! <dir>/error/<md5>     download failed; first line is the reason
//! ```
//!
//! This module only writes request markers. Fetching the sequence and
//! moving it into place is left to an external downloader, which also
//! owns the `error/` markers. Each marker is named by its checksum, so
//! concurrent writers for the same reference write identical files.

use crate::error::{FetchError, Result};
use crate::io::bam::error::DecodeError;
use log::{debug, warn};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Default reference server; `%s` is replaced by the MD5.
pub const DEFAULT_REFERENCE_URL: &str = "https://www.ebi.ac.uk/ena/cram/md5/%s";

const PENDING_DIR: &str = "pending";
const ERROR_DIR: &str = "error";

fn check_md5(md5: &str) -> Result<()> {
    if md5.len() == 32 && md5.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(DecodeError::invalid(format!("'{}' is not an MD5 checksum", md5)).into())
    }
}

/// Reference cache directory plus the URL template downloads come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceCache {
    dir: PathBuf,
    url_template: String,
}

impl ReferenceCache {
    /// Cache rooted at `dir`, using [`DEFAULT_REFERENCE_URL`].
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            url_template: DEFAULT_REFERENCE_URL.to_string(),
        }
    }

    /// Replace the URL template (`%s` stands for the MD5).
    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }

    /// Cache root.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the reference `md5` would be downloaded from.
    pub fn url_for(&self, md5: &str) -> String {
        self.url_template.replace("%s", md5)
    }

    /// Path of the cached sequence.
    pub fn sequence_path(&self, md5: &str) -> PathBuf {
        self.dir.join(md5)
    }

    /// Path of the download request marker.
    pub fn pending_path(&self, md5: &str) -> PathBuf {
        self.dir.join(PENDING_DIR).join(md5)
    }

    /// Path of the download failure marker.
    pub fn error_path(&self, md5: &str) -> PathBuf {
        self.dir.join(ERROR_DIR).join(md5)
    }

    /// True if the sequence is already cached.
    pub fn is_cached(&self, md5: &str) -> bool {
        self.sequence_path(md5).is_file()
    }

    /// Make sure reference `md5` is available.
    ///
    /// # Errors
    ///
    /// - [`FetchError::ReferenceError`] carrying the first line of a
    ///   failure marker left by an earlier download attempt.
    /// - [`FetchError::ReferencePending`] after writing a request marker;
    ///   the caller should retry once the downloader has run.
    /// - [`FetchError::Io`] if the marker cannot be written.
    pub fn require(&self, md5: &str) -> Result<()> {
        check_md5(md5)?;
        if self.is_cached(md5) {
            debug!("reference {} found in {}", md5, self.dir.display());
            return Ok(());
        }

        let error_path = self.error_path(md5);
        if error_path.is_file() {
            let mut message = String::new();
            BufReader::new(fs::File::open(&error_path)?).read_line(&mut message)?;
            let message = message.trim_end().to_string();
            warn!("reference {} previously failed: {}", md5, message);
            return Err(FetchError::ReferenceError {
                md5: md5.to_string(),
                message,
            });
        }

        let url = self.url_for(md5);
        let pending = self.pending_path(md5);
        fs::create_dir_all(self.dir.join(PENDING_DIR))?;
        fs::write(&pending, &url)?;
        warn!("reference {} not cached; requested from {}", md5, url);
        Err(FetchError::ReferencePending {
            md5: md5.to_string(),
            url,
        })
    }

    /// Read a cached sequence: whitespace dropped, bases uppercased.
    pub fn load(&self, md5: &str) -> Result<Vec<u8>> {
        check_md5(md5)?;
        let mut bases = fs::read(self.sequence_path(md5))?;
        bases.retain(|b| !b.is_ascii_whitespace());
        bases.make_ascii_uppercase();
        debug!("loaded reference {}: {} bases", md5, bases.len());
        Ok(bases)
    }
}

//! Where alignment files and their indexes come from.

use crate::error::{FetchError, Result};
use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

#[cfg(feature = "network")]
use crate::io::network::{HttpClient, HttpReader};

/// A seekable byte stream.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Local file or remote URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataSource {
    /// Local file path
    Local(PathBuf),

    /// HTTP/HTTPS URL
    #[cfg(feature = "network")]
    Http(String),
}

/// True if `location` names an HTTP(S) resource.
pub fn is_url(location: &str) -> bool {
    let lower = location.get(..8).unwrap_or(location).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

impl DataSource {
    /// Local file source.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        DataSource::Local(path.as_ref().to_path_buf())
    }

    /// Classify a path-or-URL string.
    ///
    /// # Errors
    ///
    /// [`FetchError::Unsupported`] for URLs when built without the
    /// `network` feature.
    pub fn parse(location: &str) -> Result<Self> {
        if is_url(location) {
            #[cfg(feature = "network")]
            return Ok(DataSource::Http(location.to_string()));
            #[cfg(not(feature = "network"))]
            return Err(FetchError::Unsupported(format!(
                "{} is a URL; enable the `network` feature",
                location
            )));
        }
        Ok(Self::from_path(location))
    }

    /// True for remote sources.
    pub fn is_remote(&self) -> bool {
        match self {
            DataSource::Local(_) => false,
            #[cfg(feature = "network")]
            DataSource::Http(_) => true,
        }
    }

    /// The companion file obtained by appending `extension`
    /// (`a.bam` + `.bai` = `a.bam.bai`). A URL query string stays last.
    pub fn with_suffix(&self, extension: &str) -> Self {
        match self {
            DataSource::Local(path) => {
                let mut name = OsString::from(path.as_os_str());
                name.push(extension);
                DataSource::Local(PathBuf::from(name))
            }
            #[cfg(feature = "network")]
            DataSource::Http(url) => match url.split_once('?') {
                Some((base, query)) => DataSource::Http(format!("{}{}?{}", base, extension, query)),
                None => DataSource::Http(format!("{}{}", url, extension)),
            },
        }
    }

    /// Open for random access with a fresh HTTP client.
    pub fn open(&self) -> Result<Box<dyn ReadSeek + Send>> {
        match self {
            DataSource::Local(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            #[cfg(feature = "network")]
            DataSource::Http(_) => self.open_with(&HttpClient::new()?),
        }
    }

    /// Open for random access, sharing `client`'s range cache.
    #[cfg(feature = "network")]
    pub fn open_with(&self, client: &HttpClient) -> Result<Box<dyn ReadSeek + Send>> {
        match self {
            DataSource::Local(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            DataSource::Http(url) => {
                let reader = HttpReader::with_client(client.clone(), url)?;
                Ok(Box::new(BufReader::new(reader)))
            }
        }
    }

    /// Whole content in memory. Index files are read this way so remote
    /// indexes never touch the working directory.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        match self {
            DataSource::Local(path) => Ok(std::fs::read(path)?),
            #[cfg(feature = "network")]
            DataSource::Http(url) => Ok(HttpClient::new()?.fetch_all(url)?.to_vec()),
        }
    }

    /// [`read_all`](Self::read_all) through a shared client.
    #[cfg(feature = "network")]
    pub fn read_all_with(&self, client: &HttpClient) -> Result<Vec<u8>> {
        match self {
            DataSource::Local(path) => Ok(std::fs::read(path)?),
            DataSource::Http(url) => Ok(client.fetch_all(url)?.to_vec()),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Local(path) => write!(f, "{}", path.display()),
            #[cfg(feature = "network")]
            DataSource::Http(url) => f.write_str(url),
        }
    }
}

impl From<&Path> for DataSource {
    fn from(path: &Path) -> Self {
        Self::from_path(path)
    }
}

impl From<PathBuf> for DataSource {
    fn from(path: PathBuf) -> Self {
        DataSource::Local(path)
    }
}

impl TryFrom<&str> for DataSource {
    type Error = FetchError;

    fn try_from(location: &str) -> Result<Self> {
        Self::parse(location)
    }
}

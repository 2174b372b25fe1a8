//! Remote files over HTTP range requests.
//!
//! [`HttpReader`] presents a URL as a `Read + Seek` stream so the BGZF and
//! CRAM readers can walk a remote file exactly as they walk a local one.
//! Reads are served from fixed, aligned chunks; chunks live in a
//! byte-bounded LRU cache shared by every reader created from the same
//! [`HttpClient`], so the repeated seeks of an index query mostly hit
//! memory.
//!
//! Each range is requested once. A failed request is reported to the
//! caller and never retried here.
//!
//! ```no_run
//! use bamfetch::io::network::{HttpClient, HttpReader};
//! use std::io::{Read, Seek, SeekFrom};
//!
//! # fn main() -> bamfetch::Result<()> {
//! let client = HttpClient::new()?;
//! let mut reader = HttpReader::with_client(client, "https://example.org/sample.bam")?;
//! reader.seek(SeekFrom::Start(1 << 20))?;
//! let mut block = [0u8; 18];
//! reader.read_exact(&mut block)?;
//! # Ok(())
//! # }
//! ```

use crate::error::{FetchError, Result};
use bytes::Bytes;
use log::warn;
use lru::LruCache;
use reqwest::blocking::Client;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default chunk cache size (32 MB).
pub const DEFAULT_CACHE_SIZE: usize = 32 * 1024 * 1024;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default range request size; one maximal BGZF block.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Smallest accepted cache (1 MB).
pub const MIN_CACHE_SIZE: usize = 1024 * 1024;

/// Largest accepted cache (4 GB).
pub const MAX_CACHE_SIZE: usize = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct CacheKey {
    url: String,
    start: u64,
    end: u64,
}

/// LRU cache bounded by the total size of its values.
struct ByteBoundedCache {
    cache: LruCache<CacheKey, Bytes>,
    current_size: usize,
    max_size: usize,
}

impl ByteBoundedCache {
    fn new(max_size: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            current_size: 0,
            max_size,
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<&Bytes> {
        self.cache.get(key)
    }

    fn put(&mut self, key: CacheKey, value: Bytes) {
        let value_size = value.len();
        if value_size > self.max_size {
            return;
        }
        if let Some(old) = self.cache.pop(&key) {
            self.current_size -= old.len();
        }
        while self.current_size + value_size > self.max_size {
            match self.cache.pop_lru() {
                Some((_, evicted)) => self.current_size -= evicted.len(),
                None => break,
            }
        }
        self.current_size += value_size;
        self.cache.push(key, value);
    }

    fn clear(&mut self) {
        self.cache.clear();
        self.current_size = 0;
    }
}

/// Cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Cached ranges
    pub entries: usize,
    /// Bytes held
    pub current_bytes: usize,
    /// Byte limit
    pub max_bytes: usize,
}

/// Blocking HTTP client with a shared range cache. Clones share the
/// connection pool and the cache.
///
/// The cache lock is only held to look up or store a range, never while
/// a request is in flight.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
    cache: Arc<Mutex<ByteBoundedCache>>,
}

impl HttpClient {
    /// Client with the default cache size and timeout.
    pub fn new() -> Result<Self> {
        Self::with_cache_size(DEFAULT_CACHE_SIZE)
    }

    /// Client with a custom cache size in bytes.
    ///
    /// # Errors
    ///
    /// [`FetchError::Config`] when the size is outside
    /// [`MIN_CACHE_SIZE`]..=[`MAX_CACHE_SIZE`].
    pub fn with_cache_size(cache_size_bytes: usize) -> Result<Self> {
        if !(MIN_CACHE_SIZE..=MAX_CACHE_SIZE).contains(&cache_size_bytes) {
            return Err(FetchError::Config(format!(
                "HTTP cache size {} bytes outside {}..={}",
                cache_size_bytes, MIN_CACHE_SIZE, MAX_CACHE_SIZE
            )));
        }
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(format!("bamfetch/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            client,
            timeout: DEFAULT_TIMEOUT,
            cache: Arc::new(Mutex::new(ByteBoundedCache::new(cache_size_bytes))),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ByteBoundedCache> {
        self.cache.lock().unwrap_or_else(|poisoned| {
            warn!("HTTP client lock poisoned; clearing range cache");
            let mut guard = poisoned.into_inner();
            guard.clear();
            guard
        })
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                seconds: self.timeout.as_secs(),
                url: url.to_string(),
            }
        } else {
            FetchError::Network(e.to_string())
        }
    }

    fn fetch_range_once(&self, url: &str, start: u64, end: u64) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .header("Range", format!("bytes={}-{}", start, end - 1))
            .send()
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        match status.as_u16() {
            206 => {}
            200 => {
                return Err(FetchError::Network(format!(
                    "{} ignored the range request (200 instead of 206)",
                    url
                )))
            }
            416 => {
                return Err(FetchError::Network(format!(
                    "range {}-{} is out of bounds for {}",
                    start,
                    end - 1,
                    url
                )))
            }
            code if !status.is_success() => {
                return Err(FetchError::Http {
                    status: code,
                    url: url.to_string(),
                })
            }
            _ => {}
        }

        let bytes = response.bytes().map_err(|e| self.request_error(url, e))?;
        if bytes.len() as u64 > end - start {
            return Err(FetchError::Network(format!(
                "{} returned {} bytes for a {}-byte range",
                url,
                bytes.len(),
                end - start
            )));
        }
        Ok(bytes)
    }

    /// Bytes `[start, end)` of `url`, from cache when possible.
    pub fn fetch_range(&self, url: &str, start: u64, end: u64) -> Result<Bytes> {
        if end <= start {
            return Ok(Bytes::new());
        }
        let key = CacheKey {
            url: url.to_string(),
            start,
            end,
        };
        if let Some(data) = self.lock().get(&key) {
            return Ok(data.clone());
        }
        let data = self.fetch_range_once(url, start, end)?;
        self.lock().put(key, data.clone());
        Ok(data)
    }

    /// `Content-Length` from a HEAD request, if the server sends one.
    pub fn content_length(&self, url: &str) -> Result<Option<u64>> {
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|e| self.request_error(url, e))?;
        if !response.status().is_success() {
            return Err(FetchError::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok()))
    }

    /// Whole body of `url` (used for index files). Not cached.
    pub fn fetch_all(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.request_error(url, e))?;
        if !response.status().is_success() {
            return Err(FetchError::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        response.bytes().map_err(|e| self.request_error(url, e))
    }

    /// Drop all cached ranges.
    pub fn clear_cache(&self) {
        self.lock().clear();
    }

    /// Current cache occupancy.
    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.lock();
        CacheStats {
            entries: cache.cache.len(),
            current_bytes: cache.current_size,
            max_bytes: cache.max_size,
        }
    }

    #[cfg(test)]
    fn seed(&self, url: &str, start: u64, data: &[u8]) {
        let key = CacheKey {
            url: url.to_string(),
            start,
            end: start + data.len() as u64,
        };
        self.lock().put(key, Bytes::copy_from_slice(data));
    }
}

/// `Read + Seek` view of a remote file.
pub struct HttpReader {
    client: HttpClient,
    url: String,
    position: u64,
    total_size: Option<u64>,
    chunk_size: u64,
}

impl HttpReader {
    /// Reader with a fresh client.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_client(HttpClient::new()?, url)
    }

    /// Reader sharing `client`'s cache. Issues a HEAD request, so an
    /// unreachable URL fails here rather than on first read.
    pub fn with_client(client: HttpClient, url: &str) -> Result<Self> {
        let total_size = client.content_length(url)?;
        Ok(Self {
            client,
            url: url.to_string(),
            position: 0,
            total_size,
            chunk_size: DEFAULT_CHUNK_SIZE as u64,
        })
    }

    /// Remote size, if the server reported it.
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    /// Source URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn chunk_bounds(&self, position: u64) -> (u64, u64) {
        let start = position - position % self.chunk_size;
        let end = start + self.chunk_size;
        (start, self.total_size.map_or(end, |total| end.min(total)))
    }
}

impl Read for HttpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.total_size.is_some_and(|total| self.position >= total) {
            return Ok(0);
        }

        let (start, end) = self.chunk_bounds(self.position);
        let data = self
            .client
            .fetch_range(&self.url, start, end)
            .map_err(io::Error::other)?;

        let offset = (self.position - start) as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = (data.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for HttpReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let total = self.total_size.ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::Unsupported,
                        format!("{} has no known length", self.url),
                    )
                })?;
                total.checked_add_signed(delta)
            }
        };
        self.position = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;
        Ok(self.position)
    }
}

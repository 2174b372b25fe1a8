//! Region fetch over BAM and CRAM files.
//!
//! [`RegionFetcher`] opens a local path or URL, detects the container
//! format from its first bytes, loads the companion index and streams the
//! records overlapping a region to a consumer:
//!
//! ```no_run
//! use bamfetch::{FetchOptions, RegionFetcher};
//!
//! # fn main() -> bamfetch::Result<()> {
//! let fetcher = RegionFetcher::new(FetchOptions::new().cache_dir("/var/cache/cram"))?;
//! let mut depth = 0u64;
//! let summary = fetcher.fetch("sample.bam", "chr1:100-200", |record, _header| {
//!     depth += record.target_length()?;
//!     Ok(())
//! })?;
//! println!("{} records on {:?}, {} aligned bases", summary.records, summary.reference, depth);
//! # Ok(())
//! # }
//! ```
//!
//! Every call opens and closes its own file and index handles; nothing
//! is shared between calls except the HTTP range cache.

use crate::error::{FetchError, Result, HEADER_PARSE_HINT, URL_OPEN_HINT};
use crate::io::bam::{list_chroms, BaiIndex, BamReader, ChromEntry, Header, RecordView, RegionQuery, ResolvedRegion};
use crate::io::cram::{CraiIndex, CramReader, ReferenceCache, CRAM_MAGIC, DEFAULT_REFERENCE_URL};
use crate::io::source::{DataSource, ReadSeek};
use log::{debug, warn};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[cfg(feature = "network")]
use crate::io::network::{HttpClient, DEFAULT_CACHE_SIZE};

type Stream = Box<dyn ReadSeek + Send>;

/// Consumer callback: one call per overlapping record.
pub type Consumer<'c> = dyn FnMut(&RecordView<'_>, &Header) -> Result<()> + 'c;

/// Caller configuration. No process-wide state is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    cache_dir: Option<PathBuf>,
    reference_url: String,
    index_path: Option<String>,
    #[cfg(feature = "network")]
    http_cache_size: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cache_dir: None,
            reference_url: DEFAULT_REFERENCE_URL.to_string(),
            index_path: None,
            #[cfg(feature = "network")]
            http_cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl FetchOptions {
    /// Defaults: no reference cache, EBI reference server, sibling index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference cache directory; required for CRAM.
    pub fn cache_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Reference download URL template; `%s` stands for the MD5.
    pub fn reference_url(mut self, template: impl Into<String>) -> Self {
        self.reference_url = template.into();
        self
    }

    /// Explicit index location (path or URL) instead of `<file>.bai` /
    /// `<file>.crai`.
    pub fn index_path(mut self, location: impl Into<String>) -> Self {
        self.index_path = Some(location.into());
        self
    }

    /// HTTP range cache size in bytes.
    #[cfg(feature = "network")]
    pub fn http_cache_size(mut self, bytes: usize) -> Self {
        self.http_cache_size = bytes;
        self
    }

    /// Configured cache directory.
    pub fn cache_dir_path(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    fn reference_cache(&self) -> Result<ReferenceCache> {
        match &self.cache_dir {
            Some(dir) if dir.is_dir() => {
                Ok(ReferenceCache::new(dir).with_url_template(self.reference_url.clone()))
            }
            Some(dir) => Err(FetchError::Config(format!(
                "CRAM cache dir {} must exist for CRAM support",
                dir.display()
            ))),
            None => Err(FetchError::Config(
                "CRAM cache dir (unset) must exist for CRAM support".to_string(),
            )),
        }
    }
}

/// Outcome of one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Reference name as the file spells it; `None` if the region named a
    /// reference the file does not have
    pub reference: Option<String>,
    /// Records delivered to the consumer
    pub records: u64,
}

/// Container format, detected from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// BGZF-compressed BAM
    Bam,
    /// CRAM
    Cram,
}

impl Format {
    /// Classify by magic bytes.
    pub fn detect(prefix: &[u8]) -> Option<Self> {
        if prefix.starts_with(CRAM_MAGIC) {
            Some(Format::Cram)
        } else if prefix.starts_with(&[0x1f, 0x8b]) {
            Some(Format::Bam)
        } else {
            None
        }
    }

    fn index_extension(self) -> &'static str {
        match self {
            Format::Bam => ".bai",
            Format::Cram => ".crai",
        }
    }
}

/// An opened, indexed alignment file.
pub trait AlignmentSource {
    /// Container format.
    fn format(&self) -> Format;

    /// File header.
    fn header(&self) -> &Header;

    /// Deliver records overlapping `region` to `consumer`; returns the
    /// number delivered.
    fn fetch_region(&mut self, region: &ResolvedRegion, consumer: &mut Consumer<'_>) -> Result<u64>;
}

struct BamSource {
    reader: BamReader<Stream>,
    index: BaiIndex,
}

impl AlignmentSource for BamSource {
    fn format(&self) -> Format {
        Format::Bam
    }

    fn header(&self) -> &Header {
        self.reader.header()
    }

    fn fetch_region(&mut self, region: &ResolvedRegion, consumer: &mut Consumer<'_>) -> Result<u64> {
        self.reader.fetch(&self.index, region, |record, header| consumer(record, header))
    }
}

struct CramSource {
    reader: CramReader<Stream>,
    index: CraiIndex,
    options: FetchOptions,
}

impl AlignmentSource for CramSource {
    fn format(&self) -> Format {
        Format::Cram
    }

    fn header(&self) -> &Header {
        self.reader.header()
    }

    fn fetch_region(&mut self, region: &ResolvedRegion, consumer: &mut Consumer<'_>) -> Result<u64> {
        let cache = self.options.reference_cache()?;
        self.reader
            .fetch(&self.index, region, &cache, |record, header| consumer(record, header))
    }
}

/// An opened file before its index is loaded.
enum Unindexed {
    Bam(BamReader<Stream>),
    Cram(CramReader<Stream>),
}

impl Unindexed {
    fn header(&self) -> &Header {
        match self {
            Unindexed::Bam(r) => r.header(),
            Unindexed::Cram(r) => r.header(),
        }
    }

    fn format(&self) -> Format {
        match self {
            Unindexed::Bam(_) => Format::Bam,
            Unindexed::Cram(_) => Format::Cram,
        }
    }
}

/// Opens alignment files and runs region queries against them.
pub struct RegionFetcher {
    options: FetchOptions,
    #[cfg(feature = "network")]
    client: HttpClient,
}

impl RegionFetcher {
    /// Fetcher with the given options.
    pub fn new(options: FetchOptions) -> Result<Self> {
        Ok(Self {
            #[cfg(feature = "network")]
            client: HttpClient::with_cache_size(options.http_cache_size)?,
            options,
        })
    }

    /// Options in use.
    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    fn open_stream(&self, source: &DataSource) -> Result<Stream> {
        #[cfg(feature = "network")]
        let opened = source.open_with(&self.client);
        #[cfg(not(feature = "network"))]
        let opened = source.open();
        opened
    }

    fn read_index(&self, source: &DataSource) -> Result<Vec<u8>> {
        #[cfg(feature = "network")]
        let bytes = source.read_all_with(&self.client);
        #[cfg(not(feature = "network"))]
        let bytes = source.read_all();
        bytes
    }

    fn open_failure(source: &DataSource, reason: impl std::fmt::Display) -> FetchError {
        if source.is_remote() {
            debug!("opening {} failed: {}", source, reason);
            FetchError::open(source.to_string(), URL_OPEN_HINT)
        } else {
            FetchError::open(source.to_string(), format!(": {}", reason))
        }
    }

    fn header_failure(source: &DataSource, reason: impl std::fmt::Display) -> FetchError {
        debug!("header of {} unreadable: {}", source, reason);
        if source.is_remote() {
            FetchError::open(source.to_string(), URL_OPEN_HINT)
        } else {
            FetchError::open(source.to_string(), HEADER_PARSE_HINT)
        }
    }

    fn open_unindexed(&self, source: &DataSource) -> Result<Unindexed> {
        let mut stream = self.open_stream(source).map_err(|e| Self::open_failure(source, e))?;

        let format = sniff_format(&mut stream).map_err(|e| Self::open_failure(source, e))?;

        match format {
            Some(Format::Bam) => BamReader::new(stream)
                .map(Unindexed::Bam)
                .map_err(|e| Self::header_failure(source, e)),
            Some(Format::Cram) => CramReader::new(stream)
                .map(Unindexed::Cram)
                .map_err(|e| match e {
                    FetchError::Unsupported(_) => e,
                    other => Self::header_failure(source, other),
                }),
            None => Err(Self::header_failure(source, "neither BAM nor CRAM")),
        }
    }

    fn index_source(&self, source: &DataSource, format: Format) -> Result<DataSource> {
        match &self.options.index_path {
            Some(location) => DataSource::parse(location),
            None => Ok(source.with_suffix(format.index_extension())),
        }
    }

    /// Open `location` and load its index.
    ///
    /// # Errors
    ///
    /// [`FetchError::Open`] if the file cannot be opened or its header
    /// parsed, [`FetchError::Index`] if the index is missing or bad. A
    /// CRAM file opens without a cache directory; fetching from it then
    /// fails with [`FetchError::Config`].
    pub fn open(&self, location: &str) -> Result<Box<dyn AlignmentSource>> {
        let source = DataSource::parse(location)?;
        let opened = self.open_unindexed(&source)?;
        let format = opened.format();
        let index_source = self.index_source(&source, format)?;
        let index_error = |reason: String| FetchError::Index {
            source_name: source.to_string(),
            extension: format.index_extension(),
            reason,
        };
        let load_index = || {
            self.read_index(&index_source)
                .map_err(|e| index_error(format!("{}: {}", index_source, e)))
        };

        let opened: Box<dyn AlignmentSource> = match opened {
            Unindexed::Bam(reader) => {
                let index = BaiIndex::from_bytes(&load_index()?).map_err(|e| index_error(e.to_string()))?;
                Box::new(BamSource { reader, index })
            }
            Unindexed::Cram(reader) => {
                let index = CraiIndex::from_bytes(&load_index()?).map_err(|e| index_error(e.to_string()))?;
                Box::new(CramSource {
                    reader,
                    index,
                    options: self.options.clone(),
                })
            }
        };
        debug!("opened {} with index {}", source, index_source);
        Ok(opened)
    }

    /// Deliver every record of `location` overlapping `region` to
    /// `consumer`, in index order.
    ///
    /// A region naming a reference the file lacks (after retrying without
    /// a `chr` prefix) yields zero records, not an error. Consumer errors
    /// stop the fetch and are returned unchanged.
    pub fn fetch<F>(&self, location: &str, region: &str, mut consumer: F) -> Result<FetchSummary>
    where
        F: FnMut(&RecordView<'_>, &Header) -> Result<()>,
    {
        let query = RegionQuery::parse(region)?;
        let mut source = self.open(location).map_err(|e| {
            if e.is_recoverable() {
                warn!("{}", e);
            }
            e
        })?;

        let Some(resolved) = query.resolve(source.header()) else {
            debug!("{}: no reference matching '{}'", location, query.name());
            return Ok(FetchSummary::default());
        };
        if resolved.name != query.name() {
            debug!("{}: region '{}' resolved to reference '{}'", location, query, resolved.name);
        }

        let records = source.fetch_region(&resolved, &mut consumer).map_err(|e| {
            if e.is_recoverable() {
                warn!("{}", e);
            }
            e
        })?;
        Ok(FetchSummary {
            reference: Some(resolved.name),
            records,
        })
    }

    /// True if `location` and its index both open. Failures are logged.
    pub fn file_exists(&self, location: &str) -> bool {
        match self.open(location) {
            Ok(_) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    /// Like [`file_exists`](Self::file_exists) but returns the failure.
    pub fn must_exist(&self, location: &str) -> Result<()> {
        self.open(location).map(|_| ())
    }

    /// References declared in the header of `location`; the index is not
    /// needed.
    pub fn chrom_list(&self, location: &str) -> Result<Vec<ChromEntry>> {
        let source = DataSource::parse(location)?;
        let opened = self.open_unindexed(&source)?;
        Ok(list_chroms(Some(opened.header())))
    }
}

/// Read the first bytes of a stream without consuming them.
pub fn sniff_format<R: Read + Seek>(reader: &mut R) -> Result<Option<Format>> {
    let mut magic = [0u8; 4];
    let got = crate::io::bgzf::read_up_to(reader, &mut magic)?;
    reader.seek(SeekFrom::Start(0))?;
    Ok(Format::detect(&magic[..got]))
}

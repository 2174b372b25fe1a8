//! Region queries through `RegionFetcher` on BAM files written to disk.

mod common;

use bamfetch::{FetchError, FetchOptions, RegionFetcher};
use common::{write_bam, Read};
use std::path::Path;

const REFS: &[(&str, u32)] = &[("1", 10_000), ("2", 5_000), ("MT", 16_569)];

fn reads() -> Vec<Read> {
    vec![
        Read::new("before", 0, 50, &[(10, 'M')]),
        Read::new("left_edge", 0, 95, &[(10, 'M')]),
        Read::new("inside", 0, 150, &[(5, 'S'), (20, 'M'), (3, 'S')])
            .seq(b"AAAAACCCCCGGGGGTTTTTACGTAGGG")
            .qual(&[30; 28])
            .string_tag("RG", "lane1")
            .int_tag("NM", 2),
        Read::new("spliced", 0, 180, &[(10, 'M'), (500, 'N'), (10, 'M')]),
        Read::new("after", 0, 300, &[(10, 'M')]),
        Read::new("far", 0, 9000, &[(10, 'M')]),
        Read::new("second", 1, 10, &[(10, 'M')]),
        Read::new("mito", 2, 100, &[(20, 'M')]).flags(0x10),
    ]
}

fn bam_in(dir: &Path) -> String {
    write_bam(dir, "sample.bam", REFS, &reads())
        .to_str()
        .expect("utf-8 temp path")
        .to_string()
}

fn names(fetcher: &RegionFetcher, location: &str, region: &str) -> (Option<String>, Vec<String>) {
    let mut seen = Vec::new();
    let summary = fetcher
        .fetch(location, region, |record, _| {
            seen.push(record.read_name_lossy());
            Ok(())
        })
        .expect("fetch succeeds");
    assert_eq!(summary.records as usize, seen.len());
    (summary.reference, seen)
}

#[test]
fn test_fetch_overlapping_records() {
    let dir = tempfile::tempdir().unwrap();
    let bam = bam_in(dir.path());
    let fetcher = RegionFetcher::new(FetchOptions::new()).unwrap();

    let (reference, seen) = names(&fetcher, &bam, "1:100-200");
    assert_eq!(reference.as_deref(), Some("1"));
    assert_eq!(seen, ["left_edge", "inside", "spliced"]);

    // the intron keeps "spliced" overlapping well past its first block
    let (_, seen) = names(&fetcher, &bam, "1:250-260");
    assert_eq!(seen, ["spliced"]);

    let (_, seen) = names(&fetcher, &bam, "2");
    assert_eq!(seen, ["second"]);
}

#[test]
fn test_chr_prefix_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let bam = bam_in(dir.path());
    let fetcher = RegionFetcher::new(FetchOptions::new()).unwrap();

    let (reference, seen) = names(&fetcher, &bam, "chr1:100-200");
    assert_eq!(reference.as_deref(), Some("1"));
    assert_eq!(seen.len(), 3);

    let (reference, seen) = names(&fetcher, &bam, "chrMT:1-1,000");
    assert_eq!(reference.as_deref(), Some("MT"));
    assert_eq!(seen, ["mito"]);
}

#[test]
fn test_absent_reference_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let bam = bam_in(dir.path());
    let fetcher = RegionFetcher::new(FetchOptions::new()).unwrap();

    let summary = fetcher
        .fetch(&bam, "chrZ:1-100", |_, _| panic!("no record expected"))
        .expect("absent reference is not an error");
    assert_eq!(summary.reference, None);
    assert_eq!(summary.records, 0);
}

#[test]
fn test_record_fields_reach_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let bam = bam_in(dir.path());
    let fetcher = RegionFetcher::new(FetchOptions::new()).unwrap();

    let mut checked = 0;
    fetcher
        .fetch(&bam, "1:151-160", |record, header| {
            if record.read_name() != b"inside" {
                return Ok(());
            }
            assert_eq!(header.reference_name(record.reference_id()), Some("1"));
            assert_eq!(record.cigar_string()?, "5S20M3S");
            let clip = record.soft_clipping()?;
            assert_eq!((clip.low, clip.high, clip.clipped_len), (5, 3, 20));
            assert_eq!(record.query_sequence(false)?, b"AAAAACCCCCGGGGGTTTTTACGTAGGG");
            assert_eq!(record.query_qualities(false), vec![30; 28]);
            assert_eq!(record.tag_string("RG", 64)?.as_deref(), Some("lane1"));
            assert_eq!(record.tag_string("NM", 64)?.as_deref(), Some("2"));
            assert_eq!(record.tag_string("XX", 64)?, None);
            assert_eq!(record.alignment_end()?, 170);
            checked += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(checked, 1);
}

#[test]
fn test_reverse_strand_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_bam(
        dir.path(),
        "rev.bam",
        &[("1", 1_000)],
        &[Read::new("rev", 0, 10, &[(4, 'M')])
            .flags(0x10)
            .seq(b"AACG")
            .qual(&[1, 2, 3, 4])],
    );
    let fetcher = RegionFetcher::new(FetchOptions::new()).unwrap();

    let mut seen = 0;
    fetcher
        .fetch(path.to_str().unwrap(), "1", |record, _| {
            assert!(record.is_reverse_strand());
            assert_eq!(record.query_sequence(false)?, b"AACG");
            assert_eq!(record.query_sequence(true)?, b"CGTT");
            assert_eq!(record.query_qualities(true), vec![4, 3, 2, 1]);
            seen += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(seen, 1);
}

#[test]
fn test_consumer_error_stops_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let bam = bam_in(dir.path());
    let fetcher = RegionFetcher::new(FetchOptions::new()).unwrap();

    let mut calls = 0;
    let err = fetcher
        .fetch(&bam, "1", |_, _| {
            calls += 1;
            Err(FetchError::Config("consumer gave up".into()))
        })
        .unwrap_err();
    assert_eq!(calls, 1);
    assert!(matches!(err, FetchError::Config(ref m) if m == "consumer gave up"));
}

#[test]
fn test_missing_index_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let bam = bam_in(dir.path());
    std::fs::remove_file(format!("{}.bai", bam)).unwrap();
    let fetcher = RegionFetcher::new(FetchOptions::new()).unwrap();

    let err = fetcher.fetch(&bam, "1:1-100", |_, _| Ok(())).unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(err, FetchError::Index { extension: ".bai", .. }));
    assert!(err
        .to_string()
        .starts_with(&format!("failed to read index file (.bai) corresponding to {}", bam)));

    assert!(!fetcher.file_exists(&bam));
    assert!(fetcher.must_exist(&bam).is_err());

    // the header alone is enough to list references
    let chroms = fetcher.chrom_list(&bam).unwrap();
    let listed: Vec<(&str, u32)> = chroms.iter().map(|c| (c.name.as_str(), c.size)).collect();
    assert_eq!(listed, REFS);
}

#[test]
fn test_index_path_override() {
    let dir = tempfile::tempdir().unwrap();
    let bam = bam_in(dir.path());
    let moved = dir.path().join("indexes").join("elsewhere.bai");
    std::fs::create_dir_all(moved.parent().unwrap()).unwrap();
    std::fs::rename(format!("{}.bai", bam), &moved).unwrap();

    let default = RegionFetcher::new(FetchOptions::new()).unwrap();
    assert!(!default.file_exists(&bam));

    let fetcher = RegionFetcher::new(FetchOptions::new().index_path(moved.to_str().unwrap())).unwrap();
    assert!(fetcher.file_exists(&bam));
    let (_, seen) = names(&fetcher, &bam, "chr1:1-60");
    assert_eq!(seen, ["before"]);
}

#[test]
fn test_corrupt_index_is_index_error() {
    let dir = tempfile::tempdir().unwrap();
    let bam = bam_in(dir.path());
    std::fs::write(format!("{}.bai", bam), b"not an index").unwrap();
    let fetcher = RegionFetcher::new(FetchOptions::new()).unwrap();
    assert!(matches!(fetcher.must_exist(&bam), Err(FetchError::Index { .. })));
}

#[test]
fn test_open_source_directly() {
    let dir = tempfile::tempdir().unwrap();
    let bam = bam_in(dir.path());
    let fetcher = RegionFetcher::new(FetchOptions::new()).unwrap();

    let source = fetcher.open(&bam).unwrap();
    assert_eq!(source.format(), bamfetch::Format::Bam);
    assert_eq!(source.header().reference_count(), 3);
    assert!(source.header().text.starts_with("@HD\tVN:1.6"));
}

#[test]
fn test_invalid_region_text() {
    let dir = tempfile::tempdir().unwrap();
    let bam = bam_in(dir.path());
    let fetcher = RegionFetcher::new(FetchOptions::new()).unwrap();
    assert!(matches!(
        fetcher.fetch(&bam, "1:500-100", |_, _| Ok(())),
        Err(FetchError::InvalidRegion(_))
    ));
    assert!(matches!(
        fetcher.fetch(&bam, "   ", |_, _| Ok(())),
        Err(FetchError::InvalidRegion(_))
    ));
}

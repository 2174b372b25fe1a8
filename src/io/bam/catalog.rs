//! Chromosome catalog.
//!
//! Names are reported exactly as the file declares them. A file aligned
//! against an Ensembl-style assembly lists `1`, `MT`, `X`; a UCSC-style
//! one lists `chr1`, `chrM`, `chrX`. [`lookup`] bridges the common case
//! of a `chr`-prefixed query against an unprefixed file.

use super::header::Header;

/// One reference sequence as listed in a file header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChromEntry {
    /// Reference name, not normalized
    pub name: String,
    /// Length in bases
    pub size: u32,
}

/// References in header declaration order; empty without a header.
///
/// # Example
///
/// ```
/// use bamfetch::io::bam::{list_chroms, Header, Reference};
///
/// let header = Header::new(String::new(), vec![Reference::new("1", 1000), Reference::new("MT", 16569)]);
/// let names: Vec<_> = list_chroms(Some(&header)).into_iter().map(|c| c.name).collect();
/// assert_eq!(names, ["1", "MT"]);
/// assert!(list_chroms(None).is_empty());
/// ```
pub fn list_chroms(header: Option<&Header>) -> Vec<ChromEntry> {
    header
        .map(|h| {
            h.references
                .iter()
                .map(|r| ChromEntry {
                    name: r.name.clone(),
                    size: r.length,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Find `name` in the header, retrying without a leading `chr`.
///
/// Returns the reference index and the name that matched.
pub fn lookup<'h>(header: &'h Header, name: &str) -> Option<(usize, &'h str)> {
    let found = header.reference_id(name).or_else(|| {
        name.strip_prefix("chr")
            .filter(|bare| !bare.is_empty())
            .and_then(|bare| header.reference_id(bare))
    })?;
    Some((found, header.references[found].name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bam::header::Reference;

    fn ensembl() -> Header {
        Header::new(
            String::new(),
            vec![
                Reference::new("1", 248_956_422),
                Reference::new("2", 242_193_529),
                Reference::new("MT", 16_569),
            ],
        )
    }

    #[test]
    fn test_declaration_order_preserved() {
        let chroms = list_chroms(Some(&ensembl()));
        assert_eq!(
            chroms,
            vec![
                ChromEntry {
                    name: "1".into(),
                    size: 248_956_422
                },
                ChromEntry {
                    name: "2".into(),
                    size: 242_193_529
                },
                ChromEntry {
                    name: "MT".into(),
                    size: 16_569
                },
            ]
        );
    }

    #[test]
    fn test_lookup_exact_and_stripped() {
        let header = ensembl();
        assert_eq!(lookup(&header, "2"), Some((1, "2")));
        assert_eq!(lookup(&header, "chr1"), Some((0, "1")));
        assert_eq!(lookup(&header, "chrM"), None);
        assert_eq!(lookup(&header, "chr"), None);
        assert_eq!(lookup(&header, "3"), None);
    }

    #[test]
    fn test_lookup_prefers_exact_name() {
        let header = Header::new(
            String::new(),
            vec![Reference::new("1", 10), Reference::new("chr1", 20)],
        );
        assert_eq!(lookup(&header, "chr1"), Some((1, "chr1")));
    }
}

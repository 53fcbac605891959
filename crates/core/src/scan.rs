//! Scan report model and reference extraction.
//!
//! The filesystem walk lives in the CLI crate; everything here operates on
//! file paths and text already in memory so it stays deterministic.

use crate::artifact::{ARTIFACT_VERSION, default_version, unix_epoch};
use crate::canonical::AssetHost;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use time::OffsetDateTime;

/// Content categories admitted by default.
pub const DEFAULT_ALLOWED_SEGMENTS: [&str; 5] = ["blog", "poems", "postcards", "studio", "career"];

/// Files under this directory are always in scope.
const CONTENT_DIR_PREFIX: &str = "content/";

/// Why a reference was not carried into the report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    OutsideScope,
    InvalidUrl,
    ReadFailed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutsideScope => "outside-scope",
            Self::InvalidUrl => "invalid-url",
            Self::ReadFailed => "read-failed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference (or file) that was recorded but not migrated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedReference {
    pub file: String,
    pub url: Option<String>,
    pub reason: SkipReason,
}

/// Scope gate deciding which references are eligible for migration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allowlist {
    /// Directory names that put a file in scope when they appear in its path.
    pub segments: Vec<String>,
    /// Path-after-account prefixes that put a reference in scope.
    pub prefixes: Vec<String>,
    /// Admit everything.
    pub allow_all: bool,
}

impl Default for Allowlist {
    fn default() -> Self {
        Self::new(&[], &[], false)
    }
}

impl Allowlist {
    /// Defaults extended with user-supplied segments and prefixes.
    pub fn new(extra_segments: &[String], extra_prefixes: &[String], allow_all: bool) -> Self {
        let segments: Vec<String> = DEFAULT_ALLOWED_SEGMENTS
            .iter()
            .map(|s| s.to_string())
            .chain(extra_segments.iter().cloned())
            .collect();
        let prefixes = DEFAULT_ALLOWED_SEGMENTS
            .iter()
            .map(|s| format!("{s}/"))
            .chain(extra_prefixes.iter().cloned())
            .collect();
        Self {
            segments,
            prefixes,
            allow_all,
        }
    }

    /// Whether a file path (repo-relative, `/`-separated) is a content file.
    pub fn admits_file(&self, file: &str) -> bool {
        file.starts_with(CONTENT_DIR_PREFIX)
            || self
                .segments
                .iter()
                .any(|segment| file.contains(&format!("/{segment}/")))
    }

    /// Whether an asset path falls under an approved prefix.
    pub fn admits_path(&self, path_after_account: &str) -> bool {
        !path_after_account.is_empty()
            && self
                .prefixes
                .iter()
                .any(|prefix| path_after_account.starts_with(prefix.as_str()))
    }

    pub fn admits(&self, file: &str, path_after_account: &str) -> bool {
        self.allow_all || self.admits_file(file) || self.admits_path(path_after_account)
    }
}

/// Finds asset-host URLs in free text.
#[derive(Clone, Debug)]
pub struct UrlExtractor {
    pattern: Regex,
}

impl UrlExtractor {
    pub fn new(host: &AssetHost) -> crate::Result<Self> {
        let pattern = format!(
            r#"(?:https?:)?//{}(?::\d+)?/{}/[^\s"'()<>]+"#,
            regex::escape(&host.host),
            regex::escape(&host.account)
        );
        let pattern = Regex::new(&pattern)
            .map_err(|e| crate::Error::Config(format!("invalid asset host pattern: {e}")))?;
        Ok(Self { pattern })
    }

    /// Every match, exactly as it appears in the text.
    pub fn extract<'t>(&'t self, text: &'t str) -> impl Iterator<Item = &'t str> + 't {
        self.pattern.find_iter(text).map(|m| m.as_str())
    }

    /// Byte ranges of every match.
    pub fn spans<'t>(&'t self, text: &'t str) -> impl Iterator<Item = Range<usize>> + 't {
        self.pattern.find_iter(text).map(|m| m.range())
    }

    pub fn count(&self, text: &str) -> usize {
        self.pattern.find_iter(text).count()
    }
}

/// One distinct raw URL found by the scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub url: String,
    pub count: u64,
    pub files: Vec<String>,
}

/// `scan.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(with = "time::serde::rfc3339", default = "unix_epoch")]
    pub generated_at: OffsetDateTime,
    #[serde(default)]
    pub allowlist: Allowlist,
    #[serde(default)]
    pub files_scanned: usize,
    #[serde(default)]
    pub urls: Vec<ScanEntry>,
    #[serde(default)]
    pub skipped: Vec<SkippedReference>,
}

impl ScanReport {
    /// Number of skipped references per reason.
    pub fn skip_counts(&self) -> BTreeMap<SkipReason, usize> {
        let mut counts = BTreeMap::new();
        for skipped in &self.skipped {
            *counts.entry(skipped.reason).or_insert(0) += 1;
        }
        counts
    }

    /// Total in-scope occurrences across all files.
    pub fn occurrences(&self) -> u64 {
        self.urls.iter().map(|entry| entry.count).sum()
    }
}

#[derive(Default)]
struct Occurrences {
    count: u64,
    files: BTreeSet<String>,
}

/// Accumulates per-file extraction results into a [`ScanReport`].
pub struct ScanCollector<'a> {
    host: &'a AssetHost,
    extractor: UrlExtractor,
    allowlist: Allowlist,
    files_scanned: usize,
    urls: BTreeMap<String, Occurrences>,
    skipped: Vec<SkippedReference>,
}

impl<'a> ScanCollector<'a> {
    pub fn new(host: &'a AssetHost, allowlist: Allowlist) -> crate::Result<Self> {
        Ok(Self {
            host,
            extractor: UrlExtractor::new(host)?,
            allowlist,
            files_scanned: 0,
            urls: BTreeMap::new(),
            skipped: Vec::new(),
        })
    }

    /// Extract and classify every reference in one file.
    pub fn record_file(&mut self, file: &str, content: &str) {
        self.files_scanned += 1;
        for url in self.extractor.extract(content) {
            let Some(canonical) = self.host.canonicalize(url) else {
                self.skipped.push(SkippedReference {
                    file: file.to_string(),
                    url: Some(url.to_string()),
                    reason: SkipReason::InvalidUrl,
                });
                continue;
            };
            if !self
                .allowlist
                .admits(file, &canonical.asset.path_after_account)
            {
                self.skipped.push(SkippedReference {
                    file: file.to_string(),
                    url: Some(url.to_string()),
                    reason: SkipReason::OutsideScope,
                });
                continue;
            }
            let entry = self.urls.entry(url.to_string()).or_default();
            entry.count += 1;
            entry.files.insert(file.to_string());
        }
    }

    /// A file that could not be read is counted and skipped.
    pub fn record_read_failure(&mut self, file: &str) {
        self.files_scanned += 1;
        self.skipped.push(SkippedReference {
            file: file.to_string(),
            url: None,
            reason: SkipReason::ReadFailed,
        });
    }

    pub fn finish(self, generated_at: OffsetDateTime) -> ScanReport {
        ScanReport {
            version: ARTIFACT_VERSION,
            generated_at,
            allowlist: self.allowlist,
            files_scanned: self.files_scanned,
            urls: self
                .urls
                .into_iter()
                .map(|(url, occurrences)| ScanEntry {
                    url,
                    count: occurrences.count,
                    files: occurrences.files.into_iter().collect(),
                })
                .collect(),
            skipped: self.skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn host() -> AssetHost {
        AssetHost::new("cdn.example", "acct")
    }

    #[test]
    fn test_extracts_urls_as_found() {
        let extractor = UrlExtractor::new(&host()).unwrap();
        let text = r#"<img src="https://cdn.example/acct/a.png?tr=w-10"> ![x](//cdn.example/acct/b c.png)
            url('http://cdn.example/acct/studio/d.webp') https://cdn.example/other/e.png"#;
        let found: Vec<&str> = extractor.extract(text).collect();
        assert_eq!(
            found,
            vec![
                "https://cdn.example/acct/a.png?tr=w-10",
                "//cdn.example/acct/b",
                "http://cdn.example/acct/studio/d.webp",
            ]
        );
        assert_eq!(extractor.count(text), 3);
        let sliced: Vec<&str> = extractor.spans(text).map(|range| &text[range]).collect();
        assert_eq!(sliced, found);
    }

    #[test]
    fn test_host_is_matched_literally() {
        let extractor = UrlExtractor::new(&host()).unwrap();
        assert_eq!(extractor.count("https://cdnxexample/acct/a.png"), 0);
    }

    #[test]
    fn test_explicit_port_is_matched() {
        let extractor = UrlExtractor::new(&host()).unwrap();
        let found: Vec<&str> = extractor
            .extract("see http://cdn.example:8080/acct/a.png and //cdn.example:/acct/b.png")
            .collect();
        assert_eq!(found, vec!["http://cdn.example:8080/acct/a.png"]);
    }

    #[test]
    fn test_allowlist_defaults_and_gates() {
        let allowlist = Allowlist::default();
        assert!(allowlist.admits_file("content/post.md"));
        assert!(allowlist.admits_file("src/routes/blog/+page.svelte"));
        assert!(!allowlist.admits_file("src/lib/header.svelte"));
        assert!(allowlist.admits_path("studio/ink.png"));
        assert!(!allowlist.admits_path("misc/ink.png"));
        assert!(!allowlist.admits("src/lib/header.svelte", "misc/ink.png"));

        let widened = Allowlist::new(&["lib".to_string()], &["misc/".to_string()], false);
        assert!(widened.admits_file("src/lib/header.svelte"));
        assert!(widened.admits_path("misc/ink.png"));
        assert_eq!(widened.segments.len(), DEFAULT_ALLOWED_SEGMENTS.len() + 1);

        let all = Allowlist::new(&[], &[], true);
        assert!(all.admits("anything.txt", ""));
    }

    #[test]
    fn test_collector_aggregates_and_sorts() {
        let host = host();
        let mut collector = ScanCollector::new(&host, Allowlist::default()).unwrap();
        collector.record_file(
            "content/b.md",
            "https://cdn.example/acct/z.png https://cdn.example/acct/a.png https://cdn.example/acct/z.png",
        );
        collector.record_file("content/a.md", "https://cdn.example/acct/z.png");
        collector.record_file("src/lib/nav.ts", "https://cdn.example/acct/misc/q.png");
        collector.record_file("content/c.md", "https://cdn.example/acct/../escape.png");
        collector.record_read_failure("content/locked.md");

        let report = collector.finish(OffsetDateTime::UNIX_EPOCH);
        assert_eq!(report.files_scanned, 5);
        assert_eq!(
            report.urls,
            vec![
                ScanEntry {
                    url: "https://cdn.example/acct/a.png".to_string(),
                    count: 1,
                    files: vec!["content/b.md".to_string()],
                },
                ScanEntry {
                    url: "https://cdn.example/acct/z.png".to_string(),
                    count: 3,
                    files: vec!["content/a.md".to_string(), "content/b.md".to_string()],
                },
            ]
        );
        assert_eq!(report.occurrences(), 4);

        let counts = report.skip_counts();
        assert_eq!(counts.get(&SkipReason::OutsideScope), Some(&1));
        assert_eq!(counts.get(&SkipReason::InvalidUrl), Some(&1));
        assert_eq!(counts.get(&SkipReason::ReadFailed), Some(&1));
        assert_eq!(report.skipped.last().unwrap().url, None);
    }

    #[test]
    fn test_skip_reason_serializes_kebab_case() {
        let skipped = SkippedReference {
            file: "x.md".to_string(),
            url: None,
            reason: SkipReason::OutsideScope,
        };
        let json = serde_json::to_string(&skipped).unwrap();
        assert_eq!(json, r#"{"file":"x.md","url":null,"reason":"outside-scope"}"#);
    }
}

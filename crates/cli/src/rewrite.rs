//! Apply a URL mapping to repository files.

use ferry_core::{Mapping, UrlExtractor};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("replacement failed for {url}: {remaining} mapped URLs remain")]
    Incomplete { url: String, remaining: usize },

    #[error("failed to read file: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write file: {0}")]
    Write(#[source] ferry_core::Error),
}

/// Replacements made (or planned) in one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRewrite {
    pub file: String,
    pub replacements: usize,
}

#[derive(Debug)]
pub struct RewriteFailure {
    pub file: String,
    pub error: RewriteError,
}

/// Outcome of a rewrite run. Shaped the same for dry runs and writes.
#[derive(Debug, Default)]
pub struct RewriteSummary {
    pub files: Vec<FileRewrite>,
    pub failures: Vec<RewriteFailure>,
    pub wrote: bool,
}

impl RewriteSummary {
    pub fn total_replacements(&self) -> usize {
        self.files.iter().map(|f| f.replacements).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Summary lines for stdout.
    pub fn lines(&self) -> Vec<String> {
        if self.files.is_empty() {
            return vec!["ferry: No replacements needed.".to_string()];
        }
        let verb = if self.wrote { "Wrote" } else { "Planned" };
        let mut lines = vec![format!(
            "ferry: {verb} {} replacements across {} files.",
            self.total_replacements(),
            self.files.len()
        )];
        lines.extend(
            self.files
                .iter()
                .map(|f| format!("ferry: {} ({})", f.file, f.replacements)),
        );
        lines
    }
}

/// Replace every mapped URL in `content`.
///
/// Only whole extractor matches are replaced, and only when the match is a
/// mapping key exactly, so a mapped URL never rewrites part of a longer one.
/// Returns the new content and the number of replacements; fails if a
/// mapped URL is still present afterwards.
pub fn rewrite_content(
    content: &str,
    extractor: &UrlExtractor,
    mapping: &Mapping,
) -> Result<(String, usize), RewriteError> {
    let mut updated = String::with_capacity(content.len());
    let mut replacements = 0;
    let mut cursor = 0;

    for span in extractor.spans(content) {
        let Some(new) = mapping.entries.get(&content[span.clone()]) else {
            continue;
        };
        updated.push_str(&content[cursor..span.start]);
        updated.push_str(new);
        cursor = span.end;
        replacements += 1;
    }
    updated.push_str(&content[cursor..]);

    {
        let mut leftovers = extractor
            .extract(&updated)
            .filter(|url| mapping.entries.contains_key(*url));
        if let Some(url) = leftovers.next() {
            return Err(RewriteError::Incomplete {
                url: url.to_string(),
                remaining: 1 + leftovers.count(),
            });
        }
    }
    Ok((updated, replacements))
}

fn rewrite_file(
    root: &Path,
    file: &str,
    extractor: &UrlExtractor,
    mapping: &Mapping,
    write: bool,
) -> Result<usize, RewriteError> {
    let path = root.join(file);
    let original = std::fs::read_to_string(&path).map_err(RewriteError::Read)?;
    let (updated, replacements) = rewrite_content(&original, extractor, mapping)?;
    if write && replacements > 0 {
        ferry_core::artifact::write_atomic(&path, updated.as_bytes())
            .map_err(RewriteError::Write)?;
        debug!(file = %file, replacements, "rewrote file");
    }
    Ok(replacements)
}

/// Rewrite `files` (relative to `root`). Without `write` nothing is touched
/// on disk. A failing file is reported and the rest are still processed.
#[instrument(
    skip(root, files, extractor, mapping),
    fields(files = files.len(), entries = mapping.len())
)]
pub fn rewrite_files(
    root: &Path,
    files: &[String],
    extractor: &UrlExtractor,
    mapping: &Mapping,
    write: bool,
) -> RewriteSummary {
    let mut summary = RewriteSummary {
        wrote: write,
        ..RewriteSummary::default()
    };
    for file in files {
        match rewrite_file(root, file, extractor, mapping, write) {
            Ok(0) => {}
            Ok(replacements) => summary.files.push(FileRewrite {
                file: file.clone(),
                replacements,
            }),
            Err(error) => {
                warn!(file = %file, error = %error, "rewrite failed");
                summary.failures.push(RewriteFailure {
                    file: file.clone(),
                    error,
                });
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::AssetHost;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use time::OffsetDateTime;

    const A_OLD: &str = "https://cdn.example/acct/a.png";
    const A_NEW: &str = "https://public.example/a.png";

    fn extractor() -> UrlExtractor {
        UrlExtractor::new(&AssetHost::new("cdn.example", "acct")).unwrap()
    }

    fn mapping(entries: &[(&str, &str)]) -> Mapping {
        Mapping {
            version: 1,
            generated_at: OffsetDateTime::UNIX_EPOCH,
            base_url: "https://public.example".to_string(),
            entries: entries
                .iter()
                .map(|(old, new)| (old.to_string(), new.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn replaces_every_occurrence() {
        let mapping = mapping(&[(A_OLD, A_NEW)]);
        let content = format!("x {A_OLD} y {A_OLD}");
        let (updated, count) = rewrite_content(&content, &extractor(), &mapping).unwrap();
        assert_eq!(count, 2);
        assert_eq!(updated, format!("x {A_NEW} y {A_NEW}"));
    }

    #[test]
    fn query_variants_are_matched_exactly() {
        let mapping = mapping(&[
            (A_OLD, A_NEW),
            ("https://cdn.example/acct/a.png?tr=w-10", A_NEW),
        ]);
        let content = format!("https://cdn.example/acct/a.png?tr=w-10 {A_OLD}");
        let (updated, count) = rewrite_content(&content, &extractor(), &mapping).unwrap();
        assert_eq!(count, 2);
        assert_eq!(updated, format!("{A_NEW} {A_NEW}"));
    }

    #[test]
    fn mapped_url_inside_longer_unmapped_url_is_untouched() {
        let mapping = mapping(&[(
            "https://cdn.example/acct/studio/ink",
            "https://public.example/studio/ink.jpg",
        )]);
        let content = "a <https://cdn.example/acct/studio/ink> \
                       b <https://cdn.example/acct/studio/ink.png>";
        let (updated, count) = rewrite_content(content, &extractor(), &mapping).unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            updated,
            "a <https://public.example/studio/ink.jpg> \
                       b <https://cdn.example/acct/studio/ink.png>"
        );
    }

    #[test]
    fn replacement_that_reintroduces_mapped_url_fails() {
        let b_old = "https://cdn.example/acct/b.png";
        let mapping = mapping(&[(A_OLD, b_old), (b_old, "https://public.example/b.png")]);
        let err = rewrite_content(A_OLD, &extractor(), &mapping).unwrap_err();
        assert!(matches!(
            err,
            RewriteError::Incomplete { ref url, remaining: 1 } if url == b_old
        ));
    }

    #[test]
    fn dry_run_reports_same_counts_without_writing() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("content")).unwrap();
        let original = format!("![a]({A_OLD})\n");
        std::fs::write(root.join("content/post.md"), &original).unwrap();
        std::fs::write(root.join("content/other.md"), "nothing here\n").unwrap();
        let files = vec!["content/other.md".to_string(), "content/post.md".to_string()];
        let mapping = mapping(&[(A_OLD, A_NEW)]);
        let extractor = extractor();

        let planned = rewrite_files(root, &files, &extractor, &mapping, false);
        assert_eq!(
            std::fs::read_to_string(root.join("content/post.md")).unwrap(),
            original
        );
        assert_eq!(
            planned.lines(),
            vec![
                "ferry: Planned 1 replacements across 1 files.",
                "ferry: content/post.md (1)",
            ]
        );

        let wrote = rewrite_files(root, &files, &extractor, &mapping, true);
        assert_eq!(wrote.files, planned.files);
        assert_eq!(
            std::fs::read_to_string(root.join("content/post.md")).unwrap(),
            format!("![a]({A_NEW})\n")
        );
        assert_eq!(
            rewrite_files(root, &files, &extractor, &mapping, true).lines(),
            vec!["ferry: No replacements needed."]
        );
    }

    #[test]
    fn unreadable_file_does_not_stop_others() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        std::fs::write(root.join("good.md"), A_OLD).unwrap();
        let files = vec!["absent.md".to_string(), "good.md".to_string()];
        let mapping = mapping(&[(A_OLD, A_NEW)]);

        let summary = rewrite_files(root, &files, &extractor(), &mapping, true);
        assert!(!summary.is_success());
        assert_eq!(summary.failures[0].file, "absent.md");
        assert_eq!(summary.total_replacements(), 1);
    }
}

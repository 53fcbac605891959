//! Repository walk feeding the scan, rewrite and guard stages.

use anyhow::Result;
use ferry_core::config::ScanConfig;
use ferry_core::{AssetHost, ScanCollector, ScanReport};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into.
const SKIPPED_DIRS: [&str; 2] = [".git", "node_modules"];

/// Default root for content files.
pub const CONTENT_DIR: &str = "content";

/// Source directory added by `--include-src`.
pub const SRC_DIR: &str = "src";

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.strip_prefix('.') == Some(ext)))
}

/// Path relative to `root`, `/`-separated.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Every file under `roots` (relative to `root`) with a matching extension.
///
/// Missing roots are ignored and `excluded` directories are never entered.
/// Results are repo-relative, deduplicated and sorted.
pub fn collect_files(
    root: &Path,
    roots: &[PathBuf],
    extensions: &[String],
    excluded: &[PathBuf],
) -> Vec<String> {
    let excluded: Vec<PathBuf> = excluded.iter().map(|dir| root.join(dir)).collect();
    let mut files = BTreeSet::new();
    for scan_root in roots {
        let full_root = root.join(scan_root);
        if !full_root.exists() {
            debug!(path = %full_root.display(), "scan root does not exist");
            continue;
        }
        let walker = WalkDir::new(&full_root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                !is_skipped_dir(entry) && !excluded.iter().any(|dir| entry.path() == dir.as_path())
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "failed to walk directory entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
                files.insert(relative_path(root, entry.path()));
            }
        }
    }
    files.into_iter().collect()
}

/// Roots for rewrite and guard: the given paths (default `content`), plus
/// `src` when requested.
pub fn target_roots(paths: &[PathBuf], include_src: bool) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = if paths.is_empty() {
        vec![PathBuf::from(CONTENT_DIR)]
    } else {
        paths.to_vec()
    };
    if include_src {
        roots.push(PathBuf::from(SRC_DIR));
    }
    roots
}

/// Roots for the migration scan: the whole repository, or `content/` when
/// `content_only` is set, plus any extra paths.
pub fn scan_roots(config: &ScanConfig) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if !config.content_only {
        roots.push(PathBuf::from("."));
    } else if config.root.join(CONTENT_DIR).exists() {
        roots.push(PathBuf::from(CONTENT_DIR));
    }
    roots.extend(
        config
            .extra_paths
            .iter()
            .filter(|p| !p.as_os_str().is_empty())
            .cloned(),
    );
    roots
}

/// Walk the configured roots and build the scan report.
///
/// Unreadable files are recorded as skipped, never fatal. `excluded` holds
/// directories (such as the artifact directory) that are never scanned.
pub fn scan_repository(
    config: &ScanConfig,
    host: &AssetHost,
    excluded: &[PathBuf],
    generated_at: OffsetDateTime,
) -> Result<ScanReport> {
    let roots = scan_roots(config);
    let files = collect_files(&config.root, &roots, &config.extensions, excluded);
    let mut collector = ScanCollector::new(host, config.allowlist())?;

    for file in &files {
        match std::fs::read_to_string(config.root.join(file)) {
            Ok(content) => collector.record_file(file, &content),
            Err(err) => {
                warn!(file = %file, error = %err, "failed to read file");
                collector.record_read_failure(file);
            }
        }
    }

    let report = collector.finish(generated_at);
    info!(
        files = report.files_scanned,
        urls = report.urls.len(),
        occurrences = report.occurrences(),
        skipped = report.skipped.len(),
        "scan complete"
    );
    Ok(report)
}

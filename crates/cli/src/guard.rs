//! Check that no asset-host URLs remain in the target files.

use anyhow::{Context, Result};
use ferry_core::{AssetHost, UrlExtractor};
use std::path::Path;

/// A file that still references the asset host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Offender {
    pub file: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardReport {
    pub host: String,
    pub offenders: Vec<Offender>,
}

impl GuardReport {
    pub fn is_clean(&self) -> bool {
        self.offenders.is_empty()
    }

    /// Success line for stdout, or the offender listing for stderr.
    pub fn lines(&self) -> Vec<String> {
        if self.is_clean() {
            return vec![format!("ferry: No {} URLs found in target paths.", self.host)];
        }
        let mut lines = vec![format!(
            "ferry: Found {} files still referencing {}.",
            self.offenders.len(),
            self.host
        )];
        lines.extend(
            self.offenders
                .iter()
                .map(|o| format!("ferry: {} ({})", o.file, o.count)),
        );
        lines
    }
}

/// Count asset-host URLs in each file. Every match is a violation, whatever
/// its scope. A file that cannot be read fails the whole check.
pub fn guard(root: &Path, files: &[String], host: &AssetHost) -> Result<GuardReport> {
    let extractor = UrlExtractor::new(host)?;
    let mut offenders = Vec::new();
    for file in files {
        let bytes =
            std::fs::read(root.join(file)).with_context(|| format!("failed to read {file}"))?;
        let count = extractor.count(&String::from_utf8_lossy(&bytes));
        if count > 0 {
            offenders.push(Offender {
                file: file.clone(),
                count,
            });
        }
    }
    Ok(GuardReport {
        host: host.label(),
        offenders,
    })
}

//! Persisted per-asset migration state.
//!
//! The manifest is keyed by canonical URL and survives across runs. Plan
//! fields are refreshed on every merge; progress fields (hash, size, final
//! key, status flags) are only ever written by the download and upload
//! stages through the methods on [`ManifestAsset`].

use crate::artifact::{self, ARTIFACT_VERSION, default_version, unix_epoch};
use crate::hash::ContentHash;
use crate::key::{self, KeySuffixMode};
use crate::plan::Plan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::warn;

/// Content type used for uploads when nothing better is known.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Progress flags. `uploaded` implies `downloaded`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetStatus {
    pub downloaded: bool,
    pub uploaded: bool,
}

/// State for one canonical asset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManifestAsset {
    pub canonical_url: String,
    pub download_url: String,
    pub path_after_account: String,
    pub key_base: String,
    pub final_key: Option<String>,
    pub content_type: Option<String>,
    pub has_extension: bool,
    pub needs_suffix: bool,
    pub sha256: Option<ContentHash>,
    pub bytes: Option<u64>,
    pub status: AssetStatus,
    pub download_path: Option<PathBuf>,
    pub variants: Vec<String>,
    pub sources: Vec<String>,
    pub error: Option<String>,
}

/// Outcome of a successful fetch, recorded by [`ManifestAsset::record_download`].
#[derive(Clone, Debug)]
pub struct DownloadRecord {
    pub sha256: ContentHash,
    pub bytes: u64,
    /// Response content type, as sent by the server.
    pub content_type: Option<String>,
    pub download_path: PathBuf,
}

impl ManifestAsset {
    /// Suffix for this asset's keys, if it needs one.
    fn suffix(&self, hash: &ContentHash, mode: Option<KeySuffixMode>) -> Option<String> {
        self.needs_suffix
            .then(|| mode.unwrap_or_default().suffix(hash))
    }

    /// Relative path the downloaded bytes are stored under.
    ///
    /// Colliding assets share a key base, so their local copies carry the
    /// same suffix as their final keys.
    pub fn download_key(&self, hash: &ContentHash, mode: Option<KeySuffixMode>) -> String {
        match self.suffix(hash, mode) {
            Some(suffix) => key::apply_key_suffix(&self.key_base, &suffix),
            None => self.key_base.clone(),
        }
    }

    /// Final key implied by the current plan fields and the given content.
    pub fn resolve_key(
        &self,
        hash: &ContentHash,
        content_type: Option<&str>,
        mode: Option<KeySuffixMode>,
    ) -> String {
        let suffix = self.suffix(hash, mode);
        key::final_key(&self.key_base, content_type, suffix.as_deref())
    }

    /// Local file recorded for this asset, or the default location.
    pub fn local_path(&self, downloads_dir: &Path) -> PathBuf {
        self.download_path
            .clone()
            .unwrap_or_else(|| downloads_dir.join(&self.key_base))
    }

    pub fn is_pending_upload(&self) -> bool {
        self.status.downloaded && !self.status.uploaded
    }

    /// Content type sent with the upload.
    pub fn upload_content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(FALLBACK_CONTENT_TYPE)
    }

    /// Store the result of a successful download.
    pub fn record_download(&mut self, record: DownloadRecord, mode: Option<KeySuffixMode>) {
        let content_type = record
            .content_type
            .as_deref()
            .and_then(key::normalize_content_type);
        let final_key = self.resolve_key(&record.sha256, content_type.as_deref(), mode);
        self.content_type =
            content_type.or_else(|| key::content_type_from_key(&final_key).map(str::to_string));
        self.final_key = Some(final_key);
        self.sha256 = Some(record.sha256);
        self.bytes = Some(record.bytes);
        self.download_path = Some(record.download_path);
        self.status.downloaded = true;
        self.error = None;
    }

    /// Mark the asset as present in the object store.
    pub fn record_upload(&mut self) -> crate::Result<()> {
        if !self.status.downloaded {
            return Err(crate::Error::Integrity(format!(
                "cannot mark {} uploaded before it is downloaded",
                self.canonical_url
            )));
        }
        self.status.uploaded = true;
        self.error = None;
        Ok(())
    }

    /// The local copy is gone or about to be replaced.
    pub fn invalidate_download(&mut self) {
        self.status.downloaded = false;
        self.status.uploaded = false;
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    /// Re-derive the final key of a downloaded asset from its recorded
    /// content. If it moved (for example because the asset started or
    /// stopped colliding), the new key is stored and the upload is reset.
    ///
    /// Returns whether the key changed.
    pub fn reconcile_final_key(&mut self, mode: Option<KeySuffixMode>) -> bool {
        if !self.status.downloaded {
            return false;
        }
        let Some(hash) = self.sha256 else {
            return false;
        };
        let expected = self.resolve_key(&hash, self.content_type.as_deref(), mode);
        if self.final_key.as_deref() == Some(expected.as_str()) {
            return false;
        }
        warn!(
            url = %self.canonical_url,
            from = ?self.final_key,
            to = %expected,
            "final key changed, upload will be repeated"
        );
        self.final_key = Some(expected);
        self.status.uploaded = false;
        true
    }
}

/// Aggregate counts for summary lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ManifestCounts {
    pub assets: usize,
    pub downloaded: usize,
    pub uploaded: usize,
    pub errored: usize,
}

/// `manifest.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(with = "time::serde::rfc3339", default = "unix_epoch")]
    pub generated_at: OffsetDateTime,
    #[serde(default)]
    pub assets: BTreeMap<String, ManifestAsset>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: ARTIFACT_VERSION,
            generated_at: unix_epoch(),
            assets: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// Fold a plan into an existing manifest.
    ///
    /// Entries are never removed. Plan-derived fields are overwritten,
    /// progress fields are carried over untouched.
    pub fn merge(previous: Option<Manifest>, plan: &Plan) -> Manifest {
        let mut manifest = previous.unwrap_or_default();
        manifest.version = ARTIFACT_VERSION;
        manifest.generated_at = plan.generated_at;

        for planned in &plan.assets {
            let asset = manifest
                .assets
                .entry(planned.canonical_url.clone())
                .or_default();
            asset.canonical_url = planned.canonical_url.clone();
            asset.download_url = planned.download_url.clone();
            asset.path_after_account = planned.path_after_account.clone();
            asset.key_base = planned.key_base.clone();
            asset.has_extension = planned.has_extension;
            asset.needs_suffix = planned.needs_suffix;
            asset.variants = planned.variants.clone();
            asset.sources = planned.sources.clone();
        }
        manifest
    }

    /// Load a manifest, returning `None` if the file does not exist.
    ///
    /// Entries that claim an upload without a download are demoted.
    pub fn load(path: &Path) -> crate::Result<Option<Manifest>> {
        let Some(mut manifest) = artifact::read_json::<Manifest>(path)? else {
            return Ok(None);
        };
        for (url, asset) in &mut manifest.assets {
            if asset.canonical_url.is_empty() {
                asset.canonical_url = url.clone();
            }
            if asset.status.uploaded && !asset.status.downloaded {
                warn!(url = %url, "uploaded without download, resetting upload status");
                asset.status.uploaded = false;
            }
        }
        Ok(Some(manifest))
    }

    pub fn save(&self, path: &Path) -> crate::Result<()> {
        artifact::write_json(path, self)
    }

    pub fn get(&self, canonical_url: &str) -> Option<&ManifestAsset> {
        self.assets.get(canonical_url)
    }

    pub fn counts(&self) -> ManifestCounts {
        self.assets
            .values()
            .fold(ManifestCounts::default(), |mut counts, asset| {
                counts.assets += 1;
                counts.downloaded += usize::from(asset.status.downloaded);
                counts.uploaded += usize::from(asset.status.uploaded);
                counts.errored += usize::from(asset.error.is_some());
                counts
            })
    }
}

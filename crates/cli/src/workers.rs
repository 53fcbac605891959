//! Bounded-concurrency download and upload stages.
//!
//! Each stage hands out disjoint `&mut ManifestAsset` borrows to at most
//! `concurrency` in-flight futures, so every asset has exactly one owner for
//! the duration of the stage. The caller persists the manifest once the
//! stage has drained.

use crate::fetch::{AssetFetcher, RetryPolicy, fetch_with_retry};
use bytes::Bytes;
use ferry_core::key::{self, KeySuffixMode};
use ferry_core::{ContentHash, DownloadRecord, Manifest, ManifestAsset, Plan};
use ferry_storage::{ObjectStore, PutOptions};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use tracing::{debug, info, warn};

/// What happened to one asset in a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Skipped,
    Failed,
}

/// Per-stage counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageReport {
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StageReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Done => self.done += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.done + self.skipped + self.failed
    }
}

/// Drive `work` over `assets` with at most `concurrency` futures in flight.
async fn run_bounded<'a, I, F, Fut>(assets: I, concurrency: usize, work: F) -> StageReport
where
    I: Iterator<Item = &'a mut ManifestAsset>,
    F: Fn(&'a mut ManifestAsset) -> Fut,
    Fut: Future<Output = Outcome>,
{
    let parallel = concurrency.max(1);
    let mut report = StageReport::default();
    let mut in_flight = FuturesUnordered::new();

    for asset in assets {
        in_flight.push(work(asset));
        if in_flight.len() >= parallel
            && let Some(outcome) = in_flight.next().await
        {
            report.record(outcome);
        }
    }
    while let Some(outcome) = in_flight.next().await {
        report.record(outcome);
    }
    report
}

/// Settings for the download stage.
pub struct DownloadOptions<'a> {
    pub fetcher: &'a dyn AssetFetcher,
    pub downloads_dir: &'a Path,
    pub retry: RetryPolicy,
    pub concurrency: usize,
    pub suffix_mode: Option<KeySuffixMode>,
}

/// Download every asset in the current plan that has no valid local copy.
pub async fn download_assets(
    manifest: &mut Manifest,
    plan: &Plan,
    options: &DownloadOptions<'_>,
) -> StageReport {
    let planned: BTreeSet<&str> = plan
        .assets
        .iter()
        .map(|asset| asset.canonical_url.as_str())
        .collect();
    let assets = manifest
        .assets
        .iter_mut()
        .filter(|(url, _)| planned.contains(url.as_str()))
        .map(|(_, asset)| asset);

    let report = run_bounded(assets, options.concurrency, move |asset| {
        download_one(asset, options)
    })
    .await;
    info!(
        downloaded = report.done,
        skipped = report.skipped,
        failed = report.failed,
        "download stage complete"
    );
    report
}

async fn download_one(asset: &mut ManifestAsset, options: &DownloadOptions<'_>) -> Outcome {
    if asset.status.downloaded {
        let local = asset.local_path(options.downloads_dir);
        if tokio::fs::try_exists(&local).await.unwrap_or(false) {
            if asset.reconcile_final_key(options.suffix_mode) {
                info!(url = %asset.canonical_url, key = ?asset.final_key, "final key updated");
            }
            return Outcome::Skipped;
        }
        debug!(
            url = %asset.canonical_url,
            path = %local.display(),
            "local copy missing, downloading again"
        );
    }
    asset.invalidate_download();

    let fetched = match fetch_with_retry(options.fetcher, &asset.download_url, options.retry).await
    {
        Ok(fetched) => fetched,
        Err(err) => {
            warn!(url = %asset.download_url, error = %err, "download failed");
            asset.record_error(err.to_string());
            return Outcome::Failed;
        }
    };

    let sha256 = ContentHash::compute(&fetched.body);
    let download_key = asset.download_key(&sha256, options.suffix_mode);
    if !key::is_safe_key(&download_key) {
        asset.record_error(format!("unsafe download path: {download_key}"));
        return Outcome::Failed;
    }
    let download_path = options.downloads_dir.join(&download_key);
    if let Err(err) = write_download(&download_path, &fetched.body).await {
        warn!(path = %download_path.display(), error = %err, "failed to store download");
        asset.record_error(format!(
            "failed to write {}: {err}",
            download_path.display()
        ));
        return Outcome::Failed;
    }

    asset.record_download(
        DownloadRecord {
            sha256,
            bytes: fetched.body.len() as u64,
            content_type: fetched.content_type,
            download_path,
        },
        options.suffix_mode,
    );
    debug!(url = %asset.canonical_url, key = ?asset.final_key, "downloaded");
    Outcome::Done
}

async fn write_download(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await
}

/// Settings for the upload stage.
pub struct UploadOptions<'a> {
    pub store: &'a dyn ObjectStore,
    pub downloads_dir: &'a Path,
    pub concurrency: usize,
    pub cache_control: &'a str,
}

/// Upload every downloaded asset not yet in the object store.
pub async fn upload_assets(manifest: &mut Manifest, options: &UploadOptions<'_>) -> StageReport {
    let report = run_bounded(
        manifest.assets.values_mut(),
        options.concurrency,
        move |asset| upload_one(asset, options),
    )
    .await;
    info!(
        backend = options.store.backend_name(),
        uploaded = report.done,
        skipped = report.skipped,
        failed = report.failed,
        "upload stage complete"
    );
    report
}

async fn upload_one(asset: &mut ManifestAsset, options: &UploadOptions<'_>) -> Outcome {
    if !asset.is_pending_upload() {
        return Outcome::Skipped;
    }
    let Some(final_key) = asset.final_key.clone() else {
        asset.record_error("missing final key for upload");
        return Outcome::Failed;
    };

    let path = asset.local_path(options.downloads_dir);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                asset.invalidate_download();
            }
            asset.record_error(format!(
                "missing downloaded file at {}: {err}",
                path.display()
            ));
            return Outcome::Failed;
        }
    };

    let put = PutOptions::new(asset.upload_content_type(), options.cache_control);
    if let Err(err) = options
        .store
        .put(&final_key, Bytes::from(data), &put)
        .await
    {
        warn!(key = %final_key, error = %err, "upload failed");
        asset.record_error(err.to_string());
        return Outcome::Failed;
    }

    match asset.record_upload() {
        Ok(()) => {
            debug!(key = %final_key, "uploaded");
            Outcome::Done
        }
        Err(err) => {
            asset.record_error(err.to_string());
            Outcome::Failed
        }
    }
}

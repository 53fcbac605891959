//! The `migrate` pipeline: scan, plan, manifest, download, upload, mapping.
//!
//! Every stage reads its inputs once and persists its artifact once, so a
//! run can be killed at any point and resumed by running it again.

use crate::fetch::{AssetFetcher, HttpFetcher, RetryPolicy};
use crate::scanner;
use crate::workers::{self, DownloadOptions, StageReport, UploadOptions};
use anyhow::{Context, Result};
use ferry_core::artifact::{self, MANIFEST_FILE, MAPPING_FILE, PLAN_FILE, SCAN_FILE};
use ferry_core::{FerryConfig, Manifest, ManifestCounts, SkipReason, Stages};
use ferry_storage::ObjectStore;
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::{info, instrument};

/// Counts reported at the end of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrateSummary {
    pub stages: Stages,
    pub urls: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub manifest: ManifestCounts,
    pub download: Option<StageReport>,
    pub upload: Option<StageReport>,
    pub mapping: Option<(PathBuf, usize)>,
}

impl MigrateSummary {
    /// Summary lines for stdout.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "ferry: URLs {} | assets {} | downloaded {} | uploaded {}",
            self.urls, self.manifest.assets, self.manifest.downloaded, self.manifest.uploaded
        )];
        if !self.skipped.is_empty() {
            let total: usize = self.skipped.values().sum();
            let breakdown: Vec<String> = self
                .skipped
                .iter()
                .map(|(reason, count)| format!("{reason} {count}"))
                .collect();
            lines.push(format!(
                "ferry: skipped {total} references ({})",
                breakdown.join(", ")
            ));
        }
        if let Some(report) = self.download {
            lines.push(format!(
                "ferry: download downloaded {} | skipped {} | failed {}",
                report.done, report.skipped, report.failed
            ));
        }
        if let Some(report) = self.upload {
            lines.push(format!(
                "ferry: upload uploaded {} | skipped {} | failed {}",
                report.done, report.skipped, report.failed
            ));
        }
        if let Some((path, entries)) = &self.mapping {
            lines.push(format!(
                "ferry: mapping {entries} entries written to {}",
                path.display()
            ));
        }
        if !self.stages.any() && !self.stages.emit_mapping {
            lines.push(
                "ferry: scan and plan only; pass --download, --upload or --emit-mapping to continue."
                    .to_string(),
            );
        }
        lines
    }
}

/// Run the pipeline with the production fetcher and the configured store.
pub async fn migrate(config: &FerryConfig, stages: Stages) -> Result<MigrateSummary> {
    config.validate(stages)?;
    let fetcher = HttpFetcher::new().context("failed to build HTTP client")?;
    let store = if stages.upload {
        let store = ferry_storage::from_config(&config.resolved_storage(), &config.scan.root)
            .await
            .context("failed to initialize object storage")?;
        Some(store)
    } else {
        None
    };
    run_migrate(config, stages, &fetcher, store.as_deref()).await
}

/// Run the pipeline against the given collaborators.
///
/// Configuration is validated before anything touches the filesystem.
#[instrument(
    skip_all,
    fields(
        root = %config.scan.root.display(),
        download = stages.download,
        upload = stages.upload
    )
)]
pub async fn run_migrate(
    config: &FerryConfig,
    stages: Stages,
    fetcher: &dyn AssetFetcher,
    store: Option<&dyn ObjectStore>,
) -> Result<MigrateSummary> {
    config.validate(stages)?;
    if stages.upload && store.is_none() {
        anyhow::bail!("upload requested without an object store");
    }

    let output_dir = config.output_dir();
    let downloads_dir = config.downloads_dir();
    let manifest_path = output_dir.join(MANIFEST_FILE);

    let scan = scanner::scan_repository(
        &config.scan,
        &config.source,
        std::slice::from_ref(&config.output_dir),
        OffsetDateTime::now_utc(),
    )?;
    artifact::write_json(&output_dir.join(SCAN_FILE), &scan)
        .context("failed to write scan report")?;

    let plan = ferry_core::build_plan(&scan, &config.source, &config.keys.plan_options())?;
    artifact::write_json(&output_dir.join(PLAN_FILE), &plan).context("failed to write plan")?;
    info!(assets = plan.assets.len(), "plan built");

    let previous = Manifest::load(&manifest_path).context("failed to load manifest")?;
    let mut manifest = Manifest::merge(previous, &plan);
    manifest.save(&manifest_path).context("failed to write manifest")?;

    let mut summary = MigrateSummary {
        stages,
        urls: scan.urls.len(),
        skipped: scan.skip_counts(),
        ..MigrateSummary::default()
    };

    if stages.download {
        let options = DownloadOptions {
            fetcher,
            downloads_dir: &downloads_dir,
            retry: RetryPolicy::from(&config.workers),
            concurrency: config.workers.concurrency,
            suffix_mode: config.keys.suffix,
        };
        summary.download = Some(workers::download_assets(&mut manifest, &plan, &options).await);
        manifest.save(&manifest_path).context("failed to write manifest")?;
    }

    if stages.upload
        && let Some(store) = store
    {
        let options = UploadOptions {
            store,
            downloads_dir: &downloads_dir,
            concurrency: config.workers.concurrency,
            cache_control: &config.publish.cache_control,
        };
        summary.upload = Some(workers::upload_assets(&mut manifest, &options).await);
        manifest.save(&manifest_path).context("failed to write manifest")?;
    }

    if stages.writes_mapping()
        && let Some(base_url) = config.object_base_url()
    {
        let mapping = ferry_core::build_mapping(&scan, &manifest, &config.source, &base_url);
        let mapping_path = output_dir.join(MAPPING_FILE);
        mapping.save(&mapping_path).context("failed to write mapping")?;
        info!(entries = mapping.len(), path = %mapping_path.display(), "mapping written");
        summary.mapping = Some((mapping_path, mapping.len()));
    }

    summary.manifest = manifest.counts();
    Ok(summary)
}

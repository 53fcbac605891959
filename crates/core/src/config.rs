//! Configuration types shared across crates.

use crate::canonical::AssetHost;
use crate::key::KeySuffixMode;
use crate::mapping;
use crate::plan::PlanOptions;
use crate::scan::Allowlist;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default working directory for artifacts and downloads.
pub const DEFAULT_OUTPUT_DIR: &str = ".image-migration";

/// Cache-Control sent with uploaded objects unless overridden.
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=3600";

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FerryConfig {
    /// Asset host being migrated away from.
    #[serde(default)]
    pub source: AssetHost,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub keys: KeyConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Artifact directory, relative to the scan root unless absolute.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            source: AssetHost::default(),
            scan: ScanConfig::default(),
            keys: KeyConfig::default(),
            publish: PublishConfig::default(),
            workers: WorkerConfig::default(),
            output_dir: default_output_dir(),
            storage: StorageConfig::default(),
        }
    }
}

/// Which optional pipeline stages a run performs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stages {
    pub download: bool,
    pub upload: bool,
    pub emit_mapping: bool,
}

impl Stages {
    /// Download and upload both end with a mapping.
    pub fn writes_mapping(&self) -> bool {
        self.emit_mapping || self.download || self.upload
    }

    pub fn any(&self) -> bool {
        self.download || self.upload
    }
}

/// Repository scan settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Repository root; every reported file path is relative to it.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// File extensions (with leading dot) that are read as text.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Scan only `content/` and `extra_paths` instead of the whole root.
    #[serde(default)]
    pub content_only: bool,
    /// Additional scan roots, relative to the root.
    #[serde(default)]
    pub extra_paths: Vec<PathBuf>,
    /// Added to the built-in content segments.
    #[serde(default)]
    pub allow_segments: Vec<String>,
    /// Added to the built-in path prefixes.
    #[serde(default)]
    pub allow_prefixes: Vec<String>,
    #[serde(default)]
    pub allow_all: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            extensions: default_extensions(),
            content_only: false,
            extra_paths: Vec::new(),
            allow_segments: Vec::new(),
            allow_prefixes: Vec::new(),
            allow_all: false,
        }
    }
}

impl ScanConfig {
    pub fn allowlist(&self) -> Allowlist {
        Allowlist::new(&self.allow_segments, &self.allow_prefixes, self.allow_all)
    }
}

/// Storage key settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Prepended to every key.
    pub prefix: Option<String>,
    /// Disambiguation for colliding keys. Collisions are fatal without it.
    pub suffix: Option<KeySuffixMode>,
}

impl KeyConfig {
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            key_prefix: self.prefix.clone(),
            key_suffix: self.suffix,
        }
    }
}

/// Settings for published objects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Public URL of the bucket. Required when a mapping is written.
    pub public_base_url: Option<String>,
    #[serde(default = "default_cache_control")]
    pub cache_control: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            public_base_url: None,
            cache_control: default_cache_control(),
        }
    }
}

/// Download/upload pool settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Assets processed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts per download, including the first.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            attempts: default_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Object store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local directory standing in for a bucket.
    Filesystem {
        /// Root directory, relative to the scan root unless absolute.
        /// Empty means `bucket` inside the output directory.
        #[serde(default)]
        path: PathBuf,
    },
    /// S3-compatible storage (R2, MinIO, AWS).
    S3 {
        #[serde(default)]
        bucket: String,
        /// Endpoint URL, e.g. `https://<account>.r2.cloudflarestorage.com`.
        endpoint: Option<String>,
        /// Defaults to `auto`.
        region: Option<String>,
        /// Key prefix inside the bucket.
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        /// Path-style addressing (`endpoint/bucket/key`), needed by MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::new(),
        }
    }
}

impl StorageConfig {
    /// Prefix the store puts in front of every key, without surrounding slashes.
    pub fn key_prefix(&self) -> Option<&str> {
        match self {
            Self::Filesystem { .. } => None,
            Self::S3 { prefix, .. } => prefix
                .as_deref()
                .map(|prefix| prefix.trim_matches('/'))
                .filter(|prefix| !prefix.is_empty()),
        }
    }

    /// Check the settings an upload needs.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            Self::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::Config(
                        "filesystem storage requires a path".to_string(),
                    ));
                }
            }
            Self::S3 {
                bucket,
                endpoint,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err(crate::Error::Config(
                        "storage.bucket is required to upload".to_string(),
                    ));
                }
                if endpoint.as_deref().is_none_or(str::is_empty) {
                    return Err(crate::Error::Config(
                        "storage.endpoint is required to upload".to_string(),
                    ));
                }
                match (access_key_id, secret_access_key) {
                    (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {}
                    _ => {
                        return Err(crate::Error::Config(
                            "storage.access_key_id and storage.secret_access_key are both required to upload"
                                .to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl FerryConfig {
    /// Reject configurations that cannot run the requested stages.
    ///
    /// Called before any file is read or written.
    pub fn validate(&self, stages: Stages) -> crate::Result<()> {
        if self.source.host.is_empty() || self.source.account.is_empty() {
            return Err(crate::Error::Config(
                "source.host and source.account must not be empty".to_string(),
            ));
        }
        if self.workers.concurrency == 0 {
            return Err(crate::Error::Config(
                "workers.concurrency must be at least 1".to_string(),
            ));
        }
        if self.workers.attempts == 0 {
            return Err(crate::Error::Config(
                "workers.attempts must be at least 1".to_string(),
            ));
        }
        if stages.writes_mapping() {
            let base = self.public_base_url().ok_or_else(|| {
                crate::Error::Config(
                    "a public base URL is required to emit the mapping (--public-base-url)"
                        .to_string(),
                )
            })?;
            let parsed = url::Url::parse(base)
                .map_err(|e| crate::Error::InvalidUrl(format!("{base}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(crate::Error::InvalidUrl(format!(
                    "{base}: public base URL must be http or https"
                )));
            }
        }
        if stages.upload {
            self.resolved_storage().validate()?;
        }
        Ok(())
    }

    pub fn public_base_url(&self) -> Option<&str> {
        self.publish
            .public_base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    /// Public URL under which uploaded keys are served, including the
    /// storage key prefix.
    pub fn object_base_url(&self) -> Option<String> {
        let base = self.public_base_url()?;
        Some(match self.storage.key_prefix() {
            Some(prefix) => mapping::public_url(base, prefix),
            None => mapping::normalize_base_url(base).to_string(),
        })
    }

    /// Storage settings with an empty filesystem path placed under the
    /// output directory. Relative paths stay relative to the scan root.
    pub fn resolved_storage(&self) -> StorageConfig {
        match &self.storage {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                StorageConfig::Filesystem {
                    path: self.output_dir.join("bucket"),
                }
            }
            other => other.clone(),
        }
    }

    /// Output directory resolved against the scan root.
    pub fn output_dir(&self) -> PathBuf {
        self.scan.root.join(&self.output_dir)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.output_dir().join("downloads")
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_extensions() -> Vec<String> {
    [".svelte", ".ts", ".js", ".json", ".md", ".css"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_cache_control() -> String {
    DEFAULT_CACHE_CONTROL.to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    300
}

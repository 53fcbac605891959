//! S3-compatible storage backend using AWS SDK.
//!
//! Used for Cloudflare R2 in production; MinIO and AWS work the same way.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectStore, PutOptions, validate_key};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::instrument;

/// Region used when none is configured. R2 accepts only `auto`.
const DEFAULT_REGION: &str = "auto";

/// S3-compatible object store using AWS SDK.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Connection settings for [`S3Backend::new`].
#[derive(Clone, Debug, Default)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: String,
    pub region: Option<String>,
    pub prefix: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Use path-style URLs (`endpoint/bucket/key`) instead of virtual-hosted
    /// style (`bucket.endpoint/key`). Required for MinIO.
    pub force_path_style: bool,
}

impl S3Backend {
    /// Create a new S3 backend with explicit credentials.
    pub fn new(settings: S3Settings) -> StorageResult<Self> {
        if settings.bucket.is_empty() {
            return Err(StorageError::Config("s3 bucket must not be empty".to_string()));
        }
        if settings.access_key_id.is_empty() || settings.secret_access_key.is_empty() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key".to_string(),
            ));
        }

        let region = settings
            .region
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint = normalize_endpoint(&settings.endpoint);

        let credentials = aws_sdk_s3::config::Credentials::new(
            settings.access_key_id,
            settings.secret_access_key,
            None,
            None,
            "ferry-config",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&endpoint)
            .force_path_style(settings.force_path_style)
            .build();

        Ok(Self {
            client: Client::from_conf(config),
            bucket: settings.bucket,
            prefix: normalize_prefix(settings.prefix),
            endpoint,
            region,
        })
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }
}

/// Bare `host:port` endpoints (e.g. `minio:9000`) get an `http://` scheme.
fn normalize_endpoint(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", endpoint.trim_end_matches('/'))
    }
}

/// Strip surrounding slashes; an empty prefix is no prefix.
fn normalize_prefix(prefix: Option<String>) -> Option<String> {
    prefix
        .map(|p| p.trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(
        skip(self, data, options),
        fields(backend = "s3", bucket = %self.bucket, size = data.len())
    )]
    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> StorageResult<()> {
        validate_key(key)?;
        let full_key = self.full_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .body(data.into())
            .set_content_type(options.content_type.clone())
            .set_cache_control(options.cache_control.clone())
            .send()
            .await
            .map_err(|e| StorageError::S3 {
                key: full_key.clone(),
                source: Box::new(e),
            })?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> S3Settings {
        S3Settings {
            bucket: "assets".to_string(),
            endpoint: "minio:9000".to_string(),
            region: None,
            prefix: Some("/images/".to_string()),
            access_key_id: "access".to_string(),
            secret_access_key: "secret".to_string(),
            force_path_style: true,
        }
    }

    #[test]
    fn test_new_normalizes_settings() {
        let backend = S3Backend::new(settings()).unwrap();
        assert_eq!(backend.endpoint, "http://minio:9000");
        assert_eq!(backend.region, "auto");
        assert_eq!(backend.full_key("a b.png"), "images/a b.png");
        assert_eq!(backend.backend_name(), "s3");
    }

    #[test]
    fn test_new_requires_credentials() {
        let result = S3Backend::new(S3Settings {
            secret_access_key: String::new(),
            ..settings()
        });
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn test_endpoint_and_prefix_normalization() {
        assert_eq!(
            normalize_endpoint("https://acct.r2.cloudflarestorage.com/"),
            "https://acct.r2.cloudflarestorage.com"
        );
        assert_eq!(normalize_prefix(Some("///".to_string())), None);
        assert_eq!(normalize_prefix(None), None);
    }

    #[tokio::test]
    async fn test_put_rejects_unsafe_key_before_network() {
        let backend = S3Backend::new(settings()).unwrap();
        let result = backend
            .put("../x.png", Bytes::from_static(b"x"), &PutOptions::default())
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}

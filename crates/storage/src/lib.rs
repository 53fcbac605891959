//! Object storage for migrated assets.
//!
//! This crate provides:
//! - The `ObjectStore` put-object abstraction
//! - Backends: local filesystem and S3-compatible (R2, MinIO, AWS)

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{
    filesystem::FilesystemBackend,
    s3::{S3Backend, S3Settings},
};
pub use error::{StorageError, StorageResult};
pub use traits::{ObjectStore, PutOptions};

use ferry_core::config::StorageConfig;
use std::path::Path;
use std::sync::Arc;

/// Create an object store from configuration.
///
/// Relative filesystem roots are resolved against `base_dir`.
pub async fn from_config(
    config: &StorageConfig,
    base_dir: &Path,
) -> StorageResult<Arc<dyn ObjectStore>> {
    config
        .validate()
        .map_err(|e| StorageError::Config(e.to_string()))?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(base_dir.join(path)).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(S3Settings {
                bucket: bucket.clone(),
                endpoint: endpoint.clone().unwrap_or_default(),
                region: region.clone(),
                prefix: prefix.clone(),
                access_key_id: access_key_id.clone().unwrap_or_default(),
                secret_access_key: secret_access_key.clone().unwrap_or_default(),
                force_path_style: *force_path_style,
            })?;
            Ok(Arc::new(backend))
        }
    }
}

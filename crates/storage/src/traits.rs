//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Object metadata sent with a put.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

impl PutOptions {
    pub fn new(content_type: impl Into<String>, cache_control: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            cache_control: Some(cache_control.into()),
        }
    }
}

/// Destination bucket for migrated assets.
///
/// Only writes are needed: assets are published once and served by the
/// bucket's public endpoint, never read back through this interface.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Put an object, replacing any existing object under the same key.
    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> StorageResult<()>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "s3", "filesystem").
    /// Used for logging.
    fn backend_name(&self) -> &'static str;
}

/// Reject keys that are not plain relative paths.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if ferry_core::key::is_safe_key(key) {
        Ok(())
    } else {
        Err(crate::error::StorageError::InvalidKey(key.to_string()))
    }
}

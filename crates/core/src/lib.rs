//! Core domain types and pure logic for the ferry asset migration pipeline.
//!
//! This crate defines the data model shared by the storage and CLI crates:
//! - Canonical identity of asset-host URLs
//! - Storage key derivation and final key resolution
//! - Scan reports, plans, the manifest and the URL mapping
//! - Configuration and JSON artifact persistence

pub mod artifact;
pub mod canonical;
pub mod config;
pub mod error;
pub mod hash;
pub mod key;
pub mod manifest;
pub mod mapping;
pub mod plan;
pub mod scan;

pub use canonical::{AssetHost, CanonicalAsset, Canonicalized};
pub use config::{FerryConfig, Stages, StorageConfig};
pub use error::{Error, KeyCollision, Result};
pub use hash::ContentHash;
pub use key::KeySuffixMode;
pub use manifest::{AssetStatus, DownloadRecord, Manifest, ManifestAsset, ManifestCounts};
pub use mapping::{Mapping, build_mapping, public_url};
pub use plan::{Plan, PlanAsset, PlanOptions, build_plan};
pub use scan::{
    Allowlist, ScanCollector, ScanEntry, ScanReport, SkipReason, SkippedReference, UrlExtractor,
};

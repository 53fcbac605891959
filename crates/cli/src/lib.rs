//! The ferry migration pipeline and its command-line surface.
//!
//! Stages run in order: scan, plan, manifest merge, download, upload,
//! mapping. `rewrite` and `guard` operate on the repository afterwards.

pub mod cli;
pub mod fetch;
pub mod guard;
pub mod pipeline;
pub mod rewrite;
pub mod scanner;
pub mod settings;
pub mod workers;

pub use fetch::{AssetFetcher, FetchError, FetchedAsset, HttpFetcher, RetryPolicy};
pub use guard::{GuardReport, Offender};
pub use pipeline::{MigrateSummary, migrate, run_migrate};
pub use rewrite::{RewriteSummary, rewrite_content, rewrite_files};
pub use workers::StageReport;

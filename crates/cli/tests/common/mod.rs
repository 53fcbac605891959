//! Shared helpers for ferry integration tests.

#![allow(dead_code)]

use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// A scratch repository with a `content/` tree and a `ferry.toml`.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).unwrap()
    }

    pub fn output(&self, file: &str) -> PathBuf {
        self.root().join(".image-migration").join(file)
    }

    /// Config pointing the asset host at `host`, with local filesystem
    /// storage under `bucket/`.
    pub fn write_config(&self, host: &str) -> PathBuf {
        self.write(
            "ferry.toml",
            &format!(
                r#"
[source]
host = "{host}"
account = "acct"

[publish]
public_base_url = "https://public.example/"

[workers]
concurrency = 2
backoff_base_ms = 1

[storage]
type = "filesystem"
path = "bucket"
"#
            ),
        )
    }
}

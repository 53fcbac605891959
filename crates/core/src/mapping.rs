//! Old-URL to new-URL table driving the rewrite.

use crate::artifact::{self, ARTIFACT_VERSION, default_version, unix_epoch};
use crate::canonical::AssetHost;
use crate::manifest::Manifest;
use crate::scan::ScanReport;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use time::OffsetDateTime;

/// Characters escaped inside a single path segment of a published key.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'%');

/// `mapping.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(with = "time::serde::rfc3339", default = "unix_epoch")]
    pub generated_at: OffsetDateTime,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

impl Mapping {
    pub fn load(path: &Path) -> crate::Result<Option<Mapping>> {
        artifact::read_json(path)
    }

    pub fn save(&self, path: &Path) -> crate::Result<()> {
        artifact::write_json(path, self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Public base URL without trailing slashes.
pub fn normalize_base_url(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

/// Public URL for a storage key.
pub fn public_url(base_url: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect();
    format!("{}/{}", normalize_base_url(base_url), encoded.join("/"))
}

/// Build the mapping for every scanned variant whose asset has a final key.
pub fn build_mapping(
    scan: &ScanReport,
    manifest: &Manifest,
    host: &AssetHost,
    public_base_url: &str,
) -> Mapping {
    let base_url = normalize_base_url(public_base_url).to_string();
    let entries = scan
        .urls
        .iter()
        .filter_map(|entry| {
            let canonical = host.canonicalize(&entry.url)?;
            let final_key = manifest
                .get(&canonical.asset.canonical_url)?
                .final_key
                .as_deref()?;
            Some((entry.url.clone(), public_url(&base_url, final_key)))
        })
        .collect();

    Mapping {
        version: ARTIFACT_VERSION,
        generated_at: scan.generated_at,
        base_url,
        entries,
    }
}

//! Migration plan: raw references grouped under canonical assets.

use crate::artifact::{ARTIFACT_VERSION, default_version, unix_epoch};
use crate::canonical::AssetHost;
use crate::error::KeyCollision;
use crate::key::{KeySuffixMode, derive_key_base, has_image_extension};
use crate::scan::ScanReport;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;
use tracing::debug;

/// Key resolution options for a plan build.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlanOptions {
    pub key_prefix: Option<String>,
    pub key_suffix: Option<KeySuffixMode>,
}

/// One canonical asset and every raw variant pointing at it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanAsset {
    pub canonical_url: String,
    pub download_url: String,
    pub path_after_account: String,
    pub key_base: String,
    pub has_extension: bool,
    /// Another asset shares this key base; the final key gets a hash suffix.
    pub needs_suffix: bool,
    pub variants: Vec<String>,
    pub sources: Vec<String>,
}

/// `plan.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(with = "time::serde::rfc3339", default = "unix_epoch")]
    pub generated_at: OffsetDateTime,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub key_suffix_mode: Option<KeySuffixMode>,
    #[serde(default)]
    pub assets: Vec<PlanAsset>,
}

#[derive(Default)]
struct Group {
    download_url: String,
    path_after_account: String,
    key_base: String,
    variants: BTreeSet<String>,
    sources: BTreeSet<String>,
}

/// Build the plan for a scan report.
///
/// Output depends only on the report and the options: assets are ordered by
/// canonical URL, variants and sources lexicographically, and the timestamp
/// is the scan's own. Key-base collisions fail the build unless a suffix
/// mode is configured, in which case every colliding asset is flagged.
pub fn build_plan(
    scan: &ScanReport,
    host: &AssetHost,
    options: &PlanOptions,
) -> crate::Result<Plan> {
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    let mut owners: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for entry in &scan.urls {
        let Some(canonical) = host.canonicalize(&entry.url) else {
            debug!(url = %entry.url, "skipping unrecognized url");
            continue;
        };
        let asset = canonical.asset;
        let Some(key_base) =
            derive_key_base(&asset.path_after_account, options.key_prefix.as_deref())
        else {
            debug!(url = %entry.url, "skipping url without a usable key");
            continue;
        };

        owners
            .entry(key_base.clone())
            .or_default()
            .insert(asset.canonical_url.clone());

        let group = groups
            .entry(asset.canonical_url)
            .or_insert_with(|| Group {
                download_url: asset.download_url,
                path_after_account: asset.path_after_account,
                key_base,
                ..Group::default()
            });
        group.variants.insert(entry.url.clone());
        group.sources.extend(entry.files.iter().cloned());
    }

    let collisions: Vec<KeyCollision> = owners
        .into_iter()
        .filter(|(_, urls)| urls.len() > 1)
        .map(|(key_base, urls)| KeyCollision {
            key_base,
            canonical_urls: urls.into_iter().collect(),
        })
        .collect();

    if !collisions.is_empty() && options.key_suffix.is_none() {
        return Err(crate::Error::KeyCollision(collisions));
    }

    let colliding: BTreeSet<&str> = collisions
        .iter()
        .map(|collision| collision.key_base.as_str())
        .collect();

    let assets = groups
        .into_iter()
        .map(|(canonical_url, group)| PlanAsset {
            needs_suffix: colliding.contains(group.key_base.as_str()),
            has_extension: has_image_extension(&group.key_base),
            canonical_url,
            download_url: group.download_url,
            path_after_account: group.path_after_account,
            key_base: group.key_base,
            variants: group.variants.into_iter().collect(),
            sources: group.sources.into_iter().collect(),
        })
        .collect();

    Ok(Plan {
        version: ARTIFACT_VERSION,
        generated_at: scan.generated_at,
        key_prefix: options.key_prefix.clone(),
        key_suffix_mode: options.key_suffix,
        assets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanEntry;
    use pretty_assertions::assert_eq;

    fn host() -> AssetHost {
        AssetHost::new("cdn.example", "acct")
    }

    fn entry(url: &str, files: &[&str]) -> ScanEntry {
        ScanEntry {
            url: url.to_string(),
            count: files.len() as u64,
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn report(urls: Vec<ScanEntry>) -> ScanReport {
        ScanReport {
            version: ARTIFACT_VERSION,
            generated_at: OffsetDateTime::UNIX_EPOCH,
            allowlist: Default::default(),
            files_scanned: 0,
            urls,
            skipped: Vec::new(),
        }
    }

    #[test]
    fn test_groups_variants_under_canonical_asset() {
        let scan = report(vec![
            entry(
                "https://cdn.example/acct/tr:w-1500/studio/ink.png?updatedAt=1",
                &["content/b.md"],
            ),
            entry("https://cdn.example/acct/studio/ink.png", &["content/a.md"]),
            entry("https://cdn.example/acct/blog/cover", &["content/a.md"]),
        ]);
        let options = PlanOptions {
            key_prefix: Some("images/".to_string()),
            key_suffix: None,
        };
        let plan = build_plan(&scan, &host(), &options).unwrap();

        assert_eq!(plan.key_prefix.as_deref(), Some("images/"));
        assert_eq!(plan.assets.len(), 2);
        let cover = &plan.assets[0];
        assert_eq!(cover.canonical_url, "https://cdn.example/acct/blog/cover");
        assert_eq!(cover.key_base, "images/blog/cover");
        assert!(!cover.has_extension);

        let ink = &plan.assets[1];
        assert_eq!(ink.key_base, "images/studio/ink.png");
        assert!(ink.has_extension);
        assert!(!ink.needs_suffix);
        assert_eq!(
            ink.variants,
            vec![
                "https://cdn.example/acct/studio/ink.png",
                "https://cdn.example/acct/tr:w-1500/studio/ink.png?updatedAt=1",
            ]
        );
        assert_eq!(ink.sources, vec!["content/a.md", "content/b.md"]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let urls = vec![
            entry("https://cdn.example/acct/b.png?v=1", &["content/z.md", "content/y.md"]),
            entry("https://cdn.example/acct/a.png", &["content/x.md"]),
            entry("https://cdn.example/acct/tr:w-5/a.png", &["content/w.md"]),
        ];
        let mut reversed = urls.clone();
        reversed.reverse();

        let options = PlanOptions::default();
        let first = build_plan(&report(urls), &host(), &options).unwrap();
        let second = build_plan(&report(reversed), &host(), &options).unwrap();
        assert_eq!(
            serde_json::to_string_pretty(&first).unwrap(),
            serde_json::to_string_pretty(&second).unwrap()
        );
    }

    #[test]
    fn test_collision_without_suffix_mode_fails() {
        let scan = report(vec![
            entry("https://cdn.example/acct/studio/ink.png", &["content/a.md"]),
            entry("https://cdn.example/acct/studio/ink.png?v=2", &["content/b.md"]),
        ]);
        let err = build_plan(&scan, &host(), &PlanOptions::default()).unwrap_err();
        let crate::Error::KeyCollision(collisions) = &err else {
            panic!("expected collision, got {err:?}");
        };
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].key_base, "studio/ink.png");
        assert_eq!(
            collisions[0].canonical_urls,
            vec![
                "https://cdn.example/acct/studio/ink.png",
                "https://cdn.example/acct/studio/ink.png?v=2",
            ]
        );
        let message = err.to_string();
        assert!(message.contains("--key-suffix sha8"));
        assert!(message.contains("studio/ink.png -> "));
    }

    #[test]
    fn test_collision_with_suffix_mode_flags_every_collider() {
        let scan = report(vec![
            entry("https://cdn.example/acct/studio/ink.png", &["content/a.md"]),
            entry("https://cdn.example/acct/studio/ink.png?v=2", &["content/b.md"]),
            entry("https://cdn.example/acct/studio/ink.png?v=3", &["content/c.md"]),
            entry("https://cdn.example/acct/studio/other.png", &["content/c.md"]),
        ]);
        let options = PlanOptions {
            key_prefix: None,
            key_suffix: Some(KeySuffixMode::Sha8),
        };
        let plan = build_plan(&scan, &host(), &options).unwrap();
        let flagged: Vec<bool> = plan.assets.iter().map(|a| a.needs_suffix).collect();
        assert_eq!(flagged, vec![true, true, true, false]);
        assert_eq!(plan.key_suffix_mode, Some(KeySuffixMode::Sha8));
    }

    #[test]
    fn test_plan_serializes_camel_case() {
        let scan = report(vec![entry("https://cdn.example/acct/a.png", &["content/a.md"])]);
        let plan = build_plan(&scan, &host(), &PlanOptions::default()).unwrap();
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["generatedAt"], "1970-01-01T00:00:00Z");
        assert_eq!(json["keySuffixMode"], serde_json::Value::Null);
        assert_eq!(json["assets"][0]["pathAfterAccount"], "a.png");
        assert_eq!(json["assets"][0]["hasExtension"], true);
    }
}

//! Canonical identity for asset-host URLs.
//!
//! Canonicalization is a pure string rewrite: the same raw URL always yields
//! the same [`CanonicalAsset`], and query noise or transform directives never
//! change an asset's identity.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::{Url, form_urlencoded};

/// Default asset host.
pub const DEFAULT_HOST: &str = "ik.imagekit.io";

/// Default account segment on the asset host.
pub const DEFAULT_ACCOUNT: &str = "tempoimmaterial";

/// Query parameters that never contribute to asset identity.
const TRANSFORM_PARAM: &str = "tr";
const CACHE_BUST_PARAM: &str = "updatedAt";

/// Prefixes of a path segment carrying an on-the-fly transform directive.
const TRANSFORM_SEGMENT_PREFIXES: [&str; 3] = ["tr:", "tr-", "tr~"];

/// The third-party host (and account) whose references are being migrated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHost {
    /// Hostname, e.g. `ik.imagekit.io`.
    #[serde(default = "default_host")]
    pub host: String,
    /// First path segment identifying the account.
    #[serde(default = "default_account")]
    pub account: String,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_account() -> String {
    DEFAULT_ACCOUNT.to_string()
}

impl Default for AssetHost {
    fn default() -> Self {
        Self {
            host: default_host(),
            account: default_account(),
        }
    }
}

/// Identity for one logical image.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CanonicalAsset {
    /// Scheme, host, account and path without transforms or volatile params.
    pub canonical_url: String,
    /// URL the original bytes are fetched from.
    pub download_url: String,
    /// Percent-decoded path relative to the account root.
    pub path_after_account: String,
}

/// Result of canonicalizing one raw reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Canonicalized {
    pub asset: CanonicalAsset,
    /// A leading transform path segment was dropped.
    pub removed_path_transform: bool,
    /// A `tr` query parameter was dropped.
    pub had_transform_param: bool,
    /// An `updatedAt` query parameter was dropped.
    pub had_updated_at: bool,
}

impl AssetHost {
    pub fn new(host: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            account: account.into(),
        }
    }

    /// `host/account`, as shown in user-facing messages.
    pub fn label(&self) -> String {
        format!("{}/{}", self.host, self.account)
    }

    /// Canonicalize a raw reference.
    ///
    /// Returns `None` when the URL does not point at this host and account.
    pub fn canonicalize(&self, raw: &str) -> Option<Canonicalized> {
        let normalized = normalize_scheme(raw)?;
        let url = Url::parse(&normalized).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        if !url
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(&self.host))
        {
            return None;
        }

        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        let (account, mut rest) = segments.split_first()?;
        if *account != self.account {
            return None;
        }

        let mut removed_path_transform = false;
        while let Some((first, tail)) = rest.split_first()
            && is_transform_segment(first)
        {
            rest = tail;
            removed_path_transform = true;
        }

        let path_after_account = rest
            .iter()
            .map(|segment| {
                let decoded = percent_decode_str(segment).decode_utf8().ok()?;
                if matches!(&*decoded, "." | "..") {
                    None
                } else {
                    Some(decoded.into_owned())
                }
            })
            .collect::<Option<Vec<_>>>()?
            .join("/");

        let mut canonical_url = format!("{}://{}", url.scheme(), url.host_str()?);
        if let Some(port) = url.port() {
            canonical_url.push_str(&format!(":{port}"));
        }
        canonical_url.push('/');
        canonical_url.push_str(account);
        canonical_url.push('/');
        canonical_url.push_str(&rest.join("/"));

        let mut had_transform_param = false;
        let mut had_updated_at = false;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| match &**name {
                TRANSFORM_PARAM => {
                    had_transform_param = true;
                    false
                }
                CACHE_BUST_PARAM => {
                    had_updated_at = true;
                    false
                }
                _ => true,
            })
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        if !kept.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&kept)
                .finish();
            canonical_url.push('?');
            canonical_url.push_str(&query);
        }

        Some(Canonicalized {
            asset: CanonicalAsset {
                download_url: canonical_url.clone(),
                canonical_url,
                path_after_account,
            },
            removed_path_transform,
            had_transform_param,
            had_updated_at,
        })
    }
}

/// Turn protocol-relative references into https and reject other schemes.
fn normalize_scheme(raw: &str) -> Option<String> {
    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    None
}

/// Whether a path segment is an on-the-fly transform directive.
pub fn is_transform_segment(segment: &str) -> bool {
    TRANSFORM_SEGMENT_PREFIXES
        .iter()
        .any(|prefix| segment.starts_with(prefix))
}

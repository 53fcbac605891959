//! Storage key derivation and resolution.
//!
//! A key goes through two phases. At plan time it is derived purely from the
//! URL (`key_base`). Once the bytes are known it is resolved into the final
//! key: an extension is appended when the key base has none, and a
//! content-hash suffix is applied to assets whose key base collided.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Extensions recognized as image files (lowercase, without the dot).
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "gif", "svg"];

const CONTENT_TYPE_EXTENSIONS: [(&str, &str); 5] = [
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
    ("image/svg+xml", "svg"),
];

/// Strategy for disambiguating colliding key bases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySuffixMode {
    /// First 8 hex characters of the content SHA-256.
    #[default]
    Sha8,
}

impl KeySuffixMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha8 => "sha8",
        }
    }

    /// Suffix for an asset with the given content hash.
    pub fn suffix(self, hash: &ContentHash) -> String {
        match self {
            Self::Sha8 => hash.short_hex(8),
        }
    }
}

impl fmt::Display for KeySuffixMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeySuffixMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "sha8" => Ok(Self::Sha8),
            other => Err(crate::Error::Config(format!(
                "unknown key suffix mode '{other}' (expected: sha8)"
            ))),
        }
    }
}

/// Derive the storage key base from a path and an optional prefix.
///
/// Returns `None` for an empty path or a key that would not be a plain
/// relative path.
pub fn derive_key_base(path_after_account: &str, prefix: Option<&str>) -> Option<String> {
    if path_after_account.is_empty() {
        return None;
    }
    let prefix = prefix
        .unwrap_or_default()
        .trim_start_matches(['.', '/'])
        .trim_end_matches('/');
    let combined = if prefix.is_empty() {
        path_after_account.to_string()
    } else {
        format!("{prefix}/{path_after_account}")
    };
    let key = combined.trim_start_matches('/').to_string();
    is_safe_key(&key).then_some(key)
}

/// A key is safe when it is a non-empty relative path of normal segments.
pub fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('/')
        && !key.contains('\\')
        && key.split('/').all(|segment| !matches!(segment, "." | ".."))
}

/// Lowercased extension of the key's last segment.
fn extension(key: &str) -> Option<String> {
    Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Whether the key already ends in a recognized image extension.
pub fn has_image_extension(key: &str) -> bool {
    extension(key).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Strip parameters and normalize case: `Image/PNG; q=1` becomes `image/png`.
pub fn normalize_content_type(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
    (!essence.is_empty()).then_some(essence)
}

/// File extension for a known image content type.
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let essence = normalize_content_type(content_type)?;
    CONTENT_TYPE_EXTENSIONS
        .iter()
        .find(|(ct, _)| *ct == essence)
        .map(|(_, ext)| *ext)
}

/// Content type implied by the key's extension.
pub fn content_type_from_key(key: &str) -> Option<&'static str> {
    match extension(key)?.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// Insert a suffix before the extension, or append it when there is none.
pub fn apply_key_suffix(key: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return key.to_string();
    }
    match Path::new(key).extension().and_then(|ext| ext.to_str()) {
        Some(ext) => {
            let base = &key[..key.len() - ext.len() - 1];
            format!("{base}-{suffix}.{ext}")
        }
        None => format!("{key}-{suffix}"),
    }
}

/// Append an extension inferred from the content type unless the key base
/// already carries an image extension.
///
/// Unknown content types leave the key base unchanged.
pub fn resolve_final_key(key_base: &str, content_type: Option<&str>) -> String {
    if has_image_extension(key_base) {
        return key_base.to_string();
    }
    match content_type.and_then(extension_from_content_type) {
        Some(ext) => format!("{key_base}.{ext}"),
        None => key_base.to_string(),
    }
}

/// Full key resolution once the content hash and type are known.
pub fn final_key(
    key_base: &str,
    content_type: Option<&str>,
    suffix: Option<&str>,
) -> String {
    let key = resolve_final_key(key_base, content_type);
    match suffix {
        Some(suffix) => apply_key_suffix(&key, suffix),
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_base_with_prefix() {
        assert_eq!(
            derive_key_base("studio/ink.png", Some("content-images")).as_deref(),
            Some("content-images/studio/ink.png")
        );
        assert_eq!(
            derive_key_base("studio/ink.png", Some("./images/")).as_deref(),
            Some("images/studio/ink.png")
        );
        assert_eq!(
            derive_key_base("a b.png", None).as_deref(),
            Some("a b.png")
        );
        assert_eq!(derive_key_base("", Some("x")), None);
    }

    #[test]
    fn test_derive_key_base_rejects_unsafe_paths() {
        assert_eq!(derive_key_base("../etc/passwd", None), None);
        assert_eq!(derive_key_base("a/./b.png", None), None);
        assert_eq!(derive_key_base("a\\b.png", None), None);
    }

    #[test]
    fn test_has_image_extension() {
        assert!(has_image_extension("studio/ink.PNG"));
        assert!(has_image_extension("a.jpeg"));
        assert!(!has_image_extension("studio/ink"));
        assert!(!has_image_extension("notes.pdf"));
        assert!(!has_image_extension("dir.png/file"));
    }

    #[test]
    fn test_resolve_final_key_with_content_type() {
        assert_eq!(resolve_final_key("studio/ink", Some("image/png")), "studio/ink.png");
        assert_eq!(
            resolve_final_key("studio/ink", Some("image/svg+xml; charset=utf-8")),
            "studio/ink.svg"
        );
        assert_eq!(resolve_final_key("studio/ink.png", Some("image/jpeg")), "studio/ink.png");
        assert_eq!(resolve_final_key("studio/ink", Some("application/pdf")), "studio/ink");
        assert_eq!(resolve_final_key("studio/ink", None), "studio/ink");
    }

    #[test]
    fn test_apply_key_suffix() {
        assert_eq!(apply_key_suffix("studio/ink.png", "abcd1234"), "studio/ink-abcd1234.png");
        assert_eq!(apply_key_suffix("studio/ink", "abcd1234"), "studio/ink-abcd1234");
        assert_eq!(apply_key_suffix("studio/ink.png", ""), "studio/ink.png");
    }

    #[test]
    fn test_final_key_combines_extension_and_suffix() {
        assert_eq!(
            final_key("ruined piano", Some("image/jpeg"), Some("0011aabb")),
            "ruined piano-0011aabb.jpg"
        );
    }

    #[test]
    fn test_content_type_helpers() {
        assert_eq!(normalize_content_type(" Image/PNG ; q=1").as_deref(), Some("image/png"));
        assert_eq!(normalize_content_type("  "), None);
        assert_eq!(content_type_from_key("x/y.JPG"), Some("image/jpeg"));
        assert_eq!(content_type_from_key("x/y"), None);
    }

    #[test]
    fn test_suffix_mode_parse() {
        assert_eq!("sha8".parse::<KeySuffixMode>().unwrap(), KeySuffixMode::Sha8);
        assert!("md5".parse::<KeySuffixMode>().is_err());
        let hash = ContentHash::compute(b"hello world");
        assert_eq!(KeySuffixMode::Sha8.suffix(&hash), "b94d27b9");
    }
}

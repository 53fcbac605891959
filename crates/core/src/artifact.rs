//! JSON artifact persistence.
//!
//! Every stage writes its output as a pretty-printed JSON document so the
//! pipeline can be stopped and resumed at any stage boundary. Writes go to a
//! temporary sibling first and are renamed into place, so a killed process
//! leaves either the previous document or the new one.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::Path;
use time::OffsetDateTime;
use uuid::Uuid;

/// Schema version written into every artifact.
pub const ARTIFACT_VERSION: u32 = 1;

pub const SCAN_FILE: &str = "scan.json";
pub const PLAN_FILE: &str = "plan.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const MAPPING_FILE: &str = "mapping.json";

pub(crate) fn default_version() -> u32 {
    ARTIFACT_VERSION
}

pub(crate) fn unix_epoch() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}

/// Read a JSON artifact, returning `None` if it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> crate::Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content).map(Some).map_err(|e| {
        crate::Error::Serialization(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Write a JSON artifact atomically, with a trailing newline.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> crate::Result<()> {
    let mut json = serde_json::to_string_pretty(value)
        .map_err(|e| crate::Error::Serialization(e.to_string()))?;
    json.push('\n');
    write_atomic(path, json.as_bytes())
}

/// Write bytes to a temp file next to `path`, fsync, then rename over it.
pub fn write_atomic(path: &Path, data: &[u8]) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!("{file_name}.tmp.{}", Uuid::new_v4()));
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
    }

    #[test]
    fn test_missing_artifact_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let doc: Option<Doc> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(doc.is_none());
    }

    #[test]
    fn test_write_json_is_pretty_with_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/doc.json");
        let doc = Doc {
            name: "ink".to_string(),
        };
        write_json(&path, &doc).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "{\n  \"name\": \"ink\"\n}\n");
        assert_eq!(read_json::<Doc>(&path).unwrap(), Some(doc));

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_corrupt_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            read_json::<Doc>(&path),
            Err(crate::Error::Serialization(_))
        ));
    }
}

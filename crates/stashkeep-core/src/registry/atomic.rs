//! Atomic JSON persistence for the registry document.
//!
//! Writes go to a temp file in the target's directory, are synced, and then
//! renamed over the target, so a crash mid-write leaves the previous document
//! intact.

use crate::config::RegistryConfig;
use crate::{Result, StashError};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StashError::io_with_path(e, path)),
    };

    let data = serde_json::from_str(&contents).map_err(|e| StashError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Serialize `data` and atomically replace `path` with it.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| StashError::io_with_path(e, &parent))?;

    let serialized = serde_json::to_vec_pretty(data).map_err(|e| StashError::Json {
        message: format!("Failed to serialize {}: {}", path.display(), e),
        source: Some(e),
    })?;

    let mut temp = NamedTempFile::new_in(&parent).map_err(|e| StashError::io_with_path(e, &parent))?;
    temp.write_all(&serialized)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| StashError::io_with_path(e, temp.path()))?;

    temp.persist(path)
        .map_err(|e| StashError::io_with_path(e.error, path))?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

/// Copy an unreadable document aside so the next write does not destroy it.
///
/// Returns the path of the copy.
pub fn quarantine(path: &Path) -> Option<PathBuf> {
    let mut name = path.file_name()?.to_os_string();
    name.push(".");
    name.push(RegistryConfig::CORRUPT_SUFFIX);
    let target = path.with_file_name(name);

    match fs::copy(path, &target) {
        Ok(_) => Some(target),
        Err(e) => {
            warn!("Failed to preserve {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        value: i32,
    }

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.json");
        let doc = Doc {
            name: "stash".into(),
            value: 7,
        };

        write_json(&path, &doc).unwrap();
        let read: Option<Doc> = read_json(&path).unwrap();
        assert_eq!(read, Some(doc));
    }

    #[test]
    fn test_read_missing_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let read: Option<Doc> = read_json(&temp_dir.path().join("missing.json")).unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn test_read_garbage_is_json_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.json");
        fs::write(&path, "{ not json").unwrap();

        let err = read_json::<Doc>(&path).unwrap_err();
        assert!(matches!(err, StashError::Json { .. }));
    }

    #[test]
    fn test_write_creates_directories_and_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("doc.json");

        write_json(&path, &Doc { name: "a".into(), value: 1 }).unwrap();
        write_json(&path, &Doc { name: "b".into(), value: 2 }).unwrap();

        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("doc.json")]);
    }

    #[test]
    fn test_quarantine_copies_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("containers.json");
        fs::write(&path, "garbage").unwrap();

        let copy = quarantine(&path).unwrap();
        assert!(copy.ends_with("containers.json.corrupt"));
        assert_eq!(fs::read_to_string(copy).unwrap(), "garbage");
    }
}

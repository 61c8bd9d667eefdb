//! Durable JSON file helpers.
//!
//! All registries and stores persist through [`atomic_write_json`]: the
//! document is written to a sibling temp file and renamed into place, so a
//! crash mid-write never leaves a truncated file behind.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;

/// Atomically serialize `value` as pretty JSON to `path`.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, json)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Load a JSON document, returning `Ok(None)` when the file is absent.
///
/// A present-but-unparsable file is an error; silently discarding durable
/// state would drop tracked entries on restart.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut map = HashMap::new();
        map.insert("alice".to_string(), 1u32);

        atomic_write_json(&path, &map).unwrap();
        let loaded: Option<HashMap<String, u32>> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(map));

        // No temp file left behind.
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_absent_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Vec<String>> = load_json(&dir.path().join("missing.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();

        let loaded: Result<Option<Vec<String>>> = load_json(&path);
        assert!(loaded.is_err());
    }
}

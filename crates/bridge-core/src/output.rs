//! Reading inputs and writing outputs
//!
//! Output is serialized in full before anything touches the destination,
//! then written to a temporary file beside it and renamed into place. A
//! failed run therefore never leaves a partial file behind.

use crate::error::{BridgeError, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `value` as pretty JSON to `path`
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        BridgeError::malformed(path.display().to_string(), format!("cannot serialize output: {e}"))
    })?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let io_err = |source: std::io::Error| BridgeError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(json.as_bytes()).map_err(io_err)?;
    tmp.write_all(b"\n").map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    tracing::debug!(path = %path.display(), bytes = json.len(), "wrote output");
    Ok(())
}

/// Read and parse a JSON input file
pub fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => BridgeError::MissingResource {
            path: path.to_path_buf(),
        },
        _ => BridgeError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    serde_json::from_str(&text).map_err(|e| {
        BridgeError::malformed(path.display().to_string(), format!("invalid JSON: {e}"))
    })
}

/// Parse a JSON input into a typed document
pub fn from_value<T: serde::de::DeserializeOwned>(value: Value, context: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| BridgeError::malformed(context, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        write_json_atomic(&path, &json!([{"data": {"image": "a.png"}}])).unwrap();
        let back = read_json(&path).unwrap();
        assert_eq!(back[0]["data"]["image"], "a.png");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        fs::write(&path, "old").unwrap();
        write_json_atomic(&path, &json!({"new": true})).unwrap();
        assert_eq!(read_json(&path).unwrap()["new"], true);
    }

    #[test]
    fn test_write_into_missing_dir_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("out.json");
        assert!(matches!(
            write_json_atomic(&path, &json!({})),
            Err(BridgeError::Io { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_read_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            read_json(&missing),
            Err(BridgeError::MissingResource { .. })
        ));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        let err = read_json(&bad).unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }
}

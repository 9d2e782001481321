//! File I/O utilities with atomic writes
//!
//! Provides safe file operations that won't corrupt data on failure.
//! Configuration documents are YAML; backup sidecars are JSON.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::NixEnvError;

use super::atomic::{atomic_rename, with_suffix};

/// Read a YAML document, returning an error if the file doesn't exist
pub fn read_yaml<T, P>(path: P) -> Result<T, NixEnvError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let file = File::open(path)
        .map_err(|e| NixEnvError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    let reader = BufReader::new(file);
    serde_yaml::from_reader(reader)
        .map_err(|e| NixEnvError::Yaml(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write a YAML document atomically (write to temp, then rename)
///
/// Multi-line strings are emitted in block-literal style by serde_yaml.
pub fn write_yaml_atomic<T, P>(path: P, data: &T) -> Result<(), NixEnvError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    write_atomic(path.as_ref(), |writer| {
        serde_yaml::to_writer(writer, data)
            .map_err(|e| NixEnvError::Yaml(format!("Failed to serialize data: {}", e)))
    })
}

/// Read JSON from a file, returning an error if the file doesn't exist
pub fn read_json<T, P>(path: P) -> Result<T, NixEnvError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let file = File::open(path)
        .map_err(|e| NixEnvError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| NixEnvError::Json(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write JSON to a file atomically (write to temp, then rename)
pub fn write_json_atomic<T, P>(path: P, data: &T) -> Result<(), NixEnvError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    write_atomic(path.as_ref(), |writer| {
        serde_json::to_writer_pretty(writer, data)
            .map_err(|e| NixEnvError::Json(format!("Failed to serialize data: {}", e)))
    })
}

/// Write through a serializer into `path.tmp`, sync, then rename onto `path`
///
/// The file is either completely written or not modified at all.
fn write_atomic<F>(path: &Path, serialize: F) -> Result<(), NixEnvError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), NixEnvError>,
{
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            NixEnvError::Io(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    // Create temp file in same directory (important for atomic rename)
    let temp_path = with_suffix(path, ".tmp");

    let result = (|| {
        let file = File::create(&temp_path)
            .map_err(|e| NixEnvError::Io(format!("Failed to create temp file: {}", e)))?;

        let mut writer = BufWriter::new(file);
        serialize(&mut writer)?;

        writer
            .flush()
            .map_err(|e| NixEnvError::Io(format!("Failed to flush data: {}", e)))?;

        // Sync to disk before rename
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| NixEnvError::Io(format!("Failed to sync data: {}", e)))?;

        atomic_rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    struct TestData {
        name: String,
        body: String,
    }

    #[test]
    fn test_write_and_read_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.yaml");

        let data = TestData {
            name: "test".to_string(),
            body: "line one\nline two\n".to_string(),
        };

        write_yaml_atomic(&path, &data).unwrap();
        let loaded: TestData = read_yaml(&path).unwrap();
        assert_eq!(data, loaded);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("body: |"));
    }

    #[test]
    fn test_atomic_write_no_temp_file_left() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.json");

        write_json_atomic(&path, &TestData::default()).unwrap();

        assert!(path.exists());
        assert!(!temp_dir.path().join("test.json.tmp").exists());
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("test.yaml");

        write_yaml_atomic(&path, &TestData::default()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_read_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.yaml");
        assert!(read_yaml::<TestData, _>(&path).is_err());
        assert!(read_json::<TestData, _>(&path).is_err());
    }

    #[test]
    fn test_read_invalid_yaml_is_yaml_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "name: [unterminated").unwrap();

        let err = read_yaml::<TestData, _>(&path).unwrap_err();
        assert!(matches!(err, NixEnvError::Yaml(_)));
    }
}

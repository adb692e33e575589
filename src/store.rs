//! Named configuration storage
//!
//! A [`ConfigStore`] keeps opaque blobs under names. [`JsonFileStore`]
//! persists them as one JSON document mapping each name to the blob's
//! hex encoding. Scripts are stored as their JSON
//! [`ScriptDefinition`](crate::conformance::ScriptDefinition).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::conformance::{Script, ScriptDefinition, ScriptError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Entry {0} is not valid hex")]
    InvalidEntry(String),

    #[error("Stored script is invalid: {0}")]
    InvalidScript(#[from] ScriptError),
}

/// Key to blob storage for named configurations.
pub trait ConfigStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&mut self, name: &str, blob: &[u8]) -> Result<(), StoreError>;

    /// Stored names in sorted order.
    fn list(&self) -> Vec<String>;

    /// Remove `name`. Returns whether it existed.
    fn delete(&mut self, name: &str) -> Result<bool, StoreError>;
}

/// A store backed by a single JSON file, cached in memory.
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let entries = if path.exists() {
            let data = std::fs::read(path).map_err(|e| StoreError::IoError(e.to_string()))?;
            serde_json::from_slice(&data)
                .map_err(|e| StoreError::DeserializationError(e.to_string()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| StoreError::IoError(e.to_string()))
    }
}

impl ConfigStore for JsonFileStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.entries
            .get(name)
            .map(|encoded| hex::decode(encoded).map_err(|_| StoreError::InvalidEntry(name.into())))
            .transpose()
    }

    fn put(&mut self, name: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(name.to_string(), hex::encode(blob));
        self.flush()
    }

    fn list(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn delete(&mut self, name: &str) -> Result<bool, StoreError> {
        if self.entries.remove(name).is_none() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }
}

/// Store `script` under its own name.
pub fn save_script(store: &mut dyn ConfigStore, script: &Script) -> Result<(), StoreError> {
    let json = serde_json::to_vec(&script.definition())
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;
    store.put(script.name(), &json)
}

/// Load and validate the script stored under `name`.
pub fn load_script(store: &dyn ConfigStore, name: &str) -> Result<Option<Script>, StoreError> {
    let Some(blob) = store.get(name)? else {
        return Ok(None);
    };
    let definition: ScriptDefinition = serde_json::from_slice(&blob)
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(Some(Script::try_from(definition)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::{LOCK, LOCK_STATE};
    use crate::ble::transport::GattStatus;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("configs.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        store.put("office", &[0x10, 0xEE, 0x00]).unwrap();
        store.put("lobby", &[0x01]).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("office").unwrap(), Some(vec![0x10, 0xEE, 0x00]));
        assert_eq!(reopened.list(), vec!["lobby".to_string(), "office".to_string()]);
        assert_eq!(reopened.get("missing").unwrap(), None);
    }

    #[test]
    fn test_delete_reports_existence() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::open(&dir.path().join("configs.json")).unwrap();
        store.put("a", &[1]).unwrap();

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("configs.json");
        std::fs::write(&path, r#"{"bad":"zz"}"#).unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert!(matches!(store.get("bad"), Err(StoreError::InvalidEntry(_))));
    }

    #[test]
    fn test_script_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::open(&dir.path().join("nested/configs.json")).unwrap();
        let script = Script::builder("Lock Beacon")
            .connect()
            .write(LOCK, [0u8; 16], GattStatus::SUCCESS)
            .assert_equals(LOCK_STATE, [1u8], GattStatus::SUCCESS)
            .build();

        save_script(&mut store, &script).unwrap();
        let loaded = load_script(&store, "Lock Beacon").unwrap().unwrap();
        assert_eq!(loaded, script);
        assert!(load_script(&store, "Other").unwrap().is_none());
    }

    #[test]
    fn test_invalid_stored_script_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::open(&dir.path().join("configs.json")).unwrap();
        store
            .put("empty", br#"{"name":"empty","actions":[]}"#)
            .unwrap();
        assert!(matches!(
            load_script(&store, "empty"),
            Err(StoreError::InvalidScript(ScriptError::Empty))
        ));
    }
}

//! JSON-file backed store, the desktop stand-in for browser local storage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::debug;

use super::{KeyValueStore, StoreOp};

/// Store file name in the data directory
pub const STORE_FILE: &str = "storage.json";

/// Key-value pairs kept as a single JSON object on disk.
///
/// Every write reads the current file, applies the change and replaces the
/// file through a temporary sibling, so a batch lands entirely or not at all.
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Store at `dir/storage.json`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read store file: {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse store file: {}", self.path.display()))
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write store file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace store file: {}", self.path.display()))?;
        Ok(())
    }

    fn modify(&self, ops: &[StoreOp]) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut entries = self.read_all()?;
        for op in ops {
            match op {
                StoreOp::Set(key, value) => {
                    entries.insert(key.to_string(), value.clone());
                }
                StoreOp::Remove(key) => {
                    entries.remove(*key);
                }
            }
        }
        self.write_all(&entries)?;
        debug!(path = %self.path.display(), ops = ops.len(), "Store updated");
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }

    fn write_batch(&self, ops: &[StoreOp]) -> Result<()> {
        self.modify(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::in_dir(dir.path());
        store.set("accessToken", "T1").unwrap();
        store.set("language", "fr").unwrap();

        let reopened = FileStore::in_dir(dir.path());
        assert_eq!(reopened.get("accessToken").unwrap().as_deref(), Some("T1"));
        assert_eq!(reopened.get("language").unwrap().as_deref(), Some("fr"));
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::in_dir(&dir.path().join("nested"));
        assert_eq!(store.get("accessToken").unwrap(), None);
        store.remove("accessToken").unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn test_batch_is_written_once_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::in_dir(dir.path());
        store.set("wishlistCount", "2").unwrap();
        store
            .write_batch(&[
                StoreOp::Set("accessToken", "T1".into()),
                StoreOp::Set("deviceId", "D1".into()),
                StoreOp::Remove("refreshToken"),
            ])
            .unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed["wishlistCount"], "2");
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::in_dir(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.get("accessToken").is_err());
    }
}

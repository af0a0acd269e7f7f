use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;

use super::{KeyValueStore, StoreOp};

/// In-memory store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // poisoned lock still guards a consistent map
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn write_batch(&self, ops: &[StoreOp]) -> Result<()> {
        let mut entries = self.entries();
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("cartCount").unwrap(), None);

        store.set("cartCount", "3").unwrap();
        assert_eq!(store.get("cartCount").unwrap().as_deref(), Some("3"));

        store.remove("cartCount").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_batch_applies_in_order() {
        let store = MemoryStore::new();
        store
            .write_batch(&[
                StoreOp::Set("deviceId", "D1".into()),
                StoreOp::Set("deviceId", "D2".into()),
                StoreOp::Remove("refreshToken"),
            ])
            .unwrap();
        assert_eq!(store.get("deviceId").unwrap().as_deref(), Some("D2"));
        assert_eq!(store.len(), 1);
    }
}

//! In-memory key-value store.

use crate::error::Result;
use crate::key::validate as validate_key;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::KeyValueStore;

/// In-memory key-value store.
///
/// Values are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Nothing survives
/// the process; use it for session-only persistence and in tests.
///
/// # Examples
///
/// ```
/// use moim_storage::backend::{KeyValueStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::with_entries([("favorites", r#"{"7":{"count":1,"ids":[3]}}"#)]);
/// assert!(store.contains("favorites").await.unwrap());
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore {
    name: String,
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create a store pre-populated with entries.
    ///
    /// Panics if any key fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_entries(entries: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        let mut map = HashMap::new();
        for (key, value) in entries {
            let key = key.into();
            if validate_key(&key).is_err() {
                panic!("MemoryStore::with_entries: invalid key {key:?}");
            }
            map.insert(key, value.into());
        }
        Self { name: "memory".to_string(), entries: RwLock::new(map) }
    }

    /// Change the name of the store.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
impl Default for MemoryStore {
    fn default() -> Self {
        let entries: [(&str, &str); 0] = [];
        Self::with_entries(entries)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        let key = validate_key(key)?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let key = validate_key(key)?;
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = validate_key(key)?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let key = validate_key(key)?;
        Ok(self.entries.read().await.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_write_and_read() {
        let store = MemoryStore::default();
        store.write("favorites", "{}").await.unwrap();
        assert_eq!(store.read("favorites").await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let store = MemoryStore::with_entries([("favorites", "old")]);
        store.write("favorites", "new").await.unwrap();
        assert_eq!(store.read("favorites").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_read_missing() {
        let store = MemoryStore::default();
        assert_eq!(store.read("missing").await.unwrap(), None);
        assert!(!store.contains("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::with_entries([("auth-store", "{}")]);
        store.remove("auth-store").await.unwrap();
        assert!(!store.contains("auth-store").await.unwrap());
        // Removing again is fine
        store.remove("auth-store").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let store = MemoryStore::default();
        let err = store.write("../escape", "bad").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(_)));
        assert!(store.read("").await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid key")]
    fn test_with_entries_panics_on_bad_key() {
        MemoryStore::with_entries([("../escape", "bad")]);
    }
}

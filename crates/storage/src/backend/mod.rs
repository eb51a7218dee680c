//! Key-value store trait and implementations.
//!
//! This module defines the `KeyValueStore` trait, the persistence
//! collaborator used for client state: a string-in, string-out store
//! addressed by fixed keys. Values are whole documents (usually JSON), never
//! partial updates.

mod local;
mod memory;

pub use self::local::FileStore;
pub use self::memory::MemoryStore;
use crate::error::Result;
use async_trait::async_trait;

/// Unified interface for key-value stores.
///
/// All operations are asynchronous so that file-backed stores don't block the
/// runtime. Keys must pass [`validate_key`](crate::validate_key);
/// implementations enforce this.
///
/// # Examples
///
/// ```
/// use moim_storage::{backend::{KeyValueStore, MemoryStore}, error::Result};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<()> {
/// let store = MemoryStore::default();
/// store.write("favorites", "{}").await?;
/// assert_eq!(store.read("favorites").await?.as_deref(), Some("{}"));
/// store.remove("favorites").await?;
/// assert_eq!(store.read("favorites").await?, None);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Name of the configured store (used for logging only).
    fn name(&self) -> &str;

    /// Read the value stored under `key`.
    ///
    /// Returns `Ok(None)` if nothing is stored under the key.
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value stored under `key`.
    ///
    /// Removing a key that holds nothing is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Check whether anything is stored under `key`.
    ///
    /// Default implementation reads the value and discards it.
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }
}

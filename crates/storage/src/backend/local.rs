//! Local filesystem key-value store.
//!
//! Each key is stored as a single `<key>.json` file in a configured directory.
//! Writes go to a temporary sibling file first and are renamed into place, so
//! a crash mid-write never leaves a truncated document behind.

use crate::error::{ErrorKind, Result};
use crate::key::validate as validate_key;
use crate::KeyValueStore;
use async_trait::async_trait;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use tokio::fs;

const EXTENSION: &str = "json";

/// Local filesystem key-value store.
///
/// # Examples
///
/// ```no_run
/// use moim_storage::backend::FileStore;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = FileStore::new("local", "/home/me/.local/share/moim")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FileStore {
    name: String,
    /// Directory holding one file per key
    root: PathBuf,
}
impl FileStore {
    /// Create a new filesystem store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, exists but is not a
    /// directory, or cannot be created.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidRoot(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidRoot(root));
            }
        } else {
            // Only happens once at startup; not worth making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    fn file_path(&self, key: &str) -> Result<PathBuf> {
        let key = validate_key(key)?;
        Ok(self.root.join(format!("{key}.{EXTENSION}")))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.file_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(String::from_utf8(bytes).map_err(|_| ErrorKind::InvalidData(key.to_string()))?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(exn::Exn::from(Self::map_io_error(e, &path))),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.file_path(key)?;
        let staging = path.with_extension(format!("{EXTENSION}.tmp"));
        fs::write(&staging, value.as_bytes()).await.map_err(|e| Self::map_io_error(e, &staging))?;
        fs::rename(&staging, &path).await.map_err(|e| Self::map_io_error(e, &path))?;
        tracing::trace!(store = %self.name, key, bytes = value.len(), "wrote value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.file_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(exn::Exn::from(Self::map_io_error(e, &path))),
        }
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let path = self.file_path(key)?;
        Ok(fs::try_exists(&path).await.map_err(|e| Self::map_io_error(e, &path))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(FileStore::new("name", temp_dir.path()).is_ok());
        assert!(FileStore::new("name", "relative/path").is_err());
        assert!(FileStore::new("name", "./relative").is_err());
    }

    #[test]
    fn test_new_rejects_file_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"data").unwrap();
        let err = FileStore::new("name", &file).err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidRoot(_)));
    }

    #[test]
    fn test_new_creates_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("a/b");
        FileStore::new("name", &root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_file_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new("name", temp_dir.path()).unwrap();
        assert_eq!(store.file_path("favorites").unwrap(), temp_dir.path().join("favorites.json"));
        assert!(store.file_path("../favorites").is_err());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new("name", temp_dir.path()).unwrap();
        store.write("favorites", r#"{"7":{}}"#).await.unwrap();
        assert_eq!(store.read("favorites").await.unwrap().as_deref(), Some(r#"{"7":{}}"#));
        // No staging file left behind
        assert!(!temp_dir.path().join("favorites.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new("name", temp_dir.path()).unwrap();
        assert_eq!(store.read("favorites").await.unwrap(), None);
        assert!(!store.contains("favorites").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_invalid_utf8() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new("name", temp_dir.path()).unwrap();
        std::fs::write(temp_dir.path().join("favorites.json"), [0xFF, 0xFE]).unwrap();
        let err = store.read("favorites").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_remove() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new("name", temp_dir.path()).unwrap();
        store.write("auth-store", "{}").await.unwrap();
        assert!(store.contains("auth-store").await.unwrap());
        store.remove("auth-store").await.unwrap();
        assert!(!store.contains("auth-store").await.unwrap());
        // Removing a missing key is not an error
        store.remove("auth-store").await.unwrap();
    }

    #[tokio::test]
    async fn test_key_security() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new("name", temp_dir.path()).unwrap();
        assert!(store.read("../etc/passwd").await.is_err());
        assert!(store.write("../escape", "data").await.is_err());
        assert!(store.remove("..").await.is_err());
    }
}

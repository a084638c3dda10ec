//! Persistent embedding store backed by RocksDB.
//!
//! Keys are cache key strings, values are raw little-endian `f32` bytes.
//! The store is opened once, held for the owning cache's lifetime, and
//! flushed on close.

use std::path::{Path, PathBuf};

use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use crate::error::{CacheError, CacheResult, InitializationError};
use crate::types::Embedding;

/// Key reported in errors for operations spanning the whole store.
const ALL_KEYS: &str = "*";

/// On-disk key-value store of embeddings.
pub struct EmbeddingStore {
    db: DB,
    path: PathBuf,
}

impl EmbeddingStore {
    /// Open (creating if necessary) the store at `path`.
    ///
    /// With `reset`, every persisted entry is removed before the store is
    /// returned. Use it after changing a model in a way its parameters do
    /// not capture. Any failure here is fatal to the caller.
    pub fn open(path: &Path, reset: bool) -> Result<Self, InitializationError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| InitializationError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path).map_err(|source| InitializationError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let store = Self {
            db,
            path: path.to_path_buf(),
        };

        if reset {
            let cleared = store
                .clear_entries()
                .map_err(|source| InitializationError::Reset {
                    path: path.to_path_buf(),
                    source,
                })?;
            info!("Reset embedding store at {:?} ({} entries removed)", path, cleared);
        }

        info!("Opened embedding store at {:?}", path);
        Ok(store)
    }

    /// Location of the store on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exact-match lookup.
    pub fn get(&self, key: &str) -> CacheResult<Option<Embedding>> {
        let bytes = self.db.get(key.as_bytes()).map_err(|source| CacheError::Store {
            key: key.to_string(),
            source,
        })?;

        match bytes {
            None => Ok(None),
            Some(bytes) => Embedding::from_le_bytes(&bytes)
                .map(Some)
                .ok_or_else(|| CacheError::CorruptEntry {
                    key: key.to_string(),
                    message: format!("{} bytes is not a whole number of f32 values", bytes.len()),
                }),
        }
    }

    /// Insert or overwrite an entry.
    pub fn put(&self, key: &str, embedding: &Embedding) -> CacheResult<()> {
        self.put_bytes(key, &embedding.to_le_bytes())
    }

    fn put_bytes(&self, key: &str, bytes: &[u8]) -> CacheResult<()> {
        self.db
            .put(key.as_bytes(), bytes)
            .map_err(|source| CacheError::Store {
                key: key.to_string(),
                source,
            })?;
        debug!("Persisted {} bytes under {}", bytes.len(), key);
        Ok(())
    }

    /// Whether an entry exists under `key`.
    pub fn contains(&self, key: &str) -> CacheResult<bool> {
        self.db
            .get_pinned(key.as_bytes())
            .map(|v| v.is_some())
            .map_err(|source| CacheError::Store {
                key: key.to_string(),
                source,
            })
    }

    /// All stored keys, in byte order.
    pub fn keys(&self) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item.map_err(|source| CacheError::Store {
                key: ALL_KEYS.to_string(),
                source,
            })?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    /// Number of stored entries (full scan).
    pub fn len(&self) -> CacheResult<usize> {
        let mut count = 0;
        for item in self.db.iterator(IteratorMode::Start) {
            item.map_err(|source| CacheError::Store {
                key: ALL_KEYS.to_string(),
                source,
            })?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every entry, returning how many were removed.
    pub fn clear(&self) -> CacheResult<usize> {
        self.clear_entries().map_err(|source| CacheError::Store {
            key: ALL_KEYS.to_string(),
            source,
        })
    }

    fn clear_entries(&self) -> Result<usize, rocksdb::Error> {
        let mut batch = WriteBatch::default();
        let mut count = 0;
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete(key);
            count += 1;
        }
        self.db.write(batch)?;
        Ok(count)
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> CacheResult<()> {
        self.db.flush().map_err(|source| CacheError::Store {
            key: ALL_KEYS.to_string(),
            source,
        })
    }

    /// Flush and release the store.
    pub fn close(self) -> CacheResult<()> {
        self.flush()?;
        info!("Closed embedding store at {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_put_get_exact_key() {
        let dir = TempDir::new().unwrap();
        let store = EmbeddingStore::open(&dir.path().join("cache.db"), false).unwrap();

        store.put("k1", &emb(&[0.25, -1.0])).unwrap();
        assert_eq!(store.get("k1").unwrap(), Some(emb(&[0.25, -1.0])));
        assert_eq!(store.get("k2").unwrap(), None);
        assert!(store.contains("k1").unwrap());
        assert!(!store.contains("k2").unwrap());
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");

        let store = EmbeddingStore::open(&path, false).unwrap();
        store.put("persisted", &emb(&[1.0, 2.0, 3.0])).unwrap();
        store.close().unwrap();

        let store = EmbeddingStore::open(&path, false).unwrap();
        assert_eq!(store.get("persisted").unwrap(), Some(emb(&[1.0, 2.0, 3.0])));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_reset_clears_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");

        let store = EmbeddingStore::open(&path, false).unwrap();
        store.put("a", &emb(&[1.0])).unwrap();
        store.put("b", &emb(&[2.0])).unwrap();
        store.close().unwrap();

        let store = EmbeddingStore::open(&path, true).unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("cache.db");
        let store = EmbeddingStore::open(&path, false).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert!(path.exists());
    }

    #[test]
    fn test_open_locked_store_is_initialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let _first = EmbeddingStore::open(&path, false).unwrap();

        let err = EmbeddingStore::open(&path, false).err().unwrap();
        assert!(matches!(err, InitializationError::Open { .. }));
    }

    #[test]
    fn test_open_on_regular_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-db");
        std::fs::write(&path, b"plain file").unwrap();

        let err = EmbeddingStore::open(&path, false).err().unwrap();
        assert!(matches!(err, InitializationError::Open { .. }));
    }

    #[test]
    fn test_corrupt_entry_reported() {
        let dir = TempDir::new().unwrap();
        let store = EmbeddingStore::open(&dir.path().join("cache.db"), false).unwrap();
        store.put_bytes("bad", &[1, 2, 3]).unwrap();

        let err = store.get("bad").unwrap_err();
        assert!(matches!(err, CacheError::CorruptEntry { .. }));
    }

    #[test]
    fn test_clear_and_keys() {
        let dir = TempDir::new().unwrap();
        let store = EmbeddingStore::open(&dir.path().join("cache.db"), false).unwrap();
        store.put("b", &emb(&[1.0])).unwrap();
        store.put("a", &emb(&[1.0])).unwrap();

        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.keys().unwrap().is_empty());
    }
}

//! Bounded in-process memo table with least-recently-used eviction.

use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::types::Embedding;

/// Default number of entries kept per call signature (2^14).
pub const DEFAULT_MEMORY_CAPACITY: usize = 1 << 14;

/// LRU-bounded map from raw call arguments to embeddings.
///
/// `get` refreshes recency; inserting past capacity evicts the entry that
/// was touched least recently.
pub struct MemoryCache<K: Hash + Eq> {
    entries: LruCache<K, Embedding>,
}

impl<K: Hash + Eq> MemoryCache<K> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Look up an entry, marking it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<Embedding>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).cloned()
    }

    /// Check membership without touching recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains(key)
    }

    /// Insert an entry, returning the evicted key if capacity was exceeded.
    pub fn insert(&mut self, key: K, embedding: Embedding) -> Option<K> {
        match self.entries.push(key, embedding) {
            // `push` also returns the old pair when the key was already present
            Some((evicted, _)) if !self.entries.contains(&evicted) => Some(evicted),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Drop every entry; capacity is kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: Hash + Eq> Default for MemoryCache<K> {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

//! Two-level embedding cache.
//!
//! Every lookup goes through three tiers, cheapest first:
//!
//! ```text
//! get_*_embedding(args)
//!   → memory memo (keyed by raw args, LRU, 2^14 entries)
//!   → persistent store (keyed by cache key string, optional)
//!   → model encoder  → written back to store and memo
//! ```
//!
//! The cache is single-threaded. A caller embedding from several threads
//! should put the whole `EmbeddingCache` behind a `Mutex`; locking around
//! each call also prevents two threads from encoding the same key.

pub mod key;
pub mod memory;
pub mod store;

use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::{CacheResult, EncodingError, InitializationError};
use crate::similarity::Similarity;
use crate::types::{Embedding, ParameterSet};
use crate::vlm::SimilarityVlm;

pub use self::key::{text_cache_key, video_cache_key};
pub use self::memory::{MemoryCache, DEFAULT_MEMORY_CAPACITY};
pub use self::store::EmbeddingStore;

/// Raw arguments of a video lookup, used as the memo key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VideoArgs {
    path: String,
    start: Option<u64>,
    end: Option<u64>,
}

/// Where lookups were answered from since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub encoder_calls: u64,
}

/// Read access to embeddings, as consumed by the classifiers.
///
/// Implemented by [`EmbeddingCache`]; object safe so classifiers can take
/// `&mut dyn EmbeddingSource` without knowing the concrete model.
pub trait EmbeddingSource {
    fn get_text_embedding(&mut self, text: &str) -> CacheResult<Embedding>;

    fn get_video_embedding(
        &mut self,
        video_path: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> CacheResult<Embedding>;

    /// The model's canonical similarity metric.
    fn default_similarity_metric(&self) -> Similarity;

    /// Frame count of a video, if the model can report it.
    fn video_frame_count(&self, video_path: &str) -> CacheResult<Option<u64>>;
}

/// Memoizing front for a [`SimilarityVlm`]'s encoders.
pub struct EmbeddingCache<V> {
    vlm: V,
    params: ParameterSet,
    store: Option<EmbeddingStore>,
    text_memo: MemoryCache<String>,
    video_memo: MemoryCache<VideoArgs>,
    stats: CacheStats,
}

impl<V: SimilarityVlm> EmbeddingCache<V> {
    /// Memory-only cache (no persistent store).
    pub fn new(vlm: V) -> Self {
        let params = vlm.parameters();
        Self {
            vlm,
            params,
            store: None,
            text_memo: MemoryCache::default(),
            video_memo: MemoryCache::default(),
            stats: CacheStats::default(),
        }
    }

    /// Cache backed by the store at `cache_file`, opened eagerly.
    ///
    /// `reset` wipes the store first. Failing to open is fatal: there is no
    /// fallback to a memory-only cache.
    pub fn open(
        vlm: V,
        cache_file: Option<&Path>,
        reset: bool,
    ) -> Result<Self, InitializationError> {
        let mut cache = Self::new(vlm);
        if let Some(path) = cache_file {
            cache.store = Some(EmbeddingStore::open(path, reset)?);
        }
        Ok(cache)
    }

    /// Build from the `[cache]` config section.
    pub fn from_config(vlm: V, config: &CacheConfig) -> Result<Self, InitializationError> {
        let file = config.resolved_file();
        let cache = Self::open(vlm, file.as_deref(), config.reset)?;
        Ok(cache.with_memory_capacity(config.memory_capacity))
    }

    /// Replace both memo tables with ones of the given capacity.
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.text_memo = MemoryCache::new(capacity);
        self.video_memo = MemoryCache::new(capacity);
        self
    }

    /// The wrapped model.
    pub fn vlm(&self) -> &V {
        &self.vlm
    }

    /// Parameters captured from the model at construction.
    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    /// The persistent store, if one is configured.
    pub fn store(&self) -> Option<&EmbeddingStore> {
        self.store.as_ref()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Memo capacity per call signature.
    pub fn memory_capacity(&self) -> usize {
        self.text_memo.capacity()
    }

    /// Number of memoized (text, video) entries.
    pub fn memory_len(&self) -> (usize, usize) {
        (self.text_memo.len(), self.video_memo.len())
    }

    pub fn text_cache_key(&self, text: &str) -> String {
        key::text_cache_key(&self.params, text)
    }

    pub fn video_cache_key(
        &self,
        video_path: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> String {
        key::video_cache_key(&self.params, video_path, start, end)
    }

    /// Embedding of `text`, from the cheapest tier that has it.
    pub fn get_text_embedding(&mut self, text: &str) -> CacheResult<Embedding> {
        if let Some(embedding) = self.text_memo.get(text) {
            self.stats.memory_hits += 1;
            return Ok(embedding);
        }

        let key = self.text_cache_key(text);
        let embedding = fetch(self.store.as_ref(), &mut self.stats, &key, || {
            self.vlm.encode_text(text)
        })?;
        self.text_memo.insert(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Embedding of a video or of frames `[start, end)` of it.
    pub fn get_video_embedding(
        &mut self,
        video_path: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> CacheResult<Embedding> {
        let args = VideoArgs {
            path: video_path.to_string(),
            start,
            end,
        };
        if let Some(embedding) = self.video_memo.get(&args) {
            self.stats.memory_hits += 1;
            return Ok(embedding);
        }

        let key = self.video_cache_key(video_path, start, end);
        let embedding = fetch(self.store.as_ref(), &mut self.stats, &key, || {
            self.vlm.encode_video(video_path, start, end)
        })?;
        self.video_memo.insert(args, embedding.clone());
        Ok(embedding)
    }

    /// Forget memoized entries; the persistent store is untouched.
    pub fn clear_memory(&mut self) {
        self.text_memo.clear();
        self.video_memo.clear();
    }

    /// Flush and close the persistent store.
    pub fn close(self) -> CacheResult<()> {
        match self.store {
            Some(store) => store.close(),
            None => Ok(()),
        }
    }
}

/// Disk lookup, then encode-and-persist on a full miss.
fn fetch<F>(
    store: Option<&EmbeddingStore>,
    stats: &mut CacheStats,
    key: &str,
    encode: F,
) -> CacheResult<Embedding>
where
    F: FnOnce() -> Result<Embedding, EncodingError>,
{
    if let Some(store) = store {
        if let Some(embedding) = store.get(key)? {
            stats.disk_hits += 1;
            debug!("Disk cache hit for {}", key);
            return Ok(embedding);
        }
    }

    stats.encoder_calls += 1;
    debug!("Cache miss for {}, invoking encoder", key);
    let embedding = encode()?;

    if let Some(store) = store {
        store.put(key, &embedding)?;
    }
    Ok(embedding)
}

impl<V: SimilarityVlm> EmbeddingSource for EmbeddingCache<V> {
    fn get_text_embedding(&mut self, text: &str) -> CacheResult<Embedding> {
        EmbeddingCache::get_text_embedding(self, text)
    }

    fn get_video_embedding(
        &mut self,
        video_path: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> CacheResult<Embedding> {
        EmbeddingCache::get_video_embedding(self, video_path, start, end)
    }

    fn default_similarity_metric(&self) -> Similarity {
        self.vlm.default_similarity_metric()
    }

    fn video_frame_count(&self, video_path: &str) -> CacheResult<Option<u64>> {
        Ok(self.vlm.video_frame_count(video_path)?)
    }
}

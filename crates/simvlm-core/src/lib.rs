//! simvlm core - embedding cache and few-shot classifiers for video-language models.
//!
//! A similarity VLM embeds text and video into one vector space. Encoding is
//! slow, so every lookup goes through a two-level cache: an in-process LRU
//! memo in front of a persistent key-value store. Few-shot classifiers then
//! read embeddings through that cache.
//!
//! # Architecture
//!
//! ```text
//! SimilarityVlm (encoders) → EmbeddingCache (memo + RocksDB) → FewShotClassifier → Prediction
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use simvlm_core::{Classifier, Config, EmbeddingCache, ExampleSet, FewShotClassifier};
//!
//! fn main() -> simvlm_core::Result<()> {
//!     let config = Config::load()?;
//!     let mut cache = EmbeddingCache::from_config(MyVlm::load()?, &config.cache)?;
//!
//!     let mut examples = ExampleSet::new();
//!     examples.insert("juggling".into(), vec!["juggle1.mp4".into(), "juggle2.mp4".into()]);
//!     examples.insert("dancing".into(), vec!["dance1.mp4".into()]);
//!
//!     let classifier = Classifier::from_config(&config.classifier);
//!     let prediction = classifier.predict(&mut cache, &examples, &"query.mp4".into())?;
//!     println!("{} ({:?})", prediction.label, prediction.confidence);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod math;
pub mod similarity;
pub mod types;
pub mod vlm;

pub use cache::{CacheStats, EmbeddingCache, EmbeddingSource, EmbeddingStore};
pub use classifier::{Classifier, ExampleSet, FewShotClassifier, Prediction, VideoInput};
pub use config::Config;
pub use error::{
    CacheError, CacheResult, ClassificationError, ConfigError, EncodingError,
    InitializationError, Result, SimVlmError,
};
pub use similarity::Similarity;
pub use types::{Embedding, ParamValue, ParameterSet};
pub use vlm::{validate_frame_bounds, SimilarityVlm};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

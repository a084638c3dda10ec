//! The contract every similarity-based vision-language model implements.
//!
//! A similarity VLM embeds video and text separately into one joint space
//! (CLIP-style). Model loading, tokenization and video decoding belong to the
//! implementor; this crate only caches and consumes the resulting vectors.
//!
//! # Usage
//!
//! ```rust,ignore
//! use simvlm_core::{EmbeddingCache, ParameterSet, Similarity, SimilarityVlm};
//!
//! struct Clip4Clip { checkpoint: String, num_frames: u32 }
//!
//! impl SimilarityVlm for Clip4Clip {
//!     fn parameters(&self) -> ParameterSet {
//!         ParameterSet::new()
//!             .with("checkpoint", self.checkpoint.as_str())
//!             .with("num_frames", self.num_frames)
//!     }
//!     // encode_text / encode_video / default_similarity_metric ...
//! }
//!
//! let mut cache = EmbeddingCache::open(model, Some("~/.simvlm/clip4clip.db".as_ref()), false)?;
//! let cat = cache.get_text_embedding("cat")?;
//! ```

use crate::error::EncodingError;
use crate::similarity::Similarity;
use crate::types::{Embedding, ParameterSet};

/// A model that embeds text and video into a shared similarity space.
///
/// Implementations are chosen at construction time: the cache and the
/// classifiers are generic over the concrete model rather than boxing it.
pub trait SimilarityVlm {
    /// Every parameter that affects the embeddings this model produces.
    ///
    /// Folded into every cache key so that two configurations of the same
    /// model never share cached vectors. Defaults to empty. A parameter
    /// named `text`, `video_path`, `subvideo_start_frame` or
    /// `subvideo_end_frame` is keyed as `param.<name>`.
    fn parameters(&self) -> ParameterSet {
        ParameterSet::new()
    }

    /// Tokenize and embed a text string.
    fn encode_text(&self, text: &str) -> Result<Embedding, EncodingError>;

    /// Load, transform and embed a video, optionally restricted to
    /// frames `[start, end)`.
    fn encode_video(
        &self,
        path: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<Embedding, EncodingError>;

    /// The comparison function that is canonical for this embedding space.
    fn default_similarity_metric(&self) -> Similarity;

    /// Number of frames in a video, when the model can tell cheaply.
    ///
    /// Used for sub-video splitting; `None` means unknown.
    fn video_frame_count(&self, _path: &str) -> Result<Option<u64>, EncodingError> {
        Ok(None)
    }
}

/// Check optional frame bounds against a video's length.
///
/// Rejects `start > end`, an empty range, and bounds past `frame_count`.
/// Encoders call this before decoding.
pub fn validate_frame_bounds(
    path: &str,
    start: Option<u64>,
    end: Option<u64>,
    frame_count: u64,
) -> Result<(), EncodingError> {
    let invalid = |message: String| EncodingError::InvalidFrameBounds {
        path: path.to_string(),
        start,
        end,
        message,
    };

    let s = start.unwrap_or(0);
    let e = end.unwrap_or(frame_count);

    if s > e {
        return Err(invalid("start is after end".to_string()));
    }
    if s == e {
        return Err(invalid("frame range is empty".to_string()));
    }
    if s >= frame_count {
        return Err(invalid(format!(
            "start is beyond the last frame ({frame_count} frames)"
        )));
    }
    if e > frame_count {
        return Err(invalid(format!(
            "end is beyond the video length ({frame_count} frames)"
        )));
    }
    Ok(())
}

//! Weighted-average prototypes built from sub-video segments.
//!
//! Each example video is cut into evenly spaced windows of `segment_frames`
//! frames. Every window is embedded through the cache under its own bounded
//! key, and the video is represented by the mean of its window embeddings.
//! Videos whose frame count is unknown, or too short to yield two windows,
//! are embedded whole.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::EmbeddingSource;
use crate::error::ClassificationError;
use crate::math;
use crate::similarity::Similarity;
use crate::types::ParameterSet;

use super::weighted_average::weighted_prototypes;
use super::{
    check_dims, embed_input, nearest_prototype, validate_examples, with_metric, ExampleSet,
    FewShotClassifier, Prediction, VideoInput,
};

/// Settings for [`SubVideoAverageClassifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubVideoAverageConfig {
    /// Weight of the label text relative to one example video
    pub text_weight: f32,

    /// Prompt the label is rendered into before text encoding
    pub text_template: String,

    /// Length of every window, in frames
    pub segment_frames: u64,

    /// Upper bound on windows per video
    pub max_segments: usize,

    /// Also split the query video
    pub split_query: bool,

    /// Softmax temperature applied to similarities for the confidence
    pub logit_scale: f32,
}

impl Default for SubVideoAverageConfig {
    fn default() -> Self {
        Self {
            text_weight: 1.0,
            text_template: "{}".to_string(),
            segment_frames: 32,
            max_segments: 8,
            split_query: true,
            logit_scale: 100.0,
        }
    }
}

/// Frame windows `[start, end)` evenly spread over a video.
///
/// Empty when the video holds fewer than two full windows. The first window
/// starts at frame 0 and the last one ends at `frame_count`.
pub fn segment_bounds(
    frame_count: u64,
    segment_frames: u64,
    max_segments: usize,
) -> Vec<(u64, u64)> {
    let too_short = segment_frames
        .checked_mul(2)
        .map_or(true, |min_frames| frame_count < min_frames);
    if segment_frames == 0 || max_segments == 0 || too_short {
        return Vec::new();
    }
    let n = (frame_count / segment_frames).min(max_segments as u64);
    if n == 1 {
        return vec![(0, segment_frames)];
    }
    let span = frame_count - segment_frames;
    (0..n)
        .map(|i| {
            // i * span overflows u64 for very long videos
            let start = (u128::from(i) * u128::from(span) / u128::from(n - 1)) as u64;
            (start, start + segment_frames)
        })
        .collect()
}

/// Weighted-average classifier over segment-averaged video embeddings.
pub struct SubVideoAverageClassifier {
    config: SubVideoAverageConfig,
    metric: Option<Similarity>,
}

impl SubVideoAverageClassifier {
    pub fn new(config: SubVideoAverageConfig, metric: Option<Similarity>) -> Self {
        Self { config, metric }
    }

    /// Unit-length embedding of a video, averaged over its segments when
    /// it can be split.
    fn embed_segmented(
        &self,
        source: &mut dyn EmbeddingSource,
        input: &VideoInput,
    ) -> Result<Vec<f32>, ClassificationError> {
        let path = match input {
            VideoInput::Path {
                path,
                start: None,
                end: None,
            } => path,
            // Precomputed embeddings and explicit clips are used as given
            _ => return Ok(math::l2_normalize(embed_input(source, input)?.as_slice())),
        };

        let frame_count = source.video_frame_count(path)?;
        let segments = frame_count
            .map(|count| {
                segment_bounds(count, self.config.segment_frames, self.config.max_segments)
            })
            .unwrap_or_default();
        if segments.is_empty() {
            warn!(
                path = %path,
                frame_count = ?frame_count,
                segment_frames = self.config.segment_frames,
                "Cannot split video into segments, embedding it whole"
            );
            return Ok(math::l2_normalize(embed_input(source, input)?.as_slice()));
        }

        debug!(path = %path, segments = segments.len(), "Embedding sub-videos");
        let mut embeddings = Vec::with_capacity(segments.len());
        for (start, end) in segments {
            let embedding = source.get_video_embedding(path, Some(start), Some(end))?;
            embeddings.push(math::l2_normalize(embedding.as_slice()));
        }
        let dim = embeddings.first().map(Vec::len).unwrap_or_default();
        check_dims(dim, embeddings.iter().map(Vec::as_slice))?;

        let mean = math::weighted_mean(embeddings.iter().map(|e| (e.as_slice(), 1.0)))
            .unwrap_or_default();
        Ok(math::l2_normalize(&mean))
    }
}

impl FewShotClassifier for SubVideoAverageClassifier {
    fn name(&self) -> &'static str {
        "subvideo_average"
    }

    fn params(&self) -> ParameterSet {
        let params = ParameterSet::new()
            .with("text_weight", self.config.text_weight)
            .with("text_template", self.config.text_template.as_str())
            .with("segment_frames", self.config.segment_frames as i64)
            .with("max_segments", self.config.max_segments as i64)
            .with("split_query", self.config.split_query)
            .with("logit_scale", self.config.logit_scale);
        with_metric(params, self.metric)
    }

    fn predict(
        &self,
        source: &mut dyn EmbeddingSource,
        examples: &ExampleSet,
        query: &VideoInput,
    ) -> Result<Prediction, ClassificationError> {
        validate_examples(examples)?;
        if self.config.segment_frames == 0 || self.config.max_segments == 0 {
            return Err(ClassificationError::InvalidParameter(
                "segment_frames and max_segments must be > 0".to_string(),
            ));
        }
        let metric = self
            .metric
            .unwrap_or_else(|| source.default_similarity_metric());

        let mut classes = Vec::with_capacity(examples.len());
        for (label, videos) in examples {
            let embeddings = videos
                .iter()
                .map(|video| self.embed_segmented(source, video))
                .collect::<Result<Vec<_>, _>>()?;
            classes.push((label.clone(), embeddings));
        }

        let prototypes = weighted_prototypes(
            source,
            &classes,
            self.config.text_weight,
            &self.config.text_template,
        )?;
        let query = if self.config.split_query {
            self.embed_segmented(source, query)?
        } else {
            math::l2_normalize(embed_input(source, query)?.as_slice())
        };
        let labels: Vec<String> = classes.into_iter().map(|(label, _)| label).collect();

        nearest_prototype(&labels, &prototypes, &query, metric, self.config.logit_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::pets_examples;
    use super::*;
    use crate::cache::testing::MockVlm;
    use crate::cache::EmbeddingCache;

    fn framed_pets(frames: u64) -> EmbeddingCache<MockVlm> {
        let mut vlm = MockVlm::default()
            .with_text("cat", &[1.0, 0.0, 0.0])
            .with_text("dog", &[0.0, 1.0, 0.0]);
        for (path, v) in [
            ("cat1.mp4", [1.0f32, 0.1, 0.0]),
            ("cat2.mp4", [0.9, 0.0, 0.1]),
            ("dog1.mp4", [0.1, 1.0, 0.0]),
            ("dog2.mp4", [0.0, 0.9, 0.2]),
            ("query_cat.mp4", [0.95, 0.05, 0.05]),
        ] {
            vlm = vlm.with_video(path, &v).with_frames(path, frames);
        }
        EmbeddingCache::new(vlm)
    }

    #[test]
    fn test_segment_bounds_cover_video() {
        assert_eq!(segment_bounds(100, 32, 8), vec![(0, 32), (34, 66), (68, 100)]);
        assert_eq!(segment_bounds(64, 32, 8), vec![(0, 32), (32, 64)]);
        assert_eq!(segment_bounds(1000, 32, 4).len(), 4);
        assert_eq!(segment_bounds(1000, 32, 4).last(), Some(&(968, 1000)));
    }

    #[test]
    fn test_segment_bounds_short_video() {
        assert!(segment_bounds(63, 32, 8).is_empty());
        assert!(segment_bounds(100, 0, 8).is_empty());
        assert_eq!(segment_bounds(100, 32, 1), vec![(0, 32)]);
    }

    #[test]
    fn test_segment_bounds_huge_frame_counts() {
        let bounds = segment_bounds(u64::MAX, 32, 8);
        assert_eq!(bounds.len(), 8);
        assert_eq!(bounds[0], (0, 32));
        assert_eq!(bounds[7], (u64::MAX - 32, u64::MAX));
        assert!(bounds.windows(2).all(|w| w[0].0 < w[1].0));

        assert!(segment_bounds(u64::MAX, u64::MAX / 2 + 1, 8).is_empty());
    }

    #[test]
    fn test_examples_are_split_into_segments() {
        let mut cache = framed_pets(128);
        let prediction = SubVideoAverageClassifier::new(SubVideoAverageConfig::default(), None)
            .predict(&mut cache, &pets_examples(), &"query_cat.mp4".into())
            .unwrap();
        assert_eq!(prediction.label, "cat");
        // 4 examples and the query, 4 windows of 32 frames each
        assert_eq!(cache.vlm().video_calls.get(), 5 * 4);
        assert!(cache
            .video_cache_key("cat1.mp4", Some(32), Some(64))
            .contains("\"subvideo_start_frame\":32"));
    }

    #[test]
    fn test_segments_are_served_from_cache() {
        let mut cache = framed_pets(128);
        let classifier = SubVideoAverageClassifier::new(SubVideoAverageConfig::default(), None);
        classifier
            .predict(&mut cache, &pets_examples(), &"query_cat.mp4".into())
            .unwrap();
        let calls = cache.stats().encoder_calls;
        classifier
            .predict(&mut cache, &pets_examples(), &"query_cat.mp4".into())
            .unwrap();
        assert_eq!(cache.stats().encoder_calls, calls);
    }

    #[test]
    fn test_short_videos_fall_back_to_whole_video() {
        let mut cache = framed_pets(40);
        SubVideoAverageClassifier::new(SubVideoAverageConfig::default(), None)
            .predict(&mut cache, &pets_examples(), &"query_cat.mp4".into())
            .unwrap();
        assert_eq!(cache.vlm().video_calls.get(), 5);
    }

    #[test]
    fn test_query_not_split_when_disabled() {
        let mut cache = framed_pets(128);
        let config = SubVideoAverageConfig {
            split_query: false,
            ..Default::default()
        };
        SubVideoAverageClassifier::new(config, None)
            .predict(&mut cache, &pets_examples(), &"query_cat.mp4".into())
            .unwrap();
        assert_eq!(cache.vlm().video_calls.get(), 4 * 4 + 1);
    }

    #[test]
    fn test_explicit_clip_is_not_split() {
        let mut cache = framed_pets(128);
        let mut examples = ExampleSet::new();
        examples.insert("cat".to_string(), vec![VideoInput::clip("cat1.mp4", 0, 64)]);
        let config = SubVideoAverageConfig {
            split_query: false,
            text_weight: 0.0,
            ..Default::default()
        };
        SubVideoAverageClassifier::new(config, None)
            .predict(&mut cache, &examples, &"query_cat.mp4".into())
            .unwrap();
        assert_eq!(cache.vlm().video_calls.get(), 2);
    }
}

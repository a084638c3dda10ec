//! Few-shot video classification over cached embeddings.
//!
//! Every strategy takes a handful of labeled example videos per class plus a
//! query and predicts one of the labels. Strategies differ only in how they
//! turn the example embeddings into something to compare the query against:
//!
//! | strategy            | class representation                          |
//! |---------------------|-----------------------------------------------|
//! | weighted average    | mean of example videos plus weighted label text |
//! | hard prompt         | mean of prompt-template text embeddings       |
//! | nearest neighbors   | the examples themselves (k-NN vote)           |
//! | gaussian            | per-class diagonal Gaussian                   |
//! | sub-video average   | weighted average over sub-segment embeddings  |
//! | tip adapter         | text prototypes plus a key/value example cache |
//!
//! Embeddings come through [`EmbeddingSource`], so every example is encoded
//! at most once per cache no matter how many classifiers or queries use it.

pub mod gaussian;
pub mod hard_prompt;
pub mod nearest_neighbors;
pub mod subvideo;
pub mod tip_adapter;
pub mod weighted_average;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::EmbeddingSource;
use crate::config::{ClassifierConfig, ClassifierKind};
use crate::error::ClassificationError;
use crate::math;
use crate::similarity::Similarity;
use crate::types::{Embedding, ParameterSet};

pub use gaussian::GaussianClassifier;
pub use hard_prompt::HardPromptClassifier;
pub use nearest_neighbors::NearestNeighborsClassifier;
pub use subvideo::SubVideoAverageClassifier;
pub use tip_adapter::TipAdapterClassifier;
pub use weighted_average::WeightedAverageClassifier;

/// A video to classify or learn from.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoInput {
    /// A video file, optionally restricted to frames `[start, end)`.
    Path {
        path: String,
        start: Option<u64>,
        end: Option<u64>,
    },
    /// An embedding computed elsewhere.
    Embedding(Embedding),
}

impl VideoInput {
    /// A whole video file.
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            start: None,
            end: None,
        }
    }

    /// Frames `[start, end)` of a video file.
    pub fn clip(path: impl Into<String>, start: u64, end: u64) -> Self {
        Self::Path {
            path: path.into(),
            start: Some(start),
            end: Some(end),
        }
    }
}

impl From<&str> for VideoInput {
    fn from(path: &str) -> Self {
        Self::path(path)
    }
}

impl From<String> for VideoInput {
    fn from(path: String) -> Self {
        Self::path(path)
    }
}

impl From<Embedding> for VideoInput {
    fn from(embedding: Embedding) -> Self {
        Self::Embedding(embedding)
    }
}

/// Class label → ordered example videos. Owned by the caller.
pub type ExampleSet = BTreeMap<String, Vec<VideoInput>>;

/// Outcome of classifying one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Predicted class label
    pub label: String,

    /// Probability-like confidence in `label`, when the strategy has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// Per-class score in label order (higher is better)
    pub scores: Vec<(String, f32)>,
}

impl Prediction {
    /// Pick the best-scoring label; confidence is `softmax(scale * scores)`.
    pub(crate) fn from_scores(labels: &[String], scores: Vec<f32>, scale: f32) -> Self {
        let best = math::argmax(&scores).unwrap_or(0);
        let probabilities = math::softmax(&scores, scale);
        Self {
            label: labels[best].clone(),
            confidence: probabilities.get(best).copied(),
            scores: labels.iter().cloned().zip(scores).collect(),
        }
    }
}

/// Common contract of every few-shot strategy.
pub trait FewShotClassifier {
    /// Short identifier of the strategy.
    fn name(&self) -> &'static str;

    /// Hyperparameters, for telling results of different settings apart.
    fn params(&self) -> ParameterSet;

    /// Classify one query against the example set.
    ///
    /// Fails with [`ClassificationError::EmptyExampleSet`] or
    /// [`ClassificationError::EmptyClass`] before touching the source.
    fn predict(
        &self,
        source: &mut dyn EmbeddingSource,
        examples: &ExampleSet,
        query: &VideoInput,
    ) -> Result<Prediction, ClassificationError>;

    /// Classify several queries against the same example set.
    fn predict_batch(
        &self,
        source: &mut dyn EmbeddingSource,
        examples: &ExampleSet,
        queries: &[VideoInput],
    ) -> Result<Vec<Prediction>, ClassificationError> {
        validate_examples(examples)?;
        queries
            .iter()
            .map(|query| self.predict(source, examples, query))
            .collect()
    }
}

/// Reject an empty example set or a class without examples.
pub fn validate_examples(examples: &ExampleSet) -> Result<(), ClassificationError> {
    if examples.is_empty() {
        return Err(ClassificationError::EmptyExampleSet);
    }
    if let Some((label, _)) = examples.iter().find(|(_, videos)| videos.is_empty()) {
        return Err(ClassificationError::EmptyClass {
            label: label.clone(),
        });
    }
    Ok(())
}

/// Fetch (or pass through) the embedding of a video input.
pub(crate) fn embed_input(
    source: &mut dyn EmbeddingSource,
    input: &VideoInput,
) -> Result<Embedding, ClassificationError> {
    match input {
        VideoInput::Path { path, start, end } => {
            Ok(source.get_video_embedding(path, *start, *end)?)
        }
        VideoInput::Embedding(embedding) => Ok(embedding.clone()),
    }
}

/// Unit-normalized embeddings of every example, grouped by class in label order.
pub(crate) fn class_embeddings(
    source: &mut dyn EmbeddingSource,
    examples: &ExampleSet,
) -> Result<Vec<(String, Vec<Vec<f32>>)>, ClassificationError> {
    examples
        .iter()
        .map(|(label, videos)| {
            let embeddings = videos
                .iter()
                .map(|video| embed_input(source, video).map(|e| math::l2_normalize(e.as_slice())))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((label.clone(), embeddings))
        })
        .collect()
}

/// Embedding of a class label rendered through a `{}` template.
///
/// Underscores in labels become spaces (`playing_guitar` → `playing guitar`).
pub(crate) fn label_text_embedding(
    source: &mut dyn EmbeddingSource,
    template: &str,
    label: &str,
) -> Result<Vec<f32>, ClassificationError> {
    let text = render_template(template, label);
    let embedding = source.get_text_embedding(&text)?;
    Ok(math::l2_normalize(embedding.as_slice()))
}

/// Add the metric override, if any, to a classifier's reported parameters.
pub(crate) fn with_metric(mut params: ParameterSet, metric: Option<Similarity>) -> ParameterSet {
    if let Some(metric) = metric {
        params.insert("metric", metric.as_str());
    }
    params
}

pub(crate) fn render_template(template: &str, label: &str) -> String {
    template.replace("{}", &label.replace('_', " "))
}

/// Fail unless every vector has `expected` dimensions.
pub(crate) fn check_dims<'a, I>(expected: usize, vectors: I) -> Result<(), ClassificationError>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    match vectors.into_iter().find(|v| v.len() != expected) {
        Some(v) => Err(ClassificationError::DimensionMismatch {
            expected,
            actual: v.len(),
        }),
        None => Ok(()),
    }
}

/// Score a query against one prototype per class and pick the best.
pub(crate) fn nearest_prototype(
    labels: &[String],
    prototypes: &[Vec<f32>],
    query: &[f32],
    metric: Similarity,
    logit_scale: f32,
) -> Result<Prediction, ClassificationError> {
    check_dims(query.len(), prototypes.iter().map(Vec::as_slice))?;
    let scores: Vec<f32> = prototypes
        .iter()
        .map(|p| metric.compare(query, p))
        .collect();
    Ok(Prediction::from_scores(labels, scores, logit_scale))
}

/// Any of the strategies, selected by configuration.
pub enum Classifier {
    WeightedAverage(WeightedAverageClassifier),
    HardPrompt(HardPromptClassifier),
    NearestNeighbors(NearestNeighborsClassifier),
    Gaussian(GaussianClassifier),
    SubVideoAverage(SubVideoAverageClassifier),
    TipAdapter(TipAdapterClassifier),
}

impl Classifier {
    /// Build the strategy named by `config.kind`.
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let metric = config.metric;
        match config.kind {
            ClassifierKind::WeightedAverage => Self::WeightedAverage(
                WeightedAverageClassifier::new(config.weighted_average.clone(), metric),
            ),
            ClassifierKind::HardPrompt => {
                Self::HardPrompt(HardPromptClassifier::new(config.hard_prompt.clone(), metric))
            }
            ClassifierKind::NearestNeighbors => Self::NearestNeighbors(
                NearestNeighborsClassifier::new(config.nearest_neighbors.clone(), metric),
            ),
            ClassifierKind::Gaussian => {
                Self::Gaussian(GaussianClassifier::new(config.gaussian.clone()))
            }
            ClassifierKind::SubvideoAverage => Self::SubVideoAverage(
                SubVideoAverageClassifier::new(config.subvideo_average.clone(), metric),
            ),
            ClassifierKind::TipAdapter => {
                Self::TipAdapter(TipAdapterClassifier::new(config.tip_adapter.clone()))
            }
        }
    }

    fn inner(&self) -> &dyn FewShotClassifier {
        match self {
            Self::WeightedAverage(c) => c,
            Self::HardPrompt(c) => c,
            Self::NearestNeighbors(c) => c,
            Self::Gaussian(c) => c,
            Self::SubVideoAverage(c) => c,
            Self::TipAdapter(c) => c,
        }
    }
}

impl FewShotClassifier for Classifier {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn params(&self) -> ParameterSet {
        self.inner().params()
    }

    fn predict(
        &self,
        source: &mut dyn EmbeddingSource,
        examples: &ExampleSet,
        query: &VideoInput,
    ) -> Result<Prediction, ClassificationError> {
        self.inner().predict(source, examples, query)
    }

    fn predict_batch(
        &self,
        source: &mut dyn EmbeddingSource,
        examples: &ExampleSet,
        queries: &[VideoInput],
    ) -> Result<Vec<Prediction>, ClassificationError> {
        self.inner().predict_batch(source, examples, queries)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Toy embedding space shared by the strategy tests.

    use super::*;
    use crate::cache::testing::MockVlm;
    use crate::cache::EmbeddingCache;

    /// Two classes in 3-d: "cat" videos lean towards x, "dog" towards y.
    pub fn pets_cache() -> EmbeddingCache<MockVlm> {
        let vlm = MockVlm::default()
            .with_video("cat1.mp4", &[1.0, 0.1, 0.0])
            .with_video("cat2.mp4", &[0.9, 0.0, 0.1])
            .with_video("dog1.mp4", &[0.1, 1.0, 0.0])
            .with_video("dog2.mp4", &[0.0, 0.9, 0.2])
            .with_video("query_cat.mp4", &[0.95, 0.05, 0.05])
            .with_video("query_dog.mp4", &[0.05, 0.95, 0.05])
            .with_text("cat", &[1.0, 0.0, 0.0])
            .with_text("dog", &[0.0, 1.0, 0.0]);
        EmbeddingCache::new(vlm)
    }

    pub fn pets_examples() -> ExampleSet {
        let mut examples = ExampleSet::new();
        examples.insert("cat".to_string(), vec!["cat1.mp4".into(), "cat2.mp4".into()]);
        examples.insert("dog".to_string(), vec!["dog1.mp4".into(), "dog2.mp4".into()]);
        examples
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{pets_cache, pets_examples};
    use super::*;

    fn all_kinds() -> [ClassifierKind; 6] {
        [
            ClassifierKind::WeightedAverage,
            ClassifierKind::HardPrompt,
            ClassifierKind::NearestNeighbors,
            ClassifierKind::Gaussian,
            ClassifierKind::SubvideoAverage,
            ClassifierKind::TipAdapter,
        ]
    }

    #[test]
    fn test_every_strategy_rejects_empty_example_set() {
        let mut cache = pets_cache();
        for kind in all_kinds() {
            let config = ClassifierConfig {
                kind,
                ..Default::default()
            };
            let classifier = Classifier::from_config(&config);
            let err = classifier
                .predict(&mut cache, &ExampleSet::new(), &"query_cat.mp4".into())
                .unwrap_err();
            assert!(
                matches!(err, ClassificationError::EmptyExampleSet),
                "{} accepted an empty example set",
                classifier.name()
            );
        }
        // Validation happens before any lookup
        assert_eq!(cache.stats().encoder_calls, 0);
    }

    #[test]
    fn test_every_strategy_rejects_empty_class() {
        let mut cache = pets_cache();
        let mut examples = pets_examples();
        examples.insert("bird".to_string(), vec![]);
        for kind in all_kinds() {
            let config = ClassifierConfig {
                kind,
                ..Default::default()
            };
            let err = Classifier::from_config(&config)
                .predict(&mut cache, &examples, &"query_cat.mp4".into())
                .unwrap_err();
            assert!(matches!(err, ClassificationError::EmptyClass { ref label } if label == "bird"));
        }
    }

    #[test]
    fn test_every_strategy_separates_pets() {
        let mut cache = pets_cache();
        let examples = pets_examples();
        for kind in all_kinds() {
            let config = ClassifierConfig {
                kind,
                ..Default::default()
            };
            let classifier = Classifier::from_config(&config);
            let predictions = classifier
                .predict_batch(
                    &mut cache,
                    &examples,
                    &["query_cat.mp4".into(), "query_dog.mp4".into()],
                )
                .unwrap();
            assert_eq!(predictions[0].label, "cat", "{}", classifier.name());
            assert_eq!(predictions[1].label, "dog", "{}", classifier.name());
        }
    }

    #[test]
    fn test_classifier_names_are_distinct() {
        let mut names: Vec<&str> = all_kinds()
            .into_iter()
            .map(|kind| {
                Classifier::from_config(&ClassifierConfig {
                    kind,
                    ..Default::default()
                })
                .name()
            })
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn test_render_template_replaces_underscores() {
        assert_eq!(
            render_template("a video of {}", "playing_guitar"),
            "a video of playing guitar"
        );
    }

    #[test]
    fn test_prediction_from_scores() {
        let labels = vec!["a".to_string(), "b".to_string()];
        let p = Prediction::from_scores(&labels, vec![0.2, 0.4], 10.0);
        assert_eq!(p.label, "b");
        assert!(p.confidence.unwrap() > 0.5);
        assert_eq!(p.scores[0], ("a".to_string(), 0.2));
    }

    #[test]
    fn test_check_dims_reports_mismatch() {
        let a = [1.0, 2.0];
        let b = [1.0];
        let err = check_dims(2, [&a[..], &b[..]]).unwrap_err();
        assert!(matches!(
            err,
            ClassificationError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }
}

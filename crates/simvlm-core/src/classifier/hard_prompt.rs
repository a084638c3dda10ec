//! Class prototypes from fixed textual prompt templates.
//!
//! Each label is rendered into every template, the text embeddings are
//! averaged, and the query is compared against that text prototype. Example
//! videos are only encoded when `video_weight` is positive.

use serde::{Deserialize, Serialize};

use crate::cache::EmbeddingSource;
use crate::error::ClassificationError;
use crate::math;
use crate::similarity::Similarity;
use crate::types::ParameterSet;

use super::{
    check_dims, class_embeddings, embed_input, label_text_embedding, nearest_prototype,
    validate_examples, with_metric, ExampleSet, FewShotClassifier, Prediction, VideoInput,
};

/// Settings for [`HardPromptClassifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardPromptConfig {
    /// Prompt templates; `{}` is replaced by the class label
    pub templates: Vec<String>,

    /// Weight of the mean example video against the text prototype (weight 1).
    /// 0 classifies from the prompts alone.
    pub video_weight: f32,

    /// Softmax temperature applied to similarities for the confidence
    pub logit_scale: f32,
}

impl Default for HardPromptConfig {
    fn default() -> Self {
        Self {
            templates: vec![
                "a video of {}.".to_string(),
                "a video of a person {}.".to_string(),
                "a clip showing {}.".to_string(),
            ],
            video_weight: 0.0,
            logit_scale: 100.0,
        }
    }
}

/// Compares the query to prompt-ensemble text prototypes.
pub struct HardPromptClassifier {
    config: HardPromptConfig,
    metric: Option<Similarity>,
}

impl HardPromptClassifier {
    pub fn new(config: HardPromptConfig, metric: Option<Similarity>) -> Self {
        Self { config, metric }
    }

    /// Unit-length mean of the label's template embeddings.
    fn text_prototype(
        &self,
        source: &mut dyn EmbeddingSource,
        label: &str,
    ) -> Result<Vec<f32>, ClassificationError> {
        let embeddings = self
            .config
            .templates
            .iter()
            .map(|template| label_text_embedding(source, template, label))
            .collect::<Result<Vec<_>, _>>()?;

        let dim = embeddings.first().map(Vec::len).unwrap_or_default();
        check_dims(dim, embeddings.iter().map(Vec::as_slice))?;

        let mean = math::weighted_mean(embeddings.iter().map(|e| (e.as_slice(), 1.0)))
            .ok_or_else(|| {
                ClassificationError::InvalidParameter("no prompt templates configured".to_string())
            })?;
        Ok(math::l2_normalize(&mean))
    }
}

impl FewShotClassifier for HardPromptClassifier {
    fn name(&self) -> &'static str {
        "hard_prompt"
    }

    fn params(&self) -> ParameterSet {
        let params = ParameterSet::new()
            .with("templates", self.config.templates.join(" | "))
            .with("video_weight", self.config.video_weight)
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
        if self.config.templates.is_empty() {
            return Err(ClassificationError::InvalidParameter(
                "no prompt templates configured".to_string(),
            ));
        }
        if self.config.video_weight < 0.0 {
            return Err(ClassificationError::InvalidParameter(format!(
                "video_weight must be >= 0, got {}",
                self.config.video_weight
            )));
        }
        let metric = self
            .metric
            .unwrap_or_else(|| source.default_similarity_metric());

        let labels: Vec<String> = examples.keys().cloned().collect();
        let mut prototypes = labels
            .iter()
            .map(|label| self.text_prototype(source, label))
            .collect::<Result<Vec<_>, _>>()?;

        if self.config.video_weight > 0.0 {
            let classes = class_embeddings(source, examples)?;
            for (prototype, (_, videos)) in prototypes.iter_mut().zip(&classes) {
                check_dims(prototype.len(), videos.iter().map(Vec::as_slice))?;
                let Some(video_mean) =
                    math::weighted_mean(videos.iter().map(|v| (v.as_slice(), 1.0)))
                else {
                    continue;
                };
                let combined = math::weighted_mean([
                    (prototype.as_slice(), 1.0),
                    (video_mean.as_slice(), self.config.video_weight),
                ]);
                if let Some(combined) = combined {
                    *prototype = combined;
                }
            }
        }

        let query = math::l2_normalize(embed_input(source, query)?.as_slice());
        nearest_prototype(&labels, &prototypes, &query, metric, self.config.logit_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{pets_cache, pets_examples};
    use super::*;

    #[test]
    fn test_prompt_only_never_encodes_examples() {
        let mut cache = pets_cache();
        let prediction = HardPromptClassifier::new(HardPromptConfig::default(), None)
            .predict(&mut cache, &pets_examples(), &"query_cat.mp4".into())
            .unwrap();
        assert_eq!(prediction.label, "cat");
        // Only the query video was encoded
        assert_eq!(cache.vlm().video_calls.get(), 1);
        // One text encoding per (label, template)
        assert_eq!(cache.vlm().text_calls.get(), 6);
    }

    #[test]
    fn test_video_weight_uses_examples() {
        let mut cache = pets_cache();
        let config = HardPromptConfig {
            video_weight: 1.0,
            ..Default::default()
        };
        let prediction = HardPromptClassifier::new(config, None)
            .predict(&mut cache, &pets_examples(), &"query_dog.mp4".into())
            .unwrap();
        assert_eq!(prediction.label, "dog");
        assert_eq!(cache.vlm().video_calls.get(), 5);
    }

    #[test]
    fn test_prompts_are_cached_across_queries() {
        let mut cache = pets_cache();
        let classifier = HardPromptClassifier::new(HardPromptConfig::default(), None);
        classifier
            .predict_batch(
                &mut cache,
                &pets_examples(),
                &["query_cat.mp4".into(), "query_dog.mp4".into()],
            )
            .unwrap();
        assert_eq!(cache.vlm().text_calls.get(), 6);
    }

    #[test]
    fn test_empty_templates_rejected() {
        let mut cache = pets_cache();
        let config = HardPromptConfig {
            templates: vec![],
            ..Default::default()
        };
        let err = HardPromptClassifier::new(config, None)
            .predict(&mut cache, &pets_examples(), &"query_cat.mp4".into())
            .unwrap_err();
        assert!(matches!(err, ClassificationError::InvalidParameter(_)));
    }
}

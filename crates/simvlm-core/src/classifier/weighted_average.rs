//! Class prototypes from averaged example videos and weighted label text.

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

/// Settings for [`WeightedAverageClassifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightedAverageConfig {
    /// Weight of the label text embedding relative to one example video.
    /// 0 ignores the label text entirely.
    pub text_weight: f32,

    /// Prompt the label is rendered into before text encoding
    pub text_template: String,

    /// Softmax temperature applied to similarities for the confidence
    pub logit_scale: f32,
}

impl Default for WeightedAverageConfig {
    fn default() -> Self {
        Self {
            text_weight: 1.0,
            text_template: "{}".to_string(),
            logit_scale: 100.0,
        }
    }
}

/// Predicts the class whose prototype
/// `(text_weight * text + Σ videos) / (text_weight + n)` is most similar to
/// the query.
pub struct WeightedAverageClassifier {
    config: WeightedAverageConfig,
    metric: Option<Similarity>,
}

impl WeightedAverageClassifier {
    pub fn new(config: WeightedAverageConfig, metric: Option<Similarity>) -> Self {
        Self { config, metric }
    }
}

/// One prototype per class: example videos weigh 1 each, the label text
/// weighs `text_weight`.
pub(crate) fn weighted_prototypes(
    source: &mut dyn EmbeddingSource,
    classes: &[(String, Vec<Vec<f32>>)],
    text_weight: f32,
    text_template: &str,
) -> Result<Vec<Vec<f32>>, ClassificationError> {
    if text_weight < 0.0 {
        return Err(ClassificationError::InvalidParameter(format!(
            "text_weight must be >= 0, got {text_weight}"
        )));
    }

    let mut prototypes = Vec::with_capacity(classes.len());
    for (label, videos) in classes {
        let dim = videos.first().map(Vec::len).unwrap_or_default();
        check_dims(dim, videos.iter().map(Vec::as_slice))?;

        let text = if text_weight > 0.0 {
            let text = label_text_embedding(source, text_template, label)?;
            check_dims(dim, [text.as_slice()])?;
            Some(text)
        } else {
            None
        };

        let weighted = text
            .as_deref()
            .map(|t| (t, text_weight))
            .into_iter()
            .chain(videos.iter().map(|v| (v.as_slice(), 1.0)));
        let prototype = math::weighted_mean(weighted).ok_or_else(|| {
            ClassificationError::InvalidParameter(format!("class {label:?} has zero total weight"))
        })?;
        prototypes.push(prototype);
    }
    Ok(prototypes)
}

impl FewShotClassifier for WeightedAverageClassifier {
    fn name(&self) -> &'static str {
        "weighted_average"
    }

    fn params(&self) -> ParameterSet {
        let params = ParameterSet::new()
            .with("text_weight", self.config.text_weight)
            .with("text_template", self.config.text_template.as_str())
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
        let metric = self
            .metric
            .unwrap_or_else(|| source.default_similarity_metric());

        let classes = class_embeddings(source, examples)?;
        let prototypes = weighted_prototypes(
            source,
            &classes,
            self.config.text_weight,
            &self.config.text_template,
        )?;
        let query = math::l2_normalize(embed_input(source, query)?.as_slice());
        let labels: Vec<String> = classes.into_iter().map(|(label, _)| label).collect();

        nearest_prototype(&labels, &prototypes, &query, metric, self.config.logit_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{pets_cache, pets_examples};
    use super::*;
    use crate::types::{Embedding, ParamValue};

    #[test]
    fn test_predicts_closest_prototype() {
        let mut cache = pets_cache();
        let classifier = WeightedAverageClassifier::new(WeightedAverageConfig::default(), None);
        let prediction = classifier
            .predict(&mut cache, &pets_examples(), &"query_dog.mp4".into())
            .unwrap();
        assert_eq!(prediction.label, "dog");
        assert!(prediction.confidence.unwrap() > 0.5);
        assert_eq!(prediction.scores.len(), 2);
    }

    #[test]
    fn test_zero_text_weight_skips_text_encoder() {
        let mut cache = pets_cache();
        let config = WeightedAverageConfig {
            text_weight: 0.0,
            ..Default::default()
        };
        WeightedAverageClassifier::new(config, None)
            .predict(&mut cache, &pets_examples(), &"query_cat.mp4".into())
            .unwrap();
        assert_eq!(cache.vlm().text_calls.get(), 0);
    }

    #[test]
    fn test_text_weight_can_flip_prediction() {
        // The only "cat" example looks like a dog; the label text pulls the
        // prototype back towards the query once it carries enough weight.
        let mut cache = pets_cache();
        let mut examples = ExampleSet::new();
        examples.insert("cat".to_string(), vec!["dog2.mp4".into()]);
        examples.insert("dog".to_string(), vec!["dog1.mp4".into()]);
        let query: VideoInput = Embedding::new(vec![1.0, 0.0, 0.0]).into();

        let with_weight = |text_weight| {
            WeightedAverageClassifier::new(
                WeightedAverageConfig {
                    text_weight,
                    ..Default::default()
                },
                None,
            )
        };

        let video_only = with_weight(0.0).predict(&mut cache, &examples, &query).unwrap();
        assert_eq!(video_only.label, "dog");

        let text_heavy = with_weight(5.0).predict(&mut cache, &examples, &query).unwrap();
        assert_eq!(text_heavy.label, "cat");
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut cache = pets_cache();
        let query: VideoInput = Embedding::new(vec![1.0, 0.0]).into();
        let err = WeightedAverageClassifier::new(WeightedAverageConfig::default(), None)
            .predict(&mut cache, &pets_examples(), &query)
            .unwrap_err();
        assert!(matches!(err, ClassificationError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_params_reported() {
        let params =
            WeightedAverageClassifier::new(WeightedAverageConfig::default(), None).params();
        assert_eq!(params.len(), 3);
        assert!(params.get("text_weight").is_some());
        assert!(params.get("metric").is_none());

        let dot = WeightedAverageClassifier::new(
            WeightedAverageConfig::default(),
            Some(Similarity::Dot),
        )
        .params();
        assert_eq!(dot.get("metric"), Some(&ParamValue::from("dot")));
        assert_eq!(dot.get("logit_scale"), Some(&ParamValue::from(100.0_f64)));
    }
}

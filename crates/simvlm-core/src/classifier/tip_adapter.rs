//! Tip-Adapter: zero-shot text logits plus a key/value cache of the examples.
//!
//! The example embeddings become cache keys, their labels the values. A query
//! is scored as
//!
//! ```text
//! logits = logit_scale · W q  +  α · Σ_n exp(-β (1 - K_n · q)) · onehot(label_n)
//! ```
//!
//! where `W` holds the label text embeddings. With `finetune_epochs > 0` the
//! keys are refined by SGD on the examples themselves before classifying.
//! Everything is unit-normalized, so the configured similarity metric plays
//! no part here.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::EmbeddingSource;
use crate::error::ClassificationError;
use crate::math;
use crate::types::ParameterSet;

use super::{
    check_dims, class_embeddings, embed_input, label_text_embedding, validate_examples,
    ExampleSet, FewShotClassifier, Prediction, VideoInput,
};

/// Settings for [`TipAdapterClassifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TipAdapterConfig {
    /// Weight of the cache logits against the text logits
    pub alpha: f32,

    /// Sharpness of the key affinity
    pub beta: f32,

    /// Scale of the text logits
    pub logit_scale: f32,

    /// Prompt the label is rendered into before text encoding
    pub text_template: String,

    /// SGD passes over the examples; 0 keeps the keys as encoded
    pub finetune_epochs: usize,

    pub learning_rate: f32,

    /// Seed of the per-epoch example shuffle
    pub seed: u64,
}

impl Default for TipAdapterConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 5.5,
            logit_scale: 100.0,
            text_template: "{}".to_string(),
            finetune_epochs: 0,
            learning_rate: 1e-3,
            seed: 0,
        }
    }
}

/// Few-shot classifier combining label text with an example cache.
pub struct TipAdapterClassifier {
    config: TipAdapterConfig,
}

/// Cache fitted to one example set.
struct TipModel {
    labels: Vec<String>,
    /// One unit text embedding per class (C × D)
    text: Array2<f32>,
    /// One unit key per example (N × D)
    keys: Array2<f32>,
    /// Class index of every key
    key_class: Vec<usize>,
}

impl TipModel {
    /// Logits per class and the affinity of every key.
    fn logits(
        &self,
        query: ArrayView1<f32>,
        config: &TipAdapterConfig,
    ) -> (Array1<f32>, Array1<f32>) {
        let mut logits = self.text.dot(&query) * config.logit_scale;
        let affinity = self
            .keys
            .dot(&query)
            .mapv(|s| (-config.beta * (1.0 - s)).exp());
        for (n, &class) in self.key_class.iter().enumerate() {
            logits[class] += config.alpha * affinity[n];
        }
        (logits, affinity)
    }

    /// Cross-entropy SGD on the keys, one example at a time.
    fn fine_tune(&mut self, supports: &Array2<f32>, config: &TipAdapterConfig) {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<usize> = (0..supports.nrows()).collect();

        for epoch in 0..config.finetune_epochs {
            order.shuffle(&mut rng);
            let mut loss = 0.0f32;
            for &m in &order {
                let x = supports.row(m);
                let target = self.key_class[m];
                let (logits, affinity) = self.logits(x, config);
                let probabilities = math::softmax(&logits.to_vec(), 1.0);
                loss -= probabilities[target].max(f32::MIN_POSITIVE).ln();

                for (n, &class) in self.key_class.iter().enumerate() {
                    let residual = probabilities[class] - if class == target { 1.0 } else { 0.0 };
                    let step = config.learning_rate
                        * config.alpha
                        * config.beta
                        * residual
                        * affinity[n];
                    if step == 0.0 {
                        continue;
                    }
                    let mut key = self.keys.row_mut(n);
                    key.scaled_add(-step, &x);
                    let norm = key.dot(&key).sqrt();
                    if norm > f32::EPSILON {
                        key /= norm;
                    }
                }
            }
            debug!(
                epoch,
                loss = loss / order.len().max(1) as f32,
                "Tip-Adapter fine-tuning epoch"
            );
        }
    }

    fn predict(
        &self,
        query: &[f32],
        config: &TipAdapterConfig,
    ) -> Result<Prediction, ClassificationError> {
        check_dims(self.keys.ncols(), [query])?;
        let (logits, _) = self.logits(ArrayView1::from(query), config);
        Ok(Prediction::from_scores(&self.labels, logits.to_vec(), 1.0))
    }
}

impl TipAdapterClassifier {
    pub fn new(config: TipAdapterConfig) -> Self {
        Self { config }
    }

    fn fit(
        &self,
        source: &mut dyn EmbeddingSource,
        examples: &ExampleSet,
    ) -> Result<TipModel, ClassificationError> {
        let config = &self.config;
        if config.beta <= 0.0 || config.alpha < 0.0 {
            return Err(ClassificationError::InvalidParameter(format!(
                "need alpha >= 0 and beta > 0, got alpha={} beta={}",
                config.alpha, config.beta
            )));
        }

        let classes = class_embeddings(source, examples)?;
        let dim = classes
            .first()
            .and_then(|(_, videos)| videos.first())
            .map(Vec::len)
            .unwrap_or_default();

        let mut labels = Vec::with_capacity(classes.len());
        let mut text = Vec::with_capacity(classes.len() * dim);
        let mut keys = Vec::new();
        let mut key_class = Vec::new();
        for (class, (label, videos)) in classes.into_iter().enumerate() {
            check_dims(dim, videos.iter().map(Vec::as_slice))?;
            let label_text = label_text_embedding(source, &config.text_template, &label)?;
            check_dims(dim, [label_text.as_slice()])?;
            text.extend(label_text);
            for video in videos {
                keys.extend(video);
                key_class.push(class);
            }
            labels.push(label);
        }

        let shape_error =
            |e: ndarray::ShapeError| ClassificationError::InvalidParameter(e.to_string());
        let text = Array2::from_shape_vec((labels.len(), dim), text).map_err(shape_error)?;
        let keys = Array2::from_shape_vec((key_class.len(), dim), keys).map_err(shape_error)?;

        let mut model = TipModel {
            labels,
            text,
            keys,
            key_class,
        };
        if config.finetune_epochs > 0 {
            let supports = model.keys.clone();
            model.fine_tune(&supports, config);
            debug!(
                keys = model.keys.len_of(Axis(0)),
                epochs = config.finetune_epochs,
                "Fine-tuned Tip-Adapter keys"
            );
        }
        Ok(model)
    }
}

impl FewShotClassifier for TipAdapterClassifier {
    fn name(&self) -> &'static str {
        "tip_adapter"
    }

    fn params(&self) -> ParameterSet {
        let mut params = ParameterSet::new()
            .with("alpha", self.config.alpha)
            .with("beta", self.config.beta)
            .with("text_template", self.config.text_template.as_str())
            .with("logit_scale", self.config.logit_scale)
            .with("finetune_epochs", self.config.finetune_epochs as i64);
        if self.config.finetune_epochs > 0 {
            params.insert("learning_rate", self.config.learning_rate);
            params.insert("seed", self.config.seed as i64);
        }
        params
    }

    fn predict(
        &self,
        source: &mut dyn EmbeddingSource,
        examples: &ExampleSet,
        query: &VideoInput,
    ) -> Result<Prediction, ClassificationError> {
        validate_examples(examples)?;
        let model = self.fit(source, examples)?;
        let query = math::l2_normalize(embed_input(source, query)?.as_slice());
        model.predict(&query, &self.config)
    }

    /// Fits (and fine-tunes) the cache once for all queries.
    fn predict_batch(
        &self,
        source: &mut dyn EmbeddingSource,
        examples: &ExampleSet,
        queries: &[VideoInput],
    ) -> Result<Vec<Prediction>, ClassificationError> {
        validate_examples(examples)?;
        let model = self.fit(source, examples)?;
        queries
            .iter()
            .map(|query| {
                let query = math::l2_normalize(embed_input(source, query)?.as_slice());
                model.predict(&query, &self.config)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{pets_cache, pets_examples};
    use super::*;
    use crate::types::{Embedding, ParamValue};

    fn emb(values: &[f32]) -> VideoInput {
        Embedding::new(values.to_vec()).into()
    }

    /// Label text points one way, the examples another.
    fn conflicting_examples() -> ExampleSet {
        let mut examples = ExampleSet::new();
        examples.insert("cat".to_string(), vec![emb(&[0.0, 0.0, 1.0])]);
        examples.insert("dog".to_string(), vec![emb(&[0.0, 1.0, 0.0])]);
        examples
    }

    fn flat_config(alpha: f32) -> TipAdapterConfig {
        TipAdapterConfig {
            alpha,
            logit_scale: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_alpha_is_zero_shot() {
        let mut cache = pets_cache();
        let query = emb(&[0.0, 0.6, 0.8]);
        let prediction = TipAdapterClassifier::new(flat_config(0.0))
            .predict(&mut cache, &conflicting_examples(), &query)
            .unwrap();
        assert_eq!(prediction.label, "dog");
    }

    #[test]
    fn test_cache_logits_override_text() {
        let mut cache = pets_cache();
        let query = emb(&[0.0, 0.6, 0.8]);
        let prediction = TipAdapterClassifier::new(flat_config(10.0))
            .predict(&mut cache, &conflicting_examples(), &query)
            .unwrap();
        assert_eq!(prediction.label, "cat");
        assert!(prediction.confidence.unwrap() > 0.5);
    }

    #[test]
    fn test_batch_encodes_examples_once() {
        let mut cache = pets_cache();
        let predictions = TipAdapterClassifier::new(TipAdapterConfig::default())
            .predict_batch(
                &mut cache,
                &pets_examples(),
                &["query_cat.mp4".into(), "query_dog.mp4".into()],
            )
            .unwrap();
        assert_eq!(predictions[0].label, "cat");
        assert_eq!(predictions[1].label, "dog");
        assert_eq!(cache.vlm().video_calls.get(), 6);
        assert_eq!(cache.vlm().text_calls.get(), 2);
    }

    #[test]
    fn test_fine_tuning_is_seeded() {
        let config = TipAdapterConfig {
            finetune_epochs: 5,
            learning_rate: 0.1,
            seed: 7,
            ..flat_config(1.0)
        };
        let query = emb(&[0.0, 0.6, 0.8]);

        let mut cache = pets_cache();
        let first = TipAdapterClassifier::new(config.clone())
            .predict(&mut cache, &conflicting_examples(), &query)
            .unwrap();
        let second = TipAdapterClassifier::new(config)
            .predict(&mut cache, &conflicting_examples(), &query)
            .unwrap();
        assert_eq!(first, second);

        let untuned = TipAdapterClassifier::new(flat_config(1.0))
            .predict(&mut cache, &conflicting_examples(), &query)
            .unwrap();
        let moved = first
            .scores
            .iter()
            .zip(&untuned.scores)
            .any(|((_, a), (_, b))| (a - b).abs() > 1e-6);
        assert!(moved);
    }

    #[test]
    fn test_fine_tuned_keys_stay_normalized() {
        let config = TipAdapterConfig {
            finetune_epochs: 3,
            learning_rate: 0.5,
            ..flat_config(10.0)
        };
        let mut cache = pets_cache();
        let model = TipAdapterClassifier::new(config)
            .fit(&mut cache, &conflicting_examples())
            .unwrap();
        for key in model.keys.rows() {
            assert!((key.dot(&key).sqrt() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_fine_tuning_params_reported() {
        let plain = TipAdapterClassifier::new(TipAdapterConfig::default()).params();
        assert!(plain.get("seed").is_none());
        let tuned = TipAdapterClassifier::new(TipAdapterConfig {
            finetune_epochs: 2,
            ..Default::default()
        })
        .params();
        assert!(tuned.get("seed").is_some());
    }

    #[test]
    fn test_logit_scale_reported() {
        // Same alpha, different logit_scale: text or cache logits win
        let query = emb(&[0.0, 0.6, 0.8]);
        let flat = TipAdapterClassifier::new(flat_config(10.0));
        let sharp = TipAdapterClassifier::new(TipAdapterConfig {
            logit_scale: 100.0,
            ..flat_config(10.0)
        });

        let mut cache = pets_cache();
        let flat_label = flat
            .predict(&mut cache, &conflicting_examples(), &query)
            .unwrap()
            .label;
        let sharp_label = sharp
            .predict(&mut cache, &conflicting_examples(), &query)
            .unwrap()
            .label;
        assert_eq!(flat_label, "cat");
        assert_eq!(sharp_label, "dog");

        assert_ne!(flat.params(), sharp.params());
        assert_eq!(
            flat.params().get("logit_scale"),
            Some(&ParamValue::from(1.0_f64))
        );
    }
}

//! k-nearest-neighbor vote over individual example embeddings.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::cache::EmbeddingSource;
use crate::error::ClassificationError;
use crate::math;
use crate::similarity::Similarity;
use crate::types::ParameterSet;

use super::{
    check_dims, class_embeddings, embed_input, validate_examples, with_metric, ExampleSet,
    FewShotClassifier, Prediction, VideoInput,
};

/// Settings for [`NearestNeighborsClassifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NearestNeighborsConfig {
    /// Number of neighbors that vote; 1 is plain nearest neighbor
    pub k: usize,
}

impl Default for NearestNeighborsConfig {
    fn default() -> Self {
        Self { k: 1 }
    }
}

/// Majority vote among the `k` most similar examples.
///
/// Ties on vote count go to the label with the larger summed similarity,
/// then to the label that sorts first. Confidence is the winning share of
/// the votes.
pub struct NearestNeighborsClassifier {
    config: NearestNeighborsConfig,
    metric: Option<Similarity>,
}

impl NearestNeighborsClassifier {
    pub fn new(config: NearestNeighborsConfig, metric: Option<Similarity>) -> Self {
        Self { config, metric }
    }
}

#[derive(Default, Clone, Copy)]
struct Tally {
    votes: usize,
    similarity_sum: f32,
    best: f32,
}

impl FewShotClassifier for NearestNeighborsClassifier {
    fn name(&self) -> &'static str {
        "nearest_neighbors"
    }

    fn params(&self) -> ParameterSet {
        with_metric(ParameterSet::new().with("k", self.config.k as i64), self.metric)
    }

    fn predict(
        &self,
        source: &mut dyn EmbeddingSource,
        examples: &ExampleSet,
        query: &VideoInput,
    ) -> Result<Prediction, ClassificationError> {
        validate_examples(examples)?;
        if self.config.k == 0 {
            return Err(ClassificationError::InvalidParameter(
                "k must be > 0".to_string(),
            ));
        }
        let metric = self
            .metric
            .unwrap_or_else(|| source.default_similarity_metric());

        let classes = class_embeddings(source, examples)?;
        let query = math::l2_normalize(embed_input(source, query)?.as_slice());

        // (class index, similarity) for every example
        let mut neighbors: Vec<(usize, f32)> = Vec::new();
        for (class_idx, (_, videos)) in classes.iter().enumerate() {
            check_dims(query.len(), videos.iter().map(Vec::as_slice))?;
            neighbors.extend(videos.iter().map(|v| (class_idx, metric.compare(&query, v))));
        }
        neighbors.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let mut tallies = vec![
            Tally {
                best: f32::NEG_INFINITY,
                ..Default::default()
            };
            classes.len()
        ];
        for &(class_idx, similarity) in &neighbors {
            let tally = &mut tallies[class_idx];
            tally.best = tally.best.max(similarity);
        }
        let k = self.config.k.min(neighbors.len());
        for &(class_idx, similarity) in neighbors.iter().take(k) {
            tallies[class_idx].votes += 1;
            tallies[class_idx].similarity_sum += similarity;
        }

        // Earlier index wins remaining ties, i.e. label order
        let mut winner = 0;
        for (idx, tally) in tallies.iter().enumerate().skip(1) {
            let current = &tallies[winner];
            let better = tally.votes > current.votes
                || (tally.votes == current.votes && tally.similarity_sum > current.similarity_sum);
            if better {
                winner = idx;
            }
        }

        Ok(Prediction {
            label: classes[winner].0.clone(),
            confidence: Some(tallies[winner].votes as f32 / k as f32),
            scores: classes
                .iter()
                .zip(&tallies)
                .map(|((label, _), tally)| (label.clone(), tally.best))
                .collect(),
        })
    }
}

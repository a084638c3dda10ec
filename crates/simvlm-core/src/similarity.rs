//! Similarity metrics over embeddings.
//!
//! Every metric is oriented so that a larger value means "more similar",
//! which lets classifiers rank with a single comparison direction.

use serde::{Deserialize, Serialize};

use crate::math;

/// Comparison function for two embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    /// Cosine of the angle between the vectors.
    #[default]
    Cosine,
    /// Raw dot product (equal to cosine for unit vectors).
    Dot,
    /// Euclidean distance, negated.
    NegativeEuclidean,
}

impl Similarity {
    /// Score two embeddings; higher is more similar.
    pub fn compare(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => {
                let denom = math::l2_norm(a) * math::l2_norm(b);
                if denom <= f32::EPSILON {
                    0.0
                } else {
                    math::dot(a, b) / denom
                }
            }
            Self::Dot => math::dot(a, b),
            Self::NegativeEuclidean => -a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }

    /// Stable identifier used in configs and parameter sets.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
            Self::NegativeEuclidean => "negative_euclidean",
        }
    }
}

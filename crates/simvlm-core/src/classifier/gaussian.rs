//! Per-class diagonal Gaussian fitted to the example embeddings.
//!
//! With only a handful of examples the per-class variance is unreliable, so
//! it is shrunk towards the variance pooled over all classes:
//!
//! ```text
//! σ²_c = (1 - shrinkage) · var_c + shrinkage · pooled,   σ²_c >= min_variance
//! ```
//!
//! The query goes to the class with the largest log-likelihood.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::cache::EmbeddingSource;
use crate::error::ClassificationError;
use crate::math;
use crate::types::ParameterSet;

use super::{
    check_dims, class_embeddings, embed_input, validate_examples, ExampleSet, FewShotClassifier,
    Prediction, VideoInput,
};

/// Settings for [`GaussianClassifier`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianConfig {
    /// 0 keeps each class's own variance, 1 uses the pooled variance for all
    pub shrinkage: f32,

    /// Lower bound on every per-dimension variance
    pub min_variance: f32,
}

impl Default for GaussianConfig {
    fn default() -> Self {
        Self {
            shrinkage: 0.5,
            min_variance: 1e-4,
        }
    }
}

/// Maximum-likelihood classification under per-class diagonal Gaussians.
pub struct GaussianClassifier {
    config: GaussianConfig,
}

struct ClassGaussian {
    mean: Array1<f32>,
    variance: Array1<f32>,
}

impl ClassGaussian {
    fn log_likelihood(&self, x: ArrayView1<f32>) -> f32 {
        let diff = &x - &self.mean;
        let mahalanobis = (&diff * &diff / &self.variance).sum();
        let log_det = self.variance.mapv(f32::ln).sum();
        -0.5 * (mahalanobis + log_det)
    }
}

impl GaussianClassifier {
    pub fn new(config: GaussianConfig) -> Self {
        Self { config }
    }

    fn fit(
        &self,
        classes: &[(String, Vec<Vec<f32>>)],
    ) -> Result<Vec<ClassGaussian>, ClassificationError> {
        let GaussianConfig {
            shrinkage,
            min_variance,
        } = self.config;
        if !(0.0..=1.0).contains(&shrinkage) {
            return Err(ClassificationError::InvalidParameter(format!(
                "shrinkage must be in [0, 1], got {shrinkage}"
            )));
        }
        if min_variance <= 0.0 {
            return Err(ClassificationError::InvalidParameter(format!(
                "min_variance must be > 0, got {min_variance}"
            )));
        }

        let dim = classes
            .first()
            .and_then(|(_, videos)| videos.first())
            .map(Vec::len)
            .unwrap_or_default();

        let mut moments = Vec::with_capacity(classes.len());
        let mut pooled = Array1::<f32>::zeros(dim);
        let mut total = 0usize;
        for (_, videos) in classes {
            check_dims(dim, videos.iter().map(Vec::as_slice))?;
            let samples = Array2::from_shape_vec((videos.len(), dim), videos.concat())
                .map_err(|e| ClassificationError::InvalidParameter(e.to_string()))?;
            let mean = samples
                .mean_axis(Axis(0))
                .ok_or(ClassificationError::EmptyExampleSet)?;
            let variance = samples.var_axis(Axis(0), 0.0);

            pooled.scaled_add(videos.len() as f32, &variance);
            total += videos.len();
            moments.push((mean, variance));
        }
        pooled /= total.max(1) as f32;

        Ok(moments
            .into_iter()
            .map(|(mean, variance)| {
                let variance = (variance * (1.0 - shrinkage) + &pooled * shrinkage)
                    .mapv(|v| v.max(min_variance));
                ClassGaussian { mean, variance }
            })
            .collect())
    }
}

impl FewShotClassifier for GaussianClassifier {
    fn name(&self) -> &'static str {
        "gaussian"
    }

    fn params(&self) -> ParameterSet {
        ParameterSet::new()
            .with("shrinkage", self.config.shrinkage)
            .with("min_variance", self.config.min_variance)
    }

    fn predict(
        &self,
        source: &mut dyn EmbeddingSource,
        examples: &ExampleSet,
        query: &VideoInput,
    ) -> Result<Prediction, ClassificationError> {
        validate_examples(examples)?;
        let classes = class_embeddings(source, examples)?;
        let gaussians = self.fit(&classes)?;

        let query = math::l2_normalize(embed_input(source, query)?.as_slice());
        let dim = gaussians.first().map(|g| g.mean.len()).unwrap_or_default();
        check_dims(dim, [query.as_slice()])?;

        let query = ArrayView1::from(query.as_slice());
        let scores: Vec<f32> = gaussians.iter().map(|g| g.log_likelihood(query)).collect();
        let labels: Vec<String> = classes.into_iter().map(|(label, _)| label).collect();
        Ok(Prediction::from_scores(&labels, scores, 1.0))
    }
}

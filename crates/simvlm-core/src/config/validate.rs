//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

fn invalid(message: &str) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message.into()))
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.memory_capacity == 0 {
            return invalid("cache.memory_capacity must be > 0");
        }

        let c = &self.classifier;
        if c.weighted_average.text_weight < 0.0 {
            return invalid("classifier.weighted_average.text_weight must be >= 0");
        }
        if c.weighted_average.logit_scale <= 0.0 {
            return invalid("classifier.weighted_average.logit_scale must be > 0");
        }
        if !c.weighted_average.text_template.contains("{}") {
            return invalid("classifier.weighted_average.text_template must contain a {} placeholder");
        }
        if c.hard_prompt.templates.is_empty() {
            return invalid("classifier.hard_prompt.templates must not be empty");
        }
        if c.hard_prompt.templates.iter().any(|t| !t.contains("{}")) {
            return invalid("classifier.hard_prompt.templates must each contain a {} placeholder");
        }
        if c.hard_prompt.video_weight < 0.0 {
            return invalid("classifier.hard_prompt.video_weight must be >= 0");
        }
        if c.nearest_neighbors.k == 0 {
            return invalid("classifier.nearest_neighbors.k must be > 0");
        }
        if !(0.0..=1.0).contains(&c.gaussian.shrinkage) {
            return invalid("classifier.gaussian.shrinkage must be between 0.0 and 1.0");
        }
        if c.gaussian.min_variance <= 0.0 {
            return invalid("classifier.gaussian.min_variance must be > 0");
        }
        if c.subvideo_average.segment_frames == 0 {
            return invalid("classifier.subvideo_average.segment_frames must be > 0");
        }
        if c.subvideo_average.max_segments == 0 {
            return invalid("classifier.subvideo_average.max_segments must be > 0");
        }
        if c.subvideo_average.text_weight < 0.0 {
            return invalid("classifier.subvideo_average.text_weight must be >= 0");
        }
        if !c.subvideo_average.text_template.contains("{}") {
            return invalid("classifier.subvideo_average.text_template must contain a {} placeholder");
        }
        if c.tip_adapter.alpha < 0.0 {
            return invalid("classifier.tip_adapter.alpha must be >= 0");
        }
        if c.tip_adapter.beta <= 0.0 {
            return invalid("classifier.tip_adapter.beta must be > 0");
        }
        if !c.tip_adapter.text_template.contains("{}") {
            return invalid("classifier.tip_adapter.text_template must contain a {} placeholder");
        }
        if c.tip_adapter.finetune_epochs > 0 && c.tip_adapter.learning_rate <= 0.0 {
            return invalid("classifier.tip_adapter.learning_rate must be > 0 when fine-tuning");
        }
        Ok(())
    }
}

//! Sub-configuration structs with their defaults.

use crate::cache::DEFAULT_MEMORY_CAPACITY;
use crate::classifier::gaussian::GaussianConfig;
use crate::classifier::hard_prompt::HardPromptConfig;
use crate::classifier::nearest_neighbors::NearestNeighborsConfig;
use crate::classifier::subvideo::SubVideoAverageConfig;
use crate::classifier::tip_adapter::TipAdapterConfig;
use crate::classifier::weighted_average::WeightedAverageConfig;
use crate::similarity::Similarity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Embedding cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Persistent store location; `None` keeps embeddings in memory only
    pub file: Option<PathBuf>,

    /// Clear the persistent store when it is opened.
    /// Set after changing a model in a way its parameters don't capture.
    pub reset: bool,

    /// Entries kept in each in-memory memo table
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("~/.simvlm/embeddings.db")),
            reset: false,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Store path with `~` expanded.
    pub fn resolved_file(&self) -> Option<PathBuf> {
        self.file.as_ref().map(|path| {
            let path_str = path.to_string_lossy();
            PathBuf::from(shellexpand::tilde(&path_str).into_owned())
        })
    }
}

/// Which few-shot strategy to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    WeightedAverage,
    HardPrompt,
    NearestNeighbors,
    Gaussian,
    SubvideoAverage,
    TipAdapter,
}

/// Few-shot classifier settings.
///
/// Only the table matching `kind` is used; the others keep their defaults
/// so switching strategies is a one-line change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Strategy to use
    pub kind: ClassifierKind,

    /// Override the model's default similarity metric
    pub metric: Option<Similarity>,

    pub weighted_average: WeightedAverageConfig,
    pub hard_prompt: HardPromptConfig,
    pub nearest_neighbors: NearestNeighborsConfig,
    pub gaussian: GaussianConfig,
    pub subvideo_average: SubVideoAverageConfig,
    pub tip_adapter: TipAdapterConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

//! Error types for the simvlm embedding cache and classifiers.
//!
//! Errors are organized by concern so that callers can tell a fatal store
//! failure apart from a bad encoder input or a malformed example set.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for simvlm operations.
#[derive(Error, Debug)]
pub enum SimVlmError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The persistent store could not be opened or reset
    #[error("Initialization error: {0}")]
    Initialization(#[from] InitializationError),

    /// Embedding lookup or encoding failed
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Few-shot classification failed
    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Fatal errors raised while opening the persistent embedding store.
///
/// There is no fallback to a memory-only cache: a store that cannot be opened
/// would silently mix stale and fresh embeddings.
#[derive(Error, Debug)]
pub enum InitializationError {
    /// The parent directory of the store could not be created
    #[error("Failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The key-value engine refused to open the store (missing, locked, corrupt)
    #[error("Failed to open embedding store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rocksdb::Error,
    },

    /// Clearing the store on reset failed
    #[error("Failed to reset embedding store at {path}: {source}")]
    Reset {
        path: PathBuf,
        #[source]
        source: rocksdb::Error,
    },
}

/// Errors reported by a model's text or video encoder.
#[derive(Error, Debug)]
pub enum EncodingError {
    /// Text could not be tokenized or embedded
    #[error("Text encoding failed for {text:?}: {message}")]
    Text { text: String, message: String },

    /// Video could not be read or embedded
    #[error("Video encoding failed for {path}: {message}")]
    Video { path: String, message: String },

    /// Frame bounds are reversed or fall outside the video
    #[error("Invalid frame bounds for {path}: start={start:?}, end={end:?} ({message})")]
    InvalidFrameBounds {
        path: String,
        start: Option<u64>,
        end: Option<u64>,
        message: String,
    },

    /// Container or codec the encoder cannot handle
    #[error("Unsupported video format for {path}: {format}")]
    UnsupportedFormat { path: String, format: String },
}

/// Errors from the two-level embedding cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The encoder failed on a full cache miss
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Reading from or writing to the persistent store failed
    #[error("Embedding store operation failed for key {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: rocksdb::Error,
    },

    /// A persisted value could not be decoded as an embedding
    #[error("Corrupt embedding store entry {key}: {message}")]
    CorruptEntry { key: String, message: String },
}

/// Errors from the few-shot classifier family.
#[derive(Error, Debug)]
pub enum ClassificationError {
    /// No classes were supplied
    #[error("Example set is empty")]
    EmptyExampleSet,

    /// A class was supplied without any example videos
    #[error("Class {label:?} has no examples")]
    EmptyClass { label: String },

    /// Fetching an example or query embedding failed
    #[error("Embedding lookup failed: {0}")]
    Embedding(#[from] CacheError),

    /// Embeddings of different lengths were mixed
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A classifier hyperparameter is out of range
    #[error("Invalid classifier parameter: {0}")]
    InvalidParameter(String),
}

/// Convenience type alias for simvlm results.
pub type Result<T> = std::result::Result<T, SimVlmError>;

/// Convenience type alias for cache lookups.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::generation::CompletionError;
use crate::index::IndexError;

/// Main error type for kbground
#[derive(Error, Debug)]
pub enum KbError {
    /// Caller supplied something the pipeline cannot work with. Never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Embedding or completion provider still failing after the retry budget
    #[error("Provider unavailable after {attempts} attempt(s): {message}")]
    ProviderUnavailable { attempts: u32, message: String },

    /// Index transport or storage failure after the single retry
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// The caller cancelled the query
    #[error("Query cancelled")]
    Cancelled,

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KbError {
    /// Errors worth surfacing as "try again later" to a presentation layer
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KbError::ProviderUnavailable { .. } | KbError::IndexUnavailable(_)
        )
    }
}

impl From<EmbeddingError> for KbError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::InvalidInput(msg) => KbError::InvalidInput(msg),
            other => KbError::ProviderUnavailable {
                attempts: 1,
                message: other.to_string(),
            },
        }
    }
}

impl From<IndexError> for KbError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::InvalidQuery(msg) => KbError::InvalidInput(msg),
            other => KbError::IndexUnavailable(other.to_string()),
        }
    }
}

impl From<CompletionError> for KbError {
    fn from(err: CompletionError) -> Self {
        KbError::ProviderUnavailable {
            attempts: 1,
            message: err.to_string(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for kbground operations
pub type Result<T> = std::result::Result<T, KbError>;

/// Embedding provider trait and error classification
use crate::retry::Retryable;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider returned {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl Retryable for EmbeddingError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbeddingError::RateLimited(_)
                | EmbeddingError::Timeout(_)
                | EmbeddingError::ServerError { .. }
                | EmbeddingError::Transport(_)
        )
    }
}

/// Trait for embedding providers
///
/// Implementations only talk to their backend. Input validation, retries,
/// deadlines and batching live in [`super::EmbeddingGateway`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Generate embeddings for multiple texts, one vector per input in order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

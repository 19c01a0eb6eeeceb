/// Embedding gateway: validation, retries, deadlines and bounded batching
use super::{EmbeddingError, EmbeddingProvider};
use crate::config::{parse_duration, EmbeddingConfig};
use crate::error::{KbError, Result};
use crate::retry::{Retried, RetryExhausted, RetryPolicy};
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Front door to the embedding provider
///
/// Stateless apart from the provider handle; safe to share behind an `Arc`.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    request_timeout: Duration,
    max_input_chars: usize,
    dimension: usize,
    batch_size: usize,
    permits: Arc<Semaphore>,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, retry: RetryPolicy) -> Self {
        let dimension = provider.dimension();
        Self {
            provider,
            retry,
            request_timeout: Duration::from_secs(30),
            max_input_chars: 8000,
            dimension,
            batch_size: 32,
            permits: Arc::new(Semaphore::new(4)),
        }
    }

    pub fn from_config(
        provider: Arc<dyn EmbeddingProvider>,
        config: &EmbeddingConfig,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self::new(provider, retry)
            .with_timeout(parse_duration(&config.request_timeout)?)
            .with_max_input_chars(config.max_input_chars)
            .with_dimension(config.dimension)
            .with_batching(config.batch_size, config.max_concurrent))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max;
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_batching(mut self, batch_size: usize, max_concurrent: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed one text
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_with_stats(text).await?.value)
    }

    /// Embed one text, reporting how many retries it took
    pub async fn embed_with_stats(&self, text: &str) -> Result<Retried<Vec<f32>>> {
        self.validate(text)?;
        self.retry
            .run("embedding", || self.call_single(text))
            .await
            .map_err(into_kb_error)
    }

    /// Embed many texts; output order matches input order
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self.embed_batch_with_stats(texts).await?.value)
    }

    /// Batched embedding with the total retry count across all chunks
    ///
    /// Every input is validated before any provider call is made.
    pub async fn embed_batch_with_stats(
        &self,
        texts: &[String],
    ) -> Result<Retried<Vec<Vec<f32>>>> {
        for text in texts {
            self.validate(text)?;
        }
        if texts.is_empty() {
            return Ok(Retried {
                value: Vec::new(),
                retries: 0,
            });
        }

        debug!(
            "Embedding {} texts in chunks of {}",
            texts.len(),
            self.batch_size
        );

        let chunks = texts.chunks(self.batch_size).map(|chunk| async move {
            let _permit = self.permits.acquire().await.map_err(|_| {
                KbError::ProviderUnavailable {
                    attempts: 0,
                    message: "embedding gateway closed".to_string(),
                }
            })?;
            self.retry
                .run("embedding batch", || self.call_batch(chunk))
                .await
                .map_err(into_kb_error)
        });

        let results = try_join_all(chunks).await?;

        let mut retries = 0;
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in results {
            retries += chunk.retries;
            vectors.extend(chunk.value);
        }

        Ok(Retried {
            value: vectors,
            retries,
        })
    }

    fn validate(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(KbError::InvalidInput(
                "Cannot embed empty text".to_string(),
            ));
        }
        let chars = text.chars().count();
        if chars > self.max_input_chars {
            return Err(KbError::InvalidInput(format!(
                "Text of {} characters exceeds the embedding limit of {}",
                chars, self.max_input_chars
            )));
        }
        Ok(())
    }

    async fn call_single(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let vector = tokio::time::timeout(self.request_timeout, self.provider.embed(text))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.request_timeout))??;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    async fn call_batch(
        &self,
        chunk: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = tokio::time::timeout(self.request_timeout, self.provider.embed_batch(chunk))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.request_timeout))??;

        if vectors.len() != chunk.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                chunk.len(),
                vectors.len()
            )));
        }
        for vector in &vectors {
            self.check_dimension(vector)?;
        }
        Ok(vectors)
    }

    fn check_dimension(&self, vector: &[f32]) -> std::result::Result<(), EmbeddingError> {
        if vector.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn into_kb_error(exhausted: RetryExhausted<EmbeddingError>) -> KbError {
    match exhausted.error {
        EmbeddingError::InvalidInput(msg) => KbError::InvalidInput(msg),
        error => KbError::ProviderUnavailable {
            attempts: exhausted.attempts,
            message: error.to_string(),
        },
    }
}

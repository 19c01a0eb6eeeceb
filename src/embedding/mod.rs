/// Embedding: text to fixed-length vectors
///
/// Architecture:
/// - EmbeddingProvider trait for backend abstraction
/// - OpenAiEmbeddingProvider for any OpenAI-compatible `/embeddings` endpoint
/// - FastEmbedProvider for offline embedding (all-MiniLM-L6-v2, 384-dim)
/// - EmbeddingGateway for validation, retry/backoff, deadlines and batching
mod gateway;
mod http;
mod local;
mod provider;

pub use gateway::EmbeddingGateway;
pub use http::OpenAiEmbeddingProvider;
pub use local::FastEmbedProvider;
pub use provider::{EmbeddingError, EmbeddingProvider};

use crate::config::EmbeddingConfig;
use crate::error::{KbError, Result};
use std::sync::Arc;

/// Instantiate the provider named in `[embedding].provider`
pub fn provider_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "openai" => Arc::new(OpenAiEmbeddingProvider::from_config(config)?),
        "fastembed" => Arc::new(FastEmbedProvider::new(&config.model)?),
        other => {
            return Err(KbError::Config(format!(
                "Unknown embedding provider: {}",
                other
            )))
        }
    };
    Ok(provider)
}

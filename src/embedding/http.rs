/// OpenAI-compatible HTTP embedding provider
use super::{EmbeddingError, EmbeddingProvider};
use crate::config::{parse_duration, EmbeddingConfig};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Client for any endpoint speaking the OpenAI `/embeddings` protocol
pub struct OpenAiEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            dimension,
            timeout,
        })
    }

    /// Build from the `[embedding]` config section, reading the key from its env var
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let timeout = parse_duration(&config.request_timeout)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());

        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
            config.dimension,
            timeout,
        )
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.endpoint);
        debug!("POST {} ({} inputs)", url, input.len());

        let mut req = self.client.post(&url).json(&EmbeddingRequest {
            input,
            model: &self.model,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::GenerationError(format!("Malformed response: {}", e)))?;

        if parsed.data.len() != input.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                input.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn transport_error(&self, e: reqwest::Error) -> EmbeddingError {
        if e.is_timeout() {
            EmbeddingError::Timeout(self.timeout)
        } else {
            EmbeddingError::Transport(e.to_string())
        }
    }
}

/// Map an HTTP failure status onto the retry classification
pub(crate) fn classify_status(status: StatusCode, body: String) -> EmbeddingError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        EmbeddingError::RateLimited(body)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        EmbeddingError::ServerError {
            status: status.as_u16(),
            message: body,
        }
    } else {
        EmbeddingError::GenerationError(format!("API error {}: {}", status, body))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.request(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

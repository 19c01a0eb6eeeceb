//! Completion provider trait and the OpenAI-compatible chat implementation

use crate::config::{parse_duration, LlmConfig};
use crate::retry::Retryable;
use crate::types::TokenUsage;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Provider initialization failed: {0}")]
    Initialization(String),

    #[error("API key missing: set {0}")]
    ApiKeyMissing(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider returned {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl Retryable for CompletionError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            CompletionError::RateLimited(_)
                | CompletionError::Timeout(_)
                | CompletionError::ServerError { .. }
                | CompletionError::Transport(_)
        )
    }
}

/// Text returned by the completion provider
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// Chat completion backend
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Single-turn completion with a system instruction
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, CompletionError>;

    fn model_name(&self) -> &str;
}

/// Client for any endpoint speaking the OpenAI `/chat/completions` protocol
pub struct OpenAiChatProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiChatProvider {
    pub fn from_config(config: &LlmConfig) -> Result<Self, CompletionError> {
        let timeout = parse_duration(&config.request_timeout)
            .map_err(|e| CompletionError::Initialization(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Initialization(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty()),
            api_key_env: config.api_key_env.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    /// Local endpoints (Ollama, llama.cpp) usually need no key
    fn requires_key(&self) -> bool {
        !(self.base_url.contains("localhost") || self.base_url.contains("127.0.0.1"))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiChatProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, CompletionError> {
        if self.api_key.is_none() && self.requires_key() {
            return Err(CompletionError::ApiKeyMissing(self.api_key_env.clone()));
        }

        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let url = format!("{}/chat/completions", self.base_url);
        debug!("POST {} (model {})", url, self.model);

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout(self.timeout)
            } else {
                CompletionError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;
        parse_chat_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn classify_status(status: StatusCode, message: String) -> CompletionError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        CompletionError::RateLimited(message)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        CompletionError::ServerError {
            status: status.as_u16(),
            message,
        }
    } else {
        CompletionError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

fn parse_chat_response(json: &Value) -> Result<Completion, CompletionError> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| CompletionError::InvalidResponse("No choices in response".into()))?;

    let text = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| CompletionError::InvalidResponse("Choice has no text content".into()))?
        .to_string();

    let usage = json["usage"].as_object().map(|u| {
        let field = |name: &str| u.get(name).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        TokenUsage {
            prompt_tokens: field("prompt_tokens"),
            completion_tokens: field("completion_tokens"),
            total_tokens: field("total_tokens"),
        }
    });

    Ok(Completion { text, usage })
}

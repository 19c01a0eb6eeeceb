//! Configuration management for kbground
//!
//! Every component receives its section of this configuration at construction.
//! Nothing reads configuration from global state after startup.

use crate::error::{KbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Current configuration schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub index: IndexConfig,
    pub retry: RetryConfig,
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    pub grounding: GroundingConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai" (any OpenAI-compatible endpoint) or "fastembed" (offline)
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub dimension: usize,
    /// Longer inputs are rejected as invalid rather than silently cut
    pub max_input_chars: usize,
    pub batch_size: usize,
    /// Upper bound on in-flight provider calls during bulk embedding
    pub max_concurrent: usize,
    pub request_timeout: String,
}

/// Completion provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: String,
}

/// Local index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub data_dir: PathBuf,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_search: usize,
    /// Deadline for a single vector or lexical query
    pub query_timeout: String,
    /// Fixed pause before the one retry on index failure
    pub retry_delay: String,
}

/// Retry/backoff budget for provider calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: String,
    pub max_delay: String,
    pub jitter: bool,
}

/// Hybrid ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub rrf_k: f32,
    pub vector_weight: f32,
    pub lexical_weight: f32,
    /// Each strategy fetches `top_k * candidate_multiplier` candidates
    pub candidate_multiplier: usize,
    /// Upper bound on candidates per strategy, whatever `top_k` asks for
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    pub default_top_k: usize,
}

fn default_max_candidates() -> usize {
    200
}

/// Context window budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub max_total_chars: usize,
    pub max_snippet_chars: usize,
}

/// Verdict thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingConfig {
    pub coverage_threshold: f32,
    /// Phrases that mean the model found nothing relevant in the sources
    pub decline_phrases: Vec<String>,
}

/// Whole-query settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Aggregate deadline for one `retrieve` call
    pub query_deadline: String,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_deadline: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KbError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KbError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| KbError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(threshold) = overrides.coverage_threshold {
            self.grounding.coverage_threshold = threshold;
        }
        if let Some(top_k) = overrides.default_top_k {
            self.retrieval.default_top_k = top_k;
        }
        if let Some(deadline) = overrides.query_deadline {
            self.pipeline.query_deadline = deadline;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: KBGROUND_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `KBGROUND_*` style overrides from an arbitrary source
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("KBGROUND_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__ENDPOINT" => self.embedding.endpoint = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "LLM__ENDPOINT" => self.llm.endpoint = value.to_string(),
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "LLM__TEMPERATURE" => self.llm.temperature = parse_value(path, value)?,
            "INDEX__DATA_DIR" => self.index.data_dir = PathBuf::from(value),
            "RETRIEVAL__RRF_K" => self.retrieval.rrf_k = parse_value(path, value)?,
            "RETRY__MAX_ATTEMPTS" => self.retry.max_attempts = parse_value(path, value)?,
            "GROUNDING__COVERAGE_THRESHOLD" => {
                self.grounding.coverage_threshold = parse_value(path, value)?
            }
            "PIPELINE__QUERY_DEADLINE" => self.pipeline.query_deadline = value.to_string(),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| KbError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("kbground").join("config.toml"))
    }

    /// Index data directory with `~` expanded
    pub fn data_dir(&self) -> Result<PathBuf> {
        expand_path(&self.index.data_dir)
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| KbError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| KbError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| KbError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse duration strings such as "250ms", "5s", "2m" or "1h"
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || KbError::InvalidConfigValue {
        path: "duration".to_string(),
        message: format!("Invalid duration format: '{}'", s),
    };

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        _ => Err(invalid()),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            embedding: EmbeddingConfig {
                provider: "openai".to_string(),
                endpoint: "https://api.openai.com/v1".to_string(),
                model: "text-embedding-ada-002".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                dimension: 1536,
                max_input_chars: 8000,
                batch_size: 32,
                max_concurrent: 4,
                request_timeout: "30s".to_string(),
            },
            llm: LlmConfig {
                provider: "openai".to_string(),
                endpoint: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                temperature: 0.1,
                max_tokens: 1000,
                request_timeout: "60s".to_string(),
            },
            index: IndexConfig {
                data_dir: PathBuf::from("~/.kbground"),
                hnsw_ef_construction: 200,
                hnsw_m: 16,
                hnsw_ef_search: 64,
                query_timeout: "5s".to_string(),
                retry_delay: "200ms".to_string(),
            },
            retry: RetryConfig {
                max_attempts: 5,
                base_delay: "1s".to_string(),
                max_delay: "60s".to_string(),
                jitter: true,
            },
            retrieval: RetrievalConfig {
                rrf_k: 60.0,
                vector_weight: 1.0,
                lexical_weight: 1.0,
                candidate_multiplier: 4,
                max_candidates: default_max_candidates(),
                default_top_k: 5,
            },
            context: ContextConfig {
                max_total_chars: 6000,
                max_snippet_chars: 1500,
            },
            grounding: GroundingConfig {
                coverage_threshold: 0.5,
                decline_phrases: vec![
                    "i don't have enough information".to_string(),
                    "i do not have enough information".to_string(),
                    "no relevant information".to_string(),
                    "the sources do not address".to_string(),
                    "the provided sources do not contain".to_string(),
                ],
            },
            pipeline: PipelineConfig {
                query_deadline: "90s".to_string(),
            },
            profiles: HashMap::new(),
        }
    }
}

use crate::config::{parse_duration, Config};
use crate::error::{KbError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every problem at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_retry(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_context(config, &mut errors);
        Self::validate_grounding(config, &mut errors);
        Self::validate_duration(
            "pipeline.query_deadline",
            &config.pipeline.query_deadline,
            &mut errors,
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KbError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != super::SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        let valid_providers = ["openai", "fastembed"];
        if !valid_providers.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if config.embedding.max_input_chars == 0 {
            errors.push(ValidationError::new(
                "embedding.max_input_chars",
                "Input limit must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "embedding.max_concurrent",
                "Concurrency bound must be greater than 0",
            ));
        }

        Self::validate_duration(
            "embedding.request_timeout",
            &config.embedding.request_timeout,
            errors,
        );
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.llm.provider != "openai" {
            errors.push(ValidationError::new(
                "llm.provider",
                format!(
                    "Provider must be 'openai' (any compatible endpoint), got '{}'",
                    config.llm.provider
                ),
            ));
        }

        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model name cannot be empty"));
        }

        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if config.llm.max_tokens == 0 {
            errors.push(ValidationError::new(
                "llm.max_tokens",
                "max_tokens must be greater than 0",
            ));
        }

        Self::validate_duration("llm.request_timeout", &config.llm.request_timeout, errors);
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "index.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.index.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.index.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.index.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }

        Self::validate_duration("index.query_timeout", &config.index.query_timeout, errors);
        Self::validate_duration("index.retry_delay", &config.index.retry_delay, errors);
    }

    fn validate_retry(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retry.max_attempts == 0 {
            errors.push(ValidationError::new(
                "retry.max_attempts",
                "At least one attempt is required",
            ));
        }

        let base = Self::validate_duration("retry.base_delay", &config.retry.base_delay, errors);
        let max = Self::validate_duration("retry.max_delay", &config.retry.max_delay, errors);
        if let (Some(base), Some(max)) = (base, max) {
            if base > max {
                errors.push(ValidationError::new(
                    "retry.max_delay",
                    "max_delay must not be shorter than base_delay",
                ));
            }
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;
        if !(retrieval.rrf_k > 0.0) {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("RRF k must be positive, got {}", retrieval.rrf_k),
            ));
        }

        for (path, weight) in [
            ("retrieval.vector_weight", retrieval.vector_weight),
            ("retrieval.lexical_weight", retrieval.lexical_weight),
        ] {
            if !(weight > 0.0) {
                errors.push(ValidationError::new(
                    path,
                    format!("Strategy weight must be positive, got {}", weight),
                ));
            }
        }

        if retrieval.candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.candidate_multiplier",
                "Candidate multiplier must be greater than 0",
            ));
        }

        if retrieval.max_candidates == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_candidates",
                "Candidate cap must be greater than 0",
            ));
        }

        if retrieval.default_top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_top_k",
                "top_k must be greater than 0",
            ));
        }
    }

    fn validate_context(config: &Config, errors: &mut Vec<ValidationError>) {
        let context = &config.context;
        if context.max_snippet_chars == 0 {
            errors.push(ValidationError::new(
                "context.max_snippet_chars",
                "Snippet limit must be greater than 0",
            ));
        }

        if context.max_total_chars < context.max_snippet_chars {
            errors.push(ValidationError::new(
                "context.max_total_chars",
                "Total budget must be at least one snippet long",
            ));
        }
    }

    fn validate_grounding(config: &Config, errors: &mut Vec<ValidationError>) {
        let threshold = config.grounding.coverage_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(ValidationError::new(
                "grounding.coverage_threshold",
                format!("Threshold must be between 0.0 and 1.0, got {}", threshold),
            ));
        }

        if config
            .grounding
            .decline_phrases
            .iter()
            .any(|p| p.trim().is_empty())
        {
            errors.push(ValidationError::new(
                "grounding.decline_phrases",
                "Decline phrases cannot be blank",
            ));
        }
    }

    fn validate_duration(
        path: &str,
        value: &str,
        errors: &mut Vec<ValidationError>,
    ) -> Option<std::time::Duration> {
        match parse_duration(value) {
            Ok(d) => Some(d),
            Err(_) => {
                errors.push(ValidationError::new(
                    path,
                    format!("Invalid duration format: {}", value),
                ));
                None
            }
        }
    }
}

//! Grounded answer generation: completion call, citation checks and verdict

use super::citations::{CitationReport, CitationValidator};
use super::completion::{Completion, CompletionError, CompletionProvider};
use super::prompts::{build_user_message, SYSTEM_PROMPT};
use crate::config::{parse_duration, Config, GroundingConfig, LlmConfig};
use crate::context::ContextBlock;
use crate::error::{KbError, Result};
use crate::retry::{RetryExhausted, RetryPolicy};
use crate::types::{NotFoundReason, TokenUsage, Verdict};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Per-request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Retrieving,
    Generating,
    Validating,
    Answered,
    LowConfidence,
    NotFound,
}

impl GenerationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationState::Answered | GenerationState::LowConfidence | GenerationState::NotFound
        )
    }

    pub fn can_transition_to(&self, next: GenerationState) -> bool {
        use GenerationState::*;
        matches!(
            (self, next),
            (Retrieving, Generating)
                | (Retrieving, NotFound)
                | (Generating, Validating)
                | (Validating, Answered)
                | (Validating, LowConfidence)
                | (Validating, NotFound)
        )
    }

    /// Move to `next`, refusing anything outside the lifecycle
    pub fn transition(self, next: GenerationState) -> std::result::Result<Self, IllegalTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<Verdict> for GenerationState {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Answered => GenerationState::Answered,
            Verdict::LowConfidence => GenerationState::LowConfidence,
            Verdict::NotFound => GenerationState::NotFound,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Illegal generation state transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub from: GenerationState,
    pub to: GenerationState,
}

impl From<IllegalTransition> for KbError {
    fn from(err: IllegalTransition) -> Self {
        KbError::Other(err.into())
    }
}

/// Generator output before the fallback policy shapes it for the caller
#[derive(Debug, Clone, PartialEq)]
pub struct DraftAnswer {
    pub text: String,
    pub verdict: Verdict,
    pub not_found_reason: Option<NotFoundReason>,
    /// In-range citations only; see `grounding_violations` for the rest
    pub cited_numbers: BTreeSet<u32>,
    pub grounding_violations: Vec<u32>,
    pub grounded_coverage: f32,
    pub usage: Option<TokenUsage>,
    pub completion_retries: u32,
}

impl DraftAnswer {
    /// Terminal result for a request that never reached the provider
    pub fn not_found(reason: NotFoundReason) -> Self {
        Self {
            text: String::new(),
            verdict: Verdict::NotFound,
            not_found_reason: Some(reason),
            cited_numbers: BTreeSet::new(),
            grounding_violations: Vec::new(),
            grounded_coverage: 0.0,
            usage: None,
            completion_retries: 0,
        }
    }
}

/// Calls the completion provider and judges how well the answer is grounded
pub struct GroundedAnswerGenerator {
    provider: Arc<dyn CompletionProvider>,
    retry: RetryPolicy,
    request_timeout: Duration,
    coverage_threshold: f32,
    decline_phrases: Vec<String>,
    validator: CitationValidator,
    violations_total: AtomicU64,
}

impl GroundedAnswerGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>, retry: RetryPolicy) -> Result<Self> {
        let validator = CitationValidator::new()
            .map_err(|e| KbError::Config(format!("Citation pattern failed to compile: {}", e)))?;
        Ok(Self {
            provider,
            retry,
            request_timeout: Duration::from_secs(60),
            coverage_threshold: 0.5,
            decline_phrases: Config::default().grounding.decline_phrases,
            validator,
            violations_total: AtomicU64::new(0),
        })
    }

    pub fn from_config(
        provider: Arc<dyn CompletionProvider>,
        llm: &LlmConfig,
        grounding: &GroundingConfig,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self::new(provider, retry)?
            .with_timeout(parse_duration(&llm.request_timeout)?)
            .with_coverage_threshold(grounding.coverage_threshold)
            .with_decline_phrases(grounding.decline_phrases.clone()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_coverage_threshold(mut self, threshold: f32) -> Self {
        self.coverage_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_decline_phrases(mut self, phrases: Vec<String>) -> Self {
        self.decline_phrases = phrases
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Grounding violations seen by this generator since construction
    pub fn grounding_violations_total(&self) -> u64 {
        self.violations_total.load(Ordering::Relaxed)
    }

    /// Answer `question` from `context`
    ///
    /// An empty context ends in `NotFound` without calling the provider.
    /// Grounding problems never fail the call; they lower the verdict.
    pub async fn generate(&self, question: &str, context: &ContextBlock) -> Result<DraftAnswer> {
        let mut state = GenerationState::Retrieving;

        if context.is_empty() {
            state.transition(GenerationState::NotFound)?;
            debug!("Empty context, skipping completion");
            return Ok(DraftAnswer::not_found(NotFoundReason::NoResults));
        }

        state = state.transition(GenerationState::Generating)?;
        let user = build_user_message(question, context);
        debug!(
            "Requesting completion from {} with {} sources",
            self.provider.model_name(),
            context.len()
        );

        let completion = self
            .retry
            .run("completion", || self.call_provider(&user))
            .await
            .map_err(into_kb_error)?;
        let retries = completion.retries;
        let Completion { text, usage } = completion.value;

        state = state.transition(GenerationState::Validating)?;
        let report = self.validator.validate(&text, context.len());

        if report.has_violations() {
            self.violations_total
                .fetch_add(report.violations.len() as u64, Ordering::Relaxed);
            warn!(
                "Grounding violation: cited {:?} with {} sources available",
                report.violations,
                context.len()
            );
        }

        let verdict = self.verdict(&text, &report);
        state.transition(verdict.into())?;
        debug!(
            "Verdict {:?} (coverage {:.2}, {} sentences, {} citations)",
            verdict, report.coverage, report.sentences, report.body_citations
        );

        Ok(DraftAnswer {
            text,
            verdict,
            not_found_reason: (verdict == Verdict::NotFound)
                .then_some(NotFoundReason::NoRelevantInformation),
            cited_numbers: report.cited,
            grounding_violations: report.violations,
            grounded_coverage: report.coverage,
            usage,
            completion_retries: retries,
        })
    }

    /// A decline counts only when the body cites nothing valid; a trailing
    /// source list does not rescue it.
    fn verdict(&self, text: &str, report: &CitationReport) -> Verdict {
        if report.body_cited.is_empty() && self.declines(self.validator.body(text)) {
            Verdict::NotFound
        } else if report.has_violations() || report.coverage < self.coverage_threshold {
            Verdict::LowConfidence
        } else {
            Verdict::Answered
        }
    }

    /// Whether the model said the sources do not cover the question
    fn declines(&self, text: &str) -> bool {
        let normalized = text.to_lowercase().replace('\u{2019}', "'");
        self.decline_phrases
            .iter()
            .any(|phrase| normalized.contains(phrase.as_str()))
    }

    async fn call_provider(&self, user: &str) -> std::result::Result<Completion, CompletionError> {
        tokio::time::timeout(
            self.request_timeout,
            self.provider.complete(SYSTEM_PROMPT, user),
        )
        .await
        .map_err(|_| CompletionError::Timeout(self.request_timeout))?
    }
}

fn into_kb_error(exhausted: RetryExhausted<CompletionError>) -> KbError {
    KbError::ProviderUnavailable {
        attempts: exhausted.attempts,
        message: exhausted.error.to_string(),
    }
}

//! Shared data model: articles, queries, ranked hits and the final answer

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Stable article identifier (e.g. "kb-001")
pub type ArticleId = String;

/// Default number of hits returned to the caller
pub const DEFAULT_TOP_K: usize = 5;

/// A knowledge-base article as stored in the index
///
/// Articles are written by ingestion and only read by the retrieval core.
/// `embedding` belongs to the article and must be regenerated whenever
/// `content` changes; `content_hash` records which content it was built from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(alias = "lastUpdated", with = "timestamp")]
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Article {
    /// Text sent to the embedding provider for this article
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.content)
    }

    /// BLAKE3 fingerprint of the title and content
    pub fn compute_content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.title.as_bytes());
        hasher.update(&[0u8]);
        hasher.update(self.content.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Whether the stored embedding was built from the current content
    pub fn embedding_is_current(&self, dimension: usize) -> bool {
        self.embedding.len() == dimension
            && self.content_hash.as_deref() == Some(self.compute_content_hash().as_str())
    }
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates
mod timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }
}

/// A retrieval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Free-text question
    pub text: String,

    /// Restrict results to one category
    #[serde(default)]
    pub category_filter: Option<String>,

    /// Maximum number of hits after fusion
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category_filter: None,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category_filter = Some(category.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Reject queries the pipeline cannot serve
    pub fn validate(&self) -> crate::Result<()> {
        if self.text.trim().is_empty() {
            return Err(crate::KbError::InvalidInput(
                "Query text cannot be empty".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(crate::KbError::InvalidInput(
                "top_k must be a positive integer".to_string(),
            ));
        }
        if matches!(&self.category_filter, Some(c) if c.trim().is_empty()) {
            return Err(crate::KbError::InvalidInput(
                "category filter cannot be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Category predicate shared by both strategies
    pub fn matches_category(&self, category: &str) -> bool {
        match &self.category_filter {
            Some(filter) => filter == category,
            None => true,
        }
    }
}

/// Retrieval strategy that produced a raw ranked list
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Vector,
    Lexical,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Vector => "vector",
            Strategy::Lexical => "lexical",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One strategy's raw output: `(article id, raw score)`, higher is better
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyHits {
    pub strategy: Strategy,
    pub hits: Vec<(ArticleId, f32)>,
}

impl StrategyHits {
    pub fn new(strategy: Strategy, hits: Vec<(ArticleId, f32)>) -> Self {
        Self { strategy, hits }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// A fused result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub article_id: ArticleId,
    /// Raw score per strategy that returned this article
    pub strategy_scores: BTreeMap<Strategy, f32>,
    pub fused_score: f32,
    /// 1-based position after fusion
    pub rank: usize,
}

/// Source entry aligned with the context block numbering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: ArticleId,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Answered,
    LowConfidence,
    NotFound,
}

/// Why a query ended in `NotFound`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    /// Retrieval produced no usable context
    NoResults,
    /// The completion provider said the sources do not cover the question
    NoRelevantInformation,
    /// The aggregate query deadline elapsed
    Timeout,
}

/// Token accounting reported by the completion provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Per-query observability data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub query_id: String,
    pub embedding_retries: u32,
    pub index_retries: u32,
    pub completion_retries: u32,
    pub candidates_considered: usize,
    pub token_usage: Option<TokenUsage>,
    pub elapsed_ms: u64,
}

/// The caller-visible result of `retrieve`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    pub text: String,
    /// Citation numbers found in the text that name a returned source.
    /// Out-of-range numbers are reported in `grounding_violations` instead.
    pub cited_numbers: BTreeSet<u32>,
    pub sources: Vec<SourceRef>,
    pub grounded_coverage: f32,
    pub verdict: Verdict,
    /// Set when the answer is returned with reduced confidence
    pub caveat: Option<String>,
    /// Suggestion for the presentation layer to offer human help
    pub escalation_hint: Option<String>,
    pub not_found_reason: Option<NotFoundReason>,
    /// Citation numbers that did not map to a retrieved source
    pub grounding_violations: Vec<u32>,
    pub diagnostics: Diagnostics,
}

impl GeneratedAnswer {
    /// Human-readable rendering with a numbered source list
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Answer\n");
        let _ = writeln!(out, "{}", self.text);

        if let Some(caveat) = &self.caveat {
            let _ = writeln!(out, "\n> {}", caveat);
        }

        if !self.sources.is_empty() {
            let _ = writeln!(out, "\n## Sources\n");
            for (idx, source) in self.sources.iter().enumerate() {
                let _ = writeln!(out, "[{}] {} ({})", idx + 1, source.title, source.id);
            }
        }

        if let Some(hint) = &self.escalation_hint {
            let _ = writeln!(out, "\n{}", hint);
        }

        if let Some(usage) = &self.diagnostics.token_usage {
            let _ = writeln!(
                out,
                "\n## Usage\nPrompt tokens: {}\nCompletion tokens: {}\nTotal tokens: {}",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }

        out
    }
}

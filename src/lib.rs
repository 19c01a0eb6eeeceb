//! kbground - grounded answers from a knowledge base
//!
//! Retrieves articles with vector and keyword search, fuses both rankings
//! with Reciprocal Rank Fusion, and asks a language model to answer only from
//! the numbered results. Every citation in the answer is checked against the
//! retrieved sources before the answer is returned.

pub mod cli;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod pipeline;
pub mod policy;
pub mod ranking;
pub mod retry;
pub mod types;

pub use error::{KbError, Result};
pub use pipeline::RetrievalPipeline;
pub use types::{
    Article, ArticleId, Diagnostics, GeneratedAnswer, NotFoundReason, Query, RankedHit,
    SourceRef, Strategy, StrategyHits, TokenUsage, Verdict,
};

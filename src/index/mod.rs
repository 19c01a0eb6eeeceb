/// Article index: storage trait, resilient client, local reference engine and ingestion
///
/// Architecture:
/// - IndexStorage trait for the storage engine
/// - IndexClient adds per-call deadlines and the single fixed-delay retry
/// - LocalIndex: tantivy (lexical) + HNSW (vector) over a JSON article store
/// - IndexBuilder loads articles, re-embeds changed ones and writes the store
mod builder;
mod client;
mod keyword_index;
mod local;
mod storage;
mod vector_index;

pub use builder::{load_articles, BuildReport, IndexBuilder};
pub use client::IndexClient;
pub use keyword_index::{lexical_dir, KeywordIndex, KeywordIndexError};
pub use local::{ArticleStore, LocalIndex};
pub use storage::IndexStorage;
pub use vector_index::{HnswParams, VectorEntry, VectorIndex, VectorIndexError};

use crate::retry::Retryable;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    /// The query itself is unusable (never retried)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Keyword index error: {0}")]
    Keyword(#[from] KeywordIndexError),

    #[error("Vector index error: {0}")]
    Vector(#[from] VectorIndexError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Index call timed out after {0:?}")]
    Timeout(Duration),
}

impl Retryable for IndexError {
    fn is_transient(&self) -> bool {
        !matches!(self, IndexError::InvalidQuery(_))
    }
}

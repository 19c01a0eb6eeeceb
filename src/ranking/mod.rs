//! Hybrid ranking
//!
//! Vector and lexical candidates are merged with Reciprocal Rank Fusion,
//! deduplicated, re-checked against the category filter and truncated.

mod deduplication;
mod fusion;
mod hybrid;

pub use deduplication::deduplicate_hits;
pub use fusion::{reciprocal_rank_fusion, FusionConfig, FusionError};
pub use hybrid::{HybridRanker, RankedResults};

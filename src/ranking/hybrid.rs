//! Hybrid ranking combining vector and lexical search

use super::{reciprocal_rank_fusion, FusionConfig};
use crate::config::RetrievalConfig;
use crate::error::{KbError, Result};
use crate::index::IndexClient;
use crate::types::{Article, ArticleId, Query, RankedHit};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Fused, filtered and truncated result set
#[derive(Debug, Clone, Default)]
pub struct RankedResults {
    /// Hits in rank order, at most `top_k`
    pub hits: Vec<RankedHit>,
    /// Hydrated articles aligned with `hits`
    pub articles: Vec<Arc<Article>>,
    /// Distinct candidates seen across both strategies before truncation
    pub candidates_considered: usize,
    pub index_retries: u32,
}

impl RankedResults {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Hybrid ranker over an [`IndexClient`]
pub struct HybridRanker {
    index: IndexClient,
    fusion: FusionConfig,
    candidate_multiplier: usize,
    max_candidates: usize,
}

/// Per-strategy candidate cap when none is configured
pub const DEFAULT_MAX_CANDIDATES: usize = 200;

impl HybridRanker {
    pub fn new(index: IndexClient, fusion: FusionConfig, candidate_multiplier: usize) -> Self {
        Self {
            index,
            fusion,
            candidate_multiplier: candidate_multiplier.max(1),
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates.max(1);
        self
    }

    /// Candidates each strategy is asked for
    fn depth(&self, top_k: usize) -> usize {
        top_k
            .saturating_mul(self.candidate_multiplier)
            .min(self.max_candidates)
    }

    pub fn from_config(index: IndexClient, config: &RetrievalConfig) -> Result<Self> {
        let fusion = FusionConfig::from_config(config)
            .map_err(|e| KbError::Config(e.to_string()))?;
        Ok(Self::new(index, fusion, config.candidate_multiplier)
            .with_max_candidates(config.max_candidates))
    }

    /// Run both strategies concurrently, fuse, filter and truncate
    ///
    /// Both searches must succeed. A filter that leaves nothing yields an
    /// empty result, not an error.
    pub async fn rank(&self, query: &Query, query_vector: &[f32]) -> Result<RankedResults> {
        let depth = self.depth(query.top_k);
        let filter = query.category_filter.as_deref();

        // Step 1: Parallel vector + lexical search
        let (vector, lexical) = tokio::join!(
            self.index.vector_search(query_vector, depth, filter),
            self.index.lexical_search(&query.text, depth, filter)
        );
        let vector = vector?;
        let lexical = lexical?;
        let mut index_retries = vector.retries + lexical.retries;

        debug!(
            "Candidates: {} vector, {} lexical",
            vector.value.hits.len(),
            lexical.value.hits.len()
        );

        // Step 2: Reciprocal Rank Fusion
        let fused = reciprocal_rank_fusion(&[vector.value, lexical.value], &self.fusion);
        let candidates_considered = fused.len();
        if fused.is_empty() {
            return Ok(RankedResults {
                index_retries,
                ..Default::default()
            });
        }

        // Step 3: Hydrate articles
        let ids: Vec<ArticleId> = fused.iter().map(|h| h.article_id.clone()).collect();
        let fetched = self.index.fetch_articles(&ids).await?;
        index_retries += fetched.retries;
        let mut by_id: HashMap<&str, Arc<Article>> = fetched
            .value
            .iter()
            .map(|a| (a.id.as_str(), Arc::clone(a)))
            .collect();

        // Step 4: Re-check filter, drop unhydratable hits, truncate
        let keep = query.top_k.min(fused.len());
        let mut hits = Vec::with_capacity(keep);
        let mut articles = Vec::with_capacity(keep);
        for mut hit in fused {
            if hits.len() == keep {
                break;
            }
            let Some(article) = by_id.remove(hit.article_id.as_str()) else {
                debug!("Dropping {}: article not found in store", hit.article_id);
                continue;
            };
            if !query.matches_category(&article.category) {
                debug!(
                    "Dropping {}: category {} does not match filter",
                    hit.article_id, article.category
                );
                continue;
            }
            hit.rank = hits.len() + 1;
            hits.push(hit);
            articles.push(article);
        }

        Ok(RankedResults {
            hits,
            articles,
            candidates_considered,
            index_retries,
        })
    }
}

//! Reciprocal Rank Fusion algorithm for combining per-strategy result lists

use super::deduplicate_hits;
use crate::config::RetrievalConfig;
use crate::types::{ArticleId, RankedHit, Strategy, StrategyHits};
use ahash::{HashMap, HashMapExt};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be positive")]
    InvalidWeights,

    #[error("Invalid RRF constant: k must be positive")]
    InvalidK,
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f32,

    /// Weight for vector results
    pub vector_weight: f32,

    /// Weight for lexical results
    pub lexical_weight: f32,
}

impl FusionConfig {
    pub fn new(rrf_k: f32, vector_weight: f32, lexical_weight: f32) -> Result<Self, FusionError> {
        if !(rrf_k > 0.0) {
            return Err(FusionError::InvalidK);
        }
        if !(vector_weight > 0.0) || !(lexical_weight > 0.0) {
            return Err(FusionError::InvalidWeights);
        }

        Ok(Self {
            rrf_k,
            vector_weight,
            lexical_weight,
        })
    }

    pub fn from_config(config: &RetrievalConfig) -> Result<Self, FusionError> {
        Self::new(config.rrf_k, config.vector_weight, config.lexical_weight)
    }

    pub fn weight(&self, strategy: Strategy) -> f32 {
        match strategy {
            Strategy::Vector => self.vector_weight,
            Strategy::Lexical => self.lexical_weight,
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            vector_weight: 1.0,
            lexical_weight: 1.0,
        }
    }
}

#[derive(Default)]
struct Accumulator {
    fused: f64,
    strategy_scores: BTreeMap<Strategy, f32>,
}

/// Apply Reciprocal Rank Fusion to any number of strategy lists
///
/// RRF formula: score(id) = sum over strategies of weight / (k + rank), with
/// rank 1-based inside each deduplicated list. A strategy that did not return
/// an article contributes nothing for it.
///
/// Returns every candidate, sorted by fused score descending and then by
/// ascending article id, with `rank` set to the 1-based position.
pub fn reciprocal_rank_fusion(lists: &[StrategyHits], config: &FusionConfig) -> Vec<RankedHit> {
    let mut scores: HashMap<ArticleId, Accumulator> = HashMap::new();

    for list in lists {
        let weight = f64::from(config.weight(list.strategy));
        let k = f64::from(config.rrf_k);

        for (idx, (article_id, raw_score)) in deduplicate_hits(&list.hits).into_iter().enumerate()
        {
            let rank = (idx + 1) as f64;
            let entry = scores.entry(article_id).or_default();
            entry.fused += weight / (k + rank);
            entry.strategy_scores.insert(list.strategy, raw_score);
        }
    }

    let mut fused: Vec<RankedHit> = scores
        .into_iter()
        .map(|(article_id, acc)| RankedHit {
            article_id,
            strategy_scores: acc.strategy_scores,
            fused_score: acc.fused as f32,
            rank: 0,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.article_id.cmp(&b.article_id))
    });
    for (idx, hit) in fused.iter_mut().enumerate() {
        hit.rank = idx + 1;
    }

    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(strategy: Strategy, raw: &[(&str, f32)]) -> StrategyHits {
        StrategyHits::new(
            strategy,
            raw.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
        )
    }

    #[test]
    fn test_rrf_basic() {
        let vector = list(Strategy::Vector, &[("a", 0.9), ("b", 0.8), ("c", 0.7)]);
        let lexical = list(Strategy::Lexical, &[("b", 9.5), ("a", 8.5), ("d", 7.5)]);

        let fused = reciprocal_rank_fusion(&[vector, lexical], &FusionConfig::default());

        assert_eq!(fused.len(), 4);
        // a and b appear in both lists with ranks {1,2}: equal fused score, id breaks the tie
        assert_eq!(fused[0].article_id, "a");
        assert_eq!(fused[1].article_id, "b");
        assert_eq!(fused[0].fused_score, fused[1].fused_score);
        assert_eq!(fused[0].strategy_scores.len(), 2);
        // c (vector rank 3) and d (lexical rank 3) also tie
        assert_eq!(fused[2].article_id, "c");
        assert_eq!(fused[3].article_id, "d");

        let expected = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((fused[0].fused_score - expected as f32).abs() < 1e-6);
    }

    #[test]
    fn test_scores_non_increasing_and_ranks_dense() {
        let vector = list(
            Strategy::Vector,
            &[("e", 0.1), ("d", 0.2), ("c", 0.3), ("b", 0.4), ("a", 0.5)],
        );
        let lexical = list(Strategy::Lexical, &[("e", 3.0), ("x", 2.0), ("a", 1.0)]);

        let fused = reciprocal_rank_fusion(&[vector, lexical], &FusionConfig::default());

        for pair in fused.windows(2) {
            assert!(pair[0].fused_score >= pair[1].fused_score);
            if pair[0].fused_score == pair[1].fused_score {
                assert!(pair[0].article_id < pair[1].article_id);
            }
        }
        let ranks: Vec<_> = fused.iter().map(|h| h.rank).collect();
        assert_eq!(ranks, (1..=fused.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_strategy_hit_still_scores() {
        let vector = list(Strategy::Vector, &[]);
        let lexical = list(Strategy::Lexical, &[("kb-007", 4.2)]);

        let fused = reciprocal_rank_fusion(&[vector, lexical], &FusionConfig::default());

        assert_eq!(fused.len(), 1);
        assert!(fused[0].fused_score > 0.0);
        assert_eq!(fused[0].strategy_scores.get(&Strategy::Lexical), Some(&4.2));
        assert!(!fused[0].strategy_scores.contains_key(&Strategy::Vector));
    }

    #[test]
    fn test_rrf_weighted() {
        let vector = list(Strategy::Vector, &[("1", 0.9)]);
        let lexical = list(Strategy::Lexical, &[("2", 0.9)]);

        let config = FusionConfig::new(60.0, 0.7, 0.3).unwrap();
        let fused = reciprocal_rank_fusion(&[vector, lexical], &config);

        assert_eq!(fused[0].article_id, "1");
    }

    #[test]
    fn test_duplicates_within_a_list_count_once() {
        let vector = list(Strategy::Vector, &[("a", 0.2), ("a", 0.9), ("b", 0.5)]);
        let fused = reciprocal_rank_fusion(&[vector], &FusionConfig::default());

        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].article_id, "a");
        assert_eq!(fused[0].strategy_scores[&Strategy::Vector], 0.9);
        assert!((fused[0].fused_score - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_config() {
        assert!(FusionConfig::new(60.0, 0.0, 1.0).is_err());
        assert!(FusionConfig::new(0.0, 1.0, 1.0).is_err());
        assert!(FusionConfig::new(f32::NAN, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_empty_lists() {
        let fused = reciprocal_rank_fusion(
            &[list(Strategy::Vector, &[]), list(Strategy::Lexical, &[])],
            &FusionConfig::default(),
        );
        assert!(fused.is_empty());
    }
}

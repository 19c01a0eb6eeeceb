//! Per-strategy deduplication and rank ordering

use crate::types::ArticleId;
use std::collections::HashMap;

/// Collapse duplicate ids in one strategy's list, keeping the best raw score
///
/// Output is in rank order: score descending, equal scores by ascending id.
/// Non-finite scores sort last.
pub fn deduplicate_hits(hits: &[(ArticleId, f32)]) -> Vec<(ArticleId, f32)> {
    let mut best: HashMap<&str, f32> = HashMap::with_capacity(hits.len());

    for (id, score) in hits {
        let score = if score.is_nan() {
            f32::NEG_INFINITY
        } else {
            *score
        };
        best.entry(id.as_str())
            .and_modify(|s| *s = s.max(score))
            .or_insert(score);
    }

    let mut ranked: Vec<(ArticleId, f32)> = best
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

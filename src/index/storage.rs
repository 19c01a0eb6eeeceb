/// Narrow interface to whatever engine stores the article index
use super::IndexError;
use crate::types::{Article, ArticleId};
use async_trait::async_trait;
use std::sync::Arc;

/// Article index storage
///
/// Both queries return `(article id, raw score)` with higher scores better.
/// Nothing matching is an empty list, not an error. `category` is an exact
/// match on `Article::category` and should be applied inside the query.
#[async_trait]
pub trait IndexStorage: Send + Sync {
    /// k-nearest-neighbour search over article embeddings
    async fn vector_query(
        &self,
        vector: &[f32],
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<(ArticleId, f32)>, IndexError>;

    /// Term-match search over article titles and content
    async fn lexical_query(
        &self,
        text: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<(ArticleId, f32)>, IndexError>;

    /// Hydrate ids into articles; unknown ids are skipped
    async fn fetch_articles(&self, ids: &[ArticleId]) -> Result<Vec<Arc<Article>>, IndexError>;
}

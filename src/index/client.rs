/// Index client: deadlines and a single fixed-delay retry around the storage
use super::{IndexError, IndexStorage};
use crate::config::{parse_duration, IndexConfig};
use crate::error::{KbError, Result};
use crate::retry::{Retried, RetryExhausted, RetryPolicy};
use crate::types::{Article, ArticleId, Strategy, StrategyHits};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Executes vector and lexical queries against an [`IndexStorage`]
///
/// Transport or storage failures are retried once after `retry_delay`; a
/// second failure surfaces as `IndexUnavailable`.
#[derive(Clone)]
pub struct IndexClient {
    storage: Arc<dyn IndexStorage>,
    retry: RetryPolicy,
    query_timeout: Duration,
}

impl IndexClient {
    pub fn new(storage: Arc<dyn IndexStorage>) -> Self {
        Self {
            storage,
            retry: RetryPolicy::fixed(2, Duration::from_millis(200)),
            query_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(storage: Arc<dyn IndexStorage>, config: &IndexConfig) -> Result<Self> {
        Ok(Self::new(storage)
            .with_timeout(parse_duration(&config.query_timeout)?)
            .with_retry_delay(parse_duration(&config.retry_delay)?))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry = RetryPolicy::fixed(2, delay);
        self
    }

    /// kNN search; filter is pushed down to the storage
    pub async fn vector_search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&str>,
    ) -> Result<Retried<StrategyHits>> {
        let result = self
            .call("vector search", || {
                self.storage.vector_query(vector, top_k, filter)
            })
            .await?;
        debug!("vector search returned {} hits", result.value.len());
        Ok(Retried {
            value: StrategyHits::new(Strategy::Vector, result.value),
            retries: result.retries,
        })
    }

    /// Term-match search; filter is pushed down to the storage
    pub async fn lexical_search(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&str>,
    ) -> Result<Retried<StrategyHits>> {
        let result = self
            .call("lexical search", || {
                self.storage.lexical_query(text, top_k, filter)
            })
            .await?;
        debug!("lexical search returned {} hits", result.value.len());
        Ok(Retried {
            value: StrategyHits::new(Strategy::Lexical, result.value),
            retries: result.retries,
        })
    }

    /// Load the articles behind a set of hits
    pub async fn fetch_articles(&self, ids: &[ArticleId]) -> Result<Retried<Vec<Arc<Article>>>> {
        if ids.is_empty() {
            return Ok(Retried {
                value: Vec::new(),
                retries: 0,
            });
        }
        self.call("article fetch", || self.storage.fetch_articles(ids))
            .await
    }

    async fn call<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<Retried<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, IndexError>>,
    {
        let timeout = self.query_timeout;
        self.retry
            .run(operation, || {
                let fut = op();
                async move {
                    tokio::time::timeout(timeout, fut)
                        .await
                        .map_err(|_| IndexError::Timeout(timeout))?
                }
            })
            .await
            .map_err(|exhausted| into_kb_error(operation, exhausted))
    }
}

fn into_kb_error(operation: &str, exhausted: RetryExhausted<IndexError>) -> KbError {
    match exhausted.error {
        IndexError::InvalidQuery(msg) => KbError::InvalidInput(msg),
        error => KbError::IndexUnavailable(format!(
            "{} failed after {} attempt(s): {}",
            operation, exhausted.attempts, error
        )),
    }
}

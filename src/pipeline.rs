//! Query pipeline: embed, rank, build context, generate, apply policy

use crate::config::{parse_duration, Config};
use crate::context::{ContextBlock, ContextBuilder};
use crate::embedding::{provider_from_config, EmbeddingGateway};
use crate::error::{KbError, Result};
use crate::generation::{
    completion_provider_from_config, DraftAnswer, GroundedAnswerGenerator,
};
use crate::index::{IndexClient, IndexStorage, LocalIndex};
use crate::policy::FallbackPolicy;
use crate::ranking::{HybridRanker, RankedResults};
use crate::retry::RetryPolicy;
use crate::types::{Diagnostics, GeneratedAnswer, NotFoundReason, Query, RankedHit};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// End-to-end retrieval and grounded answering
///
/// Holds only shared, read-only handles; one pipeline serves any number of
/// concurrent queries.
pub struct RetrievalPipeline {
    embeddings: Arc<EmbeddingGateway>,
    ranker: HybridRanker,
    context: ContextBuilder,
    generator: GroundedAnswerGenerator,
    policy: FallbackPolicy,
    query_deadline: Duration,
}

impl RetrievalPipeline {
    pub fn new(
        embeddings: Arc<EmbeddingGateway>,
        ranker: HybridRanker,
        context: ContextBuilder,
        generator: GroundedAnswerGenerator,
    ) -> Self {
        Self {
            embeddings,
            ranker,
            context,
            generator,
            policy: FallbackPolicy::default(),
            query_deadline: Duration::from_secs(90),
        }
    }

    /// Wire every component from `config` on top of `storage`
    pub fn from_config(config: &Config, storage: Arc<dyn IndexStorage>) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config.retry)?;

        let embedding_provider = provider_from_config(&config.embedding)?;
        let embeddings = Arc::new(EmbeddingGateway::from_config(
            embedding_provider,
            &config.embedding,
            retry.clone(),
        )?);

        let index = IndexClient::from_config(storage, &config.index)?;
        let ranker = HybridRanker::from_config(index, &config.retrieval)?;

        let completion_provider = completion_provider_from_config(&config.llm)?;
        let generator = GroundedAnswerGenerator::from_config(
            completion_provider,
            &config.llm,
            &config.grounding,
            retry,
        )?;

        Ok(Self::new(
            embeddings,
            ranker,
            ContextBuilder::from_config(&config.context),
            generator,
        )
        .with_deadline(parse_duration(&config.pipeline.query_deadline)?))
    }

    /// Open the local index under the configured data directory
    pub fn open(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let index =
            LocalIndex::open_with_config(&data_dir, &config.index, config.embedding.dimension)?;
        Self::from_config(config, Arc::new(index))
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.query_deadline = deadline;
        self
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn generator(&self) -> &GroundedAnswerGenerator {
        &self.generator
    }

    /// Answer `query` from the knowledge base
    ///
    /// Only invalid input or exhausted providers/index surface as errors.
    /// Everything else, including the aggregate deadline, resolves to a verdict.
    pub async fn retrieve(&self, query: Query) -> Result<GeneratedAnswer> {
        let query_id = Uuid::new_v4().to_string();
        let span = info_span!("retrieve", query_id = %query_id);
        self.retrieve_inner(query, query_id).instrument(span).await
    }

    /// Like [`Self::retrieve`], but gives up with `Cancelled` once `token` fires
    pub async fn retrieve_with_cancel(
        &self,
        query: Query,
        token: CancellationToken,
    ) -> Result<GeneratedAnswer> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Query cancelled by caller");
                Err(KbError::Cancelled)
            }
            result = self.retrieve(query) => result,
        }
    }

    /// Retrieval and fusion only, no generation
    pub async fn search(&self, query: Query) -> Result<Vec<RankedHit>> {
        Ok(self.search_results(query).await?.hits)
    }

    /// Ranked hits together with their hydrated articles
    pub async fn search_results(&self, query: Query) -> Result<RankedResults> {
        query.validate()?;
        let span = info_span!("search", query_id = %Uuid::new_v4());
        async {
            let mut diagnostics = Diagnostics::default();
            match tokio::time::timeout(self.query_deadline, self.rank(&query, &mut diagnostics))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!("Search exceeded deadline of {:?}", self.query_deadline);
                    Ok(RankedResults::default())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn retrieve_inner(&self, query: Query, query_id: String) -> Result<GeneratedAnswer> {
        query.validate()?;
        let started = Instant::now();
        let mut diagnostics = Diagnostics {
            query_id,
            ..Default::default()
        };

        let outcome =
            tokio::time::timeout(self.query_deadline, self.answer(&query, &mut diagnostics)).await;
        diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;

        let answer = match outcome {
            Ok(Ok((draft, context))) => self.policy.apply(draft, &context, diagnostics),
            Ok(Err(e)) => {
                warn!("Query failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                warn!("Query exceeded deadline of {:?}", self.query_deadline);
                self.policy.not_found(NotFoundReason::Timeout, diagnostics)
            }
        };

        info!(
            "Query finished: {:?} with {} source(s) in {}ms",
            answer.verdict,
            answer.sources.len(),
            answer.diagnostics.elapsed_ms
        );
        Ok(answer)
    }

    async fn answer(
        &self,
        query: &Query,
        diagnostics: &mut Diagnostics,
    ) -> Result<(DraftAnswer, ContextBlock)> {
        let ranked = self.rank(query, diagnostics).await?;

        let context = self.context.build(&ranked.articles);
        debug!(
            "Context holds {} of {} ranked articles",
            context.len(),
            ranked.hits.len()
        );

        let draft = self.generator.generate(&query.text, &context).await?;
        diagnostics.completion_retries = draft.completion_retries;
        diagnostics.token_usage = draft.usage;

        Ok((draft, context))
    }

    async fn rank(&self, query: &Query, diagnostics: &mut Diagnostics) -> Result<RankedResults> {
        let embedding = self.embeddings.embed_with_stats(&query.text).await?;
        diagnostics.embedding_retries = embedding.retries;
        debug!("Query embedded with {} retries", embedding.retries);

        let ranked = self.ranker.rank(query, &embedding.value).await?;
        diagnostics.index_retries = ranked.index_retries;
        diagnostics.candidates_considered = ranked.candidates_considered;
        debug!(
            "Ranked {} hits from {} candidates",
            ranked.hits.len(),
            ranked.candidates_considered
        );

        Ok(ranked)
    }
}

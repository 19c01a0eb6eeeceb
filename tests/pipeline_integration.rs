//! End-to-end tests for the retrieval pipeline
//!
//! Providers and storage are in-process fakes so the tests run offline and
//! deterministically. The local index (tantivy + HNSW) is used wherever the
//! ranking itself is under test.

use async_trait::async_trait;
use chrono::Utc;
use kbground::context::ContextBuilder;
use kbground::embedding::{EmbeddingError, EmbeddingGateway, EmbeddingProvider};
use kbground::generation::{
    Completion, CompletionError, CompletionProvider, GroundedAnswerGenerator,
};
use kbground::index::{HnswParams, IndexBuilder, IndexClient, IndexError, IndexStorage, LocalIndex};
use kbground::ranking::{FusionConfig, HybridRanker};
use kbground::retry::RetryPolicy;
use kbground::{
    Article, ArticleId, KbError, NotFoundReason, Query, RetrievalPipeline, Strategy, Verdict,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const TOPICS: [&str; 6] = ["password", "vpn", "leave", "expense", "laptop", "badge"];
const DIM: usize = TOPICS.len() + 1;

/// Topic-count vector with a constant bias so no vector is all zeros
fn topic_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = TOPICS
        .iter()
        .map(|topic| lower.matches(topic).count() as f32)
        .collect();
    vector.push(0.1);
    vector
}

struct TopicEmbedder {
    fail_first: u32,
    calls: AtomicU32,
}

impl TopicEmbedder {
    fn new() -> Self {
        Self::failing_first(0)
    }

    fn failing_first(n: u32) -> Self {
        Self {
            fail_first: n,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_first {
            return Err(EmbeddingError::RateLimited("429 Too Many Requests".into()));
        }
        Ok(topic_vector(text))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "topic-counter"
    }
}

struct ScriptedCompletion {
    reply: String,
    delay: Duration,
    always_fail: bool,
    calls: AtomicU32,
}

impl ScriptedCompletion {
    fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: Duration::ZERO,
            always_fail: false,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(&self, _system: &str, _user: &str) -> Result<Completion, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.always_fail {
            return Err(CompletionError::ServerError {
                status: 503,
                message: "overloaded".into(),
            });
        }
        Ok(Completion {
            text: self.reply.clone(),
            usage: Some(kbground::TokenUsage {
                prompt_tokens: 250,
                completion_tokens: 40,
                total_tokens: 290,
            }),
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn owned(hits: &[(&str, f32)]) -> Vec<(ArticleId, f32)> {
    hits.iter()
        .map(|(id, score)| (id.to_string(), *score))
        .collect()
}

/// Storage with canned per-strategy results
struct FixedStorage {
    vector: Vec<(ArticleId, f32)>,
    lexical: Vec<(ArticleId, f32)>,
    articles: HashMap<ArticleId, Arc<Article>>,
    fail_lexical: bool,
    lexical_calls: AtomicU32,
}

impl FixedStorage {
    fn new(vector: &[(&str, f32)], lexical: &[(&str, f32)]) -> Self {
        let articles = corpus()
            .into_iter()
            .map(|a| (a.id.clone(), Arc::new(a)))
            .collect();
        Self {
            vector: owned(vector),
            lexical: owned(lexical),
            articles,
            fail_lexical: false,
            lexical_calls: AtomicU32::new(0),
        }
    }

    fn filtered(
        &self,
        hits: &[(ArticleId, f32)],
        limit: usize,
        category: Option<&str>,
    ) -> Vec<(ArticleId, f32)> {
        hits.iter()
            .filter(|(id, _)| {
                category.map_or(true, |c| {
                    self.articles.get(id).map_or(false, |a| a.category == c)
                })
            })
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl IndexStorage for FixedStorage {
    async fn vector_query(
        &self,
        _vector: &[f32],
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<(ArticleId, f32)>, IndexError> {
        Ok(self.filtered(&self.vector, limit, category))
    }

    async fn lexical_query(
        &self,
        _text: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<(ArticleId, f32)>, IndexError> {
        self.lexical_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lexical {
            return Err(IndexError::Storage("connection reset".into()));
        }
        Ok(self.filtered(&self.lexical, limit, category))
    }

    async fn fetch_articles(&self, ids: &[ArticleId]) -> Result<Vec<Arc<Article>>, IndexError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.articles.get(id).cloned())
            .collect())
    }
}

fn article(id: &str, title: &str, category: &str, content: &str) -> Article {
    let mut article = Article {
        id: id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        category: category.to_string(),
        tags: BTreeSet::new(),
        last_updated: Utc::now(),
        url: None,
        embedding: Vec::new(),
        content_hash: None,
    };
    article.embedding = topic_vector(&article.embedding_text());
    article
}

fn corpus() -> Vec<Article> {
    vec![
        article(
            "kb-001",
            "Password Reset Procedure",
            "IT",
            "To reset your password, open the self-service portal and choose Forgot password. \
             The reset link expires after 24 hours.",
        ),
        article(
            "kb-002",
            "VPN Setup Guide",
            "IT",
            "Install the VPN client from the software center and sign in with your corporate account.",
        ),
        article(
            "kb-003",
            "Annual Leave Policy",
            "HR",
            "Employees accrue annual leave monthly. Unused leave rolls over up to ten days.",
        ),
        article(
            "kb-004",
            "Parental Leave",
            "HR",
            "Parents receive twelve weeks of paid leave after the birth or adoption of a child.",
        ),
        article(
            "kb-005",
            "Expense Reimbursement",
            "Finance",
            "Submit expense reports within 30 days with receipts attached.",
        ),
        article(
            "kb-006",
            "Laptop Replacement",
            "IT",
            "Request a laptop replacement through the service desk after four years of use.",
        ),
        article(
            "kb-007",
            "Turnstile Troubleshooting",
            "Facilities",
            "If the turnstile does not open, hold your card flat against the reader for two seconds.",
        ),
    ]
}

fn local_storage() -> Arc<dyn IndexStorage> {
    Arc::new(LocalIndex::from_articles(corpus(), DIM, HnswParams::default()).unwrap())
}

fn pipeline(
    embedder: Arc<TopicEmbedder>,
    completion: Arc<ScriptedCompletion>,
    storage: Arc<dyn IndexStorage>,
) -> RetrievalPipeline {
    let gateway = Arc::new(EmbeddingGateway::new(
        embedder,
        RetryPolicy::fixed(5, Duration::ZERO),
    ));
    let index = IndexClient::new(storage).with_retry_delay(Duration::ZERO);
    let ranker = HybridRanker::new(index, FusionConfig::default(), 4);
    let generator =
        GroundedAnswerGenerator::new(completion, RetryPolicy::fixed(3, Duration::ZERO)).unwrap();
    RetrievalPipeline::new(gateway, ranker, ContextBuilder::default(), generator)
}

const PASSWORD_ANSWER: &str = "Open the self-service portal and choose Forgot password [1]. \
     The reset link expires after 24 hours [1].\n\nSources:\n[1] Password Reset Procedure";

#[tokio::test]
async fn test_answered_citations_stay_in_range() {
    let completion = Arc::new(ScriptedCompletion::replying(PASSWORD_ANSWER));
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        completion.clone(),
        local_storage(),
    );

    let answer = pipeline
        .retrieve(Query::new("How do I reset my password?").with_top_k(3))
        .await
        .unwrap();

    assert_eq!(answer.verdict, Verdict::Answered);
    assert_eq!(answer.sources[0].id, "kb-001");
    assert!(!answer.cited_numbers.is_empty());
    for n in &answer.cited_numbers {
        assert!(*n >= 1 && (*n as usize) <= answer.sources.len());
    }
    assert!(answer.grounding_violations.is_empty());
    assert!(answer.caveat.is_none());
    assert!(!answer.diagnostics.query_id.is_empty());
    assert_eq!(answer.diagnostics.token_usage.map(|u| u.total_tokens), Some(290));
    assert_eq!(completion.calls(), 1);
}

#[tokio::test]
async fn test_exact_title_match_ranks_first_lexically() {
    let completion = Arc::new(ScriptedCompletion::replying(PASSWORD_ANSWER));
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        completion,
        local_storage(),
    );

    let hits = pipeline.search(Query::new("password reset")).await.unwrap();
    let kb001 = hits
        .iter()
        .find(|h| h.article_id == "kb-001")
        .expect("kb-001 retrieved");
    let best_lexical = hits
        .iter()
        .filter_map(|h| h.strategy_scores.get(&Strategy::Lexical).copied())
        .fold(f32::MIN, f32::max);
    assert_eq!(kb001.strategy_scores[&Strategy::Lexical], best_lexical);
    assert_eq!(hits[0].article_id, "kb-001");

    let answer = pipeline.retrieve(Query::new("password reset")).await.unwrap();
    assert!(answer.sources.iter().any(|s| s.id == "kb-001"));
}

#[tokio::test]
async fn test_fused_scores_are_ordered() {
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        Arc::new(ScriptedCompletion::replying("unused")),
        local_storage(),
    );

    let hits = pipeline
        .search(Query::new("leave policy for parents").with_top_k(7))
        .await
        .unwrap();

    assert!(!hits.is_empty());
    for pair in hits.windows(2) {
        assert!(pair[0].fused_score >= pair[1].fused_score);
        if pair[0].fused_score == pair[1].fused_score {
            assert!(pair[0].article_id < pair[1].article_id);
        }
    }
    let ranks: Vec<usize> = hits.iter().map(|h| h.rank).collect();
    assert_eq!(ranks, (1..=hits.len()).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_repeated_query_is_stable() {
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        Arc::new(ScriptedCompletion::replying(PASSWORD_ANSWER)),
        local_storage(),
    );
    let query = Query::new("How do I reset my password?");

    let first = pipeline.retrieve(query.clone()).await.unwrap();
    let second = pipeline.retrieve(query).await.unwrap();

    assert_eq!(first.sources, second.sources);
    assert_eq!(first.cited_numbers, second.cited_numbers);
    assert_ne!(first.diagnostics.query_id, second.diagnostics.query_id);
}

#[tokio::test]
async fn test_no_results_skips_completion() {
    let completion = Arc::new(ScriptedCompletion::replying("should not be used"));
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        completion.clone(),
        local_storage(),
    );

    let answer = pipeline
        .retrieve(Query::new("contract renewal").with_category("Legal"))
        .await
        .unwrap();

    assert_eq!(answer.verdict, Verdict::NotFound);
    assert_eq!(answer.not_found_reason, Some(NotFoundReason::NoResults));
    assert!(answer.sources.is_empty());
    assert!(answer.cited_numbers.is_empty());
    assert!(answer.escalation_hint.is_some());
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn test_lexical_only_hit_can_be_cited() {
    let storage = Arc::new(FixedStorage::new(
        &[("kb-002", 0.91)],
        &[("kb-007", 3.4)],
    ));
    let completion = Arc::new(ScriptedCompletion::replying(
        "Hold your card flat against the turnstile reader for two seconds [2].",
    ));
    let pipeline = pipeline(Arc::new(TopicEmbedder::new()), completion, storage);

    let hits = pipeline
        .search(Query::new("turnstile will not open"))
        .await
        .unwrap();
    let kb007 = hits.iter().find(|h| h.article_id == "kb-007").unwrap();
    assert!(kb007.fused_score > 0.0);
    assert!(!kb007.strategy_scores.contains_key(&Strategy::Vector));

    let answer = pipeline
        .retrieve(Query::new("turnstile will not open"))
        .await
        .unwrap();
    assert_eq!(answer.verdict, Verdict::Answered);
    assert_eq!(answer.sources[1].id, "kb-007");
    assert_eq!(answer.cited_numbers, BTreeSet::from([2]));
}

#[tokio::test]
async fn test_unbounded_top_k_is_served() {
    let storage = Arc::new(FixedStorage::new(
        &[("kb-001", 0.93)],
        &[("kb-001", 5.2)],
    ));
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        Arc::new(ScriptedCompletion::replying(PASSWORD_ANSWER)),
        storage,
    );

    let answer = pipeline
        .retrieve(Query::new("reset password").with_top_k(usize::MAX))
        .await
        .unwrap();

    assert_eq!(answer.verdict, Verdict::Answered);
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].id, "kb-001");
}

#[tokio::test]
async fn test_decline_with_source_list_is_not_found() {
    let completion = Arc::new(ScriptedCompletion::replying(
        "I don't have enough information to answer this question.\n\nSources:\n[1] Password Reset Procedure",
    ));
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        completion.clone(),
        local_storage(),
    );

    let answer = pipeline
        .retrieve(Query::new("reset password"))
        .await
        .unwrap();

    assert_eq!(completion.calls(), 1);
    assert_eq!(answer.verdict, Verdict::NotFound);
    assert_eq!(
        answer.not_found_reason,
        Some(NotFoundReason::NoRelevantInformation)
    );
    assert!(answer.sources.is_empty());
    assert!(answer.cited_numbers.is_empty());
    assert!(answer.caveat.is_none());
}

#[tokio::test]
async fn test_embedding_rate_limit_is_absorbed() {
    let embedder = Arc::new(TopicEmbedder::failing_first(2));
    let pipeline = pipeline(
        embedder.clone(),
        Arc::new(ScriptedCompletion::replying(PASSWORD_ANSWER)),
        local_storage(),
    );

    let answer = pipeline
        .retrieve(Query::new("reset password"))
        .await
        .unwrap();

    assert_eq!(answer.diagnostics.embedding_retries, 2);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    assert_ne!(answer.verdict, Verdict::NotFound);
}

#[tokio::test]
async fn test_citation_drift_lowers_confidence() {
    let storage = Arc::new(FixedStorage::new(
        &[
            ("kb-003", 0.9),
            ("kb-004", 0.8),
            ("kb-001", 0.3),
            ("kb-002", 0.2),
            ("kb-005", 0.1),
        ],
        &[],
    ));
    let reply = "Leave accrues monthly [7].";
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        Arc::new(ScriptedCompletion::replying(reply)),
        storage,
    );

    let answer = pipeline.retrieve(Query::new("leave")).await.unwrap();

    assert_eq!(answer.sources.len(), 5);
    assert_eq!(answer.verdict, Verdict::LowConfidence);
    assert_eq!(answer.grounding_violations, vec![7]);
    assert_eq!(answer.text, reply);
    assert!(answer.caveat.is_some());
    assert_eq!(pipeline.generator().grounding_violations_total(), 1);
}

#[tokio::test]
async fn test_category_filter_is_honoured() {
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        Arc::new(ScriptedCompletion::replying(
            "Employees accrue annual leave monthly [1]. Parents receive twelve weeks [2].",
        )),
        local_storage(),
    );

    let query = Query::new("leave policy").with_category("HR").with_top_k(5);
    let results = pipeline.search_results(query.clone()).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.articles.iter().all(|a| a.category == "HR"));

    let answer = pipeline.retrieve(query).await.unwrap();
    let hr: BTreeSet<&str> = ["kb-003", "kb-004"].into_iter().collect();
    assert!(!answer.sources.is_empty());
    assert!(answer.sources.iter().all(|s| hr.contains(s.id.as_str())));
}

#[tokio::test]
async fn test_index_failure_after_retry() {
    let mut storage = FixedStorage::new(&[("kb-001", 0.9)], &[("kb-001", 2.0)]);
    storage.fail_lexical = true;
    let storage = Arc::new(storage);
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        Arc::new(ScriptedCompletion::replying(PASSWORD_ANSWER)),
        storage.clone(),
    );

    let err = pipeline
        .retrieve(Query::new("reset password"))
        .await
        .unwrap_err();

    assert!(matches!(err, KbError::IndexUnavailable(_)));
    assert_eq!(storage.lexical_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_completion_outage_is_provider_unavailable() {
    let mut completion = ScriptedCompletion::replying("unused");
    completion.always_fail = true;
    let completion = Arc::new(completion);
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        completion.clone(),
        local_storage(),
    );

    let err = pipeline
        .retrieve(Query::new("reset password"))
        .await
        .unwrap_err();

    assert!(matches!(err, KbError::ProviderUnavailable { attempts: 3, .. }));
    assert_eq!(completion.calls(), 3);
}

#[tokio::test]
async fn test_deadline_resolves_to_timeout() {
    let mut completion = ScriptedCompletion::replying(PASSWORD_ANSWER);
    completion.delay = Duration::from_secs(5);
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        Arc::new(completion),
        local_storage(),
    )
    .with_deadline(Duration::from_millis(500));

    let answer = pipeline
        .retrieve(Query::new("reset password"))
        .await
        .unwrap();

    assert_eq!(answer.verdict, Verdict::NotFound);
    assert_eq!(answer.not_found_reason, Some(NotFoundReason::Timeout));
    assert!(answer.sources.is_empty());
    assert!(answer.diagnostics.candidates_considered > 0);
}

#[tokio::test]
async fn test_cancellation() {
    let mut completion = ScriptedCompletion::replying(PASSWORD_ANSWER);
    completion.delay = Duration::from_secs(5);
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        Arc::new(completion),
        local_storage(),
    );

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = pipeline
        .retrieve_with_cancel(Query::new("reset password"), token)
        .await
        .unwrap_err();
    assert!(matches!(err, KbError::Cancelled));
}

#[tokio::test]
async fn test_invalid_query_is_rejected() {
    let embedder = Arc::new(TopicEmbedder::new());
    let pipeline = pipeline(
        embedder.clone(),
        Arc::new(ScriptedCompletion::replying("unused")),
        local_storage(),
    );

    let err = pipeline.retrieve(Query::new("   ")).await.unwrap_err();
    assert!(matches!(err, KbError::InvalidInput(_)));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_built_index_serves_queries() {
    let temp = TempDir::new().unwrap();
    let gateway = Arc::new(EmbeddingGateway::new(
        Arc::new(TopicEmbedder::new()),
        RetryPolicy::fixed(2, Duration::ZERO),
    ));

    let mut articles = corpus();
    for a in &mut articles {
        a.embedding.clear();
    }
    let report = IndexBuilder::new(temp.path(), gateway)
        .build(articles)
        .await
        .unwrap();
    assert_eq!(report.total, 7);
    assert_eq!(report.embedded, 7);

    let index = LocalIndex::open(temp.path(), DIM, HnswParams::default()).unwrap();
    let pipeline = pipeline(
        Arc::new(TopicEmbedder::new()),
        Arc::new(ScriptedCompletion::replying(
            "Install the VPN client from the software center [1].",
        )),
        Arc::new(index),
    );

    let answer = pipeline
        .retrieve(Query::new("vpn setup").with_top_k(2))
        .await
        .unwrap();
    assert_eq!(answer.verdict, Verdict::Answered);
    assert_eq!(answer.sources[0].id, "kb-002");
}

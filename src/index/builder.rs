/// Ingestion: load articles, re-embed changed ones, write the local index
use super::{lexical_dir, ArticleStore, IndexError, KeywordIndex, KeywordIndexError};
use crate::embedding::EmbeddingGateway;
use crate::error::{KbError, Result};
use crate::types::Article;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Articles in the index after the run
    pub total: usize,
    /// Articles sent to the embedding provider
    pub embedded: usize,
    /// Articles whose stored embedding was still current
    pub reused: usize,
    pub embedding_retries: u32,
    pub duration_ms: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArticleFile {
    Many(Vec<Article>),
    One(Box<Article>),
}

/// Read articles from JSON files or directories of JSON files
///
/// A file holds either one article object or an array of them.
pub fn load_articles(paths: &[PathBuf]) -> Result<Vec<Article>> {
    let mut articles = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)
                .map_err(|e| KbError::Io {
                    source: e,
                    context: format!("Failed to list {:?}", path),
                })?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            files.sort();
            for file in files {
                articles.extend(load_file(&file)?);
            }
        } else {
            articles.extend(load_file(path)?);
        }
    }
    Ok(articles)
}

fn load_file(path: &Path) -> Result<Vec<Article>> {
    let content = std::fs::read_to_string(path).map_err(|e| KbError::Io {
        source: e,
        context: format!("Failed to read {:?}", path),
    })?;
    let parsed: ArticleFile = serde_json::from_str(&content).map_err(|e| KbError::Json {
        source: e,
        context: format!("Invalid article file {:?}", path),
    })?;
    Ok(match parsed {
        ArticleFile::Many(articles) => articles,
        ArticleFile::One(article) => vec![*article],
    })
}

/// Writes the on-disk index that [`super::LocalIndex::open`] reads
pub struct IndexBuilder {
    data_dir: PathBuf,
    gateway: Arc<EmbeddingGateway>,
}

impl IndexBuilder {
    pub fn new(data_dir: impl Into<PathBuf>, gateway: Arc<EmbeddingGateway>) -> Self {
        Self {
            data_dir: data_dir.into(),
            gateway,
        }
    }

    /// Upsert `incoming` into the index
    ///
    /// Articles already in the store are kept. An embedding is regenerated
    /// only when the content hash changed or the stored vector has the wrong
    /// dimension.
    pub async fn build(&self, incoming: Vec<Article>) -> Result<BuildReport> {
        let start = Instant::now();
        let dimension = self.gateway.dimension();
        let store = ArticleStore::new(&self.data_dir);

        let mut merged: BTreeMap<String, Article> = store
            .load()?
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        let existing_count = merged.len();

        let mut pending: Vec<String> = Vec::new();
        let mut reused = 0;
        let mut seen = std::collections::HashSet::new();

        for mut article in incoming {
            validate(&article)?;
            if !seen.insert(article.id.clone()) {
                warn!("Article {} appears more than once; last one wins", article.id);
            }

            let hash = article.compute_content_hash();
            let stored = merged
                .get(&article.id)
                .filter(|old| old.embedding_is_current(dimension))
                .filter(|old| old.content_hash.as_deref() == Some(hash.as_str()));

            if let Some(old) = stored {
                article.embedding = old.embedding.clone();
                reused += 1;
            } else if article.embedding.len() == dimension && article.content_hash.is_none() {
                // precomputed by the caller for this exact content
                reused += 1;
            } else {
                article.embedding.clear();
                pending.push(article.id.clone());
            }

            article.content_hash = Some(hash);
            merged.insert(article.id.clone(), article);
        }

        // articles loaded from the store that predate hashing or changed dimension
        for (id, article) in merged.iter() {
            if !seen.contains(id) && !article.embedding_is_current(dimension) {
                pending.push(id.clone());
            }
        }

        debug!(
            "{} stored articles, {} to embed, {} reused",
            existing_count,
            pending.len(),
            reused
        );

        let texts: Vec<String> = pending
            .iter()
            .filter_map(|id| merged.get(id))
            .map(|a| truncate_chars(&a.embedding_text(), self.gateway.max_input_chars()))
            .collect();
        let embedded = self.gateway.embed_batch_with_stats(&texts).await?;

        for (id, vector) in pending.iter().zip(embedded.value) {
            if let Some(article) = merged.get_mut(id) {
                article.content_hash = Some(article.compute_content_hash());
                article.embedding = vector;
            }
        }

        let articles: Vec<Article> = merged.into_values().collect();
        store.save(&articles)?;

        rebuild_lexical(&self.data_dir, &articles).map_err(IndexError::from)?;

        let report = BuildReport {
            total: articles.len(),
            embedded: pending.len(),
            reused,
            embedding_retries: embedded.retries,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Index build complete: {} articles, {} embedded, {} reused, {}ms",
            report.total, report.embedded, report.reused, report.duration_ms
        );

        Ok(report)
    }
}

fn rebuild_lexical(
    data_dir: &Path,
    articles: &[Article],
) -> std::result::Result<(), KeywordIndexError> {
    let mut keyword = KeywordIndex::open_or_create(&lexical_dir(data_dir))?;
    keyword.clear()?;
    for article in articles {
        keyword.upsert(article)?;
    }
    keyword.commit()
}

fn validate(article: &Article) -> Result<()> {
    if article.id.trim().is_empty() {
        return Err(KbError::InvalidInput("Article id cannot be empty".to_string()));
    }
    if article.title.trim().is_empty() && article.content.trim().is_empty() {
        return Err(KbError::InvalidInput(format!(
            "Article {} has neither title nor content",
            article.id
        )));
    }
    Ok(())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingProvider};
    use crate::index::{HnswParams, IndexStorage, LocalIndex};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingProvider {
        embedded: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            self.embedded.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn sample(id: &str, content: &str) -> Article {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "title": format!("Title {}", id),
            "content": content,
            "category": "IT",
            "last_updated": "2024-01-15"
        }))
        .unwrap()
    }

    fn builder(dir: &Path) -> (Arc<CountingProvider>, IndexBuilder) {
        let provider = Arc::new(CountingProvider {
            embedded: AtomicUsize::new(0),
        });
        let gateway = EmbeddingGateway::new(provider.clone(), RetryPolicy::none());
        (provider, IndexBuilder::new(dir, Arc::new(gateway)))
    }

    #[tokio::test]
    async fn test_reembeds_only_changed_articles() {
        let temp = TempDir::new().unwrap();
        let (provider, builder) = builder(temp.path());

        let report = builder
            .build(vec![sample("kb-001", "Reset via portal."), sample("kb-002", "Install VPN.")])
            .await
            .unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.embedded, 2);

        let report = builder
            .build(vec![
                sample("kb-001", "Reset via portal."),
                sample("kb-002", "Install the new VPN client."),
            ])
            .await
            .unwrap();
        assert_eq!(report.embedded, 1);
        assert_eq!(report.reused, 1);
        assert_eq!(provider.embedded.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_built_index_opens() {
        let temp = TempDir::new().unwrap();
        let (_, builder) = builder(temp.path());
        builder
            .build(vec![sample("kb-001", "Reset via portal."), sample("kb-002", "Install VPN.")])
            .await
            .unwrap();
        builder.build(vec![sample("kb-003", "Printer drivers.")]).await.unwrap();

        let index = LocalIndex::open(temp.path(), 2, HnswParams::default()).unwrap();
        assert_eq!(index.len(), 3);
        let hits = index.lexical_query("printer", 5, None).await.unwrap();
        assert_eq!(hits[0].0, "kb-003");
    }

    #[tokio::test]
    async fn test_rejects_article_without_id() {
        let temp = TempDir::new().unwrap();
        let (_, builder) = builder(temp.path());
        let result = builder.build(vec![sample("", "content")]).await;
        assert!(matches!(result, Err(KbError::InvalidInput(_))));
    }

    #[test]
    fn test_load_single_and_array_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("a.json"),
            r#"{"id":"kb-001","title":"A","content":"x","category":"IT","last_updated":"2024-01-01"}"#,
        )
        .unwrap();
        std::fs::write(
            temp.path().join("b.json"),
            r#"[{"id":"kb-002","title":"B","content":"y","category":"HR","lastUpdated":"2024-02-01T00:00:00Z"}]"#,
        )
        .unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let articles = load_articles(&[temp.path().to_path_buf()]).unwrap();
        let ids: Vec<_> = articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["kb-001", "kb-002"]);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}

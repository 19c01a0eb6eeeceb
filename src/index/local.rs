/// Local reference index: JSON article store + tantivy + HNSW
use super::{
    lexical_dir, HnswParams, IndexError, IndexStorage, KeywordIndex, VectorEntry, VectorIndex,
};
use crate::config::IndexConfig;
use crate::types::{Article, ArticleId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Articles persisted as one JSON document inside the data directory
pub struct ArticleStore {
    path: PathBuf,
}

impl ArticleStore {
    pub const FILE_NAME: &'static str = "articles.json";

    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load all articles; a missing store is empty
    pub fn load(&self) -> Result<Vec<Article>, IndexError> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            IndexError::Storage(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            IndexError::Storage(format!("Corrupt article store {}: {}", self.path.display(), e))
        })
    }

    /// Replace the store atomically
    pub fn save(&self, articles: &[Article]) -> Result<(), IndexError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IndexError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string(articles)
            .map_err(|e| IndexError::Storage(format!("Failed to encode articles: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| {
            IndexError::Storage(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            IndexError::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })
    }
}

/// In-process implementation of [`IndexStorage`]
///
/// Everything is read-only after construction, so concurrent queries share
/// it through an `Arc` without locking.
pub struct LocalIndex {
    articles: Arc<HashMap<ArticleId, Arc<Article>>>,
    keyword: Arc<KeywordIndex>,
    vector: Arc<VectorIndex>,
}

impl LocalIndex {
    /// Open the index written by [`super::IndexBuilder`] in `data_dir`
    ///
    /// The HNSW graph is rebuilt from stored embeddings. Articles whose
    /// embedding is missing or has the wrong dimension are still searchable
    /// lexically.
    pub fn open(data_dir: &Path, dimension: usize, params: HnswParams) -> Result<Self, IndexError> {
        let store = ArticleStore::new(data_dir);
        if !store.exists() {
            return Err(IndexError::Storage(format!(
                "No article store at {}; run `kbground index` first",
                store.path().display()
            )));
        }
        let articles = store.load()?;
        let keyword = KeywordIndex::open_read_only(&lexical_dir(data_dir))?;
        let index = Self::assemble(articles, keyword, dimension, params)?;

        info!(
            "Opened local index at {} ({} articles, {} vectors)",
            data_dir.display(),
            index.articles.len(),
            index.vector.len()
        );
        Ok(index)
    }

    /// Open using the `[index]` config section
    pub fn open_with_config(
        data_dir: &Path,
        config: &IndexConfig,
        dimension: usize,
    ) -> Result<Self, IndexError> {
        Self::open(data_dir, dimension, hnsw_params(config))
    }

    /// Build a fully in-memory index from already-embedded articles
    pub fn from_articles(
        articles: Vec<Article>,
        dimension: usize,
        params: HnswParams,
    ) -> Result<Self, IndexError> {
        let mut keyword = KeywordIndex::in_memory()?;
        for article in &articles {
            keyword.upsert(article)?;
        }
        keyword.commit()?;
        Self::assemble(articles, keyword.into_read_only(), dimension, params)
    }

    fn assemble(
        articles: Vec<Article>,
        keyword: KeywordIndex,
        dimension: usize,
        params: HnswParams,
    ) -> Result<Self, IndexError> {
        let mut entries = Vec::with_capacity(articles.len());
        let mut by_id = HashMap::with_capacity(articles.len());

        for article in articles {
            if article.embedding.len() == dimension {
                entries.push(VectorEntry {
                    id: article.id.clone(),
                    category: article.category.clone(),
                    vector: article.embedding.clone(),
                });
            } else {
                warn!(
                    "Article {} has no usable embedding ({} dims, expected {}); lexical only",
                    article.id,
                    article.embedding.len(),
                    dimension
                );
            }
            if by_id.insert(article.id.clone(), Arc::new(article)).is_some() {
                return Err(IndexError::Storage(
                    "Duplicate article id in store".to_string(),
                ));
            }
        }

        let vector = VectorIndex::build(dimension, params, entries)?;

        Ok(Self {
            articles: Arc::new(by_id),
            keyword: Arc::new(keyword),
            vector: Arc::new(vector),
        })
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}

pub(crate) fn hnsw_params(config: &IndexConfig) -> HnswParams {
    HnswParams {
        m: config.hnsw_m,
        ef_construction: config.hnsw_ef_construction,
        ef_search: config.hnsw_ef_search,
    }
}

fn join_error(e: tokio::task::JoinError) -> IndexError {
    IndexError::Storage(format!("Index task failed: {}", e))
}

#[async_trait]
impl IndexStorage for LocalIndex {
    async fn vector_query(
        &self,
        vector: &[f32],
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<(ArticleId, f32)>, IndexError> {
        if vector.len() != self.vector.dimension() {
            return Err(IndexError::InvalidQuery(format!(
                "Query vector has {} dimensions, index expects {}",
                vector.len(),
                self.vector.dimension()
            )));
        }

        let index = Arc::clone(&self.vector);
        let query = vector.to_vec();
        let category = category.map(str::to_string);
        tokio::task::spawn_blocking(move || index.search(&query, limit, category.as_deref()))
            .await
            .map_err(join_error)
    }

    async fn lexical_query(
        &self,
        text: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<(ArticleId, f32)>, IndexError> {
        let index = Arc::clone(&self.keyword);
        let text = text.to_string();
        let category = category.map(str::to_string);
        let hits = tokio::task::spawn_blocking(move || {
            index.search(&text, limit, category.as_deref())
        })
        .await
        .map_err(join_error)??;
        Ok(hits)
    }

    async fn fetch_articles(&self, ids: &[ArticleId]) -> Result<Vec<Arc<Article>>, IndexError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.articles.get(id).cloned())
            .collect())
    }
}

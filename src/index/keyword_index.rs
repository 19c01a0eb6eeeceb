/// Tantivy keyword index over article titles and bodies
use crate::types::{Article, ArticleId};
use std::path::{Path, PathBuf};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Index opened read-only")]
    ReadOnly,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),
}

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    title: Field,
    content: Field,
    category: Field,
}

impl Fields {
    fn from_schema(schema: &Schema) -> Result<Self, KeywordIndexError> {
        let get = |name: &str| {
            schema.get_field(name).map_err(|_| {
                KeywordIndexError::InitializationError(format!(
                    "Missing '{}' field in schema",
                    name
                ))
            })
        };
        Ok(Self {
            id: get("id")?,
            title: get("title")?,
            content: get("content")?,
            category: get("category")?,
        })
    }
}

/// Tantivy keyword index wrapper
///
/// BM25 ranking over `title` (boosted) and `content`. `category` is an
/// untokenized field so the category filter is an exact term match inside
/// the same query.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: Option<IndexWriter>,
    fields: Fields,
}

impl KeywordIndex {
    fn schema() -> Schema {
        let mut schema_builder = Schema::builder();
        schema_builder.add_text_field("id", STRING | STORED);
        schema_builder.add_text_field("title", TEXT | STORED);
        schema_builder.add_text_field("content", TEXT);
        schema_builder.add_text_field("category", STRING | STORED);
        schema_builder.build()
    }

    /// Open an existing index for writing, or create it
    pub fn open_or_create(index_path: &Path) -> Result<Self, KeywordIndexError> {
        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(index_path)
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        } else {
            std::fs::create_dir_all(index_path)?;
            Index::create_in_dir(index_path, Self::schema())
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        };
        Self::with_writer(index)
    }

    /// Open an existing index for searching only
    pub fn open_read_only(index_path: &Path) -> Result<Self, KeywordIndexError> {
        if !index_path.join("meta.json").exists() {
            return Err(KeywordIndexError::IndexNotFound(
                index_path.display().to_string(),
            ));
        }
        let index = Index::open_in_dir(index_path)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;
        Self::from_index(index, None)
    }

    /// Writable index held entirely in memory
    pub fn in_memory() -> Result<Self, KeywordIndexError> {
        Self::with_writer(Index::create_in_ram(Self::schema()))
    }

    fn with_writer(index: Index) -> Result<Self, KeywordIndexError> {
        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;
        Self::from_index(index, Some(writer))
    }

    fn from_index(index: Index, writer: Option<IndexWriter>) -> Result<Self, KeywordIndexError> {
        let fields = Fields::from_schema(&index.schema())?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer,
            fields,
        })
    }

    /// Release the writer (and its directory lock), keeping the reader
    pub fn into_read_only(mut self) -> Self {
        self.writer = None;
        self
    }

    fn writer(&mut self) -> Result<&mut IndexWriter, KeywordIndexError> {
        self.writer.as_mut().ok_or(KeywordIndexError::ReadOnly)
    }

    /// Insert or replace an article
    pub fn upsert(&mut self, article: &Article) -> Result<(), KeywordIndexError> {
        let fields = self.fields;
        let writer = self.writer()?;
        writer.delete_term(Term::from_field_text(fields.id, &article.id));
        writer
            .add_document(doc!(
                fields.id => article.id.as_str(),
                fields.title => article.title.as_str(),
                fields.content => article.content.as_str(),
                fields.category => article.category.as_str(),
            ))
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        Ok(())
    }

    /// Delete an article by ID
    pub fn delete(&mut self, id: &str) -> Result<(), KeywordIndexError> {
        let term = Term::from_field_text(self.fields.id, id);
        self.writer()?.delete_term(term);
        Ok(())
    }

    /// Remove every document
    pub fn clear(&mut self) -> Result<(), KeywordIndexError> {
        self.writer()?
            .delete_all_documents()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        Ok(())
    }

    /// Commit all pending changes and make them searchable
    pub fn commit(&mut self) -> Result<(), KeywordIndexError> {
        self.writer()?
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        Ok(())
    }

    /// Search titles and bodies, optionally restricted to one category
    ///
    /// Query syntax errors are tolerated; whatever parses is searched.
    /// Returns `(article id, bm25 score)` sorted by score descending.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<(ArticleId, f32)>, KeywordIndexError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut query_parser =
            QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.content]);
        query_parser.set_field_boost(self.fields.title, 2.0);
        let (text_query, _errors) = query_parser.parse_query_lenient(query);

        let query: Box<dyn Query> = match category {
            Some(category) => {
                let category_term = Term::from_field_text(self.fields.category, category);
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, text_query),
                    (
                        Occur::Must,
                        Box::new(TermQuery::new(category_term, IndexRecordOption::Basic)),
                    ),
                ]))
            }
            None => text_query,
        };

        let searcher = self.reader.searcher();
        let limit = limit.min(searcher.num_docs() as usize);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let id = retrieved
                .get_first(self.fields.id)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid ID field".to_string())
                })?;

            results.push((id.to_string(), score));
        }

        Ok(results)
    }

    /// Get the number of documents in the index
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Location of the lexical index inside a data directory
pub fn lexical_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("lexical")
}

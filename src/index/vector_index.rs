/// HNSW vector index for similarity search
use crate::types::ArticleId;
use hnsw_rs::filter::FilterT;
use hnsw_rs::prelude::*;
use std::collections::HashMap;
use thiserror::Error;

/// Upper bound on HNSW layers
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension for {id}: expected {expected}, got {actual}")]
    InvalidDimension {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate article id: {0}")]
    DuplicateId(String),
}

/// HNSW construction and search parameters
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Number of connections per layer (M)
    pub m: usize,
    /// Construction beam width (higher = better recall, slower build)
    pub ef_construction: usize,
    /// Search beam width
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// One vector to index
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: ArticleId,
    pub category: String,
    pub vector: Vec<f32>,
}

/// Immutable HNSW index over article embeddings
///
/// Built in one pass at open time and read-only afterwards. HNSW data ids
/// are positions in `ids`; each category keeps a sorted list of those
/// positions so a category filter is applied inside the graph walk.
pub struct VectorIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    ids: Vec<ArticleId>,
    by_category: HashMap<String, Vec<usize>>,
    dimension: usize,
    ef_search: usize,
}

impl VectorIndex {
    pub fn build(
        dimension: usize,
        params: HnswParams,
        entries: Vec<VectorEntry>,
    ) -> Result<Self, VectorIndexError> {
        let hnsw = Hnsw::<f32, DistCosine>::new(
            params.m,
            entries.len().max(1),
            MAX_LAYERS,
            params.ef_construction,
            DistCosine {},
        );

        let mut ids = Vec::with_capacity(entries.len());
        let mut by_category: HashMap<String, Vec<usize>> = HashMap::new();
        let mut seen = std::collections::HashSet::with_capacity(entries.len());

        for (data_id, entry) in entries.into_iter().enumerate() {
            if entry.vector.len() != dimension {
                return Err(VectorIndexError::InvalidDimension {
                    id: entry.id,
                    expected: dimension,
                    actual: entry.vector.len(),
                });
            }
            if !seen.insert(entry.id.clone()) {
                return Err(VectorIndexError::DuplicateId(entry.id));
            }

            hnsw.insert((entry.vector.as_slice(), data_id));
            by_category.entry(entry.category).or_default().push(data_id);
            ids.push(entry.id);
        }

        Ok(Self {
            hnsw,
            ids,
            by_category,
            dimension,
            ef_search: params.ef_search,
        })
    }

    /// k nearest articles by cosine similarity, optionally within one category
    ///
    /// Returns `(article id, similarity)` sorted by similarity descending.
    /// A query vector of the wrong dimension yields no hits.
    pub fn search(&self, query: &[f32], k: usize, category: Option<&str>) -> Vec<(ArticleId, f32)> {
        if k == 0 || self.ids.is_empty() || query.len() != self.dimension {
            return Vec::new();
        }

        let k = k.min(self.ids.len());
        let ef = self.ef_search.max(k);
        let neighbours = match category {
            Some(category) => match self.by_category.get(category) {
                Some(allowed) => {
                    let filter: &dyn FilterT = allowed;
                    self.hnsw.search_filter(query, k, ef, Some(filter))
                }
                None => return Vec::new(),
            },
            None => self.hnsw.search(query, k, ef),
        };

        neighbours
            .into_iter()
            .filter_map(|n| {
                self.ids
                    .get(n.d_id)
                    .map(|id| (id.clone(), 1.0 - n.distance))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

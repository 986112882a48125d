use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use maintdb_core::traits::{Embedder, RecordStore};
use maintdb_core::types::SearchResult;

pub const TOP_K: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchErrorKind {
    Embedding,
    Store,
    DimensionMismatch,
    EmbedderChanged,
}

impl fmt::Display for SearchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchErrorKind::Embedding => "embedding failed",
            SearchErrorKind::Store => "record store failed",
            SearchErrorKind::DimensionMismatch => "dimension mismatch",
            SearchErrorKind::EmbedderChanged => "embedder changed",
        })
    }
}

/// Structured failure of a semantic search; rendered to text only by `search_text`.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct SearchError {
    pub kind: SearchErrorKind,
    pub message: String,
}

impl SearchError {
    fn new(kind: SearchErrorKind, err: impl fmt::Display) -> Self {
        Self { kind, message: format!("{err:#}") }
    }
}

/// Top-k cosine search over documents with a present embedding.
pub struct SemanticSearch {
    store: Arc<dyn RecordStore>,
    embedder: Arc<dyn Embedder>,
    limit: usize,
}

impl SemanticSearch {
    pub fn new(store: Arc<dyn RecordStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder, limit: TOP_K }
    }

    /// Results sorted by descending similarity, at most five. An empty query,
    /// or one the embedder maps to the zero vector, yields no results.
    pub fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.check_embedder()?;

        let vector = self.embedder.embed(query).map_err(|e| SearchError::new(SearchErrorKind::Embedding, e))?;
        let expected = self.store.embedding_dim();
        if vector.len() != expected {
            return Err(SearchError::new(
                SearchErrorKind::DimensionMismatch,
                format!("query vector has {} dimensions, stored vectors have {}", vector.len(), expected),
            ));
        }
        if vector.iter().all(|x| *x == 0.0) {
            return Ok(Vec::new());
        }

        let hits = self.store.nearest(&vector, self.limit).map_err(|e| SearchError::new(SearchErrorKind::Store, e))?;
        let mut results: Vec<SearchResult> = hits.into_iter().map(SearchResult::from_hit).collect();
        // sort_by is stable, so ties keep the store's retrieval order.
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(self.limit);
        tracing::debug!(query, n = results.len(), "semantic search");
        Ok(results)
    }

    /// Human-facing variant: failures become a readable message instead of an error.
    pub fn search_text(&self, query: &str) -> String {
        match self.search(query) {
            Ok(results) => render_results(&results),
            Err(e) => {
                tracing::warn!(kind = %e.kind, error = %e.message, "semantic search failed");
                format!("Error in semantic search: {e}")
            }
        }
    }

    fn check_embedder(&self) -> Result<(), SearchError> {
        let stamp = self.store.embedder_stamp().map_err(|e| SearchError::new(SearchErrorKind::Store, e))?;
        match stamp {
            Some(stored) if stored != self.embedder.embedder_id() => Err(SearchError::new(
                SearchErrorKind::EmbedderChanged,
                format!(
                    "stored vectors come from '{}' but queries are embedded with '{}'; run `maintdb clear` and `maintdb backfill`",
                    stored,
                    self.embedder.embedder_id()
                ),
            )),
            _ => Ok(()),
        }
    }
}

pub fn render_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found for your query.".to_string();
    }
    let mut out = format!("Found {} results:\n", results.len());
    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, r));
    }
    out
}

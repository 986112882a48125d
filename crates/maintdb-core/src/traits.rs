use crate::filter::StructuredQuery;
use crate::types::{Document, EmbeddingCounts, NeighborHit, NewDocument, RecordId};

/// Text → fixed-length vector. Deterministic for identical input.
pub trait Embedder: Send + Sync {
    /// Stable identifier of the model that produced the vectors (e.g. `local:all-MiniLM-L6-v2:d384`).
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))
    }
}

/// Query surface of the persisted document collection.
pub trait RecordStore: Send + Sync {
    /// Dimensionality of the store's embedding column.
    fn embedding_dim(&self) -> usize;
    /// Name the structured-query tools expose for the document collection.
    fn table_name(&self) -> &str;

    fn get(&self, id: RecordId) -> anyhow::Result<Option<Document>>;
    fn insert(&self, docs: Vec<NewDocument>) -> anyhow::Result<Vec<RecordId>>;
    /// Every document whose embedding is absent, in store order.
    fn scan_missing_embeddings(&self) -> anyhow::Result<Vec<Document>>;
    /// Open a write scope for embedding updates produced by `embedder_id`.
    fn begin(&self, embedder_id: &str) -> anyhow::Result<Box<dyn StoreTransaction + '_>>;
    /// Nearest documents with a present embedding, ascending cosine distance.
    fn nearest(&self, query: &[f32], limit: usize) -> anyhow::Result<Vec<NeighborHit>>;
    /// Reset every embedding to absent; returns how many were cleared.
    fn clear_embeddings(&self) -> anyhow::Result<usize>;
    fn counts(&self) -> anyhow::Result<EmbeddingCounts>;
    fn sample(&self, limit: usize) -> anyhow::Result<Vec<Document>>;
    fn query(&self, query: &StructuredQuery) -> anyhow::Result<QueryOutput>;
    /// Identifier of the embedder whose vectors are currently stored, if any.
    fn embedder_stamp(&self) -> anyhow::Result<Option<String>>;
}

/// All-or-nothing scope for embedding writes.
///
/// Nothing staged is visible until `commit`. Dropping without `commit`
/// discards the staged writes.
pub trait StoreTransaction {
    fn set_embedding(&mut self, id: RecordId, embedding: Vec<f32>) -> anyhow::Result<()>;
    fn commit(self: Box<Self>) -> anyhow::Result<usize>;
    fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Document>),
    Count(usize),
}

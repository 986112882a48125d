//! In-process `RecordStore` with the same transactional contract as the
//! LanceDB store. Used by tests and for small local experiments.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use crate::error::ensure_dim;
use crate::filter::{Projection, StructuredQuery};
use crate::traits::{QueryOutput, RecordStore, StoreTransaction};
use crate::types::{Document, EmbeddingCounts, NeighborHit, NewDocument, RecordId};

#[derive(Default)]
struct State {
    docs: Vec<Document>,
    stamp: Option<String>,
}

pub struct MemoryStore {
    table: String,
    dim: usize,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(table: &str, dim: usize) -> Self {
        Self { table: table.to_string(), dim, state: Mutex::new(State::default()) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl RecordStore for MemoryStore {
    fn embedding_dim(&self) -> usize { self.dim }

    fn table_name(&self) -> &str { &self.table }

    fn get(&self, id: RecordId) -> Result<Option<Document>> {
        Ok(self.lock()?.docs.iter().find(|d| d.id == id).cloned())
    }

    fn insert(&self, docs: Vec<NewDocument>) -> Result<Vec<RecordId>> {
        let mut state = self.lock()?;
        let mut next = state.docs.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            state.docs.push(doc.into_document(next));
            ids.push(next);
            next += 1;
        }
        Ok(ids)
    }

    fn scan_missing_embeddings(&self) -> Result<Vec<Document>> {
        Ok(self.lock()?.docs.iter().filter(|d| !d.has_embedding()).cloned().collect())
    }

    fn begin(&self, embedder_id: &str) -> Result<Box<dyn StoreTransaction + '_>> {
        Ok(Box::new(MemoryTransaction { store: self, embedder_id: embedder_id.to_string(), staged: Vec::new() }))
    }

    fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<NeighborHit>> {
        ensure_dim(self.dim, query.len())?;
        let state = self.lock()?;
        let mut hits: Vec<NeighborHit> = state
            .docs
            .iter()
            .filter_map(|d| {
                let v = d.embedding.as_ref()?;
                Some(NeighborHit { document: d.clone(), distance: cosine_distance(query, v) })
            })
            .collect();
        // Stable: equal distances keep store order.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    fn clear_embeddings(&self) -> Result<usize> {
        let mut state = self.lock()?;
        let mut cleared = 0;
        for doc in state.docs.iter_mut() {
            if doc.embedding.take().is_some() {
                cleared += 1;
            }
        }
        state.stamp = None;
        Ok(cleared)
    }

    fn counts(&self) -> Result<EmbeddingCounts> {
        let state = self.lock()?;
        let with = state.docs.iter().filter(|d| d.has_embedding()).count();
        Ok(EmbeddingCounts::new(state.docs.len(), with))
    }

    fn sample(&self, limit: usize) -> Result<Vec<Document>> {
        Ok(self.lock()?.docs.iter().take(limit).cloned().collect())
    }

    fn query(&self, query: &StructuredQuery) -> Result<QueryOutput> {
        let state = self.lock()?;
        let matching = state.docs.iter().filter(|d| query.predicate.as_ref().map_or(true, |p| p.matches(d)));
        Ok(match query.projection {
            Projection::Count => QueryOutput::Count(matching.count()),
            Projection::Rows => QueryOutput::Rows(matching.take(query.limit).cloned().collect()),
        })
    }

    fn embedder_stamp(&self) -> Result<Option<String>> {
        Ok(self.lock()?.stamp.clone())
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    embedder_id: String,
    staged: Vec<(RecordId, Vec<f32>)>,
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn set_embedding(&mut self, id: RecordId, embedding: Vec<f32>) -> Result<()> {
        ensure_dim(self.store.dim, embedding.len())?;
        self.staged.push((id, embedding));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<usize> {
        let MemoryTransaction { store, embedder_id, staged } = *self;
        let mut state = store.lock()?;
        // Validate every target first so a missing id leaves the store untouched.
        for (id, _) in &staged {
            if !state.docs.iter().any(|d| d.id == *id) {
                return Err(anyhow!("cannot commit embedding for unknown record id {id}"));
            }
        }
        let mut written = HashSet::new();
        for (id, embedding) in staged {
            if let Some(doc) = state.docs.iter_mut().find(|d| d.id == id) {
                doc.embedding = Some(embedding);
                written.insert(id);
            }
        }
        let n = written.len();
        if n > 0 {
            state.stamp = Some(embedder_id);
        }
        Ok(n)
    }

    fn rollback(self: Box<Self>) -> Result<()> { Ok(()) }
}

/// `1 - cos(a, b)`; zero vectors are treated as maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_doc(add: &str) -> NewDocument {
        NewDocument { add_number: add.into(), aircraft_registration: "N1".into(), discrepancy: Some(add.into()), ..Default::default() }
    }

    #[test]
    fn dropped_transaction_persists_nothing() {
        let store = MemoryStore::new("documents", 2);
        let ids = store.insert(vec![new_doc("A"), new_doc("B")]).expect("insert");
        {
            let mut tx = store.begin("test").expect("begin");
            tx.set_embedding(ids[0], vec![1.0, 0.0]).expect("stage");
        }
        assert_eq!(store.counts().expect("counts").with_embedding, 0);
        assert_eq!(store.embedder_stamp().expect("stamp"), None);
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let store = MemoryStore::new("documents", 2);
        let ids = store.insert(vec![new_doc("A")]).expect("insert");
        let mut tx = store.begin("test").expect("begin");
        tx.set_embedding(ids[0], vec![1.0, 0.0]).expect("stage");
        tx.set_embedding(999, vec![0.0, 1.0]).expect("stage");
        assert!(tx.commit().is_err());
        assert_eq!(store.counts().expect("counts").with_embedding, 0);
    }

    #[test]
    fn commit_counts_distinct_records_and_keeps_last_write() {
        let store = MemoryStore::new("documents", 2);
        let ids = store.insert(vec![new_doc("A")]).expect("insert");
        let mut tx = store.begin("test").expect("begin");
        tx.set_embedding(ids[0], vec![1.0, 0.0]).expect("stage");
        tx.set_embedding(ids[0], vec![0.0, 1.0]).expect("stage");
        assert_eq!(tx.commit().expect("commit"), 1);
        let doc = store.get(ids[0]).expect("get").expect("present");
        assert_eq!(doc.embedding, Some(vec![0.0, 1.0]));
    }

    #[test]
    fn staging_rejects_wrong_dimension() {
        let store = MemoryStore::new("documents", 3);
        let mut tx = store.begin("test").expect("begin");
        assert!(tx.set_embedding(1, vec![1.0]).is_err());
    }

    #[test]
    fn nearest_orders_by_distance_and_skips_absent() {
        let store = MemoryStore::new("documents", 2);
        let ids = store.insert(vec![new_doc("A"), new_doc("B"), new_doc("C")]).expect("insert");
        let mut tx = store.begin("test").expect("begin");
        tx.set_embedding(ids[0], vec![0.0, 1.0]).expect("stage");
        tx.set_embedding(ids[1], vec![1.0, 0.1]).expect("stage");
        assert_eq!(tx.commit().expect("commit"), 2);
        let hits = store.nearest(&[1.0, 0.0], 5).expect("nearest");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.add_number, "B");
        assert!(hits[0].distance <= hits[1].distance);
        assert!(store.nearest(&[1.0], 5).is_err());
    }

    #[test]
    fn clear_resets_embeddings_and_stamp() {
        let store = MemoryStore::new("documents", 2);
        let ids = store.insert(vec![new_doc("A")]).expect("insert");
        let mut tx = store.begin("test").expect("begin");
        tx.set_embedding(ids[0], vec![0.5, 0.5]).expect("stage");
        tx.commit().expect("commit");
        assert_eq!(store.embedder_stamp().expect("stamp").as_deref(), Some("test"));
        assert_eq!(store.clear_embeddings().expect("clear"), 1);
        assert_eq!(store.counts().expect("counts").with_embedding, 0);
        assert_eq!(store.embedder_stamp().expect("stamp"), None);
    }
}

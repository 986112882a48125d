//! `RecordStore` over a LanceDB documents table.
//!
//! The `RecordStore` surface is synchronous; each call is driven on a private
//! tokio runtime and bounded by `store.timeout_secs`. Embedding writes are
//! staged in memory and land as a single merge_insert, i.e. one table version.
use anyhow::{anyhow, Result};
use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use maintdb_core::config::StoreSettings;
use maintdb_core::error::{ensure_dim, Error};
use maintdb_core::filter::{Predicate, Projection, StructuredQuery};
use maintdb_core::traits::{QueryOutput, RecordStore, StoreTransaction};
use maintdb_core::types::{Document, EmbeddingCounts, NeighborHit, NewDocument, RecordId};

use crate::schema::{build_documents_schema, build_embedding_update_schema, embedding_dim_of, EMBEDDING_COLUMN};
use crate::table::{delete_meta, embedder_key, ensure_table, get_meta, open_db, set_meta};

pub struct LanceRecordStore {
    rt: Runtime,
    conn: Connection,
    table: String,
    meta_table: String,
    dim: usize,
    timeout_secs: u64,
}

impl LanceRecordStore {
    /// Connect, create the documents table if missing, and check that an
    /// existing table's vector column has `dim` dimensions.
    pub fn open(settings: &StoreSettings, dim: usize) -> Result<Self> {
        let rt = Runtime::new()?;
        let uri = settings.resolved_uri();
        let uri = uri.to_string_lossy().to_string();
        if !uri.contains("://") {
            std::fs::create_dir_all(&uri)?;
        }
        let conn = rt.block_on(open_db(&uri))?;
        let store = Self {
            rt,
            conn,
            table: settings.table.clone(),
            meta_table: settings.meta_table.clone(),
            dim,
            timeout_secs: settings.timeout_secs,
        };
        store.block(store.ensure_documents())?;
        tracing::info!(uri = %uri, table = %store.table, dim, "opened record store");
        Ok(store)
    }

    fn block<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = Duration::from_secs(self.timeout_secs);
        self.rt.block_on(async {
            match tokio::time::timeout(limit, fut).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(self.timeout_secs).into()),
            }
        })
    }

    async fn docs(&self) -> Result<Table> {
        Ok(self.conn.open_table(&self.table).execute().await?)
    }

    async fn ensure_documents(&self) -> Result<()> {
        ensure_table(&self.conn, &self.table, build_documents_schema(self.dim)).await?;
        let schema = self.docs().await?.schema().await?;
        let found = embedding_dim_of(&schema)
            .ok_or_else(|| anyhow!("table '{}' has no '{}' vector column", self.table, EMBEDDING_COLUMN))?;
        ensure_dim(self.dim, found)?;
        Ok(())
    }

    async fn max_id(&self, t: &Table) -> Result<RecordId> {
        let mut stream = t.query().select(Select::columns(&["id"])).execute().await?;
        let mut max = 0;
        while let Some(batch) = stream.try_next().await? {
            for id in int64_col(&batch, "id")?.iter().flatten() {
                max = max.max(id);
            }
        }
        Ok(max)
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        let version = self.docs().await?.version().await?;
        let stamp = get_meta(&self.conn, &self.meta_table, &embedder_key(&self.table)).await?;
        Ok(Snapshot { version, stamp })
    }

    /// Put the documents table and the embedder stamp back to `snap`.
    async fn restore(&self, snap: &Snapshot) -> Result<()> {
        let t = self.docs().await?;
        if t.version().await? != snap.version {
            t.checkout(snap.version).await?;
            t.restore().await?;
        }
        let key = embedder_key(&self.table);
        match &snap.stamp {
            Some(stamp) => set_meta(&self.conn, &self.meta_table, &key, stamp).await,
            None => delete_meta(&self.conn, &self.meta_table, &key).await,
        }
    }

    /// Writes the staged vectors and the stamp. Returns the number of distinct records updated.
    async fn apply_embeddings(&self, embedder_id: &str, staged: Vec<(RecordId, Vec<f32>)>) -> Result<usize> {
        let t = self.docs().await?;
        // Last write per id wins, as with sequential updates.
        let mut order = Vec::new();
        let mut latest: HashMap<RecordId, Vec<f32>> = HashMap::new();
        for (id, v) in staged {
            if latest.insert(id, v).is_none() {
                order.push(id);
            }
        }
        let n = order.len();

        let id_list = order.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
        let found = t.count_rows(Some(format!("id IN ({id_list})"))).await?;
        if found != n {
            return Err(anyhow!("cannot commit embeddings: {} of {} target records do not exist", n - found, n));
        }

        let schema = build_embedding_update_schema(self.dim);
        let mut ids = Vec::with_capacity(n);
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(n);
        for id in order {
            let v = latest.remove(&id).unwrap_or_default();
            ids.push(id);
            vectors.push(Some(v.into_iter().map(Some).collect()));
        }
        let rb = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, self.dim as i32)),
            ],
        )?;
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));
        let mut mi = t.merge_insert(&["id"]);
        mi.when_matched_update_all(None);
        mi.execute(reader).await?;

        set_meta(&self.conn, &self.meta_table, &embedder_key(&self.table), embedder_id)
            .await
            .map_err(|e| e.context("failed to record embedder stamp"))?;
        Ok(n)
    }
}

impl RecordStore for LanceRecordStore {
    fn embedding_dim(&self) -> usize { self.dim }

    fn table_name(&self) -> &str { &self.table }

    fn get(&self, id: RecordId) -> Result<Option<Document>> {
        self.block(async {
            let t = self.docs().await?;
            let stream = t.query().only_if(format!("id = {id}")).limit(1).execute().await?;
            Ok(collect_documents(stream).await?.into_iter().next())
        })
    }

    fn insert(&self, docs: Vec<NewDocument>) -> Result<Vec<RecordId>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        self.block(async {
            let t = self.docs().await?;
            let first = self.max_id(&t).await? + 1;
            let docs: Vec<Document> = docs.into_iter().zip(first..).map(|(d, id)| d.into_document(id)).collect();
            let ids: Vec<RecordId> = docs.iter().map(|d| d.id).collect();
            let schema = build_documents_schema(self.dim);
            let rb = documents_to_batch(&docs, schema.clone(), self.dim)?;
            let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));
            t.add(reader).execute().await?;
            tracing::info!(n = docs.len(), table = %self.table, "inserted documents");
            Ok(ids)
        })
    }

    fn scan_missing_embeddings(&self) -> Result<Vec<Document>> {
        self.block(async {
            let t = self.docs().await?;
            let stream = t.query().only_if(format!("{EMBEDDING_COLUMN} IS NULL")).execute().await?;
            collect_documents(stream).await
        })
    }

    fn begin(&self, embedder_id: &str) -> Result<Box<dyn StoreTransaction + '_>> {
        Ok(Box::new(LanceTransaction { store: self, embedder_id: embedder_id.to_string(), staged: Vec::new() }))
    }

    fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<NeighborHit>> {
        ensure_dim(self.dim, query.len())?;
        self.block(async {
            let t = self.docs().await?;
            let with = t.count_rows(Some(format!("{EMBEDDING_COLUMN} IS NOT NULL"))).await?;
            if with == 0 || limit == 0 {
                return Ok(Vec::new());
            }
            let stream = t
                .vector_search(query.to_vec())?
                .column(EMBEDDING_COLUMN)
                .distance_type(DistanceType::Cosine)
                .only_if(format!("{EMBEDDING_COLUMN} IS NOT NULL"))
                .limit(limit)
                .execute()
                .await?;
            let batches: Vec<RecordBatch> = stream.try_collect().await?;
            let mut hits = Vec::new();
            for batch in &batches {
                let distances = batch
                    .column_by_name("_distance")
                    .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                    .ok_or_else(|| anyhow!("vector search returned no _distance column"))?;
                for (i, document) in documents_from_batch(batch)?.into_iter().enumerate() {
                    hits.push(NeighborHit { document, distance: distances.value(i) });
                }
            }
            hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            hits.truncate(limit);
            Ok(hits)
        })
    }

    fn clear_embeddings(&self) -> Result<usize> {
        let n = self.block(async {
            let t = self.docs().await?;
            let filter = format!("{EMBEDDING_COLUMN} IS NOT NULL");
            let n = t.count_rows(Some(filter.clone())).await?;
            if n > 0 {
                t.update().only_if(filter).column(EMBEDDING_COLUMN, "NULL").execute().await?;
            }
            Ok(n)
        })?;
        // Vectors are gone at this point; a stamp left behind is tolerated by backfill.
        self.block(delete_meta(&self.conn, &self.meta_table, &embedder_key(&self.table)))
            .map_err(|e| e.context("embeddings cleared but the embedder stamp was not removed"))?;
        tracing::info!(cleared = n, table = %self.table, "cleared embeddings");
        Ok(n)
    }

    fn counts(&self) -> Result<EmbeddingCounts> {
        self.block(async {
            let t = self.docs().await?;
            let total = t.count_rows(None).await?;
            let with = t.count_rows(Some(format!("{EMBEDDING_COLUMN} IS NOT NULL"))).await?;
            Ok(EmbeddingCounts::new(total, with))
        })
    }

    fn sample(&self, limit: usize) -> Result<Vec<Document>> {
        self.block(async {
            let t = self.docs().await?;
            let stream = t.query().limit(limit).execute().await?;
            collect_documents(stream).await
        })
    }

    fn query(&self, query: &StructuredQuery) -> Result<QueryOutput> {
        let filter = query.predicate.as_ref().map(Predicate::to_sql);
        self.block(async {
            let t = self.docs().await?;
            match query.projection {
                Projection::Count => Ok(QueryOutput::Count(t.count_rows(filter).await?)),
                Projection::Rows => {
                    let mut q = t.query().limit(query.limit);
                    if let Some(f) = filter {
                        q = q.only_if(f);
                    }
                    let stream = q.execute().await?;
                    Ok(QueryOutput::Rows(collect_documents(stream).await?))
                }
            }
        })
    }

    fn embedder_stamp(&self) -> Result<Option<String>> {
        self.block(get_meta(&self.conn, &self.meta_table, &embedder_key(&self.table)))
    }
}

/// Table version and embedder stamp captured before an embedding write.
struct Snapshot {
    version: u64,
    stamp: Option<String>,
}

pub struct LanceTransaction<'a> {
    store: &'a LanceRecordStore,
    embedder_id: String,
    staged: Vec<(RecordId, Vec<f32>)>,
}

impl StoreTransaction for LanceTransaction<'_> {
    fn set_embedding(&mut self, id: RecordId, embedding: Vec<f32>) -> Result<()> {
        ensure_dim(self.store.dim, embedding.len())?;
        self.staged.push((id, embedding));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<usize> {
        let LanceTransaction { store, embedder_id, staged } = *self;
        if staged.is_empty() {
            return Ok(0);
        }
        // Captured outside the timed write so an expired deadline can still be undone.
        let snap = store.block(store.snapshot())?;
        match store.block(store.apply_embeddings(&embedder_id, staged)) {
            Ok(n) => Ok(n),
            Err(e) => {
                tracing::error!(error = %e, version = snap.version, "embedding commit failed, restoring documents table");
                if let Err(re) = store.block(store.restore(&snap)) {
                    tracing::error!(error = %re, version = snap.version, "restore failed");
                    return Err(e.context(format!("restoring table version {} also failed: {re:#}", snap.version)));
                }
                Err(e)
            }
        }
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        tracing::debug!(discarded = self.staged.len(), "rolled back embedding transaction");
        Ok(())
    }
}

async fn collect_documents<S, E>(stream: S) -> Result<Vec<Document>>
where
    S: futures::Stream<Item = std::result::Result<RecordBatch, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let batches: Vec<RecordBatch> = stream.try_collect().await?;
    let mut docs = Vec::new();
    for batch in &batches {
        docs.extend(documents_from_batch(batch)?);
    }
    Ok(docs)
}

fn int64_col<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b Int64Array> {
    batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<Int64Array>()).ok_or_else(|| anyhow!("missing {name}"))
}

fn string_col<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b StringArray> {
    batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<StringArray>()).ok_or_else(|| anyhow!("missing {name}"))
}

fn opt_string(col: &StringArray, i: usize) -> Option<String> {
    col.is_valid(i).then(|| col.value(i).to_string())
}

fn documents_from_batch(batch: &RecordBatch) -> Result<Vec<Document>> {
    let ids = int64_col(batch, "id")?;
    let add = string_col(batch, "add_number")?;
    let reg = string_col(batch, "aircraft_registration")?;
    let disc = string_col(batch, "discrepancy")?;
    let notes = string_col(batch, "notes")?;
    let action = string_col(batch, "corrective_action")?;
    let tech = string_col(batch, "technician")?;
    let vecs = batch.column_by_name(EMBEDDING_COLUMN).and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());
    Ok((0..batch.num_rows())
        .map(|i| Document {
            id: ids.value(i),
            add_number: add.value(i).to_string(),
            aircraft_registration: reg.value(i).to_string(),
            discrepancy: opt_string(disc, i),
            notes: opt_string(notes, i),
            corrective_action: opt_string(action, i),
            technician: opt_string(tech, i),
            embedding: vecs.filter(|v| v.is_valid(i)).map(|v| v.value(i).as_primitive::<Float32Type>().values().to_vec()),
        })
        .collect())
}

fn documents_to_batch(docs: &[Document], schema: Arc<arrow_schema::Schema>, dim: usize) -> Result<RecordBatch> {
    let text = |f: fn(&Document) -> Option<String>| Arc::new(StringArray::from(docs.iter().map(f).collect::<Vec<_>>()));
    let vectors = docs.iter().map(|d| d.embedding.as_ref().map(|v| v.iter().copied().map(Some).collect::<Vec<_>>()));
    Ok(RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(docs.iter().map(|d| d.id).collect::<Vec<_>>())),
            text(|d| Some(d.add_number.clone())),
            text(|d| Some(d.aircraft_registration.clone())),
            text(|d| d.discrepancy.clone()),
            text(|d| d.notes.clone()),
            text(|d| d.corrective_action.clone()),
            text(|d| d.technician.clone()),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim as i32)),
        ],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> LanceRecordStore {
        let settings = StoreSettings { uri: tmp.path().to_string_lossy().to_string(), ..Default::default() };
        LanceRecordStore::open(&settings, 2).expect("open")
    }

    fn doc(add: &str) -> NewDocument {
        NewDocument { add_number: add.into(), aircraft_registration: "N1".into(), discrepancy: Some(add.into()), ..Default::default() }
    }

    #[test]
    fn restore_undoes_a_completed_write() {
        let tmp = TempDir::new().expect("tmp");
        let store = store(&tmp);
        let ids = store.insert(vec![doc("A"), doc("B")]).expect("insert");
        let snap = store.block(store.snapshot()).expect("snapshot");
        assert_eq!(snap.stamp, None);

        let staged = vec![(ids[0], vec![1.0, 0.0]), (ids[1], vec![0.0, 1.0])];
        assert_eq!(store.block(store.apply_embeddings("fake:a", staged)).expect("apply"), 2);
        assert_eq!(store.embedder_stamp().expect("stamp").as_deref(), Some("fake:a"));

        store.block(store.restore(&snap)).expect("restore");
        assert_eq!(store.counts().expect("counts").with_embedding, 0);
        assert_eq!(store.embedder_stamp().expect("stamp"), None);
    }

    #[test]
    fn restore_puts_back_the_previous_stamp() {
        let tmp = TempDir::new().expect("tmp");
        let store = store(&tmp);
        let ids = store.insert(vec![doc("A"), doc("B")]).expect("insert");
        store.block(store.apply_embeddings("fake:a", vec![(ids[0], vec![1.0, 0.0])])).expect("apply");
        let snap = store.block(store.snapshot()).expect("snapshot");

        store.block(store.apply_embeddings("fake:b", vec![(ids[1], vec![0.0, 1.0])])).expect("apply");
        store.block(store.restore(&snap)).expect("restore");
        assert_eq!(store.counts().expect("counts").with_embedding, 1);
        assert_eq!(store.embedder_stamp().expect("stamp").as_deref(), Some("fake:a"));
    }

    #[test]
    fn duplicate_staged_ids_count_once() {
        let tmp = TempDir::new().expect("tmp");
        let store = store(&tmp);
        let ids = store.insert(vec![doc("A")]).expect("insert");
        let mut tx = store.begin("fake:a").expect("begin");
        tx.set_embedding(ids[0], vec![1.0, 0.0]).expect("stage");
        tx.set_embedding(ids[0], vec![0.0, 1.0]).expect("stage");
        assert_eq!(tx.commit().expect("commit"), 1);
        let stored = store.get(ids[0]).expect("get").expect("present");
        assert_eq!(stored.embedding, Some(vec![0.0, 1.0]));
    }
}

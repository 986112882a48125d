use std::path::PathBuf;
use std::sync::Arc;

use maintdb_core::config::StoreSettings;
use maintdb_core::filter::StructuredQuery;
use maintdb_core::traits::{QueryOutput, RecordStore};
use maintdb_core::types::NewDocument;
use maintdb_embed::FakeEmbedder;
use maintdb_vector::{BackfillPipeline, LanceRecordStore, SemanticSearch};
use tempfile::TempDir;

fn load_fixture() -> Vec<NewDocument> {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).ancestors().nth(2).expect("workspace root").to_path_buf();
    let raw = std::fs::read_to_string(root.join("test_data/maintenance.jsonl")).expect("fixture");
    raw.lines().filter(|l| !l.trim().is_empty()).map(|l| serde_json::from_str(l).expect("record")).collect()
}

fn open(tmp: &TempDir, dim: usize) -> anyhow::Result<LanceRecordStore> {
    let settings = StoreSettings { uri: tmp.path().to_string_lossy().to_string(), ..Default::default() };
    LanceRecordStore::open(&settings, dim)
}

#[test]
fn lancedb_backfill_search_and_clear() {
    let tmp = TempDir::new().expect("tmp");
    let store = Arc::new(open(&tmp, 384).expect("open"));
    let docs = load_fixture();
    let n = docs.len();
    let ids = store.insert(docs).expect("insert");
    assert_eq!(ids.len(), n);
    assert_eq!(store.counts().expect("counts").without_embedding, n);

    let embedder = Arc::new(FakeEmbedder::new(384));
    let pipeline = BackfillPipeline::new(store.clone(), embedder.clone());
    let report = pipeline.run().expect("backfill");
    assert_eq!(report.embedded + report.skipped, n);
    assert_eq!(pipeline.run().expect("rerun").selected, report.skipped);

    let ortega = store.get(ids[0]).expect("get").expect("first record");
    assert_eq!(ortega.technician.as_deref(), Some("Ortega"));
    assert_eq!(ortega.embedding.as_ref().map(Vec::len), Some(384));

    let results = SemanticSearch::new(store.clone(), embedder).search("smoke detector problems").expect("search");
    assert!(!results.is_empty() && results.len() <= 5);
    assert_eq!(results[0].add_number, "ADD-001");
    for pair in results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }

    let q = StructuredQuery::parse("SELECT * FROM documents WHERE add_number = 'ADD-002'", store.table_name()).expect("parse");
    match store.query(&q).expect("query") {
        QueryOutput::Rows(rows) => assert_eq!(rows.len(), 1),
        other => panic!("expected rows, got {other:?}"),
    }

    assert_eq!(pipeline.clear().expect("clear"), report.embedded);
    assert_eq!(store.counts().expect("counts").with_embedding, 0);
    assert_eq!(store.embedder_stamp().expect("stamp"), None);
}

#[test]
fn reopening_with_another_dimension_fails_fast() {
    let tmp = TempDir::new().expect("tmp");
    drop(open(&tmp, 384).expect("create"));
    let err = open(&tmp, 768).err().expect("dimension mismatch");
    assert!(err.to_string().contains("expected 768, got 384"), "{err}");
}

#[test]
fn commit_with_unknown_record_writes_nothing() {
    let tmp = TempDir::new().expect("tmp");
    let store = open(&tmp, 4).expect("open");
    let ids = store
        .insert(vec![NewDocument { add_number: "ADD-1".into(), aircraft_registration: "N1".into(), discrepancy: Some("x".into()), ..Default::default() }])
        .expect("insert");
    let mut tx = store.begin("test").expect("begin");
    tx.set_embedding(ids[0], vec![1.0, 0.0, 0.0, 0.0]).expect("stage");
    tx.set_embedding(9999, vec![0.0, 1.0, 0.0, 0.0]).expect("stage");
    assert!(tx.commit().is_err());
    assert_eq!(store.counts().expect("counts").with_embedding, 0);
    assert_eq!(store.embedder_stamp().expect("stamp"), None);
}

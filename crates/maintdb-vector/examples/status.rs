use maintdb_core::traits::RecordStore;
use maintdb_core::Config;
use maintdb_vector::LanceRecordStore;

fn main() -> anyhow::Result<()> {
    let settings = Config::load()?.settings()?;
    let store = LanceRecordStore::open(&settings.store, settings.embedding.dim)?;
    let counts = store.counts()?;
    println!("{}: total={} with_embedding={} without_embedding={}", store.table_name(), counts.total, counts.with_embedding, counts.without_embedding);
    println!("embedder: {}", store.embedder_stamp()?.unwrap_or_else(|| "-".to_string()));
    Ok(())
}

use std::sync::Arc;

use maintdb_core::Config;
use maintdb_embed::get_default_embedder;
use maintdb_vector::{BackfillPipeline, LanceRecordStore};

fn main() -> anyhow::Result<()> {
    let settings = Config::load()?.settings()?;
    let store = Arc::new(LanceRecordStore::open(&settings.store, settings.embedding.dim)?);
    let embedder = Arc::from(get_default_embedder(&settings.embedding)?);
    let pipeline = BackfillPipeline::new(store, embedder).with_progress(true);
    let report = pipeline.run()?;
    println!("Backfilled {} documents ({} skipped)", report.embedded, report.skipped);
    print!("{}", pipeline.verify()?);
    Ok(())
}

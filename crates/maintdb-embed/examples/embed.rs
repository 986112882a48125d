use maintdb_core::Config;
use maintdb_embed::get_default_embedder;

fn main() -> anyhow::Result<()> {
    let settings = Config::load()?.settings()?;
    let embedder = get_default_embedder(&settings.embedding)?;
    let texts = vec!["Ortega smoke detector intermittent fault".to_string(), "landing light inoperative".to_string()];
    let embs = embedder.embed_batch(&texts)?;
    println!("id={} B={} dim={}", embedder.embedder_id(), embs.len(), embedder.dim());
    Ok(())
}

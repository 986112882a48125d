use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use maintdb_core::traits::{Embedder, RecordStore};
use maintdb_core::types::NewDocument;
use maintdb_core::{Config, Settings};
use maintdb_embed::get_default_embedder;
use maintdb_hybrid::QueryRouter;
use maintdb_vector::{BackfillPipeline, LanceRecordStore, SemanticSearch};

#[derive(Parser, Debug)]
#[command(name = "maintdb", about = "Maintenance discrepancy records: embedding backfill, semantic search and routed questions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load records from a JSON Lines file (one record per line, no embeddings)
    Ingest { file: PathBuf },
    /// Embed every record that has no embedding yet, in one all-or-nothing run
    Backfill {
        #[arg(long, default_value_t = false)]
        no_progress: bool,
        /// Print the run report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show embedding counts and a sample of records
    Verify,
    /// Reset every stored embedding so the next backfill regenerates all of them
    Clear,
    /// Top-5 semantic search without the reasoning service
    Semantic { query: Vec<String> },
    /// Answer a question by routing it through the structured and semantic tools
    Ask {
        query: Vec<String>,
        /// Print each Thought/Action/Observation step
        #[arg(long, default_value_t = false)]
        show_steps: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Config::load()
        .and_then(|c| c.settings())
        .map_err(|e| {
            eprintln!("Error loading config: {e:#}");
            e
        })?;

    match cli.command {
        Command::Ingest { file } => ingest(&settings, &file),
        Command::Backfill { no_progress, json } => {
            let pipeline = pipeline(&settings)?.with_progress(!no_progress);
            let report = pipeline.run()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "✅ Backfill complete: {} selected, {} embedded, {} skipped",
                    report.selected, report.embedded, report.skipped
                );
                print!("{}", pipeline.verify()?);
            }
            Ok(())
        }
        Command::Verify => {
            print!("{}", pipeline(&settings)?.verify()?);
            Ok(())
        }
        Command::Clear => {
            let cleared = pipeline(&settings)?.clear()?;
            println!("Cleared {cleared} embeddings");
            Ok(())
        }
        Command::Semantic { query } => {
            let (store, embedder) = open(&settings)?;
            let search = SemanticSearch::new(store, embedder);
            println!("{}", search.search_text(&query.join(" ")));
            Ok(())
        }
        Command::Ask { query, show_steps } => {
            let query = query.join(" ");
            let router = match open(&settings) {
                Ok((store, embedder)) => {
                    let search = Arc::new(SemanticSearch::new(store.clone(), embedder));
                    QueryRouter::from_settings(&settings, store, search)
                }
                Err(e) => QueryRouter::disabled(format!("{e:#}")),
            };
            let interaction = router.run(&query);
            if show_steps {
                for step in &interaction.steps {
                    eprintln!("[{}] {:?}\n{}\n", step.number, step.action, step.observation);
                }
            }
            println!("{}", interaction.render());
            Ok(())
        }
    }
}

fn open(settings: &Settings) -> Result<(Arc<dyn RecordStore>, Arc<dyn Embedder>)> {
    let store = LanceRecordStore::open(&settings.store, settings.embedding.dim)?;
    let embedder = get_default_embedder(&settings.embedding)?;
    Ok((Arc::new(store), Arc::from(embedder)))
}

fn pipeline(settings: &Settings) -> Result<BackfillPipeline> {
    let (store, embedder) = open(settings)?;
    Ok(BackfillPipeline::new(store, embedder))
}

fn ingest(settings: &Settings, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let docs = raw
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| serde_json::from_str::<NewDocument>(line).with_context(|| format!("{}:{}", file.display(), i + 1)))
        .collect::<Result<Vec<_>>>()?;
    let store = LanceRecordStore::open(&settings.store, settings.embedding.dim)?;
    let ids = store.insert(docs)?;
    println!("✅ Ingested {} records into '{}'", ids.len(), store.table_name());
    Ok(())
}

//! All-or-nothing embedding backfill.
//!
//! Selection is state-driven: every document whose embedding is absent. Each
//! one is embedded in store order and staged in a single transaction; the run
//! commits once at the end or rolls back on the first hard failure. Documents
//! without technician/discrepancy/notes text are skipped with a warning.
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;

use maintdb_core::error::{ensure_dim, Error};
use maintdb_core::traits::{Embedder, RecordStore, StoreTransaction};
use maintdb_core::types::{Document, EmbeddingInputText, SampleRow, VerificationReport};

pub const VERIFY_SAMPLE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BackfillReport {
    /// Documents that lacked an embedding when the run started.
    pub selected: usize,
    pub embedded: usize,
    /// Documents with no derivable text.
    pub skipped: usize,
}

pub struct BackfillPipeline {
    store: Arc<dyn RecordStore>,
    embedder: Arc<dyn Embedder>,
    progress: bool,
}

impl BackfillPipeline {
    pub fn new(store: Arc<dyn RecordStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder, progress: false }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn run(&self) -> Result<BackfillReport> {
        ensure_dim(self.store.embedding_dim(), self.embedder.dim())?;
        let pending = self.store.scan_missing_embeddings().context("scanning documents without embeddings")?;
        tracing::info!(pending = pending.len(), embedder = self.embedder.embedder_id(), "backfill selected documents");
        if pending.is_empty() {
            return Ok(BackfillReport::default());
        }
        self.check_embedder_stamp()?;

        let pb = self.progress_bar(pending.len());
        let mut tx = self.store.begin(self.embedder.embedder_id())?;
        let skipped = match self.stage_all(&mut *tx, &pending, &pb) {
            Ok(skipped) => skipped,
            Err(e) => {
                pb.abandon_with_message("rolled back");
                if let Err(rb) = tx.rollback() {
                    tracing::error!(error = %rb, "rollback failed");
                }
                tracing::error!(error = %e, "backfill failed, no embeddings persisted");
                return Err(e);
            }
        };
        let embedded = tx.commit().context("committing embeddings")?;
        pb.finish_with_message("done");

        let report = BackfillReport { selected: pending.len(), embedded, skipped };
        tracing::info!(selected = report.selected, embedded = report.embedded, skipped = report.skipped, "backfill committed");
        Ok(report)
    }

    fn stage_all(&self, tx: &mut dyn StoreTransaction, docs: &[Document], pb: &ProgressBar) -> Result<usize> {
        let mut skipped = 0usize;
        for doc in docs {
            pb.inc(1);
            let Some(text) = EmbeddingInputText::from_document(doc) else {
                tracing::warn!(id = doc.id, add_number = %doc.add_number, "document has no text to embed, skipping");
                skipped += 1;
                continue;
            };
            tracing::debug!(id = doc.id, add_number = %doc.add_number, text = %text, "embedding document");
            let vector = self
                .embedder
                .embed(text.as_str())
                .with_context(|| format!("embedding document {} (id {})", doc.add_number, doc.id))?;
            tx.set_embedding(doc.id, vector)?;
        }
        Ok(skipped)
    }

    /// Refuse to mix vectors from two different models in one table.
    fn check_embedder_stamp(&self) -> Result<()> {
        let current = self.embedder.embedder_id();
        match self.store.embedder_stamp()? {
            Some(stored) if stored != current => {
                // A stamp with no vectors behind it is left over from an interrupted clear.
                if self.store.counts()?.with_embedding == 0 {
                    tracing::warn!(stored = %stored, current, "ignoring embedder stamp with no stored vectors");
                    return Ok(());
                }
                Err(Error::EmbedderChanged { stored, current: current.to_string() }.into())
            }
            _ => Ok(()),
        }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }

    /// Reset every embedding to absent so the next run regenerates them all.
    pub fn clear(&self) -> Result<usize> {
        let cleared = self.store.clear_embeddings().context("clearing embeddings")?;
        tracing::info!(cleared, "cleared embeddings");
        Ok(cleared)
    }

    pub fn verify(&self) -> Result<VerificationReport> {
        let counts = self.store.counts()?;
        let sample = self.store.sample(VERIFY_SAMPLE)?.iter().map(SampleRow::from).collect();
        tracing::info!(total = counts.total, with = counts.with_embedding, without = counts.without_embedding, "embedding summary");
        Ok(VerificationReport { counts, sample })
    }
}

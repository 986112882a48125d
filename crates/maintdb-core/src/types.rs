//! Domain types for maintenance discrepancy records and retrieval results.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type RecordId = i64;

/// A maintenance discrepancy record as persisted by the record store.
///
/// - `id`: store-assigned, immutable identity
/// - `add_number`/`aircraft_registration`: natural key of the report
/// - `discrepancy`/`notes`/`corrective_action`/`technician`: optional text
/// - `embedding`: absent until the backfill pipeline commits one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: RecordId,
    pub add_number: String,
    pub aircraft_registration: String,
    pub discrepancy: Option<String>,
    pub notes: Option<String>,
    pub corrective_action: Option<String>,
    pub technician: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

/// A record as handed over by ingestion, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewDocument {
    pub add_number: String,
    pub aircraft_registration: String,
    #[serde(default)]
    pub discrepancy: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub corrective_action: Option<String>,
    #[serde(default)]
    pub technician: Option<String>,
}

impl NewDocument {
    pub fn into_document(self, id: RecordId) -> Document {
        Document {
            id,
            add_number: self.add_number,
            aircraft_registration: self.aircraft_registration,
            discrepancy: self.discrepancy,
            notes: self.notes,
            corrective_action: self.corrective_action,
            technician: self.technician,
            embedding: None,
        }
    }
}

/// Text fed to the embedder for one document: technician, discrepancy and
/// notes, in that order, space-joined, skipping absent or blank fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingInputText(String);

impl EmbeddingInputText {
    /// Returns `None` when none of the three source fields carries text.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let parts: Vec<&str> = [&doc.technician, &doc.discrepancy, &doc.notes]
            .into_iter()
            .filter_map(|f| f.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(Self(parts.join(" ")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmbeddingInputText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document paired with its cosine distance to a query vector.
#[derive(Debug, Clone)]
pub struct NeighborHit {
    pub document: Document,
    pub distance: f32,
}

/// One semantic search result. `similarity` is `1 - cosine_distance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub add_number: String,
    pub aircraft_registration: String,
    pub discrepancy: Option<String>,
    pub technician: Option<String>,
    pub similarity: f32,
}

impl SearchResult {
    pub fn from_hit(hit: NeighborHit) -> Self {
        let doc = hit.document;
        Self {
            add_number: doc.add_number,
            aircraft_registration: doc.aircraft_registration,
            discrepancy: doc.discrepancy,
            technician: doc.technician,
            similarity: 1.0 - hit.distance,
        }
    }
}

impl fmt::Display for SearchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ADD: {}, Aircraft: {}, Discrepancy: {}, Technician: {}, Similarity: {:.3}",
            self.add_number,
            self.aircraft_registration,
            self.discrepancy.as_deref().unwrap_or("-"),
            self.technician.as_deref().unwrap_or("-"),
            self.similarity
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmbeddingCounts {
    pub total: usize,
    pub with_embedding: usize,
    pub without_embedding: usize,
}

impl EmbeddingCounts {
    pub fn new(total: usize, with_embedding: usize) -> Self {
        Self { total, with_embedding, without_embedding: total.saturating_sub(with_embedding) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub add_number: String,
    pub discrepancy: Option<String>,
    pub has_embedding: bool,
}

impl From<&Document> for SampleRow {
    fn from(doc: &Document) -> Self {
        Self {
            add_number: doc.add_number.clone(),
            discrepancy: doc.discrepancy.clone(),
            has_embedding: doc.has_embedding(),
        }
    }
}

/// Operator-facing summary of embedding coverage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub counts: EmbeddingCounts,
    pub sample: Vec<SampleRow>,
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Embedding summary:")?;
        writeln!(f, "  - Total documents: {}", self.counts.total)?;
        writeln!(f, "  - With embedding: {}", self.counts.with_embedding)?;
        writeln!(f, "  - Without embedding: {}", self.counts.without_embedding)?;
        writeln!(f, "Sample documents:")?;
        for row in &self.sample {
            let marker = if row.has_embedding { "✓" } else { "✗" };
            let preview: String = row.discrepancy.as_deref().unwrap_or("").chars().take(50).collect();
            writeln!(f, "  {} {}: {}...", marker, row.add_number, preview)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(technician: Option<&str>, discrepancy: Option<&str>, notes: Option<&str>) -> Document {
        Document {
            id: 1,
            add_number: "ADD-001".into(),
            aircraft_registration: "N123AB".into(),
            discrepancy: discrepancy.map(String::from),
            notes: notes.map(String::from),
            corrective_action: Some("replaced unit".into()),
            technician: technician.map(String::from),
            embedding: None,
        }
    }

    #[test]
    fn input_text_uses_fixed_field_order() {
        let d = doc(Some("Ortega"), Some("smoke detector intermittent fault"), None);
        let text = EmbeddingInputText::from_document(&d).expect("text");
        assert_eq!(text.as_str(), "Ortega smoke detector intermittent fault");

        let d = doc(Some("Medina"), Some("landing light out"), Some("checked bulb"));
        assert_eq!(EmbeddingInputText::from_document(&d).expect("text").as_str(), "Medina landing light out checked bulb");
    }

    #[test]
    fn input_text_ignores_corrective_action_and_blank_fields() {
        let d = doc(None, Some("  "), None);
        assert!(EmbeddingInputText::from_document(&d).is_none());
        let d = doc(Some(""), None, Some("only notes"));
        assert_eq!(EmbeddingInputText::from_document(&d).expect("text").as_str(), "only notes");
    }

    #[test]
    fn similarity_is_one_minus_distance() {
        let hit = NeighborHit { document: doc(None, Some("x"), None), distance: 0.25 };
        let r = SearchResult::from_hit(hit);
        assert!((r.similarity - 0.75).abs() < 1e-6);
        assert!(r.to_string().contains("Similarity: 0.750"));
    }

    #[test]
    fn counts_derive_without_embedding() {
        let c = EmbeddingCounts::new(10, 7);
        assert_eq!(c.without_embedding, 3);
    }
}

//! Tool catalog exposed to the reasoning service.
//!
//! Three schema-aware structured tools (`list_tables`, `describe_records`,
//! `query_records`) plus `semantic_search`. Every tool takes one string and
//! returns one string; failures come back as `ToolError` and are fed to the
//! loop as observations.
use std::sync::Arc;
use thiserror::Error;

use maintdb_core::filter::{Column, FilterError, StructuredQuery};
use maintdb_core::traits::{QueryOutput, RecordStore};
use maintdb_core::types::Document;
use maintdb_vector::SemanticSearch;

pub const DESCRIBE_SAMPLE_ROWS: usize = 3;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{name} is not a valid tool, try one of [{available}].")]
    UnknownTool { name: String, available: String },
    #[error("Error: {0}")]
    InvalidQuery(#[from] FilterError),
    #[error("Error: {0}")]
    Execution(String),
}

pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    /// When the reasoning service should pick this tool.
    fn description(&self) -> &str;
    fn invoke(&self, input: &str) -> Result<String, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(mut self, tool: Box<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// One `name: description` line per tool, in registration order.
    pub fn catalog(&self) -> String {
        self.tools.iter().map(|t| format!("{}: {}", t.name(), t.description())).collect::<Vec<_>>().join("\n")
    }

    pub fn invoke(&self, name: &str, input: &str) -> Result<String, ToolError> {
        match self.find(name) {
            Some(tool) => tool.invoke(input),
            None => Err(ToolError::UnknownTool { name: name.to_string(), available: self.names().join(", ") }),
        }
    }
}

/// Structured tools over `store` followed by `semantic_search`.
pub fn default_registry(store: Arc<dyn RecordStore>, search: Arc<SemanticSearch>) -> ToolRegistry {
    ToolRegistry::new()
        .register(Box::new(ListTablesTool { store: store.clone() }))
        .register(Box::new(DescribeRecordsTool { store: store.clone() }))
        .register(Box::new(QueryRecordsTool { store }))
        .register(Box::new(SemanticSearchTool { search }))
}

pub struct ListTablesTool {
    store: Arc<dyn RecordStore>,
}

impl Tool for ListTablesTool {
    fn name(&self) -> &str { "list_tables" }
    fn description(&self) -> &str { "Input is an empty string, output is the name of the maintenance records table." }
    fn invoke(&self, _input: &str) -> Result<String, ToolError> {
        Ok(self.store.table_name().to_string())
    }
}

pub struct DescribeRecordsTool {
    store: Arc<dyn RecordStore>,
}

impl Tool for DescribeRecordsTool {
    fn name(&self) -> &str { "describe_records" }
    fn description(&self) -> &str {
        "Input is the table name, output is its columns with types and three sample rows. Use before writing a query if unsure of the columns."
    }
    fn invoke(&self, input: &str) -> Result<String, ToolError> {
        let table = self.store.table_name();
        let requested = input.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
        if !requested.is_empty() && !requested.eq_ignore_ascii_case(table) {
            return Err(FilterError::UnknownTable { name: requested.to_string(), expected: table.to_string() }.into());
        }
        let mut out = format!("Table: {table}\nColumns:\n");
        for column in Column::ALL {
            out.push_str(&format!("  {} {}\n", column.name(), column.type_name()));
        }
        out.push_str(&format!("  embedding VECTOR({}) (semantic_search only)\n", self.store.embedding_dim()));
        let rows = self.store.sample(DESCRIBE_SAMPLE_ROWS).map_err(|e| ToolError::Execution(format!("{e:#}")))?;
        out.push_str(&format!("Sample rows ({}):\n", rows.len()));
        for row in &rows {
            out.push_str(&format!("  {}\n", render_row(row)));
        }
        Ok(out)
    }
}

pub struct QueryRecordsTool {
    store: Arc<dyn RecordStore>,
}

impl Tool for QueryRecordsTool {
    fn name(&self) -> &str { "query_records" }
    fn description(&self) -> &str {
        "Input is a query like SELECT * FROM <table> WHERE <column> LIKE '%value%' [LIMIT n], or SELECT COUNT(*) FROM <table> WHERE ...; conditions support =, !=, LIKE, ILIKE, IS [NOT] NULL, AND, OR. Output is the matching records. Use for ADD numbers, technicians and aircraft registrations."
    }
    fn invoke(&self, input: &str) -> Result<String, ToolError> {
        let query = StructuredQuery::parse(input, self.store.table_name())?;
        tracing::debug!(query = %query, "query_records");
        let output = self.store.query(&query).map_err(|e| ToolError::Execution(format!("{e:#}")))?;
        Ok(match output {
            QueryOutput::Count(n) => format!("Count: {n}"),
            QueryOutput::Rows(rows) if rows.is_empty() => "No records matched the query.".to_string(),
            QueryOutput::Rows(rows) => {
                let mut out = format!("{} record(s):\n", rows.len());
                for row in &rows {
                    out.push_str(&render_row(row));
                    out.push('\n');
                }
                out
            }
        })
    }
}

pub struct SemanticSearchTool {
    search: Arc<SemanticSearch>,
}

impl Tool for SemanticSearchTool {
    fn name(&self) -> &str { "semantic_search" }
    fn description(&self) -> &str {
        "Search by technical concept using semantic embeddings. Use for symptoms and systems such as smoke detector, landing light problems, engine issues. Input is the concept in plain words."
    }
    fn invoke(&self, input: &str) -> Result<String, ToolError> {
        Ok(self.search.search_text(input.trim().trim_matches('"')))
    }
}

fn render_row(doc: &Document) -> String {
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "NULL".to_string());
    format!(
        "id: {}, add_number: {}, aircraft_registration: {}, discrepancy: {}, notes: {}, corrective_action: {}, technician: {}",
        doc.id,
        doc.add_number,
        doc.aircraft_registration,
        opt(&doc.discrepancy),
        opt(&doc.notes),
        opt(&doc.corrective_action),
        opt(&doc.technician)
    )
}

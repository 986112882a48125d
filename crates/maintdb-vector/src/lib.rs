//! maintdb-vector
//!
//! LanceDB-backed record store plus the two vector operations built on it:
//! the embedding backfill pipeline and top-k semantic search.
pub mod embed_backfill;
pub mod schema;
pub mod search;
pub mod store;
pub mod table;

pub use embed_backfill::{BackfillPipeline, BackfillReport};
pub use search::{render_results, SearchError, SearchErrorKind, SemanticSearch, TOP_K};
pub use store::LanceRecordStore;

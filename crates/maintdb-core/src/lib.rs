//! maintdb-core
//!
//! Domain types, storage/embedding traits, the structured filter language and
//! configuration shared by the backfill pipeline, semantic search and router.
#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod config;
pub mod error;
pub mod filter;
pub mod memory;
pub mod traits;
pub mod types;

pub use config::{Config, Settings};
pub use error::{Error, Result};
pub use traits::{Embedder, RecordStore, StoreTransaction};
pub use types::{Document, EmbeddingInputText, NewDocument, SearchResult};

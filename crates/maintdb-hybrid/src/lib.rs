//! maintdb-hybrid
//!
//! Query router: a bounded Thought/Action/Observation loop that lets a hosted
//! reasoning service pick between structured lookups and semantic search.
pub mod parser;
pub mod prompt;
pub mod reasoning;
pub mod router;
pub mod testing;
pub mod tools;

pub use reasoning::{ReasoningError, ReasoningService};
pub use router::{Interaction, Outcome, QueryRouter, RouterStep, StepAction};
pub use tools::{default_registry, Tool, ToolError, ToolRegistry};

//! Query routing core for SEC filing question answering.
//!
//! Turns a free-text question into a [`RoutingPlan`]: which retrieval backend
//! to use, the structured filters found in the text, ordered fallbacks, and
//! independently routable sub-tasks when the question fans out.

pub mod config;
pub mod error;
pub mod llm;
pub mod rag;
pub mod router;
pub mod types;

// Re-export primary types for convenience
pub use config::{ArbitrationConfig, RouterConfig};
pub use error::{RouterError, RouterResult};
pub use llm::{CompletionService, OpenAiCompatibleClient};
pub use rag::CompanyAliases;
pub use router::QueryRouter;
pub use types::{
    DocType, ExtractedMetadata, FieldSource, PlanProvenance, Quarter, QueryIntent, Route,
    RoutingPlan, Stage, SubTask, TrailEntry,
};

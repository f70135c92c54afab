//! Routing stages - entity normalization, metadata extraction, intent
//! classification, route policy, decomposition and LLM arbitration.

pub mod company_aliases;
pub mod intent_classifier;
pub mod llm_router;
pub mod metadata;
pub mod query_decomposer;
pub mod routing_policy;

// Re-export commonly used types
pub use company_aliases::{AliasGroup, CompanyAliases};
pub use intent_classifier::{Classification, ClassifierConfig, IntentClassifier, IntentRule, IntentScore};
pub use llm_router::{
    build_arbitration_prompt, merge_plan, parse_arbiter_response, ArbiterResponse, ArbiterSubTask,
    PlanArbiter,
};
pub use metadata::MetadataExtractor;
pub use query_decomposer::{
    split_query, DecomposedQuery, Decomposition, DecompositionStrategy, Fragment, QueryDecomposer,
};
pub use routing_policy::{CompletenessWeights, PolicyConfig, RouteDecision, RouteRule, RoutingPolicy};

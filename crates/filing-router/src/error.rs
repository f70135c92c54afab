//! Error types for the routing core.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::QueryIntent;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Invalid pattern in {context}: {source}")]
    Pattern {
        context: String,
        #[source]
        source: regex::Error,
    },

    #[error("No routing rule for intent {0}")]
    MissingRule(QueryIntent),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Completion service failed: {0}")]
    Completion(String),

    #[error("Completion service timed out after {0:?}")]
    CompletionTimeout(Duration),

    #[error("Unparseable completion response: {0}")]
    MalformedResponse(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RouterResult<T> = Result<T, RouterError>;

pub(crate) fn compile_pattern(pattern: &str, context: &str) -> RouterResult<regex::Regex> {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| RouterError::Pattern {
            context: context.to_string(),
            source,
        })
}

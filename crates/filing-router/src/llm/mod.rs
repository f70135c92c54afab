//! Completion service boundary
//!
//! The router only needs "prompt in, text out". Implementations own their
//! transport, credentials and retry policy; the router owns the deadline.

use anyhow::Result;
use async_trait::async_trait;

pub mod openai;

pub use openai::OpenAiCompatibleClient;

/// Text completion used for plan arbitration.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete `prompt`, producing at most `max_tokens` tokens.
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "completion"
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns the same text for every prompt and counts calls.
    pub struct StaticCompletion {
        pub response: String,
        pub calls: AtomicUsize,
    }

    impl StaticCompletion {
        pub fn new(response: impl Into<String>) -> Self {
            Self {
                response: response.into(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionService for StaticCompletion {
        async fn complete(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    pub struct FailingCompletion;

    #[async_trait]
    impl CompletionService for FailingCompletion {
        async fn complete(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    /// Sleeps before answering, for deadline tests.
    pub struct SlowCompletion {
        pub delay: Duration,
        pub response: String,
    }

    #[async_trait]
    impl CompletionService for SlowCompletion {
        async fn complete(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok(self.response.clone())
        }
    }

    pub struct PanickingCompletion;

    #[async_trait]
    impl CompletionService for PanickingCompletion {
        async fn complete(&self, _prompt: &str, _max_tokens: usize) -> Result<String> {
            panic!("completion backend crashed")
        }
    }
}

//! Pluggable LLM provider trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into provider-specific SDK calls. Timeouts, retries and cancellation are
//! applied on top by [`Gateway`](super::gateway::Gateway), so a provider
//! makes exactly one attempt per call.

use async_trait::async_trait;

use super::message::{ChatRequest, ChatResponse};
use crate::error::AgentError;

/// Trait for LLM provider backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiRequest`] with `retryable` set for rate
    /// limits, server errors and connection failures.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError>;
}

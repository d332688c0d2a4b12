//! Agent trait definition.
//!
//! The manager, the specialists and the verifier implement this trait,
//! which gives the orchestrator a uniform way to send a conversation
//! through the [`Gateway`].

use async_trait::async_trait;

use super::gateway::Gateway;
use super::message::{ChatMessage, ChatRequest, TokenUsage, system_message, user_message};
use crate::error::AgentError;

/// Response from an agent execution.
#[derive(Debug, Clone, Default)]
pub struct AgentResponse {
    /// The agent's text output.
    pub content: String,
    /// Token usage for this call.
    pub usage: TokenUsage,
    /// Why the model stopped generating (e.g. `"stop"`, `"length"`).
    pub finish_reason: Option<String>,
}

impl AgentResponse {
    /// Whether the model ran out of output tokens.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

/// Trait implemented by all agents in the system.
///
/// Agents encapsulate a role with a fixed system prompt and model
/// configuration. The orchestrator calls [`Agent::execute`] for a single
/// turn and [`Agent::converse`] when a repair conversation is underway.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Agent name for logging and the visit log.
    fn name(&self) -> &'static str;

    /// Model identifier to use for this agent.
    fn model(&self) -> &str;

    /// System prompt that defines the agent's role and behavior.
    fn system_prompt(&self) -> &str;

    /// Whether to request JSON-formatted output.
    fn json_mode(&self) -> bool {
        true
    }

    /// Sampling temperature (0.0 = deterministic, higher = more creative).
    fn temperature(&self) -> f32 {
        0.0
    }

    /// Maximum tokens for the response.
    fn max_tokens(&self) -> u32 {
        2048
    }

    /// Sends `messages` after the agent's system prompt.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] from the gateway (cancellation, outage, or a
    /// non-transient provider error).
    async fn converse(
        &self,
        gateway: &Gateway,
        messages: &[ChatMessage],
    ) -> Result<AgentResponse, AgentError> {
        let mut all = Vec::with_capacity(messages.len() + 1);
        all.push(system_message(self.system_prompt()));
        all.extend_from_slice(messages);

        let request = ChatRequest {
            model: self.model().to_string(),
            messages: all,
            temperature: Some(self.temperature()),
            max_tokens: Some(self.max_tokens()),
            json_mode: self.json_mode(),
        };

        let response = gateway.chat(&request).await?;
        Ok(AgentResponse {
            content: response.content,
            usage: response.usage,
            finish_reason: response.finish_reason,
        })
    }

    /// Executes the agent with a single user message.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] from the gateway.
    async fn execute(&self, gateway: &Gateway, user_msg: &str) -> Result<AgentResponse, AgentError> {
        self.converse(gateway, &[user_message(user_msg)]).await
    }
}

//! Bounded re-prompt loop.
//!
//! A model answer goes through JSON extraction, a required-field check and
//! a caller-supplied parser. Any failure appends the rejected answer and a
//! repair message to the conversation and asks again, at most
//! `max_reprompts` times.

use serde_json::Value;
use tracing::{debug, warn};

use super::gateway::Gateway;
use super::message::{ChatMessage, assistant_message, user_message};
use super::parse::{extract_json_object, require_fields};
use super::prompt::build_repair_prompt;
use super::traits::Agent;
use crate::error::AgentError;

/// A parsed answer with the conversation that produced it.
#[derive(Debug, Clone)]
pub struct Reprompted<T> {
    /// Parsed value.
    pub value: T,
    /// Conversation after the user turns, ending with the accepted answer.
    pub messages: Vec<ChatMessage>,
    /// Model calls made, including the first.
    pub attempts: u32,
}

/// Sends `user_msg` and re-prompts until `parse` accepts the answer.
///
/// # Errors
///
/// - [`AgentError::MalformedOutput`] once the re-prompts are exhausted.
/// - Gateway errors ([`AgentError::Cancelled`],
///   [`AgentError::ProviderUnavailable`], ...) unchanged.
pub async fn request_json<T, F>(
    agent: &dyn Agent,
    gateway: &Gateway,
    user_msg: &str,
    required_fields: &[&str],
    max_reprompts: u32,
    parse: F,
) -> Result<Reprompted<T>, AgentError>
where
    F: Fn(&Value) -> Result<T, Vec<String>> + Send + Sync,
    T: Send,
{
    continue_json(
        agent,
        gateway,
        vec![user_message(user_msg)],
        required_fields,
        max_reprompts,
        parse,
    )
    .await
}

/// Continues an existing conversation until `parse` accepts the answer.
///
/// `messages` must end with a user turn.
///
/// # Errors
///
/// Same as [`request_json`].
pub async fn continue_json<T, F>(
    agent: &dyn Agent,
    gateway: &Gateway,
    mut messages: Vec<ChatMessage>,
    required_fields: &[&str],
    max_reprompts: u32,
    parse: F,
) -> Result<Reprompted<T>, AgentError>
where
    F: Fn(&Value) -> Result<T, Vec<String>> + Send + Sync,
    T: Send,
{
    let attempts = max_reprompts.saturating_add(1);

    for attempt in 1..=attempts {
        let response = agent.converse(gateway, &messages).await?;

        let outcome = extract_json_object(&response.content)
            .map_err(|e| vec![e])
            .and_then(|value| {
                require_fields(&value, required_fields).map_err(|e| vec![e])?;
                parse(&value)
            });

        match outcome {
            Ok(value) => {
                debug!(agent = agent.name(), attempt, "model output accepted");
                messages.push(assistant_message(&response.content));
                return Ok(Reprompted {
                    value,
                    messages,
                    attempts: attempt,
                });
            }
            Err(mut errors) => {
                if response.truncated() {
                    errors.push(format!(
                        "the answer was cut off at {} tokens; return a shorter answer",
                        agent.max_tokens()
                    ));
                }
                warn!(
                    agent = agent.name(),
                    attempt,
                    attempts,
                    errors = %errors.join("; "),
                    "model output rejected"
                );
                if attempt == attempts {
                    return Err(AgentError::MalformedOutput {
                        agent: agent.name().to_string(),
                        message: errors.join("; "),
                        content: response.content,
                    });
                }
                messages.push(assistant_message(&response.content));
                messages.push(user_message(&build_repair_prompt(&errors, required_fields)));
            }
        }
    }

    // attempts >= 1, so the loop always returns
    Err(AgentError::MalformedOutput {
        agent: agent.name().to_string(),
        message: "no attempts made".to_string(),
        content: String::new(),
    })
}

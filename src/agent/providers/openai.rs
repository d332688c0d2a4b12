//! `OpenAI` provider implementation using the `async-openai` crate.
//!
//! Supports any `OpenAI`-compatible API (`OpenAI`, Azure, local proxies,
//! Gemini's compatible endpoint) via the base URL override in
//! [`AgentConfig`].

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest, ResponseFormat,
};
use async_trait::async_trait;

use crate::agent::config::AgentConfig;
use crate::agent::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::agent::provider::LlmProvider;
use crate::error::AgentError;

/// `OpenAI`-compatible LLM provider.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAiProvider {
    /// Creates a new provider from agent configuration.
    #[must_use]
    pub fn new(config: &AgentConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(&config.api_key);

        if let Some(ref base_url) = config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        Self {
            client: Client::with_config(openai_config),
        }
    }

    /// Converts our message type to the `OpenAI` SDK type.
    fn convert_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            Role::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
                    name: None,
                })
            }
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
                name: None,
            }),
            Role::Assistant => {
                #[allow(deprecated)]
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                        msg.content.clone(),
                    )),
                    name: None,
                    tool_calls: None,
                    refusal: None,
                    audio: None,
                    function_call: None,
                })
            }
        }
    }

    /// Builds an `OpenAI` chat completion request from our generic request.
    fn build_request(request: &ChatRequest) -> CreateChatCompletionRequest {
        let messages: Vec<_> = request.messages.iter().map(Self::convert_message).collect();

        let response_format = if request.json_mode {
            Some(ResponseFormat::JsonObject)
        } else {
            None
        };

        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature.filter(|&t| t != 0.0),
            max_completion_tokens: request.max_tokens,
            response_format,
            ..Default::default()
        }
    }

    /// Maps SDK errors onto [`AgentError::ApiRequest`], marking the ones a
    /// retry may fix.
    fn map_error(err: OpenAIError) -> AgentError {
        match err {
            OpenAIError::Reqwest(e) => {
                let status = e.status().map(|s| s.as_u16());
                let retryable = status.is_none_or(|s| s == 408 || s == 429 || s >= 500);
                if e.is_timeout() {
                    return AgentError::TransientProvider {
                        message: e.to_string(),
                        timed_out: true,
                    };
                }
                AgentError::ApiRequest {
                    message: e.to_string(),
                    status,
                    retryable,
                }
            }
            OpenAIError::ApiError(api) => {
                let kind = format!(
                    "{} {}",
                    api.r#type.as_deref().unwrap_or_default(),
                    api.code.as_deref().unwrap_or_default()
                );
                let retryable = ["rate_limit", "server_error", "overloaded", "timeout"]
                    .iter()
                    .any(|k| kind.contains(k));
                AgentError::ApiRequest {
                    message: api.message,
                    status: None,
                    retryable,
                }
            }
            other => AgentError::ApiRequest {
                message: other.to_string(),
                status: None,
                retryable: false,
            },
        }
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<async-openai::Client>")
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let openai_request = Self::build_request(request);

        let response = self
            .client
            .chat()
            .create(openai_request)
            .await
            .map_err(Self::map_error)?;

        let choice = response.choices.first();

        let content = choice
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        let finish_reason = choice.and_then(|c| {
            c.finish_reason
                .as_ref()
                .map(|fr| format!("{fr:?}").to_lowercase())
        });

        let usage = response
            .usage
            .map_or_else(TokenUsage::default, |u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });

        Ok(ChatResponse {
            content,
            usage,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message;

    #[test]
    fn test_convert_messages() {
        let converted = OpenAiProvider::convert_message(&message::system_message("rules"));
        assert!(matches!(converted, ChatCompletionRequestMessage::System(_)));

        let converted = OpenAiProvider::convert_message(&message::user_message("guideline"));
        assert!(matches!(converted, ChatCompletionRequestMessage::User(_)));

        let converted = OpenAiProvider::convert_message(&message::assistant_message("{}"));
        assert!(matches!(converted, ChatCompletionRequestMessage::Assistant(_)));
    }

    #[test]
    fn test_build_request_json_mode() {
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![message::user_message("test")],
            temperature: Some(0.0),
            max_tokens: Some(100),
            json_mode: true,
        };
        let built = OpenAiProvider::build_request(&request);
        assert!(built.response_format.is_some());
        assert_eq!(built.temperature, None);
        assert_eq!(built.max_completion_tokens, Some(100));
    }

    #[test]
    fn test_map_error_non_retryable() {
        let err = OpenAiProvider::map_error(OpenAIError::InvalidArgument("bad".to_string()));
        assert!(!err.is_transient());
    }
}

//! Language-model gateway.
//!
//! Wraps an [`LlmProvider`] with the per-call timeout, bounded retries with
//! exponential backoff, the cancellation check, and token accounting. Every
//! agent talks to the model through a [`Gateway`]; clones share the
//! provider, the cancellation token and the counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::AgentConfig;
use super::message::{ChatRequest, ChatResponse};
use super::provider::LlmProvider;
use crate::error::AgentError;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Timeout, retry and cancellation policy around a provider.
#[derive(Clone)]
pub struct Gateway {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
    cancel: CancellationToken,
    tokens: Arc<AtomicU64>,
    calls: Arc<AtomicU64>,
}

impl Gateway {
    /// Creates a gateway using the timeout and retry settings of `config`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        config: &AgentConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            timeout: config.timeout,
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
            cancel,
            tokens: Arc::new(AtomicU64::new(0)),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Name of the wrapped provider.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Returns `true` once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Total tokens reported by successful calls.
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }

    /// Provider attempts made, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Sends `request`, retrying transient failures.
    ///
    /// Cancellation is checked before every attempt and while waiting on
    /// the provider or a backoff sleep.
    ///
    /// # Errors
    ///
    /// - [`AgentError::Cancelled`] when the run's token fires.
    /// - [`AgentError::ProviderUnavailable`] when every attempt failed
    ///   transiently.
    /// - Any non-transient provider error, unchanged.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let attempts = self.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            self.calls.fetch_add(1, Ordering::Relaxed);

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                r = tokio::time::timeout(self.timeout, self.provider.chat(request)) => r,
            };

            let err = match outcome {
                Ok(Ok(response)) => {
                    self.tokens
                        .fetch_add(u64::from(response.usage.total_tokens), Ordering::Relaxed);
                    debug!(
                        model = %request.model,
                        attempt,
                        tokens = response.usage.total_tokens,
                        "provider call succeeded"
                    );
                    return Ok(response);
                }
                Ok(Err(e)) if e.is_transient() => e,
                Ok(Err(e)) => return Err(e),
                Err(_) => AgentError::TransientProvider {
                    message: format!("call timed out after {:?}", self.timeout),
                    timed_out: true,
                },
            };

            warn!(model = %request.model, attempt, attempts, error = %err, "transient provider failure");
            last_error = err.to_string();

            if attempt < attempts {
                let delay = self.backoff(attempt);
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(AgentError::ProviderUnavailable {
            attempts,
            message: last_error,
        })
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("provider", &self.provider.name())
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

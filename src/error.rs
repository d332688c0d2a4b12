//! Error types for guideline-kg.
//!
//! [`AgentError`] is the taxonomy used inside the orchestration engine.
//! Almost every variant is recovered locally by the orchestrator; only a
//! total provider outage changes the final run status to `failed`.
//! [`Error`] wraps everything the CLI layer can surface.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by agents, the gateway, and the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// A provider call timed out or the provider was briefly unavailable.
    #[error("transient provider error: {message}")]
    TransientProvider {
        /// Description of the failure.
        message: String,
        /// Whether the failure was a per-call timeout.
        timed_out: bool,
    },

    /// Every retry attempt against the provider failed.
    #[error("provider unavailable after {attempts} attempts: {message}")]
    ProviderUnavailable {
        /// Number of attempts made.
        attempts: u32,
        /// Last error observed.
        message: String,
    },

    /// The provider rejected or failed a request.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Error message returned by the provider SDK.
        message: String,
        /// HTTP status when known.
        status: Option<u16>,
        /// Whether retrying the same request may succeed.
        retryable: bool,
    },

    /// Model output could not be parsed into the expected structure.
    #[error("malformed output from {agent}: {message}")]
    MalformedOutput {
        /// Agent that produced the output.
        agent: String,
        /// Parse or validation failure.
        message: String,
        /// Raw model output.
        content: String,
    },

    /// The manager named a next agent that does not exist.
    #[error("unknown routing target '{name}'")]
    Routing {
        /// Name produced by the model.
        name: String,
    },

    /// A sub-cohort was kept but its supporting evidence is weak.
    #[error("low verification confidence ({confidence:.2}) for sub-cohort '{subject}'")]
    VerificationLowConfidence {
        /// Sub-cohort subject.
        subject: String,
        /// Computed confidence in [0, 1].
        confidence: f64,
    },

    /// The run reached its global agent-invocation cap.
    #[error("iteration limit of {limit} agent invocations exceeded")]
    IterationLimitExceeded {
        /// Configured cap.
        limit: usize,
    },

    /// A workflow node was requested more often than allowed.
    #[error("node '{node}' exceeded its revisit limit of {limit}")]
    RevisitLimitExceeded {
        /// Node name.
        node: String,
        /// Configured limit.
        limit: usize,
    },

    /// The run was cancelled before a provider call.
    #[error("run cancelled")]
    Cancelled,

    /// The workflow attempted a transition its state machine forbids.
    #[error("illegal workflow transition {from} -> {to}")]
    IllegalTransition {
        /// Phase the workflow was in.
        from: String,
        /// Requested phase.
        to: String,
    },

    /// A spawned agent task could not be run or joined.
    #[error("orchestration error: {message}")]
    Orchestration {
        /// Description of the failure.
        message: String,
    },

    /// No API key configured.
    #[error("no API key configured (set OPENAI_API_KEY or GKG_API_KEY)")]
    ApiKeyMissing,

    /// Unknown provider name.
    #[error("unsupported provider '{name}'")]
    UnsupportedProvider {
        /// Configured provider name.
        name: String,
    },
}

impl AgentError {
    /// Returns `true` when the gateway should retry the call.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::TransientProvider { .. } => true,
            Self::ApiRequest { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns `true` when the error ends all further provider calls.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProviderUnavailable { .. } | Self::Cancelled)
    }
}

/// Errors raised while loading guideline documents.
#[derive(Debug, Error)]
pub enum LoadError {
    /// File could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path of the document.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// JSON guideline did not match the expected shape.
    #[error("invalid guideline JSON in {path}: {message}")]
    InvalidJson {
        /// Path of the document.
        path: PathBuf,
        /// Reason.
        message: String,
    },

    /// Document has no text after cleaning.
    #[error("document {path} is empty")]
    Empty {
        /// Path of the document.
        path: PathBuf,
    },
}

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Command failed with a message.
    #[error("{0}")]
    ExecutionFailed(String),

    /// Bad argument combination.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Agent or orchestration failure.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Document loading failure.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// CLI command failure.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

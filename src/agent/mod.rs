//! Multi-agent extraction engine.
//!
//! A manager agent plans the extraction, domain specialists fill their own
//! namespaces, an evidence verifier scores every candidate sub-cohort
//! against the source text, and an aggregator merges the namespaces into
//! the final artifacts. All model calls go through a [`Gateway`].
//!
//! # Architecture
//!
//! ```text
//! Document → Orchestrator
//!   ├── ManagerAgent (themes, drafts, summary, routing)
//!   ├── Round 1..n → concurrent SpecialistAgents (join barrier)
//!   │   └── validation → one repair turn → hand-offs
//!   ├── EvidenceVerifier (questions → BM25 → judgment)
//!   └── aggregate → cohorts + knowledge graph
//! ```
//!
//! # Feature Gate
//!
//! The OpenAI-compatible backend requires the `openai` feature (on by
//! default). Other providers implement [`LlmProvider`].

pub mod aggregator;
pub mod client;
pub mod config;
pub mod draft;
pub mod gateway;
pub mod manager;
pub mod message;
pub mod orchestrator;
pub mod parse;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod reprompt;
pub mod result;
pub mod routing;
pub mod specialist;
pub mod state;
pub mod traits;
pub mod validate;
pub mod verifier;

// Re-export key types
pub use aggregator::{Aggregate, aggregate};
pub use client::create_provider;
pub use config::{AgentConfig, AgentConfigBuilder, RoutingConfig, VerificationConfig, WorkflowLimits};
pub use gateway::Gateway;
pub use manager::{ManagerAgent, ManagerOutput};
pub use message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
pub use orchestrator::Orchestrator;
pub use prompt::{AgentRole, PromptSet, PromptSpec};
pub use provider::LlmProvider;
pub use result::{
    FinalResult, QuestionRecord, RunStatus, Verdict, VerificationOutcome, VerificationRecord,
};
pub use routing::{Route, RouteRequest, Specialist};
pub use specialist::{DomainScope, SpecialistAgent, SpecialistOutput};
pub use state::{Phase, WorkflowState};
pub use traits::{Agent, AgentResponse};
pub use verifier::{EvidenceVerifier, VerificationReport};

//! # guideline-kg
//!
//! Multi-agent extraction of OMOP-compatible knowledge graphs and cohort
//! definitions from clinical guideline text.
//!
//! A manager agent identifies the guideline's themes and routes work to
//! drug and diagnosis specialists. Every candidate sub-cohort is checked
//! against the source text by an evidence verifier before the namespaces
//! are merged into two artifacts: a cohort analysis and a knowledge graph.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use guideline_kg::agent::{AgentConfig, Orchestrator, create_provider};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> guideline_kg::Result<()> {
//! let config = AgentConfig::builder().from_env().build()?;
//! let provider = create_provider(&config)?;
//! let orchestrator = Orchestrator::new(Arc::from(provider), config);
//!
//! let state = orchestrator
//!     .run("Patients with LDL-C ≥190mg/dL should receive statins.", CancellationToken::new())
//!     .await;
//! if let Some(result) = &state.result {
//!     println!("{}: {} sub-cohorts", result.status, result.sub_cohort_count());
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod cli;
pub mod core;
pub mod error;
pub mod io;
pub mod search;

pub use crate::agent::{AgentConfig, FinalResult, Orchestrator, RunStatus, WorkflowState};
pub use crate::core::{CohortArtifact, KnowledgeGraph};
pub use crate::error::{AgentError, Error, Result};
pub use crate::io::{ArtifactStore, Document, load_document};
pub use crate::search::EvidenceIndex;

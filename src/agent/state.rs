//! Shared workflow state and the phase state machine.
//!
//! The orchestrator is the only writer. Agents get an `Arc` snapshot and
//! hand back a [`NamespaceDelta`], which is merged into the agent's own
//! namespace only.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::result::FinalResult;
use crate::core::{CohortDefinition, Namespace, NamespaceDelta};
use crate::error::AgentError;

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// State created, nothing dispatched.
    Init,
    /// Manager is analyzing the document.
    ManagerAnalyzing,
    /// One or more specialist rounds.
    SpecialistAnalyzing,
    /// Evidence verification (runs once).
    Verifying,
    /// Merging namespaces into the final artifacts.
    Aggregating,
    /// Terminal: finished.
    Done,
    /// Terminal: total provider outage.
    Failed,
}

impl Phase {
    /// Returns `true` for `Done` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether the state machine allows `self -> next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use Phase::{
            Aggregating, Done, Failed, Init, ManagerAnalyzing, SpecialistAnalyzing, Verifying,
        };
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed)
            | (Init, ManagerAnalyzing)
            | (ManagerAnalyzing | SpecialistAnalyzing, SpecialistAnalyzing | Verifying)
            | (Verifying, Aggregating)
            | (Aggregating, Done) => true,
            _ => false,
        }
    }

    /// Lowercase name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ManagerAnalyzing => "manager_analyzing",
            Self::SpecialistAnalyzing => "specialist_analyzing",
            Self::Verifying => "verifying",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one run.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    /// Full document text.
    pub document: Arc<str>,
    /// Sentence-segmented view, filled when the evidence index is built.
    pub sentences: Vec<String>,
    /// Contributions keyed by namespace.
    pub namespaces: BTreeMap<Namespace, NamespaceDelta>,
    /// Verbatim key sentences chosen by the manager.
    pub summary: String,
    /// Agent names in dispatch order.
    pub visited: Vec<String>,
    /// Manager and specialist invocations so far.
    pub iterations: usize,
    /// Recoverable problems collected during the run.
    pub warnings: Vec<String>,
    /// Set once the run reached `Done` or `Failed`.
    pub terminal: bool,
    /// Final artifacts, populated at the end.
    pub result: Option<FinalResult>,
    phase: Phase,
}

impl WorkflowState {
    /// Creates the state for `document`.
    #[must_use]
    pub fn new(document: impl Into<Arc<str>>) -> Self {
        Self {
            document: document.into(),
            sentences: Vec::new(),
            namespaces: BTreeMap::new(),
            summary: String::new(),
            visited: Vec::new(),
            iterations: 0,
            warnings: Vec::new(),
            terminal: false,
            result: None,
            phase: Phase::Init,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::IllegalTransition`] if the state machine does
    /// not allow the move; the phase is left unchanged.
    pub fn advance(&mut self, next: Phase) -> Result<(), AgentError> {
        if !self.phase.can_transition_to(next) {
            return Err(AgentError::IllegalTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.phase, to = %next, "workflow transition");
        self.phase = next;
        self.terminal = next.is_terminal();
        Ok(())
    }

    /// Records a dispatch of `agent`.
    pub fn record_visit(&mut self, agent: &str) {
        self.visited.push(agent.to_string());
        self.iterations += 1;
    }

    /// How many times `agent` has been dispatched.
    #[must_use]
    pub fn visits(&self, agent: &str) -> usize {
        self.visited.iter().filter(|v| *v == agent).count()
    }

    /// Adds a warning to the run log.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Merges `delta` into its own namespace.
    pub fn merge(&mut self, delta: NamespaceDelta) {
        match self.namespaces.get_mut(&delta.namespace) {
            Some(existing) => existing.absorb(delta),
            None => {
                self.namespaces.insert(delta.namespace, delta);
            }
        }
    }

    /// Contribution of `namespace`, if any.
    #[must_use]
    pub fn namespace(&self, namespace: Namespace) -> Option<&NamespaceDelta> {
        self.namespaces.get(&namespace)
    }

    /// Cohort themes proposed by the manager.
    #[must_use]
    pub fn themes(&self) -> &[CohortDefinition] {
        self.namespace(Namespace::Manager)
            .map_or(&[], |d| d.cohorts.as_slice())
    }
}

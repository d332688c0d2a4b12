//! Routing targets and dispatch budget.
//!
//! The model names the next agents in free text. Names are validated
//! against [`Specialist`]; anything unrecognized is a routing error and
//! the route falls back to the configured default order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::config::{RoutingConfig, WorkflowLimits};
use super::prompt::AgentRole;
use crate::core::text::normalize_key;
use crate::core::{CohortDefinition, Domain, Namespace};
use crate::error::AgentError;
use crate::search::tokenize;

/// Name the manager is logged under.
pub const MANAGER_NAME: &str = "ManagerAgent";

/// A specialist the orchestrator can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Specialist {
    /// Medications, dosing, treatment pathways.
    Drug,
    /// Conditions, diagnostic criteria, tests.
    Diagnosis,
}

impl Specialist {
    /// Every specialist, in default order.
    pub const ALL: [Self; 2] = [Self::Drug, Self::Diagnosis];

    /// Agent name used in routing output and the visit log.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Drug => "DrugAgent",
            Self::Diagnosis => "DiagnosisAgent",
        }
    }

    /// Namespace the specialist writes into.
    #[must_use]
    pub const fn namespace(self) -> Namespace {
        match self {
            Self::Drug => Namespace::Drug,
            Self::Diagnosis => Namespace::Diagnosis,
        }
    }

    /// Prompt role of the specialist.
    #[must_use]
    pub const fn role(self) -> AgentRole {
        match self {
            Self::Drug => AgentRole::Drug,
            Self::Diagnosis => AgentRole::Diagnosis,
        }
    }

    /// OMOP domains the specialist may emit entities in.
    #[must_use]
    pub const fn allowed_domains(self) -> &'static [Domain] {
        match self {
            Self::Drug => &[Domain::Drug, Domain::Device],
            Self::Diagnosis => &[
                Domain::Condition,
                Domain::Procedure,
                Domain::Measurement,
                Domain::Observation,
            ],
        }
    }

    /// Parses an agent name as written by a model.
    ///
    /// Case, separators and an `agent`/`specialist` suffix are ignored.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let key: String = name
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        let stem = key
            .strip_suffix("agent")
            .or_else(|| key.strip_suffix("specialist"))
            .unwrap_or(&key);
        match stem {
            "drug" | "medication" | "pharmacology" | "treatment" => Some(Self::Drug),
            "diagnosis" | "diagnostic" | "diagnoses" => Some(Self::Diagnosis),
            _ => None,
        }
    }
}

impl std::fmt::Display for Specialist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of the manager's `next_agents` list.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    /// Agent name as written by the model.
    pub name: String,
    /// Explicit salience, when the model gave one.
    pub salience: Option<f64>,
}

impl RouteRequest {
    /// Request without salience.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            salience: None,
        }
    }
}

/// Resolved dispatch order for the first specialist round.
#[derive(Debug, Clone, Default)]
pub struct Route {
    /// Specialists to run, in order.
    pub specialists: Vec<Specialist>,
    /// The default order was used instead of the manager's choice.
    pub fallback: bool,
    /// Unrecognized names.
    pub errors: Vec<AgentError>,
}

/// Counts how often `vocabulary` occurs in the cohort themes.
///
/// Single-word terms match any token starting with the term, so `statin`
/// also counts `statins`. Multi-word terms match as substrings of the
/// normalized theme text.
#[must_use]
pub fn vocabulary_frequency(themes: &[CohortDefinition], vocabulary: &[String]) -> usize {
    let text = themes
        .iter()
        .map(|t| format!("{} {}", t.subject, t.details))
        .collect::<Vec<_>>()
        .join(" ");
    let tokens = tokenize(&text);
    let normalized = normalize_key(&text);

    vocabulary
        .iter()
        .map(|term| normalize_key(term))
        .filter(|term| !term.is_empty())
        .map(|term| {
            if term.contains(' ') {
                normalized.matches(term.as_str()).count()
            } else {
                tokens.iter().filter(|t| t.starts_with(term.as_str())).count()
            }
        })
        .sum()
}

/// Turns the manager's requests into a validated specialist order.
///
/// Known names are de-duplicated (keeping the highest salience) and sorted
/// by salience, then by vocabulary frequency in `themes`, then by the
/// default order. Any unknown name makes the whole route fall back to
/// `routing.default_order`.
#[must_use]
pub fn resolve_route(
    requests: &[RouteRequest],
    themes: &[CohortDefinition],
    routing: &RoutingConfig,
) -> Route {
    let mut chosen: HashMap<Specialist, f64> = HashMap::new();
    let mut errors = Vec::new();

    for request in requests {
        match Specialist::parse(&request.name) {
            Some(specialist) => {
                let salience = request.salience.unwrap_or(0.0);
                chosen
                    .entry(specialist)
                    .and_modify(|s| *s = s.max(salience))
                    .or_insert(salience);
            }
            None => {
                warn!(name = %request.name, "unknown routing target");
                errors.push(AgentError::Routing {
                    name: request.name.clone(),
                });
            }
        }
    }

    if !errors.is_empty() {
        return Route {
            specialists: routing.default_order.clone(),
            fallback: true,
            errors,
        };
    }

    let default_rank = |s: Specialist| {
        routing
            .default_order
            .iter()
            .position(|d| *d == s)
            .unwrap_or(usize::MAX)
    };
    let mut ranked: Vec<(Specialist, f64, usize)> = chosen
        .into_iter()
        .map(|(s, salience)| (s, salience, vocabulary_frequency(themes, routing.vocabulary(s))))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| default_rank(a.0).cmp(&default_rank(b.0)))
    });

    Route {
        specialists: ranked.into_iter().map(|(s, _, _)| s).collect(),
        fallback: false,
        errors,
    }
}

/// Checks whether one more dispatch of `node` fits the run's bounds.
///
/// `prior_visits` counts earlier dispatches of the node and `iterations`
/// counts every manager and specialist dispatch so far.
///
/// # Errors
///
/// - [`AgentError::IterationLimitExceeded`] when the global cap is reached.
/// - [`AgentError::RevisitLimitExceeded`] when the node already ran
///   `1 + max_revisits` times.
pub fn check_budget(
    node: &str,
    prior_visits: usize,
    iterations: usize,
    limits: &WorkflowLimits,
) -> Result<(), AgentError> {
    if iterations >= limits.max_iterations {
        return Err(AgentError::IterationLimitExceeded {
            limit: limits.max_iterations,
        });
    }
    if prior_visits > limits.max_revisits {
        return Err(AgentError::RevisitLimitExceeded {
            node: node.to_string(),
            limit: limits.max_revisits,
        });
    }
    Ok(())
}

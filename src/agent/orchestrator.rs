//! Orchestrator for the extraction workflow.
//!
//! Drives the state machine for one document:
//!
//! ```text
//! Init → ManagerAnalyzing → {SpecialistAnalyzing}* → Verifying → Aggregating → Done
//!                                                                          ↘ Failed
//! ```
//!
//! The orchestrator is the only writer of [`WorkflowState`]. Specialists of
//! one round run as spawned tasks over an `Arc` snapshot and every task is
//! joined before their deltas are merged.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aggregator::aggregate;
use super::config::AgentConfig;
use super::gateway::Gateway;
use super::manager::ManagerAgent;
use super::prompt::{AgentRole, PromptSet};
use super::provider::LlmProvider;
use super::result::{FinalResult, RunStatus, VerificationOutcome, VerificationRecord};
use super::routing::{MANAGER_NAME, Route, Specialist, check_budget, resolve_route};
use super::specialist::{DomainScope, SpecialistAgent, SpecialistOutput};
use super::state::{Phase, WorkflowState};
use super::validate::{SanitizeReport, rejections, sanitize};
use super::verifier::{Candidate, EvidenceVerifier};
use crate::core::{Namespace, VerbatimText, Verification};
use crate::error::AgentError;
use crate::search::EvidenceIndex;

/// A specialist dispatch after validation and the optional repair turn.
#[derive(Debug)]
struct SpecialistRun {
    output: SpecialistOutput,
    repaired: bool,
    sanitized: SanitizeReport,
    repair_error: Option<AgentError>,
}

/// Why dispatching stopped early.
#[derive(Debug, Default)]
struct Interruptions {
    cancelled: bool,
    limited: bool,
    outage: Option<String>,
}

impl Interruptions {
    fn halted(&self) -> bool {
        self.cancelled || self.limited || self.outage.is_some()
    }

    /// Records a fatal error; returns `false` for anything else.
    fn absorb(&mut self, err: &AgentError) -> bool {
        match err {
            AgentError::Cancelled => self.cancelled = true,
            AgentError::ProviderUnavailable { .. } => {
                if self.outage.is_none() {
                    self.outage = Some(err.to_string());
                }
            }
            _ => return false,
        }
        true
    }

    const fn status(&self) -> RunStatus {
        if self.outage.is_some() {
            RunStatus::Failed
        } else if self.cancelled || self.limited {
            RunStatus::Incomplete
        } else {
            RunStatus::Complete
        }
    }
}

/// Orchestrates the extraction workflow.
///
/// Holds the provider, configuration and prompts; each call to
/// [`Orchestrator::run`] is an independent run with its own state.
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    config: AgentConfig,
    prompts: Arc<PromptSet>,
}

impl Orchestrator {
    /// Creates a new orchestrator with the given provider and configuration.
    ///
    /// Loads prompt templates from the directory specified in
    /// [`AgentConfig::prompt_dir`], falling back to compiled-in defaults.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, config: AgentConfig) -> Self {
        let prompts = PromptSet::load(config.prompt_dir.as_deref());
        Self::with_prompts(provider, config, prompts)
    }

    /// Creates an orchestrator with an explicit prompt set.
    #[must_use]
    pub fn with_prompts(
        provider: Arc<dyn LlmProvider>,
        config: AgentConfig,
        prompts: PromptSet,
    ) -> Self {
        Self {
            provider,
            config,
            prompts: Arc::new(prompts),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Runs the workflow over `document`.
    ///
    /// Never fails: problems are recorded as warnings and reflected in the
    /// status of the returned state's [`FinalResult`].
    #[allow(clippy::too_many_lines)]
    pub async fn run(&self, document: &str, cancel: CancellationToken) -> WorkflowState {
        let start = Instant::now();
        let gateway = Gateway::new(Arc::clone(&self.provider), &self.config, cancel);

        let mut state = WorkflowState::new(document);
        let index = EvidenceIndex::build(document);
        state.sentences = index.sentences().to_vec();
        let verbatim = Arc::new(VerbatimText::new(document));
        let mut stops = Interruptions::default();

        info!(
            provider = gateway.provider_name(),
            chars = document.len(),
            sentences = state.sentences.len(),
            "workflow started"
        );

        // Manager
        transition(&mut state, Phase::ManagerAnalyzing);
        let route = self
            .run_manager(&gateway, &mut state, &verbatim, &mut stops)
            .await;
        for err in &route.errors {
            state.warn(err.to_string());
        }
        if route.fallback {
            state.warn(format!(
                "routing fell back to the default order: {}",
                join_names(&route.specialists)
            ));
        }

        // Specialist rounds
        let mut pending = route.specialists;
        while !pending.is_empty() && !stops.halted() {
            let round = self.schedule(&gateway, &mut state, pending, &mut stops);
            if round.is_empty() {
                break;
            }

            transition(&mut state, Phase::SpecialistAnalyzing);
            for specialist in &round {
                state.record_visit(specialist.name());
            }
            info!(
                round = %join_names(&round),
                iterations = state.iterations,
                "dispatching specialists"
            );

            let snapshot = Arc::new(state.clone());
            let outcomes = self
                .dispatch(&gateway, snapshot, Arc::clone(&verbatim), &round)
                .await;

            pending = Vec::new();
            for (specialist, outcome) in outcomes {
                match outcome {
                    Ok(run) => {
                        for next in record_specialist(&mut state, &mut stops, specialist, run) {
                            if !pending.contains(&next) {
                                pending.push(next);
                            }
                        }
                    }
                    Err(e) => {
                        if !stops.absorb(&e) {
                            warn!(agent = specialist.name(), error = %e, "specialist failed");
                            state.warn(format!("{} contributed nothing: {e}", specialist.name()));
                        }
                    }
                }
            }
        }

        // Verification runs once, with whatever the specialists produced.
        transition(&mut state, Phase::Verifying);
        let verification = self
            .run_verifier(&gateway, &index, &mut state, &mut stops)
            .await;

        // Aggregation
        transition(&mut state, Phase::Aggregating);
        let merged = aggregate(state.namespaces.values());
        if merged.dangling_relations > 0 {
            state.warn(format!(
                "dropped {} relation(s) with a dangling endpoint",
                merged.dangling_relations
            ));
        }

        let status = stops.status();
        if stops.cancelled {
            state.warn(AgentError::Cancelled.to_string());
        }
        let result = FinalResult {
            status,
            cohorts: merged.cohorts,
            knowledge_graph: merged.knowledge_graph,
            pathways: merged.pathways,
            verification,
            failure: stops.outage,
            warnings: state.warnings.clone(),
            visited: state.visited.clone(),
            iterations: state.iterations,
            total_tokens: gateway.total_tokens(),
            provider_calls: gateway.attempts(),
            elapsed: start.elapsed(),
        };
        info!(
            status = %status,
            main_cohorts = result.cohorts.main_cohorts.len(),
            sub_cohorts = result.sub_cohort_count(),
            entities = result.knowledge_graph.entities.len(),
            relations = result.knowledge_graph.relations.len(),
            warnings = result.warnings.len(),
            tokens = result.total_tokens,
            elapsed_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
            "workflow finished"
        );

        state.result = Some(result);
        transition(
            &mut state,
            if status == RunStatus::Failed {
                Phase::Failed
            } else {
                Phase::Done
            },
        );
        state
    }

    async fn run_manager(
        &self,
        gateway: &Gateway,
        state: &mut WorkflowState,
        document: &VerbatimText,
        stops: &mut Interruptions,
    ) -> Route {
        let default_route = || Route {
            specialists: self.config.routing.default_order.clone(),
            fallback: true,
            errors: Vec::new(),
        };

        if gateway.is_cancelled() {
            stops.cancelled = true;
            return Route::default();
        }
        if let Err(e) = check_budget(
            MANAGER_NAME,
            state.visits(MANAGER_NAME),
            state.iterations,
            &self.config.limits,
        ) {
            warn!(error = %e, "manager not dispatched");
            state.warn(e.to_string());
            stops.limited = true;
            return Route::default();
        }

        state.record_visit(MANAGER_NAME);
        let manager = ManagerAgent::new(&self.config, self.prompts.get(AgentRole::Manager));
        match manager.analyze(gateway, &state.document).await {
            Ok(mut output) => {
                let sanitized = sanitize(&mut output.delta, document);
                state.summary = output.summary;
                state.warnings.extend(output.warnings);
                warn_sanitized(state, MANAGER_NAME, &sanitized);
                state.merge(output.delta);
                let route =
                    resolve_route(&output.next_agents, state.themes(), &self.config.routing);
                debug!(
                    route = %join_names(&route.specialists),
                    fallback = route.fallback,
                    "manager routing resolved"
                );
                route
            }
            Err(e) if stops.absorb(&e) => {
                warn!(error = %e, "manager interrupted");
                Route::default()
            }
            Err(e) => {
                warn!(error = %e, "manager failed; running the default specialists");
                state.warn(format!("manager contributed an empty draft: {e}"));
                default_route()
            }
        }
    }

    /// Picks the specialists of the next round that fit the bounds.
    ///
    /// A limit error stops all further dispatch.
    fn schedule(
        &self,
        gateway: &Gateway,
        state: &mut WorkflowState,
        pending: Vec<Specialist>,
        stops: &mut Interruptions,
    ) -> Vec<Specialist> {
        let mut round: Vec<Specialist> = Vec::new();
        for specialist in pending {
            if round.contains(&specialist) {
                continue;
            }
            if gateway.is_cancelled() {
                stops.cancelled = true;
                break;
            }
            let budget = check_budget(
                specialist.name(),
                state.visits(specialist.name()),
                state.iterations + round.len(),
                &self.config.limits,
            );
            if let Err(e) = budget {
                warn!(agent = specialist.name(), error = %e, "dispatch stopped");
                stops.limited = true;
                state.warn(e.to_string());
                break;
            }
            round.push(specialist);
        }
        round
    }

    async fn dispatch(
        &self,
        gateway: &Gateway,
        snapshot: Arc<WorkflowState>,
        verbatim: Arc<VerbatimText>,
        round: &[Specialist],
    ) -> Vec<(Specialist, Result<SpecialistRun, AgentError>)> {
        if !self.config.parallel_specialists || round.len() == 1 {
            let mut results = Vec::with_capacity(round.len());
            for &specialist in round {
                let outcome = if gateway.is_cancelled() {
                    Err(AgentError::Cancelled)
                } else {
                    let agent = SpecialistAgent::new(
                        specialist,
                        &self.config,
                        self.prompts.get(specialist.role()),
                    );
                    let scope = DomainScope::from_state(specialist, &snapshot);
                    run_specialist(&agent, gateway, Arc::clone(&snapshot), &scope, &verbatim).await
                };
                results.push((specialist, outcome));
            }
            return results;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut handles = Vec::with_capacity(round.len());

        for &specialist in round {
            let sem = Arc::clone(&semaphore);
            let gw = gateway.clone();
            let cfg = self.config.clone();
            let prompts = Arc::clone(&self.prompts);
            let snap = Arc::clone(&snapshot);
            let verbatim = Arc::clone(&verbatim);

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await.map_err(|e| AgentError::Orchestration {
                    message: format!("semaphore acquire failed: {e}"),
                })?;
                if gw.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
                let agent = SpecialistAgent::new(specialist, &cfg, prompts.get(specialist.role()));
                let scope = DomainScope::from_state(specialist, &snap);
                run_specialist(&agent, &gw, snap, &scope, &verbatim).await
            });
            handles.push((specialist, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (specialist, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(AgentError::Orchestration {
                    message: format!("task join failed: {e}"),
                }),
            };
            results.push((specialist, outcome));
        }

        results
    }

    async fn run_verifier(
        &self,
        gateway: &Gateway,
        index: &EvidenceIndex,
        state: &mut WorkflowState,
        stops: &mut Interruptions,
    ) -> Vec<VerificationRecord> {
        let verifier = EvidenceVerifier::new(&self.config, &self.prompts);
        let report = {
            let candidates: Vec<Candidate<'_>> = state
                .namespaces
                .iter()
                .flat_map(|(namespace, delta)| {
                    delta.cohorts.iter().enumerate().flat_map(move |(ci, cohort)| {
                        cohort
                            .sub_cohorts
                            .iter()
                            .enumerate()
                            .map(move |(si, sub)| Candidate {
                                namespace: *namespace,
                                cohort_index: ci,
                                sub_index: si,
                                cohort_subject: &cohort.subject,
                                sub_cohort: sub,
                            })
                    })
                })
                .collect();
            verifier.verify(gateway, index, &candidates).await
        };

        for err in &report.errors {
            stops.absorb(err);
            if !matches!(err, AgentError::Cancelled) {
                state.warn(format!("verification degraded to lexical scoring: {err}"));
            }
        }
        for err in report.low_confidence_errors() {
            state.warn(err.to_string());
        }

        let mut dropped: Vec<(Namespace, usize, usize)> = Vec::new();
        for scored in &report.scored {
            let record = &scored.record;
            if let Some(sub) = state
                .namespaces
                .get_mut(&scored.namespace)
                .and_then(|d| d.cohorts.get_mut(scored.cohort_index))
                .and_then(|c| c.sub_cohorts.get_mut(scored.sub_index))
            {
                sub.verification = Some(Verification {
                    confidence: record.confidence,
                    best_evidence: record.best_evidence,
                    low_confidence: record.outcome == VerificationOutcome::LowConfidence,
                });
            }
            if record.outcome == VerificationOutcome::Dropped {
                dropped.push((scored.namespace, scored.cohort_index, scored.sub_index));
                state.warn(format!(
                    "sub-cohort '{}' dropped: best evidence {:.2} below floor {:.2}",
                    record.sub_cohort_subject,
                    record.best_evidence,
                    self.config.verification.evidence_floor
                ));
            }
        }

        // Highest indices first so earlier positions stay valid.
        dropped.sort_unstable_by(|a, b| b.cmp(a));
        for (namespace, ci, si) in dropped {
            if let Some(cohort) = state
                .namespaces
                .get_mut(&namespace)
                .and_then(|d| d.cohorts.get_mut(ci))
                && si < cohort.sub_cohorts.len()
            {
                cohort.sub_cohorts.remove(si);
            }
        }

        report.scored.into_iter().map(|s| s.record).collect()
    }
}

/// Records what [`sanitize`] removed from an agent's delta.
fn warn_sanitized(state: &mut WorkflowState, name: &str, sanitized: &SanitizeReport) {
    if sanitized.rekeyed > 0 {
        state.warn(format!("{name} re-keyed {} duplicate entity id(s)", sanitized.rekeyed));
    }
    if sanitized.unsupported_relations > 0 {
        state.warn(format!(
            "{name} gave {} relation(s) without verbatim evidence; removed",
            sanitized.unsupported_relations
        ));
    }
    if sanitized.removed_sentences > 0 {
        state.warn(format!(
            "{name} cited {} source sentence(s) not found verbatim; removed",
            sanitized.removed_sentences
        ));
    }
    for rejection in &sanitized.dropped {
        state.warn(format!("{name} dropped {rejection}"));
    }
}

/// Moves `state` to `next`, recording a refused transition as a warning.
fn transition(state: &mut WorkflowState, next: Phase) {
    if let Err(e) = state.advance(next) {
        warn!(error = %e, "workflow transition refused");
        state.warn(e.to_string());
    }
}

fn join_names(specialists: &[Specialist]) -> String {
    specialists
        .iter()
        .map(|s| s.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs one specialist, validates its delta, and re-prompts once with the
/// rejection reasons if any sub-cohort is invalid.
async fn run_specialist(
    agent: &SpecialistAgent,
    gateway: &Gateway,
    snapshot: Arc<WorkflowState>,
    scope: &DomainScope,
    document: &VerbatimText,
) -> Result<SpecialistRun, AgentError> {
    let mut output = agent.analyze(gateway, snapshot, scope).await?;
    let mut repaired = false;
    let mut repair_error = None;

    let rejected = rejections(&output.delta, document);
    if !rejected.is_empty() {
        let reasons: Vec<String> = rejected.iter().map(ToString::to_string).collect();
        debug!(
            agent = agent.specialist().name(),
            rejected = reasons.len(),
            "re-prompting with validation errors"
        );
        match agent
            .repair(gateway, std::mem::take(&mut output.messages), &reasons)
            .await
        {
            Ok(mut fixed) => {
                let mut warnings = std::mem::take(&mut output.warnings);
                warnings.append(&mut fixed.warnings);
                fixed.warnings = warnings;
                output = fixed;
                repaired = true;
            }
            Err(e) => {
                warn!(agent = agent.specialist().name(), error = %e, "repair turn failed");
                repair_error = Some(e);
            }
        }
    }

    let sanitized = sanitize(&mut output.delta, document);
    Ok(SpecialistRun {
        output,
        repaired,
        sanitized,
        repair_error,
    })
}

/// Merges a specialist's delta and returns the hand-off targets.
fn record_specialist(
    state: &mut WorkflowState,
    stops: &mut Interruptions,
    specialist: Specialist,
    run: SpecialistRun,
) -> Vec<Specialist> {
    let name = specialist.name();
    let SpecialistRun {
        output,
        repaired,
        sanitized,
        repair_error,
    } = run;

    state.warnings.extend(output.warnings);
    if let Some(e) = repair_error
        && !stops.absorb(&e)
    {
        state.warn(format!("{name} repair turn failed: {e}"));
    }
    if repaired {
        debug!(agent = name, "specialist output repaired");
    }
    warn_sanitized(state, name, &sanitized);

    debug_assert_eq!(output.delta.namespace, specialist.namespace());
    state.merge(output.delta);

    let mut next = Vec::new();
    for target in output.handoff {
        match Specialist::parse(&target) {
            Some(s) => {
                debug!(from = name, to = s.name(), "hand-off requested");
                next.push(s);
            }
            None => {
                let err = AgentError::Routing { name: target };
                warn!(agent = name, error = %err, "hand-off ignored");
                state.warn(err.to_string());
            }
        }
    }
    next
}

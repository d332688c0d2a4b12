//! Domain specialist agents.
//!
//! A specialist reads a snapshot of the workflow state and writes a delta
//! confined to its own namespace. Entities outside the specialist's OMOP
//! domains are discarded at parse time.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::config::AgentConfig;
use super::draft::{DraftNotes, parse_cohorts, parse_entities, parse_pathways, parse_relations};
use super::gateway::Gateway;
use super::message::{ChatMessage, user_message};
use super::parse::string_list;
use super::prompt::{PromptSpec, build_repair_prompt, build_specialist_prompt};
use super::reprompt::{Reprompted, continue_json, request_json};
use super::routing::Specialist;
use super::state::WorkflowState;
use super::traits::Agent;
use crate::core::{CohortDefinition, Namespace, NamespaceDelta};
use crate::error::AgentError;

/// What a specialist is asked to cover.
#[derive(Debug, Clone)]
pub struct DomainScope {
    /// The specialist.
    pub specialist: Specialist,
    /// Namespace it writes into.
    pub namespace: Namespace,
    /// Manager themes.
    pub themes: Vec<CohortDefinition>,
    /// Manager summary.
    pub summary: String,
}

impl DomainScope {
    /// Scope for `specialist` built from the current state.
    #[must_use]
    pub fn from_state(specialist: Specialist, state: &WorkflowState) -> Self {
        Self {
            specialist,
            namespace: specialist.namespace(),
            themes: state.themes().to_vec(),
            summary: state.summary.clone(),
        }
    }
}

/// Parsed specialist output.
#[derive(Debug, Clone)]
pub struct SpecialistOutput {
    /// Contribution under the specialist's namespace.
    pub delta: NamespaceDelta,
    /// Agent names requested for a further round.
    pub handoff: Vec<String>,
    /// Recoverable problems found while parsing.
    pub warnings: Vec<String>,
    /// Conversation that produced the delta, for a repair turn.
    pub messages: Vec<ChatMessage>,
    /// Model calls made.
    pub attempts: u32,
}

/// Agent for one [`Specialist`].
pub struct SpecialistAgent {
    specialist: Specialist,
    model: String,
    max_tokens: u32,
    system_prompt: String,
    required_fields: &'static [&'static str],
    max_reprompts: u32,
}

impl SpecialistAgent {
    /// Creates the agent for `specialist` with its prompt spec.
    #[must_use]
    pub fn new(specialist: Specialist, config: &AgentConfig, spec: &PromptSpec) -> Self {
        Self {
            specialist,
            model: config.specialist_model.clone(),
            max_tokens: config.specialist_max_tokens,
            system_prompt: spec.template.clone(),
            required_fields: spec.required_output_fields,
            max_reprompts: spec.max_reprompts,
        }
    }

    /// The specialist this agent plays.
    #[must_use]
    pub const fn specialist(&self) -> Specialist {
        self.specialist
    }

    /// Analyzes the snapshot's document within `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MalformedOutput`] once the re-prompts are
    /// exhausted, or a gateway error.
    pub async fn analyze(
        &self,
        gateway: &Gateway,
        snapshot: Arc<WorkflowState>,
        scope: &DomainScope,
    ) -> Result<SpecialistOutput, AgentError> {
        debug_assert_eq!(scope.specialist, self.specialist);
        let domains: Vec<&str> = self
            .specialist
            .allowed_domains()
            .iter()
            .map(|d| d.as_str())
            .collect();
        let user_msg =
            build_specialist_prompt(&snapshot.document, &scope.themes, &scope.summary, &domains);

        let reprompted = request_json(
            self,
            gateway,
            &user_msg,
            self.required_fields,
            self.max_reprompts,
            |value| Ok(self.parse_output(value)),
        )
        .await?;
        Ok(self.finish(reprompted))
    }

    /// Asks once more with the validation `rejections` of the previous answer.
    ///
    /// `messages` is the conversation returned with that answer.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MalformedOutput`] if the repaired answer cannot
    /// be parsed, or a gateway error.
    pub async fn repair(
        &self,
        gateway: &Gateway,
        mut messages: Vec<ChatMessage>,
        rejections: &[String],
    ) -> Result<SpecialistOutput, AgentError> {
        messages.push(user_message(&build_repair_prompt(
            rejections,
            self.required_fields,
        )));
        let reprompted = continue_json(
            self,
            gateway,
            messages,
            self.required_fields,
            0,
            |value| Ok(self.parse_output(value)),
        )
        .await?;
        Ok(self.finish(reprompted))
    }

    fn finish(&self, reprompted: Reprompted<SpecialistOutput>) -> SpecialistOutput {
        let Reprompted {
            value: mut output,
            messages,
            attempts,
        } = reprompted;
        output.messages = messages;
        output.attempts = attempts;
        info!(
            agent = self.name(),
            entities = output.delta.entities.len(),
            relations = output.delta.relations.len(),
            sub_cohorts = output.delta.sub_cohort_count(),
            pathways = output.delta.pathways.len(),
            "specialist analysis complete"
        );
        output
    }

    fn parse_output(&self, value: &Value) -> SpecialistOutput {
        let mut notes = DraftNotes::default();
        let mut delta = NamespaceDelta::empty(self.specialist.namespace());

        let allowed = self.specialist.allowed_domains();
        let (kept, discarded): (Vec<_>, Vec<_>) = parse_entities(value, &mut notes)
            .into_iter()
            .partition(|e| allowed.contains(&e.domain));
        if !discarded.is_empty() {
            debug!(
                agent = self.name(),
                discarded = discarded.len(),
                "entities outside the allowed domains discarded"
            );
            notes.notes.push(format!(
                "{} discarded {} entit{} outside its domains: {}",
                self.name(),
                discarded.len(),
                if discarded.len() == 1 { "y" } else { "ies" },
                discarded
                    .iter()
                    .map(|e| format!("{} ({})", e.concept_name, e.domain))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        delta.entities = kept;
        delta.relations = parse_relations(value, &mut notes);
        delta.cohorts = parse_cohorts(value, &mut notes);
        delta.pathways = parse_pathways(value);

        let handoff = string_list(value, "handoff");

        SpecialistOutput {
            delta,
            handoff,
            warnings: notes.notes,
            messages: Vec::new(),
            attempts: 0,
        }
    }
}

#[async_trait]
impl Agent for SpecialistAgent {
    fn name(&self) -> &'static str {
        self.specialist.name()
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

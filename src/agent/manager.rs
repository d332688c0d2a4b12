//! Manager agent.
//!
//! Reads the document once, proposes the cohort themes, drafts entities
//! and relations, writes a verbatim summary, and names the specialists to
//! run next.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::config::{AgentConfig, WorkflowLimits};
use super::draft::{DraftNotes, parse_entities, parse_next_agents, parse_relations, parse_themes};
use super::gateway::Gateway;
use super::prompt::{PromptSpec, build_manager_prompt};
use super::reprompt::request_json;
use super::routing::{MANAGER_NAME, RouteRequest};
use super::traits::Agent;
use crate::core::text::{VerbatimText, split_sentences, truncate_at_sentence};
use crate::core::{CohortDefinition, Namespace, NamespaceDelta};
use crate::error::AgentError;

/// Parsed manager output.
#[derive(Debug, Clone)]
pub struct ManagerOutput {
    /// Themes, entity and relation drafts under the manager namespace.
    pub delta: NamespaceDelta,
    /// Verbatim key sentences.
    pub summary: String,
    /// Requested specialists.
    pub next_agents: Vec<RouteRequest>,
    /// Recoverable problems found while parsing.
    pub warnings: Vec<String>,
    /// Model calls made.
    pub attempts: u32,
}

impl ManagerOutput {
    /// Cohort themes.
    #[must_use]
    pub fn themes(&self) -> &[CohortDefinition] {
        &self.delta.cohorts
    }
}

/// Agent that plans the extraction.
pub struct ManagerAgent {
    model: String,
    max_tokens: u32,
    system_prompt: String,
    required_fields: &'static [&'static str],
    max_reprompts: u32,
    max_chars: Option<usize>,
    limits: WorkflowLimits,
}

impl ManagerAgent {
    /// Creates a manager from the run configuration and its prompt spec.
    #[must_use]
    pub fn new(config: &AgentConfig, spec: &PromptSpec) -> Self {
        Self {
            model: config.manager_model.clone(),
            max_tokens: config.manager_max_tokens,
            system_prompt: spec.template.clone(),
            required_fields: spec.required_output_fields,
            max_reprompts: spec.max_reprompts,
            max_chars: config.max_manager_chars,
            limits: config.limits,
        }
    }

    /// Runs the manager over `document`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MalformedOutput`] once the re-prompts are
    /// exhausted, or a gateway error.
    pub async fn analyze(
        &self,
        gateway: &Gateway,
        document: &str,
    ) -> Result<ManagerOutput, AgentError> {
        let input = match self.max_chars {
            Some(max) => truncate_at_sentence(document, max),
            None => document,
        };
        if input.len() < document.len() {
            debug!(
                original = document.len(),
                truncated = input.len(),
                "manager input truncated at sentence boundary"
            );
        }

        let verbatim = VerbatimText::new(document);
        let user_msg = build_manager_prompt(input, self.limits.min_themes, self.limits.max_themes);
        let reprompted = request_json(
            self,
            gateway,
            &user_msg,
            self.required_fields,
            self.max_reprompts,
            |value| self.parse_output(value, &verbatim),
        )
        .await?;

        let mut output = reprompted.value;
        output.attempts = reprompted.attempts;
        info!(
            themes = output.themes().len(),
            entities = output.delta.entities.len(),
            relations = output.delta.relations.len(),
            next_agents = output.next_agents.len(),
            "manager analysis complete"
        );
        Ok(output)
    }

    fn parse_output(&self, value: &Value, document: &VerbatimText) -> Result<ManagerOutput, Vec<String>> {
        let Some(next_agents) = parse_next_agents(value) else {
            return Err(vec!["next_agents must be a list of agent names".to_string()]);
        };

        let mut themes = parse_themes(value);
        if themes.is_empty() {
            return Err(vec!["themes must contain at least one cohort theme".to_string()]);
        }

        let mut warnings = Vec::new();
        if themes.len() > self.limits.max_themes {
            warnings.push(format!(
                "manager proposed {} themes; keeping the first {}",
                themes.len(),
                self.limits.max_themes
            ));
            themes.truncate(self.limits.max_themes);
        } else if themes.len() < self.limits.min_themes {
            warnings.push(format!(
                "manager proposed {} themes; expected at least {}",
                themes.len(),
                self.limits.min_themes
            ));
        }

        let mut notes = DraftNotes::default();
        let mut delta = NamespaceDelta::empty(Namespace::Manager);
        delta.entities = parse_entities(value, &mut notes);
        delta.relations = parse_relations(value, &mut notes);
        delta.cohorts = themes;
        warnings.extend(notes.notes);

        let (summary, dropped) = verbatim_summary(
            &super::parse::str_field(value, "summary").unwrap_or_default(),
            document,
        );
        if dropped > 0 {
            warnings.push(format!(
                "dropped {dropped} summary sentence(s) not found verbatim in the document"
            ));
        }

        Ok(ManagerOutput {
            delta,
            summary,
            next_agents,
            warnings,
            attempts: 0,
        })
    }
}

/// Keeps the summary sentences that occur verbatim in the document.
///
/// Returns the kept summary and the number of dropped sentences.
#[must_use]
pub fn verbatim_summary(summary: &str, document: &VerbatimText) -> (String, usize) {
    let sentences = split_sentences(summary);
    let total = sentences.len();
    let kept: Vec<String> = sentences
        .into_iter()
        .filter(|s| document.contains(s))
        .collect();
    let dropped = total - kept.len();
    (kept.join(" "), dropped)
}

#[async_trait]
impl Agent for ManagerAgent {
    fn name(&self) -> &'static str {
        MANAGER_NAME
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

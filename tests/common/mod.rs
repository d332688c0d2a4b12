//! Shared fixtures for integration tests: a scripted provider that answers
//! by agent role, and a small lipid guideline.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use guideline_kg::agent::message::{ChatRequest, ChatResponse, TokenUsage};
use guideline_kg::agent::{AgentConfig, LlmProvider, Orchestrator, PromptSet};
use guideline_kg::error::AgentError;
use regex::Regex;

pub const GUIDELINE: &str = "Patients with LDL-C ≥190mg/dL should receive high-intensity statin therapy.

Atorvastatin 40-80 mg daily is a high-intensity statin.

Reassess lipids after 4-12 weeks of statin therapy.

Type 2 diabetes is diagnosed by HbA1c ≥6.5%.";

pub const STATIN_SENTENCE: &str =
    "Patients with LDL-C ≥190mg/dL should receive high-intensity statin therapy.";
pub const DIABETES_SENTENCE: &str = "Type 2 diabetes is diagnosed by HbA1c ≥6.5%.";

/// Which agent a request came from, read off its system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caller {
    Manager,
    Drug,
    Diagnosis,
    Questions,
    Judge,
}

impl Caller {
    fn detect(request: &ChatRequest) -> Self {
        let system = request
            .messages
            .first()
            .map_or("", |m| m.content.as_str());
        if system.starts_with("You are the manager") {
            Self::Manager
        } else if system.starts_with("You are a drug specialist") {
            Self::Drug
        } else if system.starts_with("You are a diagnosis specialist") {
            Self::Diagnosis
        } else if system.starts_with("You write verification questions") {
            Self::Questions
        } else {
            Self::Judge
        }
    }
}

/// What the provider does for one call.
pub enum Reply {
    Json(String),
    /// Never answers; the gateway times out.
    Hang,
    Error(AgentError),
}

type Handler = dyn Fn(Caller, usize, &ChatRequest) -> Reply + Send + Sync;

/// Provider driven by a closure of `(caller, nth call for that caller, request)`.
pub struct ScriptedProvider {
    handler: Box<Handler>,
    calls: Mutex<Vec<Caller>>,
}

impl ScriptedProvider {
    pub fn new(
        handler: impl Fn(Caller, usize, &ChatRequest) -> Reply + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self, caller: Caller) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == caller)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let caller = Caller::detect(request);
        let nth = {
            let mut calls = self.calls.lock().unwrap();
            let nth = calls.iter().filter(|c| **c == caller).count();
            calls.push(caller);
            nth
        };
        match (self.handler)(caller, nth, request) {
            Reply::Json(content) => Ok(ChatResponse {
                content,
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 20,
                    total_tokens: 120,
                },
                finish_reason: Some("stop".to_string()),
            }),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(AgentError::TransientProvider {
                    message: "hung".to_string(),
                    timed_out: true,
                })
            }
            Reply::Error(e) => Err(e),
        }
    }
}

pub fn config() -> AgentConfig {
    config_builder().build().unwrap()
}

pub fn config_builder() -> guideline_kg::agent::AgentConfigBuilder {
    AgentConfig::builder()
        .api_key("test-key")
        .timeout(Duration::from_secs(5))
        .max_retries(3)
        .retry_base_delay(Duration::from_millis(10))
}

pub fn orchestrator(provider: &Arc<ScriptedProvider>, config: AgentConfig) -> Orchestrator {
    let provider: Arc<dyn LlmProvider> = provider.clone();
    Orchestrator::with_prompts(provider, config, PromptSet::defaults())
}

pub fn manager_json(next_agents: &str) -> String {
    format!(
        r#"{{
  "themes": [
    {{"subject": "Statin therapy for severe hypercholesterolemia", "details": "Who receives high-intensity statins"}},
    {{"subject": "Lipid monitoring", "details": "Follow-up testing"}},
    {{"subject": "Diabetes diagnosis", "details": "Diagnostic thresholds"}}
  ],
  "entities": [
    {{"id": "m1", "concept_name": "Hypercholesterolemia", "domain": "condition", "attributes": {{"threshold": "LDL-C ≥190mg/dL"}}}}
  ],
  "relations": [],
  "summary": "{STATIN_SENTENCE}",
  "next_agents": {next_agents}
}}"#
    )
}

pub fn drug_json(inclusion: &str, handoff: &str) -> String {
    format!(
        r#"```json
{{
  "entities": [
    {{"id": "d1", "concept_name": "Atorvastatin", "domain": "drug", "attributes": {{"dose": "40-80", "unit": "mg"}}}},
    {{"id": "d2", "concept_name": "LDL cholesterol", "domain": "measurement"}}
  ],
  "relations": [
    {{"source": "d1", "target": "Hypercholesterolemia", "relation_name": "treats", "evidence_text": "{STATIN_SENTENCE}", "certainty": "strong"}}
  ],
  "cohorts": [{{
    "subject": "Statin therapy for severe hypercholesterolemia",
    "details": "Adults started on statins",
    "sub_cohorts": [{{
      "description": {{"subject": "Adults with LDL-C ≥190mg/dL", "details": "Primary severe hypercholesterolemia"}},
      "inclusion_criteria": {inclusion},
      "exclusion_criteria": [],
      "source_sentences": ["{STATIN_SENTENCE}"]
    }}]
  }}],
  "pathways": [{{"name": "Statin initiation", "steps": [{{"index": 1, "decision_point": false, "alternatives": ["Atorvastatin 40-80 mg"]}}]}}],
  "handoff": {handoff}
}}
```"#
    )
}

pub fn diagnosis_json(handoff: &str) -> String {
    format!(
        r#"{{
  "entities": [
    {{"id": "x1", "concept_name": "Type 2 diabetes mellitus", "domain": "condition"}},
    {{"id": "x2", "concept_name": "Hemoglobin A1c", "domain": "measurement", "attributes": {{"threshold": "6.5", "unit": "%"}}}}
  ],
  "relations": [
    {{"source": "x1", "target": "x2", "relation_name": "diagnosed_by", "evidence_text": "{DIABETES_SENTENCE}", "certainty": 0.8}}
  ],
  "cohorts": [{{
    "subject": "Diabetes diagnosis",
    "details": "",
    "sub_cohorts": [{{
      "description": {{"subject": "Adults with HbA1c ≥6.5%", "details": ""}},
      "inclusion_criteria": ["HbA1c ≥6.5%"],
      "exclusion_criteria": [],
      "source_sentences": ["{DIABETES_SENTENCE}"]
    }}]
  }}],
  "handoff": {handoff}
}}"#
    )
}

/// Leaves question writing to the criterion fallback.
pub fn questions_json() -> String {
    r#"{"questions": {}}"#.to_string()
}

static ITEM_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"<item id="([^"]+)">"#).unwrap());

/// Answers `verdict` for every item in the judge request.
pub fn judge_json(request: &ChatRequest, verdict: &str) -> String {
    let user = request.messages.last().map_or("", |m| m.content.as_str());
    let verdicts: HashMap<String, &str> = ITEM_ID
        .captures_iter(user)
        .map(|c| (c[1].to_string(), verdict))
        .collect();
    serde_json::json!({ "verdicts": verdicts }).to_string()
}

/// A well-behaved provider: the manager routes to `next_agents`, every
/// specialist answers correctly, and the judge says yes.
pub fn happy_path(next_agents: &'static str) -> Arc<ScriptedProvider> {
    ScriptedProvider::new(move |caller, _, request| match caller {
        Caller::Manager => Reply::Json(manager_json(next_agents)),
        Caller::Drug => Reply::Json(drug_json(r#"["LDL-C ≥190mg/dL"]"#, "[]")),
        Caller::Diagnosis => Reply::Json(diagnosis_json("[]")),
        Caller::Questions => Reply::Json(questions_json()),
        Caller::Judge => Reply::Json(judge_json(request, "yes")),
    })
}

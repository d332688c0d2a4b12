//! Evidence verifier.
//!
//! Every candidate sub-cohort gets a few yes/no questions. Each question
//! retrieves its top sentences from the [`EvidenceIndex`] and the model
//! judges whether they answer it. Scores combine the lexical match with the
//! verdict; when the model is unavailable the verifier scores lexically.
//!
//! ```text
//! candidates ──► questions (1 call) ──► BM25 top-k per question
//!                                            │
//!                      confidence ◄── judge (1 call)
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::config::{AgentConfig, VerificationConfig};
use super::gateway::Gateway;
use super::parse::string_list;
use super::prompt::{
    AgentRole, CandidateContext, JudgeItem, PromptSet, PromptSpec, build_judge_prompt,
    build_question_prompt,
};
use super::reprompt::request_json;
use super::result::{QuestionRecord, Verdict, VerificationOutcome, VerificationRecord};
use super::traits::Agent;
use crate::core::{Namespace, SubCohort};
use crate::error::AgentError;
use crate::search::EvidenceIndex;

/// Name the verifier is logged under.
pub const VERIFIER_NAME: &str = "EvidenceVerifier";

const FALLBACK_PREFIX: &str = "Does the guideline state: ";

/// A sub-cohort to verify, with its position in the state.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Namespace holding the sub-cohort.
    pub namespace: Namespace,
    /// Index of the main cohort within the namespace.
    pub cohort_index: usize,
    /// Index of the sub-cohort within the main cohort.
    pub sub_index: usize,
    /// Main cohort subject.
    pub cohort_subject: &'a str,
    /// The sub-cohort.
    pub sub_cohort: &'a SubCohort,
}

/// A scored candidate, addressable back into the state.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// Namespace holding the sub-cohort.
    pub namespace: Namespace,
    /// Index of the main cohort within the namespace.
    pub cohort_index: usize,
    /// Index of the sub-cohort within the main cohort.
    pub sub_index: usize,
    /// Verification record.
    pub record: VerificationRecord,
}

/// Output of one verification pass.
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    /// One entry per candidate, in candidate order.
    pub scored: Vec<ScoredCandidate>,
    /// At least one model step fell back to lexical-only scoring.
    pub degraded: bool,
    /// Model failures that caused the degradation.
    pub errors: Vec<AgentError>,
}

impl VerificationReport {
    /// Low-confidence errors for the kept-but-weak candidates.
    #[must_use]
    pub fn low_confidence_errors(&self) -> Vec<AgentError> {
        self.scored
            .iter()
            .filter(|s| s.record.outcome == VerificationOutcome::LowConfidence)
            .map(|s| AgentError::VerificationLowConfidence {
                subject: s.record.sub_cohort_subject.clone(),
                confidence: s.record.confidence,
            })
            .collect()
    }
}

/// One of the two model roles the verifier plays.
struct VerifierAgent {
    model: String,
    max_tokens: u32,
    system_prompt: String,
    required_fields: &'static [&'static str],
    max_reprompts: u32,
}

impl VerifierAgent {
    fn new(config: &AgentConfig, spec: &PromptSpec) -> Self {
        Self {
            model: config.verifier_model.clone(),
            max_tokens: config.verifier_max_tokens,
            system_prompt: spec.template.clone(),
            required_fields: spec.required_output_fields,
            max_reprompts: spec.max_reprompts,
        }
    }
}

#[async_trait]
impl Agent for VerifierAgent {
    fn name(&self) -> &'static str {
        VERIFIER_NAME
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

/// A question with the text used for retrieval.
#[derive(Debug, Clone)]
struct Question {
    text: String,
    query: String,
}

impl Question {
    fn asked(text: String) -> Self {
        Self {
            query: text.clone(),
            text,
        }
    }

    fn fallback(criterion: &str) -> Self {
        Self {
            text: format!("{FALLBACK_PREFIX}{criterion}?"),
            query: criterion.to_string(),
        }
    }
}

/// Retrieval result for one question.
#[derive(Debug, Clone)]
struct Retrieved {
    lexical: f64,
    best_normalized: f64,
    evidence: Vec<String>,
}

/// Scores candidate sub-cohorts against the document.
pub struct EvidenceVerifier {
    questions: VerifierAgent,
    judge: VerifierAgent,
    config: VerificationConfig,
}

impl EvidenceVerifier {
    /// Creates the verifier from the run configuration and prompts.
    #[must_use]
    pub fn new(config: &AgentConfig, prompts: &PromptSet) -> Self {
        Self {
            questions: VerifierAgent::new(config, prompts.get(AgentRole::VerifierQuestions)),
            judge: VerifierAgent::new(config, prompts.get(AgentRole::VerifierJudge)),
            config: config.verification,
        }
    }

    /// Verifies every candidate. Never fails; model problems degrade the
    /// pass to lexical-only scoring and are listed in the report.
    pub async fn verify(
        &self,
        gateway: &Gateway,
        index: &EvidenceIndex,
        candidates: &[Candidate<'_>],
    ) -> VerificationReport {
        let mut report = VerificationReport::default();
        if candidates.is_empty() {
            return report;
        }
        let ids: Vec<String> = (0..candidates.len()).map(|i| format!("c{i}")).collect();

        let mut asked = match self.generate_questions(gateway, candidates, &ids).await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "question generation failed; using criterion questions");
                report.degraded = true;
                report.errors.push(e);
                HashMap::new()
            }
        };

        let questions: Vec<Vec<Question>> = candidates
            .iter()
            .zip(&ids)
            .map(|(c, id)| {
                let mut qs: Vec<Question> = asked
                    .remove(id)
                    .unwrap_or_default()
                    .into_iter()
                    .take(self.config.max_questions)
                    .map(Question::asked)
                    .collect();
                if qs.is_empty() {
                    qs = self.fallback_questions(c.sub_cohort);
                }
                qs
            })
            .collect();

        let retrieved: Vec<Vec<Retrieved>> = questions
            .iter()
            .map(|qs| qs.iter().map(|q| self.retrieve(index, &q.query)).collect())
            .collect();

        let verdicts = if report.errors.iter().any(AgentError::is_fatal) || gateway.is_cancelled() {
            HashMap::new()
        } else {
            match self.judge(gateway, &ids, &questions, &retrieved).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "corroboration judgment failed; scoring lexically");
                    report.degraded = true;
                    report.errors.push(e);
                    HashMap::new()
                }
            }
        };

        for (i, candidate) in candidates.iter().enumerate() {
            let records: Vec<QuestionRecord> = questions[i]
                .iter()
                .zip(&retrieved[i])
                .enumerate()
                .map(|(j, (q, r))| {
                    let verdict = verdicts.get(&format!("{}.q{j}", ids[i])).copied();
                    QuestionRecord {
                        question: q.text.clone(),
                        verdict,
                        lexical: r.lexical,
                        score: self.question_score(r.lexical, verdict),
                        evidence: r.evidence.clone(),
                    }
                })
                .collect();
            let best_evidence = retrieved[i]
                .iter()
                .map(|r| r.best_normalized)
                .fold(0.0, f64::max);
            let record = self.record(candidate, records, best_evidence, report.degraded);
            report.scored.push(ScoredCandidate {
                namespace: candidate.namespace,
                cohort_index: candidate.cohort_index,
                sub_index: candidate.sub_index,
                record,
            });
        }

        info!(
            candidates = candidates.len(),
            dropped = report
                .scored
                .iter()
                .filter(|s| s.record.outcome == VerificationOutcome::Dropped)
                .count(),
            low_confidence = report
                .scored
                .iter()
                .filter(|s| s.record.outcome == VerificationOutcome::LowConfidence)
                .count(),
            degraded = report.degraded,
            "verification complete"
        );
        report
    }

    fn fallback_questions(&self, sub: &SubCohort) -> Vec<Question> {
        let mut qs: Vec<Question> = sub
            .inclusion_criteria
            .iter()
            .take(self.config.max_questions)
            .map(|c| Question::fallback(c))
            .collect();
        if qs.is_empty() && !sub.description.subject.is_empty() {
            qs.push(Question::fallback(&sub.description.subject));
        }
        qs
    }

    async fn generate_questions(
        &self,
        gateway: &Gateway,
        candidates: &[Candidate<'_>],
        ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>, AgentError> {
        let contexts: Vec<CandidateContext<'_>> = candidates
            .iter()
            .zip(ids)
            .map(|(c, id)| CandidateContext {
                id,
                subject: &c.sub_cohort.description.subject,
                inclusion_criteria: &c.sub_cohort.inclusion_criteria,
            })
            .collect();
        let user_msg = build_question_prompt(&contexts, self.config.max_questions);

        let reprompted = request_json(
            &self.questions,
            gateway,
            &user_msg,
            self.questions.required_fields,
            self.questions.max_reprompts,
            |value| {
                let Some(questions) = value.get("questions").filter(|q| q.is_object()) else {
                    return Err(vec!["questions must map candidate ids to lists".to_string()]);
                };
                Ok(questions
                    .as_object()
                    .into_iter()
                    .flat_map(|map| map.keys())
                    .map(|id| (id.clone(), string_list(questions, id)))
                    .collect::<HashMap<_, _>>())
            },
        )
        .await?;
        Ok(reprompted.value)
    }

    async fn judge(
        &self,
        gateway: &Gateway,
        ids: &[String],
        questions: &[Vec<Question>],
        retrieved: &[Vec<Retrieved>],
    ) -> Result<HashMap<String, Verdict>, AgentError> {
        let item_ids: Vec<Vec<String>> = ids
            .iter()
            .zip(questions)
            .map(|(id, qs)| (0..qs.len()).map(|j| format!("{id}.q{j}")).collect())
            .collect();

        let items: Vec<JudgeItem<'_>> = item_ids
            .iter()
            .zip(questions)
            .zip(retrieved)
            .flat_map(|((qids, qs), rs)| {
                qids.iter().zip(qs).zip(rs).filter_map(|((id, q), r)| {
                    (!r.evidence.is_empty()).then_some(JudgeItem {
                        id,
                        question: &q.text,
                        evidence: &r.evidence,
                    })
                })
            })
            .collect();
        if items.is_empty() {
            debug!("no retrieved evidence; judgment skipped");
            return Ok(HashMap::new());
        }

        let reprompted = request_json(
            &self.judge,
            gateway,
            &build_judge_prompt(&items),
            self.judge.required_fields,
            self.judge.max_reprompts,
            |value| {
                let Some(map) = value.get("verdicts").and_then(Value::as_object) else {
                    return Err(vec!["verdicts must map item ids to yes, no or unclear".to_string()]);
                };
                Ok(map
                    .iter()
                    .filter_map(|(id, v)| Some((id.clone(), Verdict::parse(v.as_str()?)?)))
                    .collect::<HashMap<_, _>>())
            },
        )
        .await?;
        Ok(reprompted.value)
    }

    /// Top-k retrieval with rank-discounted lexical score.
    fn retrieve(&self, index: &EvidenceIndex, query: &str) -> Retrieved {
        let hits = index.query(query, self.config.top_k);
        let mut lexical: f64 = 0.0;
        let mut discount = 1.0;
        for hit in &hits {
            lexical = lexical.max(hit.normalized * discount);
            discount *= self.config.rank_decay;
        }
        Retrieved {
            lexical,
            best_normalized: hits.iter().map(|h| h.normalized).fold(0.0, f64::max),
            evidence: hits.into_iter().map(|h| h.sentence).collect(),
        }
    }

    fn question_score(&self, lexical: f64, verdict: Option<Verdict>) -> f64 {
        let w = self.config.lexical_weight;
        verdict.map_or(lexical, |v| w.mul_add(lexical, (1.0 - w) * v.score()))
    }

    fn record(
        &self,
        candidate: &Candidate<'_>,
        questions: Vec<QuestionRecord>,
        best_evidence: f64,
        degraded: bool,
    ) -> VerificationRecord {
        #[allow(clippy::cast_precision_loss)]
        let confidence = if questions.is_empty() {
            0.0
        } else {
            questions.iter().map(|q| q.score).sum::<f64>() / questions.len() as f64
        };
        let outcome = if best_evidence < self.config.evidence_floor {
            VerificationOutcome::Dropped
        } else if confidence < self.config.low_confidence_threshold {
            VerificationOutcome::LowConfidence
        } else {
            VerificationOutcome::Accepted
        };
        debug!(
            sub_cohort = %candidate.sub_cohort.description.subject,
            confidence,
            best_evidence,
            ?outcome,
            "sub-cohort verified"
        );
        VerificationRecord {
            namespace: candidate.namespace,
            cohort_subject: candidate.cohort_subject.to_string(),
            sub_cohort_subject: candidate.sub_cohort.description.subject.clone(),
            confidence,
            best_evidence,
            outcome,
            degraded,
            questions,
        }
    }
}

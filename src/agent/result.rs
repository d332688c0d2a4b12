//! Final artifacts and run report.

use std::time::Duration;

use serde::Serialize;

use crate::core::{CohortArtifact, KnowledgeGraph, Namespace, Pathway};

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every routed agent ran and verification completed.
    Complete,
    /// Cancelled or stopped by a bound; artifacts are partial.
    Incomplete,
    /// The provider was unavailable; artifacts are best effort.
    Failed,
}

impl RunStatus {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Incomplete => "incomplete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model judgment for one verification question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Evidence supports the question.
    Yes,
    /// Evidence contradicts the question or is unrelated.
    No,
    /// Evidence is partial.
    Unclear,
}

impl Verdict {
    /// Parses a verdict word; anything else is `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "yes" | "true" | "supported" => Some(Self::Yes),
            "no" | "false" | "unsupported" | "contradicted" => Some(Self::No),
            "unclear" | "partial" | "unknown" | "maybe" => Some(Self::Unclear),
            _ => None,
        }
    }

    /// Score in [0, 1].
    #[must_use]
    pub const fn score(self) -> f64 {
        match self {
            Self::Yes => 1.0,
            Self::Unclear => 0.5,
            Self::No => 0.0,
        }
    }
}

/// What the verifier decided for a sub-cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// Kept with adequate confidence.
    Accepted,
    /// Kept, flagged as low confidence.
    LowConfidence,
    /// Removed for lack of lexical evidence.
    Dropped,
}

/// One verification question and how it scored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionRecord {
    /// The question.
    pub question: String,
    /// Model verdict, absent in lexical-only mode.
    pub verdict: Option<Verdict>,
    /// Rank-discounted lexical score in [0, 1].
    pub lexical: f64,
    /// Combined score in [0, 1].
    pub score: f64,
    /// Retrieved sentences, best first.
    pub evidence: Vec<String>,
}

/// Verification record for one sub-cohort.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationRecord {
    /// Namespace that proposed the sub-cohort.
    pub namespace: Namespace,
    /// Main cohort subject.
    pub cohort_subject: String,
    /// Sub-cohort subject.
    pub sub_cohort_subject: String,
    /// Mean question score.
    pub confidence: f64,
    /// Best idf-normalized lexical score over all questions.
    pub best_evidence: f64,
    /// Decision.
    pub outcome: VerificationOutcome,
    /// Scored without model verdicts.
    pub degraded: bool,
    /// Per-question detail.
    pub questions: Vec<QuestionRecord>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct FinalResult {
    /// Overall status.
    pub status: RunStatus,
    /// Cohort-analysis artifact.
    pub cohorts: CohortArtifact,
    /// Knowledge-graph artifact.
    pub knowledge_graph: KnowledgeGraph,
    /// Treatment and diagnostic pathways.
    pub pathways: Vec<Pathway>,
    /// Per sub-cohort verification records.
    pub verification: Vec<VerificationRecord>,
    /// Reason for a failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Recoverable problems, in the order they happened.
    pub warnings: Vec<String>,
    /// Agents in dispatch order.
    pub visited: Vec<String>,
    /// Manager and specialist invocations.
    pub iterations: usize,
    /// Tokens reported by the provider.
    pub total_tokens: u64,
    /// Provider calls, including retries.
    pub provider_calls: u64,
    /// Wall-clock time of the run.
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

impl FinalResult {
    /// Number of sub-cohorts in the cohort artifact.
    #[must_use]
    pub fn sub_cohort_count(&self) -> usize {
        self.cohorts
            .main_cohorts
            .iter()
            .map(|c| c.sub_cohorts.len())
            .sum()
    }

    /// Verification records flagged as low confidence.
    pub fn low_confidence(&self) -> impl Iterator<Item = &VerificationRecord> {
        self.verification
            .iter()
            .filter(|r| r.outcome == VerificationOutcome::LowConfidence)
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_duration<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("yes", Some(Verdict::Yes))]
    #[test_case(" No ", Some(Verdict::No))]
    #[test_case("UNCLEAR", Some(Verdict::Unclear))]
    #[test_case("perhaps so", None)]
    fn test_verdict_parse(input: &str, expected: Option<Verdict>) {
        assert_eq!(Verdict::parse(input), expected);
    }

    #[test]
    fn test_report_serialization() {
        let result = FinalResult {
            status: RunStatus::Incomplete,
            cohorts: CohortArtifact::default(),
            knowledge_graph: KnowledgeGraph::default(),
            pathways: Vec::new(),
            verification: Vec::new(),
            failure: None,
            warnings: vec!["run cancelled".to_string()],
            visited: vec!["ManagerAgent".to_string()],
            iterations: 1,
            total_tokens: 42,
            provider_calls: 1,
            elapsed: Duration::from_millis(1500),
        };
        let value = serde_json::to_value(&result).unwrap_or_default();
        assert_eq!(value["status"], "incomplete");
        assert_eq!(value["elapsed"], 1.5);
        assert!(value.get("failure").is_none());
        assert_eq!(result.sub_cohort_count(), 0);
        assert_eq!(result.low_confidence().count(), 0);
    }
}

//! Structural validation of agent deltas.
//!
//! A sub-cohort needs at least one inclusion criterion and at least one
//! source sentence found verbatim in the document (modulo whitespace).
//! A relation needs verbatim `evidence_text`.
//! [`rejections`] lists the sub-cohort violations for a repair prompt;
//! [`sanitize`] enforces all rules on the final delta.

use tracing::debug;

use crate::core::{NamespaceDelta, SubCohort, VerbatimText};

/// Why a sub-cohort was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Main cohort subject.
    pub cohort: String,
    /// Sub-cohort subject.
    pub sub_cohort: String,
    /// Violations.
    pub reasons: Vec<&'static str>,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sub-cohort '{}' of cohort '{}': {}",
            self.sub_cohort,
            self.cohort,
            self.reasons.join("; ")
        )
    }
}

/// What [`sanitize`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    /// Entities given a fresh id.
    pub rekeyed: usize,
    /// Source sentences removed for not being verbatim.
    pub removed_sentences: usize,
    /// Relations removed for evidence not found verbatim.
    pub unsupported_relations: usize,
    /// Sub-cohorts dropped.
    pub dropped: Vec<Rejection>,
}

const NO_INCLUSION: &str = "no inclusion criteria";
const NO_SOURCE: &str = "no source sentence found verbatim in the guideline";

fn check(sub: &SubCohort, document: &VerbatimText) -> Vec<&'static str> {
    let mut reasons = Vec::new();
    if !sub.inclusion_criteria.iter().any(|c| !c.trim().is_empty()) {
        reasons.push(NO_INCLUSION);
    }
    if !sub.source_sentences.iter().any(|s| document.contains(s)) {
        reasons.push(NO_SOURCE);
    }
    reasons
}

/// Lists the sub-cohorts of `delta` that violate the rules.
#[must_use]
pub fn rejections(delta: &NamespaceDelta, document: &VerbatimText) -> Vec<Rejection> {
    delta
        .cohorts
        .iter()
        .flat_map(|cohort| {
            cohort.sub_cohorts.iter().filter_map(|sub| {
                let reasons = check(sub, document);
                (!reasons.is_empty()).then(|| Rejection {
                    cohort: cohort.subject.clone(),
                    sub_cohort: sub.description.subject.clone(),
                    reasons,
                })
            })
        })
        .collect()
}

/// Enforces the rules on `delta`.
///
/// Duplicate entity ids are re-keyed, relations without verbatim evidence
/// and non-verbatim source sentences are removed, and sub-cohorts still in
/// violation are dropped.
pub fn sanitize(delta: &mut NamespaceDelta, document: &VerbatimText) -> SanitizeReport {
    let mut report = SanitizeReport {
        rekeyed: delta.ensure_unique_ids(),
        ..SanitizeReport::default()
    };

    let before = delta.relations.len();
    delta.relations.retain(|relation| {
        let supported = document.contains(&relation.evidence_text);
        if !supported {
            debug!(
                source = %relation.source,
                target = %relation.target,
                evidence = %relation.evidence_text,
                "relation evidence not found verbatim"
            );
        }
        supported
    });
    report.unsupported_relations = before - delta.relations.len();

    for cohort in &mut delta.cohorts {
        let subject = cohort.subject.clone();
        cohort.sub_cohorts.retain_mut(|sub| {
            sub.inclusion_criteria.retain(|c| !c.trim().is_empty());
            let before = sub.source_sentences.len();
            sub.source_sentences.retain(|s| document.contains(s));
            report.removed_sentences += before - sub.source_sentences.len();

            let reasons = check(sub, document);
            if reasons.is_empty() {
                return true;
            }
            debug!(
                cohort = %subject,
                sub_cohort = %sub.description.subject,
                reasons = %reasons.join("; "),
                "sub-cohort dropped"
            );
            report.dropped.push(Rejection {
                cohort: subject.clone(),
                sub_cohort: sub.description.subject.clone(),
                reasons,
            });
            false
        });
    }

    report
}

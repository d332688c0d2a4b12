//! Cohort definitions and treatment pathways.
//!
//! The serialized form of [`CohortArtifact`] is the published output
//! format; verification annotations are carried alongside but never
//! serialized into it.

use serde::{Deserialize, Serialize};

/// Subject and expanded description of a sub-cohort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    /// Short title.
    pub subject: String,
    /// Expanded description.
    pub details: String,
}

/// Outcome of evidence verification for one sub-cohort.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    /// Combined confidence in [0, 1].
    pub confidence: f64,
    /// Best idf-normalized lexical evidence score in [0, 1].
    pub best_evidence: f64,
    /// Kept, but below the low-confidence threshold.
    pub low_confidence: bool,
}

/// A narrower, actionable clinical scenario within a main cohort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubCohort {
    /// Subject and details.
    pub description: Description,
    /// Inclusion criteria; never empty in a published artifact.
    pub inclusion_criteria: Vec<String>,
    /// Exclusion criteria.
    #[serde(default)]
    pub exclusion_criteria: Vec<String>,
    /// Verbatim sentences from the source document.
    pub source_sentences: Vec<String>,
    /// Verification annotation (not part of the published artifact).
    #[serde(skip)]
    pub verification: Option<Verification>,
}

impl SubCohort {
    /// Verification confidence, or 0 when not verified yet.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.verification.map_or(0.0, |v| v.confidence)
    }
}

/// A top-level cohort theme with its sub-cohorts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortDefinition {
    /// Short title.
    pub subject: String,
    /// Expanded description.
    pub details: String,
    /// Ordered sub-cohorts.
    #[serde(default)]
    pub sub_cohorts: Vec<SubCohort>,
}

/// Cohort-analysis artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortArtifact {
    /// Main cohorts.
    pub main_cohorts: Vec<CohortDefinition>,
}

/// One step of a clinical pathway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathwayStep {
    /// Position in the pathway (1-based as written in the guideline).
    pub index: usize,
    /// Whether the step is a decision point.
    pub decision_point: bool,
    /// Named alternatives available at this step.
    #[serde(default)]
    pub alternatives: Vec<String>,
}

/// An ordered sequence of treatment or diagnostic steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pathway {
    /// Pathway name.
    pub name: String,
    /// Steps ordered by index.
    pub steps: Vec<PathwayStep>,
}

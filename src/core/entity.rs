//! Knowledge-graph entities and relations.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// OMOP CDM domain of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Drug exposure.
    Drug,
    /// Condition occurrence.
    Condition,
    /// Procedure occurrence.
    Procedure,
    /// Measurement (lab values, vitals).
    Measurement,
    /// Observation.
    Observation,
    /// Device exposure.
    Device,
    /// Anything else.
    Other,
}

impl Domain {
    /// Parses a free-text domain label (case-insensitive, OMOP table names
    /// and common synonyms accepted).
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let lowered = s.trim().to_lowercase();
        match lowered.as_str() {
            "drug" | "drug_exposure" | "medication" | "drug class" | "drug_class" => Self::Drug,
            "condition" | "condition_occurrence" | "diagnosis" | "disease" | "disorder" => {
                Self::Condition
            }
            "procedure" | "procedure_occurrence" | "surgery" => Self::Procedure,
            "measurement" | "lab" | "laboratory" | "test" | "lab test" => Self::Measurement,
            "observation" | "finding" | "symptom" => Self::Observation,
            "device" | "device_exposure" => Self::Device,
            _ => Self::Other,
        }
    }

    /// Returns the lowercase label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Drug => "drug",
            Self::Condition => "condition",
            Self::Procedure => "procedure",
            Self::Measurement => "measurement",
            Self::Observation => "observation",
            Self::Device => "device",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An extracted clinical concept.
///
/// `id` is unique within the namespace that produced the entity. After
/// aggregation, entities are keyed by normalized concept name instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Locally-unique identifier within a namespace.
    pub id: String,
    /// Concept name, intended to map to an OMOP CDM `concept_name`.
    pub concept_name: String,
    /// OMOP domain.
    pub domain: Domain,
    /// Attribute name to value (dose, unit, threshold, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Attribute names this entity may overwrite when merged after
    /// another namespace's entity with the same concept.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub overrides: BTreeSet<String>,
}

impl Entity {
    /// Creates an entity without attributes.
    #[must_use]
    pub fn new(id: impl Into<String>, concept_name: impl Into<String>, domain: Domain) -> Self {
        Self {
            id: id.into(),
            concept_name: concept_name.into(),
            domain,
            attributes: BTreeMap::new(),
            overrides: BTreeSet::new(),
        }
    }

    /// Adds an attribute (builder style).
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// Controlled vocabulary of relation names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationName {
    /// Drug or procedure treats a condition.
    Treats,
    /// Intervention prevents a condition.
    Prevents,
    /// Exposure causes a condition or adverse event.
    Causes,
    /// Intervention must not be used with a condition or drug.
    ContraindicatedWith,
    /// Drug-drug interaction.
    InteractsWith,
    /// Finding indicates an intervention.
    Indicates,
    /// Condition is diagnosed by a test or procedure.
    DiagnosedBy,
    /// Risk factor for a condition.
    RiskFactorFor,
    /// Complication of a condition.
    ComplicationOf,
    /// Treatment is monitored by a measurement.
    MonitoredBy,
    /// Temporal ordering.
    Precedes,
    /// Generic association stated in the text.
    AssociatedWith,
}

impl RelationName {
    /// Parses a relation label, tolerating case, spaces, hyphens, and a
    /// few common synonyms. Returns `None` for names outside the vocabulary.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        let name = match key.as_str() {
            "treats" | "treat" | "treatment_for" | "may_treat" => Self::Treats,
            "prevents" | "prevent" | "may_prevent" => Self::Prevents,
            "causes" | "cause" | "induces" => Self::Causes,
            "contraindicated_with" | "contraindicated_in" | "contraindication" => {
                Self::ContraindicatedWith
            }
            "interacts_with" | "interaction" => Self::InteractsWith,
            "indicates" | "indicated_for" | "indication" => Self::Indicates,
            "diagnosed_by" | "diagnoses" | "has_diagnostic_test" => Self::DiagnosedBy,
            "risk_factor_for" | "risk_factor" | "increases_risk_of" => Self::RiskFactorFor,
            "complication_of" | "complication" => Self::ComplicationOf,
            "monitored_by" | "monitors" | "requires_monitoring" => Self::MonitoredBy,
            "precedes" | "followed_by" | "before" => Self::Precedes,
            "associated_with" | "related_to" => Self::AssociatedWith,
            _ => return None,
        };
        Some(name)
    }

    /// Returns the canonical snake-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Treats => "treats",
            Self::Prevents => "prevents",
            Self::Causes => "causes",
            Self::ContraindicatedWith => "contraindicated_with",
            Self::InteractsWith => "interacts_with",
            Self::Indicates => "indicates",
            Self::DiagnosedBy => "diagnosed_by",
            Self::RiskFactorFor => "risk_factor_for",
            Self::ComplicationOf => "complication_of",
            Self::MonitoredBy => "monitored_by",
            Self::Precedes => "precedes",
            Self::AssociatedWith => "associated_with",
        }
    }
}

impl std::fmt::Display for RelationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed, evidenced relation between two entities of one namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Source entity id (or concept name).
    pub source: String,
    /// Target entity id (or concept name).
    pub target: String,
    /// Relation name from the controlled vocabulary.
    pub relation_name: RelationName,
    /// Verbatim span from the source document.
    pub evidence_text: String,
    /// Certainty in [0, 1].
    pub certainty: f64,
}

/// Parses a certainty value given as a number or a strength word.
///
/// Numbers are clamped to [0, 1]; percentages above 1 are scaled down.
/// Unrecognized input yields `None`.
#[must_use]
pub fn parse_certainty(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(clamp_certainty),
        serde_json::Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            match lowered.as_str() {
                "strong" | "high" | "very high" => Some(0.9),
                "moderate" | "medium" => Some(0.6),
                "weak" | "low" | "very low" => Some(0.3),
                other => other.parse::<f64>().ok().map(clamp_certainty),
            }
        }
        _ => None,
    }
}

fn clamp_certainty(raw: f64) -> f64 {
    let scaled = if raw > 1.0 && raw <= 100.0 { raw / 100.0 } else { raw };
    if scaled.is_nan() { 0.0 } else { scaled.clamp(0.0, 1.0) }
}

/// Merged, namespace-free view of an entity in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    /// Concept name.
    pub concept_name: String,
    /// OMOP domain.
    pub domain: Domain,
    /// Merged attributes.
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Merged relation; endpoints are concept names of [`GraphEntity`] values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelation {
    /// Source concept name.
    pub source: String,
    /// Target concept name.
    pub target: String,
    /// Relation name.
    pub relation_name: RelationName,
    /// Verbatim evidence.
    pub evidence_text: String,
    /// Maximum certainty across contributing namespaces.
    pub certainty: f64,
}

/// Knowledge-graph artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    /// Merged entities.
    pub entities: Vec<GraphEntity>,
    /// Merged relations.
    pub relations: Vec<GraphRelation>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("Drug", Domain::Drug)]
    #[test_case("condition_occurrence", Domain::Condition)]
    #[test_case(" Measurement ", Domain::Measurement)]
    #[test_case("surgery", Domain::Procedure)]
    #[test_case("galaxy", Domain::Other)]
    fn test_domain_parse(input: &str, expected: Domain) {
        assert_eq!(Domain::parse(input), expected);
    }

    #[test_case("treats", Some(RelationName::Treats))]
    #[test_case("Contraindicated With", Some(RelationName::ContraindicatedWith))]
    #[test_case("risk-factor-for", Some(RelationName::RiskFactorFor))]
    #[test_case("is_sibling_of", None)]
    fn test_relation_name_parse(input: &str, expected: Option<RelationName>) {
        assert_eq!(RelationName::parse(input), expected);
    }

    #[test]
    fn test_parse_certainty() {
        assert_eq!(parse_certainty(&json!(0.75)), Some(0.75));
        assert_eq!(parse_certainty(&json!(80)), Some(0.8));
        assert_eq!(parse_certainty(&json!(-2)), Some(0.0));
        assert_eq!(parse_certainty(&json!("strong")), Some(0.9));
        assert_eq!(parse_certainty(&json!("Moderate")), Some(0.6));
        assert_eq!(parse_certainty(&json!("0.4")), Some(0.4));
        assert_eq!(parse_certainty(&json!("unsure")), None);
        assert_eq!(parse_certainty(&json!(null)), None);
    }

    #[test]
    fn test_knowledge_graph_shape() {
        let graph = KnowledgeGraph {
            entities: vec![GraphEntity {
                concept_name: "Atorvastatin".to_string(),
                domain: Domain::Drug,
                attributes: BTreeMap::new(),
            }],
            relations: vec![],
        };
        let value = serde_json::to_value(&graph).unwrap_or_default();
        assert_eq!(
            value,
            json!({
                "entities": [{"concept_name": "Atorvastatin", "domain": "drug", "attributes": {}}],
                "relations": []
            })
        );
    }
}

//! Converts model JSON into domain drafts.
//!
//! Parsing is lenient about shape (alternate key names, strings for
//! numbers) and strict about vocabulary: relations outside the controlled
//! list are dropped and reported.

use serde_json::Value;

use super::parse::{array_field, str_field, string_list};
use super::routing::RouteRequest;
use crate::core::text::dedup_strings;
use crate::core::{
    CohortDefinition, Description, Domain, Entity, Pathway, PathwayStep, Relation, RelationName,
    SubCohort, parse_certainty,
};

/// Certainty assumed when the model gives none.
pub const DEFAULT_CERTAINTY: f64 = 0.5;

/// Notes produced while parsing, reported as run warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftNotes {
    /// Human-readable notes.
    pub notes: Vec<String>,
}

impl DraftNotes {
    fn push(&mut self, note: String) {
        self.notes.push(note);
    }
}

fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| str_field(value, k))
}

/// Parses `value["entities"]`.
///
/// Entities without a concept name are skipped; a missing id becomes
/// `e<position>`.
#[must_use]
pub fn parse_entities(value: &Value, notes: &mut DraftNotes) -> Vec<Entity> {
    array_field(value, "entities")
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let Some(concept_name) = first_str(item, &["concept_name", "name", "entity"]) else {
                notes.push(format!("entity #{i} has no concept name"));
                return None;
            };
            let id = first_str(item, &["id", "entity_id"]).unwrap_or_else(|| format!("e{i}"));
            let domain = first_str(item, &["domain", "type"])
                .map_or(Domain::Other, |d| Domain::parse(&d));
            let attributes = item
                .get("attributes")
                .and_then(Value::as_object)
                .map(|m| {
                    m.iter()
                        .filter(|(_, v)| !v.is_null())
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                })
                .unwrap_or_default();
            let overrides = string_list(item, "overrides").into_iter().collect();

            Some(Entity {
                id,
                concept_name,
                domain,
                attributes,
                overrides,
            })
        })
        .collect()
}

/// Parses `value["relations"]`, dropping names outside the vocabulary.
#[must_use]
pub fn parse_relations(value: &Value, notes: &mut DraftNotes) -> Vec<Relation> {
    array_field(value, "relations")
        .iter()
        .filter_map(|item| {
            let source = first_str(item, &["source", "source_id", "from"])?;
            let target = first_str(item, &["target", "target_id", "to"])?;
            let label = first_str(item, &["relation_name", "relation", "type"])?;
            let Some(relation_name) = RelationName::parse(&label) else {
                notes.push(format!(
                    "dropped relation {source} -[{label}]-> {target}: unknown relation name"
                ));
                return None;
            };
            let evidence_text = first_str(item, &["evidence_text", "evidence"]).unwrap_or_default();
            let certainty = item
                .get("certainty")
                .and_then(parse_certainty)
                .unwrap_or(DEFAULT_CERTAINTY);

            Some(Relation {
                source,
                target,
                relation_name,
                evidence_text,
                certainty,
            })
        })
        .collect()
}

fn parse_description(item: &Value) -> Description {
    let nested = item.get("description").filter(|d| d.is_object());
    match nested {
        Some(d) => Description {
            subject: str_field(d, "subject").unwrap_or_default(),
            details: str_field(d, "details").unwrap_or_default(),
        },
        None => Description {
            subject: str_field(item, "subject").unwrap_or_default(),
            details: first_str(item, &["details", "description"]).unwrap_or_default(),
        },
    }
}

fn parse_sub_cohort(item: &Value) -> SubCohort {
    let mut source_sentences = string_list(item, "source_sentences");
    if source_sentences.is_empty() {
        source_sentences = string_list(item, "source_sentence");
    }
    SubCohort {
        description: parse_description(item),
        inclusion_criteria: dedup_strings(string_list(item, "inclusion_criteria")),
        exclusion_criteria: dedup_strings(string_list(item, "exclusion_criteria")),
        source_sentences: dedup_strings(source_sentences),
        verification: None,
    }
}

/// Parses `value["cohorts"]` (or `main_cohorts`).
///
/// Validation of sub-cohort content happens later; here only cohorts
/// without a subject are skipped.
#[must_use]
pub fn parse_cohorts(value: &Value, notes: &mut DraftNotes) -> Vec<CohortDefinition> {
    let items = match array_field(value, "cohorts") {
        [] => array_field(value, "main_cohorts"),
        items => items,
    };
    items
        .iter()
        .filter_map(|item| {
            let Some(subject) = str_field(item, "subject") else {
                notes.push("cohort without subject skipped".to_string());
                return None;
            };
            Some(CohortDefinition {
                subject,
                details: str_field(item, "details").unwrap_or_default(),
                sub_cohorts: array_field(item, "sub_cohorts")
                    .iter()
                    .map(parse_sub_cohort)
                    .collect(),
            })
        })
        .collect()
}

/// Parses the manager's `themes` as cohorts without sub-cohorts.
///
/// Plain strings are accepted as subjects.
#[must_use]
pub fn parse_themes(value: &Value) -> Vec<CohortDefinition> {
    array_field(value, "themes")
        .iter()
        .filter_map(|item| {
            let (subject, details) = match item {
                Value::String(s) => (s.trim().to_string(), String::new()),
                _ => (
                    first_str(item, &["subject", "theme", "name"])?,
                    first_str(item, &["details", "description"]).unwrap_or_default(),
                ),
            };
            (!subject.is_empty()).then(|| CohortDefinition {
                subject,
                details,
                sub_cohorts: Vec::new(),
            })
        })
        .collect()
}

fn parse_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes"),
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

/// Parses `value["pathways"]`; steps are sorted by index.
#[must_use]
pub fn parse_pathways(value: &Value) -> Vec<Pathway> {
    array_field(value, "pathways")
        .iter()
        .filter_map(|item| {
            let name = first_str(item, &["name", "subject"])?;
            let mut steps: Vec<PathwayStep> = array_field(item, "steps")
                .iter()
                .enumerate()
                .map(|(pos, step)| PathwayStep {
                    index: step
                        .get("index")
                        .and_then(|v| {
                            v.as_u64()
                                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                        })
                        .and_then(|n| usize::try_from(n).ok())
                        .unwrap_or(pos + 1),
                    decision_point: parse_bool(step.get("decision_point")),
                    alternatives: dedup_strings(string_list(step, "alternatives")),
                })
                .collect();
            steps.sort_by_key(|s| s.index);
            Some(Pathway { name, steps })
        })
        .collect()
}

/// Parses the manager's `next_agents`.
///
/// Entries are strings or `{agent, salience}` objects. Returns `None`
/// when the field is missing or not a list.
#[must_use]
pub fn parse_next_agents(value: &Value) -> Option<Vec<RouteRequest>> {
    let items = match value.get("next_agents")? {
        Value::Array(items) => items.as_slice(),
        Value::String(s) => return Some(vec![RouteRequest::named(s.trim())]),
        _ => return None,
    };
    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(RouteRequest::named(s.trim())),
                Value::Object(_) => Some(RouteRequest {
                    name: first_str(item, &["agent", "name"])?,
                    salience: item.get("salience").and_then(|s| {
                        s.as_f64()
                            .or_else(|| s.as_str().and_then(|t| t.trim().parse().ok()))
                    }),
                }),
                _ => None,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_entities_and_relations() {
        let v = json!({
            "entities": [
                {"id": "d1", "concept_name": "Atorvastatin", "domain": "drug",
                 "attributes": {"dose": "40-80", "unit": "mg", "route": null}},
                {"name": "Hypercholesterolemia", "domain": "condition"},
                {"id": "x", "domain": "drug"}
            ],
            "relations": [
                {"source": "d1", "target": "Hypercholesterolemia", "relation_name": "treats",
                 "evidence_text": "statins reduce LDL-C", "certainty": "strong"},
                {"source": "d1", "target": "e1", "relation_name": "cures"},
                {"source": "d1", "target": "e1", "relation": "monitored by"}
            ]
        });
        let mut notes = DraftNotes::default();
        let entities = parse_entities(&v, &mut notes);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].attributes.len(), 2);
        assert_eq!(entities[1].id, "e1");
        assert_eq!(entities[1].domain, Domain::Condition);

        let relations = parse_relations(&v, &mut notes);
        assert_eq!(relations.len(), 2);
        assert!((relations[0].certainty - 0.9).abs() < f64::EPSILON);
        assert_eq!(relations[1].relation_name, RelationName::MonitoredBy);
        assert!((relations[1].certainty - DEFAULT_CERTAINTY).abs() < f64::EPSILON);
        assert_eq!(notes.notes.len(), 2);
        assert!(notes.notes[1].contains("cures"));
    }

    #[test]
    fn test_parse_cohorts_shapes() {
        let v = json!({
            "cohorts": [{
                "subject": "Statin therapy",
                "details": "Primary prevention",
                "sub_cohorts": [
                    {"description": {"subject": "Severe", "details": "LDL-C ≥190"},
                     "inclusion_criteria": ["LDL-C ≥190mg/dL", "ldl-c ≥190MG/dL"],
                     "source_sentences": "Patients with LDL-C ≥190mg/dL should receive therapy."},
                    {"subject": "Flat", "description": "flat details",
                     "inclusion_criteria": [{"criterion": "Age 40-75"}]}
                ]
            }, {"details": "no subject"}]
        });
        let mut notes = DraftNotes::default();
        let cohorts = parse_cohorts(&v, &mut notes);
        assert_eq!(cohorts.len(), 1);
        let subs = &cohorts[0].sub_cohorts;
        assert_eq!(subs[0].inclusion_criteria, vec!["LDL-C ≥190mg/dL"]);
        assert_eq!(subs[0].source_sentences.len(), 1);
        assert_eq!(subs[1].description.subject, "Flat");
        assert_eq!(subs[1].description.details, "flat details");
        assert!(subs[1].source_sentences.is_empty());
        assert_eq!(notes.notes.len(), 1);
    }

    #[test]
    fn test_parse_pathways_sorted() {
        let v = json!({"pathways": [{"name": "Lipid lowering", "steps": [
            {"index": 2, "decision_point": "yes", "alternatives": ["Ezetimibe", "PCSK9 inhibitor"]},
            {"index": "1", "alternatives": "High-intensity statin"}
        ]}]});
        let pathways = parse_pathways(&v);
        assert_eq!(pathways[0].steps[0].index, 1);
        assert!(!pathways[0].steps[0].decision_point);
        assert!(pathways[0].steps[1].decision_point);
        assert_eq!(pathways[0].steps[1].alternatives.len(), 2);
    }

    #[test]
    fn test_parse_next_agents() {
        let v = json!({"next_agents": ["DrugAgent", {"agent": "DiagnosisAgent", "salience": "0.7"}, 3]});
        let requests = parse_next_agents(&v).unwrap_or_default();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].salience, Some(0.7));

        assert_eq!(parse_next_agents(&json!({"next_agents": []})), Some(Vec::new()));
        assert_eq!(parse_next_agents(&json!({})), None);
        assert_eq!(parse_next_agents(&json!({"next_agents": 5})), None);
    }

    #[test]
    fn test_parse_themes() {
        let v = json!({"themes": ["Lipids", {"subject": "Diabetes", "details": "Screening"}, {}]});
        let themes = parse_themes(&v);
        assert_eq!(themes.len(), 2);
        assert_eq!(themes[1].details, "Screening");
    }
}

//! Result aggregation.
//!
//! Merges namespaced deltas into one knowledge graph and one cohort
//! artifact. Deltas are ordered by namespace precedence first, so the
//! result does not depend on the order they are passed in.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::core::text::{dedup_strings, normalize_key, normalize_whitespace};
use crate::core::{
    CohortArtifact, CohortDefinition, Domain, GraphEntity, GraphRelation, KnowledgeGraph,
    NamespaceDelta, Pathway, Relation, RelationName, SubCohort,
};

/// Merged artifacts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    /// Cohort artifact; main cohorts without sub-cohorts are omitted.
    pub cohorts: CohortArtifact,
    /// Knowledge graph keyed by concept name.
    pub knowledge_graph: KnowledgeGraph,
    /// Pathways, de-duplicated by name.
    pub pathways: Vec<Pathway>,
    /// Relations dropped for a dangling endpoint.
    pub dangling_relations: usize,
}

/// Merges `deltas` into the final artifacts.
#[must_use]
pub fn aggregate<'a>(deltas: impl IntoIterator<Item = &'a NamespaceDelta>) -> Aggregate {
    let mut ordered: Vec<&NamespaceDelta> = deltas.into_iter().collect();
    ordered.sort_by_key(|d| d.namespace);

    let (knowledge_graph, dangling_relations) = merge_graph(&ordered);
    let cohorts = merge_cohorts(&ordered);
    let pathways = merge_pathways(&ordered);

    debug!(
        entities = knowledge_graph.entities.len(),
        relations = knowledge_graph.relations.len(),
        dangling_relations,
        main_cohorts = cohorts.main_cohorts.len(),
        pathways = pathways.len(),
        "aggregation complete"
    );

    Aggregate {
        cohorts,
        knowledge_graph,
        pathways,
        dangling_relations,
    }
}

fn merge_graph(ordered: &[&NamespaceDelta]) -> (KnowledgeGraph, usize) {
    let mut entities: Vec<GraphEntity> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for delta in ordered {
        for entity in &delta.entities {
            let key = normalize_key(&entity.concept_name);
            if key.is_empty() {
                continue;
            }
            match by_key.get(&key) {
                Some(&i) => {
                    let merged = &mut entities[i];
                    if merged.domain == Domain::Other {
                        merged.domain = entity.domain;
                    }
                    for (name, value) in &entity.attributes {
                        if entity.overrides.contains(name) || !merged.attributes.contains_key(name)
                        {
                            merged.attributes.insert(name.clone(), value.clone());
                        }
                    }
                }
                None => {
                    by_key.insert(key, entities.len());
                    entities.push(GraphEntity {
                        concept_name: normalize_whitespace(&entity.concept_name),
                        domain: entity.domain,
                        attributes: entity.attributes.clone(),
                    });
                }
            }
        }
    }

    let mut relations: Vec<GraphRelation> = Vec::new();
    let mut by_triple: HashMap<(usize, usize, RelationName), usize> = HashMap::new();
    let mut dangling = 0;

    for delta in ordered {
        let local: HashMap<&str, usize> = delta
            .entities
            .iter()
            .filter_map(|e| Some((e.id.as_str(), *by_key.get(&normalize_key(&e.concept_name))?)))
            .collect();
        let resolve = |endpoint: &str| -> Option<usize> {
            local
                .get(endpoint)
                .copied()
                .or_else(|| by_key.get(&normalize_key(endpoint)).copied())
        };

        for relation in &delta.relations {
            let (Some(source), Some(target)) = (resolve(&relation.source), resolve(&relation.target))
            else {
                dangling += 1;
                continue;
            };
            let triple = (source, target, relation.relation_name);
            match by_triple.get(&triple) {
                Some(&i) => {
                    let existing = &mut relations[i];
                    if outranks(relation, existing) {
                        existing.certainty = relation.certainty;
                        existing.evidence_text.clone_from(&relation.evidence_text);
                    }
                }
                None => {
                    by_triple.insert(triple, relations.len());
                    relations.push(GraphRelation {
                        source: entities[source].concept_name.clone(),
                        target: entities[target].concept_name.clone(),
                        relation_name: relation.relation_name,
                        evidence_text: relation.evidence_text.clone(),
                        certainty: relation.certainty,
                    });
                }
            }
        }
    }

    (KnowledgeGraph { entities, relations }, dangling)
}

/// A duplicate relation replaces the kept one when it is more certain, or
/// equally certain and the kept one has no evidence.
fn outranks(relation: &Relation, kept: &GraphRelation) -> bool {
    match relation.certainty.partial_cmp(&kept.certainty) {
        Some(Ordering::Greater) => true,
        Some(Ordering::Equal) => {
            kept.evidence_text.trim().is_empty() && !relation.evidence_text.trim().is_empty()
        }
        _ => false,
    }
}

fn keys(items: &[String]) -> HashSet<String> {
    items.iter().map(|s| normalize_key(s)).collect()
}

/// Two sub-cohorts describe the same scenario.
fn same_scenario(a: &SubCohort, b: &SubCohort) -> bool {
    normalize_key(&a.description.subject) == normalize_key(&b.description.subject)
        && !keys(&a.inclusion_criteria).is_disjoint(&keys(&b.inclusion_criteria))
}

/// Folds `other` into `kept`, keeping the description of the more
/// confident one.
fn merge_sub_cohort(kept: &mut SubCohort, other: SubCohort) {
    let (mut base, extra) = if other.confidence() > kept.confidence() {
        (other, std::mem::take(kept))
    } else {
        (std::mem::take(kept), other)
    };
    base.inclusion_criteria = dedup_strings(
        base.inclusion_criteria
            .into_iter()
            .chain(extra.inclusion_criteria)
            .collect(),
    );
    base.exclusion_criteria = dedup_strings(
        base.exclusion_criteria
            .into_iter()
            .chain(extra.exclusion_criteria)
            .collect(),
    );
    base.source_sentences = dedup_strings(
        base.source_sentences
            .into_iter()
            .chain(extra.source_sentences)
            .collect(),
    );
    *kept = base;
}

fn merge_cohorts(ordered: &[&NamespaceDelta]) -> CohortArtifact {
    let mut cohorts: Vec<CohortDefinition> = Vec::new();
    let mut by_subject: HashMap<String, usize> = HashMap::new();

    for delta in ordered {
        for cohort in &delta.cohorts {
            let key = normalize_key(&cohort.subject);
            let i = *by_subject.entry(key).or_insert_with(|| {
                cohorts.push(CohortDefinition {
                    subject: cohort.subject.clone(),
                    details: String::new(),
                    sub_cohorts: Vec::new(),
                });
                cohorts.len() - 1
            });
            let target = &mut cohorts[i];
            if target.details.trim().is_empty() {
                target.details.clone_from(&cohort.details);
            }
            for sub in &cohort.sub_cohorts {
                match target
                    .sub_cohorts
                    .iter_mut()
                    .find(|existing| same_scenario(existing, sub))
                {
                    Some(existing) => merge_sub_cohort(existing, sub.clone()),
                    None => target.sub_cohorts.push(sub.clone()),
                }
            }
        }
    }

    cohorts.retain(|c| !c.sub_cohorts.is_empty());
    CohortArtifact {
        main_cohorts: cohorts,
    }
}

fn merge_pathways(ordered: &[&NamespaceDelta]) -> Vec<Pathway> {
    let mut seen = HashSet::new();
    ordered
        .iter()
        .flat_map(|d| d.pathways.iter())
        .filter(|p| seen.insert(normalize_key(&p.name)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Description, Entity, Namespace, Verification};
    use serde_json::json;

    fn relation(source: &str, target: &str, name: RelationName, certainty: f64) -> Relation {
        Relation {
            source: source.to_string(),
            target: target.to_string(),
            relation_name: name,
            evidence_text: format!("{source} {target}"),
            certainty,
        }
    }

    fn sub(subject: &str, inclusion: &[&str], confidence: f64) -> SubCohort {
        SubCohort {
            description: Description {
                subject: subject.to_string(),
                details: format!("confidence {confidence}"),
            },
            inclusion_criteria: inclusion.iter().map(ToString::to_string).collect(),
            exclusion_criteria: Vec::new(),
            source_sentences: vec![format!("{subject}.")],
            verification: Some(Verification {
                confidence,
                best_evidence: confidence,
                low_confidence: false,
            }),
        }
    }

    #[test]
    fn test_entities_merge_with_precedence_and_overrides() {
        let mut manager = NamespaceDelta::empty(Namespace::Manager);
        manager.entities.push(
            Entity::new("m1", "Atorvastatin", Domain::Drug)
                .with_attribute("dose", json!("10 mg"))
                .with_attribute("route", json!("oral")),
        );
        let mut drug = NamespaceDelta::empty(Namespace::Drug);
        let mut atorva = Entity::new("d1", "  atorvastatin ", Domain::Drug)
            .with_attribute("dose", json!("40-80 mg"))
            .with_attribute("route", json!("iv"))
            .with_attribute("frequency", json!("daily"));
        atorva.overrides.insert("dose".to_string());
        drug.entities.push(atorva);

        let result = aggregate([&drug, &manager]);
        let entities = &result.knowledge_graph.entities;
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].concept_name, "Atorvastatin");
        assert_eq!(entities[0].attributes["dose"], json!("40-80 mg"));
        assert_eq!(entities[0].attributes["route"], json!("oral"));
        assert_eq!(entities[0].attributes["frequency"], json!("daily"));
    }

    #[test]
    fn test_relations_rekeyed_deduped_and_dangling_dropped() {
        let mut drug = NamespaceDelta::empty(Namespace::Drug);
        drug.entities.push(Entity::new("d1", "Atorvastatin", Domain::Drug));
        drug.relations = vec![
            relation("d1", "Hypercholesterolemia", RelationName::Treats, 0.6),
            relation("d1", "Unknown condition", RelationName::Treats, 0.9),
        ];
        let mut diagnosis = NamespaceDelta::empty(Namespace::Diagnosis);
        diagnosis
            .entities
            .push(Entity::new("x1", "Hypercholesterolemia", Domain::Condition));
        diagnosis
            .entities
            .push(Entity::new("x2", "atorvastatin", Domain::Other));
        diagnosis.relations = vec![relation("x2", "x1", RelationName::Treats, 0.8)];

        let result = aggregate([&diagnosis, &drug]);
        let graph = &result.knowledge_graph;
        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.relations.len(), 1);
        assert_eq!(result.dangling_relations, 1);

        let treats = &graph.relations[0];
        assert_eq!(treats.source, "Atorvastatin");
        assert_eq!(treats.target, "Hypercholesterolemia");
        assert!((treats.certainty - 0.8).abs() < f64::EPSILON);
        assert_eq!(treats.evidence_text, "x2 x1");
    }

    #[test]
    fn test_relation_tie_prefers_evidence() {
        let mut manager = NamespaceDelta::empty(Namespace::Manager);
        manager.entities.push(Entity::new("m1", "Atorvastatin", Domain::Drug));
        let mut bare = relation("m1", "Hypercholesterolemia", RelationName::Treats, 0.9);
        bare.evidence_text = String::new();
        manager.relations.push(bare);

        let mut drug = NamespaceDelta::empty(Namespace::Drug);
        drug.entities.push(Entity::new("d1", "Atorvastatin", Domain::Drug));
        drug.entities.push(Entity::new("d2", "Hypercholesterolemia", Domain::Condition));
        drug.relations = vec![relation("d1", "d2", RelationName::Treats, 0.9)];

        for result in [aggregate([&manager, &drug]), aggregate([&drug, &manager])] {
            let relations = &result.knowledge_graph.relations;
            assert_eq!(relations.len(), 1);
            assert_eq!(relations[0].evidence_text, "d1 d2");
        }
    }

    #[test]
    fn test_cohorts_union_and_sub_cohort_merge() {
        let mut manager = NamespaceDelta::empty(Namespace::Manager);
        manager.cohorts = vec![
            CohortDefinition {
                subject: "Lipid management".to_string(),
                details: "From the manager".to_string(),
                sub_cohorts: Vec::new(),
            },
            CohortDefinition {
                subject: "Smoking cessation".to_string(),
                details: String::new(),
                sub_cohorts: Vec::new(),
            },
        ];
        let mut drug = NamespaceDelta::empty(Namespace::Drug);
        drug.cohorts.push(CohortDefinition {
            subject: "lipid  management".to_string(),
            details: "From drug".to_string(),
            sub_cohorts: vec![sub("Severe", &["LDL-C ≥190mg/dL"], 0.6)],
        });
        let mut diagnosis = NamespaceDelta::empty(Namespace::Diagnosis);
        diagnosis.cohorts.push(CohortDefinition {
            subject: "Lipid management".to_string(),
            details: String::new(),
            sub_cohorts: vec![
                sub("severe", &["ldl-c ≥190mg/dl", "Age ≥21"], 0.9),
                sub("Severe", &["Triglycerides ≥500mg/dL"], 0.7),
            ],
        });

        let result = aggregate([&diagnosis, &manager, &drug]);
        let cohorts = &result.cohorts.main_cohorts;
        assert_eq!(cohorts.len(), 1);
        assert_eq!(cohorts[0].subject, "Lipid management");
        assert_eq!(cohorts[0].details, "From the manager");

        let subs = &cohorts[0].sub_cohorts;
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].description.details, "confidence 0.9");
        assert_eq!(subs[0].inclusion_criteria, vec!["ldl-c ≥190mg/dl", "Age ≥21"]);
        assert_eq!(subs[0].source_sentences, vec!["severe."]);
    }

    #[test]
    fn test_pathways_deduplicated_by_name() {
        let step = crate::core::PathwayStep {
            index: 1,
            decision_point: false,
            alternatives: vec![],
        };
        let mut drug = NamespaceDelta::empty(Namespace::Drug);
        drug.pathways.push(Pathway {
            name: "Lipid lowering".to_string(),
            steps: vec![step.clone()],
        });
        let mut diagnosis = NamespaceDelta::empty(Namespace::Diagnosis);
        diagnosis.pathways.push(Pathway {
            name: "LIPID lowering".to_string(),
            steps: vec![],
        });
        diagnosis.pathways.push(Pathway {
            name: "Diabetes work-up".to_string(),
            steps: vec![step],
        });

        let result = aggregate([&diagnosis, &drug]);
        let names: Vec<&str> = result.pathways.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Lipid lowering", "Diabetes work-up"]);
    }
}

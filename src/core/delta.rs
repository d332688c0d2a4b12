//! Namespaced contributions produced by agents.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::cohort::{CohortDefinition, Pathway};
use super::entity::{Entity, Relation};
use super::text::normalize_key;

/// Namespace an agent writes into.
///
/// The declaration order is the merge precedence used by the aggregator:
/// earlier namespaces win attribute conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Manager drafts.
    Manager,
    /// Drug specialist.
    Drug,
    /// Diagnosis specialist.
    Diagnosis,
}

impl Namespace {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Drug => "drug",
            Self::Diagnosis => "diagnosis",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one agent contributed under its namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceDelta {
    /// Owning namespace.
    pub namespace: Namespace,
    /// Extracted entities (ids unique within this delta).
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Extracted relations between this delta's entities.
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// Cohort drafts.
    #[serde(default)]
    pub cohorts: Vec<CohortDefinition>,
    /// Treatment or diagnostic pathways.
    #[serde(default)]
    pub pathways: Vec<Pathway>,
}

impl NamespaceDelta {
    /// Creates an empty delta for `namespace`.
    #[must_use]
    pub const fn empty(namespace: Namespace) -> Self {
        Self {
            namespace,
            entities: Vec::new(),
            relations: Vec::new(),
            cohorts: Vec::new(),
            pathways: Vec::new(),
        }
    }

    /// Returns `true` if the delta contributes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.relations.is_empty()
            && self.cohorts.is_empty()
            && self.pathways.is_empty()
    }

    /// Number of sub-cohorts across all cohorts.
    #[must_use]
    pub fn sub_cohort_count(&self) -> usize {
        self.cohorts.iter().map(|c| c.sub_cohorts.len()).sum()
    }

    /// Re-keys entities whose id repeats an earlier id in this delta.
    ///
    /// The first entity keeps the id; later ones get a `#n` suffix.
    /// Relations keep pointing at the first entity. Returns the number of
    /// re-keyed entities.
    pub fn ensure_unique_ids(&mut self) -> usize {
        let mut seen: HashSet<String> = HashSet::new();
        let mut rekeyed = 0;
        for entity in &mut self.entities {
            if seen.insert(entity.id.clone()) {
                continue;
            }
            let mut n = 2;
            let mut candidate = format!("{}#{n}", entity.id);
            while seen.contains(&candidate) {
                n += 1;
                candidate = format!("{}#{n}", entity.id);
            }
            entity.id.clone_from(&candidate);
            seen.insert(candidate);
            rekeyed += 1;
        }
        rekeyed
    }

    /// Folds a later contribution of the same namespace into this one.
    ///
    /// Used when a specialist is revisited. Cohorts with the same
    /// normalized subject are combined; pathways are de-duplicated by name.
    pub fn absorb(&mut self, other: Self) {
        debug_assert_eq!(self.namespace, other.namespace);

        let mut taken: HashSet<String> = self.entities.iter().map(|e| e.id.clone()).collect();
        let mut renamed: HashMap<String, String> = HashMap::new();
        for mut entity in other.entities {
            if taken.contains(&entity.id) {
                let mut n = 2;
                let mut candidate = format!("{}#{n}", entity.id);
                while taken.contains(&candidate) {
                    n += 1;
                    candidate = format!("{}#{n}", entity.id);
                }
                renamed.insert(entity.id.clone(), candidate.clone());
                entity.id = candidate;
            }
            taken.insert(entity.id.clone());
            self.entities.push(entity);
        }
        for mut relation in other.relations {
            if let Some(id) = renamed.get(&relation.source) {
                relation.source.clone_from(id);
            }
            if let Some(id) = renamed.get(&relation.target) {
                relation.target.clone_from(id);
            }
            self.relations.push(relation);
        }

        for cohort in other.cohorts {
            let key = normalize_key(&cohort.subject);
            if let Some(existing) = self
                .cohorts
                .iter_mut()
                .find(|c| normalize_key(&c.subject) == key)
            {
                if existing.details.trim().is_empty() {
                    existing.details = cohort.details;
                }
                existing.sub_cohorts.extend(cohort.sub_cohorts);
            } else {
                self.cohorts.push(cohort);
            }
        }

        for pathway in other.pathways {
            let key = normalize_key(&pathway.name);
            if !self.pathways.iter().any(|p| normalize_key(&p.name) == key) {
                self.pathways.push(pathway);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cohort::SubCohort;
    use crate::core::entity::Domain;

    fn cohort(subject: &str, subs: usize) -> CohortDefinition {
        CohortDefinition {
            subject: subject.to_string(),
            details: String::new(),
            sub_cohorts: vec![SubCohort::default(); subs],
        }
    }

    #[test]
    fn test_namespace_precedence() {
        assert!(Namespace::Manager < Namespace::Drug);
        assert!(Namespace::Drug < Namespace::Diagnosis);
        assert_eq!(Namespace::Diagnosis.to_string(), "diagnosis");
    }

    #[test]
    fn test_ensure_unique_ids() {
        let mut delta = NamespaceDelta::empty(Namespace::Drug);
        delta.entities = vec![
            Entity::new("e1", "Atorvastatin", Domain::Drug),
            Entity::new("e1", "Rosuvastatin", Domain::Drug),
            Entity::new("e1#2", "Ezetimibe", Domain::Drug),
            Entity::new("e1", "Simvastatin", Domain::Drug),
        ];
        let rekeyed = delta.ensure_unique_ids();
        assert_eq!(rekeyed, 3);
        let ids: Vec<&str> = delta.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e1#2", "e1#2#2", "e1#3"]);
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_absorb_merges_cohorts_by_subject() {
        let mut first = NamespaceDelta::empty(Namespace::Drug);
        first.cohorts.push(cohort("Statin therapy", 1));
        first.entities.push(Entity::new("e1", "Atorvastatin", Domain::Drug));

        let mut second = NamespaceDelta::empty(Namespace::Drug);
        second.cohorts.push(cohort("statin  THERAPY", 2));
        second.cohorts.push(cohort("Antiplatelets", 1));
        second.entities.push(Entity::new("e1", "Aspirin", Domain::Drug));
        second.relations.push(Relation {
            source: "e1".to_string(),
            target: "hyperlipidemia".to_string(),
            relation_name: crate::core::entity::RelationName::Treats,
            evidence_text: String::new(),
            certainty: 0.5,
        });

        first.absorb(second);
        assert_eq!(first.cohorts.len(), 2);
        assert_eq!(first.cohorts[0].sub_cohorts.len(), 3);
        assert_eq!(first.sub_cohort_count(), 4);
        assert_eq!(first.entities[1].id, "e1#2");
        assert_eq!(first.relations[0].source, "e1#2");
        assert_eq!(first.relations[0].target, "hyperlipidemia");
    }
}

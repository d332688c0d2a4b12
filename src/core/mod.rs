//! Domain model for guideline extraction.
//!
//! Entities, relations, cohorts, and pathways are plain serde types with
//! no dependency on the agent runtime, so the aggregator and validators can
//! be exercised without a provider.

pub mod cohort;
pub mod delta;
pub mod entity;
pub mod text;

pub use cohort::{
    CohortArtifact, CohortDefinition, Description, Pathway, PathwayStep, SubCohort, Verification,
};
pub use delta::{Namespace, NamespaceDelta};
pub use entity::{
    Domain, Entity, GraphEntity, GraphRelation, KnowledgeGraph, Relation, RelationName,
    parse_certainty,
};
pub use text::VerbatimText;

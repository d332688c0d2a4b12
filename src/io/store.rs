//! Artifact persistence.
//!
//! Each document gets its own directory under the store root:
//!
//! ```text
//! <root>/<document_id>/cohorts.json
//! <root>/<document_id>/knowledge_graph.json
//! <root>/<document_id>/report.json
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::agent::result::{FinalResult, RunStatus, VerificationRecord};
use crate::agent::state::WorkflowState;
use crate::core::Pathway;
use crate::error::{CommandError, Result};

/// Cohort-analysis artifact file name.
pub const COHORTS_FILE: &str = "cohorts.json";
/// Knowledge-graph artifact file name.
pub const GRAPH_FILE: &str = "knowledge_graph.json";
/// Run report file name.
pub const REPORT_FILE: &str = "report.json";

/// Run metadata written next to the artifacts.
#[derive(Debug, Serialize)]
struct Report<'a> {
    document_id: &'a str,
    status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<&'a str>,
    sub_cohorts: usize,
    entities: usize,
    relations: usize,
    pathways: &'a [Pathway],
    verification: &'a [VerificationRecord],
    warnings: &'a [String],
    visited: &'a [String],
    iterations: usize,
    total_tokens: u64,
    provider_calls: u64,
    elapsed_secs: f64,
}

impl<'a> Report<'a> {
    fn new(document_id: &'a str, result: &'a FinalResult) -> Self {
        Self {
            document_id,
            status: result.status,
            failure: result.failure.as_deref(),
            sub_cohorts: result.sub_cohort_count(),
            entities: result.knowledge_graph.entities.len(),
            relations: result.knowledge_graph.relations.len(),
            pathways: &result.pathways,
            verification: &result.verification,
            warnings: &result.warnings,
            visited: &result.visited,
            iterations: result.iterations,
            total_tokens: result.total_tokens,
            provider_calls: result.provider_calls,
            elapsed_secs: result.elapsed.as_secs_f64(),
        }
    }
}

/// Writes run artifacts to the local filesystem.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Creates a store rooted at `root`. Nothing is written until
    /// [`ArtifactStore::persist`] is called.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the artifacts of `document_id`.
    #[must_use]
    pub fn document_dir(&self, document_id: &str) -> PathBuf {
        self.root.join(sanitize_id(document_id))
    }

    /// Writes the artifacts of a finished run and returns their directory.
    ///
    /// # Errors
    ///
    /// Fails when the run has no result or a file cannot be written.
    pub fn persist(&self, document_id: &str, state: &WorkflowState) -> Result<PathBuf> {
        let result = state.result.as_ref().ok_or_else(|| {
            CommandError::ExecutionFailed(format!("run for '{document_id}' has no result"))
        })?;

        let dir = self.document_dir(document_id);
        std::fs::create_dir_all(&dir)?;
        write_json(&dir.join(COHORTS_FILE), &result.cohorts)?;
        write_json(&dir.join(GRAPH_FILE), &result.knowledge_graph)?;
        write_json(&dir.join(REPORT_FILE), &Report::new(document_id, result))?;

        info!(
            document = document_id,
            dir = %dir.display(),
            status = %result.status,
            "artifacts written"
        );
        Ok(dir)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    std::fs::write(path, json)?;
    Ok(())
}

/// Keeps ids usable as a single path component.
#[must_use]
pub fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::{
        CohortArtifact, CohortDefinition, Description, GraphEntity, KnowledgeGraph, SubCohort,
    };
    use tempfile::TempDir;

    fn finished_state() -> WorkflowState {
        let mut state = WorkflowState::new("Statins lower LDL-C.");
        state.result = Some(FinalResult {
            status: RunStatus::Complete,
            cohorts: CohortArtifact {
                main_cohorts: vec![CohortDefinition {
                    subject: "Statin therapy".to_string(),
                    details: String::new(),
                    sub_cohorts: vec![SubCohort {
                        description: Description {
                            subject: "Adults".to_string(),
                            details: String::new(),
                        },
                        inclusion_criteria: vec!["LDL-C ≥190mg/dL".to_string()],
                        exclusion_criteria: Vec::new(),
                        source_sentences: vec!["Statins lower LDL-C.".to_string()],
                        verification: None,
                    }],
                }],
            },
            knowledge_graph: KnowledgeGraph {
                entities: vec![GraphEntity {
                    concept_name: "Statin".to_string(),
                    domain: crate::core::Domain::Drug,
                    attributes: std::collections::BTreeMap::new(),
                }],
                relations: Vec::new(),
            },
            pathways: Vec::new(),
            verification: Vec::new(),
            failure: None,
            warnings: vec!["something minor".to_string()],
            visited: vec!["ManagerAgent".to_string(), "DrugAgent".to_string()],
            iterations: 2,
            total_tokens: 120,
            provider_calls: 3,
            elapsed: Duration::from_millis(1500),
        });
        state
    }

    #[test]
    fn test_persist_writes_three_files() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let dir = store.persist("acc/aha 2018", &finished_state()).unwrap();
        assert_eq!(dir, tmp.path().join("acc_aha_2018"));

        let cohorts: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join(COHORTS_FILE)).unwrap())
                .unwrap();
        let sub = &cohorts["main_cohorts"][0]["sub_cohorts"][0];
        assert_eq!(sub["description"]["subject"], "Adults");
        assert!(sub.get("verification").is_none());

        let graph: KnowledgeGraph =
            serde_json::from_str(&std::fs::read_to_string(dir.join(GRAPH_FILE)).unwrap()).unwrap();
        assert_eq!(graph.entities.len(), 1);

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join(REPORT_FILE)).unwrap())
                .unwrap();
        assert_eq!(report["status"], "complete");
        assert_eq!(report["sub_cohorts"], 1);
        assert_eq!(report["provider_calls"], 3);
        assert!(report.get("failure").is_none());
    }

    #[test]
    fn test_persist_without_result_fails() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path());
        assert!(store.persist("x", &WorkflowState::new("text")).is_err());
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("guideline_01"), "guideline_01");
        assert_eq!(sanitize_id("../etc"), "_etc");
        assert_eq!(sanitize_id(".."), "document");
    }
}

//! CLI command implementations.
//!
//! Contains the business logic for each CLI command.

// Allow certain patterns that improve readability in CLI output formatting
#![allow(clippy::format_push_string)]

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::client::create_provider;
use crate::agent::config::AgentConfig;
use crate::agent::orchestrator::Orchestrator;
use crate::agent::prompt::PromptSet;
use crate::agent::result::RunStatus;
use crate::cli::output::{OutputFormat, format_score};
use crate::cli::parser::{Cli, Commands, PromptCommands, RunArgs};
use crate::error::{CommandError, Result};
use crate::io::store::sanitize_id;
use crate::io::{ArtifactStore, load_document};
use crate::search::EvidenceIndex;

/// Executes the CLI command.
///
/// # Returns
///
/// Result with output string on success.
///
/// # Errors
///
/// Returns an error if the command fails to execute.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);

    match &cli.command {
        Commands::Run(args) => cmd_run(args, format),
        Commands::Search {
            file,
            question,
            top_k,
        } => cmd_search(file, question, *top_k, format),
        Commands::Prompts(PromptCommands::Init { dir }) => cmd_init_prompts(dir.as_deref(), format),
    }
}

/// Outcome of one document in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    /// Input file.
    pub file: PathBuf,
    /// Artifact id: the file stem, suffixed when another input shares it.
    pub document_id: String,
    /// Run status; absent when the document could not be processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    /// Artifact directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<PathBuf>,
    /// Main cohorts produced.
    pub cohorts: usize,
    /// Sub-cohorts produced.
    pub sub_cohorts: usize,
    /// Knowledge-graph entities.
    pub entities: usize,
    /// Knowledge-graph relations.
    pub relations: usize,
    /// Sub-cohorts kept with low confidence.
    pub low_confidence: usize,
    /// Warnings recorded during the run.
    pub warnings: usize,
    /// Load, run, or persistence error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentOutcome {
    fn new(file: &Path, document_id: String) -> Self {
        Self {
            file: file.to_path_buf(),
            document_id,
            status: None,
            artifacts: None,
            cohorts: 0,
            sub_cohorts: 0,
            entities: 0,
            relations: 0,
            low_confidence: 0,
            warnings: 0,
            error: None,
        }
    }

    fn failed(file: &Path, document_id: String, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(file, document_id)
        }
    }
}

/// Gives every input file its own artifact directory name.
///
/// Files whose stems collide (`a/guide.json b/guide.json`, `guide.txt
/// guide.json`) get `-2`, `-3`, ... suffixes in input order. Comparison
/// ignores case.
fn artifact_ids(files: &[PathBuf]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    files
        .iter()
        .map(|file| {
            let stem = file
                .file_stem()
                .map_or_else(|| "document".to_string(), |s| s.to_string_lossy().into_owned());
            let base = sanitize_id(&stem);
            let mut id = base.clone();
            let mut n = 2;
            while !taken.insert(id.to_lowercase()) {
                id = format!("{base}-{n}");
                n += 1;
            }
            if id != base {
                warn!(file = %file.display(), id = %id, "document id already in use; suffixed");
            }
            id
        })
        .collect()
}

fn build_config(args: &RunArgs) -> Result<AgentConfig> {
    let mut builder = AgentConfig::builder()
        .parallel_specialists(!args.sequential)
        .from_env();
    if let Some(model) = &args.manager_model {
        builder = builder.manager_model(model);
    }
    if let Some(model) = &args.specialist_model {
        builder = builder.specialist_model(model);
    }
    if let Some(model) = &args.verifier_model {
        builder = builder.verifier_model(model);
    }
    if let Some(dir) = &args.prompt_dir {
        builder = builder.prompt_dir(dir);
    }
    if let Some(n) = args.concurrency {
        builder = builder.max_concurrency(n);
    }
    if let Some(secs) = args.timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    if let Some(n) = args.max_revisits {
        builder = builder.max_revisits(n);
    }
    if let Some(n) = args.max_iterations {
        builder = builder.max_iterations(n);
    }
    if let Some(n) = args.max_manager_chars {
        builder = builder.max_manager_chars(n);
    }

    builder
        .build()
        .map_err(|e| CommandError::ExecutionFailed(format!("Agent configuration error: {e}")).into())
}

async fn process_file(
    orchestrator: &Orchestrator,
    store: &ArtifactStore,
    file: &Path,
    id: String,
    cancel: CancellationToken,
) -> DocumentOutcome {
    let document = match load_document(file) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(file = %file.display(), error = %e, "skipping document");
            return DocumentOutcome::failed(file, id, e.to_string());
        }
    };

    info!(document = %id, title = %document.title, "processing guideline");
    let state = orchestrator.run(&document.text, cancel).await;

    let mut outcome = DocumentOutcome::new(file, id);
    outcome.warnings = state.warnings.len();
    if let Some(result) = &state.result {
        outcome.status = Some(result.status);
        outcome.cohorts = result.cohorts.main_cohorts.len();
        outcome.sub_cohorts = result.sub_cohort_count();
        outcome.entities = result.knowledge_graph.entities.len();
        outcome.relations = result.knowledge_graph.relations.len();
        outcome.low_confidence = result.low_confidence().count();
    }
    match store.persist(&outcome.document_id, &state) {
        Ok(dir) => outcome.artifacts = Some(dir),
        Err(e) => outcome.error = Some(e.to_string()),
    }
    outcome
}

fn cmd_run(args: &RunArgs, format: OutputFormat) -> Result<String> {
    let config = build_config(args)?;
    let provider = create_provider(&config).map_err(|e| {
        CommandError::ExecutionFailed(format!("Provider creation failed: {e}"))
    })?;
    let orchestrator = Orchestrator::new(Arc::from(provider), config);
    let store = ArtifactStore::new(&args.out);
    let jobs = args.jobs.max(1);

    // Create tokio runtime as sync/async bridge
    let rt = tokio::runtime::Runtime::new().map_err(|e| {
        CommandError::ExecutionFailed(format!("Failed to create async runtime: {e}"))
    })?;

    let outcomes = rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        let signal = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling runs");
                on_signal.cancel();
            }
        });

        let ids = artifact_ids(&args.files);
        let mut outcomes: Vec<(usize, DocumentOutcome)> =
            stream::iter(args.files.iter().zip(ids).enumerate())
                .map(|(i, (file, id))| {
                    let cancel = cancel.clone();
                    let orchestrator = &orchestrator;
                    let store = &store;
                    async move { (i, process_file(orchestrator, store, file, id, cancel).await) }
                })
                .buffer_unordered(jobs)
                .collect()
                .await;

        signal.abort();
        outcomes.sort_by_key(|(i, _)| *i);
        outcomes.into_iter().map(|(_, o)| o).collect::<Vec<_>>()
    });

    match format {
        OutputFormat::Text => Ok(format_outcomes(&outcomes)),
        OutputFormat::Json => Ok(format.to_json(&outcomes)),
    }
}

fn format_outcomes(outcomes: &[DocumentOutcome]) -> String {
    let mut output = String::new();
    for o in outcomes {
        let status = o.status.map_or("error", RunStatus::as_str);
        let _ = writeln!(output, "{} [{status}]", o.document_id);
        if o.status.is_some() {
            let _ = writeln!(
                output,
                "  cohorts: {} ({} sub-cohorts, {} low confidence) | entities: {} | relations: {} | warnings: {}",
                o.cohorts, o.sub_cohorts, o.low_confidence, o.entities, o.relations, o.warnings
            );
        }
        if let Some(dir) = &o.artifacts {
            let _ = writeln!(output, "  artifacts: {}", dir.display());
        }
        if let Some(err) = &o.error {
            let _ = writeln!(output, "  error: {err}");
        }
    }
    output
}

#[derive(Debug, Serialize)]
struct SearchHit<'a> {
    rank: usize,
    index: usize,
    score: f64,
    normalized: f64,
    sentence: &'a str,
}

fn cmd_search(file: &Path, question: &str, top_k: usize, format: OutputFormat) -> Result<String> {
    if top_k == 0 {
        return Err(CommandError::InvalidArgument("-k must be at least 1".to_string()).into());
    }
    let document = load_document(file)?;
    let index = EvidenceIndex::build(&document.text);
    let results = index.query(question, top_k);

    let hits: Vec<SearchHit<'_>> = results
        .iter()
        .enumerate()
        .map(|(rank, r)| SearchHit {
            rank: rank + 1,
            index: r.index,
            score: r.score,
            normalized: r.normalized,
            sentence: &r.sentence,
        })
        .collect();

    match format {
        OutputFormat::Text => {
            if hits.is_empty() {
                return Ok(format!(
                    "No matching sentences in {} ({} sentences indexed)\n",
                    document.id,
                    index.len()
                ));
            }
            let mut output = format!(
                "{} ({} sentences indexed)\n",
                document.title,
                index.len()
            );
            for hit in &hits {
                output.push_str(&format!(
                    "{:>2}. [{}] {} (normalized {})\n    {}\n",
                    hit.rank,
                    hit.index,
                    format_score(hit.score),
                    format_score(hit.normalized),
                    hit.sentence
                ));
            }
            Ok(output)
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "document": document.id,
                "question": question,
                "sentences": index.len(),
                "results": hits,
            });
            Ok(format.to_json(&json))
        }
    }
}

fn cmd_init_prompts(dir: Option<&Path>, format: OutputFormat) -> Result<String> {
    let target_dir = dir
        .map(PathBuf::from)
        .or_else(PromptSet::default_dir)
        .ok_or_else(|| {
            CommandError::ExecutionFailed(
                "Could not determine home directory for default prompt path".to_string(),
            )
        })?;

    let written = PromptSet::write_defaults(&target_dir).map_err(|e| {
        CommandError::ExecutionFailed(format!("Failed to write prompt templates: {e}"))
    })?;

    match format {
        OutputFormat::Text => {
            if written.is_empty() {
                return Ok(format!(
                    "All prompt templates already exist in: {}\n",
                    target_dir.display()
                ));
            }
            let mut output = format!(
                "Wrote {} prompt template(s) to: {}\n",
                written.len(),
                target_dir.display()
            );
            for path in &written {
                output.push_str(&format!(
                    "  {}\n",
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("unknown")
                ));
            }
            output.push_str("\nEdit these files to customize agent system prompts.\n");
            Ok(output)
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "directory": target_dir.to_string_lossy(),
                "written": written.iter().map(|p| p.to_string_lossy().into_owned()).collect::<Vec<_>>(),
                "count": written.len()
            });
            Ok(format.to_json(&json))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GUIDELINE: &str = "Patients with LDL-C ≥190mg/dL should receive high-intensity statin therapy.\n\nReassess lipids after 4-12 weeks.\n\nLifestyle counselling is recommended for all adults.";

    fn guideline_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("lipids.txt");
        std::fs::write(&path, GUIDELINE).unwrap();
        path
    }

    #[test]
    fn test_cmd_search_text() {
        let dir = TempDir::new().unwrap();
        let file = guideline_file(&dir);
        let out = cmd_search(&file, "Which patients receive statin therapy?", 2, OutputFormat::Text)
            .unwrap();
        assert!(out.starts_with("lipids (3 sentences indexed)"));
        assert!(out.contains(" 1. [0]"));
        assert!(out.contains("high-intensity statin therapy"));
    }

    #[test]
    fn test_cmd_search_json() {
        let dir = TempDir::new().unwrap();
        let file = guideline_file(&dir);
        let out = cmd_search(&file, "reassess lipids", 1, OutputFormat::Json).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["results"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["results"][0]["index"], 1);
    }

    #[test]
    fn test_cmd_search_rejects_zero_k() {
        let dir = TempDir::new().unwrap();
        let file = guideline_file(&dir);
        assert!(cmd_search(&file, "statin", 0, OutputFormat::Text).is_err());
    }

    #[test]
    fn test_artifact_ids_never_collide() {
        let files: Vec<PathBuf> = [
            "a/guide.json",
            "b/guide.json",
            "guide.txt",
            "Guide.md",
            "lipids.txt",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        let ids = artifact_ids(&files);
        assert_eq!(ids, vec!["guide", "guide-2", "guide-3", "Guide-4", "lipids"]);

        let store = ArtifactStore::new("out");
        let dirs: HashSet<String> = ids
            .iter()
            .map(|id| store.document_dir(id).to_string_lossy().to_lowercase())
            .collect();
        assert_eq!(dirs.len(), files.len());
    }

    #[test]
    fn test_cmd_init_prompts() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("prompts");
        let out = cmd_init_prompts(Some(&target), OutputFormat::Text).unwrap();
        assert!(out.contains("Wrote 5 prompt template(s)"));
        assert!(target.join("manager.md").exists());

        let again = cmd_init_prompts(Some(&target), OutputFormat::Json).unwrap();
        let json: serde_json::Value = serde_json::from_str(&again).unwrap();
        assert_eq!(json["count"], 0);
    }

    #[test]
    fn test_format_outcomes() {
        let mut ok = DocumentOutcome::new(Path::new("a.json"), "a".to_string());
        ok.status = Some(RunStatus::Incomplete);
        ok.sub_cohorts = 2;
        let failed = DocumentOutcome::failed(
            Path::new("b.json"),
            "b".to_string(),
            "document b.json is empty".to_string(),
        );

        let text = format_outcomes(&[ok, failed]);
        assert!(text.contains("a [incomplete]"));
        assert!(text.contains("2 sub-cohorts"));
        assert!(text.contains("b [error]"));
        assert!(text.contains("error: document b.json is empty"));
    }
}

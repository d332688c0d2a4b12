//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// guideline-kg: multi-agent extraction of OMOP knowledge graphs and
/// cohort definitions from clinical guideline text.
#[derive(Parser, Debug)]
#[command(name = "guideline-kg")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose (debug) logging on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract cohorts and a knowledge graph from guideline files.
    ///
    /// Each file is processed by an independent run; artifacts are written
    /// to `<out>/<file stem>/`.
    #[command(after_help = r#"Examples:
  guideline-kg run guideline.json                    # One guideline, default models
  guideline-kg run data/*.json --jobs 4 --out runs   # Batch with four concurrent runs
  guideline-kg run notes.txt --max-iterations 4      # Tighter invocation cap
  guideline-kg --format json run g.json | jq '.[].status'
"#)]
    Run(RunArgs),

    /// Show the evidence sentences BM25 retrieves for a question.
    ///
    /// Runs locally; no model is called.
    #[command(after_help = r#"Examples:
  guideline-kg search guideline.json "Which patients receive statins?"
  guideline-kg search notes.txt "LDL-C threshold" -k 3
"#)]
    Search {
        /// Guideline file (JSON or plain text).
        file: PathBuf,

        /// Question to retrieve evidence for.
        question: String,

        /// Maximum number of sentences.
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,
    },

    /// Prompt template operations.
    #[command(subcommand)]
    Prompts(PromptCommands),
}

/// Options for the `run` command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Guideline files (JSON or plain text).
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Directory for per-document artifacts.
    #[arg(short, long, default_value = "output")]
    pub out: PathBuf,

    /// Documents processed concurrently.
    #[arg(short, long, default_value = "1")]
    pub jobs: usize,

    /// Model for the manager agent.
    #[arg(long)]
    pub manager_model: Option<String>,

    /// Model for the specialist agents.
    #[arg(long)]
    pub specialist_model: Option<String>,

    /// Model for the evidence verifier.
    #[arg(long)]
    pub verifier_model: Option<String>,

    /// Directory containing prompt template files.
    #[arg(long)]
    pub prompt_dir: Option<PathBuf>,

    /// Maximum concurrent provider calls per run.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Run specialists one after another instead of concurrently.
    #[arg(long)]
    pub sequential: bool,

    /// Per-call timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Maximum times one agent may be dispatched.
    #[arg(long)]
    pub max_revisits: Option<usize>,

    /// Maximum manager and specialist invocations per run.
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Truncate the text shown to the manager to this many bytes.
    #[arg(long)]
    pub max_manager_chars: Option<usize>,
}

/// Prompt template subcommands.
#[derive(Subcommand, Debug)]
pub enum PromptCommands {
    /// Write the default prompt templates for customization.
    ///
    /// Existing files are left untouched.
    Init {
        /// Target directory (defaults to ~/.config/guideline-kg/prompts).
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "guideline-kg",
            "--format",
            "json",
            "run",
            "a.json",
            "b.txt",
            "--jobs",
            "3",
            "--sequential",
        ])
        .unwrap();
        assert_eq!(cli.format, "json");
        let Commands::Run(args) = cli.command else {
            unreachable!("expected run");
        };
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.jobs, 3);
        assert!(args.sequential);
        assert_eq!(args.out, PathBuf::from("output"));
    }

    #[test]
    fn test_run_requires_files() {
        assert!(Cli::try_parse_from(["guideline-kg", "run"]).is_err());
    }

    #[test]
    fn test_parse_search() {
        let cli =
            Cli::try_parse_from(["guideline-kg", "search", "g.txt", "statins", "-k", "2"]).unwrap();
        match cli.command {
            Commands::Search { top_k, question, .. } => {
                assert_eq!(top_k, 2);
                assert_eq!(question, "statins");
            }
            other => unreachable!("unexpected {other:?}"),
        }
    }
}

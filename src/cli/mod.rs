//! CLI layer for guideline-kg.
//!
//! Provides the command-line interface using clap, with commands for
//! running extractions, inspecting evidence retrieval, and managing
//! prompt templates.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::execute;
pub use output::OutputFormat;
pub use parser::{Cli, Commands, PromptCommands, RunArgs};

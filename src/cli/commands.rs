//! CLI command definitions

use crate::core::RunStatus;
use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Variable overrides (key=value)
    #[arg(long = "var", alias = "variable", value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Environment overrides for every tool (KEY=VALUE)
    #[arg(long = "env", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Directory the pipeline runs in (defaults to the current directory)
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    /// Append every tool invocation and its output to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Don't save execution to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the run outcome as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show execution counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Only runs that ended with this status (succeeded, failed, aborted)
    #[arg(short, long, value_parser = parse_status)]
    pub status: Option<RunStatus>,

    /// Show the stored record of a single execution
    #[arg(long)]
    pub details: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific execution
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

fn parse_status(s: &str) -> Result<RunStatus, String> {
    RunStatus::parse(&s.to_ascii_lowercase()).ok_or_else(|| format!("Unknown run status: {}", s))
}

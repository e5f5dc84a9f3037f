//! CLI command definitions

use crate::adapter::{rows_from_value, Row};
use clap::Args;
use serde_json::Value;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Pipeline key
    #[arg(short, long)]
    pub pipeline: String,

    /// Register this definition file under the pipeline key before running
    #[arg(short, long)]
    pub file: Option<String>,

    /// Parameter sets as a JSON array of objects (or a single object)
    #[arg(long)]
    pub params: Option<String>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    /// Parse `--params`; `None` lets the pipeline decide
    pub fn params_list(&self) -> Result<Option<Vec<Row>>, String> {
        let Some(raw) = &self.params else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(raw).map_err(|e| format!("--params is not JSON: {}", e))?;
        let rows = match value {
            Value::Object(row) => vec![row],
            other => rows_from_value(other)?,
        };
        Ok(Some(rows))
    }
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Print the parsed definition as JSON
    #[arg(long)]
    pub json: bool,
}

/// List configured pipelines
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts from history
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline key to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Print the full run record with `--run-id`
    #[arg(long)]
    pub details: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,
}

//! Run state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one top-level pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Accepted, waiting for a worker
    Pending,
    /// Currently running
    Running,
    /// Every parameter set finished
    Completed,
    /// Aborted by an unrecovered error
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(RunStatus::Pending),
            "Running" => Some(RunStatus::Running),
            "Completed" => Some(RunStatus::Completed),
            "Failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Lifecycle of one top-level run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Run id, also stored in the context as `pipelineRunId`
    pub run_id: String,

    pub pipeline_key: String,

    pub status: RunStatus,

    /// When the run was accepted
    pub submitted_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Error message of a failed run
    pub error: Option<String>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, pipeline_key: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_key: pipeline_key.into(),
            status: RunStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.to_string());
    }
}

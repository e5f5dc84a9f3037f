//! Run history
//!
//! Every run driven through [`crate::execution::Transporter`] is recorded
//! here as a [`RunState`]. Asynchronous callers poll the store to learn how
//! a run they submitted ended.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::{RunState, RunStatus};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Trait for run history backends
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace a run record
    async fn save_run(&self, run: &RunState) -> Result<()>;

    /// Load a run by id
    async fn load_run(&self, run_id: &str) -> Result<Option<RunState>>;

    /// Runs of one pipeline, newest first
    async fn list_runs(&self, pipeline_key: &str) -> Result<Vec<RunState>>;

    /// Most recent runs across all pipelines, newest first
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunState>>;

    /// Keys of every pipeline with recorded runs, sorted
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory run history (for tests or ephemeral use)
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, RunState>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(runs: &mut [RunState]) {
    runs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn save_run(&self, run: &RunState) -> Result<()> {
        self.runs.write().await.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunState>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn list_runs(&self, pipeline_key: &str) -> Result<Vec<RunState>> {
        let mut runs: Vec<RunState> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.pipeline_key == pipeline_key)
            .cloned()
            .collect();
        newest_first(&mut runs);
        Ok(runs)
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunState>> {
        let mut runs: Vec<RunState> = self.runs.read().await.values().cloned().collect();
        newest_first(&mut runs);
        runs.truncate(limit);
        Ok(runs)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .runs
            .read()
            .await
            .values()
            .map(|run| run.pipeline_key.clone())
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

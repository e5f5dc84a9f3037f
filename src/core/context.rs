//! Execution context - the run-scoped variable scope

use crate::adapter::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context key holding the id of the current top-level run
pub const PIPELINE_RUN_ID: &str = "pipelineRunId";
/// Context key holding the key of the pipeline currently executing
pub const PIPELINE_KEY: &str = "pipelineKey";
/// Context key holding the 1-based index of the batch being processed
pub const BATCH_INDEX: &str = "batchIndex";
/// Context key holding the configured batch size of the current flow
pub const BATCH_SIZE: &str = "batchSize";

/// Mutable key/value scope for one top-level pipeline run
///
/// Templates, scripts and nested pipeline triggers all see the same instance.
/// It is passed explicitly through the engine; a fresh one is allocated for
/// every top-level run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    variables: Row,
}

impl ExecutionContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every variable
    pub fn clear(&mut self) {
        self.variables.clear();
    }

    /// Set a variable. Setting `null` removes the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        match value.into() {
            Value::Null => {
                self.variables.remove(&key);
            }
            value => {
                self.variables.insert(key, value);
            }
        }
    }

    /// Get a variable
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Remove a variable, returning its previous value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.variables.remove(key)
    }

    /// Merge a parameter set into the context, overwriting existing keys
    pub fn merge(&mut self, params: &Row) {
        for (key, value) in params {
            self.set(key.clone(), value.clone());
        }
    }

    /// All variables, as seen by templates
    pub fn variables(&self) -> &Row {
        &self.variables
    }

    /// A copy of all variables, used to enrich rows
    pub fn snapshot(&self) -> Row {
        self.variables.clone()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.get(PIPELINE_RUN_ID).and_then(Value::as_str)
    }

    pub fn pipeline_key(&self) -> Option<&str> {
        self.get(PIPELINE_KEY).and_then(Value::as_str)
    }

    pub fn batch_index(&self) -> Option<u64> {
        self.get(BATCH_INDEX).and_then(Value::as_u64)
    }
}

//! Run events for observers such as the CLI

use crate::adapter::{Row, WriteAction};
use std::sync::{Arc, RwLock};

/// Events that can occur during a pipeline run
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        pipeline: String,
    },
    ParamsStarted {
        run_id: String,
        pipeline: String,
        index: usize,
        params: Row,
    },
    FlowStarted {
        pipeline: String,
        flow_id: String,
        desc: String,
    },
    BatchRead {
        pipeline: String,
        flow_id: String,
        batch_index: u64,
        rows: usize,
    },
    RowsWritten {
        pipeline: String,
        writer: String,
        action: WriteAction,
        rows: usize,
    },
    WriterSkipped {
        pipeline: String,
        writer: String,
        reason: String,
    },
    RecordsFailed {
        pipeline: String,
        writer: String,
        rows: usize,
    },
    RunCompleted {
        run_id: String,
        pipeline: String,
    },
    RunFailed {
        run_id: String,
        pipeline: String,
        error: String,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&RunEvent) + Send + Sync>;

/// Fan-out of run events to registered handlers
#[derive(Default, Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: RunEvent) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for handler in handlers.iter() {
            handler(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventBus")
    }
}

//! Run-level error taxonomy

use crate::adapter::{AdapterError, WriteAction};
use crate::core::config::DefinitionError;
use crate::script::ScriptError;
use crate::template::TemplateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pipeline '{0}' is not registered")]
    PipelineNotFound(String),

    #[error("component '{0}' is not registered")]
    ComponentNotFound(String),

    #[error("component '{name}' is a {actual}, expected a {expected}")]
    ComponentKind {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("writer '{writer}' is append-only and cannot {action}")]
    UnsupportedAction { writer: String, action: WriteAction },

    #[error("invalid instruction for '{component}': {message}")]
    Instruction { component: String, message: String },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("reader '{reader}' failed: {source}")]
    Reader {
        reader: String,
        #[source]
        source: AdapterError,
    },

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("hook failed: {0}")]
    Hook(String),

    #[error("dead-letter writer '{writer}' failed: {source}")]
    DeadLetter {
        writer: String,
        #[source]
        source: AdapterError,
    },

    #[error("pipeline triggers nest deeper than {0} levels")]
    TriggerDepth(usize),

    #[error("pipeline '{pipeline}', flow '{flow}': {source}")]
    Flow {
        pipeline: String,
        flow: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("run did not finish: {0}")]
    Interrupted(String),
}

impl EngineError {
    /// The innermost error beneath any flow wrappers
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::Flow { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

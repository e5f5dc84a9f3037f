//! Reader/writer contracts consumed by the engine
//!
//! Data sources and sinks are plugged in through the [`Reader`], [`Appender`]
//! and [`Updater`] traits. The engine never sees their native instruction
//! types: a component is bound to a rendered instruction string first
//! (see [`ReaderHandle::bind`] and [`WriterHandle::bind`]) and is driven
//! through the type-erased bound form afterwards.

pub mod builtin;
pub mod reader;
pub mod registry;
pub mod writer;

pub use reader::{BatchCursor, BoundReader, Reader, ReaderHandle, VecBatchCursor};
pub use registry::{Component, ComponentFactory, ComponentRegistry, ComponentSpec, PipelineComponents, Runnable};
pub use writer::{Appender, BoundWriter, Updater, WriteAction, WriterHandle};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A single record flowing through a pipeline
pub type Row = serde_json::Map<String, Value>;

/// Errors raised by readers and writers
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record rejected: {0}")]
    Rejected(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

/// Text format a rendered instruction is parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionFormat {
    #[default]
    #[serde(alias = "JSON")]
    Json,
    #[serde(alias = "YAML")]
    Yaml,
}

/// How a component wants its instruction delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    /// Parse the rendered text with the configured [`InstructionFormat`]
    Structured,
    /// Hand the rendered text over verbatim (as a JSON string value)
    Text,
}

/// Turn an optional rendered instruction into a component's native type.
///
/// A missing instruction is deserialized from `null`, which succeeds for
/// `Option<_>`, `()` and `serde_json::Value`.
pub fn deserialize_instruction<T: DeserializeOwned>(
    rendered: Option<&str>,
    kind: InstructionKind,
    format: InstructionFormat,
) -> Result<T, String> {
    match (rendered, kind) {
        (None, _) => serde_json::from_value(Value::Null).map_err(|e| e.to_string()),
        (Some(text), InstructionKind::Text) => {
            serde_json::from_value(Value::String(text.to_string())).map_err(|e| e.to_string())
        }
        (Some(text), InstructionKind::Structured) => match format {
            InstructionFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            InstructionFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        },
    }
}

/// Interpret a JSON value as a row list.
///
/// Script engines may hand back an empty table as `{}`; that is read as an
/// empty list.
pub fn rows_from_value(value: Value) -> Result<Vec<Row>, String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(format!("expected a row object, got {}", other)),
            })
            .collect(),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        Value::Null => Ok(Vec::new()),
        other => Err(format!("expected a list of rows, got {}", other)),
    }
}

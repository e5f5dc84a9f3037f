//! transporter - a declarative ETL pipeline engine
//!
//! Pipelines are YAML definitions of flows. A flow reads rows from a
//! [`adapter::Reader`], optionally transforms and filters them, and writes
//! them to one or more [`adapter::Appender`]/[`adapter::Updater`] sinks.
//! Rows a sink rejects are retried one by one, routed to an `onFailure`
//! writer, logged and appended to a dead-letter writer.

pub mod adapter;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod script;
pub mod template;

// Re-export commonly used types
pub use adapter::{Appender, ComponentRegistry, Reader, Row, Updater, WriteAction};
pub use self::core::{ExecutionContext, Pipeline, PipelineConfig, RunState, RunStatus, TransporterConfig};
pub use execution::{EngineError, RunEvent, TransportService, Transporter};

//! Core domain models
//!
//! Pipeline definitions (the YAML layer and the validated model), the
//! run-scoped execution context and run state.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod state;

pub use config::{DefinitionError, PipelineConfig, TransporterConfig};
pub use context::*;
pub use pipeline::*;
pub use state::*;

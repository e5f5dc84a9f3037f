//! Pipeline and engine configuration from YAML

use crate::adapter::{ComponentSpec, InstructionFormat, Row, WriteAction};
use crate::core::pipeline::{
    Flow, Hook, Pipeline, ReadFlow, ReadMode, ReaderSpec, Schedule, ScriptCall, TriggerFlow,
    WriterSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Malformed pipeline or engine definitions
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("flow #{index} ('{id}') declares neither a reader nor a pipeline trigger")]
    EmptyFlow { index: usize, id: String },

    #[error("flow #{index} ('{id}') declares both a reader and a pipeline trigger")]
    AmbiguousFlow { index: usize, id: String },

    #[error("flow #{index} ('{id}') uses BATCHED mode with a batch size of 0")]
    ZeroBatchSize { index: usize, id: String },

    #[error("flow #{index} ('{id}') triggers a pipeline with an empty key")]
    EmptyTriggerKey { index: usize, id: String },

    #[error("component '{name}' uses unknown factory '{factory}'")]
    UnknownFactory { name: String, factory: String },

    #[error("component '{name}' could not be built: {message}")]
    ComponentBuild { name: String, message: String },

    #[error("failed to load script {path}: {message}")]
    Script { path: String, message: String },

    #[error("flow '{flow}': writer '{writer}' is append-only and cannot {action}")]
    UnsupportedAction {
        flow: String,
        writer: String,
        action: WriteAction,
    },

    #[error("schedule '{name}' was rejected: {message}")]
    Schedule { name: String, message: String },
}

/// Pipeline definition as written in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Ordered flows
    #[serde(default)]
    pub flows: Vec<FlowConfig>,

    #[serde(default)]
    pub pre: Option<Hook>,

    #[serde(default)]
    pub post: Option<Hook>,

    #[serde(default)]
    pub schedules: Vec<Schedule>,

    #[serde(default = "default_true", alias = "scheduleItEnabled")]
    pub schedule_enabled: bool,

    #[serde(default)]
    pub params_list_provider_script: Option<ScriptCall>,

    /// Pipeline-scoped components, by name
    #[serde(default, alias = "dynaBeans")]
    pub components: BTreeMap<String, ComponentSpec>,

    /// Script files to load, relative to the definition file
    #[serde(default)]
    pub scripts: Vec<String>,
}

/// One flow as written in YAML: exactly one of `reader` and `pipelineTrigger`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowConfig {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub desc: String,

    #[serde(default)]
    pub reader: Option<ReaderSpec>,

    #[serde(default)]
    pub writers: Vec<WriterSpec>,

    #[serde(default, alias = "pipelineTriggerInstruction")]
    pub pipeline_trigger: Option<TriggerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    pub pipeline_key: String,

    #[serde(default)]
    pub params: Option<Vec<Row>>,
}

impl PipelineConfig {
    /// Load a pipeline definition from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a pipeline definition
    pub fn from_yaml(yaml: &str) -> Result<Self, DefinitionError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that need no component registry
    pub fn validate(&self) -> Result<(), DefinitionError> {
        for (index, flow) in self.flows.iter().enumerate() {
            let id = flow.id.clone();
            match (&flow.reader, &flow.pipeline_trigger) {
                (None, None) => return Err(DefinitionError::EmptyFlow { index, id }),
                (Some(_), Some(_)) => return Err(DefinitionError::AmbiguousFlow { index, id }),
                (Some(reader), None) => {
                    if reader.mode == ReadMode::Batched && reader.batch_size == 0 {
                        return Err(DefinitionError::ZeroBatchSize { index, id });
                    }
                }
                (None, Some(trigger)) => {
                    if trigger.pipeline_key.trim().is_empty() {
                        return Err(DefinitionError::EmptyTriggerKey { index, id });
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate and convert into the immutable domain model
    pub fn into_pipeline(self, key: impl Into<String>) -> Result<Pipeline, DefinitionError> {
        self.validate()?;

        let flows = self
            .flows
            .into_iter()
            .filter_map(|flow| match (flow.reader, flow.pipeline_trigger) {
                (Some(reader), None) => Some(Flow::Read(ReadFlow {
                    id: flow.id,
                    desc: flow.desc,
                    reader,
                    writers: flow.writers,
                })),
                (None, Some(trigger)) => Some(Flow::Trigger(TriggerFlow {
                    id: flow.id,
                    desc: flow.desc,
                    pipeline_key: trigger.pipeline_key,
                    params: trigger.params,
                })),
                _ => None,
            })
            .collect();

        Ok(Pipeline {
            key: key.into(),
            flows,
            pre: self.pre.filter(|h| !h.is_empty()),
            post: self.post.filter(|h| !h.is_empty()),
            schedules: self.schedules,
            schedule_enabled: self.schedule_enabled,
            params_list_provider: self.params_list_provider_script,
            components: self.components,
            scripts: self.scripts,
        })
    }
}

/// Where failed records are appended
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterConfig {
    /// Appender component name
    #[serde(default = "default_dead_letter_writer")]
    pub writer: String,

    /// Instruction template for the appender
    #[serde(default)]
    pub write_instruction: Option<String>,

    #[serde(default)]
    pub instruction_format: InstructionFormat,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            writer: default_dead_letter_writer(),
            write_instruction: None,
            instruction_format: InstructionFormat::Json,
        }
    }
}

/// Engine configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransporterConfig {
    /// Pipeline key to definition file
    #[serde(default)]
    pub pipelines: BTreeMap<String, PathBuf>,

    /// Worker count for asynchronous runs
    #[serde(default = "default_async_pool_size")]
    pub async_pool_size: usize,

    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    /// SQLite file for run history; the platform data dir when absent
    #[serde(default)]
    pub history_db: Option<PathBuf>,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for TransporterConfig {
    fn default() -> Self {
        Self {
            pipelines: BTreeMap::new(),
            async_pool_size: default_async_pool_size(),
            dead_letter: DeadLetterConfig::default(),
            history_db: None,
            base_dir: None,
        }
    }
}

impl TransporterConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, DefinitionError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Resolve a configured path against the config file's directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_async_pool_size() -> usize {
    2
}

fn default_dead_letter_writer() -> String {
    "failedRecordsAppender".to_string()
}

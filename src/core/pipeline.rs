//! Pipeline domain model
//!
//! A [`Pipeline`] is the immutable, validated form of a definition. It is
//! produced by [`crate::core::config::PipelineConfig::into_pipeline`] and
//! shared read-only between runs.

use crate::adapter::{ComponentSpec, InstructionFormat, Row, WriteAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default component used when a writer omits `beanName`
pub const DEFAULT_WRITER: &str = "consoleWriter";

/// Default number of rows per batch in BATCHED mode
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// A named, declarative ETL unit
#[derive(Debug, Clone, Serialize)]
pub struct Pipeline {
    /// Unique pipeline key
    pub key: String,

    /// Flows, executed strictly in this order
    pub flows: Vec<Flow>,

    /// Hook run once per parameter set before the flows
    pub pre: Option<Hook>,

    /// Hook run once per parameter set after the flows
    pub post: Option<Hook>,

    /// Cron triggers
    pub schedules: Vec<Schedule>,

    /// Whether schedules are handed to the scheduler at registration
    pub schedule_enabled: bool,

    /// Function producing the parameter-set list when a caller supplies none
    pub params_list_provider: Option<ScriptCall>,

    /// Components constructed for this pipeline only
    pub components: BTreeMap<String, ComponentSpec>,

    /// Script files loaded into the script invoker at registration
    pub scripts: Vec<String>,
}

impl Pipeline {
    /// Number of flows that read and write rows (not triggers)
    pub fn reader_flow_count(&self) -> usize {
        self.flows
            .iter()
            .filter(|f| matches!(f, Flow::Read(_)))
            .count()
    }
}

/// One step of a pipeline
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Flow {
    /// Read, transform and write rows
    Read(ReadFlow),
    /// Run another pipeline inline on the shared context
    Trigger(TriggerFlow),
}

impl Flow {
    pub fn id(&self) -> &str {
        match self {
            Flow::Read(f) => &f.id,
            Flow::Trigger(f) => &f.id,
        }
    }

    pub fn desc(&self) -> &str {
        match self {
            Flow::Read(f) => &f.desc,
            Flow::Trigger(f) => &f.desc,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadFlow {
    pub id: String,
    pub desc: String,
    pub reader: ReaderSpec,
    pub writers: Vec<WriterSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerFlow {
    pub id: String,
    pub desc: String,
    pub pipeline_key: String,
    /// `None` runs the target once with a placeholder parameter set
    pub params: Option<Vec<Row>>,
}

/// How many rows are fetched and processed per write cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadMode {
    One,
    AllAtOnce,
    #[default]
    Batched,
}

/// Reader side of a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderSpec {
    /// Component name; rendered against the context before lookup
    pub bean_name: String,

    /// Instruction template; rendered then parsed into the reader's type
    #[serde(default)]
    pub read_instruction: Option<String>,

    #[serde(default, alias = "instructionSerDe")]
    pub instruction_format: InstructionFormat,

    #[serde(default)]
    pub mode: ReadMode,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub transformer: Option<TransformerSpec>,

    /// Merge transformer output over the original row
    #[serde(default)]
    pub transform_and_merge_to_original: bool,

    /// Function receiving and returning the row list; may drop rows
    #[serde(default)]
    pub enrichment_or_filter_function: Option<String>,

    /// Context key the read result is exposed under
    #[serde(default)]
    pub write_to_variable_name: Option<String>,

    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub desc: String,
}

/// Row reshaping step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformerSpec {
    /// Template rendered per row (or once with `list` when `all_at_once`)
    /// and parsed as JSON
    #[serde(default)]
    pub template: Option<String>,

    /// Script function called per row (or once with the whole list)
    #[serde(default, alias = "jsFunctionName")]
    pub function: Option<String>,

    #[serde(default, alias = "transformAllAtOnce")]
    pub all_at_once: bool,

    #[serde(default, alias = "transformAndMergeToOriginal")]
    pub merge_to_original: bool,
}

/// Writer side of a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterSpec {
    /// Component name; rendered against the context before lookup
    #[serde(default = "default_writer")]
    pub bean_name: String,

    #[serde(default)]
    pub action: WriteAction,

    #[serde(default)]
    pub write_instruction: Option<String>,

    #[serde(default, alias = "instructionSerDe")]
    pub instruction_format: InstructionFormat,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Receives the rows that were written
    #[serde(default)]
    pub on_success: Option<Box<WriterSpec>>,

    /// Receives the rows that failed even row by row
    #[serde(default)]
    pub on_failure: Option<Box<WriterSpec>>,

    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub desc: String,
}

impl WriterSpec {
    /// A CREATE writer targeting the named component
    pub fn to_component(bean_name: impl Into<String>) -> Self {
        Self {
            bean_name: bean_name.into(),
            action: WriteAction::Create,
            write_instruction: None,
            instruction_format: InstructionFormat::Json,
            enabled: true,
            on_success: None,
            on_failure: None,
            id: String::new(),
            desc: String::new(),
        }
    }
}

/// Side-effecting pre/post step. Every populated form runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    /// Script body, rendered against the context then loaded
    #[serde(default, alias = "inlineJavascript")]
    pub inline_script: Option<String>,

    /// Name of a registered runnable component
    #[serde(default)]
    pub runnable: Option<String>,

    #[serde(default)]
    pub script_instruction: Option<ScriptCall>,
}

impl Hook {
    pub fn is_empty(&self) -> bool {
        self.inline_script.is_none() && self.runnable.is_none() && self.script_instruction.is_none()
    }
}

/// Reference to a script function with literal arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCall {
    pub function_name: String,

    #[serde(default)]
    pub args: Vec<Value>,
}

/// Cron trigger for a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub schedule_name: String,

    #[serde(alias = "cronAttributes")]
    pub cron: CronSpec,

    #[serde(default, alias = "lockAttributes")]
    pub lock: Option<LockSpec>,

    /// Parameter sets passed to every scheduled run
    #[serde(default)]
    pub param_list: Vec<Row>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronSpec {
    #[serde(alias = "cronExpression")]
    pub expression: String,

    #[serde(default)]
    pub time_zone: Option<String>,
}

/// Distributed lock attributes; durations in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSpec {
    pub lock_name: String,

    #[serde(default = "default_lock_at_least_for")]
    pub lock_at_least_for: u64,

    #[serde(default = "default_lock_at_most_for")]
    pub lock_at_most_for: u64,
}

impl LockSpec {
    pub fn at_least(&self) -> Duration {
        Duration::from_secs(self.lock_at_least_for)
    }

    pub fn at_most(&self) -> Duration {
        Duration::from_secs(self.lock_at_most_for)
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_writer() -> String {
    DEFAULT_WRITER.to_string()
}

fn default_true() -> bool {
    true
}

fn default_lock_at_least_for() -> u64 {
    300
}

fn default_lock_at_most_for() -> u64 {
    600
}

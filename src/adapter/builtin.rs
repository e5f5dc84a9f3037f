//! Built-in components and factories

use crate::adapter::{
    rows_from_value, AdapterError, Appender, BatchCursor, Component, ComponentRegistry,
    InstructionKind, Reader, ReaderHandle, Row, Updater, VecBatchCursor, WriterHandle,
};
use crate::core::ExecutionContext;
use serde::Deserialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Name of the default writer component
pub const CONSOLE_WRITER: &str = "consoleWriter";
pub const FLOW_VARIABLE_READER: &str = "flowVariableReader";
pub const FLOW_VARIABLE_WRITER: &str = "flowVariableWriter";

impl ComponentRegistry {
    /// Registry pre-populated with the built-in components and factories
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        register_builtins(&registry);
        registry
    }
}

/// Register the built-in components and factories
///
/// Components: `consoleWriter`, `flowVariableReader`, `flowVariableWriter`.
/// Factories: `console`, `flowVariableReader`, `flowVariableWriter`,
/// `jsonFile` (reader, config `{path}`) and `jsonLines` (appender, config
/// `{path}`).
pub fn register_builtins(registry: &ComponentRegistry) {
    registry.register_updater(CONSOLE_WRITER, ConsoleWriter::stdout());
    registry.register_reader(FLOW_VARIABLE_READER, FlowVariableReader);
    registry.register_appender(FLOW_VARIABLE_WRITER, FlowVariableWriter);

    registry.register_factory("console", |_| {
        Ok(Component::Writer(WriterHandle::updater(ConsoleWriter::stdout())))
    });
    registry.register_factory("flowVariableReader", |_| {
        Ok(Component::Reader(ReaderHandle::new(FlowVariableReader)))
    });
    registry.register_factory("flowVariableWriter", |_| {
        Ok(Component::Writer(WriterHandle::appender(FlowVariableWriter)))
    });
    registry.register_factory("jsonFile", |config| {
        let config = FileConfig::parse(config)?;
        Ok(Component::Reader(ReaderHandle::new(JsonFileReader::new(config.path))))
    });
    registry.register_factory("jsonLines", |config| {
        let config = FileConfig::parse(config)?;
        Ok(Component::Writer(WriterHandle::appender(JsonLinesAppender::new(config.path))))
    });
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    path: Option<PathBuf>,
}

impl FileConfig {
    fn parse(config: &Value) -> Result<Self, String> {
        if config.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(config.clone()).map_err(|e| e.to_string())
    }
}

fn to_json_line(row: &Row) -> Result<String, AdapterError> {
    serde_json::to_string(row).map_err(|e| AdapterError::Other(e.to_string()))
}

/// Mutation-capable sink printing each row as compact JSON
///
/// Every action prints the row; the instruction is ignored.
pub struct ConsoleWriter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleWriter {
    pub fn stdout() -> Self {
        Self::sink(std::io::stdout())
    }

    pub fn sink<W: Write + Send + 'static>(out: W) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    fn print(&self, row: &Row) -> Result<(), AdapterError> {
        let line = to_json_line(row)?;
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

impl Appender for ConsoleWriter {
    type Instruction = Value;

    fn create(&self, row: &Row, _instruction: &Value, _ctx: &mut ExecutionContext) -> Result<(), AdapterError> {
        self.print(row)
    }
}

impl Updater for ConsoleWriter {
    fn update(&self, row: &Row, _instruction: &Value, _ctx: &mut ExecutionContext) -> Result<(), AdapterError> {
        self.print(row)
    }

    fn replace(&self, row: &Row, _instruction: &Value, _ctx: &mut ExecutionContext) -> Result<(), AdapterError> {
        self.print(row)
    }
}

/// Reads a row (or row list) previously stored in the context
///
/// The instruction is the context key, taken verbatim.
pub struct FlowVariableReader;

impl Reader for FlowVariableReader {
    type Instruction = String;

    fn instruction_kind(&self) -> InstructionKind {
        InstructionKind::Text
    }

    fn find_one(&self, key: &String, ctx: &ExecutionContext) -> Result<Option<Row>, AdapterError> {
        match ctx.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(row)) => Ok(Some(row.clone())),
            Some(Value::Array(items)) => match items.first() {
                None => Ok(None),
                Some(Value::Object(row)) => Ok(Some(row.clone())),
                Some(other) => Err(AdapterError::Rejected(format!(
                    "variable '{}' does not hold rows: {}",
                    key, other
                ))),
            },
            Some(other) => Err(AdapterError::Rejected(format!(
                "variable '{}' does not hold a row: {}",
                key, other
            ))),
        }
    }

    fn find_all(&self, key: &String, ctx: &ExecutionContext) -> Result<Vec<Row>, AdapterError> {
        match ctx.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Object(row)) if !row.is_empty() => Ok(vec![row.clone()]),
            Some(value) => rows_from_value(value.clone()).map_err(AdapterError::Rejected),
        }
    }

    fn find_all_in_batch(
        &self,
        _batch_size: usize,
        _key: &String,
        _ctx: &ExecutionContext,
    ) -> Result<Box<dyn BatchCursor>, AdapterError> {
        Err(AdapterError::Unsupported(
            "flow variables cannot be read in batches".to_string(),
        ))
    }
}

/// Stores written rows into the context under the instruction key
///
/// A single-row write stores the row; a batch write stores the row list.
pub struct FlowVariableWriter;

impl Appender for FlowVariableWriter {
    type Instruction = String;

    fn instruction_kind(&self) -> InstructionKind {
        InstructionKind::Text
    }

    fn create(&self, row: &Row, key: &String, ctx: &mut ExecutionContext) -> Result<(), AdapterError> {
        ctx.set(key.clone(), Value::Object(row.clone()));
        Ok(())
    }

    fn create_batch(&self, rows: &[Row], key: &String, ctx: &mut ExecutionContext) -> Result<(), AdapterError> {
        let list = rows.iter().cloned().map(Value::Object).collect::<Vec<_>>();
        ctx.set(key.clone(), Value::Array(list));
        Ok(())
    }
}

/// Reads rows from a JSON array file or a JSON-lines file
///
/// The instruction, when present, is a path overriding the configured one.
/// Batched reads load the file and chunk it in memory.
pub struct JsonFileReader {
    path: Option<PathBuf>,
}

impl JsonFileReader {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    fn load(&self, instruction: &Option<String>) -> Result<Vec<Row>, AdapterError> {
        let path = effective_path(instruction, self.path.as_deref())?;
        let content = std::fs::read_to_string(&path)?;

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(row)) if !row.is_empty() => return Ok(vec![row]),
            Ok(value) => return rows_from_value(value).map_err(AdapterError::Rejected),
            Err(_) => {}
        }

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(row)) => Ok(row),
                Ok(other) => Err(AdapterError::Rejected(format!(
                    "{}:{} is not a JSON object: {}",
                    path.display(),
                    n + 1,
                    other
                ))),
                Err(e) => Err(AdapterError::Rejected(format!(
                    "{}:{}: {}",
                    path.display(),
                    n + 1,
                    e
                ))),
            })
            .collect()
    }
}

impl Reader for JsonFileReader {
    type Instruction = Option<String>;

    fn instruction_kind(&self) -> InstructionKind {
        InstructionKind::Text
    }

    fn find_one(&self, instruction: &Option<String>, _ctx: &ExecutionContext) -> Result<Option<Row>, AdapterError> {
        Ok(self.load(instruction)?.into_iter().next())
    }

    fn find_all(&self, instruction: &Option<String>, _ctx: &ExecutionContext) -> Result<Vec<Row>, AdapterError> {
        self.load(instruction)
    }

    fn find_all_in_batch(
        &self,
        batch_size: usize,
        instruction: &Option<String>,
        _ctx: &ExecutionContext,
    ) -> Result<Box<dyn BatchCursor>, AdapterError> {
        Ok(Box::new(VecBatchCursor::new(self.load(instruction)?, batch_size)))
    }
}

/// Appends rows to a JSON-lines file
///
/// The instruction, when present, is a path overriding the configured one.
pub struct JsonLinesAppender {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl JsonLinesAppender {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn append(&self, rows: &[Row], instruction: &Option<String>) -> Result<(), AdapterError> {
        let path = effective_path(instruction, self.path.as_deref())?;
        let mut buffer = String::new();
        for row in rows {
            buffer.push_str(&to_json_line(row)?);
            buffer.push('\n');
        }

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(buffer.as_bytes())?;
        Ok(())
    }
}

impl Appender for JsonLinesAppender {
    type Instruction = Option<String>;

    fn instruction_kind(&self) -> InstructionKind {
        InstructionKind::Text
    }

    fn create(&self, row: &Row, instruction: &Option<String>, _ctx: &mut ExecutionContext) -> Result<(), AdapterError> {
        self.append(std::slice::from_ref(row), instruction)
    }

    fn create_batch(
        &self,
        rows: &[Row],
        instruction: &Option<String>,
        _ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError> {
        self.append(rows, instruction)
    }
}

fn effective_path(instruction: &Option<String>, configured: Option<&Path>) -> Result<PathBuf, AdapterError> {
    instruction
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(|| configured.map(Path::to_path_buf))
        .ok_or_else(|| AdapterError::Rejected("no file path configured".to_string()))
}

//! Writer contracts: append-only sinks and mutation-capable sinks

use crate::adapter::{deserialize_instruction, AdapterError, InstructionFormat, InstructionKind, Row};
use crate::core::ExecutionContext;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Mutation semantics requested of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteAction {
    #[default]
    Create,
    Update,
    Replace,
    CreateOrReplace,
}

impl std::fmt::Display for WriteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WriteAction::Create => "CREATE",
            WriteAction::Update => "UPDATE",
            WriteAction::Replace => "REPLACE",
            WriteAction::CreateOrReplace => "CREATE_OR_REPLACE",
        };
        f.write_str(name)
    }
}

/// A sink that can only append
pub trait Appender: Send + Sync + 'static {
    /// Native write instruction type, parsed from the rendered template
    type Instruction: DeserializeOwned + Send + Sync + 'static;

    fn instruction_kind(&self) -> InstructionKind {
        InstructionKind::Structured
    }

    fn create(
        &self,
        row: &Row,
        instruction: &Self::Instruction,
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError>;

    fn create_batch(
        &self,
        rows: &[Row],
        instruction: &Self::Instruction,
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError> {
        for row in rows {
            self.create(row, instruction, ctx)?;
        }
        Ok(())
    }
}

/// A sink supporting the full set of [`WriteAction`]s
pub trait Updater: Appender {
    fn update(
        &self,
        row: &Row,
        instruction: &Self::Instruction,
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError>;

    fn replace(
        &self,
        row: &Row,
        instruction: &Self::Instruction,
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError>;

    fn create_or_replace(
        &self,
        row: &Row,
        instruction: &Self::Instruction,
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError> {
        self.replace(row, instruction, ctx)
    }

    fn update_batch(
        &self,
        rows: &[Row],
        instruction: &Self::Instruction,
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError> {
        for row in rows {
            self.update(row, instruction, ctx)?;
        }
        Ok(())
    }

    fn replace_batch(
        &self,
        rows: &[Row],
        instruction: &Self::Instruction,
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError> {
        for row in rows {
            self.replace(row, instruction, ctx)?;
        }
        Ok(())
    }

    fn create_or_replace_batch(
        &self,
        rows: &[Row],
        instruction: &Self::Instruction,
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError> {
        for row in rows {
            self.create_or_replace(row, instruction, ctx)?;
        }
        Ok(())
    }
}

trait ErasedAppender: Send + Sync {
    fn bind(
        self: Arc<Self>,
        rendered: Option<&str>,
        format: InstructionFormat,
    ) -> Result<Box<dyn BoundAppender>, String>;
}

trait ErasedUpdater: Send + Sync {
    fn bind(
        self: Arc<Self>,
        rendered: Option<&str>,
        format: InstructionFormat,
    ) -> Result<Box<dyn BoundUpdater>, String>;
}

trait BoundAppender: Send + Sync {
    fn create_batch(&self, rows: &[Row], ctx: &mut ExecutionContext) -> Result<(), AdapterError>;
    fn create(&self, row: &Row, ctx: &mut ExecutionContext) -> Result<(), AdapterError>;
}

trait BoundUpdater: Send + Sync {
    fn apply_batch(
        &self,
        action: WriteAction,
        rows: &[Row],
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError>;
    fn apply(&self, action: WriteAction, row: &Row, ctx: &mut ExecutionContext) -> Result<(), AdapterError>;
}

struct AppendBound<A: Appender> {
    writer: Arc<A>,
    instruction: A::Instruction,
}

struct MutateBound<U: Updater> {
    writer: Arc<U>,
    instruction: U::Instruction,
}

impl<A: Appender> ErasedAppender for A {
    fn bind(
        self: Arc<Self>,
        rendered: Option<&str>,
        format: InstructionFormat,
    ) -> Result<Box<dyn BoundAppender>, String> {
        let instruction = deserialize_instruction(rendered, self.instruction_kind(), format)?;
        Ok(Box::new(AppendBound {
            writer: self,
            instruction,
        }))
    }
}

impl<U: Updater> ErasedUpdater for U {
    fn bind(
        self: Arc<Self>,
        rendered: Option<&str>,
        format: InstructionFormat,
    ) -> Result<Box<dyn BoundUpdater>, String> {
        let instruction = deserialize_instruction(rendered, self.instruction_kind(), format)?;
        Ok(Box::new(MutateBound {
            writer: self,
            instruction,
        }))
    }
}

impl<A: Appender> BoundAppender for AppendBound<A> {
    fn create_batch(&self, rows: &[Row], ctx: &mut ExecutionContext) -> Result<(), AdapterError> {
        self.writer.create_batch(rows, &self.instruction, ctx)
    }

    fn create(&self, row: &Row, ctx: &mut ExecutionContext) -> Result<(), AdapterError> {
        self.writer.create(row, &self.instruction, ctx)
    }
}

impl<U: Updater> BoundUpdater for MutateBound<U> {
    fn apply_batch(
        &self,
        action: WriteAction,
        rows: &[Row],
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError> {
        let w = &self.writer;
        let i = &self.instruction;
        match action {
            WriteAction::Create => w.create_batch(rows, i, ctx),
            WriteAction::Update => w.update_batch(rows, i, ctx),
            WriteAction::Replace => w.replace_batch(rows, i, ctx),
            WriteAction::CreateOrReplace => w.create_or_replace_batch(rows, i, ctx),
        }
    }

    fn apply(&self, action: WriteAction, row: &Row, ctx: &mut ExecutionContext) -> Result<(), AdapterError> {
        let w = &self.writer;
        let i = &self.instruction;
        match action {
            WriteAction::Create => w.create(row, i, ctx),
            WriteAction::Update => w.update(row, i, ctx),
            WriteAction::Replace => w.replace(row, i, ctx),
            WriteAction::CreateOrReplace => w.create_or_replace(row, i, ctx),
        }
    }
}

#[derive(Clone)]
enum Sink {
    Append(Arc<dyn ErasedAppender>),
    Mutate(Arc<dyn ErasedUpdater>),
}

/// Shareable, type-erased writer component tagged with its capability
#[derive(Clone)]
pub struct WriterHandle {
    sink: Sink,
}

impl WriterHandle {
    /// Wrap a sink that supports only [`WriteAction::Create`]
    pub fn appender<A: Appender>(writer: A) -> Self {
        Self {
            sink: Sink::Append(Arc::new(writer)),
        }
    }

    /// Wrap a sink that supports every [`WriteAction`]
    pub fn updater<U: Updater>(writer: U) -> Self {
        Self {
            sink: Sink::Mutate(Arc::new(writer)),
        }
    }

    pub fn appender_arc<A: Appender>(writer: Arc<A>) -> Self {
        Self {
            sink: Sink::Append(writer),
        }
    }

    pub fn updater_arc<U: Updater>(writer: Arc<U>) -> Self {
        Self {
            sink: Sink::Mutate(writer),
        }
    }

    pub fn is_append_only(&self) -> bool {
        matches!(self.sink, Sink::Append(_))
    }

    /// Parse the rendered instruction into the writer's native type
    pub fn bind(
        &self,
        rendered: Option<&str>,
        format: InstructionFormat,
    ) -> Result<BoundWriter, String> {
        let sink = match &self.sink {
            Sink::Append(inner) => BoundSink::Append(Arc::clone(inner).bind(rendered, format)?),
            Sink::Mutate(inner) => BoundSink::Mutate(Arc::clone(inner).bind(rendered, format)?),
        };
        Ok(BoundWriter { sink })
    }
}

impl std::fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sink {
            Sink::Append(_) => f.write_str("WriterHandle::Append"),
            Sink::Mutate(_) => f.write_str("WriterHandle::Mutate"),
        }
    }
}

enum BoundSink {
    Append(Box<dyn BoundAppender>),
    Mutate(Box<dyn BoundUpdater>),
}

/// A writer bound to one resolved instruction
pub struct BoundWriter {
    sink: BoundSink,
}

impl BoundWriter {
    pub fn is_append_only(&self) -> bool {
        matches!(self.sink, BoundSink::Append(_))
    }

    pub fn supports(&self, action: WriteAction) -> bool {
        match self.sink {
            BoundSink::Append(_) => action == WriteAction::Create,
            BoundSink::Mutate(_) => true,
        }
    }

    pub fn write_batch(
        &self,
        action: WriteAction,
        rows: &[Row],
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError> {
        match &self.sink {
            BoundSink::Append(w) if action == WriteAction::Create => w.create_batch(rows, ctx),
            BoundSink::Append(_) => Err(unsupported(action)),
            BoundSink::Mutate(w) => w.apply_batch(action, rows, ctx),
        }
    }

    pub fn write_row(
        &self,
        action: WriteAction,
        row: &Row,
        ctx: &mut ExecutionContext,
    ) -> Result<(), AdapterError> {
        match &self.sink {
            BoundSink::Append(w) if action == WriteAction::Create => w.create(row, ctx),
            BoundSink::Append(_) => Err(unsupported(action)),
            BoundSink::Mutate(w) => w.apply(action, row, ctx),
        }
    }
}

fn unsupported(action: WriteAction) -> AdapterError {
    AdapterError::Unsupported(format!("{} on an append-only writer", action))
}

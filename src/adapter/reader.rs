//! Reader contract and batch cursors

use crate::adapter::{deserialize_instruction, AdapterError, InstructionFormat, InstructionKind, Row};
use crate::core::ExecutionContext;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Closable, forward-only cursor yielding bounded-size chunks of rows
pub trait BatchCursor: Send {
    /// Next chunk, or `None` when the cursor is exhausted
    fn next_batch(&mut self) -> Result<Option<Vec<Row>>, AdapterError>;

    /// Release the underlying resources. Called exactly once by the engine.
    fn close(&mut self) -> Result<(), AdapterError>;
}

/// A data source
pub trait Reader: Send + Sync + 'static {
    /// Native instruction (query) type, parsed from the rendered template
    type Instruction: DeserializeOwned + Send + Sync + 'static;

    /// Whether the rendered instruction is parsed or handed over as text
    fn instruction_kind(&self) -> InstructionKind {
        InstructionKind::Structured
    }

    fn find_one(
        &self,
        instruction: &Self::Instruction,
        ctx: &ExecutionContext,
    ) -> Result<Option<Row>, AdapterError>;

    fn find_all(
        &self,
        instruction: &Self::Instruction,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Row>, AdapterError>;

    fn find_all_in_batch(
        &self,
        batch_size: usize,
        instruction: &Self::Instruction,
        ctx: &ExecutionContext,
    ) -> Result<Box<dyn BatchCursor>, AdapterError>;
}

/// A reader bound to one resolved instruction
pub trait BoundReader: Send + Sync {
    fn find_one(&self, ctx: &ExecutionContext) -> Result<Option<Row>, AdapterError>;

    fn find_all(&self, ctx: &ExecutionContext) -> Result<Vec<Row>, AdapterError>;

    fn find_all_in_batch(
        &self,
        batch_size: usize,
        ctx: &ExecutionContext,
    ) -> Result<Box<dyn BatchCursor>, AdapterError>;
}

trait ErasedReader: Send + Sync {
    fn bind(
        self: Arc<Self>,
        rendered: Option<&str>,
        format: InstructionFormat,
    ) -> Result<Box<dyn BoundReader>, String>;
}

struct Bound<R: Reader> {
    reader: Arc<R>,
    instruction: R::Instruction,
}

impl<R: Reader> ErasedReader for R {
    fn bind(
        self: Arc<Self>,
        rendered: Option<&str>,
        format: InstructionFormat,
    ) -> Result<Box<dyn BoundReader>, String> {
        let instruction = deserialize_instruction(rendered, self.instruction_kind(), format)?;
        Ok(Box::new(Bound {
            reader: self,
            instruction,
        }))
    }
}

impl<R: Reader> BoundReader for Bound<R> {
    fn find_one(&self, ctx: &ExecutionContext) -> Result<Option<Row>, AdapterError> {
        self.reader.find_one(&self.instruction, ctx)
    }

    fn find_all(&self, ctx: &ExecutionContext) -> Result<Vec<Row>, AdapterError> {
        self.reader.find_all(&self.instruction, ctx)
    }

    fn find_all_in_batch(
        &self,
        batch_size: usize,
        ctx: &ExecutionContext,
    ) -> Result<Box<dyn BatchCursor>, AdapterError> {
        self.reader.find_all_in_batch(batch_size, &self.instruction, ctx)
    }
}

/// Shareable, type-erased reader component
#[derive(Clone)]
pub struct ReaderHandle {
    inner: Arc<dyn ErasedReader>,
}

impl ReaderHandle {
    pub fn new<R: Reader>(reader: R) -> Self {
        Self::from_arc(Arc::new(reader))
    }

    pub fn from_arc<R: Reader>(reader: Arc<R>) -> Self {
        Self { inner: reader }
    }

    /// Parse the rendered instruction into the reader's native type
    pub fn bind(
        &self,
        rendered: Option<&str>,
        format: InstructionFormat,
    ) -> Result<Box<dyn BoundReader>, String> {
        Arc::clone(&self.inner).bind(rendered, format)
    }
}

impl std::fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReaderHandle")
    }
}

/// Cursor over rows already held in memory
///
/// Yields `ceil(len / batch_size)` chunks; never a trailing empty one.
pub struct VecBatchCursor {
    rows: std::vec::IntoIter<Row>,
    batch_size: usize,
    closed: bool,
}

impl VecBatchCursor {
    pub fn new(rows: Vec<Row>, batch_size: usize) -> Self {
        Self {
            rows: rows.into_iter(),
            batch_size: batch_size.max(1),
            closed: false,
        }
    }
}

impl BatchCursor for VecBatchCursor {
    fn next_batch(&mut self) -> Result<Option<Vec<Row>>, AdapterError> {
        if self.closed {
            return Err(AdapterError::Other("cursor already closed".to_string()));
        }
        let batch: Vec<Row> = self.rows.by_ref().take(self.batch_size).collect();
        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }

    fn close(&mut self) -> Result<(), AdapterError> {
        // drain whatever is left so the source is released
        self.rows.by_ref().for_each(drop);
        self.closed = true;
        Ok(())
    }
}

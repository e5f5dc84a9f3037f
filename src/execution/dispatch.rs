//! Writer dispatch and the failure cascade
//!
//! Every write goes through the same policy: one bulk call for the whole
//! row list; on failure, one call per row. Rows that still fail are handed
//! to the writer's `onFailure` writer (same policy, recursively), logged on
//! the `failed_records` target and appended to the dead-letter writer.
//! Retries are not atomic: rows a failed bulk call already committed may be
//! written again on the row-by-row path.

use crate::adapter::{BoundWriter, Component, Row, WriteAction};
use crate::core::{ExecutionContext, WriterSpec, BATCH_INDEX, PIPELINE_KEY};
use crate::execution::{EngineError, EngineResult, RunEvent, TransportService};
use serde_json::Value;
use tracing::{error, info, warn};

/// A writer resolved and bound for one flow execution
///
/// Built fresh every time a flow runs, since names and instructions are
/// rendered against the context.
pub struct WriterAttributes {
    /// Resolved component name
    pub name: String,
    pub writer: BoundWriter,
    pub action: WriteAction,
    pub enabled: bool,
    pub on_success: Option<WriterSpec>,
    pub on_failure: Option<WriterSpec>,
    /// Rendered label
    pub id: String,
    /// Rendered label
    pub desc: String,
}

impl WriterAttributes {
    pub fn is_append_only(&self) -> bool {
        self.writer.is_append_only()
    }
}

/// Result of pushing a row list through one writer
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteOutcome {
    /// Rows confirmed written
    pub written: Vec<Row>,
    /// Rows that failed even when written one by one
    pub failed: Vec<Row>,
    /// Whether the bulk call failed and rows were retried individually
    pub retried: bool,
    /// Whether the writer was skipped (disabled or nothing to write)
    pub skipped: bool,
}

impl WriteOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

impl TransportService {
    /// Resolve, bind and capability-check a writer
    pub(crate) fn writer_attributes(
        &self,
        pipeline_key: &str,
        spec: &WriterSpec,
        ctx: &ExecutionContext,
    ) -> EngineResult<WriterAttributes> {
        let name = self.render(&spec.bean_name, ctx)?;
        let handle = self.resolve_writer(pipeline_key, &name)?;

        let rendered = spec
            .write_instruction
            .as_deref()
            .map(|template| self.render(template, ctx))
            .transpose()?;
        let writer = handle
            .bind(rendered.as_deref(), spec.instruction_format)
            .map_err(|message| EngineError::Instruction {
                component: name.clone(),
                message,
            })?;

        if spec.enabled && !writer.supports(spec.action) {
            return Err(EngineError::UnsupportedAction {
                writer: name,
                action: spec.action,
            });
        }

        Ok(WriterAttributes {
            id: self.label(&spec.id, ctx),
            desc: self.label(&spec.desc, ctx),
            name,
            writer,
            action: spec.action,
            enabled: spec.enabled,
            on_success: spec.on_success.as_deref().cloned(),
            on_failure: spec.on_failure.as_deref().cloned(),
        })
    }

    pub(crate) fn write_to_all(
        &self,
        pipeline_key: &str,
        writers: &[WriterAttributes],
        rows: &[Row],
        ctx: &mut ExecutionContext,
    ) -> EngineResult<()> {
        for writer in writers {
            self.write(pipeline_key, writer, rows, ctx)?;
        }
        Ok(())
    }

    /// Write rows through one writer, running the failure cascade
    pub(crate) fn write(
        &self,
        pipeline_key: &str,
        attrs: &WriterAttributes,
        rows: &[Row],
        ctx: &mut ExecutionContext,
    ) -> EngineResult<WriteOutcome> {
        info!(writer = %attrs.name, id = %attrs.id, desc = %attrs.desc, "****** [Writer] ****** Executing writer");

        if !attrs.enabled {
            info!(writer = %attrs.name, "Writer is disabled");
            self.emit_skipped(pipeline_key, attrs, "disabled");
            return Ok(WriteOutcome::skipped());
        }
        if rows.is_empty() {
            info!(writer = %attrs.name, "Nothing to write, row list is empty");
            self.emit_skipped(pipeline_key, attrs, "no rows");
            return Ok(WriteOutcome::skipped());
        }
        if !attrs.writer.supports(attrs.action) {
            return Err(EngineError::UnsupportedAction {
                writer: attrs.name.clone(),
                action: attrs.action,
            });
        }

        let outcome = consume_batch(attrs, rows, ctx);

        if !outcome.written.is_empty() {
            self.events.emit(RunEvent::RowsWritten {
                pipeline: pipeline_key.to_string(),
                writer: attrs.name.clone(),
                action: attrs.action,
                rows: outcome.written.len(),
            });

            if let Some(on_success) = &attrs.on_success {
                let next = self.writer_attributes(pipeline_key, on_success, ctx)?;
                self.write(pipeline_key, &next, &outcome.written, ctx)?;
            }
        }

        if !outcome.failed.is_empty() {
            self.events.emit(RunEvent::RecordsFailed {
                pipeline: pipeline_key.to_string(),
                writer: attrs.name.clone(),
                rows: outcome.failed.len(),
            });

            if let Some(on_failure) = &attrs.on_failure {
                let next = self.writer_attributes(pipeline_key, on_failure, ctx)?;
                error!(
                    failed_writer = %attrs.id,
                    on_failure = %next.id,
                    count = outcome.failed.len(),
                    "**** [Exception-Handling] Handling onFailure writer"
                );
                self.write(pipeline_key, &next, &outcome.failed, ctx)?;
            }

            self.handle_failed_records(pipeline_key, &outcome.failed, ctx)?;
        }

        Ok(outcome)
    }

    /// Log failed records and append them to the dead-letter writer
    ///
    /// A missing dead-letter writer is tolerated; a failing one is not.
    pub(crate) fn handle_failed_records(
        &self,
        pipeline_key: &str,
        failed: &[Row],
        ctx: &mut ExecutionContext,
    ) -> EngineResult<()> {
        let batch_index = ctx.get(BATCH_INDEX).cloned().unwrap_or(Value::Null);
        let records = Value::Array(failed.iter().cloned().map(Value::Object).collect());
        error!(
            target: "failed_records",
            pipeline = %pipeline_key,
            batch_index = %batch_index,
            count = failed.len(),
            records = %records,
            "Failed records in batch"
        );

        let dead_letter = &self.dead_letter;
        let handle = match self.registry.resolve(Some(pipeline_key), &dead_letter.writer) {
            Some(Component::Writer(handle)) => handle,
            Some(other) => {
                warn!(
                    writer = %dead_letter.writer,
                    kind = other.kind(),
                    "Dead-letter component is not a writer; failed records were only logged"
                );
                return Ok(());
            }
            None => {
                warn!(
                    writer = %dead_letter.writer,
                    "No dead-letter writer registered; failed records were only logged"
                );
                return Ok(());
            }
        };

        let rendered = match dead_letter.write_instruction.as_deref() {
            Some(template) if !template.trim().is_empty() => Some(self.render(template, ctx)?),
            _ => None,
        };
        let writer = handle
            .bind(rendered.as_deref(), dead_letter.instruction_format)
            .map_err(|message| EngineError::Instruction {
                component: dead_letter.writer.clone(),
                message,
            })?;

        let wrapped: Vec<Row> = failed
            .iter()
            .map(|record| {
                let mut row = Row::new();
                row.insert(PIPELINE_KEY.to_string(), Value::from(pipeline_key));
                row.insert(BATCH_INDEX.to_string(), batch_index.clone());
                row.insert("failedRecord".to_string(), Value::Object(record.clone()));
                row
            })
            .collect();

        writer
            .write_batch(WriteAction::Create, &wrapped, ctx)
            .map_err(|source| EngineError::DeadLetter {
                writer: dead_letter.writer.clone(),
                source,
            })
    }

    fn emit_skipped(&self, pipeline_key: &str, attrs: &WriterAttributes, reason: &str) {
        self.events.emit(RunEvent::WriterSkipped {
            pipeline: pipeline_key.to_string(),
            writer: attrs.name.clone(),
            reason: reason.to_string(),
        });
    }
}

/// Bulk write, falling back to one write per row
fn consume_batch(attrs: &WriterAttributes, rows: &[Row], ctx: &mut ExecutionContext) -> WriteOutcome {
    match attrs.writer.write_batch(attrs.action, rows, ctx) {
        Ok(()) => WriteOutcome {
            written: rows.to_vec(),
            ..WriteOutcome::default()
        },
        Err(e) => {
            error!(writer = %attrs.name, error = %e, rows = rows.len(), "Error while saving batch, saving row by row");

            let mut outcome = WriteOutcome {
                retried: true,
                ..WriteOutcome::default()
            };
            for row in rows {
                match attrs.writer.write_row(attrs.action, row, ctx) {
                    Ok(()) => outcome.written.push(row.clone()),
                    Err(e) => {
                        let record = Value::Object(row.clone());
                        error!(writer = %attrs.name, error = %e, record = %record, "Error while saving record");
                        outcome.failed.push(row.clone());
                    }
                }
            }
            outcome
        }
    }
}

//! Flow runner - read, transform and write one reader flow

use crate::adapter::{rows_from_value, AdapterError, BatchCursor, BoundReader, Row};
use crate::core::{ExecutionContext, ReadFlow, ReadMode, ReaderSpec, TransformerSpec, BATCH_INDEX, BATCH_SIZE};
use crate::execution::dispatch::WriterAttributes;
use crate::execution::{EngineError, EngineResult, RunEvent, TransportService};
use crate::script::ScriptError;
use serde_json::Value;
use tracing::{debug, info};

impl TransportService {
    pub(crate) fn execute_reader_flow(
        &self,
        pipeline_key: &str,
        flow_id: &str,
        flow: &ReadFlow,
        ctx: &mut ExecutionContext,
    ) -> EngineResult<()> {
        let spec = &flow.reader;

        let reader_name = self.render(&spec.bean_name, ctx)?;
        let reader = self.resolve_reader(pipeline_key, &reader_name)?;
        let rendered = spec
            .read_instruction
            .as_deref()
            .map(|template| self.render(template, ctx))
            .transpose()?;
        let bound = reader
            .bind(rendered.as_deref(), spec.instruction_format)
            .map_err(|message| EngineError::Instruction {
                component: reader_name.clone(),
                message,
            })?;

        let writers = flow
            .writers
            .iter()
            .map(|writer| self.writer_attributes(pipeline_key, writer, ctx))
            .collect::<EngineResult<Vec<_>>>()?;

        info!(
            flow = %flow_id,
            reader = %reader_name,
            id = %self.label(&spec.id, ctx),
            desc = %self.label(&spec.desc, ctx),
            mode = ?spec.mode,
            "****** [Reader] ****** Executing reader"
        );

        let reader_error = |source: AdapterError| EngineError::Reader {
            reader: reader_name.clone(),
            source,
        };

        match spec.mode {
            ReadMode::One => {
                let Some(row) = bound.find_one(ctx).map_err(reader_error)? else {
                    debug!("Reader returned no row");
                    return Ok(());
                };
                let rows = self.transform(spec, vec![row], ctx)?;
                if let Some(row) = rows.into_iter().next() {
                    capture(spec, Value::Object(row.clone()), ctx);
                    self.write_to_all(pipeline_key, &writers, &[row], ctx)?;
                }
            }
            ReadMode::AllAtOnce => {
                let rows = bound.find_all(ctx).map_err(reader_error)?;
                let rows = self.transform(spec, rows, ctx)?;
                capture(
                    spec,
                    Value::Array(rows.iter().cloned().map(Value::Object).collect()),
                    ctx,
                );
                self.write_to_all(pipeline_key, &writers, &rows, ctx)?;
            }
            ReadMode::Batched => {
                self.read_in_batches(pipeline_key, flow_id, &reader_name, spec, bound.as_ref(), &writers, ctx)?;
            }
        }

        Ok(())
    }

    /// Drive a batch cursor to exhaustion; the cursor is closed on every path
    #[allow(clippy::too_many_arguments)]
    fn read_in_batches(
        &self,
        pipeline_key: &str,
        flow_id: &str,
        reader_name: &str,
        spec: &ReaderSpec,
        reader: &dyn BoundReader,
        writers: &[WriterAttributes],
        ctx: &mut ExecutionContext,
    ) -> EngineResult<()> {
        let reader_error = |source: AdapterError| EngineError::Reader {
            reader: reader_name.to_string(),
            source,
        };

        let mut cursor = reader
            .find_all_in_batch(spec.batch_size, ctx)
            .map_err(reader_error)?;

        let consumed = self.consume_cursor(pipeline_key, flow_id, reader_name, spec, cursor.as_mut(), writers, ctx);
        let closed = cursor.close();

        consumed?;
        closed.map_err(reader_error)
    }

    #[allow(clippy::too_many_arguments)]
    fn consume_cursor(
        &self,
        pipeline_key: &str,
        flow_id: &str,
        reader_name: &str,
        spec: &ReaderSpec,
        cursor: &mut dyn BatchCursor,
        writers: &[WriterAttributes],
        ctx: &mut ExecutionContext,
    ) -> EngineResult<()> {
        let mut batch_index: u64 = 1;

        loop {
            let batch = cursor.next_batch().map_err(|source| EngineError::Reader {
                reader: reader_name.to_string(),
                source,
            })?;
            let Some(batch) = batch else {
                break;
            };

            ctx.set(BATCH_INDEX, batch_index);
            ctx.set(BATCH_SIZE, spec.batch_size);
            info!(batch_index, batch_size = spec.batch_size, rows = batch.len(), "Processing batch");

            self.events.emit(RunEvent::BatchRead {
                pipeline: pipeline_key.to_string(),
                flow_id: flow_id.to_string(),
                batch_index,
                rows: batch.len(),
            });

            if batch.is_empty() {
                info!(batch_index, "Empty batch read");
            } else {
                let rows = self.transform(spec, batch, ctx)?;
                if rows.is_empty() {
                    info!(batch_index, "Empty batch after transform and filter");
                } else {
                    self.write_to_all(pipeline_key, writers, &rows, ctx)?;
                }
            }

            batch_index += 1;
        }

        Ok(())
    }

    /// Merge the context into every row, then transform, then filter
    pub(crate) fn transform(
        &self,
        spec: &ReaderSpec,
        mut rows: Vec<Row>,
        ctx: &ExecutionContext,
    ) -> EngineResult<Vec<Row>> {
        let snapshot = ctx.snapshot();
        for row in rows.iter_mut() {
            for (key, value) in &snapshot {
                row.insert(key.clone(), value.clone());
            }
        }

        if let Some(transformer) = &spec.transformer {
            let merge = transformer.merge_to_original || spec.transform_and_merge_to_original;
            rows = self.apply_transformer(transformer, merge, rows)?;
        }

        if let Some(function) = &spec.enrichment_or_filter_function {
            let result = self
                .scripts
                .invoke_function(function, vec![rows_to_value(rows)])?;
            rows = rows_from_value(result).map_err(|message| ScriptError::BadReturn {
                function: function.clone(),
                message,
            })?;
        }

        Ok(rows)
    }

    fn apply_transformer(
        &self,
        transformer: &TransformerSpec,
        merge: bool,
        rows: Vec<Row>,
    ) -> EngineResult<Vec<Row>> {
        if transformer.all_at_once {
            if let Some(template) = &transformer.template {
                let mut vars = Row::new();
                vars.insert("list".to_string(), rows_to_value(rows));
                let rendered = self.renderer.render(template, &vars)?;
                let value: Value = serde_json::from_str(&rendered)
                    .map_err(|e| EngineError::Transform(format!("template did not produce JSON: {}", e)))?;
                return rows_from_value(value).map_err(EngineError::Transform);
            }
            if let Some(function) = &transformer.function {
                let result = self.scripts.invoke_function(function, vec![rows_to_value(rows)])?;
                return rows_from_value(result).map_err(|message| {
                    EngineError::Script(ScriptError::BadReturn {
                        function: function.clone(),
                        message,
                    })
                });
            }
            return Ok(rows);
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(transformed) = self.transform_row(transformer, &row)? else {
                continue;
            };
            if merge {
                let mut original = row;
                original.extend(transformed);
                out.push(original);
            } else {
                out.push(transformed);
            }
        }
        Ok(out)
    }

    /// Transform one row; a function returning `null` drops the row
    fn transform_row(&self, transformer: &TransformerSpec, row: &Row) -> EngineResult<Option<Row>> {
        if let Some(template) = &transformer.template {
            let rendered = self.renderer.render(template, row)?;
            return match serde_json::from_str::<Value>(&rendered) {
                Ok(Value::Object(map)) => Ok(Some(map)),
                Ok(other) => Err(EngineError::Transform(format!(
                    "template produced {} instead of an object",
                    other
                ))),
                Err(e) => Err(EngineError::Transform(format!("template did not produce JSON: {}", e))),
            };
        }

        if let Some(function) = &transformer.function {
            let result = self
                .scripts
                .invoke_function(function, vec![Value::Object(row.clone())])?;
            return match result {
                Value::Object(map) => Ok(Some(map)),
                Value::Null => Ok(None),
                other => Err(EngineError::Script(ScriptError::BadReturn {
                    function: function.clone(),
                    message: format!("expected a row object, got {}", other),
                })),
            };
        }

        Ok(Some(row.clone()))
    }
}

fn rows_to_value(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

/// Expose the read result under `writeToVariableName`
fn capture(spec: &ReaderSpec, value: Value, ctx: &mut ExecutionContext) {
    if let Some(name) = &spec.write_to_variable_name {
        ctx.set(name.clone(), value);
    }
}

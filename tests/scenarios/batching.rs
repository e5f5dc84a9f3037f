//! Test: BATCHED reads, batch bookkeeping and cursor release

use crate::helpers::*;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use transporter::adapter::ComponentRegistry;
use transporter::execution::EngineError;
use transporter::script::FunctionRegistry;

fn batched(batch_size: usize) -> String {
    format!(
        r#"
flows:
  - id: copy
    reader:
      beanName: source
      batchSize: {}
    writers:
      - beanName: sink
"#,
        batch_size
    )
}

#[test]
fn test_rows_are_written_in_ceil_n_over_b_batches() {
    let log = order_log();
    let reader = Arc::new(RecordingReader::new("source", rows(&[1, 2, 3, 4, 5, 6, 7]), &log));
    let sink = RecordingWriter::new("sink");
    let registry = ComponentRegistry::new();
    register_reader(&registry, "source", &reader);
    register_updater(&registry, "sink", &sink);

    let service = service(registry, FunctionRegistry::new());
    install(&service, "batched", &batched(3));
    service.transport("batched", None).unwrap();

    assert_eq!(sink.batch_calls(), vec![3, 3, 1]);
    assert_eq!(sink.written_ids(), vec![1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(reader.closes.load(Ordering::SeqCst), 1);

    let batch_indexes: Vec<Value> = sink.calls().into_iter().map(|(_, _, index)| index).collect();
    assert_eq!(batch_indexes, vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn test_rows_carry_batch_context() {
    let log = order_log();
    let reader = Arc::new(RecordingReader::new("source", rows(&[1, 2, 3]), &log));
    let sink = RecordingWriter::new("sink");
    let registry = ComponentRegistry::new();
    register_reader(&registry, "source", &reader);
    register_updater(&registry, "sink", &sink);

    let service = service(registry, FunctionRegistry::new());
    install(&service, "batched", &batched(2));
    service.transport("batched", None).unwrap();

    let written = sink.written_rows();
    assert_eq!(written[0]["batchIndex"], json!(1));
    assert_eq!(written[2]["batchIndex"], json!(2));
    assert_eq!(written[2]["batchSize"], json!(2));
    assert_eq!(written[0]["pipelineKey"], json!("batched"));
}

#[test]
fn test_cursor_closed_once_when_reading_fails() {
    let log = order_log();
    let reader = Arc::new(RecordingReader::new("source", rows(&[1, 2, 3, 4, 5]), &log).failing_on_batch(2));
    let sink = RecordingWriter::new("sink");
    let registry = ComponentRegistry::new();
    register_reader(&registry, "source", &reader);
    register_updater(&registry, "sink", &sink);

    let service = service(registry, FunctionRegistry::new());
    install(&service, "batched", &batched(2));
    let err = service.transport("batched", None).unwrap_err();

    assert!(matches!(err.root(), EngineError::Reader { .. }), "got {}", err);
    assert_eq!(sink.batch_calls(), vec![2]);
    assert_eq!(reader.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cursor_closed_once_when_writing_fails() {
    let log = order_log();
    let reader = Arc::new(RecordingReader::new("source", rows(&[1, 2, 3, 4]), &log));
    let sink = RecordingWriter::rejecting("sink", &[1]);
    let registry = ComponentRegistry::new();
    register_reader(&registry, "source", &reader);
    register_updater(&registry, "sink", &sink);
    // the dead-letter sink breaks on every bulk call, which aborts the flow
    register_appender(&registry, "failedRecordsAppender", &RecordingWriter::bulk_broken("dead"));

    let service = service(registry, FunctionRegistry::new());
    install(&service, "batched", &batched(2));
    let err = service.transport("batched", None).unwrap_err();

    assert!(matches!(err.root(), EngineError::DeadLetter { .. }), "got {}", err);
    assert_eq!(reader.closes.load(Ordering::SeqCst), 1);
    assert_eq!(sink.written_ids(), vec![2]);
}

#[test]
fn test_batches_emptied_by_filter_are_not_written() {
    let log = order_log();
    let reader = Arc::new(RecordingReader::new("source", rows(&[1, 2, 3, 4]), &log));
    let sink = RecordingWriter::new("sink");
    let registry = ComponentRegistry::new();
    register_reader(&registry, "source", &reader);
    register_updater(&registry, "sink", &sink);

    let functions = FunctionRegistry::new();
    functions.register("dropSmallIds", |args| {
        let kept: Vec<Value> = args[0]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|row| row["id"].as_i64().unwrap_or(0) > 2)
            .collect();
        Ok(Value::Array(kept))
    });

    let service = service(registry, functions);
    install(
        &service,
        "filtered",
        r#"
flows:
  - reader:
      beanName: source
      batchSize: 2
      enrichmentOrFilterFunction: dropSmallIds
    writers:
      - beanName: sink
"#,
    );
    service.transport("filtered", None).unwrap();

    assert_eq!(sink.batch_calls(), vec![2]);
    assert_eq!(sink.written_ids(), vec![3, 4]);
}

#[test]
fn test_empty_source_writes_nothing() {
    let log = order_log();
    let reader = Arc::new(RecordingReader::new("source", Vec::new(), &log));
    let sink = RecordingWriter::new("sink");
    let registry = ComponentRegistry::new();
    register_reader(&registry, "source", &reader);
    register_updater(&registry, "sink", &sink);

    let service = service(registry, FunctionRegistry::new());
    install(&service, "empty", &batched(10));
    service.transport("empty", None).unwrap();

    assert!(sink.calls().is_empty());
    assert_eq!(reader.closes.load(Ordering::SeqCst), 1);
}

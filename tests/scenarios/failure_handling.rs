//! Test: bulk-then-row retry, onSuccess/onFailure routing and dead letters

use crate::helpers::*;
use serde_json::json;
use std::sync::Arc;
use transporter::adapter::ComponentRegistry;
use transporter::execution::EngineError;
use transporter::script::FunctionRegistry;

fn single_writer(writer_yaml: &str) -> String {
    format!(
        r#"
flows:
  - id: copy
    reader:
      beanName: source
      mode: ALL_AT_ONCE
    writers:
{}
"#,
        writer_yaml
    )
}

fn registry_with_source(ids: &[i64]) -> ComponentRegistry {
    let registry = ComponentRegistry::new();
    register_reader(&registry, "source", &Arc::new(RecordingReader::new("source", rows(ids), &order_log())));
    registry
}

#[test]
fn test_bulk_failure_with_all_rows_recovering() {
    let registry = registry_with_source(&[1, 2, 3]);
    let sink = RecordingWriter::bulk_broken("sink");
    let fallback = RecordingWriter::new("fallback");
    let dead = RecordingWriter::new("dead");
    register_updater(&registry, "sink", &sink);
    register_appender(&registry, "fallback", &fallback);
    register_appender(&registry, "failedRecordsAppender", &dead);

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "recovering",
        &single_writer("      - beanName: sink\n        onFailure:\n          beanName: fallback\n"),
    );
    service.transport("recovering", None).unwrap();

    let calls: Vec<String> = sink.calls().into_iter().map(|(call, _, _)| call).collect();
    assert_eq!(calls, vec!["create_batch", "create", "create", "create"]);
    assert_eq!(sink.written_ids(), vec![1, 2, 3]);
    assert!(fallback.calls().is_empty());
    assert!(dead.calls().is_empty());
}

#[test]
fn test_failed_rows_reach_on_failure_and_dead_letter() {
    let registry = registry_with_source(&[1, 2, 3, 4, 5, 6]);
    let sink = RecordingWriter::rejecting("sink", &[2, 5]);
    let fallback = RecordingWriter::new("fallback");
    let dead = RecordingWriter::new("dead");
    register_updater(&registry, "sink", &sink);
    register_appender(&registry, "fallback", &fallback);
    register_appender(&registry, "failedRecordsAppender", &dead);

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "partial",
        &single_writer("      - beanName: sink\n        onFailure:\n          beanName: fallback\n"),
    );
    service.transport("partial", None).unwrap();

    assert_eq!(sink.written_ids(), vec![1, 3, 4, 6]);
    assert_eq!(fallback.written_ids(), vec![2, 5]);

    let dead_rows = dead.written_rows();
    assert_eq!(dead_rows.len(), 2);
    assert_eq!(dead_rows[0]["pipelineKey"], json!("partial"));
    assert_eq!(dead_rows[0]["failedRecord"]["id"], json!(2));
    assert_eq!(dead_rows[1]["failedRecord"]["id"], json!(5));
}

#[test]
fn test_on_success_receives_written_rows_only() {
    let registry = registry_with_source(&[1, 2, 3]);
    let sink = RecordingWriter::rejecting("sink", &[3]);
    let audit = RecordingWriter::new("audit");
    register_updater(&registry, "sink", &sink);
    register_appender(&registry, "audit", &audit);

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "audited",
        &single_writer("      - beanName: sink\n        onSuccess:\n          beanName: audit\n"),
    );
    service.transport("audited", None).unwrap();

    assert_eq!(audit.written_ids(), vec![1, 2]);
    assert_eq!(audit.batch_calls(), vec![2]);
}

#[test]
fn test_failing_on_failure_writer_dead_letters_again() {
    let registry = registry_with_source(&[1, 2]);
    let sink = RecordingWriter::rejecting("sink", &[2]);
    let fallback = RecordingWriter::rejecting("fallback", &[2]);
    let dead = RecordingWriter::new("dead");
    register_updater(&registry, "sink", &sink);
    register_appender(&registry, "fallback", &fallback);
    register_appender(&registry, "failedRecordsAppender", &dead);

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "chained",
        &single_writer("      - beanName: sink\n        onFailure:\n          beanName: fallback\n"),
    );
    service.transport("chained", None).unwrap();

    assert!(fallback.written_ids().is_empty());
    assert_eq!(dead.written_rows().len(), 2);
}

#[test]
fn test_missing_dead_letter_writer_is_tolerated() {
    let registry = registry_with_source(&[1, 2]);
    let sink = RecordingWriter::rejecting("sink", &[1]);
    register_updater(&registry, "sink", &sink);

    let service = service(registry, FunctionRegistry::new());
    install(&service, "lenient", &single_writer("      - beanName: sink\n"));

    assert!(service.transport("lenient", None).is_ok());
    assert_eq!(sink.written_ids(), vec![2]);
}

#[test]
fn test_update_on_append_only_writer_fails_before_writing() {
    let registry = registry_with_source(&[1]);
    let log_sink = RecordingWriter::new("auditLog");
    register_appender(&registry, "auditLog", &log_sink);

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "mutating",
        &single_writer("      - beanName: '{{ target }}'\n        action: UPDATE\n"),
    );

    let err = service
        .transport("mutating", Some(vec![row(json!({"target": "auditLog"}))]))
        .unwrap_err();

    assert!(
        matches!(err.root(), EngineError::UnsupportedAction { writer, .. } if writer == "auditLog"),
        "got {}",
        err
    );
    assert!(log_sink.calls().is_empty());
}

#[test]
fn test_disabled_writer_is_skipped() {
    let registry = registry_with_source(&[1, 2]);
    let off = RecordingWriter::new("off");
    let on = RecordingWriter::new("on");
    register_updater(&registry, "off", &off);
    register_updater(&registry, "on", &on);

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "toggled",
        &single_writer("      - beanName: off\n        enabled: false\n      - beanName: on\n"),
    );
    service.transport("toggled", None).unwrap();

    assert!(off.calls().is_empty());
    assert_eq!(on.written_ids(), vec![1, 2]);
}

#[test]
fn test_writers_receive_rows_in_declaration_order() {
    let log = order_log();
    let registry = registry_with_source(&[1]);
    register_updater(&registry, "first", &RecordingWriter::logging_to("first", &log));
    register_updater(&registry, "second", &RecordingWriter::logging_to("second", &log));

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "fanout",
        &single_writer("      - beanName: first\n      - beanName: second\n"),
    );
    service.transport("fanout", None).unwrap();

    assert_eq!(entries(&log), vec!["write:first:1", "write:second:1"]);
}

//! Test: complete pipelines from definition to sink

use crate::helpers::*;
use serde_json::{json, Value};
use std::sync::Arc;
use transporter::adapter::ComponentRegistry;
use transporter::execution::Transporter;
use transporter::persistence::InMemoryRunStore;
use transporter::script::FunctionRegistry;

#[test]
fn test_sync_users_single_batch() {
    let log = order_log();
    let registry = ComponentRegistry::new();
    register_reader(
        &registry,
        "usersReader",
        &Arc::new(RecordingReader::new("usersReader", rows(&[1, 2]), &log)),
    );
    let sink = RecordingWriter::new("usersSink");
    register_updater(&registry, "usersSink", &sink);

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "sync-users",
        r#"
flows:
  - id: copy-users
    reader:
      beanName: usersReader
      batchSize: 100
    writers:
      - beanName: usersSink
        action: UPDATE
        writeInstruction: '{"table": "{{ table }}"}'
"#,
    );

    service
        .transport("sync-users", Some(vec![row(json!({"table": "users"}))]))
        .unwrap();

    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "update_batch");
    assert_eq!(calls[0].1, 2);
    assert_eq!(sink.instructions.lock().unwrap()[0], json!({"table": "users"}));
    assert_eq!(sink.written_ids(), vec![1, 2]);
}

#[test]
fn test_variable_hand_off_between_flows() {
    let log = order_log();
    let registry = ComponentRegistry::with_builtins();
    register_reader(
        &registry,
        "source",
        &Arc::new(RecordingReader::new("source", rows(&[7, 8]), &log)),
    );
    let sink = RecordingWriter::new("sink");
    register_updater(&registry, "sink", &sink);

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "hand-off",
        r#"
flows:
  - id: capture
    reader:
      beanName: source
      mode: ALL_AT_ONCE
      writeToVariableName: captured
    writers:
      - beanName: flowVariableWriter
        writeInstruction: copied
  - id: replay-captured
    reader:
      beanName: flowVariableReader
      readInstruction: captured
      mode: ALL_AT_ONCE
    writers:
      - beanName: sink
  - id: replay-copied
    reader:
      beanName: flowVariableReader
      readInstruction: copied
      mode: ONE
    writers:
      - beanName: sink
"#,
    );

    service.transport("hand-off", None).unwrap();

    assert_eq!(sink.written_ids(), vec![7, 8, 7]);
}

#[test]
fn test_template_transformer_reshapes_each_row() {
    let log = order_log();
    let registry = ComponentRegistry::new();
    register_reader(&registry, "source", &Arc::new(RecordingReader::new("source", rows(&[1, 2]), &log)));
    let plain = RecordingWriter::new("plain");
    register_updater(&registry, "plain", &plain);
    let merged = RecordingWriter::new("merged");
    register_updater(&registry, "merged", &merged);

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "reshape",
        r#"
flows:
  - id: replace
    reader:
      beanName: source
      mode: ALL_AT_ONCE
      transformer:
        template: '{"userId": {{ id }}, "label": "user-{{ id }}"}'
    writers:
      - beanName: plain
  - id: merge
    reader:
      beanName: source
      mode: ALL_AT_ONCE
      transformAndMergeToOriginal: true
      transformer:
        template: '{"label": "user-{{ id }}"}'
    writers:
      - beanName: merged
"#,
    );

    service.transport("reshape", None).unwrap();

    let plain_rows = plain.written_rows();
    assert_eq!(plain_rows[0], row(json!({"userId": 1, "label": "user-1"})));
    assert_eq!(plain_rows[1], row(json!({"userId": 2, "label": "user-2"})));

    let merged_rows = merged.written_rows();
    assert_eq!(merged_rows[0]["id"], json!(1));
    assert_eq!(merged_rows[0]["label"], json!("user-1"));
    assert_eq!(merged_rows[0]["pipelineKey"], json!("reshape"));
}

#[test]
fn test_functions_transform_and_filter() {
    let log = order_log();
    let registry = ComponentRegistry::new();
    register_reader(
        &registry,
        "source",
        &Arc::new(RecordingReader::new("source", rows(&[1, 2, 3, 4, 5]), &log)),
    );
    let sink = RecordingWriter::new("sink");
    register_updater(&registry, "sink", &sink);

    let functions = FunctionRegistry::new();
    functions.register("skipThree", |args| {
        let row = args.into_iter().next().unwrap_or(Value::Null);
        if row["id"] == json!(3) {
            Ok(Value::Null)
        } else {
            Ok(row)
        }
    });
    functions.register("keepOdd", |args| {
        let list = args.into_iter().next().unwrap_or(Value::Null);
        let kept: Vec<Value> = list
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r["id"].as_i64().is_some_and(|id| id % 2 == 1))
            .collect();
        Ok(Value::Array(kept))
    });

    let service = service(registry, functions);
    install(
        &service,
        "scripted",
        r#"
flows:
  - reader:
      beanName: source
      mode: ALL_AT_ONCE
      transformer:
        function: skipThree
      enrichmentOrFilterFunction: keepOdd
    writers:
      - beanName: sink
"#,
    );

    service.transport("scripted", None).unwrap();

    assert_eq!(sink.written_ids(), vec![1, 5]);
}

#[test]
fn test_declared_file_components() {
    let dir = std::env::temp_dir().join(format!("transporter-e2e-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("users.json");
    let output = dir.join("users.jsonl");
    std::fs::write(&input, r#"[{"id": 1, "name": "ada"}, {"id": 2, "name": "grace"}]"#).unwrap();

    let functions = FunctionRegistry::new();
    let transporter = Transporter::new(
        service(ComponentRegistry::with_builtins(), functions),
        Arc::new(InMemoryRunStore::new()),
        1,
    );

    let definition = format!(
        r#"
components:
  usersFile:
    factory: jsonFile
    config:
      path: {}
  usersOut:
    factory: jsonLines
    config:
      path: {}
flows:
  - id: export
    reader:
      beanName: usersFile
      batchSize: 1
      transformer:
        template: '{{"id": {{{{ id }}}}, "name": "{{{{ name }}}}"}}'
    writers:
      - beanName: usersOut
"#,
        serde_json::to_string(&input).unwrap(),
        serde_json::to_string(&output).unwrap(),
    );

    transporter.register("export-users", &definition).unwrap();
    transporter.service().transport("export-users", None).unwrap();

    let written = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<Value> = written
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines, vec![json!({"id": 1, "name": "ada"}), json!({"id": 2, "name": "grace"})]);

    let _ = std::fs::remove_dir_all(&dir);
}

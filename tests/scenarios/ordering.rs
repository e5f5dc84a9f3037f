//! Test: parameter sets, hooks and flows run strictly in order

use crate::helpers::*;
use serde_json::json;
use std::sync::Arc;
use transporter::adapter::ComponentRegistry;
use transporter::core::{ExecutionContext, PIPELINE_RUN_ID};
use transporter::script::FunctionRegistry;

const TWO_FLOWS: &str = r#"
pre:
  runnable: markPre
post:
  runnable: markPost
flows:
  - id: first
    reader:
      beanName: readerA
      readInstruction: '{"tag": "{{ tenant }}"}'
    writers:
      - beanName: sink
  - id: second
    reader:
      beanName: readerB
      readInstruction: '{"tag": "{{ tenant }}"}'
    writers:
      - beanName: sink
"#;

fn mark(registry: &ComponentRegistry, name: &str, log: &OrderLog) {
    let log = log.clone();
    let label = name.trim_start_matches("mark").to_lowercase();
    registry.register_runnable(name, move |ctx: &mut ExecutionContext| {
        let tenant = ctx.get("tenant").and_then(|v| v.as_str()).unwrap_or("-").to_string();
        log.lock().unwrap().push(format!("{}:{}", label, tenant));
        Ok(())
    });
}

#[test]
fn test_params_hooks_and_flows_run_in_order() {
    let log = order_log();
    let registry = ComponentRegistry::new();
    register_reader(&registry, "readerA", &Arc::new(RecordingReader::new("readerA", rows(&[1]), &log)));
    register_reader(&registry, "readerB", &Arc::new(RecordingReader::new("readerB", rows(&[2]), &log)));
    register_updater(&registry, "sink", &RecordingWriter::logging_to("sink", &log));
    mark(&registry, "markPre", &log);
    mark(&registry, "markPost", &log);

    let service = service(registry, FunctionRegistry::new());
    install(&service, "ordered", TWO_FLOWS);

    service
        .transport(
            "ordered",
            Some(vec![row(json!({"tenant": "t1"})), row(json!({"tenant": "t2"}))]),
        )
        .unwrap();

    assert_eq!(
        entries(&log),
        vec![
            "pre:t1",
            "read:readerA:t1",
            "write:sink:1",
            "read:readerB:t1",
            "write:sink:1",
            "post:t1",
            "pre:t2",
            "read:readerA:t2",
            "write:sink:1",
            "read:readerB:t2",
            "write:sink:1",
            "post:t2",
        ]
    );
}

#[test]
fn test_failure_aborts_remaining_parameter_sets() {
    let log = order_log();
    let registry = ComponentRegistry::new();
    register_reader(&registry, "readerA", &Arc::new(RecordingReader::new("readerA", rows(&[1]), &log)));
    register_updater(&registry, "sink", &RecordingWriter::logging_to("sink", &log));
    mark(&registry, "markPost", &log);
    registry.register_runnable("markPre", |ctx: &mut ExecutionContext| {
        match ctx.get("tenant").and_then(|v| v.as_str()) {
            Some("bad") => Err("tenant is suspended".to_string()),
            _ => Ok(()),
        }
    });

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "ordered",
        r#"
pre:
  runnable: markPre
post:
  runnable: markPost
flows:
  - id: first
    reader:
      beanName: readerA
      readInstruction: '{"tag": "{{ tenant }}"}'
    writers:
      - beanName: sink
"#,
    );

    let result = service.transport(
        "ordered",
        Some(vec![
            row(json!({"tenant": "t1"})),
            row(json!({"tenant": "bad"})),
            row(json!({"tenant": "t3"})),
        ]),
    );

    assert!(result.is_err());
    assert_eq!(entries(&log), vec!["read:readerA:t1", "write:sink:1", "post:t1"]);
}

#[test]
fn test_context_is_reset_between_parameter_sets() {
    let log = order_log();
    let seen = order_log();
    let registry = ComponentRegistry::with_builtins();
    register_reader(&registry, "users", &Arc::new(RecordingReader::new("users", rows(&[1, 2]), &log)));
    register_updater(&registry, "sink", &RecordingWriter::new("sink"));
    {
        let seen = seen.clone();
        registry.register_runnable("inspect", move |ctx: &mut ExecutionContext| {
            seen.lock()
                .unwrap()
                .push(format!("captured={}", ctx.get("captured").is_some()));
            Ok(())
        });
    }

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "reset",
        r#"
pre:
  runnable: inspect
flows:
  - id: capture
    reader:
      beanName: users
      mode: ALL_AT_ONCE
      writeToVariableName: captured
    writers:
      - beanName: sink
"#,
    );

    service
        .transport("reset", Some(vec![row(json!({"n": 1})), row(json!({"n": 2}))]))
        .unwrap();

    assert_eq!(entries(&seen), vec!["captured=false", "captured=false"]);
}

#[test]
fn test_each_run_gets_its_own_context() {
    let log = order_log();
    let reader = Arc::new(RecordingReader::new("users", rows(&[1]), &log));
    let registry = ComponentRegistry::new();
    register_reader(&registry, "users", &reader);
    register_updater(&registry, "sink", &RecordingWriter::new("sink"));

    let service = service(registry, FunctionRegistry::new());
    install(
        &service,
        "runs",
        "flows:\n  - reader:\n      beanName: users\n    writers:\n      - beanName: sink\n",
    );

    let first = service.transport("runs", None).unwrap();
    let second = service.transport("runs", None).unwrap();
    assert_ne!(first, second);

    let contexts = reader.contexts.lock().unwrap().clone();
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[0][PIPELINE_RUN_ID], json!(first));
    assert_eq!(contexts[1][PIPELINE_RUN_ID], json!(second));
}

#[test]
fn test_params_provider_supplies_parameter_sets() {
    let log = order_log();
    let registry = ComponentRegistry::new();
    register_reader(&registry, "readerA", &Arc::new(RecordingReader::new("readerA", rows(&[1]), &log)));
    register_updater(&registry, "sink", &RecordingWriter::new("sink"));

    let functions = FunctionRegistry::new();
    functions.register("tenants", |args| {
        // literal args first, then the pipeline key
        assert_eq!(args, vec![json!("active"), json!("provided")]);
        Ok(json!([{"tenant": "a"}, {"tenant": "b"}]))
    });

    let service = service(registry, functions);
    install(
        &service,
        "provided",
        r#"
paramsListProviderScript:
  functionName: tenants
  args: [active]
flows:
  - reader:
      beanName: readerA
      readInstruction: '{"tag": "{{ tenant }}"}'
    writers:
      - beanName: sink
"#,
    );

    service.transport("provided", None).unwrap();
    assert_eq!(entries(&log), vec!["read:readerA:a", "read:readerA:b"]);
}

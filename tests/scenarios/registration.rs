//! Test: registration, run history, asynchronous runs and schedules

use crate::helpers::*;
use serde_json::json;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use transporter::adapter::{Component, ComponentRegistry, WriterHandle};
use transporter::core::DefinitionError;
use transporter::execution::{InMemoryLockProvider, ManualScheduler, Transporter};
use transporter::persistence::{InMemoryRunStore, RunStatus, RunStore};
use transporter::script::FunctionRegistry;
use transporter::TransporterConfig;

struct Fixture {
    transporter: Transporter,
    store: Arc<InMemoryRunStore>,
    sink: Arc<RecordingWriter>,
    audit: Arc<RecordingWriter>,
    declared: Arc<RecordingWriter>,
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn fixture_with(extra: impl FnOnce(&ComponentRegistry)) -> Fixture {
    let registry = ComponentRegistry::with_builtins();
    register_reader(
        &registry,
        "source",
        &Arc::new(RecordingReader::new("source", rows(&[1, 2]), &order_log())),
    );
    let sink = RecordingWriter::new("sink");
    let audit = RecordingWriter::new("audit");
    register_updater(&registry, "sink", &sink);
    register_appender(&registry, "audit", &audit);

    // both factories hand out the same recorder, once as an updater and once append-only
    let declared = RecordingWriter::new("declared");
    let updating = declared.clone();
    registry.register_factory("updatingSink", move |_| {
        Ok(Component::Writer(WriterHandle::updater_arc(updating.clone())))
    });
    let appending = declared.clone();
    registry.register_factory("appendingSink", move |_| {
        Ok(Component::Writer(WriterHandle::appender_arc(appending.clone())))
    });
    extra(&registry);

    let store = Arc::new(InMemoryRunStore::new());
    let transporter = Transporter::new(service(registry, FunctionRegistry::new()), store.clone(), 2);

    Fixture {
        transporter,
        store,
        sink,
        audit,
        declared,
    }
}

fn copy_to(writer: &str, action: &str) -> String {
    format!(
        r#"
flows:
  - id: copy
    reader:
      beanName: source
      mode: ALL_AT_ONCE
    writers:
      - beanName: {}
        action: {}
"#,
        writer, action
    )
}

#[tokio::test]
async fn test_run_is_recorded_as_completed() {
    let f = fixture();
    f.transporter.register("copy", &copy_to("sink", "CREATE")).unwrap();

    let run_id = f.transporter.run("copy", None).await.unwrap();

    let run = f.store.load_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.started_at.is_some());
    assert!(run.completed_at.is_some());
    assert_eq!(f.sink.written_ids(), vec![1, 2]);
}

#[tokio::test]
async fn test_failed_run_is_recorded_with_its_error() {
    let f = fixture();
    f.transporter.register("broken", &copy_to("nowhere", "CREATE")).unwrap();

    let err = f.transporter.run("broken", None).await.unwrap_err();
    assert!(err.to_string().contains("nowhere"));

    let runs = f.store.list_runs("broken").await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].error.as_deref().unwrap_or_default().contains("nowhere"));
}

#[tokio::test]
async fn test_async_run_completes_in_background() {
    let f = fixture();
    f.transporter.register("copy", &copy_to("sink", "UPDATE")).unwrap();

    let run_id = f.transporter.run_async("copy", None).await;
    f.transporter.wait_idle().await;

    let run = f.store.load_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(f.sink.written_ids(), vec![1, 2]);
}

#[tokio::test]
async fn test_reregistration_replaces_the_definition() {
    let f = fixture();
    f.transporter.register("copy", &copy_to("sink", "CREATE")).unwrap();
    f.transporter.run("copy", None).await.unwrap();

    f.transporter.register("copy", &copy_to("audit", "CREATE")).unwrap();
    f.transporter.run("copy", None).await.unwrap();

    assert_eq!(f.sink.written_ids(), vec![1, 2]);
    assert_eq!(f.audit.written_ids(), vec![1, 2]);
    assert_eq!(f.store.list_runs("copy").await.unwrap().len(), 2);
}

#[test]
fn test_mutating_an_appender_is_rejected_at_registration() {
    let f = fixture();

    let err = f.transporter.register("mutate", &copy_to("audit", "UPDATE")).unwrap_err();

    assert!(matches!(
        err,
        DefinitionError::UnsupportedAction { ref flow, ref writer, .. } if flow == "copy" && writer == "audit"
    ));
    assert!(f.transporter.service().pipeline("mutate").is_none());
}

#[test]
fn test_unknown_factory_is_rejected() {
    let f = fixture();

    let err = f
        .transporter
        .register(
            "declared",
            "components:\n  src:\n    factory: kafka\nflows: []\n",
        )
        .unwrap_err();

    assert!(matches!(err, DefinitionError::UnknownFactory { ref factory, .. } if factory == "kafka"));
}

fn declared_update(factory: &str, scripts: &str) -> String {
    format!(
        r#"
components:
  target:
    factory: {}
{}
flows:
  - id: copy
    reader:
      beanName: source
      mode: ALL_AT_ONCE
    writers:
      - beanName: target
        action: UPDATE
"#,
        factory, scripts
    )
}

#[tokio::test]
async fn test_rejected_update_keeps_the_previous_definition_working() {
    let f = fixture();
    f.transporter.register("declared", &declared_update("updatingSink", "")).unwrap();

    let err = f
        .transporter
        .register("declared", &declared_update("appendingSink", ""))
        .unwrap_err();
    assert!(matches!(err, DefinitionError::UnsupportedAction { ref writer, .. } if writer == "target"));

    let renamed = declared_update("updatingSink", "scripts: [missing-helpers.lua]")
        .replace("  target:\n", "  elsewhere:\n");
    let err = f.transporter.register("declared", &renamed).unwrap_err();
    assert!(matches!(err, DefinitionError::Io { .. }));

    f.transporter.run("declared", None).await.unwrap();
    assert_eq!(f.declared.written_ids(), vec![1, 2]);
    assert_eq!(f.declared.calls()[0].0, "update_batch");
}

#[tokio::test]
async fn test_capability_check_uses_the_new_components() {
    let f = fixture();
    let appending = declared_update("appendingSink", "").replace("action: UPDATE", "action: CREATE");
    f.transporter.register("declared", &appending).unwrap();

    f.transporter.register("declared", &declared_update("updatingSink", "")).unwrap();
    f.transporter.run("declared", None).await.unwrap();

    assert_eq!(f.declared.written_ids(), vec![1, 2]);
    assert_eq!(f.declared.calls()[0].0, "update_batch");
}

/// Fixture whose pipeline `slow` blocks in its pre hook until released
fn gated_fixture() -> (Fixture, mpsc::Sender<()>) {
    let (release, gate) = mpsc::channel::<()>();
    let gate = Mutex::new(gate);
    let f = fixture_with(move |registry| {
        registry.register_runnable("gate", move |_| {
            gate.lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(10))
                .map_err(|e| e.to_string())
        });
    });
    let slow = format!("pre:\n  runnable: gate\n{}", copy_to("sink", "CREATE"));
    f.transporter.register("slow", &slow).unwrap();
    (f, release)
}

#[tokio::test]
async fn test_run_leaves_the_runtime_free() {
    let (f, release) = gated_fixture();

    let release_soon = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.send(()).unwrap();
    };
    let (outcome, ()) = tokio::join!(f.transporter.run("slow", None), release_soon);

    outcome.unwrap();
    assert_eq!(f.sink.written_ids(), vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submission_does_not_wait_for_running_work() {
    let (f, release) = gated_fixture();
    f.transporter.register("copy", &copy_to("audit", "CREATE")).unwrap();

    let transporter = Arc::new(f.transporter);
    let slow_id = transporter.run_async("slow", None).await;
    let waiter = tokio::spawn({
        let transporter = Arc::clone(&transporter);
        async move { transporter.wait_idle().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let quick_id = tokio::time::timeout(Duration::from_millis(500), transporter.run_async("copy", None))
        .await
        .expect("run_async blocked behind wait_idle");

    release.send(()).unwrap();
    waiter.await.unwrap();
    transporter.wait_idle().await;

    for run_id in [slow_id, quick_id] {
        let run = f.store.load_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }
    assert_eq!(f.audit.written_ids(), vec![1, 2]);
}

const SCHEDULED: &str = r#"
schedules:
  - scheduleName: nightly-copy
    cron:
      expression: "0 0 2 * * *"
    lock:
      lockName: nightly-copy
      lockAtLeastFor: 300
    paramList:
      - region: EU
flows:
  - reader:
      beanName: source
      mode: ALL_AT_ONCE
    writers:
      - beanName: sink
"#;

#[tokio::test]
async fn test_schedules_are_handed_to_the_scheduler() {
    let f = fixture();
    let scheduler = Arc::new(ManualScheduler::new());
    let transporter = f.transporter.with_scheduler(scheduler.clone());

    transporter.register("nightly", SCHEDULED).unwrap();

    assert_eq!(
        scheduler.scheduled(),
        vec![("nightly".to_string(), "nightly-copy".to_string())]
    );
    assert!(scheduler.fire("nightly-copy").await);

    let written = f.sink.written_rows();
    assert_eq!(written.len(), 2);
    assert_eq!(written[0]["region"], json!("EU"));

    let runs = f.store.list_runs("nightly").await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
}

#[tokio::test]
async fn test_locked_schedule_runs_once_while_held() {
    let f = fixture();
    let scheduler = Arc::new(ManualScheduler::new());
    let transporter = f
        .transporter
        .with_scheduler(scheduler.clone())
        .with_lock_provider(Arc::new(InMemoryLockProvider::new()));

    transporter.register("nightly", SCHEDULED).unwrap();
    scheduler.fire("nightly-copy").await;
    scheduler.fire("nightly-copy").await;

    assert_eq!(f.sink.written_ids(), vec![1, 2]);
    assert_eq!(f.store.list_runs("nightly").await.unwrap().len(), 1);
}

#[test]
fn test_disabled_schedules_are_not_registered() {
    let f = fixture();
    let scheduler = Arc::new(ManualScheduler::new());
    let transporter = f.transporter.with_scheduler(scheduler.clone());

    let definition = format!("scheduleEnabled: false\n{}", SCHEDULED);
    transporter.register("nightly", &definition).unwrap();

    assert!(scheduler.scheduled().is_empty());
}

#[test]
fn test_from_config_registers_listed_files() {
    let dir = std::env::temp_dir().join(format!("transporter-config-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("copy.yaml"), copy_to("sink", "CREATE")).unwrap();
    std::fs::write(
        dir.join("transporter.yaml"),
        "asyncPoolSize: 4\npipelines:\n  copy: copy.yaml\n",
    )
    .unwrap();

    let config = TransporterConfig::from_file(dir.join("transporter.yaml")).unwrap();
    let registry = ComponentRegistry::with_builtins();
    let transporter = Transporter::from_config(
        &config,
        Arc::new(registry),
        Arc::new(FunctionRegistry::new()),
        Arc::new(InMemoryRunStore::new()),
    )
    .unwrap();

    assert_eq!(transporter.service().pipeline_keys(), vec!["copy"]);

    let _ = std::fs::remove_dir_all(&dir);
}

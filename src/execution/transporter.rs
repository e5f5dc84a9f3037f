//! Registration and invocation surface
//!
//! [`Transporter`] owns the [`TransportService`] and adds what callers need
//! around it: loading definitions, handing schedules to a scheduler,
//! asynchronous runs on a bounded pool, and a run history.

use crate::adapter::{Component, ComponentRegistry, PipelineComponents, Row, WriteAction};
use crate::core::{DefinitionError, Flow, Pipeline, PipelineConfig, RunState, TransporterConfig, WriterSpec};
use crate::execution::trigger::{with_lock, LockProvider, ScheduledRun, ScheduledTask, TriggerScheduler};
use crate::execution::{EngineError, EngineResult, TransportService};
use crate::persistence::RunStore;
use crate::script::ScriptInvoker;
use crate::template::SimpleTemplateRenderer;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct Transporter {
    service: Arc<TransportService>,
    store: Arc<dyn RunStore>,
    pool: Arc<Semaphore>,
    scheduler: Option<Arc<dyn TriggerScheduler>>,
    locks: Option<Arc<dyn LockProvider>>,
    base_dir: Option<PathBuf>,
    in_flight: Mutex<JoinSet<()>>,
}

impl Transporter {
    /// Wrap a service; at most `pool_size` asynchronous runs execute at once
    pub fn new(service: TransportService, store: Arc<dyn RunStore>, pool_size: usize) -> Self {
        Self {
            service: Arc::new(service),
            store,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
            scheduler: None,
            locks: None,
            base_dir: None,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    /// Build from an engine configuration file, registering every listed pipeline
    pub fn from_config(
        config: &TransporterConfig,
        registry: Arc<ComponentRegistry>,
        scripts: Arc<dyn ScriptInvoker>,
        store: Arc<dyn RunStore>,
    ) -> anyhow::Result<Self> {
        let service = TransportService::new(registry, Arc::new(SimpleTemplateRenderer::new()), scripts)
            .with_dead_letter(config.dead_letter.clone());

        let mut transporter = Self::new(service, store, config.async_pool_size);
        transporter.base_dir = config.base_dir.clone();

        for (key, path) in &config.pipelines {
            let path = config.resolve(path);
            transporter
                .register_file(key, &path)
                .with_context(|| format!("Failed to register pipeline '{}' from {}", key, path.display()))?;
        }

        Ok(transporter)
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn TriggerScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_lock_provider(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Directory script paths of [`Transporter::register`]ed definitions are relative to
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn service(&self) -> &Arc<TransportService> {
        &self.service
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Register (or hot-update) a pipeline from YAML source
    pub fn register(&self, pipeline_key: &str, source: &str) -> Result<(), DefinitionError> {
        let base_dir = self.base_dir.clone();
        self.register_in(pipeline_key, source, base_dir.as_deref())
    }

    /// Register a pipeline from a YAML file; its scripts resolve against the file's directory
    pub fn register_file(&self, pipeline_key: &str, path: &Path) -> Result<(), DefinitionError> {
        let source = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.register_in(pipeline_key, &source, path.parent())
    }

    fn register_in(&self, pipeline_key: &str, source: &str, base_dir: Option<&Path>) -> Result<(), DefinitionError> {
        let pipeline = PipelineConfig::from_yaml(source)?.into_pipeline(pipeline_key)?;
        if pipeline.flows.is_empty() {
            warn!(pipeline = %pipeline_key, "Pipeline has no flows");
        }

        let components = self.service.registry().build_pipeline_components(&pipeline.components)?;
        self.check_capabilities(&pipeline, &components)?;

        for script in &pipeline.scripts {
            let path = match base_dir {
                Some(base) if Path::new(script).is_relative() => base.join(script),
                _ => PathBuf::from(script),
            };
            let source = std::fs::read_to_string(&path).map_err(|source| DefinitionError::Io {
                path: path.display().to_string(),
                source,
            })?;
            self.service
                .scripts()
                .load_script(&source)
                .map_err(|e| DefinitionError::Script {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
        }

        let schedules = if pipeline.schedule_enabled {
            pipeline.schedules.clone()
        } else {
            Vec::new()
        };

        let installed = self
            .service
            .registry()
            .install_pipeline_components(pipeline_key, components);
        let replaced = self.service.insert_pipeline(pipeline).is_some();
        info!(
            pipeline = %pipeline_key,
            components = installed,
            replaced,
            "Pipeline registered"
        );

        for schedule in &schedules {
            self.schedule(pipeline_key, schedule)?;
        }

        Ok(())
    }

    /// Reject writers whose literal component name resolves to an append-only
    /// sink asked for a mutating action
    ///
    /// Names resolve against the definition's own `components` first, then
    /// the globals. Templated names are only known at run time and are
    /// checked there.
    fn check_capabilities(&self, pipeline: &Pipeline, components: &PipelineComponents) -> Result<(), DefinitionError> {
        for flow in &pipeline.flows {
            let Flow::Read(read) = flow else {
                continue;
            };
            for writer in &read.writers {
                self.check_writer(components, &read.id, writer)?;
            }
        }
        Ok(())
    }

    fn check_writer(
        &self,
        components: &PipelineComponents,
        flow_id: &str,
        spec: &WriterSpec,
    ) -> Result<(), DefinitionError> {
        let literal = !spec.bean_name.contains("{{");
        if literal && spec.enabled && spec.action != WriteAction::Create {
            let component = components
                .get(&spec.bean_name)
                .cloned()
                .or_else(|| self.service.registry().resolve(None, &spec.bean_name));
            if let Some(Component::Writer(writer)) = component {
                if writer.is_append_only() {
                    return Err(DefinitionError::UnsupportedAction {
                        flow: flow_id.to_string(),
                        writer: spec.bean_name.clone(),
                        action: spec.action,
                    });
                }
            }
        }

        for next in [&spec.on_success, &spec.on_failure].into_iter().flatten() {
            self.check_writer(components, flow_id, next)?;
        }
        Ok(())
    }

    fn schedule(&self, pipeline_key: &str, schedule: &crate::core::Schedule) -> Result<(), DefinitionError> {
        let Some(scheduler) = &self.scheduler else {
            warn!(
                pipeline = %pipeline_key,
                schedule = %schedule.schedule_name,
                "No scheduler configured, schedule ignored"
            );
            return Ok(());
        };

        let service = Arc::clone(&self.service);
        let store = Arc::clone(&self.store);
        let key = pipeline_key.to_string();
        let params = schedule.param_list.clone();
        let mut task: ScheduledTask = Arc::new(move || -> ScheduledRun {
            let state = RunState::new(Uuid::new_v4().to_string(), &key);
            let run = run_recorded(Arc::clone(&service), Arc::clone(&store), state, Some(params.clone()));
            Box::pin(async move {
                // failures are logged by the engine and kept in the run store
                let _ = run.await;
            })
        });

        if let (Some(lock), Some(locks)) = (&schedule.lock, &self.locks) {
            task = with_lock(task, lock.clone(), Arc::clone(locks));
        }

        scheduler
            .schedule(pipeline_key, schedule, task)
            .map_err(|message| DefinitionError::Schedule {
                name: schedule.schedule_name.clone(),
                message,
            })?;

        info!(
            pipeline = %pipeline_key,
            schedule = %schedule.schedule_name,
            cron = %schedule.cron.expression,
            "Schedule registered"
        );
        Ok(())
    }

    /// Run a pipeline to completion and record it
    ///
    /// The engine is synchronous; the run executes on the blocking pool
    /// while the caller awaits its outcome.
    pub async fn run(&self, pipeline_key: &str, params_list: Option<Vec<Row>>) -> EngineResult<String> {
        let state = RunState::new(Uuid::new_v4().to_string(), pipeline_key);
        let run_id = state.run_id.clone();
        run_recorded(Arc::clone(&self.service), Arc::clone(&self.store), state, params_list).await?;
        Ok(run_id)
    }

    /// Submit a run to the worker pool and return its id immediately
    ///
    /// The outcome is only observable through the run store and the logs.
    pub async fn run_async(&self, pipeline_key: &str, params_list: Option<Vec<Row>>) -> String {
        let mut state = RunState::new(Uuid::new_v4().to_string(), pipeline_key);
        record(self.store.as_ref(), &state).await;
        let run_id = state.run_id.clone();

        let service = Arc::clone(&self.service);
        let store = Arc::clone(&self.store);
        let pool = Arc::clone(&self.pool);

        let run = async move {
            let _permit = match pool.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    state.fail(format!("worker pool closed: {}", e));
                    record(store.as_ref(), &state).await;
                    return;
                }
            };
            let _ = run_recorded(service, store, state, params_list).await;
        };

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            while let Some(finished) = in_flight.try_join_next() {
                report_task(finished);
            }
            in_flight.spawn(run);
        }

        info!(run_id = %run_id, pipeline = %pipeline_key, "Run submitted");
        run_id
    }

    /// Wait until every submitted asynchronous run has finished
    ///
    /// Runs submitted while waiting are waited for as well.
    pub async fn wait_idle(&self) {
        loop {
            let mut pending = {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                std::mem::take(&mut *in_flight)
            };
            if pending.is_empty() {
                return;
            }
            while let Some(finished) = pending.join_next().await {
                report_task(finished);
            }
        }
    }
}

/// Drive one run on the blocking pool, recording each state change
async fn run_recorded(
    service: Arc<TransportService>,
    store: Arc<dyn RunStore>,
    mut state: RunState,
    params_list: Option<Vec<Row>>,
) -> EngineResult<()> {
    state.start();
    record(store.as_ref(), &state).await;

    let run_id = state.run_id.clone();
    let key = state.pipeline_key.clone();
    let result = tokio::task::spawn_blocking(move || service.transport_with_id(&run_id, &key, params_list))
        .await
        .unwrap_or_else(|e| Err(EngineError::Interrupted(e.to_string())));

    match &result {
        Ok(()) => state.complete(),
        Err(e) => state.fail(e),
    }
    record(store.as_ref(), &state).await;
    result
}

fn report_task(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        error!(error = %e, "Asynchronous run task failed");
    }
}

/// Save a run record; history failures never fail a run
async fn record(store: &dyn RunStore, state: &RunState) {
    if let Err(e) = store.save_run(state).await {
        warn!(run_id = %state.run_id, error = %e, "Failed to record run state");
    }
}

impl std::fmt::Debug for Transporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transporter")
            .field("service", &self.service)
            .field("pool", &self.pool.available_permits())
            .finish()
    }
}

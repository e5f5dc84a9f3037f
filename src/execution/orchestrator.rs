//! Pipeline orchestrator - runs a pipeline once per parameter set

use crate::adapter::{rows_from_value, Component, ComponentRegistry, ReaderHandle, Row, WriterHandle};
use crate::core::config::DeadLetterConfig;
use crate::core::{
    ExecutionContext, Flow, Pipeline, TriggerFlow, PIPELINE_KEY, PIPELINE_RUN_ID,
};
use crate::execution::{EngineError, EngineResult, EventBus, RunEvent};
use crate::script::{ScriptError, ScriptInvoker};
use crate::template::TemplateRenderer;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

/// How deep pipeline-trigger flows may nest before a run is aborted
pub const MAX_TRIGGER_DEPTH: usize = 16;

/// Parameter set used when a trigger flow declares none
const PLACEHOLDER_PARAMS: (&str, &str) = ("dummyKey", "dummyVal");

/// Interprets registered pipelines
///
/// Runs are synchronous and execute entirely on the calling thread. Every
/// top-level run gets its own [`ExecutionContext`]; pipeline-trigger flows
/// reuse the context of the run that triggers them.
pub struct TransportService {
    pipelines: RwLock<HashMap<String, Arc<Pipeline>>>,
    pub(crate) registry: Arc<ComponentRegistry>,
    pub(crate) renderer: Arc<dyn TemplateRenderer>,
    pub(crate) scripts: Arc<dyn ScriptInvoker>,
    pub(crate) dead_letter: DeadLetterConfig,
    pub(crate) events: EventBus,
}

impl TransportService {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        renderer: Arc<dyn TemplateRenderer>,
        scripts: Arc<dyn ScriptInvoker>,
    ) -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
            registry,
            renderer,
            scripts,
            dead_letter: DeadLetterConfig::default(),
            events: EventBus::new(),
        }
    }

    /// Route failed records to the given dead-letter writer
    pub fn with_dead_letter(mut self, dead_letter: DeadLetterConfig) -> Self {
        self.dead_letter = dead_letter;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn scripts(&self) -> &Arc<dyn ScriptInvoker> {
        &self.scripts
    }

    /// Store a pipeline, replacing any previous definition under its key
    ///
    /// Runs already in progress keep the definition they started with.
    pub fn insert_pipeline(&self, pipeline: Pipeline) -> Option<Arc<Pipeline>> {
        self.pipelines
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(pipeline.key.clone(), Arc::new(pipeline))
    }

    pub fn pipeline(&self, key: &str) -> Option<Arc<Pipeline>> {
        self.pipelines
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Registered pipeline keys, sorted
    pub fn pipeline_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .pipelines
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Run a pipeline under a fresh run id, returning that id
    pub fn transport(&self, pipeline_key: &str, params_list: Option<Vec<Row>>) -> EngineResult<String> {
        let run_id = Uuid::new_v4().to_string();
        self.transport_with_id(&run_id, pipeline_key, params_list)?;
        Ok(run_id)
    }

    /// Run a pipeline under the given run id
    ///
    /// Parameter sets are processed strictly in order. The first unrecovered
    /// error aborts the run; later parameter sets are not attempted.
    pub fn transport_with_id(
        &self,
        run_id: &str,
        pipeline_key: &str,
        params_list: Option<Vec<Row>>,
    ) -> EngineResult<()> {
        let span = info_span!("pipeline_run", run_id = %run_id, pipeline = %pipeline_key);
        let _enter = span.enter();

        self.events.emit(RunEvent::RunStarted {
            run_id: run_id.to_string(),
            pipeline: pipeline_key.to_string(),
        });

        let result = self.run_top_level(run_id, pipeline_key, params_list);

        match &result {
            Ok(()) => {
                info!("Pipeline run completed");
                self.events.emit(RunEvent::RunCompleted {
                    run_id: run_id.to_string(),
                    pipeline: pipeline_key.to_string(),
                });
            }
            Err(e) => {
                error!(error = %e, "Pipeline run failed");
                self.events.emit(RunEvent::RunFailed {
                    run_id: run_id.to_string(),
                    pipeline: pipeline_key.to_string(),
                    error: e.to_string(),
                });
            }
        }

        result
    }

    fn run_top_level(
        &self,
        run_id: &str,
        pipeline_key: &str,
        params_list: Option<Vec<Row>>,
    ) -> EngineResult<()> {
        let pipeline = self
            .pipeline(pipeline_key)
            .ok_or_else(|| EngineError::PipelineNotFound(pipeline_key.to_string()))?;

        let params_list = self.resolve_params(&pipeline, params_list)?;
        info!(param_sets = params_list.len(), "Starting pipeline run");

        let mut ctx = ExecutionContext::new();

        for (index, params) in params_list.iter().enumerate() {
            let params_json = Value::Object(params.clone()).to_string();
            let span = info_span!("params", index, params = %params_json);
            let _enter = span.enter();

            ctx.clear();
            ctx.set(PIPELINE_RUN_ID, run_id);
            ctx.merge(params);
            ctx.set(PIPELINE_KEY, pipeline_key);

            self.events.emit(RunEvent::ParamsStarted {
                run_id: run_id.to_string(),
                pipeline: pipeline_key.to_string(),
                index,
                params: params.clone(),
            });

            self.run_body(&pipeline, &mut ctx, 0)?;
        }

        Ok(())
    }

    /// Caller-supplied params, else the provider's, else one empty set
    fn resolve_params(&self, pipeline: &Pipeline, params_list: Option<Vec<Row>>) -> EngineResult<Vec<Row>> {
        if let Some(list) = params_list.filter(|l| !l.is_empty()) {
            return Ok(list);
        }

        let Some(provider) = &pipeline.params_list_provider else {
            return Ok(vec![Row::new()]);
        };

        let mut args = provider.args.clone();
        args.push(Value::String(pipeline.key.clone()));
        let value = self.scripts.invoke_function(&provider.function_name, args)?;

        let list = rows_from_value(value).map_err(|message| ScriptError::BadReturn {
            function: provider.function_name.clone(),
            message,
        })?;

        if list.is_empty() {
            warn!(provider = %provider.function_name, "Parameter provider returned no parameter sets");
        }
        Ok(list)
    }

    /// Pre hook, flows in order, post hook
    pub(crate) fn run_body(&self, pipeline: &Pipeline, ctx: &mut ExecutionContext, depth: usize) -> EngineResult<()> {
        self.run_hook(&pipeline.key, "pre", pipeline.pre.as_ref(), ctx)?;
        for flow in &pipeline.flows {
            self.execute_flow(&pipeline.key, flow, ctx, depth)?;
        }
        self.run_hook(&pipeline.key, "post", pipeline.post.as_ref(), ctx)?;
        Ok(())
    }

    /// Execute one flow, wrapping any failure with pipeline and flow context
    pub(crate) fn execute_flow(
        &self,
        pipeline_key: &str,
        flow: &Flow,
        ctx: &mut ExecutionContext,
        depth: usize,
    ) -> EngineResult<()> {
        let flow_id = self.label(flow.id(), ctx);
        let desc = self.label(flow.desc(), ctx);
        info!(flow = %flow_id, desc = %desc, "****** [FLOW] ****** Executing flow");

        self.events.emit(RunEvent::FlowStarted {
            pipeline: pipeline_key.to_string(),
            flow_id: flow_id.clone(),
            desc,
        });

        let result = match flow {
            Flow::Trigger(trigger) => self.trigger_in_same_context(trigger, ctx, depth + 1),
            Flow::Read(read) => self.execute_reader_flow(pipeline_key, &flow_id, read, ctx),
        };

        result.map_err(|source| {
            error!(pipeline = %pipeline_key, flow = %flow_id, error = %source, "Flow failed");
            EngineError::Flow {
                pipeline: pipeline_key.to_string(),
                flow: flow_id,
                source: Box::new(source),
            }
        })
    }

    /// Run another pipeline inline, sharing (and mutating) the caller's context
    fn trigger_in_same_context(
        &self,
        trigger: &TriggerFlow,
        ctx: &mut ExecutionContext,
        depth: usize,
    ) -> EngineResult<()> {
        if depth > MAX_TRIGGER_DEPTH {
            return Err(EngineError::TriggerDepth(MAX_TRIGGER_DEPTH));
        }

        let pipeline = self
            .pipeline(&trigger.pipeline_key)
            .ok_or_else(|| EngineError::PipelineNotFound(trigger.pipeline_key.clone()))?;

        let params_list = match &trigger.params {
            Some(list) if !list.is_empty() => list.clone(),
            _ => {
                let mut placeholder = Row::new();
                placeholder.insert(PLACEHOLDER_PARAMS.0.to_string(), Value::from(PLACEHOLDER_PARAMS.1));
                vec![placeholder]
            }
        };

        info!(target_pipeline = %pipeline.key, param_sets = params_list.len(), "Triggering pipeline in the same context");

        for params in &params_list {
            ctx.merge(params);
            self.run_body(&pipeline, ctx, depth)?;
        }
        Ok(())
    }

    /// Render a template against the context
    pub(crate) fn render(&self, template: &str, ctx: &ExecutionContext) -> EngineResult<String> {
        Ok(self.renderer.render(template, ctx.variables())?)
    }

    /// Render a label for logging; falls back to the raw text
    pub(crate) fn label(&self, template: &str, ctx: &ExecutionContext) -> String {
        self.renderer
            .render(template, ctx.variables())
            .unwrap_or_else(|_| template.to_string())
    }

    pub(crate) fn resolve_reader(&self, pipeline_key: &str, name: &str) -> EngineResult<ReaderHandle> {
        match self.registry.resolve(Some(pipeline_key), name) {
            Some(Component::Reader(reader)) => Ok(reader),
            Some(other) => Err(EngineError::ComponentKind {
                name: name.to_string(),
                expected: "reader",
                actual: other.kind(),
            }),
            None => Err(EngineError::ComponentNotFound(name.to_string())),
        }
    }

    pub(crate) fn resolve_writer(&self, pipeline_key: &str, name: &str) -> EngineResult<WriterHandle> {
        match self.registry.resolve(Some(pipeline_key), name) {
            Some(Component::Writer(writer)) => Ok(writer),
            Some(other) => Err(EngineError::ComponentKind {
                name: name.to_string(),
                expected: "writer",
                actual: other.kind(),
            }),
            None => Err(EngineError::ComponentNotFound(name.to_string())),
        }
    }
}

impl std::fmt::Debug for TransportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportService")
            .field("pipelines", &self.pipeline_keys())
            .field("registry", &self.registry)
            .finish()
    }
}

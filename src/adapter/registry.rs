//! Component registry and factories
//!
//! Components are looked up by name. Names declared by a pipeline live in
//! that pipeline's own namespace and shadow global components of the same
//! name during its runs.

use crate::adapter::{Appender, Reader, ReaderHandle, Updater, WriterHandle};
use crate::core::config::DefinitionError;
use crate::core::ExecutionContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Declarative component definition: a factory name plus its config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub factory: String,

    #[serde(default)]
    pub config: Value,
}

/// Side-effecting hook component
pub type Runnable = Arc<dyn Fn(&mut ExecutionContext) -> Result<(), String> + Send + Sync>;

/// Builds a component from its JSON config
pub type ComponentFactory = Arc<dyn Fn(&Value) -> Result<Component, String> + Send + Sync>;

/// A registered component
#[derive(Clone)]
pub enum Component {
    Reader(ReaderHandle),
    Writer(WriterHandle),
    Runnable(Runnable),
}

impl Component {
    pub fn kind(&self) -> &'static str {
        match self {
            Component::Reader(_) => "reader",
            Component::Writer(w) if w.is_append_only() => "appender",
            Component::Writer(_) => "updater",
            Component::Runnable(_) => "runnable",
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Component({})", self.kind())
    }
}

/// Components declared by one pipeline, keyed by their declared name
pub type PipelineComponents = BTreeMap<String, Component>;

/// Name → component map with factories for declarative components
#[derive(Default)]
pub struct ComponentRegistry {
    components: RwLock<HashMap<String, Component>>,
    namespaces: RwLock<HashMap<String, PipelineComponents>>,
    factories: RwLock<HashMap<String, ComponentFactory>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a global component
    pub fn register(&self, name: impl Into<String>, component: Component) {
        self.components
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.into(), component);
    }

    pub fn register_reader<R: Reader>(&self, name: impl Into<String>, reader: R) {
        self.register(name, Component::Reader(ReaderHandle::new(reader)));
    }

    pub fn register_appender<A: Appender>(&self, name: impl Into<String>, writer: A) {
        self.register(name, Component::Writer(WriterHandle::appender(writer)));
    }

    pub fn register_updater<U: Updater>(&self, name: impl Into<String>, writer: U) {
        self.register(name, Component::Writer(WriterHandle::updater(writer)));
    }

    pub fn register_runnable<F>(&self, name: impl Into<String>, runnable: F)
    where
        F: Fn(&mut ExecutionContext) -> Result<(), String> + Send + Sync + 'static,
    {
        self.register(name, Component::Runnable(Arc::new(runnable)));
    }

    /// Register a factory usable from `components` declarations
    pub fn register_factory<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Component, String> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.into(), Arc::new(factory));
    }

    pub fn has_factory(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    /// Construct a component from its declaration
    pub fn build(&self, name: &str, spec: &ComponentSpec) -> Result<Component, DefinitionError> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&spec.factory)
            .cloned()
            .ok_or_else(|| DefinitionError::UnknownFactory {
                name: name.to_string(),
                factory: spec.factory.clone(),
            })?;

        factory(&spec.config).map_err(|message| DefinitionError::ComponentBuild {
            name: name.to_string(),
            message,
        })
    }

    /// Construct every declaration of a pipeline without installing any
    pub fn build_pipeline_components(
        &self,
        specs: &BTreeMap<String, ComponentSpec>,
    ) -> Result<PipelineComponents, DefinitionError> {
        specs
            .iter()
            .map(|(name, spec)| self.build(name, spec).map(|component| (name.clone(), component)))
            .collect()
    }

    /// Replace a pipeline's whole namespace with `components`
    pub fn install_pipeline_components(&self, pipeline_key: &str, components: PipelineComponents) -> usize {
        let count = components.len();
        let mut namespaces = self
            .namespaces
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if components.is_empty() {
            namespaces.remove(pipeline_key);
        } else {
            namespaces.insert(pipeline_key.to_string(), components);
        }
        count
    }

    /// Look a component up, preferring the pipeline's namespace
    pub fn resolve(&self, pipeline_key: Option<&str>, name: &str) -> Option<Component> {
        let scoped = pipeline_key.and_then(|key| {
            self.namespaces
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(key)
                .and_then(|components| components.get(name))
                .cloned()
        });

        scoped.or_else(|| {
            self.components
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(name)
                .cloned()
        })
    }

    /// Registered global component names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .components
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Names declared by one pipeline, sorted
    pub fn pipeline_names(&self, pipeline_key: &str) -> Vec<String> {
        self.namespaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(pipeline_key)
            .map(|components| components.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.names())
            .finish()
    }
}

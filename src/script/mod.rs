//! Named-function invocation for transforms, filters and hooks

#[cfg(feature = "lua")]
pub mod lua;

#[cfg(feature = "lua")]
pub use lua::LuaScriptInvoker;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unknown script function '{0}'")]
    UnknownFunction(String),

    #[error("failed to load script: {0}")]
    Load(String),

    #[error("script function '{function}' failed: {message}")]
    Invocation { function: String, message: String },

    #[error("script function '{function}' returned an unexpected value: {message}")]
    BadReturn { function: String, message: String },

    #[error("{0}")]
    Unsupported(String),
}

/// Script engine collaborator
pub trait ScriptInvoker: Send + Sync {
    /// Evaluate a script body, typically defining functions for later calls
    fn load_script(&self, source: &str) -> Result<(), ScriptError>;

    /// Call a previously defined function by name
    fn invoke_function(&self, name: &str, args: Vec<Value>) -> Result<Value, ScriptError>;
}

pub type ScriptFn = Arc<dyn Fn(Vec<Value>) -> Result<Value, String> + Send + Sync>;

/// Script invoker backed by native closures
///
/// Functions are registered in code. Script source cannot be loaded, which
/// makes this the invoker of choice for tests and for builds without the
/// `lua` feature.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: Arc<RwLock<HashMap<String, ScriptFn>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named function
    pub fn register<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(Vec<Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.into(), Arc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }
}

impl ScriptInvoker for FunctionRegistry {
    fn load_script(&self, _source: &str) -> Result<(), ScriptError> {
        Err(ScriptError::Unsupported(
            "script source cannot be loaded into a function registry".to_string(),
        ))
    }

    fn invoke_function(&self, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        let function = self
            .functions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::UnknownFunction(name.to_string()))?;

        function(args).map_err(|message| ScriptError::Invocation {
            function: name.to_string(),
            message,
        })
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .functions
            .read()
            .map(|functions| functions.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

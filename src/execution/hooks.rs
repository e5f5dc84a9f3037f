//! Pre/post hook execution

use crate::adapter::Component;
use crate::core::{ExecutionContext, Hook};
use crate::execution::{EngineError, EngineResult, TransportService};
use tracing::{debug, info};

impl TransportService {
    /// Run every populated form of a hook: inline script, runnable, script call
    ///
    /// A missing hook is a no-op.
    pub(crate) fn run_hook(
        &self,
        pipeline_key: &str,
        phase: &str,
        hook: Option<&Hook>,
        ctx: &mut ExecutionContext,
    ) -> EngineResult<()> {
        let Some(hook) = hook else {
            return Ok(());
        };
        info!(phase, "Running {} hook", phase);

        let hook_error = |message: String| EngineError::Hook(format!("{} hook of '{}': {}", phase, pipeline_key, message));

        if let Some(script) = &hook.inline_script {
            let source = self.render(script, ctx)?;
            debug!(phase, bytes = source.len(), "Loading inline script");
            self.scripts
                .load_script(&source)
                .map_err(|e| hook_error(e.to_string()))?;
        }

        if let Some(name) = &hook.runnable {
            let name = self.render(name, ctx)?;
            let runnable = match self.registry.resolve(Some(pipeline_key), &name) {
                Some(Component::Runnable(runnable)) => runnable,
                Some(other) => {
                    return Err(EngineError::ComponentKind {
                        name,
                        expected: "runnable",
                        actual: other.kind(),
                    })
                }
                None => return Err(EngineError::ComponentNotFound(name)),
            };
            debug!(phase, runnable = %name, "Invoking runnable");
            runnable(ctx).map_err(|message| hook_error(format!("runnable '{}' failed: {}", name, message)))?;
        }

        if let Some(call) = &hook.script_instruction {
            debug!(phase, function = %call.function_name, "Invoking script function");
            self.scripts
                .invoke_function(&call.function_name, call.args.clone())
                .map_err(|e| hook_error(e.to_string()))?;
        }

        Ok(())
    }
}

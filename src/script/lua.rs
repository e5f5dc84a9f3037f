//! Lua-backed script invoker

use crate::script::{ScriptError, ScriptInvoker};
use mlua::{Lua, LuaOptions, LuaSerdeExt, StdLib, Variadic};
use serde_json::Value;
use std::sync::Mutex;

/// Script invoker running functions in a restricted Lua state
///
/// Only the table, string, math and coroutine libraries are available, and
/// `require`, `dofile` and `loadfile` are removed. All loaded scripts share
/// one global environment.
pub struct LuaScriptInvoker {
    lua: Mutex<Lua>,
}

impl LuaScriptInvoker {
    pub fn new() -> Result<Self, ScriptError> {
        let lua = unsafe {
            Lua::unsafe_new_with(
                StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE,
                LuaOptions::default(),
            )
        };

        {
            let globals = lua.globals();
            for name in ["require", "dofile", "loadfile"] {
                globals
                    .set(name, mlua::Nil)
                    .map_err(|e| ScriptError::Load(e.to_string()))?;
            }
        }

        Ok(Self {
            lua: Mutex::new(lua),
        })
    }
}

impl ScriptInvoker for LuaScriptInvoker {
    fn load_script(&self, source: &str) -> Result<(), ScriptError> {
        let lua = self.lua.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        lua.load(source)
            .exec()
            .map_err(|e| ScriptError::Load(e.to_string()))
    }

    fn invoke_function(&self, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        let lua = self.lua.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let invocation = |message: String| ScriptError::Invocation {
            function: name.to_string(),
            message,
        };

        let function = match lua.globals().get::<mlua::Value>(name) {
            Ok(mlua::Value::Function(function)) => function,
            _ => return Err(ScriptError::UnknownFunction(name.to_string())),
        };

        let lua_args = args
            .iter()
            .map(|arg| lua.to_value(arg))
            .collect::<mlua::Result<Variadic<mlua::Value>>>()
            .map_err(|e| invocation(e.to_string()))?;

        let result: mlua::Value = function
            .call(lua_args)
            .map_err(|e| invocation(e.to_string()))?;

        lua.from_value(result).map_err(|e| ScriptError::BadReturn {
            function: name.to_string(),
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for LuaScriptInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LuaScriptInvoker")
    }
}

//! Session scope
//!
//! A Lua table used as `_ENV` for every chunk the engine runs. Free names a
//! snippet assigns land here and stay for the life of the engine; reads fall
//! back to the Lua globals so the standard library remains reachable.

use crate::output::OUTPUT_BINDING;
use crate::Result;
use mlua::prelude::*;

/// The persistent namespace shared by every executed snippet
#[derive(Debug, Clone)]
pub struct SessionScope {
    table: LuaTable,
}

impl SessionScope {
    /// Create an empty scope whose lookups fall back to `lua.globals()`
    pub(crate) fn new(lua: &Lua) -> LuaResult<Self> {
        let fallback = lua.create_table()?;
        fallback.set("__index", lua.globals())?;

        let table = lua.create_table()?;
        table.set_metatable(Some(fallback))?;

        Ok(Self { table })
    }

    /// Bind a value without going through metamethods
    pub(crate) fn bind<T: IntoLua>(&self, name: &str, value: T) -> LuaResult<()> {
        self.table.raw_set(name, value)
    }

    /// Table handed to chunks as their environment
    pub(crate) fn table(&self) -> &LuaTable {
        &self.table
    }

    /// Read a binding, falling back to the globals
    pub fn get<T: FromLua>(&self, name: &str) -> Result<T> {
        Ok(self.table.get(name)?)
    }

    /// Create or overwrite a binding
    pub fn set<T: IntoLua>(&self, name: &str, value: T) -> Result<()> {
        self.table.raw_set(name, value)?;
        Ok(())
    }

    /// Whether the scope itself holds a non-nil binding for `name`
    pub fn contains(&self, name: &str) -> Result<bool> {
        let value: LuaValue = self.table.raw_get(name)?;
        Ok(!value.is_nil())
    }

    /// Sorted names of the string-keyed bindings made in this session
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for pair in self.table.pairs::<LuaValue, LuaValue>() {
            let (key, _) = pair?;
            if let LuaValue::String(s) = key {
                let name = s.to_string_lossy().to_string();
                if name != OUTPUT_BINDING {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

//! Output redirection
//!
//! Lua's own `print` and `io.write` go to the process stdout. The session
//! instead gets an [`OutputAdapter`] bound under [`OUTPUT_BINDING`], and the
//! [`BOOTSTRAP`] chunk rebinds the standard output functions to it.

use crate::ObservationChannel;
use mlua::prelude::*;
use tracing::trace;

/// Reserved scope name the adapter is bound under
pub const OUTPUT_BINDING: &str = "__stdout";

/// Chunk run once at construction to route script output through the adapter.
///
/// The standard functions are replaced in the globals, so they never show up
/// as session bindings. `print` keeps Lua's formatting (tab separated
/// `tostring` values and a trailing newline) but emits one write per call.
/// `io.output()` hands back the adapter while it is the default output, and
/// `os.exit` raises instead of ending the host process. `io` and `os` may be
/// absent when only the core libraries are opened.
pub const BOOTSTRAP: &str = r##"
local out = __stdout
local select, tostring, concat, error = select, tostring, table.concat, error

_G.print = function(...)
    local parts = {}
    for i = 1, select("#", ...) do
        parts[i] = tostring((select(i, ...)))
    end
    out:write(concat(parts, "\t"), "\n")
end

if io then
    local set_output = io.output
    local current = out

    io.output = function(file)
        if file == nil then
            return current
        end
        if file == out then
            current = out
        else
            current = set_output(file)
        end
        return current
    end
    io.write = function(...)
        return current:write(...)
    end
    io.stdout = out
end

if os then
    os.exit = function()
        error("os.exit is not available in a script session", 2)
    end
end
"##;

/// Receives everything a script writes and forwards it to the channel
#[derive(Debug, Clone)]
pub struct OutputAdapter {
    channel: ObservationChannel,
}

impl OutputAdapter {
    /// Create an adapter publishing on `channel`
    pub fn new(channel: ObservationChannel) -> Self {
        Self { channel }
    }

    /// Forward one piece of output. Never fails.
    pub fn accept(&self, text: &str) {
        trace!(len = text.len(), "Script output");
        self.channel.publish(text);
    }
}

impl LuaUserData for OutputAdapter {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        // file:write semantics: strings and numbers only, returns the receiver
        methods.add_function(
            "write",
            |lua, (this, args): (LuaAnyUserData, LuaMultiValue)| {
                let mut text = String::new();
                for (index, value) in args.into_iter().enumerate() {
                    let type_name = value.type_name();
                    match lua.coerce_string(value)? {
                        Some(s) => text.push_str(&s.to_string_lossy()),
                        None => {
                            return Err(LuaError::RuntimeError(format!(
                                "bad argument #{} to 'write' (string expected, got {})",
                                index + 1,
                                type_name
                            )))
                        }
                    }
                }

                this.borrow::<OutputAdapter>()?.accept(&text);
                Ok(this)
            },
        );

        // Nothing is buffered, so file housekeeping succeeds without effect
        for name in ["flush", "setvbuf", "close"] {
            methods.add_function(name, |_, (this, _): (LuaAnyUserData, LuaMultiValue)| {
                Ok(this)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn lua_with_adapter() -> (Lua, Arc<Mutex<Vec<String>>>) {
        let channel = ObservationChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        channel.subscribe(Arc::new(move |msg: &str| {
            seen_clone.lock().unwrap().push(msg.to_string())
        }));

        let lua = Lua::new();
        lua.globals()
            .set(OUTPUT_BINDING, OutputAdapter::new(channel))
            .unwrap();
        (lua, seen)
    }

    #[test]
    fn test_write_concatenates_arguments() {
        let (lua, seen) = lua_with_adapter();
        lua.load(r#"__stdout:write("n=", 42, " ", 1.5)"#).exec().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["n=42 1.5"]);
    }

    #[test]
    fn test_write_chains() {
        let (lua, seen) = lua_with_adapter();
        lua.load(r#"__stdout:write("a"):write("b")"#).exec().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_write_rejects_tables() {
        let (lua, seen) = lua_with_adapter();
        let err = lua.load(r#"__stdout:write("x", {})"#).exec().unwrap_err();

        assert!(crate::describe_failure(&err).contains("bad argument #2 to 'write'"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bootstrap_rebinds_print() {
        let (lua, seen) = lua_with_adapter();
        lua.load(BOOTSTRAP).exec().unwrap();
        lua.load(r#"print("a", 1, nil, true) io.write("b") io.stdout:write("c")"#)
            .exec()
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a\t1\tnil\ttrue\n", "b", "c"]);
    }

    #[test]
    fn test_bootstrap_is_complete_lua() {
        let lua = Lua::new();
        lua.load(BOOTSTRAP).into_function().unwrap();

        assert!(BOOTSTRAP.trim_start().starts_with("local out = __stdout"));
        assert!(BOOTSTRAP.trim_end().ends_with("end"));
    }

    #[test]
    fn test_default_output_handle_is_the_adapter() {
        let (lua, seen) = lua_with_adapter();
        lua.load(BOOTSTRAP).exec().unwrap();
        lua.load(
            r#"
            io.output():write("a")
            assert(io.output() == io.stdout)
            io.output(io.stdout):write("b")
            io.write("c")
        "#,
        )
        .exec()
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_default_output_can_switch_to_file_and_back() {
        let (lua, seen) = lua_with_adapter();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        lua.globals()
            .set("path", path.to_string_lossy().to_string())
            .unwrap();

        lua.load(BOOTSTRAP).exec().unwrap();
        lua.load(
            r#"
            io.output(path)
            io.write("to file")
            io.output():close()
            io.output(io.stdout)
            io.write("to host")
        "#,
        )
        .exec()
        .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "to file");
        assert_eq!(*seen.lock().unwrap(), vec!["to host"]);
    }

    #[test]
    fn test_file_housekeeping_methods_are_accepted() {
        let (lua, seen) = lua_with_adapter();
        lua.load(BOOTSTRAP).exec().unwrap();
        lua.load(
            r#"
            io.stdout:write("a")
            io.stdout:flush()
            io.stdout:setvbuf("no")
            io.stdout:close()
            io.stdout:setvbuf("full", 1024):flush():write("b")
        "#,
        )
        .exec()
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_os_exit_raises() {
        let (lua, seen) = lua_with_adapter();
        lua.load(BOOTSTRAP).exec().unwrap();
        let err = lua.load("os.exit(3)").exec().unwrap_err();

        assert!(crate::describe_failure(&err).contains("os.exit is not available"));
        assert!(seen.lock().unwrap().is_empty());
    }
}

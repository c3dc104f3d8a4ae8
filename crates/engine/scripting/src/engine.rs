//! Script engine
//!
//! Owns one Lua state and the single [`SessionScope`] every snippet runs in.
//! Construction redirects script output to the host before any snippet can
//! run; after that the engine only ever reports through its
//! [`ObservationChannel`].

use crate::channel::Listener;
use crate::output::{OutputAdapter, BOOTSTRAP, OUTPUT_BINDING};
use crate::{EngineConfig, Error, ObservationChannel, Result, SessionScope};
use mlua::prelude::*;
use mlua::LuaOptions;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Chunk name reported for the redirection bootstrap
const BOOTSTRAP_CHUNK: &str = "bootstrap";

/// Persistent Lua session with host-routed output
pub struct ScriptEngine {
    lua: Lua,
    scope: SessionScope,
    channel: ObservationChannel,
    chunk_name: String,
    output_redirected: bool,
}

impl ScriptEngine {
    /// Create an engine whose output goes to `sink`.
    ///
    /// Pass `|_| {}` to discard output. Fails only if the Lua state or the
    /// session scope cannot be created.
    pub fn new<F>(sink: F) -> Result<Self>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self::with_config(sink, EngineConfig::default())
    }

    /// Create an engine with explicit settings
    pub fn with_config<F>(sink: F, config: EngineConfig) -> Result<Self>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self::build(Arc::new(sink), config, BOOTSTRAP)
    }

    fn build(sink: Listener, config: EngineConfig, bootstrap: &str) -> Result<Self> {
        debug!(
            libraries = ?config.libraries,
            memory_limit = ?config.memory_limit,
            "Creating script engine"
        );

        let lua = Lua::new_with(config.libraries.std_lib(), LuaOptions::default())
            .map_err(Error::EngineInit)?;
        if let Some(limit) = config.memory_limit {
            lua.set_memory_limit(limit).map_err(Error::EngineInit)?;
        }

        let channel = ObservationChannel::new();
        channel.subscribe(sink);

        let scope = SessionScope::new(&lua).map_err(Error::Scope)?;
        scope
            .bind(OUTPUT_BINDING, OutputAdapter::new(channel.clone()))
            .map_err(Error::Scope)?;

        let mut engine = Self {
            lua,
            scope,
            channel,
            chunk_name: config.chunk_name,
            output_redirected: false,
        };

        // Failures here stay off the channel: the host has had no chance to
        // observe yet, and the sink may be the very thing that is broken.
        match engine.run(bootstrap, BOOTSTRAP_CHUNK) {
            Ok(()) => engine.output_redirected = true,
            Err(message) => {
                error!(
                    error = %message,
                    "Output redirection bootstrap failed; script output may be lost"
                );
            }
        }

        debug!(redirected = engine.output_redirected, "Script engine ready");
        Ok(engine)
    }

    /// Run a snippet in the session scope.
    ///
    /// Never fails: parse and runtime errors become a single message on the
    /// observation channel. Bindings made before an error are kept.
    pub fn execute(&self, source: &str) {
        if let Err(message) = self.run(source, &self.chunk_name) {
            debug!(error = %message, "Snippet failed");
            self.channel.publish(&message);
        }
    }

    /// Register a listener for output and error messages
    pub fn observe<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.channel.subscribe(Arc::new(listener));
    }

    /// Handle to the observation channel
    pub fn channel(&self) -> ObservationChannel {
        self.channel.clone()
    }

    /// The session scope
    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    /// Whether the bootstrap rebound script output to the host
    pub fn is_output_redirected(&self) -> bool {
        self.output_redirected
    }

    /// Get the underlying Lua state
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    fn run(&self, source: &str, chunk_name: &str) -> std::result::Result<(), String> {
        let chunk = self
            .lua
            .load(source)
            .set_name(format!("={}", chunk_name))
            .set_environment(self.scope.table().clone());

        // A host function bound into the scope may panic; that must not
        // unwind into the caller either.
        match catch_unwind(AssertUnwindSafe(|| chunk.exec())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(describe_failure(&err)),
            Err(payload) => Err(format!("host function panicked: {}", panic_message(&*payload))),
        }
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("chunk_name", &self.chunk_name)
            .field("output_redirected", &self.output_redirected)
            .field("channel", &self.channel)
            .finish()
    }
}

/// Human-readable description of a Lua failure, without the stack traceback
pub fn describe_failure(err: &LuaError) -> String {
    let text = match err {
        LuaError::SyntaxError { message, .. } => message.clone(),
        LuaError::RuntimeError(message) => message.clone(),
        LuaError::MemoryError(message) => format!("out of memory: {}", message),
        LuaError::CallbackError { cause, .. } => return describe_failure(cause),
        other => other.to_string(),
    };

    match text.split_once("\nstack traceback:") {
        Some((head, _)) => head.trim_end().to_string(),
        None => text,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Libraries;
    use std::sync::Mutex;

    fn recording_engine(config: EngineConfig) -> (ScriptEngine, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let engine = ScriptEngine::with_config(
            move |msg| seen_clone.lock().unwrap().push(msg.to_string()),
            config,
        )
        .unwrap();
        (engine, seen)
    }

    #[test]
    fn test_engine_basic() {
        let (engine, seen) = recording_engine(EngineConfig::default());
        assert!(engine.is_output_redirected());

        engine.execute("x = 42");
        assert_eq!(engine.scope().get::<i64>("x").unwrap(), 42);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bootstrap_failure_is_not_fatal() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let engine = ScriptEngine::build(
            Arc::new(move |msg: &str| seen_clone.lock().unwrap().push(msg.to_string())),
            EngineConfig::default(),
            "error('cannot redirect')",
        )
        .unwrap();

        assert!(!engine.is_output_redirected());
        assert!(seen.lock().unwrap().is_empty());

        engine.execute("y = 1");
        assert_eq!(engine.scope().get::<i64>("y").unwrap(), 1);
    }

    #[test]
    fn test_bootstrap_output_reaches_sink_only() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let sink_clone = sink.clone();
        let engine = ScriptEngine::build(
            Arc::new(move |msg: &str| sink_clone.lock().unwrap().push(msg.to_string())),
            EngineConfig::default(),
            &format!("{}\nprint('ready')", BOOTSTRAP),
        )
        .unwrap();
        assert!(engine.is_output_redirected());

        let observer = Arc::new(Mutex::new(Vec::new()));
        let observer_clone = observer.clone();
        engine.observe(move |msg| observer_clone.lock().unwrap().push(msg.to_string()));

        engine.execute("print('later')");

        assert_eq!(*sink.lock().unwrap(), vec!["ready\n", "later\n"]);
        assert_eq!(*observer.lock().unwrap(), vec!["later\n"]);
    }

    #[test]
    fn test_core_libraries_still_redirect() {
        let config = EngineConfig {
            libraries: Libraries::Core,
            ..Default::default()
        };
        let (engine, seen) = recording_engine(config);
        assert!(engine.is_output_redirected());

        engine.execute("print(io == nil, os == nil)");
        assert_eq!(*seen.lock().unwrap(), vec!["true\ttrue\n"]);
    }

    #[test]
    fn test_chunk_name_in_errors() {
        let config = EngineConfig {
            chunk_name: "console".to_string(),
            ..Default::default()
        };
        let (engine, seen) = recording_engine(config);

        engine.execute("error('boom')");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("console:1:"), "got {:?}", seen[0]);
        assert!(seen[0].contains("boom"));
        assert!(!seen[0].contains("stack traceback"));
    }

    #[test]
    fn test_host_function_panic_is_contained() {
        let (engine, seen) = recording_engine(EngineConfig::default());
        let explode = engine
            .lua()
            .create_function(|_, ()| -> LuaResult<()> { panic!("host bug") })
            .unwrap();
        engine.scope().set("explode", explode).unwrap();

        engine.execute("before = 1 explode()");
        engine.execute("print(before)");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("host bug"));
        assert_eq!(seen[1], "1\n");
    }

    #[test]
    fn test_describe_failure_unwraps_callback_errors() {
        let (engine, seen) = recording_engine(EngineConfig::default());
        let refuse = engine
            .lua()
            .create_function(|_, ()| -> LuaResult<()> {
                Err(LuaError::RuntimeError("inner cause".to_string()))
            })
            .unwrap();
        engine.scope().set("refuse", refuse).unwrap();

        engine.execute("refuse()");
        assert_eq!(*seen.lock().unwrap(), vec!["inner cause"]);
    }
}

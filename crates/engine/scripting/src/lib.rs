//! Embeddable Lua session core
//!
//! This crate provides:
//! - **ScriptEngine**: one Lua state with a single persistent session scope
//! - **ObservationChannel**: the only path script output and errors take to the host
//! - **OutputAdapter**: the object Lua's `print`/`io.write` are rebound to
//! - **EngineConfig**: construction settings, optionally read from KDL
//!
//! # Example
//!
//! ```rust,ignore
//! use script_host::ScriptEngine;
//!
//! let engine = ScriptEngine::new(|text| console.append(text))?;
//! engine.observe(|text| log_file.write(text));
//!
//! engine.execute("x = 1");
//! engine.execute("print(x + 1)"); // both listeners receive "2\n"
//! engine.execute("x = = 1");      // both receive the syntax error
//! ```

mod channel;
mod config;
mod engine;
mod error;
mod output;
mod scope;

pub use channel::{Listener, ObservationChannel};
pub use config::{EngineConfig, Libraries, DEFAULT_CHUNK_NAME};
pub use engine::{describe_failure, ScriptEngine};
pub use error::{Error, Result};
pub use output::{OutputAdapter, BOOTSTRAP, OUTPUT_BINDING};
pub use scope::SessionScope;

// Re-export mlua for downstream crates
pub use mlua;

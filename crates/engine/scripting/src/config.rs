//! Engine configuration
//!
//! Settings can be built in code or read from a KDL document. Only the
//! `engine` node is consulted; anything else in the document is left for the
//! host.
//!
//! # Example
//!
//! ```kdl
//! engine {
//!     libraries "core"
//!     memory-limit 16777216
//!     chunk-name "console"
//! }
//! ```
//!
//! Unknown children of `engine` are ignored. A document without an `engine`
//! node yields the defaults.

use crate::{Error, Result};
use mlua::StdLib;
use std::path::Path;

/// Chunk name used for host snippets when none is configured
pub const DEFAULT_CHUNK_NAME: &str = "snippet";

/// Which Lua standard libraries are opened in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Libraries {
    /// Every memory-safe library, including `io`, `os` and `package`
    #[default]
    Safe,
    /// Pure-computation libraries only: no `io`, `os` or `package`
    Core,
}

impl Libraries {
    /// Library set handed to the Lua state on creation
    pub fn std_lib(self) -> StdLib {
        match self {
            Libraries::Safe => StdLib::ALL_SAFE,
            Libraries::Core => {
                StdLib::COROUTINE | StdLib::TABLE | StdLib::STRING | StdLib::UTF8 | StdLib::MATH
            }
        }
    }

    fn from_name(name: &str) -> Result<Self> {
        match name {
            "safe" => Ok(Libraries::Safe),
            "core" => Ok(Libraries::Core),
            other => Err(Error::InvalidConfig(format!(
                "unknown library set '{}', expected \"safe\" or \"core\"",
                other
            ))),
        }
    }
}

/// Settings applied once, when the engine is constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Libraries opened in the Lua state
    pub libraries: Libraries,
    /// Upper bound on Lua heap usage in bytes
    pub memory_limit: Option<usize>,
    /// Name reported in error locations for host snippets
    pub chunk_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            libraries: Libraries::default(),
            memory_limit: None,
            chunk_name: DEFAULT_CHUNK_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    /// Read a KDL config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_kdl_str(&content)
    }

    /// Parse config from KDL text
    pub fn from_kdl_str(content: &str) -> Result<Self> {
        let doc: kdl::KdlDocument = content.parse()?;
        let mut config = Self::default();

        let Some(engine) = doc.nodes().iter().find(|n| n.name().value() == "engine") else {
            return Ok(config);
        };
        let Some(children) = engine.children() else {
            return Ok(config);
        };

        for node in children.nodes() {
            let key = node.name().value();
            let Some(value) = first_arg(node) else {
                return Err(Error::InvalidConfig(format!("'{}' needs a value", key)));
            };

            match key {
                "libraries" => {
                    config.libraries = Libraries::from_name(expect_string(key, value)?)?;
                }
                "memory-limit" => {
                    let bytes = expect_integer(key, value)?;
                    let bytes = usize::try_from(bytes).map_err(|_| {
                        Error::InvalidConfig(format!("'{}' out of range: {}", key, bytes))
                    })?;
                    config.memory_limit = (bytes > 0).then_some(bytes);
                }
                "chunk-name" => {
                    let name = expect_string(key, value)?;
                    if name.is_empty() {
                        return Err(Error::InvalidConfig("'chunk-name' is empty".to_string()));
                    }
                    config.chunk_name = name.to_string();
                }
                _ => {}
            }
        }

        Ok(config)
    }
}

/// First positional argument of a node
fn first_arg(node: &kdl::KdlNode) -> Option<&kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn expect_string<'a>(key: &str, value: &'a kdl::KdlValue) -> Result<&'a str> {
    match value {
        kdl::KdlValue::String(s) => Ok(s.as_str()),
        other => Err(type_mismatch(key, "string", other)),
    }
}

fn expect_integer(key: &str, value: &kdl::KdlValue) -> Result<i128> {
    match value {
        kdl::KdlValue::Integer(i) => Ok(*i),
        other => Err(type_mismatch(key, "integer", other)),
    }
}

fn type_mismatch(key: &str, expected: &str, actual: &kdl::KdlValue) -> Error {
    let actual = match actual {
        kdl::KdlValue::String(_) => "string",
        kdl::KdlValue::Integer(_) => "integer",
        kdl::KdlValue::Float(_) => "float",
        kdl::KdlValue::Bool(_) => "bool",
        kdl::KdlValue::Null => "null",
    };
    Error::InvalidConfig(format!("'{}' expects {}, got {}", key, expected, actual))
}

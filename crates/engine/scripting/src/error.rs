//! Error types for the script host

use thiserror::Error;

/// Result type for script host operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the host.
///
/// Script failures are never reported through this type; they are published
/// on the observation channel instead.
#[derive(Error, Debug)]
pub enum Error {
    /// The Lua state could not be created or configured
    #[error("Failed to start script engine: {0}")]
    EngineInit(#[source] mlua::Error),

    /// The session scope or the output adapter binding could not be created
    #[error("Failed to create session scope: {0}")]
    Scope(#[source] mlua::Error),

    /// Lua error from a scope accessor
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    /// KDL parsing error
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config value with the wrong type or an unknown setting
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

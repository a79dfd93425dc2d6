//
// error.rs
//
// Error types for the engine and the code-intelligence client
//

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures that abort a whole expansion. Anything scoped to a single
/// identifier is logged and degraded to an unresolved entry instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid project configuration at {path}: {reason}")]
    Configuration { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl EngineError {
    pub fn configuration(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EngineError::Configuration {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to spawn code-intelligence server `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request `{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("connection to the code-intelligence server is closed")]
    ConnectionClosed,

    /// Error response from the server; an unopened document surfaces here
    #[error("server returned error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("client is not ready (state: {0})")]
    NotReady(&'static str),
}

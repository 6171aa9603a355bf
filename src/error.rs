//! Error types for the interpreter boundary and the execution engine.

use std::time::Duration;

/// Failures reported by a [`crate::sandbox::Sandbox`].
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The interpreter could not be started.
    #[error("Failed to start interpreter: {0}")]
    Init(String),

    /// Required packages could not be resolved or installed.
    #[error("Failed to load packages: {0}")]
    PackageLoad(String),

    /// The snippet raised. Displays as the exception message alone.
    #[error("{0}")]
    Runtime(String),

    /// The interpreter replied with something the driver protocol does not allow.
    #[error("Interpreter protocol error: {0}")]
    Protocol(String),

    #[error("Interpreter I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// A run is already in flight for this artifact.
    #[error("Code is already executing")]
    Busy,

    #[error("Execution timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

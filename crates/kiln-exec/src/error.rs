//! Error types for execution environments.

use std::io;
use thiserror::Error;

/// Result type for execution operations.
pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// Errors raised before or while launching a process.
///
/// A process that started and exited non-zero is not an error here; it is
/// reported through [`crate::ExecOutput::success`].
#[derive(Debug, Error)]
pub enum ExecError {
    /// The container runtime binary could not be started.
    #[error("container runtime '{runtime}' not found: {reason}")]
    RuntimeNotFound { runtime: String, reason: String },

    /// The invocation could not be spawned.
    #[error("failed to launch '{program}': {reason}")]
    Launch { program: String, reason: String },

    /// The process pipes were not available after spawning.
    #[error("process output unavailable: {0}")]
    Pipe(String),

    /// I/O error while reading process output.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

//! Error types for store access and command execution.
//!
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for harness infrastructure operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors raised by the collaborators the resolver talks to.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Failed to spawn a command.
    #[error("Failed to execute command '{command}': {source}")]
    CommandExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Command returned non-zero exit code.
    #[error("Command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Redis/database operation failed.
    #[error("Database operation failed: {operation}: {message}")]
    Database {
        /// The operation that failed (e.g., "hget", "hgetall", "keys").
        operation: String,
        /// Error message.
        message: String,
    },

    /// A store answered with something that cannot be interpreted.
    #[error("Invalid data from {source_name}: {message}")]
    InvalidData {
        /// Where the data came from.
        source_name: String,
        /// Error message.
        message: String,
    },

    /// A unit of work in the worker pool panicked or was cancelled.
    #[error("Worker task failed: {message}")]
    Worker {
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl HarnessError {
    /// Creates a database error.
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid data error.
    pub fn invalid_data(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidData {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Creates a worker error.
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    ///
    /// Nothing in the resolver retries on its own; callers use this to
    /// decide whether to rerun a scenario.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarnessError::Database { .. } | HarnessError::CommandFailed { .. }
        )
    }
}

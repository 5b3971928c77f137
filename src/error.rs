//! Error handling module for pgreconcile
//!
//! Provides centralized error handling with proper error types using thiserror.
//! The taxonomy mirrors how a run can go wrong: the declared intent is invalid,
//! the host state cannot be determined, or an operation on the host failed.

use thiserror::Error;

/// Main error type for pgreconcile
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Invalid server configuration (bad field value, unsupported platform)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A probe could not determine host state. Never treated as "false".
    #[error("Probe '{probe}' failed: {reason}")]
    Probe { probe: String, reason: String },

    /// An OS-level operation (package manager, systemctl, initdb, psql) failed
    #[error("{context} failed (exit code {}): {}", format_exit_code(.exit_code), .output.trim())]
    Execution {
        context: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// Another run holds the run lock
    #[error("Run lock error: {0}")]
    Lock(String),

    /// Phase state machine misuse
    #[error("Phase transition error: {0}")]
    PhaseTransition(#[from] crate::state::PhaseTransitionError),

    /// IO errors (file operations, process spawning)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

/// Result type alias for pgreconcile operations
pub type Result<T> = std::result::Result<T, ReconcileError>;

// Convenient error constructors
impl ReconcileError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a probe error
    pub fn probe(probe: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Probe {
            probe: probe.into(),
            reason: reason.into(),
        }
    }

    /// Create an execution error from a failed command
    pub fn execution(context: impl Into<String>, exit_code: Option<i32>, output: impl Into<String>) -> Self {
        Self::Execution {
            context: context.into(),
            exit_code,
            output: output.into(),
        }
    }

    /// Create a lock error
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    /// Returns true if this error came from a probe
    pub fn is_probe(&self) -> bool {
        matches!(self, Self::Probe { .. })
    }

    /// Captured command output, if the error carries any
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::Execution { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}

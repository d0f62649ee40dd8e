//! Error types for the Skiff orchestrator

use std::time::Duration;

use thiserror::Error;

use crate::remote::TransportError;

/// Main error type for bootstrap operations
///
/// Every variant except the labeling/reporting warnings (which are not
/// errors and never reach this type) is fatal: the orchestrator aborts
/// the run at the point of detection without rollback.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A required local tool is absent (pre-flight only)
    #[error("prerequisite not found: {tool} - {hint}")]
    Prerequisite {
        /// The tool that was not found
        tool: String,
        /// Hint for how to install it
        hint: String,
    },

    /// Host unreachable or authentication rejected
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An installer command exited non-zero
    #[error("install failed during {step}: {message}")]
    Install {
        /// The bootstrap step that failed
        step: String,
        /// Error detail, usually the command's stderr
        message: String,
    },

    /// A readiness poll exhausted its retry ceiling
    #[error("{what} did not converge after {attempts} attempts ({waited:?} elapsed)")]
    Convergence {
        /// The condition being awaited
        what: String,
        /// Number of attempts made
        attempts: u32,
        /// Total wall-clock time spent polling
        waited: Duration,
    },

    /// No local interface can reach the target host
    #[error("no route to {0}: cannot determine an advertise address")]
    NoRoute(String),

    /// Invalid run configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a prerequisite error for a missing tool
    pub fn prerequisite(tool: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Prerequisite {
            tool: tool.into(),
            hint: hint.into(),
        }
    }

    /// Create an install error for the given step
    pub fn install(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Install {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

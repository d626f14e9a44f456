//! Typed error hierarchy for the improvement engine.
//!
//! `EngineError` is returned by every session, job and stats operation.
//! Collaborators (detectors, generators, reviewers, executors) report
//! failures as `anyhow::Error`; the engine wraps those into
//! [`EngineError::PhaseExecution`] tagged with the phase that raised them.

use thiserror::Error;

/// Errors surfaced by the session manager, job store and stats aggregator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Session {running_session} is already running in scope '{scope}'")]
    Conflict {
        scope: String,
        running_session: String,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Cannot {operation} {kind} {id} while it is {status}")]
    InvalidState {
        kind: &'static str,
        id: String,
        status: String,
        operation: &'static str,
    },

    #[error("Phase {phase} failed: {message}")]
    PhaseExecution { phase: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Registry lock poisoned")]
    LockPoisoned,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Session",
            id: id.into(),
        }
    }

    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Job",
            id: id.into(),
        }
    }

    pub fn phase(phase: impl ToString, err: impl std::fmt::Display) -> Self {
        Self::PhaseExecution {
            phase: phase.to_string(),
            message: err.to_string(),
        }
    }

    /// Stable snake_case name used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::PhaseExecution { .. } => "phase_execution",
            Self::Storage(_) => "storage",
            Self::LockPoisoned => "lock_poisoned",
            Self::Config(_) => "config",
            Self::Other(_) => "internal",
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

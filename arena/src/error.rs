//! Error taxonomy for the debate engine.
//!
//! | Error               | Raised by            | Effect on the run               |
//! |---------------------|----------------------|---------------------------------|
//! | GenerationFailure   | model client         | recorded as a failed turn       |
//! | RunNotAdvanceable   | advance / cancel     | none, reported to the caller    |
//! | TemplateInvalid     | template creation    | template rejected, no run       |
//! | RunFailed           | state machine        | run moves to `failed`           |
//!
//! Per-participant generation failures never surface as an `ArenaError`
//! from `advance`; the phase executor absorbs them into the transcript.

use thiserror::Error;

use crate::run::{RunStatus, TransitionError};

/// A single outbound generation call did not produce text.
///
/// Transport errors, timeouts, non-2xx statuses and malformed bodies all
/// collapse into this one type so callers never branch on the cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("generation failed: {reason}")]
pub struct GenerationFailure {
    pub reason: String,
}

impl GenerationFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The call exceeded its time bound.
    pub fn timeout(after_ms: u64) -> Self {
        Self::new(format!("timed out after {}ms", after_ms))
    }
}

/// Unified error type for engine and store operations.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// `advance` or `cancel` called out of turn. State is left unchanged.
    #[error("run {run_id} is not advanceable (status {status}): {reason}")]
    RunNotAdvanceable {
        run_id: String,
        status: RunStatus,
        reason: String,
    },

    #[error("invalid template: {0}")]
    TemplateInvalid(String),

    /// The run reached `failed`; the reason is also stored on the run.
    #[error("run {run_id} failed: {reason}")]
    RunFailed { run_id: String, reason: String },

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("timed out waiting for run {run_id} after {waited_ms}ms")]
    WaitTimeout { run_id: String, waited_ms: u64 },

    #[error("lock poisoned")]
    LockPoisoned,
}

impl ArenaError {
    pub fn not_advanceable(
        run_id: impl Into<String>,
        status: RunStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::RunNotAdvanceable {
            run_id: run_id.into(),
            status,
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type ArenaResult<T> = Result<T, ArenaError>;

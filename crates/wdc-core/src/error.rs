//! Error types for WDC Core
//!
//! Provides error handling for:
//! - Deployment plan and configuration problems
//! - Unrecoverable worker faults
//! - Task decoding at the worker boundary
//! - Illegal coordinator state transitions
//!
//! Soft failures (a failed deploy, an invalid validation) are not errors:
//! they travel as data inside [`DeployResult`](crate::types::DeployResult)
//! and [`Validation`](crate::types::Validation).

use crate::state_machine::CoordinatorState;
use crate::types::{WaveNumber, WaveState, WorkerId};

/// Main coordinator error type
///
/// Returned from [`WaveCoordinator::run`](crate::coordinator::WaveCoordinator::run)
/// only when the run cannot start or the coordinator itself misbehaves.
/// Worker faults end up in the report instead.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// No waves were supplied
    #[error("deployment has no waves")]
    NoWaves,

    /// Two waves share a number
    #[error("duplicate wave number {0}")]
    DuplicateWave(WaveNumber),

    /// A wave was constructed without workers
    #[error("wave {0} has no workers")]
    EmptyWave(WaveNumber),

    /// Two workers in one wave share an id
    #[error("duplicate worker {worker_id} in wave {wave}")]
    DuplicateWorker {
        /// Wave containing the duplicate
        wave: WaveNumber,
        /// Offending worker id
        worker_id: WorkerId,
    },

    /// Wave numbers must be >= 1
    #[error("invalid wave number: {0}")]
    InvalidWaveNumber(u32),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State machine violation
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    /// A wave was asked to run after it settled
    #[error("wave {wave} already settled as {state}")]
    WaveSettled {
        /// Wave number
        wave: WaveNumber,
        /// Terminal state it settled in
        state: WaveState,
    },
}

impl CoordinatorError {
    /// Check if error was caused by the caller's input rather than the run
    #[inline]
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::NoWaves
                | Self::DuplicateWave(_)
                | Self::EmptyWave(_)
                | Self::DuplicateWorker { .. }
                | Self::InvalidWaveNumber(_)
                | Self::Config(_)
        )
    }
}

/// Unrecoverable worker fault
///
/// Distinct from a failed deploy: a fault aborts the enclosing wave and the
/// whole run, and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum WorkerFault {
    /// The task could not be decoded at all
    #[error("worker {worker_id}: undecodable task: {detail}")]
    UndecodableTask {
        /// Worker that received the task
        worker_id: WorkerId,
        /// Decoder message
        detail: String,
    },

    /// The worker hit an internal error it cannot report as a soft failure
    #[error("worker {worker_id}: {detail}")]
    Internal {
        /// Faulting worker
        worker_id: WorkerId,
        /// Fault description
        detail: String,
    },

    /// The worker task panicked or was torn down
    #[error("worker {worker_id} crashed: {detail}")]
    Crashed {
        /// Crashed worker
        worker_id: WorkerId,
        /// Join error description
        detail: String,
    },
}

impl WorkerFault {
    /// Worker the fault belongs to
    #[inline]
    #[must_use]
    pub fn worker_id(&self) -> &WorkerId {
        match self {
            Self::UndecodableTask { worker_id, .. }
            | Self::Internal { worker_id, .. }
            | Self::Crashed { worker_id, .. } => worker_id,
        }
    }

    /// Human-readable fault detail without the worker prefix
    #[inline]
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::UndecodableTask { detail, .. }
            | Self::Internal { detail, .. }
            | Self::Crashed { detail, .. } => detail,
        }
    }
}

/// Task decoding errors at the worker boundary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Task is not a JSON object
    #[error("task must be an object, got {0}")]
    NotAnObject(&'static str),

    /// A field is missing or has the wrong type
    #[error("malformed task: {0}")]
    Malformed(String),

    /// A required string field is empty
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),
}

impl TaskError {
    /// Whether the error means the task could not be decoded at all
    #[inline]
    #[must_use]
    pub fn is_undecodable(&self) -> bool {
        matches!(self, Self::NotAnObject(_))
    }
}

/// Configuration and plan loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Threshold outside [0, 1]
    #[error("threshold must be within [0.0, 1.0], got {0}")]
    InvalidThreshold(f64),

    /// Concurrency limit of zero
    #[error("max_concurrent_workers must be at least 1")]
    ZeroConcurrency,

    /// Zero-second deploy timeout
    #[error("deploy_timeout_secs must be at least 1")]
    ZeroTimeout,

    /// Plan file extension not recognised
    #[error("unsupported plan format: {0}")]
    UnsupportedFormat(String),

    /// Plan file could not be read
    #[error("failed to read plan: {0}")]
    Io(#[from] std::io::Error),

    /// Plan file could not be parsed
    #[error("failed to parse plan: {0}")]
    Parse(String),
}

/// State machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not permitted from the current state
    #[error("illegal transition {current} -> {requested}")]
    IllegalTransition {
        /// Current state
        current: CoordinatorState,
        /// Requested state
        requested: CoordinatorState,
    },
}

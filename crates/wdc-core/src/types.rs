//! Core types for WDC
//!
//! Defines the fundamental data model of a wave rollout:
//! - Identifiers (runs, workers, waves)
//! - Worker and wave lifecycle states
//! - Deploy results and validation outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use ulid::Ulid;

/// Opaque task description handed to a worker's `deploy`
pub type Task = Value;

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker identifier, unique within a wave
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Create worker ID
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wave number (>= 1); defines execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct WaveNumber(u32);

impl WaveNumber {
    /// Create wave number
    ///
    /// # Errors
    /// Returns `InvalidWaveNumber` for 0
    pub fn new(number: u32) -> Result<Self, InvalidWaveNumber> {
        if number == 0 {
            Err(InvalidWaveNumber(number))
        } else {
            Ok(Self(number))
        }
    }

    /// Wave 1
    #[inline]
    #[must_use]
    pub const fn first() -> Self {
        Self(1)
    }

    /// Numeric value
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for WaveNumber {
    type Error = InvalidWaveNumber;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WaveNumber> for u32 {
    fn from(value: WaveNumber) -> Self {
        value.0
    }
}

impl fmt::Display for WaveNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejected wave number
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wave numbers start at 1, got {0}")]
pub struct InvalidWaveNumber(pub u32);

impl From<InvalidWaveNumber> for crate::error::CoordinatorError {
    fn from(value: InvalidWaveNumber) -> Self {
        Self::InvalidWaveNumber(value.0)
    }
}

/// Worker lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerStatus {
    /// Not yet deployed (or awaiting re-deploy)
    #[default]
    Pending,
    /// Deploy finished, validation outstanding
    Deployed,
    /// Deployed and validated
    Validated,
    /// Deploy failed or validation rejected it
    Failed,
}

impl WorkerStatus {
    /// Get status name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deployed => "deployed",
            Self::Validated => "validated",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deploy outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployStatus {
    /// Deployment action completed
    Deployed,
    /// Deployment action failed (soft failure)
    Failed,
}

/// Result of one worker deployment
///
/// Immutable once produced. A retry produces a new result; it never edits
/// the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployResult {
    /// Worker that produced the result
    pub worker_id: WorkerId,
    /// Wave the worker belongs to
    pub wave_number: WaveNumber,
    /// Deploy status
    pub status: DeployStatus,
    /// Opaque result data
    pub payload: Value,
    /// When the result was produced
    pub timestamp: DateTime<Utc>,
}

impl DeployResult {
    /// Successful deploy result
    #[inline]
    #[must_use]
    pub fn deployed(worker_id: WorkerId, wave_number: WaveNumber, payload: Value) -> Self {
        Self {
            worker_id,
            wave_number,
            status: DeployStatus::Deployed,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Failed deploy result
    #[inline]
    #[must_use]
    pub fn failed(worker_id: WorkerId, wave_number: WaveNumber, payload: Value) -> Self {
        Self {
            worker_id,
            wave_number,
            status: DeployStatus::Failed,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Check if deploy failed
    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == DeployStatus::Failed
    }
}

/// Outcome of a worker's post-deploy checks
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Validation {
    /// Whether every check passed
    pub valid: bool,
    /// Names of the checks that ran, in execution order
    pub checks: Vec<String>,
    /// Names of the checks that did not pass
    pub failed: Vec<String>,
}

impl Validation {
    /// Build from `(check name, passed)` pairs
    #[must_use]
    pub fn from_checks<I, S>(results: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        let mut checks = Vec::new();
        let mut failed = Vec::new();
        for (name, passed) in results {
            let name = name.into();
            if !passed {
                failed.push(name.clone());
            }
            checks.push(name);
        }
        Self {
            valid: failed.is_empty(),
            checks,
            failed,
        }
    }

    /// Validation that rejects with a single failed check
    #[inline]
    #[must_use]
    pub fn rejected(check: impl Into<String>) -> Self {
        Self::from_checks([(check.into(), false)])
    }
}

/// Wave lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaveState {
    /// Not yet started
    #[default]
    Pending,
    /// Workers in flight
    Running,
    /// Cleared the threshold; next wave may start
    Advanced,
    /// Below threshold with retries remaining
    Held,
    /// Retries exhausted, faulted or cancelled
    Aborted,
}

impl WaveState {
    /// Get state name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Advanced => "advanced",
            Self::Held => "held",
            Self::Aborted => "aborted",
        }
    }

    /// Whether the wave can no longer run
    #[inline]
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Advanced | Self::Aborted)
    }
}

impl fmt::Display for WaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run was aborted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum AbortReason {
    /// A worker raised an unrecoverable fault
    WorkerFault {
        /// Wave the worker belonged to
        wave: WaveNumber,
        /// The fault
        fault: crate::error::WorkerFault,
    },
    /// The wave stayed below threshold after its last retry
    RetriesExhausted {
        /// Exhausted wave
        wave: WaveNumber,
        /// Attempts made
        attempts: u32,
        /// Confidence of the final attempt
        confidence: f64,
    },
    /// External cancellation
    Cancelled {
        /// Wave in flight when cancellation was observed, if any
        wave: Option<WaveNumber>,
    },
}

impl AbortReason {
    /// Stable reason code
    #[inline]
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkerFault { .. } => "worker-fault",
            Self::RetriesExhausted { .. } => "retries-exhausted",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether the abort came from cancellation rather than a failure
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerFault { wave, fault } => write!(f, "wave {wave}: {fault}"),
            Self::RetriesExhausted {
                wave,
                attempts,
                confidence,
            } => write!(
                f,
                "wave {wave}: confidence {confidence:.2} after {attempts} attempt(s)"
            ),
            Self::Cancelled { wave: Some(wave) } => write!(f, "cancelled during wave {wave}"),
            Self::Cancelled { wave: None } => f.write_str("cancelled"),
        }
    }
}

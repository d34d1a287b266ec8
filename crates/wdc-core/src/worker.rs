//! Workers (Colonels)
//!
//! A [`Worker`] is a unit of deployable work inside a wave. Workers never
//! touch shared state: `deploy` and `validate` return values that the wave
//! merges on the coordinating task.
//!
//! [`Colonel`] is the built-in worker used for plan files. Custom workers
//! implement the trait directly.

use crate::error::WorkerFault;
use crate::task::TaskSpec;
use crate::types::{
    DeployResult, DeployStatus, Task, Validation, WaveNumber, WorkerId, WorkerStatus,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Default rank tag
pub const DEFAULT_RANK: &str = "Colonel";

/// Deployable unit of work
#[async_trait]
pub trait Worker: Send + Sync + std::fmt::Debug {
    /// Worker identifier (unique within its wave)
    fn id(&self) -> &WorkerId;

    /// Display-only rank tag
    fn rank(&self) -> &str {
        DEFAULT_RANK
    }

    /// Perform the deployment for `task`
    ///
    /// Ordinary task problems must come back as a failed [`DeployResult`].
    ///
    /// # Errors
    /// Returns `WorkerFault` only for unrecoverable conditions; this aborts
    /// the wave and the whole run.
    async fn deploy(&self, task: &Task, wave: WaveNumber) -> Result<DeployResult, WorkerFault>;

    /// Run post-deploy checks against `result`
    async fn validate(&self, result: &DeployResult) -> Validation;
}

/// Built-in worker that performs a described deployment
///
/// Decodes the task against [`TaskSpec`]. Malformed tasks produce a failed
/// result carrying the decode error; non-object tasks fault.
#[derive(Debug, Clone)]
pub struct Colonel {
    id: WorkerId,
    rank: String,
}

impl Colonel {
    /// Create colonel with the default rank
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<WorkerId>) -> Self {
        Self {
            id: id.into(),
            rank: DEFAULT_RANK.to_string(),
        }
    }

    /// With rank
    #[inline]
    #[must_use]
    pub fn with_rank(mut self, rank: impl Into<String>) -> Self {
        self.rank = rank.into();
        self
    }
}

#[async_trait]
impl Worker for Colonel {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    fn rank(&self) -> &str {
        &self.rank
    }

    async fn deploy(&self, task: &Task, wave: WaveNumber) -> Result<DeployResult, WorkerFault> {
        let spec = match TaskSpec::decode(task) {
            Ok(spec) => spec,
            Err(e) if e.is_undecodable() => {
                return Err(WorkerFault::UndecodableTask {
                    worker_id: self.id.clone(),
                    detail: e.to_string(),
                });
            }
            Err(e) => {
                tracing::debug!(worker = %self.id, wave = %wave, error = %e, "rejected task");
                return Ok(DeployResult::failed(
                    self.id.clone(),
                    wave,
                    json!({ "error": e.to_string() }),
                ));
            }
        };

        tracing::debug!(worker = %self.id, wave = %wave, action = %spec.action, "deploying");

        Ok(DeployResult::deployed(
            self.id.clone(),
            wave,
            json!({
                "action": spec.action,
                "target": spec.target,
                "params": Value::Object(spec.params),
                "rank": self.rank,
            }),
        ))
    }

    async fn validate(&self, result: &DeployResult) -> Validation {
        Validation::from_checks([
            ("deploy-status", result.status == DeployStatus::Deployed),
            ("payload-object", result.payload.is_object()),
            ("worker-identity", result.worker_id == self.id),
        ])
    }
}

/// A worker's place in a wave: the worker, its task and its status
///
/// Owned and mutated only by the enclosing [`Wave`](crate::wave::Wave).
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    worker: Arc<dyn Worker>,
    task: Task,
    wave_number: WaveNumber,
    status: WorkerStatus,
}

impl WorkerSlot {
    /// Create a pending slot
    #[inline]
    #[must_use]
    pub fn new(worker: Arc<dyn Worker>, task: Task, wave_number: WaveNumber) -> Self {
        Self {
            worker,
            task,
            wave_number,
            status: WorkerStatus::Pending,
        }
    }

    /// Worker id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &WorkerId {
        self.worker.id()
    }

    /// Worker rank
    #[inline]
    #[must_use]
    pub fn rank(&self) -> &str {
        self.worker.rank()
    }

    /// Wave the worker belongs to
    #[inline]
    #[must_use]
    pub fn wave_number(&self) -> WaveNumber {
        self.wave_number
    }

    /// Current status
    #[inline]
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    /// Task handed to `deploy`
    #[inline]
    #[must_use]
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub(crate) fn worker(&self) -> Arc<dyn Worker> {
        Arc::clone(&self.worker)
    }

    pub(crate) fn set_status(&mut self, status: WorkerStatus) {
        self.status = status;
    }
}

//! Waves
//!
//! A [`Wave`] is an ordered group of workers that must all deploy and
//! validate before the coordinator may move on. Each call to
//! [`Wave::run_with`] is one attempt:
//!
//! 1. Dispatch `deploy` for the attempt's workers concurrently
//! 2. Merge results into the wave's result set
//! 3. Validate the newly deployed workers
//! 4. Process intelligence over the full result set
//! 5. Settle as `advanced`, `held` or `aborted`
//!
//! The first attempt dispatches every worker. Later attempts dispatch only
//! workers that did not validate; validated workers keep their original
//! [`DeployResult`].

use crate::error::{CoordinatorError, WorkerFault};
use crate::events::{emit, CoordinatorEvent, EventSender};
use crate::intelligence::{AnalysisContext, IntelligenceAnalyzer, IntelligenceReport};
use crate::telemetry;
use crate::types::{
    AbortReason, DeployResult, Task, Validation, WaveNumber, WaveState, WorkerId, WorkerStatus,
};
use crate::worker::{Worker, WorkerSlot};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Default number of retries for a held wave
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Default confidence threshold
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Per-attempt execution settings
///
/// Built by the coordinator from its configuration; [`Wave::run`] uses the
/// defaults.
#[derive(Debug, Clone)]
pub struct WaveRun<'a> {
    /// Analyzer for the attempt's results
    pub analyzer: &'a IntelligenceAnalyzer,
    /// Minimum aggregate confidence to advance
    pub threshold: f64,
    /// Retries for waves without their own limit
    pub default_max_retries: u32,
    /// Deploys running longer become soft failures
    pub deploy_timeout: Option<Duration>,
    /// Bounds concurrent deploys
    pub limiter: Option<Arc<Semaphore>>,
    /// External cancellation
    pub cancel: CancellationToken,
    /// Progress events
    pub events: Option<&'a EventSender>,
}

impl<'a> WaveRun<'a> {
    /// Settings with default retries and no timeout, limiter or events
    #[must_use]
    pub fn new(analyzer: &'a IntelligenceAnalyzer, threshold: f64) -> Self {
        Self {
            analyzer,
            threshold,
            default_max_retries: DEFAULT_MAX_RETRIES,
            deploy_timeout: None,
            limiter: None,
            cancel: CancellationToken::new(),
            events: None,
        }
    }
}

/// Outcome of one wave attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveOutcome {
    /// Wave number
    pub number: WaveNumber,
    /// State after the attempt
    pub state: WaveState,
    /// 1-based attempt counter
    pub attempt: u32,
    /// Workers in the wave
    pub worker_count: usize,
    /// Failed deploys/validations across all attempts so far
    pub failure_count: usize,
    /// Aggregate confidence; `None` if the attempt faulted before validation
    pub aggregate_confidence: Option<f64>,
    /// Intelligence for this attempt
    pub intelligence: Option<IntelligenceReport>,
    /// Workers dispatched in this attempt, sorted
    pub dispatched: Vec<WorkerId>,
    /// Current result set, one per deployed worker, sorted by worker id
    pub results: Vec<DeployResult>,
    /// Set when the wave aborted
    pub abort_reason: Option<AbortReason>,
}

/// An ordered group of workers gated by aggregate confidence
#[derive(Debug)]
pub struct Wave {
    number: WaveNumber,
    slots: Vec<WorkerSlot>,
    state: WaveState,
    max_retries: Option<u32>,
    attempts: u32,
    failure_count: usize,
    results: BTreeMap<WorkerId, DeployResult>,
    validations: BTreeMap<WorkerId, Validation>,
    reports: Vec<IntelligenceReport>,
    aggregate_confidence: Option<f64>,
}

struct Deployed {
    slot: usize,
    result: DeployResult,
}

enum Dispatch {
    /// Cancelled while queued on the limiter
    Skipped,
    Finished(std::thread::Result<Result<DeployResult, WorkerFault>>),
}

impl Wave {
    /// Create wave from `(worker, task)` members
    ///
    /// # Errors
    /// - `CoordinatorError::EmptyWave` if there are no members
    /// - `CoordinatorError::DuplicateWorker` if two workers share an id
    pub fn new<I>(number: WaveNumber, members: I) -> Result<Self, CoordinatorError>
    where
        I: IntoIterator<Item = (Arc<dyn Worker>, Task)>,
    {
        let mut seen = HashSet::new();
        let mut slots = Vec::new();
        for (worker, task) in members {
            if !seen.insert(worker.id().clone()) {
                return Err(CoordinatorError::DuplicateWorker {
                    wave: number,
                    worker_id: worker.id().clone(),
                });
            }
            slots.push(WorkerSlot::new(worker, task, number));
        }

        if slots.is_empty() {
            return Err(CoordinatorError::EmptyWave(number));
        }

        Ok(Self {
            number,
            slots,
            state: WaveState::Pending,
            max_retries: None,
            attempts: 0,
            failure_count: 0,
            results: BTreeMap::new(),
            validations: BTreeMap::new(),
            reports: Vec::new(),
            aggregate_confidence: None,
        })
    }

    /// With wave-specific retry limit
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Wave number
    #[inline]
    #[must_use]
    pub fn number(&self) -> WaveNumber {
        self.number
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> WaveState {
        self.state
    }

    /// Worker slots in insertion order
    #[inline]
    #[must_use]
    pub fn workers(&self) -> &[WorkerSlot] {
        &self.slots
    }

    /// Attempts made so far
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wave-specific retry limit, if set
    #[inline]
    #[must_use]
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Aggregate confidence of the latest attempt
    #[inline]
    #[must_use]
    pub fn aggregate_confidence(&self) -> Option<f64> {
        self.aggregate_confidence
    }

    /// Current deploy result of a worker
    #[inline]
    #[must_use]
    pub fn result(&self, worker_id: &WorkerId) -> Option<&DeployResult> {
        self.results.get(worker_id)
    }

    /// Intelligence reports of all attempts, oldest first
    #[inline]
    #[must_use]
    pub fn reports(&self) -> &[IntelligenceReport] {
        &self.reports
    }

    /// Run one attempt with default settings
    ///
    /// # Errors
    /// Returns `CoordinatorError::WaveSettled` if the wave already advanced or
    /// aborted.
    pub async fn run(
        &mut self,
        analyzer: &IntelligenceAnalyzer,
        threshold: f64,
    ) -> Result<WaveOutcome, CoordinatorError> {
        self.run_with(&WaveRun::new(analyzer, threshold)).await
    }

    /// Run one attempt
    ///
    /// # Errors
    /// Returns `CoordinatorError::WaveSettled` if the wave already advanced or
    /// aborted. Worker faults are reported in the outcome, not as errors.
    pub async fn run_with(&mut self, run: &WaveRun<'_>) -> Result<WaveOutcome, CoordinatorError> {
        if self.state.is_settled() {
            return Err(CoordinatorError::WaveSettled {
                wave: self.number,
                state: self.state,
            });
        }

        let targets: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| self.attempts == 0 || slot.status() != WorkerStatus::Validated)
            .map(|(i, _)| i)
            .collect();

        self.attempts += 1;
        self.state = WaveState::Running;
        for &i in &targets {
            self.slots[i].set_status(WorkerStatus::Pending);
        }

        tracing::info!(
            wave = %self.number,
            attempt = self.attempts,
            workers = targets.len(),
            "wave attempt started"
        );
        emit(
            run.events,
            CoordinatorEvent::WaveStarted {
                wave: self.number,
                attempt: self.attempts,
                workers: targets.len(),
            },
        );

        let mut dispatched: Vec<WorkerId> =
            targets.iter().map(|&i| self.slots[i].id().clone()).collect();
        dispatched.sort();

        let deployed = match self.deploy_all(&targets, run).await {
            Ok(deployed) => deployed,
            Err(fault) => return Ok(self.abort_on_fault(fault, dispatched, run)),
        };

        let attempt_failures = match self.validate_all(deployed, run).await {
            Ok(failures) => failures,
            Err(fault) => return Ok(self.abort_on_fault(fault, dispatched, run)),
        };
        self.failure_count += attempt_failures;
        telemetry::record_worker_failures(attempt_failures);

        let context = AnalysisContext::from_results(self.results.values(), &self.validations)
            .with_prior(self.reports.iter().cloned());
        let report = run.analyzer.process(&context).results;
        let confidence = report.confidence;
        self.aggregate_confidence = Some(confidence);
        self.reports.push(report.clone());

        let max_retries = self.max_retries.unwrap_or(run.default_max_retries);
        let all_validated = self
            .slots
            .iter()
            .all(|slot| slot.status() == WorkerStatus::Validated);

        let abort_reason = if run.cancel.is_cancelled() {
            self.state = WaveState::Aborted;
            Some(AbortReason::Cancelled {
                wave: Some(self.number),
            })
        } else if all_validated && confidence >= run.threshold {
            self.state = WaveState::Advanced;
            None
        } else if self.attempts <= max_retries {
            self.state = WaveState::Held;
            None
        } else {
            self.state = WaveState::Aborted;
            Some(AbortReason::RetriesExhausted {
                wave: self.number,
                attempts: self.attempts,
                confidence,
            })
        };

        match self.state {
            WaveState::Held => tracing::warn!(
                wave = %self.number,
                attempt = self.attempts,
                confidence,
                threshold = run.threshold,
                "wave held below threshold"
            ),
            state => tracing::info!(
                wave = %self.number,
                attempt = self.attempts,
                confidence,
                state = %state,
                "wave settled"
            ),
        }

        Ok(self.outcome(Some(report), dispatched, abort_reason, run))
    }

    /// Deploy the targeted slots concurrently
    ///
    /// Returns on the first fault, aborting the remaining deploys. Workers
    /// still queued on the limiter when the run is cancelled never start and
    /// stay `pending`.
    async fn deploy_all(
        &mut self,
        targets: &[usize],
        run: &WaveRun<'_>,
    ) -> Result<Vec<Deployed>, WorkerFault> {
        let mut set = JoinSet::new();
        let mut owners = HashMap::with_capacity(targets.len());
        for &i in targets {
            let slot = &self.slots[i];
            let worker = slot.worker();
            let task = slot.task().clone();
            let wave = self.number;
            let timeout = run.deploy_timeout;
            let limiter = run.limiter.clone();
            let cancel = run.cancel.clone();

            let handle = set.spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => tokio::select! {
                        biased;
                        () = cancel.cancelled() => return (i, Dispatch::Skipped),
                        permit = semaphore.acquire_owned() => permit.ok(),
                    },
                    None => None,
                };
                let outcome = AssertUnwindSafe(deploy_one(worker, &task, wave, timeout))
                    .catch_unwind()
                    .await;
                (i, Dispatch::Finished(outcome))
            });
            owners.insert(handle.id(), slot.id().clone());
        }

        let mut deployed = Vec::with_capacity(targets.len());
        while let Some(joined) = set.join_next_with_id().await {
            let fault = match joined {
                Ok((_, (slot, Dispatch::Finished(Ok(Ok(result)))))) => {
                    tracing::debug!(
                        wave = %self.number,
                        worker = %self.slots[slot].id(),
                        failed = result.is_failed(),
                        "worker deployed"
                    );
                    self.slots[slot].set_status(WorkerStatus::Deployed);
                    deployed.push(Deployed { slot, result });
                    continue;
                }
                Ok((_, (slot, Dispatch::Skipped))) => {
                    tracing::debug!(
                        wave = %self.number,
                        worker = %self.slots[slot].id(),
                        "deploy skipped after cancellation"
                    );
                    continue;
                }
                Ok((_, (slot, Dispatch::Finished(Ok(Err(fault)))))) => {
                    self.slots[slot].set_status(WorkerStatus::Failed);
                    fault
                }
                Ok((_, (slot, Dispatch::Finished(Err(panic))))) => {
                    self.slots[slot].set_status(WorkerStatus::Failed);
                    WorkerFault::Crashed {
                        worker_id: self.slots[slot].id().clone(),
                        detail: panic_message(panic.as_ref()),
                    }
                }
                Err(join_error) => join_fault(&owners, &join_error),
            };

            set.abort_all();
            return Err(fault);
        }

        Ok(deployed)
    }

    /// Merge deploy results, validate them and update worker statuses
    ///
    /// Returns the number of workers that failed in this attempt. A panic in
    /// `validate` is a fault; nothing from the attempt is merged then.
    async fn validate_all(
        &mut self,
        deployed: Vec<Deployed>,
        run: &WaveRun<'_>,
    ) -> Result<usize, WorkerFault> {
        let checks = deployed.iter().map(|d| {
            let worker = self.slots[d.slot].worker();
            let result = d.result.clone();
            AssertUnwindSafe(async move { worker.validate(&result).await }).catch_unwind()
        });
        let outcomes = join_all(checks).await;

        let mut validations = Vec::with_capacity(outcomes.len());
        for (d, outcome) in deployed.iter().zip(outcomes) {
            match outcome {
                Ok(validation) => validations.push(validation),
                Err(panic) => {
                    self.slots[d.slot].set_status(WorkerStatus::Failed);
                    return Err(WorkerFault::Crashed {
                        worker_id: self.slots[d.slot].id().clone(),
                        detail: panic_message(panic.as_ref()),
                    });
                }
            }
        }

        let mut failures = 0;
        for (Deployed { slot, result }, validation) in deployed.into_iter().zip(validations) {
            let passed = !result.is_failed() && validation.valid;
            let status = if passed {
                WorkerStatus::Validated
            } else {
                failures += 1;
                WorkerStatus::Failed
            };

            let id = self.slots[slot].id().clone();
            self.slots[slot].set_status(status);
            emit(
                run.events,
                CoordinatorEvent::WorkerSettled {
                    wave: self.number,
                    worker_id: id.clone(),
                    status,
                },
            );
            self.results.insert(id.clone(), result);
            self.validations.insert(id, validation);
        }
        Ok(failures)
    }

    /// Abort a held wave whose retry was pre-empted by cancellation
    pub(crate) fn abort_cancelled(&mut self, run: &WaveRun<'_>) -> WaveOutcome {
        tracing::warn!(wave = %self.number, attempt = self.attempts, "held wave cancelled");
        self.state = WaveState::Aborted;
        let reason = AbortReason::Cancelled {
            wave: Some(self.number),
        };
        let intelligence = self.reports.last().cloned();
        self.outcome(intelligence, Vec::new(), Some(reason), run)
    }

    fn abort_on_fault(
        &mut self,
        fault: WorkerFault,
        dispatched: Vec<WorkerId>,
        run: &WaveRun<'_>,
    ) -> WaveOutcome {
        tracing::error!(wave = %self.number, error = %fault, "worker fault; aborting wave");
        self.state = WaveState::Aborted;
        self.failure_count += 1;
        self.aggregate_confidence = None;
        telemetry::record_worker_failures(1);

        let reason = AbortReason::WorkerFault {
            wave: self.number,
            fault,
        };
        self.outcome(None, dispatched, Some(reason), run)
    }

    fn outcome(
        &self,
        intelligence: Option<IntelligenceReport>,
        dispatched: Vec<WorkerId>,
        abort_reason: Option<AbortReason>,
        run: &WaveRun<'_>,
    ) -> WaveOutcome {
        emit(
            run.events,
            CoordinatorEvent::WaveSettled {
                wave: self.number,
                state: self.state,
                confidence: self.aggregate_confidence,
            },
        );
        telemetry::record_wave(self.state, self.aggregate_confidence);

        WaveOutcome {
            number: self.number,
            state: self.state,
            attempt: self.attempts,
            worker_count: self.slots.len(),
            failure_count: self.failure_count,
            aggregate_confidence: self.aggregate_confidence,
            intelligence,
            dispatched,
            results: self.results.values().cloned().collect(),
            abort_reason,
        }
    }
}

async fn deploy_one(
    worker: Arc<dyn Worker>,
    task: &Task,
    wave: WaveNumber,
    timeout: Option<Duration>,
) -> Result<DeployResult, WorkerFault> {
    let Some(limit) = timeout else {
        return worker.deploy(task, wave).await;
    };

    match tokio::time::timeout(limit, worker.deploy(task, wave)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(worker = %worker.id(), wave = %wave, ?limit, "deploy timed out");
            Ok(DeployResult::failed(
                worker.id().clone(),
                wave,
                json!({ "error": format!("deploy timed out after {}s", limit.as_secs()) }),
            ))
        }
    }
}

fn join_fault(owners: &HashMap<task::Id, WorkerId>, error: &JoinError) -> WorkerFault {
    WorkerFault::Crashed {
        worker_id: owners
            .get(&error.id())
            .cloned()
            .unwrap_or_else(|| WorkerId::from("unknown")),
        detail: error.to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}

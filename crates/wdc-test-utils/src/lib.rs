//! Testing utilities for WDC workspace
//!
//! Scripted workers, wave builders and event helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wdc_core::events::EventReceiver;
use wdc_core::{
    Colonel, CoordinatorEvent, DeployResult, Task, Validation, Wave, WaveNumber, Worker,
    WorkerFault, WorkerId,
};

/// What a scripted worker does on one deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Deploy and validate cleanly
    Deploy,
    /// Return a failed deploy result
    Fail,
    /// Deploy, then fail validation
    Invalid,
    /// Return a `WorkerFault`
    Fault,
    /// Panic inside `deploy`
    Panic,
    /// Deploy, then panic inside `validate`
    PanicInValidate,
}

/// Worker that follows a per-attempt script
///
/// The n-th deploy runs `script[n]`; once the script is exhausted the last
/// step repeats.
#[derive(Debug, Clone)]
pub struct ScriptedWorker {
    id: WorkerId,
    script: Vec<Step>,
    delay: Option<Duration>,
    deploys: Arc<AtomicUsize>,
}

impl ScriptedWorker {
    pub fn new(id: &str, script: impl IntoIterator<Item = Step>) -> Self {
        Self {
            id: WorkerId::from(id),
            script: script.into_iter().collect(),
            delay: None,
            deploys: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn healthy(id: &str) -> Self {
        Self::new(id, [Step::Deploy])
    }

    pub fn failing(id: &str) -> Self {
        Self::new(id, [Step::Fail])
    }

    /// Fails the first deploy, succeeds afterwards
    pub fn flaky(id: &str) -> Self {
        Self::new(id, [Step::Fail, Step::Deploy])
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared deploy counter; stays valid after the worker moves into a wave
    pub fn deploy_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.deploys)
    }

    pub fn deploys(&self) -> usize {
        self.deploys.load(Ordering::SeqCst)
    }

    fn step(&self, attempt: usize) -> Step {
        self.script
            .get(attempt)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or(Step::Deploy)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    fn rank(&self) -> &str {
        "Scripted"
    }

    async fn deploy(&self, _task: &Task, wave: WaveNumber) -> Result<DeployResult, WorkerFault> {
        let attempt = self.deploys.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let payload = json!({ "attempt": attempt + 1 });
        match self.step(attempt) {
            Step::Deploy => Ok(DeployResult::deployed(self.id.clone(), wave, payload)),
            Step::Invalid => Ok(DeployResult::deployed(
                self.id.clone(),
                wave,
                json!({ "attempt": attempt + 1, "invalid": true }),
            )),
            Step::PanicInValidate => Ok(DeployResult::deployed(
                self.id.clone(),
                wave,
                json!({ "attempt": attempt + 1, "panic_in_validate": true }),
            )),
            Step::Fail => Ok(DeployResult::failed(self.id.clone(), wave, payload)),
            Step::Fault => Err(WorkerFault::Internal {
                worker_id: self.id.clone(),
                detail: "scripted fault".to_string(),
            }),
            Step::Panic => panic!("scripted panic in {}", self.id),
        }
    }

    async fn validate(&self, result: &DeployResult) -> Validation {
        if result.payload.get("panic_in_validate").is_some() {
            panic!("scripted validate panic in {}", self.id);
        }
        let flagged = result.payload.get("invalid").is_some();
        Validation::from_checks([
            ("deploy-status", !result.is_failed()),
            ("scripted-check", !flagged),
        ])
    }
}

pub fn wave_number(n: u32) -> WaveNumber {
    WaveNumber::new(n).unwrap()
}

pub fn rollout_task() -> Task {
    json!({ "action": "rollout", "target": "cluster-a" })
}

/// Build a wave of scripted workers
pub fn scripted_wave(number: u32, workers: Vec<ScriptedWorker>) -> Wave {
    let members = workers.into_iter().map(|w| {
        let worker: Arc<dyn Worker> = Arc::new(w);
        (worker, rollout_task())
    });
    Wave::new(wave_number(number), members).unwrap()
}

/// Build a wave of colonels sharing the same task
pub fn colonel_wave(number: u32, ids: &[&str], task: &Task) -> Wave {
    let members = ids.iter().map(|id| {
        let worker: Arc<dyn Worker> = Arc::new(Colonel::new(*id));
        (worker, task.clone())
    });
    Wave::new(wave_number(number), members).unwrap()
}

/// Collect every event currently buffered
pub fn drain_events(rx: &mut EventReceiver) -> Vec<CoordinatorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

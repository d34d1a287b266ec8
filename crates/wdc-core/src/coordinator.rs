//! Wave Coordinator
//!
//! Drives waves strictly in order through the coordinator state machine:
//! - Runs each wave, retrying held waves up to their retry limit
//! - Stops the run on the first aborted wave
//! - Honours cancellation (abort) and graceful halt (stop at a boundary)
//! - Folds every settled wave into the final [`DeploymentReport`]

use crate::aggregator::{DeploymentReport, ResultAggregator};
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::events::{emit, CoordinatorEvent, EventSender};
use crate::intelligence::IntelligenceAnalyzer;
use crate::state_machine::{CoordinatorState, StateMachine};
use crate::telemetry;
use crate::types::{RunId, WaveState};
use crate::wave::{Wave, WaveRun};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Sequential wave runner
#[derive(Debug)]
pub struct WaveCoordinator {
    config: CoordinatorConfig,
    analyzer: IntelligenceAnalyzer,
    cancel: CancellationToken,
    halt: CancellationToken,
    events: Option<EventSender>,
}

impl WaveCoordinator {
    /// Create coordinator
    #[inline]
    #[must_use]
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            analyzer: IntelligenceAnalyzer::new(),
            cancel: CancellationToken::new(),
            halt: CancellationToken::new(),
            events: None,
        }
    }

    /// With progress event sender
    #[inline]
    #[must_use]
    pub fn with_events(mut self, sender: EventSender) -> Self {
        self.events = Some(sender);
        self
    }

    /// With an externally owned cancellation token
    #[inline]
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts the run
    ///
    /// In-flight deploys finish; the current wave and the run end `aborted`.
    #[inline]
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Token that stops the run at the next wave boundary without aborting
    #[inline]
    #[must_use]
    pub fn halt_token(&self) -> CancellationToken {
        self.halt.clone()
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run all waves in ascending order
    ///
    /// # Errors
    /// Returns `CoordinatorError` for invalid configuration, an empty wave
    /// list, duplicate wave numbers or an illegal state transition. Worker
    /// faults, exhausted retries and cancellation are reported in the
    /// returned report.
    pub async fn run(&self, mut waves: Vec<Wave>) -> Result<DeploymentReport, CoordinatorError> {
        self.config.validate()?;
        if waves.is_empty() {
            return Err(CoordinatorError::NoWaves);
        }

        waves.sort_by_key(Wave::number);
        if let Some(pair) = waves.windows(2).find(|w| w[0].number() == w[1].number()) {
            return Err(CoordinatorError::DuplicateWave(pair[0].number()));
        }

        let run_id = RunId::new();
        let span = tracing::info_span!("run", %run_id, version = %self.config.version);
        self.drive(run_id, waves).instrument(span).await
    }

    async fn drive(
        &self,
        run_id: RunId,
        waves: Vec<Wave>,
    ) -> Result<DeploymentReport, CoordinatorError> {
        tracing::info!(waves = waves.len(), threshold = self.config.threshold, "run started");

        let run = WaveRun {
            analyzer: &self.analyzer,
            threshold: self.config.threshold,
            default_max_retries: self.config.max_retries,
            deploy_timeout: self.config.deploy_timeout(),
            limiter: self
                .config
                .max_concurrent_workers
                .map(|n| Arc::new(Semaphore::new(n))),
            cancel: self.cancel.clone(),
            events: self.events.as_ref(),
        };

        let mut machine = StateMachine::new();
        let mut aggregator =
            ResultAggregator::new(run_id, self.config.version.clone(), waves.len());

        'waves: for mut wave in waves {
            let number = wave.number();

            if self.cancel.is_cancelled() {
                tracing::warn!(next_wave = %number, "run cancelled between waves");
                aggregator.mark_cancelled(None);
                machine.transition(CoordinatorState::Aborted)?;
                break;
            }
            if self.halt.is_cancelled() {
                tracing::info!(next_wave = %number, "run halted at wave boundary");
                machine.transition(CoordinatorState::Finished)?;
                break;
            }

            loop {
                machine.transition(CoordinatorState::Running(number))?;
                let outcome = wave.run_with(&run).await?;

                match outcome.state {
                    WaveState::Advanced => {
                        machine.transition(CoordinatorState::Advancing(number))?;
                        aggregator.record(&outcome);
                        continue 'waves;
                    }
                    WaveState::Held => {
                        machine.transition(CoordinatorState::Held(number))?;
                        if self.cancel.is_cancelled() {
                            tracing::warn!(wave = %number, "run cancelled on held wave");
                            aggregator.record(&wave.abort_cancelled(&run));
                            machine.transition(CoordinatorState::Aborted)?;
                            break 'waves;
                        }
                        if self.halt.is_cancelled() {
                            tracing::info!(wave = %number, "run halted instead of retrying");
                            aggregator.record(&outcome);
                            machine.transition(CoordinatorState::Finished)?;
                            break 'waves;
                        }
                        tracing::info!(
                            wave = %number,
                            attempt = outcome.attempt,
                            "retrying held wave"
                        );
                    }
                    _ => {
                        if let Some(reason) = &outcome.abort_reason {
                            tracing::warn!(wave = %number, %reason, "run aborted");
                        }
                        aggregator.record(&outcome);
                        machine.transition(CoordinatorState::Aborted)?;
                        break 'waves;
                    }
                }
            }
        }

        if !machine.current().is_terminal() {
            machine.transition(CoordinatorState::Finished)?;
        }
        tracing::debug!(history = ?machine.history(), "state history");

        let report = aggregator.finalize();
        emit(
            self.events.as_ref(),
            CoordinatorEvent::RunFinished {
                status: report.overall_status,
            },
        );
        telemetry::record_run(report.overall_status.as_str());
        tracing::info!(
            status = %report.overall_status,
            waves = report.waves.len(),
            total_failures = report.total_failures,
            "run finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::OverallStatus;
    use crate::types::{Task, WaveNumber};
    use crate::worker::{Colonel, Worker};
    use serde_json::json;

    fn wave(number: u32, ids: &[&str]) -> Wave {
        let members = ids.iter().map(|id| {
            let worker: Arc<dyn Worker> = Arc::new(Colonel::new(*id));
            (worker, json!({"action": "rollout"}) as Task)
        });
        Wave::new(WaveNumber::new(number).unwrap(), members).unwrap()
    }

    #[tokio::test]
    async fn runs_waves_in_ascending_order() {
        let (tx, mut rx) = crate::events::channel();
        let coordinator = WaveCoordinator::new(CoordinatorConfig::default()).with_events(tx);

        let report = coordinator
            .run(vec![wave(2, &["c"]), wave(1, &["a", "b"])])
            .await
            .unwrap();

        assert_eq!(report.overall_status, OverallStatus::Succeeded);
        let order: Vec<u32> = report.waves.iter().map(|w| w.number.get()).collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(report.planned_waves, 2);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(CoordinatorEvent::RunFinished {
                status: OverallStatus::Succeeded
            })
        );
    }

    #[tokio::test]
    async fn rejects_invalid_input() {
        let coordinator = WaveCoordinator::new(CoordinatorConfig::default());
        assert!(matches!(
            coordinator.run(vec![]).await,
            Err(CoordinatorError::NoWaves)
        ));
        assert!(matches!(
            coordinator.run(vec![wave(1, &["a"]), wave(1, &["b"])]).await,
            Err(CoordinatorError::DuplicateWave(_))
        ));

        let bad = WaveCoordinator::new(CoordinatorConfig::new().with_threshold(-0.1));
        assert!(matches!(
            bad.run(vec![wave(1, &["a"])]).await,
            Err(CoordinatorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let coordinator = WaveCoordinator::new(CoordinatorConfig::default());
        coordinator.cancel_token().cancel();

        let report = coordinator.run(vec![wave(1, &["a"])]).await.unwrap();
        assert_eq!(report.overall_status, OverallStatus::Aborted);
        assert!(report.waves.is_empty());
        assert!(report.abort_reason.as_ref().is_some_and(|r| r.is_cancellation()));
    }

    #[tokio::test]
    async fn halt_before_start_partially_succeeds() {
        let coordinator = WaveCoordinator::new(CoordinatorConfig::default());
        coordinator.halt_token().cancel();

        let report = coordinator.run(vec![wave(1, &["a"])]).await.unwrap();
        assert_eq!(report.overall_status, OverallStatus::PartiallySucceeded);
        assert!(report.abort_reason.is_none());
    }
}

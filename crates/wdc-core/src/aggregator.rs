//! Result aggregation
//!
//! Folds settled wave outcomes into the final [`DeploymentReport`].

use crate::intelligence::IntelligenceReport;
use crate::types::{AbortReason, RunId, WaveNumber, WaveState};
use crate::wave::WaveOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverallStatus {
    /// Every planned wave advanced
    Succeeded,
    /// Stopped early without an abort
    PartiallySucceeded,
    /// A wave aborted or the run was cancelled
    Aborted,
}

impl OverallStatus {
    /// Get status name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::PartiallySucceeded => "partially-succeeded",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary row for one wave
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveSummary {
    /// Wave number
    pub number: WaveNumber,
    /// Final state
    pub state: WaveState,
    /// Aggregate confidence of the final attempt
    pub aggregate_confidence: Option<f64>,
    /// Workers in the wave
    pub worker_count: usize,
    /// Failures across all attempts, including ones later resolved
    pub failure_count: usize,
    /// Attempts made
    pub attempts: u32,
    /// Intelligence of the final attempt
    pub intelligence: Option<IntelligenceReport>,
}

impl From<&WaveOutcome> for WaveSummary {
    fn from(outcome: &WaveOutcome) -> Self {
        Self {
            number: outcome.number,
            state: outcome.state,
            aggregate_confidence: outcome.aggregate_confidence,
            worker_count: outcome.worker_count,
            failure_count: outcome.failure_count,
            attempts: outcome.attempt,
            intelligence: outcome.intelligence.clone(),
        }
    }
}

/// Final artifact of a coordinator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentReport {
    /// Run identifier
    pub run_id: RunId,
    /// Plan/config version the run used
    pub version: String,
    /// Waves the run was given
    pub planned_waves: usize,
    /// One summary per wave that ran, in execution order
    pub waves: Vec<WaveSummary>,
    /// Overall status
    pub overall_status: OverallStatus,
    /// Sum of wave failure counts
    pub total_failures: usize,
    /// Why the run aborted, if it did
    pub abort_reason: Option<AbortReason>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
}

impl DeploymentReport {
    /// Summary for wave `number`
    #[must_use]
    pub fn wave(&self, number: u32) -> Option<&WaveSummary> {
        self.waves.iter().find(|w| w.number.get() == number)
    }

    /// Whether every planned wave advanced
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.overall_status == OverallStatus::Succeeded
    }

    /// Pretty JSON rendering
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Incremental report builder owned by the coordinator
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    run_id: RunId,
    version: String,
    planned_waves: usize,
    summaries: Vec<WaveSummary>,
    abort_reason: Option<AbortReason>,
    started_at: DateTime<Utc>,
}

impl ResultAggregator {
    /// Start aggregating a run of `planned_waves` waves
    #[must_use]
    pub fn new(run_id: RunId, version: impl Into<String>, planned_waves: usize) -> Self {
        Self {
            run_id,
            version: version.into(),
            planned_waves,
            summaries: Vec::new(),
            abort_reason: None,
            started_at: Utc::now(),
        }
    }

    /// Append the final outcome of a wave
    pub fn record(&mut self, outcome: &WaveOutcome) {
        tracing::debug!(wave = %outcome.number, state = %outcome.state, "recording wave");
        if self.abort_reason.is_none() {
            self.abort_reason.clone_from(&outcome.abort_reason);
        }
        self.summaries.push(WaveSummary::from(outcome));
    }

    /// Note a cancellation observed outside a wave
    pub fn mark_cancelled(&mut self, wave: Option<WaveNumber>) {
        if self.abort_reason.is_none() {
            self.abort_reason = Some(AbortReason::Cancelled { wave });
        }
    }

    /// Summaries recorded so far
    #[inline]
    #[must_use]
    pub fn summaries(&self) -> &[WaveSummary] {
        &self.summaries
    }

    /// Build the final report
    #[must_use]
    pub fn finalize(self) -> DeploymentReport {
        let any_aborted = self.summaries.iter().any(|s| s.state == WaveState::Aborted);
        let all_advanced = self.summaries.len() == self.planned_waves
            && self.summaries.iter().all(|s| s.state == WaveState::Advanced);

        let overall_status = if any_aborted || self.abort_reason.is_some() {
            OverallStatus::Aborted
        } else if all_advanced {
            OverallStatus::Succeeded
        } else {
            OverallStatus::PartiallySucceeded
        };

        DeploymentReport {
            run_id: self.run_id,
            version: self.version,
            planned_waves: self.planned_waves,
            total_failures: self.summaries.iter().map(|s| s.failure_count).sum(),
            waves: self.summaries,
            overall_status,
            abort_reason: self.abort_reason,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(number: u32, state: WaveState, failures: usize) -> WaveOutcome {
        WaveOutcome {
            number: WaveNumber::new(number).unwrap(),
            state,
            attempt: 1,
            worker_count: 2,
            failure_count: failures,
            aggregate_confidence: Some(1.0),
            intelligence: None,
            dispatched: vec![],
            results: vec![],
            abort_reason: None,
        }
    }

    #[test]
    fn all_advanced_succeeds() {
        let mut agg = ResultAggregator::new(RunId::new(), "1", 2);
        agg.record(&outcome(1, WaveState::Advanced, 0));
        agg.record(&outcome(2, WaveState::Advanced, 1));

        let report = agg.finalize();
        assert_eq!(report.overall_status, OverallStatus::Succeeded);
        assert_eq!(report.total_failures, 1);
        assert!(report.abort_reason.is_none());
        assert!(report.succeeded());
    }

    #[test]
    fn any_aborted_aborts() {
        let mut agg = ResultAggregator::new(RunId::new(), "1", 3);
        agg.record(&outcome(1, WaveState::Advanced, 0));
        agg.record(&outcome(2, WaveState::Aborted, 2));

        let report = agg.finalize();
        assert_eq!(report.overall_status, OverallStatus::Aborted);
        assert_eq!(report.waves.len(), 2);
        assert!(report.wave(3).is_none());
    }

    #[test]
    fn held_or_missing_waves_partially_succeed() {
        let mut agg = ResultAggregator::new(RunId::new(), "1", 3);
        agg.record(&outcome(1, WaveState::Advanced, 0));
        agg.record(&outcome(2, WaveState::Held, 1));
        assert_eq!(agg.summaries().len(), 2);
        assert_eq!(agg.finalize().overall_status, OverallStatus::PartiallySucceeded);

        let mut short = ResultAggregator::new(RunId::new(), "1", 2);
        short.record(&outcome(1, WaveState::Advanced, 0));
        assert_eq!(short.finalize().overall_status, OverallStatus::PartiallySucceeded);
    }

    #[test]
    fn cancellation_aborts_even_without_waves() {
        let mut agg = ResultAggregator::new(RunId::new(), "1", 2);
        agg.mark_cancelled(None);
        let report = agg.finalize();
        assert_eq!(report.overall_status, OverallStatus::Aborted);
        assert_eq!(report.abort_reason.as_ref().map(AbortReason::code), Some("cancelled"));
    }

    #[test]
    fn report_serializes_status_kebab_case() {
        let agg = ResultAggregator::new(RunId::new(), "1", 1);
        let json = agg.finalize().to_json().unwrap();
        assert!(json.contains("\"overall_status\": \"partially-succeeded\""));
    }
}

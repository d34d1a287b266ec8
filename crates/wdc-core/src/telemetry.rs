//! Logging and metrics
//!
//! Metrics go through the `metrics` facade and are no-ops until the host
//! installs a recorder.

use crate::types::WaveState;
use anyhow::Context;

/// Settled wave attempts, labelled by `state`
pub const WAVES_TOTAL: &str = "wdc_waves_total";
/// Failed deploys/validations
pub const WORKER_FAILURES_TOTAL: &str = "wdc_worker_failures_total";
/// Aggregate confidence per settled attempt
pub const WAVE_CONFIDENCE: &str = "wdc_wave_confidence";
/// Finished runs, labelled by `status`
pub const RUNS_TOTAL: &str = "wdc_runs_total";

pub(crate) fn record_wave(state: WaveState, confidence: Option<f64>) {
    metrics::counter!(WAVES_TOTAL, "state" => state.as_str()).increment(1);
    if let Some(confidence) = confidence {
        metrics::histogram!(WAVE_CONFIDENCE).record(confidence);
    }
}

pub(crate) fn record_worker_failures(count: usize) {
    if count > 0 {
        metrics::counter!(WORKER_FAILURES_TOTAL).increment(count as u64);
    }
}

pub(crate) fn record_run(status: &'static str) {
    metrics::counter!(RUNS_TOTAL, "status" => status).increment(1);
}

/// Install a `tracing` subscriber
///
/// `RUST_LOG` wins over `level` when set.
///
/// # Errors
/// Returns error if `level` is not a valid filter directive or a global
/// subscriber is already installed.
pub fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("Failed to install JSON subscriber")
    } else {
        builder
            .compact()
            .try_init()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("Failed to install subscriber")
    }
}

//! # wdc
//!
//! Command-line front end for the Wave Deployment Coordinator.
//!
//! - `wdc run <plan>` runs a plan and prints the report
//! - `wdc check <plan>` validates a plan without running it
//!
//! The exit code is 0 only when every wave advanced. Ctrl-C cancels the run;
//! in-flight deploys finish and the report is still printed.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use wdc_core::telemetry::init_tracing;
use wdc_core::{
    CoordinatorConfig, CoordinatorOverrides, DeploymentPlan, DeploymentReport, WaveCoordinator,
};

/// Wave Deployment Coordinator
#[derive(Parser)]
#[command(name = "wdc")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "WDC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a deployment plan
    Run {
        /// Plan file (.toml, .yaml, .yml or .json)
        #[arg(value_name = "PLAN")]
        plan: PathBuf,

        /// Confidence threshold override
        #[arg(long)]
        threshold: Option<f64>,

        /// Default retry limit override
        #[arg(long)]
        max_retries: Option<u32>,

        /// Concurrent deploys per wave
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a deployment plan without running it
    Check {
        /// Plan file (.toml, .yaml, .yml or .json)
        #[arg(value_name = "PLAN")]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json)?;

    match cli.command {
        Commands::Run {
            plan,
            threshold,
            max_retries,
            max_concurrency,
            json,
        } => {
            let overrides = CoordinatorOverrides {
                threshold,
                max_retries,
                max_concurrent_workers: max_concurrency,
                ..CoordinatorOverrides::default()
            };
            run(&plan, &overrides, json).await
        }
        Commands::Check { plan } => check(&plan),
    }
}

/// Defaults, then the plan's section, then command-line flags
fn resolve_config(
    plan: &DeploymentPlan,
    flags: &CoordinatorOverrides,
) -> Result<CoordinatorConfig> {
    let config = flags.apply(plan.config(CoordinatorConfig::default()));
    config.validate().context("Invalid coordinator configuration")?;
    Ok(config)
}

fn exit_status(report: &DeploymentReport) -> u8 {
    u8::from(!report.succeeded())
}

async fn run(path: &Path, overrides: &CoordinatorOverrides, json: bool) -> Result<ExitCode> {
    let plan = load_plan(path)?;
    let config = resolve_config(&plan, overrides)?;

    let waves = plan.into_waves().context("Invalid deployment plan")?;
    let coordinator = WaveCoordinator::new(config);

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; cancelling run");
            cancel.cancel();
        }
    });

    let report = coordinator.run(waves).await.context("Run failed")?;
    if json {
        println!("{}", report.to_json().context("Failed to render report")?);
    } else {
        print_summary(&report);
    }

    Ok(ExitCode::from(exit_status(&report)))
}

fn check(path: &Path) -> Result<ExitCode> {
    let plan = load_plan(path)?;
    let config = resolve_config(&plan, &CoordinatorOverrides::default())?;

    let worker_count = plan.worker_count();
    let waves = plan.into_waves().context("Invalid deployment plan")?;
    println!(
        "{}: {} wave(s), {} worker(s), threshold {:.2}, max retries {}, version {}",
        path.display(),
        waves.len(),
        worker_count,
        config.threshold,
        config.max_retries,
        config.version
    );
    Ok(ExitCode::SUCCESS)
}

fn load_plan(path: &Path) -> Result<DeploymentPlan> {
    DeploymentPlan::load(path).with_context(|| format!("Failed to load plan {}", path.display()))
}

fn print_summary(report: &DeploymentReport) {
    println!("run {} ({})", report.run_id, report.version);
    for wave in &report.waves {
        let confidence = wave
            .aggregate_confidence
            .map_or_else(|| "-".to_string(), |c| format!("{c:.2}"));
        println!(
            "  wave {:>3}  {:<9} confidence {:>4}  attempts {}  failures {}",
            wave.number.get(),
            wave.state.as_str(),
            confidence,
            wave.attempts,
            wave.failure_count
        );
    }
    if let Some(reason) = &report.abort_reason {
        println!("  abort: {reason}");
    }
    println!(
        "{} ({}/{} waves, {} failure(s))",
        report.overall_status,
        report.waves.len(),
        report.planned_waves,
        report.total_failures
    );
}

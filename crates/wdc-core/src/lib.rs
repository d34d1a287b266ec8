//! WDC Core - Wave Deployment Coordinator
//!
//! Rolls a deployment out in ordered waves of workers:
//! - Deploys every worker of a wave concurrently
//! - Validates results and scores the wave's aggregate confidence
//! - Advances, holds for retry or aborts each wave against a threshold
//! - Aggregates the settled waves into a structured report
//!
//! # Example
//!
//! ```rust,ignore
//! use wdc_core::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let plan = DeploymentPlan::load("rollout.toml")?;
//! let config = plan.config(CoordinatorConfig::default());
//! let coordinator = WaveCoordinator::new(config);
//!
//! let report = coordinator.run(plan.into_waves()?).await?;
//! println!("{} after {} wave(s)", report.overall_status, report.waves.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod intelligence;
pub mod state_machine;
pub mod task;
pub mod telemetry;
pub mod types;
pub mod wave;
pub mod worker;

// Re-exports for convenience
pub use aggregator::{DeploymentReport, OverallStatus, ResultAggregator, WaveSummary};
pub use config::{
    CoordinatorConfig, CoordinatorOverrides, DeploymentPlan, PlanFormat, WavePlan,
    WorkerDefinition,
};
pub use coordinator::WaveCoordinator;
pub use error::{ConfigError, CoordinatorError, StateMachineError, TaskError, WorkerFault};
pub use events::{CoordinatorEvent, EventReceiver, EventSender};
pub use intelligence::{
    AnalysisContext, IntelligenceAnalyzer, IntelligenceReport, Pattern, ProcessStatus,
    ProcessedIntelligence,
};
pub use state_machine::{validate_transition, CoordinatorState, StateMachine};
pub use task::TaskSpec;
pub use types::{
    AbortReason, DeployResult, DeployStatus, RunId, Task, Validation, WaveNumber, WaveState,
    WorkerId, WorkerStatus,
};
pub use wave::{Wave, WaveOutcome, WaveRun};
pub use worker::{Colonel, Worker, WorkerSlot};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with WDC Core
    pub use crate::{
        Colonel, CoordinatorConfig, DeployResult, DeploymentPlan, DeploymentReport,
        IntelligenceAnalyzer, OverallStatus, Task, Validation, Wave, WaveCoordinator,
        WaveNumber, Worker, WorkerFault, WorkerId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

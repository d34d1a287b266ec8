//! Coordinator configuration and deployment plans
//!
//! [`CoordinatorConfig`] holds the numeric policy of a run. A
//! [`DeploymentPlan`] is the file form of a run: waves of worker definitions
//! plus optional coordinator overrides, parsed from TOML, YAML or JSON.

use crate::error::{ConfigError, CoordinatorError};
use crate::types::{Task, WaveNumber};
use crate::wave::{Wave, DEFAULT_MAX_RETRIES, DEFAULT_THRESHOLD};
use crate::worker::{Colonel, Worker, DEFAULT_RANK};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Version stamped on the report
    pub version: String,
    /// Minimum aggregate confidence to advance a wave
    pub threshold: f64,
    /// Retries for waves without their own limit
    pub max_retries: u32,
    /// Concurrent deploys per wave; unbounded when `None`
    pub max_concurrent_workers: Option<usize>,
    /// Deploys running longer become soft failures
    pub deploy_timeout_secs: Option<u64>,
}

impl CoordinatorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With confidence threshold
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// With default retry limit
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// With concurrency limit
    #[inline]
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrent_workers = Some(limit);
        self
    }

    /// With deploy timeout
    #[inline]
    #[must_use]
    pub fn with_deploy_timeout(mut self, secs: u64) -> Self {
        self.deploy_timeout_secs = Some(secs);
        self
    }

    /// With report version
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Deploy timeout as a duration
    #[inline]
    #[must_use]
    pub fn deploy_timeout(&self) -> Option<Duration> {
        self.deploy_timeout_secs.map(Duration::from_secs)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `ConfigError` for a threshold outside `[0, 1]`, a zero
    /// concurrency limit or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.max_concurrent_workers == Some(0) {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.deploy_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            version: crate::VERSION.to_string(),
            threshold: DEFAULT_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
            max_concurrent_workers: None,
            deploy_timeout_secs: None,
        }
    }
}

/// Partial configuration from a plan file or the command line
///
/// Only the fields that are set replace the matching field of a base
/// [`CoordinatorConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorOverrides {
    /// Report version
    pub version: Option<String>,
    /// Confidence threshold
    pub threshold: Option<f64>,
    /// Default retry limit
    pub max_retries: Option<u32>,
    /// Concurrency limit
    pub max_concurrent_workers: Option<usize>,
    /// Deploy timeout in seconds
    pub deploy_timeout_secs: Option<u64>,
}

impl CoordinatorOverrides {
    /// Overlay the set fields onto `base`
    #[must_use]
    pub fn apply(&self, mut base: CoordinatorConfig) -> CoordinatorConfig {
        if let Some(version) = &self.version {
            base.version.clone_from(version);
        }
        if let Some(threshold) = self.threshold {
            base.threshold = threshold;
        }
        if let Some(retries) = self.max_retries {
            base.max_retries = retries;
        }
        if self.max_concurrent_workers.is_some() {
            base.max_concurrent_workers = self.max_concurrent_workers;
        }
        if self.deploy_timeout_secs.is_some() {
            base.deploy_timeout_secs = self.deploy_timeout_secs;
        }
        base
    }
}

/// Worker entry in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerDefinition {
    /// Worker id, unique within its wave
    pub id: String,
    /// Display rank
    #[serde(default = "default_rank")]
    pub rank: String,
    /// Task handed to `deploy`
    pub task: Task,
}

fn default_rank() -> String {
    DEFAULT_RANK.to_string()
}

/// Wave entry in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WavePlan {
    /// Wave number (>= 1)
    pub number: u32,
    /// Wave-specific retry limit
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Workers in the wave
    #[serde(default)]
    pub workers: Vec<WorkerDefinition>,
}

/// Plan file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentPlan {
    /// Plan version; overrides the configured one
    #[serde(default)]
    pub version: Option<String>,
    /// Coordinator overrides
    #[serde(default)]
    pub coordinator: Option<CoordinatorOverrides>,
    /// Waves to run
    #[serde(default)]
    pub waves: Vec<WavePlan>,
}

/// Supported plan encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    /// `.toml`
    Toml,
    /// `.yaml` / `.yml`
    Yaml,
    /// `.json`
    Json,
}

impl PlanFormat {
    /// Detect format from a file extension
    ///
    /// # Errors
    /// Returns `ConfigError::UnsupportedFormat` for unknown extensions
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

impl DeploymentPlan {
    /// Load plan from disk; format follows the extension
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = PlanFormat::from_path(path)?;
        let raw = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), ?format, "loading plan");
        Self::parse(&raw, format)
    }

    /// Parse plan text
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` on invalid input
    pub fn parse(raw: &str, format: PlanFormat) -> Result<Self, ConfigError> {
        match format {
            PlanFormat::Toml => toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string())),
            PlanFormat::Yaml => {
                serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            PlanFormat::Json => {
                serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
            }
        }
    }

    /// Total workers across all waves
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.waves.iter().map(|w| w.workers.len()).sum()
    }

    /// Effective configuration: plan overrides on top of `base`
    #[must_use]
    pub fn config(&self, base: CoordinatorConfig) -> CoordinatorConfig {
        let mut config = match &self.coordinator {
            Some(overrides) => overrides.apply(base),
            None => base,
        };
        if let Some(version) = &self.version {
            config.version.clone_from(version);
        }
        config
    }

    /// Build `Colonel`-backed waves
    ///
    /// # Errors
    /// Returns `CoordinatorError` for a zero wave number, an empty wave or a
    /// duplicate worker id
    pub fn into_waves(self) -> Result<Vec<Wave>, CoordinatorError> {
        self.waves
            .into_iter()
            .map(|plan| -> Result<Wave, CoordinatorError> {
                let number = WaveNumber::new(plan.number)?;
                let members = plan.workers.into_iter().map(|def| {
                    let worker: Arc<dyn Worker> =
                        Arc::new(Colonel::new(def.id).with_rank(def.rank));
                    (worker, def.task)
                });
                let wave = Wave::new(number, members)?;
                Ok(match plan.max_retries {
                    Some(retries) => wave.with_max_retries(retries),
                    None => wave,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.version, crate::VERSION);
        assert_eq!(config.deploy_timeout(), None);
    }

    #[test]
    fn validate_rejects_out_of_range() {
        assert!(matches!(
            CoordinatorConfig::new().with_threshold(1.5).validate(),
            Err(ConfigError::InvalidThreshold(_))
        ));
        assert!(matches!(
            CoordinatorConfig::new().with_threshold(f64::NAN).validate(),
            Err(ConfigError::InvalidThreshold(_))
        ));
        assert!(matches!(
            CoordinatorConfig::new().with_max_concurrency(0).validate(),
            Err(ConfigError::ZeroConcurrency)
        ));
        assert!(matches!(
            CoordinatorConfig::new().with_deploy_timeout(0).validate(),
            Err(ConfigError::ZeroTimeout)
        ));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(PlanFormat::from_path(Path::new("a.toml")).unwrap(), PlanFormat::Toml);
        assert_eq!(PlanFormat::from_path(Path::new("a.YML")).unwrap(), PlanFormat::Yaml);
        assert_eq!(PlanFormat::from_path(Path::new("a.json")).unwrap(), PlanFormat::Json);
        assert!(PlanFormat::from_path(Path::new("plan")).is_err());
    }

    #[test]
    fn partial_coordinator_section_keeps_defaults() {
        let plan = DeploymentPlan::parse(
            r#"{"version": "2024.1", "coordinator": {"threshold": 0.5}, "waves": []}"#,
            PlanFormat::Json,
        )
        .unwrap();
        let config = plan.config(CoordinatorConfig::default());
        assert!((config.threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.version, "2024.1");
    }

    #[test]
    fn plan_section_overlays_base_instead_of_defaults() {
        let plan = DeploymentPlan::parse(
            "[coordinator]\nthreshold = 0.6\n",
            PlanFormat::Toml,
        )
        .unwrap();
        let base = CoordinatorConfig::new()
            .with_max_retries(4)
            .with_max_concurrency(2)
            .with_version("base");

        let config = plan.config(base);
        assert!((config.threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.max_concurrent_workers, Some(2));
        assert_eq!(config.version, "base");
    }

    #[test]
    fn overrides_reject_unknown_keys() {
        assert!(DeploymentPlan::parse(
            r#"{"coordinator": {"treshold": 0.5}, "waves": []}"#,
            PlanFormat::Json,
        )
        .is_err());
    }

    #[test]
    fn into_waves_builds_colonels() {
        let plan = DeploymentPlan::parse(
            r#"
            [[waves]]
            number = 1
            max_retries = 3

            [[waves.workers]]
            id = "alpha"
            task = { action = "rollout", target = "eu-west" }

            [[waves.workers]]
            id = "bravo"
            rank = "Major"
            task = { action = "rollout" }
            "#,
            PlanFormat::Toml,
        )
        .unwrap();
        assert_eq!(plan.worker_count(), 2);

        let waves = plan.into_waves().unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].max_retries(), Some(3));
        assert_eq!(waves[0].workers()[0].rank(), DEFAULT_RANK);
        assert_eq!(waves[0].workers()[1].rank(), "Major");
    }

    #[test]
    fn into_waves_rejects_bad_numbers_and_empty_waves() {
        let zero = DeploymentPlan::parse(
            r#"{"waves": [{"number": 0, "workers": [{"id": "a", "task": {}}]}]}"#,
            PlanFormat::Json,
        )
        .unwrap();
        assert!(matches!(
            zero.into_waves(),
            Err(CoordinatorError::InvalidWaveNumber(0))
        ));

        let empty = DeploymentPlan::parse("waves:\n  - number: 1\n", PlanFormat::Yaml).unwrap();
        assert!(matches!(
            empty.into_waves(),
            Err(CoordinatorError::EmptyWave(_))
        ));
    }
}

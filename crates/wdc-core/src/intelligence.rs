//! Intelligence analysis
//!
//! Converts a wave's deploy and validation results into an
//! [`IntelligenceReport`]: a confidence score plus pattern and
//! recommendation annotations.
//!
//! # Confidence policy
//!
//! A worker counts as failed when its deploy failed or its validation was
//! rejected. Each failure costs `1.0 / worker_count`, floored at 0.0. The
//! score is computed as `(n - failures) / n`, so it depends only on the set
//! of workers observed, never on the order results arrived in.

use crate::types::{DeployResult, Validation, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Detected pattern tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pattern {
    /// Every worker deployed and validated
    CleanSweep,
    /// At least one deploy failed
    DeployFailures,
    /// At least one deploy succeeded but failed validation
    ValidationDegraded,
    /// More than half of the workers failed, but not all
    MajorityFailure,
    /// Every worker failed
    TotalFailure,
    /// Confidence is lower than the previous report's
    ConfidenceDeclining,
    /// Confidence is higher than the previous report's
    ConfidenceRecovering,
}

impl Pattern {
    /// Get pattern tag
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CleanSweep => "clean-sweep",
            Self::DeployFailures => "deploy-failures",
            Self::ValidationDegraded => "validation-degraded",
            Self::MajorityFailure => "majority-failure",
            Self::TotalFailure => "total-failure",
            Self::ConfidenceDeclining => "confidence-declining",
            Self::ConfidenceRecovering => "confidence-recovering",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis output for one wave attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceReport {
    /// Confidence score in [0.0, 1.0]
    pub confidence: f64,
    /// Detected patterns, in declaration order of [`Pattern`]
    pub patterns: Vec<Pattern>,
    /// Advisory notes
    pub recommendations: Vec<String>,
}

impl IntelligenceReport {
    /// Check whether a pattern was detected
    #[inline]
    #[must_use]
    pub fn has_pattern(&self, pattern: Pattern) -> bool {
        self.patterns.contains(&pattern)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Observation {
    deploy_failed: bool,
    degraded: bool,
}

impl Observation {
    fn failed(self) -> bool {
        self.deploy_failed || self.degraded
    }
}

/// Input to [`IntelligenceAnalyzer::analyze`]
///
/// Observations are keyed by worker id. Feeding the same worker twice keeps
/// it failed if either observation failed, so the context is the same no
/// matter which order results were added in.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    observations: BTreeMap<WorkerId, Observation>,
    prior: Vec<IntelligenceReport>,
}

impl AnalysisContext {
    /// Create empty context
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from deploy results and their validations
    #[must_use]
    pub fn from_results<'a, I>(results: I, validations: &BTreeMap<WorkerId, Validation>) -> Self
    where
        I: IntoIterator<Item = &'a DeployResult>,
    {
        results.into_iter().fold(Self::new(), |ctx, result| {
            ctx.with_result(result, validations.get(&result.worker_id))
        })
    }

    /// Add one deploy result, optionally with its validation
    #[must_use]
    pub fn with_result(mut self, result: &DeployResult, validation: Option<&Validation>) -> Self {
        let observed = Observation {
            deploy_failed: result.is_failed(),
            degraded: !result.is_failed() && validation.is_some_and(|v| !v.valid),
        };
        let entry = self.observations.entry(result.worker_id.clone()).or_default();
        entry.deploy_failed |= observed.deploy_failed;
        entry.degraded |= observed.degraded;
        self
    }

    /// With earlier reports for the same wave, oldest first
    #[must_use]
    pub fn with_prior<I>(mut self, reports: I) -> Self
    where
        I: IntoIterator<Item = IntelligenceReport>,
    {
        self.prior.extend(reports);
        self
    }

    /// Number of distinct workers observed
    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.observations.len()
    }

    /// Ids of failed workers, sorted
    #[must_use]
    pub fn failed_workers(&self) -> BTreeSet<&WorkerId> {
        self.observations
            .iter()
            .filter(|(_, o)| o.failed())
            .map(|(id, _)| id)
            .collect()
    }

    fn ids_where(&self, pred: impl Fn(&Observation) -> bool) -> Vec<&str> {
        self.observations
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Result of [`IntelligenceAnalyzer::process`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessStatus {
    /// Analysis ran and its report is attached
    Processed,
}

/// Tagged analysis outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedIntelligence {
    /// Always `processed`
    pub status: ProcessStatus,
    /// The analysis report
    pub results: IntelligenceReport,
}

/// Deterministic confidence and pattern analyzer
#[derive(Debug, Clone, Default)]
pub struct IntelligenceAnalyzer;

impl IntelligenceAnalyzer {
    /// Create analyzer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Analyze a wave's results
    #[must_use]
    pub fn analyze(&self, context: &AnalysisContext) -> IntelligenceReport {
        let n = context.worker_count();
        let failures = context.failed_workers().len();
        let confidence = confidence(n, failures);

        let deploy_failed = context.ids_where(|o| o.deploy_failed);
        let degraded = context.ids_where(|o| o.degraded && !o.deploy_failed);
        let previous = context.prior.last().map(|r| r.confidence);

        let mut patterns = Vec::new();
        let mut recommendations = Vec::new();

        if n == 0 {
            recommendations.push("no deploy results to analyze".to_string());
        }
        if n > 0 && failures == 0 {
            patterns.push(Pattern::CleanSweep);
        }
        if !deploy_failed.is_empty() {
            patterns.push(Pattern::DeployFailures);
            recommendations.push(format!("redeploy failed workers: {}", deploy_failed.join(", ")));
        }
        if !degraded.is_empty() {
            patterns.push(Pattern::ValidationDegraded);
            recommendations.push(format!("review validation checks on: {}", degraded.join(", ")));
        }
        if failures * 2 > n && failures < n {
            patterns.push(Pattern::MajorityFailure);
        }
        if n > 0 && failures == n {
            patterns.push(Pattern::TotalFailure);
            recommendations
                .push("every worker failed; inspect task definitions before retrying".to_string());
        }
        match previous {
            Some(prev) if confidence < prev => {
                patterns.push(Pattern::ConfidenceDeclining);
                recommendations.push(format!(
                    "confidence fell from {prev:.2} to {confidence:.2}; consider halting the rollout"
                ));
            }
            Some(prev) if confidence > prev => patterns.push(Pattern::ConfidenceRecovering),
            _ => {}
        }

        IntelligenceReport {
            confidence,
            patterns,
            recommendations,
        }
    }

    /// Analyze and tag the outcome as processed
    #[inline]
    #[must_use]
    pub fn process(&self, context: &AnalysisContext) -> ProcessedIntelligence {
        ProcessedIntelligence {
            status: ProcessStatus::Processed,
            results: self.analyze(context),
        }
    }
}

/// `1.0 - failures * (1.0 / n)`, floored at 0.0; 0.0 when nothing was observed
#[must_use]
pub fn confidence(worker_count: usize, failures: usize) -> f64 {
    if worker_count == 0 {
        return 0.0;
    }
    let passed = worker_count.saturating_sub(failures);
    #[allow(clippy::cast_precision_loss)]
    let score = passed as f64 / worker_count as f64;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WaveNumber;
    use serde_json::json;

    fn ok(id: &str) -> DeployResult {
        DeployResult::deployed(id.into(), WaveNumber::first(), json!({}))
    }

    fn failed(id: &str) -> DeployResult {
        DeployResult::failed(id.into(), WaveNumber::first(), json!({"error": "boom"}))
    }

    #[test]
    fn confidence_policy() {
        assert_eq!(confidence(4, 0), 1.0);
        assert_eq!(confidence(4, 1), 0.75);
        assert_eq!(confidence(2, 1), 0.5);
        assert_eq!(confidence(3, 5), 0.0);
        assert_eq!(confidence(0, 0), 0.0);
    }

    #[test]
    fn clean_sweep() {
        let ctx = AnalysisContext::new()
            .with_result(&ok("a"), None)
            .with_result(&ok("b"), None);
        let report = IntelligenceAnalyzer::new().analyze(&ctx);

        assert_eq!(report.confidence, 1.0);
        assert_eq!(report.patterns, vec![Pattern::CleanSweep]);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn degraded_validation_counts_as_failure() {
        let mut validations = BTreeMap::new();
        validations.insert(WorkerId::from("b"), Validation::rejected("payload-object"));
        let results = [ok("a"), ok("b")];

        let ctx = AnalysisContext::from_results(&results, &validations);
        let report = IntelligenceAnalyzer::new().analyze(&ctx);

        assert_eq!(report.confidence, 0.5);
        assert_eq!(report.patterns, vec![Pattern::ValidationDegraded]);
        assert_eq!(report.recommendations, vec!["review validation checks on: b"]);
    }

    #[test]
    fn failed_workers_are_listed_sorted() {
        let ctx = AnalysisContext::new()
            .with_result(&failed("zulu"), None)
            .with_result(&ok("bravo"), None)
            .with_result(&failed("alpha"), None);
        let report = IntelligenceAnalyzer::new().analyze(&ctx);

        assert!(report.has_pattern(Pattern::DeployFailures));
        assert!(report.has_pattern(Pattern::MajorityFailure));
        assert!(!report.has_pattern(Pattern::TotalFailure));
        assert_eq!(report.recommendations[0], "redeploy failed workers: alpha, zulu");
    }

    #[test]
    fn total_failure() {
        let ctx = AnalysisContext::new().with_result(&failed("a"), None);
        let report = IntelligenceAnalyzer::new().analyze(&ctx);

        assert_eq!(report.confidence, 0.0);
        assert!(report.has_pattern(Pattern::TotalFailure));
        assert!(!report.has_pattern(Pattern::MajorityFailure));
    }

    #[test]
    fn duplicate_observation_keeps_failure() {
        let forward = AnalysisContext::new()
            .with_result(&failed("a"), None)
            .with_result(&ok("a"), None);
        let backward = AnalysisContext::new()
            .with_result(&ok("a"), None)
            .with_result(&failed("a"), None);

        let analyzer = IntelligenceAnalyzer::new();
        assert_eq!(analyzer.analyze(&forward), analyzer.analyze(&backward));
        assert_eq!(forward.worker_count(), 1);
    }

    #[test]
    fn trend_against_prior_report() {
        let analyzer = IntelligenceAnalyzer::new();
        let first = analyzer.analyze(
            &AnalysisContext::new()
                .with_result(&ok("a"), None)
                .with_result(&failed("b"), None),
        );

        let recovered = analyzer.analyze(
            &AnalysisContext::new()
                .with_result(&ok("a"), None)
                .with_result(&ok("b"), None)
                .with_prior([first.clone()]),
        );
        assert!(recovered.has_pattern(Pattern::ConfidenceRecovering));

        let worse = analyzer.analyze(
            &AnalysisContext::new()
                .with_result(&failed("a"), None)
                .with_result(&failed("b"), None)
                .with_prior([first]),
        );
        assert!(worse.has_pattern(Pattern::ConfidenceDeclining));
        assert!(worse
            .recommendations
            .iter()
            .any(|r| r.contains("0.50 to 0.00")));
    }

    #[test]
    fn empty_context() {
        let report = IntelligenceAnalyzer::new().analyze(&AnalysisContext::new());
        assert_eq!(report.confidence, 0.0);
        assert!(report.patterns.is_empty());
        assert_eq!(report.recommendations, vec!["no deploy results to analyze"]);
    }

    #[test]
    fn process_tags_outcome() {
        let ctx = AnalysisContext::new().with_result(&ok("a"), None);
        let processed = IntelligenceAnalyzer::new().process(&ctx);
        assert_eq!(processed.status, ProcessStatus::Processed);
        assert_eq!(processed.results.confidence, 1.0);
    }
}

//! Shared types used across Launchpad crates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a model artifact.
pub type ArtifactId = String;

/// Immutable record of a trained model, as produced by the export pipeline.
///
/// Metrics are optional on the wire: a missing metric is a failed check,
/// never a pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelArtifact {
    pub id: ArtifactId,
    pub version: String,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub f1: Option<f64>,
    #[serde(default)]
    pub latency_p95_ms: Option<f64>,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the artifact payload.
    pub checksum: String,
    /// Unix timestamp (seconds) when the artifact was exported.
    pub created_at: u64,
}

/// Versioned release thresholds, owned by the release operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdPolicy {
    pub version: String,
    pub min_accuracy: f64,
    pub min_f1: f64,
    pub max_latency_ms: f64,
    /// Canary abort threshold as a fraction (0.0–1.0).
    pub canary_max_error_rate: f64,
    pub max_size_bytes: Option<u64>,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            version: "default".to_string(),
            min_accuracy: 0.88,
            min_f1: 0.85,
            max_latency_ms: 250.0,
            canary_max_error_rate: 0.05,
            max_size_bytes: None,
        }
    }
}

/// How a validated artifact is promoted into the serving fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Jump the new version straight to 100%.
    Rolling,
    /// Shift traffic in observed steps.
    Canary,
    /// Stage green dark, smoke test it, then switch atomically.
    BlueGreen,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Rolling => "rolling",
            StrategyKind::Canary => "canary",
            StrategyKind::BlueGreen => "blue_green",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One traffic step of a deployment plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStep {
    /// Share of live traffic for the new version (0–100).
    pub weight_percent: u8,
    /// Seconds to observe before the next step.
    pub min_observe_secs: u64,
}

impl TrafficStep {
    pub fn new(weight_percent: u8, min_observe_secs: u64) -> Self {
        Self {
            weight_percent,
            min_observe_secs,
        }
    }
}

/// Reasons a set of traffic steps is not a valid plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("canary plan has no steps")]
    NoSteps,
    #[error("step {index} has weight {weight}%, above 100%")]
    WeightOutOfRange { index: usize, weight: u8 },
    #[error("step {index} lowers weight from {previous}% to {weight}%")]
    DecreasingWeight { index: usize, previous: u8, weight: u8 },
    #[error("namespace must not be empty")]
    EmptyNamespace,
}

/// Build the step sequence for a strategy.
///
/// Rolling and Blue/Green have fixed single-step shapes; Canary takes the
/// supplied steps, which must be non-empty, within 0–100 and
/// non-decreasing.
pub fn plan_steps(
    strategy: StrategyKind,
    canary_steps: &[TrafficStep],
) -> Result<Vec<TrafficStep>, PlanError> {
    match strategy {
        StrategyKind::Rolling => Ok(vec![TrafficStep::new(100, 0)]),
        StrategyKind::BlueGreen => Ok(vec![TrafficStep::new(0, 0)]),
        StrategyKind::Canary => {
            if canary_steps.is_empty() {
                return Err(PlanError::NoSteps);
            }
            let mut previous = 0u8;
            for (index, step) in canary_steps.iter().enumerate() {
                if step.weight_percent > 100 {
                    return Err(PlanError::WeightOutOfRange {
                        index,
                        weight: step.weight_percent,
                    });
                }
                if step.weight_percent < previous {
                    return Err(PlanError::DecreasingWeight {
                        index,
                        previous,
                        weight: step.weight_percent,
                    });
                }
                previous = step.weight_percent;
            }
            Ok(canary_steps.to_vec())
        }
    }
}

/// Handle to a model version registered with the serving cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHandle {
    pub id: String,
    pub artifact_id: ArtifactId,
    pub namespace: String,
    /// Direct address (host:port) of the version's pods, bypassing the
    /// load balancer.
    pub endpoint: String,
}

/// Health as reported by the serving cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

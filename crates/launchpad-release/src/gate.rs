//! Validation gate. Decides whether an artifact may be deployed.
//!
//! The gate is a pure function of the artifact's declared metrics and the
//! threshold policy. It fails closed: a missing or NaN metric is a failed
//! check. Checksum verification happens before the gate is consulted.

use launchpad_core::{
    ArtifactRegistry, ModelArtifact, ThresholdPolicy, epoch_millis, fetch_verified,
};
use launchpad_state::ValidationReport;
use uuid::Uuid;

use crate::error::ValidationError;

/// Every failed check, in the fixed order accuracy, f1, latency_p95_ms,
/// size_bytes.
pub fn check(artifact: &ModelArtifact, policy: &ThresholdPolicy) -> Vec<ValidationError> {
    let mut failures = Vec::new();

    // NaN compares false, so `matches!` with a guard fails closed.
    if !matches!(artifact.accuracy, Some(a) if a >= policy.min_accuracy) {
        failures.push(ValidationError::MetricBelowThreshold {
            check: "accuracy",
            actual: artifact.accuracy,
            limit: policy.min_accuracy,
        });
    }
    if !matches!(artifact.f1, Some(f) if f >= policy.min_f1) {
        failures.push(ValidationError::MetricBelowThreshold {
            check: "f1",
            actual: artifact.f1,
            limit: policy.min_f1,
        });
    }
    if !matches!(artifact.latency_p95_ms, Some(l) if l <= policy.max_latency_ms) {
        failures.push(ValidationError::MetricBelowThreshold {
            check: "latency_p95_ms",
            actual: artifact.latency_p95_ms,
            limit: policy.max_latency_ms,
        });
    }
    if let Some(max) = policy.max_size_bytes.filter(|max| artifact.size_bytes > *max) {
        failures.push(ValidationError::MetricBelowThreshold {
            check: "size_bytes",
            actual: Some(artifact.size_bytes as f64),
            limit: max as f64,
        });
    }

    failures
}

/// Build the report for one validation attempt.
pub fn validate_at(
    artifact: &ModelArtifact,
    policy: &ThresholdPolicy,
    report_id: String,
    evaluated_at: u64,
) -> ValidationReport {
    let failed_checks: Vec<String> = check(artifact, policy)
        .iter()
        .map(|e| e.check_name().to_string())
        .collect();
    ValidationReport {
        report_id,
        artifact_id: artifact.id.clone(),
        policy_version: policy.version.clone(),
        passed: failed_checks.is_empty(),
        failed_checks,
        evaluated_at,
        execution_id: None,
    }
}

/// [`validate_at`] with a fresh report id and the current time.
pub fn validate(artifact: &ModelArtifact, policy: &ThresholdPolicy) -> ValidationReport {
    validate_at(artifact, policy, Uuid::new_v4().to_string(), epoch_millis())
}

/// Report for an artifact whose payload did not match its checksum, or
/// that could not be read at all.
pub fn corrupt_report(
    artifact_id: &str,
    policy: &ThresholdPolicy,
    error: &ValidationError,
) -> ValidationReport {
    ValidationReport {
        report_id: Uuid::new_v4().to_string(),
        artifact_id: artifact_id.to_string(),
        policy_version: policy.version.clone(),
        passed: false,
        failed_checks: vec![error.check_name().to_string()],
        evaluated_at: epoch_millis(),
        execution_id: None,
    }
}

/// Verify the artifact's checksum, then run the gate.
///
/// Returns the report together with every failure. An artifact that cannot
/// be fetched or verified yields a single `CorruptArtifact`.
pub async fn evaluate(
    registry: &dyn ArtifactRegistry,
    artifact_id: &str,
    policy: &ThresholdPolicy,
) -> (ValidationReport, Vec<ValidationError>) {
    match fetch_verified(registry, artifact_id).await {
        Ok(artifact) => (validate(&artifact, policy), check(&artifact, policy)),
        Err(e) => {
            let error = ValidationError::CorruptArtifact(e.to_string());
            (corrupt_report(artifact_id, policy, &error), vec![error])
        }
    }
}

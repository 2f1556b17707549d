//! Error types of the release engine.
//!
//! Validation, deployment, and smoke errors never escape an execution:
//! the orchestrator turns them into state transitions. Only
//! [`RollbackError`] reaches the alert sink, and only [`ReleaseError`] is
//! returned to callers of the orchestrator.

use thiserror::Error;

use launchpad_core::PlanError;
use launchpad_state::{ExecutionState, RollbackFailure, StateError};
use launchpad_traffic::TrafficError;

/// Why an artifact was refused before it reached the cluster.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{check}: {} (limit {limit})", describe(.actual))]
    MetricBelowThreshold {
        check: &'static str,
        actual: Option<f64>,
        limit: f64,
    },

    #[error("corrupt artifact: {0}")]
    CorruptArtifact(String),
}

fn describe(actual: &Option<f64>) -> String {
    match actual {
        Some(v) if v.is_nan() => "metric is NaN".to_string(),
        Some(v) => format!("observed {v}"),
        None => "metric missing".to_string(),
    }
}

impl ValidationError {
    /// Name recorded in a report's `failed_checks`.
    pub fn check_name(&self) -> &'static str {
        match self {
            ValidationError::MetricBelowThreshold { check, .. } => *check,
            ValidationError::CorruptArtifact(_) => "checksum",
        }
    }
}

/// A cluster call that failed for good.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeploymentError {
    #[error("{0} timed out")]
    Timeout(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("controller unreachable: {0}")]
    ControllerUnreachable(String),

    /// Refused by the controller; retrying would not help.
    #[error("controller refused the call: {0}")]
    Rejected(String),
}

impl From<TrafficError> for DeploymentError {
    fn from(e: TrafficError) -> Self {
        match e {
            TrafficError::Unreachable(m) => DeploymentError::ControllerUnreachable(m),
            TrafficError::Timeout => DeploymentError::Timeout("controller call".to_string()),
            TrafficError::ResourceUnavailable(m) => DeploymentError::ResourceUnavailable(m),
            TrafficError::NotFound(m) => DeploymentError::Rejected(format!("not found: {m}")),
            TrafficError::Rejected(m) => DeploymentError::Rejected(m),
        }
    }
}

/// The namespace could not be returned to its last known good version.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RollbackError {
    #[error("previous version unavailable: {0}")]
    PreviousVersionUnavailable(String),

    #[error("controller unreachable during rollback: {0}")]
    ControllerUnreachable(String),
}

impl RollbackError {
    pub fn failure(&self) -> RollbackFailure {
        match self {
            RollbackError::PreviousVersionUnavailable(_) => {
                RollbackFailure::PreviousVersionUnavailable
            }
            RollbackError::ControllerUnreachable(_) => RollbackFailure::ControllerUnreachable,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            RollbackError::PreviousVersionUnavailable(d)
            | RollbackError::ControllerUnreachable(d) => d,
        }
    }
}

/// Errors returned by the orchestrator's public operations.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error("execution not found: {0}")]
    NotFound(String),

    #[error("execution {id} already finished as {state}")]
    AlreadyTerminal { id: String, state: ExecutionState },
}

/// Result type alias for orchestrator operations.
pub type ReleaseResult<T> = Result<T, ReleaseError>;

//! Domain types for the Launchpad state store.
//!
//! These types represent the persisted state of releases: plans,
//! executions and their transitions, validation reports, smoke results,
//! namespace leases, and live versions.

use serde::{Deserialize, Serialize};

use launchpad_core::{ArtifactId, StrategyKind, ThresholdPolicy, TrafficStep, VersionHandle};

/// Unique identifier for a deployment execution.
pub type ExecutionId = String;

/// Unique identifier for a deployment plan.
pub type PlanId = String;

// ── Plan ──────────────────────────────────────────────────────────

/// Immutable plan for one execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentPlan {
    pub id: PlanId,
    pub strategy: StrategyKind,
    pub steps: Vec<TrafficStep>,
    pub target_namespace: String,
}

// ── Execution ─────────────────────────────────────────────────────

/// Lifecycle state of a deployment execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Validating,
    Rejected,
    Deploying,
    SmokeTesting,
    Promoting,
    Completed,
    RollingBack,
    RolledBack,
    Failed,
}

impl ExecutionState {
    pub const ALL: [ExecutionState; 10] = [
        ExecutionState::Pending,
        ExecutionState::Validating,
        ExecutionState::Rejected,
        ExecutionState::Deploying,
        ExecutionState::SmokeTesting,
        ExecutionState::Promoting,
        ExecutionState::Completed,
        ExecutionState::RollingBack,
        ExecutionState::RolledBack,
        ExecutionState::Failed,
    ];

    /// Terminal states are immutable once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Rejected
                | ExecutionState::Completed
                | ExecutionState::RolledBack
                | ExecutionState::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(&self, to: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, to),
            (Pending, Validating)
                | (Pending, Rejected)
                | (Validating, Rejected)
                | (Validating, Deploying)
                | (Deploying, SmokeTesting)
                | (Deploying, RollingBack)
                | (SmokeTesting, Promoting)
                | (SmokeTesting, RollingBack)
                | (Promoting, Completed)
                | (Promoting, RollingBack)
                | (RollingBack, RolledBack)
                | (RollingBack, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Validating => "validating",
            ExecutionState::Rejected => "rejected",
            ExecutionState::Deploying => "deploying",
            ExecutionState::SmokeTesting => "smoke_testing",
            ExecutionState::Promoting => "promoting",
            ExecutionState::Completed => "completed",
            ExecutionState::RollingBack => "rolling_back",
            ExecutionState::RolledBack => "rolled_back",
            ExecutionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an execution's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    /// Position in the history, starting at 0.
    pub seq: u32,
    pub from: ExecutionState,
    pub to: ExecutionState,
    /// Unix timestamp (milliseconds).
    pub at: u64,
    pub reason: String,
}

/// Why a rollback could not restore the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackFailure {
    PreviousVersionUnavailable,
    ControllerUnreachable,
}

/// Final result of a rollback, persisted so re-running it is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// Traffic is back on `restored` (or nothing, for a first release) and
    /// the candidate is deregistered.
    Reverted { restored: Option<String> },
    /// The namespace could not be restored; an operator must intervene.
    Failed {
        failure: RollbackFailure,
        detail: String,
    },
}

/// The aggregate root of one release attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentExecution {
    pub id: ExecutionId,
    pub plan_id: PlanId,
    pub artifact_id: ArtifactId,
    pub target_namespace: String,
    pub strategy: StrategyKind,
    pub state: ExecutionState,
    /// Index of the next traffic step to apply.
    pub current_step_index: u32,
    /// Policy in force for this execution (default or request override).
    pub policy: ThresholdPolicy,
    /// Version live before this execution began; the rollback target.
    pub previous_version: Option<VersionHandle>,
    /// Version registered for this execution, once registration succeeded.
    pub candidate_version: Option<VersionHandle>,
    pub abort_requested: bool,
    pub rollback_outcome: Option<RollbackOutcome>,
    /// Loaded from the transition log; not stored in the execution row.
    #[serde(default)]
    pub history: Vec<StateTransition>,
    /// Unix timestamp (milliseconds).
    pub started_at: u64,
    pub completed_at: Option<u64>,
}

impl DeploymentExecution {
    /// Reason attached to the most recent transition, if any.
    pub fn last_reason(&self) -> Option<&str> {
        self.history.last().map(|t| t.reason.as_str())
    }
}

// ── Validation ────────────────────────────────────────────────────

/// Outcome of one validation attempt. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub report_id: String,
    pub artifact_id: ArtifactId,
    pub policy_version: String,
    pub passed: bool,
    pub failed_checks: Vec<String>,
    /// Unix timestamp (milliseconds).
    pub evaluated_at: u64,
    /// Execution that requested the validation, if any.
    #[serde(default)]
    pub execution_id: Option<ExecutionId>,
}

impl ValidationReport {
    /// Build the composite key for the reports table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.artifact_id, self.report_id)
    }
}

// ── Smoke ─────────────────────────────────────────────────────────

/// Result of one smoke probe invocation. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmokeTestResult {
    pub execution_id: ExecutionId,
    /// Battery version that produced this result.
    pub suite_version: String,
    pub test_name: String,
    pub passed: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

// ── Leases and live versions ──────────────────────────────────────

/// Exclusive, TTL-bounded claim on a namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamespaceLease {
    pub namespace: String,
    pub execution_id: ExecutionId,
    /// Orchestrator instance that holds the lease.
    pub holder: String,
    /// Unix timestamp (milliseconds) after which the lease is free.
    pub expires_at_ms: u64,
}

impl NamespaceLease {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

/// Version currently serving 100% of a namespace's traffic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveVersion {
    pub namespace: String,
    pub version: VersionHandle,
    pub execution_id: ExecutionId,
    /// Unix timestamp (milliseconds).
    pub promoted_at: u64,
}

//! Rollback manager.
//!
//! Returns a namespace to the version that was live before the execution
//! began: that version is set back to 100% and the candidate is
//! deregistered. The outcome is persisted on the execution, so running the
//! rollback again (after a crash, or from a second caller) returns the
//! stored outcome without touching the cluster.

use std::sync::Arc;

use tracing::{info, warn};

use launchpad_core::{HealthStatus, VersionHandle};
use launchpad_state::{DeploymentExecution, RollbackOutcome, StateResult, StateStore};
use launchpad_traffic::{TrafficController, TrafficError};

use crate::error::{DeploymentError, RollbackError};
use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct RollbackManager {
    controller: Arc<dyn TrafficController>,
    store: StateStore,
    retry: RetryPolicy,
}

impl RollbackManager {
    pub fn new(
        controller: Arc<dyn TrafficController>,
        store: StateStore,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            controller,
            store,
            retry,
        }
    }

    /// Revert the namespace and persist the outcome on `execution`.
    ///
    /// Only store failures are returned as errors; a rollback that could
    /// not restore the namespace is a `RollbackOutcome::Failed`.
    pub async fn rollback(
        &self,
        execution: &mut DeploymentExecution,
    ) -> StateResult<RollbackOutcome> {
        if let Some(outcome) = &execution.rollback_outcome {
            info!(execution = %execution.id, "rollback already completed");
            return Ok(outcome.clone());
        }

        let outcome = match self.revert(execution).await {
            Ok(restored) => {
                info!(
                    execution = %execution.id,
                    namespace = %execution.target_namespace,
                    restored = restored.as_deref().unwrap_or("none"),
                    "namespace reverted"
                );
                RollbackOutcome::Reverted { restored }
            }
            Err(e) => {
                warn!(execution = %execution.id, error = %e, "rollback failed");
                RollbackOutcome::Failed {
                    failure: e.failure(),
                    detail: e.detail().to_string(),
                }
            }
        };

        execution.rollback_outcome = Some(outcome.clone());
        self.store.checkpoint_execution(execution)?;
        Ok(outcome)
    }

    async fn revert(
        &self,
        execution: &DeploymentExecution,
    ) -> Result<Option<String>, RollbackError> {
        let namespace = execution.target_namespace.as_str();

        let restored = match &execution.previous_version {
            Some(previous) => {
                self.ensure_available(previous).await?;
                self.retry
                    .run("restore_weight", || {
                        self.controller.set_weight(namespace, previous, 100)
                    })
                    .await
                    .map_err(|e| unreachable_or_unavailable(previous, e))?;
                Some(previous.id.clone())
            }
            None => None,
        };

        if let Some(candidate) = &execution.candidate_version {
            self.deregister_candidate(namespace, candidate).await?;
        }
        Ok(restored)
    }

    async fn ensure_available(&self, previous: &VersionHandle) -> Result<(), RollbackError> {
        let health = self
            .retry
            .run("previous_health", || self.controller.health_check(previous))
            .await
            .map_err(|e| unreachable_or_unavailable(previous, e))?;
        match health {
            HealthStatus::Unhealthy => Err(RollbackError::PreviousVersionUnavailable(format!(
                "{} reports unhealthy",
                previous.id
            ))),
            // Unknown usually means the health endpoint is lagging; the
            // version can still take traffic.
            HealthStatus::Healthy | HealthStatus::Unknown => Ok(()),
        }
    }

    async fn deregister_candidate(
        &self,
        namespace: &str,
        candidate: &VersionHandle,
    ) -> Result<(), RollbackError> {
        let result = self
            .retry
            .run("deregister_candidate", || async move {
                match self.controller.deregister_version(namespace, candidate).await {
                    // Already gone counts as done.
                    Err(TrafficError::NotFound(_)) => Ok(()),
                    other => other,
                }
            })
            .await;
        result.map_err(|e| RollbackError::ControllerUnreachable(e.to_string()))
    }
}

fn unreachable_or_unavailable(previous: &VersionHandle, error: DeploymentError) -> RollbackError {
    match error {
        DeploymentError::Rejected(detail) => {
            RollbackError::PreviousVersionUnavailable(format!("{}: {detail}", previous.id))
        }
        other => RollbackError::ControllerUnreachable(other.to_string()),
    }
}

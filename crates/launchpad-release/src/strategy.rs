//! Deployment strategies.
//!
//! A strategy is the sequence of traffic changes applied to the candidate
//! during `Deploying`, plus the final switch and cleanup during
//! `Promoting`. Progress (registered candidate, completed steps) is
//! checkpointed on the execution, so a resumed driver picks up after the
//! last completed step and never registers the candidate twice.
//!
//! ```text
//! Rolling     register → 100%
//! Canary      register → step₀ → observe → … → stepₙ → observe
//! BlueGreen   register (0%) → wait healthy
//!
//! promote     candidate 100% → [drain grace, BlueGreen] → deregister previous
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use launchpad_core::config::BlueGreenConfig;
use launchpad_core::{HealthStatus, StrategyKind, VersionHandle};
use launchpad_state::{DeploymentExecution, DeploymentPlan, StateResult, StateStore};
use launchpad_traffic::{TrafficController, TrafficError};

use crate::abort::AbortSignal;
use crate::error::DeploymentError;
use crate::retry::RetryPolicy;

/// What the driver should do after a phase.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    /// Move to the next state.
    Advance,
    /// Revert the namespace, with the reason recorded on the transition.
    RollBack(String),
    /// The operator aborted while the phase was waiting.
    Aborted,
}

#[derive(Clone)]
pub struct StrategyRunner {
    controller: Arc<dyn TrafficController>,
    store: StateStore,
    retry: RetryPolicy,
    blue_green: BlueGreenConfig,
}

impl StrategyRunner {
    pub fn new(
        controller: Arc<dyn TrafficController>,
        store: StateStore,
        retry: RetryPolicy,
        blue_green: BlueGreenConfig,
    ) -> Self {
        Self {
            controller,
            store,
            retry,
            blue_green,
        }
    }

    /// Register the candidate (unless already registered) and apply the
    /// plan's traffic steps.
    pub async fn deploy(
        &self,
        execution: &mut DeploymentExecution,
        plan: &DeploymentPlan,
        abort: &AbortSignal,
    ) -> StateResult<PhaseOutcome> {
        let candidate = match execution.candidate_version.clone() {
            Some(candidate) => {
                debug!(
                    execution = %execution.id,
                    version = %candidate.id,
                    "candidate already registered"
                );
                candidate
            }
            None => {
                let namespace = execution.target_namespace.as_str();
                let artifact = execution.artifact_id.as_str();
                let registered = self
                    .retry
                    .run("register_version", || {
                        self.controller.register_version(namespace, artifact)
                    })
                    .await;
                let candidate = match registered {
                    Ok(candidate) => candidate,
                    Err(e) => return Ok(PhaseOutcome::RollBack(format!("register failed: {e}"))),
                };
                info!(
                    execution = %execution.id,
                    namespace = %execution.target_namespace,
                    version = %candidate.id,
                    "candidate registered"
                );
                execution.candidate_version = Some(candidate.clone());
                self.store.checkpoint_execution(execution)?;
                candidate
            }
        };

        if abort.is_raised() {
            return Ok(PhaseOutcome::Aborted);
        }
        match plan.strategy {
            StrategyKind::Rolling => self.rolling(execution, &candidate).await,
            StrategyKind::Canary => self.canary(execution, plan, &candidate, abort).await,
            StrategyKind::BlueGreen => self.stage_green(execution, &candidate, abort).await,
        }
    }

    async fn rolling(
        &self,
        execution: &mut DeploymentExecution,
        candidate: &VersionHandle,
    ) -> StateResult<PhaseOutcome> {
        if let Err(e) = self.set_weight(&execution.target_namespace, candidate, 100).await {
            return Ok(PhaseOutcome::RollBack(format!(
                "shifting {} to 100% failed: {e}",
                candidate.id
            )));
        }
        execution.current_step_index = 1;
        self.store.checkpoint_execution(execution)?;
        Ok(PhaseOutcome::Advance)
    }

    async fn canary(
        &self,
        execution: &mut DeploymentExecution,
        plan: &DeploymentPlan,
        candidate: &VersionHandle,
        abort: &AbortSignal,
    ) -> StateResult<PhaseOutcome> {
        let namespace = execution.target_namespace.clone();
        let max_error_rate = execution.policy.canary_max_error_rate;
        let start = execution.current_step_index as usize;

        for (index, step) in plan.steps.iter().enumerate().skip(start) {
            if abort.is_raised() {
                return Ok(PhaseOutcome::Aborted);
            }
            let weight = step.weight_percent;
            if let Err(e) = self.set_weight(&namespace, candidate, weight).await {
                return Ok(PhaseOutcome::RollBack(format!(
                    "canary step {index} ({weight}%) failed: {e}"
                )));
            }
            info!(execution = %execution.id, step = index, weight, "canary step applied");

            let observe = Duration::from_secs(step.min_observe_secs);
            if abort.guard(tokio::time::sleep(observe)).await.is_none() {
                return Ok(PhaseOutcome::Aborted);
            }

            let window = step.min_observe_secs.max(1);
            let ns = namespace.as_str();
            let rate = match self
                .retry
                .run("get_error_rate", || {
                    self.controller.get_error_rate(ns, candidate, window)
                })
                .await
            {
                Ok(rate) => rate,
                Err(e) => {
                    return Ok(PhaseOutcome::RollBack(format!(
                        "error rate at {weight}% unavailable: {e}"
                    )));
                }
            };
            // NaN compares false and aborts the canary.
            if !(rate <= max_error_rate) {
                warn!(
                    execution = %execution.id,
                    step = index,
                    weight,
                    error_rate = rate,
                    max_error_rate,
                    "canary error rate above threshold"
                );
                return Ok(PhaseOutcome::RollBack(format!(
                    "error rate {rate:.4} above {max_error_rate} at {weight}%"
                )));
            }

            execution.current_step_index = index as u32 + 1;
            self.store.checkpoint_execution(execution)?;
        }
        Ok(PhaseOutcome::Advance)
    }

    /// Green is registered dark; wait for the cluster to report it healthy
    /// before it is smoke tested.
    async fn stage_green(
        &self,
        execution: &mut DeploymentExecution,
        green: &VersionHandle,
        abort: &AbortSignal,
    ) -> StateResult<PhaseOutcome> {
        let attempts = self.blue_green.health_wait_attempts.max(1);
        let interval = Duration::from_millis(self.blue_green.health_wait_interval_ms);

        for attempt in 1..=attempts {
            let health = match self
                .retry
                .run("health_check", || self.controller.health_check(green))
                .await
            {
                Ok(health) => health,
                Err(e) => {
                    return Ok(PhaseOutcome::RollBack(format!(
                        "health check of {} failed: {e}",
                        green.id
                    )));
                }
            };
            if health == HealthStatus::Healthy {
                debug!(execution = %execution.id, version = %green.id, attempt, "green is healthy");
                execution.current_step_index = 1;
                self.store.checkpoint_execution(execution)?;
                return Ok(PhaseOutcome::Advance);
            }
            debug!(execution = %execution.id, attempt, ?health, "green not healthy yet");
            if attempt < attempts && abort.guard(tokio::time::sleep(interval)).await.is_none() {
                return Ok(PhaseOutcome::Aborted);
            }
        }
        Ok(PhaseOutcome::RollBack(format!(
            "{} not healthy after {attempts} checks",
            green.id
        )))
    }

    /// Move all traffic to the candidate and retire the previous version.
    pub async fn promote(
        &self,
        execution: &DeploymentExecution,
        abort: &AbortSignal,
    ) -> PhaseOutcome {
        let Some(candidate) = execution.candidate_version.as_ref() else {
            return PhaseOutcome::RollBack("no candidate version registered".to_string());
        };
        if abort.is_raised() {
            return PhaseOutcome::Aborted;
        }
        let namespace = execution.target_namespace.as_str();

        if let Err(e) = self.set_weight(namespace, candidate, 100).await {
            return PhaseOutcome::RollBack(format!("switch to {} failed: {e}", candidate.id));
        }
        info!(execution = %execution.id, version = %candidate.id, "candidate serving 100%");

        let Some(previous) = execution.previous_version.as_ref() else {
            return PhaseOutcome::Advance;
        };
        if execution.strategy == StrategyKind::BlueGreen {
            let grace = Duration::from_secs(self.blue_green.drain_grace_secs);
            debug!(
                execution = %execution.id,
                version = %previous.id,
                grace_secs = grace.as_secs(),
                "draining blue"
            );
            if abort.guard(tokio::time::sleep(grace)).await.is_none() {
                return PhaseOutcome::Aborted;
            }
        }

        let retired = self
            .retry
            .run("deregister_previous", || async move {
                match self.controller.deregister_version(namespace, previous).await {
                    // Gone already, e.g. retired before a restart.
                    Err(TrafficError::NotFound(_)) => Ok(()),
                    other => other,
                }
            })
            .await;
        match retired {
            Ok(()) => {
                debug!(execution = %execution.id, version = %previous.id, "previous version deregistered");
                PhaseOutcome::Advance
            }
            Err(e) => PhaseOutcome::RollBack(format!("deregistering {} failed: {e}", previous.id)),
        }
    }

    async fn set_weight(
        &self,
        namespace: &str,
        version: &VersionHandle,
        percent: u8,
    ) -> Result<(), DeploymentError> {
        self.retry
            .run("set_weight", || self.controller.set_weight(namespace, version, percent))
            .await
    }
}

#[cfg(test)]
mod tests {
    use launchpad_core::{ThresholdPolicy, TrafficStep};
    use launchpad_state::{Admission, ExecutionState, StateTransition};
    use launchpad_traffic::{ControllerCall, Fault, InMemoryTrafficController, Operation};

    use super::*;

    struct Fixture {
        controller: Arc<InMemoryTrafficController>,
        store: StateStore,
        runner: StrategyRunner,
        blue: VersionHandle,
    }

    fn fixture() -> Fixture {
        let controller = Arc::new(InMemoryTrafficController::new());
        let blue = controller.seed_version("prod", "clf-1", 100);
        let store = StateStore::open_in_memory().unwrap();
        let runner = StrategyRunner::new(
            controller.clone(),
            store.clone(),
            RetryPolicy::default(),
            BlueGreenConfig::default(),
        );
        Fixture {
            controller,
            store,
            runner,
            blue,
        }
    }

    /// Store a plan and an execution already in `Deploying`.
    fn deploying(
        f: &Fixture,
        strategy: StrategyKind,
        steps: Vec<TrafficStep>,
    ) -> (DeploymentPlan, DeploymentExecution) {
        let plan = DeploymentPlan {
            id: "p1".to_string(),
            strategy,
            steps,
            target_namespace: "prod".to_string(),
        };
        let mut exec = DeploymentExecution {
            id: "e1".to_string(),
            plan_id: "p1".to_string(),
            artifact_id: "clf-2".to_string(),
            target_namespace: "prod".to_string(),
            strategy,
            state: ExecutionState::Pending,
            current_step_index: 0,
            policy: ThresholdPolicy::default(),
            previous_version: Some(f.blue.clone()),
            candidate_version: None,
            abort_requested: false,
            rollback_outcome: None,
            history: Vec::new(),
            started_at: 1,
            completed_at: None,
        };
        let admission = f.store.admit_execution(&plan, &exec, "t", 30_000, 1).unwrap();
        assert!(matches!(admission, Admission::Admitted(_)));
        for (from, to) in [
            (ExecutionState::Pending, ExecutionState::Validating),
            (ExecutionState::Validating, ExecutionState::Deploying),
        ] {
            exec.state = to;
            let t = StateTransition {
                seq: 0,
                from,
                to,
                at: 1,
                reason: "test".to_string(),
            };
            f.store.record_transition(&exec, &t).unwrap();
        }
        (plan, exec)
    }

    fn canary_steps() -> Vec<TrafficStep> {
        vec![
            TrafficStep::new(10, 60),
            TrafficStep::new(50, 60),
            TrafficStep::new(100, 60),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_shifts_everything_at_once() {
        let f = fixture();
        let (plan, mut exec) = deploying(&f, StrategyKind::Rolling, vec![TrafficStep::new(100, 0)]);

        let outcome = f.runner.deploy(&mut exec, &plan, &AbortSignal::never()).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Advance);
        let candidate = exec.candidate_version.clone().unwrap();
        assert_eq!(f.controller.weight_of("prod", &candidate.id), Some(100));
        assert_eq!(f.controller.weight_of("prod", &f.blue.id), Some(0));

        let stored = f.store.get_execution("e1").unwrap().unwrap();
        assert_eq!(stored.candidate_version, Some(candidate));
        assert_eq!(stored.current_step_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn canary_walks_steps_in_order() {
        let f = fixture();
        let (plan, mut exec) = deploying(&f, StrategyKind::Canary, canary_steps());
        let started = tokio::time::Instant::now();

        let outcome = f.runner.deploy(&mut exec, &plan, &AbortSignal::never()).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Advance);
        assert!(started.elapsed() >= Duration::from_secs(180));

        let id = exec.candidate_version.clone().unwrap().id;
        let weights: Vec<u8> = f
            .controller
            .weight_history("prod")
            .iter()
            .filter_map(|t| t.get(&id).copied())
            .collect();
        assert!(weights.windows(2).all(|w| w[0] <= w[1]), "{weights:?}");
        assert_eq!(weights.last(), Some(&100));
        assert_eq!(exec.current_step_index, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn canary_stops_on_error_spike() {
        let f = fixture();
        f.controller.set_error_rate("clf-2", 50, 0.2);
        let (plan, mut exec) = deploying(&f, StrategyKind::Canary, canary_steps());

        let outcome = f.runner.deploy(&mut exec, &plan, &AbortSignal::never()).await.unwrap();
        match outcome {
            PhaseOutcome::RollBack(reason) => assert!(reason.contains("50%"), "{reason}"),
            other => panic!("expected rollback, got {other:?}"),
        }
        // The 10% step completed, the 50% step did not.
        assert_eq!(f.store.get_execution("e1").unwrap().unwrap().current_step_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_canary_skips_registration_and_done_steps() {
        let f = fixture();
        let (plan, mut exec) = deploying(&f, StrategyKind::Canary, canary_steps());
        let candidate = f.controller.register_version("prod", "clf-2").await.unwrap();
        f.controller.set_weight("prod", &candidate, 10).await.unwrap();
        exec.candidate_version = Some(candidate.clone());
        exec.current_step_index = 1;
        f.store.checkpoint_execution(&exec).unwrap();

        let outcome = f.runner.deploy(&mut exec, &plan, &AbortSignal::never()).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Advance);
        assert_eq!(f.controller.call_count(Operation::Register), 1);
        let applied: Vec<u8> = f
            .controller
            .calls()
            .iter()
            .filter_map(|c| match c {
                ControllerCall::SetWeight { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(applied, vec![10, 50, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn blue_green_waits_for_healthy_green() {
        let f = fixture();
        f.controller.mark_unhealthy("clf-2");
        let (plan, mut exec) = deploying(&f, StrategyKind::BlueGreen, vec![TrafficStep::new(0, 0)]);

        let outcome = f.runner.deploy(&mut exec, &plan, &AbortSignal::never()).await.unwrap();
        assert!(matches!(outcome, PhaseOutcome::RollBack(_)));
        assert_eq!(
            f.controller.call_count(Operation::HealthCheck),
            BlueGreenConfig::default().health_wait_attempts as usize
        );
        // Green never took traffic.
        assert_eq!(f.controller.weight_of("prod", &f.blue.id), Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_switch_leaves_blue_at_full_weight() {
        let f = fixture();
        let (plan, mut exec) = deploying(&f, StrategyKind::BlueGreen, vec![TrafficStep::new(0, 0)]);
        let outcome = f.runner.deploy(&mut exec, &plan, &AbortSignal::never()).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Advance);

        f.controller.inject(Fault::stall(Operation::SetWeight).for_artifact("clf-2"));
        let outcome = f.runner.promote(&exec, &AbortSignal::never()).await;
        assert!(matches!(outcome, PhaseOutcome::RollBack(_)));
        assert_eq!(f.controller.weight_of("prod", &f.blue.id), Some(100));
        assert!(f.controller.is_registered(&f.blue.id));
    }

    #[tokio::test(start_paused = true)]
    async fn promote_drains_then_retires_blue() {
        let f = fixture();
        let (plan, mut exec) = deploying(&f, StrategyKind::BlueGreen, vec![TrafficStep::new(0, 0)]);
        f.runner.deploy(&mut exec, &plan, &AbortSignal::never()).await.unwrap();
        let started = tokio::time::Instant::now();

        let outcome = f.runner.promote(&exec, &AbortSignal::never()).await;
        assert_eq!(outcome, PhaseOutcome::Advance);
        assert!(started.elapsed() >= Duration::from_secs(BlueGreenConfig::default().drain_grace_secs));
        assert!(!f.controller.is_registered(&f.blue.id));

        // Promoting again after a restart is harmless.
        assert_eq!(f.runner.promote(&exec, &AbortSignal::never()).await, PhaseOutcome::Advance);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_interrupts_observation() {
        let f = fixture();
        let (plan, mut exec) = deploying(&f, StrategyKind::Canary, canary_steps());
        let (tx, signal) = crate::abort::abort_channel(false);

        let deploy = f.runner.deploy(&mut exec, &plan, &signal);
        let trigger = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            tx.send(true).unwrap();
        };
        let (outcome, ()) = tokio::join!(deploy, trigger);
        assert_eq!(outcome.unwrap(), PhaseOutcome::Aborted);
        assert_eq!(f.controller.call_count(Operation::ErrorRate), 0);
    }
}

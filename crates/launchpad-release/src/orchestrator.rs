//! Deployment orchestrator: drives executions through the release state
//! machine.
//!
//! ```text
//! Pending → Validating → Rejected
//!                      → Deploying → SmokeTesting → Promoting → Completed
//!                            │             │            │
//!                            └─────────────┴────────────┴→ RollingBack → RolledBack
//!                                                                      → Failed
//! ```
//!
//! `submit` runs admission and validation inline, so the caller learns
//! right away whether the artifact was accepted. Accepted executions are
//! then driven by one background task each. Every transition is written
//! to the store before the driver acts on it, and the namespace lease is
//! held by a [`LeaseGuard`] for as long as the driver runs.
//!
//! After a restart, [`Orchestrator::recover_in_flight`] picks up every
//! non-terminal execution and resumes it from its persisted state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use launchpad_core::config::{BlueGreenConfig, LeaseConfig};
use launchpad_core::{
    ArtifactRegistry, LaunchpadConfig, PlanError, StrategyKind, ThresholdPolicy, TrafficStep,
    epoch_millis, plan_steps,
};
use launchpad_smoke::{SmokeTester, all_passed};
use launchpad_state::{
    Admission, DeploymentExecution, DeploymentPlan, ExecutionState, LiveVersion, RollbackFailure,
    RollbackOutcome, StateError, StateResult, StateStore, StateTransition,
};
use launchpad_traffic::TrafficController;

use crate::abort::{AbortSignal, abort_channel, signal_for};
use crate::alert::{Alert, AlertSink};
use crate::error::{ReleaseError, ReleaseResult, RollbackError};
use crate::gate;
use crate::lease::LeaseGuard;
use crate::retry::RetryPolicy;
use crate::rollback::RollbackManager;
use crate::strategy::{PhaseOutcome, StrategyRunner};

/// Reason recorded when an operator abort ends an execution.
pub const ABORTED_BY_OPERATOR: &str = "aborted by operator";

const EVENT_CAPACITY: usize = 256;

/// Orchestrator tuning, usually taken from `launchpad.toml`.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Identifies this orchestrator instance on the leases it takes.
    pub holder: String,
    pub lease: LeaseConfig,
    pub retry: RetryPolicy,
    /// Policy applied when a request carries no override.
    pub policy: ThresholdPolicy,
    /// Canary steps used when a request carries none.
    pub canary_steps: Vec<TrafficStep>,
    pub blue_green: BlueGreenConfig,
    /// Upper bound on one smoke battery.
    pub suite_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &LaunchpadConfig) -> Self {
        Self {
            holder: format!("launchpadd-{}", Uuid::new_v4()),
            lease: config.lease.clone(),
            retry: RetryPolicy::from_config(&config.retry),
            policy: config.policy.clone(),
            canary_steps: config.canary.steps.clone(),
            blue_green: config.blue_green.clone(),
            suite_timeout: config.smoke.suite_timeout(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&LaunchpadConfig::default())
    }
}

/// A request to release one artifact into one namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub artifact_id: String,
    pub strategy: StrategyKind,
    pub target_namespace: String,
    #[serde(default)]
    pub policy_override: Option<ThresholdPolicy>,
    /// Canary steps; ignored by the other strategies.
    #[serde(default)]
    pub steps: Option<Vec<TrafficStep>>,
}

/// Immediate answer to a release request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// Validation passed; the execution is deploying in the background.
    Accepted { execution_id: String },
    /// The plan or the artifact was refused. `execution_id` is absent when
    /// the plan itself was malformed.
    Rejected {
        execution_id: Option<String>,
        reasons: Vec<String>,
    },
    /// Another execution owns the namespace.
    ExecutionInProgress {
        namespace: String,
        execution_id: String,
    },
}

/// Published on every state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionEvent {
    pub execution_id: String,
    pub namespace: String,
    pub from: ExecutionState,
    pub to: ExecutionState,
    pub reason: String,
    /// Unix timestamp (milliseconds).
    pub at: u64,
}

/// A claimed execution. `handle` is `None` while `submit` is still
/// validating inline.
struct DriverSlot {
    handle: Option<JoinHandle<()>>,
    abort: watch::Sender<bool>,
}

struct Inner {
    store: StateStore,
    registry: Arc<dyn ArtifactRegistry>,
    smoke: Arc<dyn SmokeTester>,
    alerts: Arc<dyn AlertSink>,
    settings: OrchestratorSettings,
    strategies: StrategyRunner,
    rollback: RollbackManager,
    events: broadcast::Sender<ExecutionEvent>,
    running: RwLock<HashMap<String, DriverSlot>>,
}

/// Cheap to clone; all clones share the same drivers.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

enum Verdict {
    Passed,
    Rejected(Vec<String>),
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        registry: Arc<dyn ArtifactRegistry>,
        controller: Arc<dyn TrafficController>,
        smoke: Arc<dyn SmokeTester>,
        alerts: Arc<dyn AlertSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        let strategies = StrategyRunner::new(
            controller.clone(),
            store.clone(),
            settings.retry.clone(),
            settings.blue_green.clone(),
        );
        let rollback = RollbackManager::new(controller, store.clone(), settings.retry.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                smoke,
                alerts,
                settings,
                strategies,
                rollback,
                events,
                running: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.inner.events.subscribe()
    }

    // ── Submission ────────────────────────────────────────────────

    /// Admit a release, validate the artifact, and start deploying it.
    ///
    /// Nothing touches the cluster before validation has passed.
    pub async fn submit(&self, request: ReleaseRequest) -> ReleaseResult<ReleaseOutcome> {
        let settings = &self.inner.settings;
        let namespace = request.target_namespace.trim().to_string();
        if namespace.is_empty() {
            return Ok(plan_rejected(PlanError::EmptyNamespace));
        }
        let supplied = request.steps.as_deref().unwrap_or(&settings.canary_steps);
        let steps = match plan_steps(request.strategy, supplied) {
            Ok(steps) => steps,
            Err(e) => return Ok(plan_rejected(e)),
        };

        let now = epoch_millis();
        let plan = DeploymentPlan {
            id: Uuid::new_v4().to_string(),
            strategy: request.strategy,
            steps,
            target_namespace: namespace.clone(),
        };
        let execution = DeploymentExecution {
            id: Uuid::new_v4().to_string(),
            plan_id: plan.id.clone(),
            artifact_id: request.artifact_id,
            target_namespace: namespace,
            strategy: request.strategy,
            state: ExecutionState::Pending,
            current_step_index: 0,
            policy: request
                .policy_override
                .unwrap_or_else(|| settings.policy.clone()),
            previous_version: None,
            candidate_version: None,
            abort_requested: false,
            rollback_outcome: None,
            history: Vec::new(),
            started_at: now,
            completed_at: None,
        };

        // Claimed before the row exists, so the recovery sweep never finds
        // this execution without an owner.
        let execution_id = execution.id.clone();
        let signal = {
            let mut running = self.inner.running.write().await;
            self.reserve(&mut running, &execution_id)?
        };
        let outcome = self.admit_and_start(plan, execution, signal).await;
        if !matches!(outcome, Ok(ReleaseOutcome::Accepted { .. })) {
            self.inner.running.write().await.remove(&execution_id);
        }
        outcome
    }

    async fn admit_and_start(
        &self,
        plan: DeploymentPlan,
        mut execution: DeploymentExecution,
        signal: AbortSignal,
    ) -> ReleaseResult<ReleaseOutcome> {
        let settings = &self.inner.settings;
        let namespace = execution.target_namespace.clone();
        let ttl_ms = settings.lease.ttl().as_millis() as u64;
        let lease = match self.inner.store.admit_execution(
            &plan,
            &execution,
            &settings.holder,
            ttl_ms,
            execution.started_at,
        )? {
            Admission::Admitted(lease) => lease,
            Admission::Busy { execution_id } => {
                info!(%namespace, holder = %execution_id, "release refused, namespace busy");
                return Ok(ReleaseOutcome::ExecutionInProgress {
                    namespace,
                    execution_id,
                });
            }
        };
        let guard = LeaseGuard::start(self.inner.store.clone(), &lease, &settings.lease);
        info!(
            execution = %execution.id,
            %namespace,
            artifact = %execution.artifact_id,
            strategy = %execution.strategy,
            "release admitted"
        );

        let execution_id = execution.id.clone();
        match self.validate_execution(&mut execution).await? {
            Verdict::Rejected(reasons) => Ok(ReleaseOutcome::Rejected {
                execution_id: Some(execution_id),
                reasons,
            }),
            Verdict::Passed => {
                let mut running = self.inner.running.write().await;
                self.spawn_driver(&mut running, execution, guard, signal);
                Ok(ReleaseOutcome::Accepted { execution_id })
            }
        }
    }

    /// `Pending → Validating → {Deploying | Rejected}`.
    async fn validate_execution(
        &self,
        execution: &mut DeploymentExecution,
    ) -> StateResult<Verdict> {
        let store = &self.inner.store;
        if execution.state == ExecutionState::Pending {
            execution.previous_version = store
                .get_live_version(&execution.target_namespace)?
                .map(|live| live.version);
            self.transition(execution, ExecutionState::Validating, "namespace lease acquired")?;
        }
        if self.abort_requested(execution)? {
            return self.reject(execution, vec![ABORTED_BY_OPERATOR.to_string()]);
        }

        let (mut report, failures) = gate::evaluate(
            self.inner.registry.as_ref(),
            &execution.artifact_id,
            &execution.policy,
        )
        .await;
        let reasons = failures.iter().map(|f| f.to_string()).collect();
        report.execution_id = Some(execution.id.clone());
        store.put_report(&report)?;
        debug!(
            execution = %execution.id,
            report = %report.report_id,
            passed = report.passed,
            "validation report stored"
        );

        if !report.passed {
            return self.reject(execution, reasons);
        }
        if self.abort_requested(execution)? {
            return self.reject(execution, vec![ABORTED_BY_OPERATOR.to_string()]);
        }
        self.transition(execution, ExecutionState::Deploying, "validation passed")?;
        Ok(Verdict::Passed)
    }

    fn reject(
        &self,
        execution: &mut DeploymentExecution,
        reasons: Vec<String>,
    ) -> StateResult<Verdict> {
        self.transition(execution, ExecutionState::Rejected, &reasons.join("; "))?;
        Ok(Verdict::Rejected(reasons))
    }

    /// The stored flag, which an operator may have set since `execution`
    /// was loaded.
    fn abort_requested(&self, execution: &DeploymentExecution) -> StateResult<bool> {
        if execution.abort_requested {
            return Ok(true);
        }
        Ok(self
            .inner
            .store
            .get_execution(&execution.id)?
            .is_some_and(|stored| stored.abort_requested))
    }

    // ── Driving ───────────────────────────────────────────────────

    /// Claim the driver slot for `execution_id` and return its abort
    /// signal, raised if the stored row already carries an abort.
    fn reserve(
        &self,
        running: &mut HashMap<String, DriverSlot>,
        execution_id: &str,
    ) -> StateResult<AbortSignal> {
        let slot = running
            .entry(execution_id.to_string())
            .or_insert_with(|| DriverSlot {
                handle: None,
                abort: abort_channel(false).0,
            });
        let signal = signal_for(&slot.abort);
        // An abort persisted before the slot existed was never signalled.
        match self.inner.store.get_execution(execution_id) {
            Ok(row) => {
                if row.is_some_and(|row| row.abort_requested) {
                    slot.abort.send_replace(true);
                }
                Ok(signal)
            }
            Err(e) => {
                running.remove(execution_id);
                Err(e)
            }
        }
    }

    /// Start the driver in a slot claimed by `reserve`. A slot that is gone
    /// was drained by `shutdown`; the execution stays persisted for recovery.
    fn spawn_driver(
        &self,
        running: &mut HashMap<String, DriverSlot>,
        execution: DeploymentExecution,
        lease: LeaseGuard,
        signal: AbortSignal,
    ) {
        let Some(slot) = running.get_mut(&execution.id) else {
            debug!(execution = %execution.id, "driver slot released, not starting");
            return;
        };
        let this = self.clone();
        slot.handle = Some(tokio::spawn(async move {
            this.drive(execution, lease, signal).await;
        }));
    }

    async fn drive(
        &self,
        mut execution: DeploymentExecution,
        lease: LeaseGuard,
        abort: AbortSignal,
    ) {
        let id = execution.id.clone();
        if let Err(e) = self.run_to_end(&mut execution, &lease, &abort).await {
            error!(
                execution = %id,
                state = %execution.state,
                error = %e,
                "store failure, execution left for recovery"
            );
        }
        drop(lease);
        self.inner.running.write().await.remove(&id);
    }

    async fn run_to_end(
        &self,
        execution: &mut DeploymentExecution,
        lease: &LeaseGuard,
        abort: &AbortSignal,
    ) -> StateResult<()> {
        let plan = self
            .inner
            .store
            .get_plan(&execution.plan_id)?
            .ok_or_else(|| StateError::NotFound(execution.plan_id.clone()))?;

        loop {
            if lease.is_lost() {
                warn!(
                    execution = %execution.id,
                    namespace = %lease.namespace(),
                    state = %execution.state,
                    "lease lost, driver stopping"
                );
                return Ok(());
            }
            let in_flight = matches!(
                execution.state,
                ExecutionState::Deploying
                    | ExecutionState::SmokeTesting
                    | ExecutionState::Promoting
            );
            if in_flight && abort.is_raised() {
                self.start_rollback(execution, ABORTED_BY_OPERATOR)?;
                continue;
            }

            match execution.state {
                ExecutionState::Pending | ExecutionState::Validating => {
                    self.validate_execution(execution).await?;
                }
                ExecutionState::Deploying => {
                    match self.inner.strategies.deploy(execution, &plan, abort).await? {
                        PhaseOutcome::Advance => self.transition(
                            execution,
                            ExecutionState::SmokeTesting,
                            "traffic steps applied",
                        )?,
                        PhaseOutcome::RollBack(reason) => self.start_rollback(execution, &reason)?,
                        PhaseOutcome::Aborted => {
                            self.start_rollback(execution, ABORTED_BY_OPERATOR)?
                        }
                    }
                }
                ExecutionState::SmokeTesting => self.smoke_test(execution, abort).await?,
                ExecutionState::Promoting => {
                    match self.inner.strategies.promote(execution, abort).await {
                        PhaseOutcome::Advance => self.complete(execution)?,
                        PhaseOutcome::RollBack(reason) => self.start_rollback(execution, &reason)?,
                        PhaseOutcome::Aborted => {
                            self.start_rollback(execution, ABORTED_BY_OPERATOR)?
                        }
                    }
                }
                ExecutionState::RollingBack => self.roll_back(execution).await?,
                ExecutionState::Rejected
                | ExecutionState::Completed
                | ExecutionState::RolledBack
                | ExecutionState::Failed => return Ok(()),
            }
        }
    }

    fn start_rollback(&self, execution: &mut DeploymentExecution, reason: &str) -> StateResult<()> {
        warn!(execution = %execution.id, state = %execution.state, reason, "rolling back");
        self.transition(execution, ExecutionState::RollingBack, reason)
    }

    async fn smoke_test(
        &self,
        execution: &mut DeploymentExecution,
        abort: &AbortSignal,
    ) -> StateResult<()> {
        let Some(candidate) = execution.candidate_version.clone() else {
            return self.start_rollback(execution, "no candidate version to smoke test");
        };
        let timeout = self.inner.settings.suite_timeout;
        let battery = self.inner.smoke.run(&execution.id, &candidate);

        let results = match abort.guard(tokio::time::timeout(timeout, battery)).await {
            None => return self.start_rollback(execution, ABORTED_BY_OPERATOR),
            Some(Err(_)) => {
                let reason = format!("smoke battery timed out after {}s", timeout.as_secs());
                return self.start_rollback(execution, &reason);
            }
            Some(Ok(results)) => results,
        };
        self.inner.store.append_smoke_results(&execution.id, &results)?;

        if all_passed(&results) {
            self.transition(execution, ExecutionState::Promoting, "smoke tests passed")
        } else {
            let failed: Vec<&str> = results
                .iter()
                .filter(|r| !r.passed)
                .map(|r| r.test_name.as_str())
                .collect();
            let reason = if failed.is_empty() {
                "smoke battery produced no results".to_string()
            } else {
                format!("smoke tests failed: {}", failed.join(", "))
            };
            self.start_rollback(execution, &reason)
        }
    }

    /// `Promoting → Completed`, recording the candidate as the live version
    /// in the same write.
    fn complete(&self, execution: &mut DeploymentExecution) -> StateResult<()> {
        let Some(candidate) = execution.candidate_version.clone() else {
            return self.start_rollback(execution, "no candidate version to promote");
        };
        let live = LiveVersion {
            namespace: execution.target_namespace.clone(),
            version: candidate,
            execution_id: execution.id.clone(),
            promoted_at: epoch_millis(),
        };
        self.commit(execution, ExecutionState::Completed, "promoted to 100%", Some(&live))
    }

    async fn roll_back(&self, execution: &mut DeploymentExecution) -> StateResult<()> {
        match self.inner.rollback.rollback(execution).await? {
            RollbackOutcome::Reverted { restored } => {
                let reason = match restored {
                    Some(version) => format!("traffic restored to {version}"),
                    None => "candidate removed, no previous version".to_string(),
                };
                self.transition(execution, ExecutionState::RolledBack, &reason)
            }
            RollbackOutcome::Failed { failure, detail } => {
                let error = match failure {
                    RollbackFailure::PreviousVersionUnavailable => {
                        RollbackError::PreviousVersionUnavailable(detail)
                    }
                    RollbackFailure::ControllerUnreachable => {
                        RollbackError::ControllerUnreachable(detail)
                    }
                };
                error!(
                    execution = %execution.id,
                    namespace = %execution.target_namespace,
                    error = %error,
                    "rollback failed"
                );
                self.inner
                    .alerts
                    .raise(Alert::rollback_failed(
                        &execution.id,
                        &execution.target_namespace,
                        &execution.artifact_id,
                        &error,
                        epoch_millis(),
                    ))
                    .await;
                self.transition(execution, ExecutionState::Failed, &error.to_string())
            }
        }
    }

    fn transition(
        &self,
        execution: &mut DeploymentExecution,
        to: ExecutionState,
        reason: &str,
    ) -> StateResult<()> {
        self.commit(execution, to, reason, None)
    }

    /// Persist the transition, then apply it to `execution`.
    fn commit(
        &self,
        execution: &mut DeploymentExecution,
        to: ExecutionState,
        reason: &str,
        live: Option<&LiveVersion>,
    ) -> StateResult<()> {
        let from = execution.state;
        let now = epoch_millis();
        let mut next = execution.clone();
        next.state = to;
        if to.is_terminal() {
            next.completed_at = Some(now);
        }
        let entry = StateTransition {
            seq: next.history.len() as u32,
            from,
            to,
            at: now,
            reason: reason.to_string(),
        };
        match live {
            Some(live) => self.inner.store.record_promotion(&next, &entry, live)?,
            None => self.inner.store.record_transition(&next, &entry)?,
        }
        next.history.push(entry);
        *execution = next;

        info!(
            execution = %execution.id,
            namespace = %execution.target_namespace,
            %from,
            %to,
            reason,
            "execution transitioned"
        );
        // No subscribers is fine.
        let _ = self.inner.events.send(ExecutionEvent {
            execution_id: execution.id.clone(),
            namespace: execution.target_namespace.clone(),
            from,
            to,
            reason: reason.to_string(),
            at: now,
        });
        Ok(())
    }

    // ── Operator actions ──────────────────────────────────────────

    /// Request an abort. The flag is persisted first, so it holds across
    /// restarts; a running driver is also signalled directly.
    pub async fn abort(&self, execution_id: &str) -> ReleaseResult<DeploymentExecution> {
        let row = match self.inner.store.request_abort(execution_id) {
            Ok(row) => row,
            Err(StateError::NotFound(_)) => {
                return Err(ReleaseError::NotFound(execution_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if row.state.is_terminal() {
            return Err(ReleaseError::AlreadyTerminal {
                id: row.id,
                state: row.state,
            });
        }
        if let Some(slot) = self.inner.running.read().await.get(execution_id) {
            slot.abort.send_replace(true);
        }
        info!(execution = %execution_id, state = %row.state, "abort requested");
        self.get(execution_id)
    }

    pub fn get(&self, execution_id: &str) -> ReleaseResult<DeploymentExecution> {
        self.inner
            .store
            .get_execution(execution_id)?
            .ok_or_else(|| ReleaseError::NotFound(execution_id.to_string()))
    }

    pub fn list(&self, namespace: Option<&str>) -> ReleaseResult<Vec<DeploymentExecution>> {
        Ok(match namespace {
            Some(ns) => self.inner.store.list_executions_for_namespace(ns)?,
            None => self.inner.store.list_executions()?,
        })
    }

    pub async fn is_running(&self, execution_id: &str) -> bool {
        self.inner.running.read().await.contains_key(execution_id)
    }

    /// Wait until the execution reaches a terminal state.
    pub async fn wait_for_terminal(
        &self,
        execution_id: &str,
    ) -> ReleaseResult<DeploymentExecution> {
        let mut events = self.subscribe();
        loop {
            let execution = self.get(execution_id)?;
            if execution.state.is_terminal() {
                return Ok(execution);
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(execution),
            }
        }
    }

    // ── Recovery and shutdown ─────────────────────────────────────

    /// Resume every non-terminal execution that no driver in this process
    /// is running and whose lease is free, expired, or already ours.
    /// Returns the ids of the resumed executions.
    pub async fn recover_in_flight(&self) -> ReleaseResult<Vec<String>> {
        let settings = &self.inner.settings;
        let ttl_ms = settings.lease.ttl().as_millis() as u64;
        let mut running = self.inner.running.write().await;
        let mut resumed = Vec::new();

        for execution in self.inner.store.list_active_executions()? {
            if running.contains_key(&execution.id) {
                continue;
            }
            let admission = self.inner.store.try_acquire_lease(
                &execution.target_namespace,
                &execution.id,
                &settings.holder,
                ttl_ms,
                epoch_millis(),
            )?;
            match admission {
                Admission::Admitted(lease) => {
                    info!(
                        execution = %execution.id,
                        namespace = %execution.target_namespace,
                        state = %execution.state,
                        "resuming execution"
                    );
                    let guard =
                        LeaseGuard::start(self.inner.store.clone(), &lease, &settings.lease);
                    let signal = self.reserve(&mut running, &execution.id)?;
                    resumed.push(execution.id.clone());
                    self.spawn_driver(&mut running, execution, guard, signal);
                }
                Admission::Busy { execution_id } => {
                    debug!(
                        execution = %execution.id,
                        holder = %execution_id,
                        "lease still held, not resuming"
                    );
                }
            }
        }
        Ok(resumed)
    }

    /// Resume orphaned executions every `interval` until `shutdown` flips.
    pub async fn run_recovery(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "recovery sweep started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.recover_in_flight().await {
                        Ok(resumed) if !resumed.is_empty() => {
                            info!(count = resumed.len(), "recovery sweep resumed executions");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "recovery sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("recovery sweep shutting down");
                    break;
                }
            }
        }
    }

    /// Stop every driver. Executions stay persisted in their current state
    /// and are resumed by the next `recover_in_flight`.
    pub async fn shutdown(&self) {
        let slots: Vec<(String, DriverSlot)> =
            self.inner.running.write().await.drain().collect();
        for (id, slot) in slots {
            let Some(handle) = slot.handle else {
                continue;
            };
            handle.abort();
            // Wait for the task to be dropped so its lease guard runs.
            let _ = handle.await;
            debug!(execution = %id, "driver stopped");
        }
    }
}

fn plan_rejected(error: PlanError) -> ReleaseOutcome {
    ReleaseOutcome::Rejected {
        execution_id: None,
        reasons: vec![ReleaseError::Plan(error).to_string()],
    }
}

//! StateStore: redb-backed persistence for Launchpad.
//!
//! Provides typed operations over plans, executions, the transition log,
//! validation reports, smoke results, leases, and live versions. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Result of asking for exclusive use of a namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The caller now holds the namespace lease.
    Admitted(NamespaceLease),
    /// Another execution owns the namespace.
    Busy { execution_id: ExecutionId },
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Decode every value whose key starts with `prefix`, in key order.
fn scan_prefix<T, R>(table: &R, prefix: &str) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(prefix) {
            break;
        }
        results.push(decode(value.value())?);
    }
    Ok(results)
}

fn count_prefix<R>(table: &R, prefix: &str) -> StateResult<u32>
where
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut count = 0;
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(prefix) {
            break;
        }
        count += 1;
    }
    Ok(count)
}

fn get_value<T, R>(table: &R, key: &str) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn child_key(parent: &str, seq: u32) -> String {
    format!("{parent}:{seq:06}")
}

/// The execution row is stored without its history. An abort request
/// already on disk survives any later write.
fn execution_row(
    execution: &DeploymentExecution,
    stored: Option<&DeploymentExecution>,
) -> StateResult<Vec<u8>> {
    let mut row = execution.clone();
    row.history.clear();
    row.abort_requested |= stored.is_some_and(|s| s.abort_requested);
    encode(&row)
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PLANS).map_err(map_err!(Table))?;
        txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        txn.open_table(TRANSITIONS).map_err(map_err!(Table))?;
        txn.open_table(REPORTS).map_err(map_err!(Table))?;
        txn.open_table(SMOKE_RESULTS).map_err(map_err!(Table))?;
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.open_table(LIVE_VERSIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Plans ──────────────────────────────────────────────────────

    /// Get a deployment plan by id.
    pub fn get_plan(&self, plan_id: &str) -> StateResult<Option<DeploymentPlan>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PLANS).map_err(map_err!(Table))?;
        get_value(&table, plan_id)
    }

    // ── Executions ─────────────────────────────────────────────────

    /// Store a plan and a fresh execution, claiming the namespace for it.
    ///
    /// Admission fails with `Busy` when the namespace lease is held by a
    /// live execution, or when any non-terminal execution still exists in
    /// the namespace (an expired lease does not mean the release finished).
    pub fn admit_execution(
        &self,
        plan: &DeploymentPlan,
        execution: &DeploymentExecution,
        holder: &str,
        ttl_ms: u64,
        now_ms: u64,
    ) -> StateResult<Admission> {
        let namespace = execution.target_namespace.as_str();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let admission = {
            let mut executions = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
            let mut leases = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let mut plans = txn.open_table(PLANS).map_err(map_err!(Table))?;

            if executions
                .get(execution.id.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::AlreadyExists(execution.id.clone()));
            }

            let mut busy = None;
            for entry in executions.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let other: DeploymentExecution = decode(value.value())?;
                if other.target_namespace == namespace && !other.state.is_terminal() {
                    busy = Some(other.id);
                    break;
                }
            }
            if busy.is_none() {
                let current: Option<NamespaceLease> = get_value(&leases, namespace)?;
                if let Some(lease) = current.filter(|l| !l.is_expired(now_ms)) {
                    busy = Some(lease.execution_id);
                }
            }

            match busy {
                Some(execution_id) => Admission::Busy { execution_id },
                None => {
                    let lease = NamespaceLease {
                        namespace: namespace.to_string(),
                        execution_id: execution.id.clone(),
                        holder: holder.to_string(),
                        expires_at_ms: now_ms + ttl_ms,
                    };
                    leases
                        .insert(namespace, encode(&lease)?.as_slice())
                        .map_err(map_err!(Write))?;
                    plans
                        .insert(plan.id.as_str(), encode(plan)?.as_slice())
                        .map_err(map_err!(Write))?;
                    executions
                        .insert(
                            execution.id.as_str(),
                            execution_row(execution, None)?.as_slice(),
                        )
                        .map_err(map_err!(Write))?;
                    Admission::Admitted(lease)
                }
            }
        };
        match &admission {
            Admission::Admitted(_) => {
                txn.commit().map_err(map_err!(Transaction))?;
                debug!(execution = %execution.id, %namespace, "execution admitted");
            }
            Admission::Busy { execution_id } => {
                txn.abort().map_err(map_err!(Transaction))?;
                debug!(%namespace, holder = %execution_id, "namespace busy");
            }
        }
        Ok(admission)
    }

    /// Append a transition and write the execution row it produced, in one
    /// write transaction.
    ///
    /// `execution.state` must equal `transition.to`, and the stored row must
    /// be in `transition.from`. Reaching a terminal state also drops the
    /// namespace lease held by this execution.
    pub fn record_transition(
        &self,
        execution: &DeploymentExecution,
        transition: &StateTransition,
    ) -> StateResult<()> {
        self.commit_transition(execution, transition, None)
    }

    /// Like [`record_transition`](Self::record_transition), and also marks
    /// `live` as the namespace's serving version.
    pub fn record_promotion(
        &self,
        execution: &DeploymentExecution,
        transition: &StateTransition,
        live: &LiveVersion,
    ) -> StateResult<()> {
        self.commit_transition(execution, transition, Some(live))
    }

    fn commit_transition(
        &self,
        execution: &DeploymentExecution,
        transition: &StateTransition,
        live: Option<&LiveVersion>,
    ) -> StateResult<()> {
        let illegal = || StateError::IllegalTransition {
            execution: execution.id.clone(),
            from: transition.from.to_string(),
            to: transition.to.to_string(),
        };
        if execution.state != transition.to || !transition.from.can_transition_to(transition.to) {
            return Err(illegal());
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut executions = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
            let mut transitions = txn.open_table(TRANSITIONS).map_err(map_err!(Table))?;

            let stored: DeploymentExecution = get_value(&executions, &execution.id)?
                .ok_or_else(|| StateError::NotFound(execution.id.clone()))?;
            if stored.state != transition.from {
                return Err(illegal());
            }

            let prefix = format!("{}:", execution.id);
            let seq = count_prefix(&transitions, &prefix)?;
            let mut entry = transition.clone();
            entry.seq = seq;
            transitions
                .insert(child_key(&execution.id, seq).as_str(), encode(&entry)?.as_slice())
                .map_err(map_err!(Write))?;
            executions
                .insert(
                    execution.id.as_str(),
                    execution_row(execution, Some(&stored))?.as_slice(),
                )
                .map_err(map_err!(Write))?;

            if transition.to.is_terminal() {
                let mut leases = txn.open_table(LEASES).map_err(map_err!(Table))?;
                let current: Option<NamespaceLease> =
                    get_value(&leases, &execution.target_namespace)?;
                if current.is_some_and(|l| l.execution_id == execution.id) {
                    leases
                        .remove(execution.target_namespace.as_str())
                        .map_err(map_err!(Write))?;
                }
            }

            if let Some(live) = live {
                let mut table = txn.open_table(LIVE_VERSIONS).map_err(map_err!(Table))?;
                table
                    .insert(live.namespace.as_str(), encode(live)?.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            execution = %execution.id,
            from = %transition.from,
            to = %transition.to,
            "transition recorded"
        );
        Ok(())
    }

    /// Persist progress within the current state (step index, registered
    /// version, abort flag, rollback outcome). The state itself only
    /// changes through [`record_transition`](Self::record_transition).
    pub fn checkpoint_execution(&self, execution: &DeploymentExecution) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
            let stored: DeploymentExecution = get_value(&table, &execution.id)?
                .ok_or_else(|| StateError::NotFound(execution.id.clone()))?;
            if stored.state != execution.state || stored.state.is_terminal() {
                return Err(StateError::IllegalTransition {
                    execution: execution.id.clone(),
                    from: stored.state.to_string(),
                    to: execution.state.to_string(),
                });
            }
            table
                .insert(
                    execution.id.as_str(),
                    execution_row(execution, Some(&stored))?.as_slice(),
                )
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            execution = %execution.id,
            step = execution.current_step_index,
            "execution checkpointed"
        );
        Ok(())
    }

    /// Flag an execution for operator abort and return the stored row
    /// (without history). Terminal executions are returned unchanged.
    pub fn request_abort(&self, execution_id: &str) -> StateResult<DeploymentExecution> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let row = {
            let mut table = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
            let mut row: DeploymentExecution = get_value(&table, execution_id)?
                .ok_or_else(|| StateError::NotFound(execution_id.to_string()))?;
            if !row.state.is_terminal() && !row.abort_requested {
                row.abort_requested = true;
                table
                    .insert(execution_id, encode(&row)?.as_slice())
                    .map_err(map_err!(Write))?;
            }
            row
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(execution = %execution_id, state = %row.state, "abort requested");
        Ok(row)
    }

    /// Get an execution with its full history.
    pub fn get_execution(&self, execution_id: &str) -> StateResult<Option<DeploymentExecution>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let executions = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        let transitions = txn.open_table(TRANSITIONS).map_err(map_err!(Table))?;
        let Some(mut execution) = get_value::<DeploymentExecution, _>(&executions, execution_id)?
        else {
            return Ok(None);
        };
        execution.history = scan_prefix(&transitions, &format!("{execution_id}:"))?;
        Ok(Some(execution))
    }

    /// List all executions, with history.
    pub fn list_executions(&self) -> StateResult<Vec<DeploymentExecution>> {
        self.list_executions_where(|_| true)
    }

    /// List executions targeting a namespace.
    pub fn list_executions_for_namespace(
        &self,
        namespace: &str,
    ) -> StateResult<Vec<DeploymentExecution>> {
        self.list_executions_where(|e| e.target_namespace == namespace)
    }

    /// List executions that have not reached a terminal state.
    pub fn list_active_executions(&self) -> StateResult<Vec<DeploymentExecution>> {
        self.list_executions_where(|e| !e.state.is_terminal())
    }

    fn list_executions_where(
        &self,
        keep: impl Fn(&DeploymentExecution) -> bool,
    ) -> StateResult<Vec<DeploymentExecution>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let executions = txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        let transitions = txn.open_table(TRANSITIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in executions.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let mut execution: DeploymentExecution = decode(value.value())?;
            if keep(&execution) {
                execution.history = scan_prefix(&transitions, &format!("{}:", execution.id))?;
                results.push(execution);
            }
        }
        results.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(results)
    }

    // ── Validation reports ─────────────────────────────────────────

    /// Store a validation report. Reports are write-once.
    pub fn put_report(&self, report: &ValidationReport) -> StateResult<()> {
        let key = report.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key));
            }
            table
                .insert(key.as_str(), encode(report)?.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, passed = report.passed, "validation report stored");
        Ok(())
    }

    /// List every validation report for an artifact, oldest first.
    pub fn list_reports_for_artifact(&self, artifact_id: &str) -> StateResult<Vec<ValidationReport>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        let mut reports: Vec<ValidationReport> = scan_prefix(&table, &format!("{artifact_id}:"))?;
        reports.sort_by_key(|r| r.evaluated_at);
        Ok(reports)
    }

    // ── Smoke results ──────────────────────────────────────────────

    /// Append a batch of smoke results for an execution.
    pub fn append_smoke_results(
        &self,
        execution_id: &str,
        results: &[SmokeTestResult],
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SMOKE_RESULTS).map_err(map_err!(Table))?;
            let mut seq = count_prefix(&table, &format!("{execution_id}:"))?;
            for result in results {
                table
                    .insert(child_key(execution_id, seq).as_str(), encode(result)?.as_slice())
                    .map_err(map_err!(Write))?;
                seq += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(execution = %execution_id, count = results.len(), "smoke results stored");
        Ok(())
    }

    /// List all smoke results for an execution, in recording order.
    pub fn list_smoke_results(&self, execution_id: &str) -> StateResult<Vec<SmokeTestResult>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SMOKE_RESULTS).map_err(map_err!(Table))?;
        scan_prefix(&table, &format!("{execution_id}:"))
    }

    /// List smoke results across all executions.
    pub fn list_all_smoke_results(&self) -> StateResult<Vec<SmokeTestResult>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SMOKE_RESULTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Claim a namespace for an existing execution.
    ///
    /// Succeeds when the lease is free, expired, or already held by the same
    /// execution and holder. A live lease under another holder is `Busy` even
    /// for the same execution; a restarted process waits out the TTL.
    pub fn try_acquire_lease(
        &self,
        namespace: &str,
        execution_id: &str,
        holder: &str,
        ttl_ms: u64,
        now_ms: u64,
    ) -> StateResult<Admission> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let admission = {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let current: Option<NamespaceLease> = get_value(&table, namespace)?;
            match current {
                Some(lease)
                    if !lease.is_expired(now_ms)
                        && (lease.execution_id != execution_id || lease.holder != holder) =>
                {
                    Admission::Busy {
                        execution_id: lease.execution_id,
                    }
                }
                _ => {
                    let lease = NamespaceLease {
                        namespace: namespace.to_string(),
                        execution_id: execution_id.to_string(),
                        holder: holder.to_string(),
                        expires_at_ms: now_ms + ttl_ms,
                    };
                    table
                        .insert(namespace, encode(&lease)?.as_slice())
                        .map_err(map_err!(Write))?;
                    Admission::Admitted(lease)
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(admission)
    }

    /// Extend a lease held by `holder` for `execution_id`. Returns false if
    /// the lease was lost to someone else or released.
    pub fn renew_lease(
        &self,
        namespace: &str,
        execution_id: &str,
        holder: &str,
        ttl_ms: u64,
        now_ms: u64,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let renewed = {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let current: Option<NamespaceLease> = get_value(&table, namespace)?;
            match current {
                Some(mut lease) if lease.execution_id == execution_id && lease.holder == holder => {
                    lease.expires_at_ms = now_ms + ttl_ms;
                    table
                        .insert(namespace, encode(&lease)?.as_slice())
                        .map_err(map_err!(Write))?;
                    true
                }
                _ => false,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(renewed)
    }

    /// Drop the lease if `holder` owns it for `execution_id`. Returns true
    /// if removed.
    pub fn release_lease(
        &self,
        namespace: &str,
        execution_id: &str,
        holder: &str,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released = {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let current: Option<NamespaceLease> = get_value(&table, namespace)?;
            if current.is_some_and(|l| l.execution_id == execution_id && l.holder == holder) {
                table.remove(namespace).map_err(map_err!(Write))?;
                true
            } else {
                false
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if released {
            debug!(%namespace, execution = %execution_id, "lease released");
        }
        Ok(released)
    }

    /// Current lease on a namespace, expired or not.
    pub fn get_lease(&self, namespace: &str) -> StateResult<Option<NamespaceLease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        get_value(&table, namespace)
    }

    // ── Live versions ──────────────────────────────────────────────

    /// Record the serving version of a namespace outside of a release
    /// (initial import of an existing deployment).
    pub fn put_live_version(&self, live: &LiveVersion) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LIVE_VERSIONS).map_err(map_err!(Table))?;
            table
                .insert(live.namespace.as_str(), encode(live)?.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the serving version of a namespace.
    pub fn get_live_version(&self, namespace: &str) -> StateResult<Option<LiveVersion>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LIVE_VERSIONS).map_err(map_err!(Table))?;
        get_value(&table, namespace)
    }

    /// List the serving version of every namespace.
    pub fn list_live_versions(&self) -> StateResult<Vec<LiveVersion>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LIVE_VERSIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_core::{StrategyKind, ThresholdPolicy, TrafficStep, VersionHandle};

    fn test_plan(id: &str, namespace: &str) -> DeploymentPlan {
        DeploymentPlan {
            id: id.to_string(),
            strategy: StrategyKind::Canary,
            steps: vec![TrafficStep::new(10, 60), TrafficStep::new(100, 0)],
            target_namespace: namespace.to_string(),
        }
    }

    fn test_execution(id: &str, namespace: &str) -> DeploymentExecution {
        DeploymentExecution {
            id: id.to_string(),
            plan_id: format!("plan-{id}"),
            artifact_id: "clf-9".to_string(),
            target_namespace: namespace.to_string(),
            strategy: StrategyKind::Canary,
            state: ExecutionState::Pending,
            current_step_index: 0,
            policy: ThresholdPolicy::default(),
            previous_version: None,
            candidate_version: None,
            abort_requested: false,
            rollback_outcome: None,
            history: Vec::new(),
            started_at: 1_000,
            completed_at: None,
        }
    }

    fn admit(store: &StateStore, id: &str, namespace: &str, now_ms: u64) -> Admission {
        store
            .admit_execution(
                &test_plan(&format!("plan-{id}"), namespace),
                &test_execution(id, namespace),
                "orch-a",
                30_000,
                now_ms,
            )
            .unwrap()
    }

    fn advance(
        store: &StateStore,
        execution: &mut DeploymentExecution,
        to: ExecutionState,
        at: u64,
    ) -> StateResult<()> {
        let transition = StateTransition {
            seq: 0,
            from: execution.state,
            to,
            at,
            reason: format!("to {to}"),
        };
        let mut next = execution.clone();
        next.state = to;
        store.record_transition(&next, &transition)?;
        *execution = next;
        Ok(())
    }

    fn handle(id: &str) -> VersionHandle {
        VersionHandle {
            id: id.to_string(),
            artifact_id: "clf-9".to_string(),
            namespace: "prod".to_string(),
            endpoint: "10.0.0.5:8080".to_string(),
        }
    }

    // ── Admission ──────────────────────────────────────────────────

    #[test]
    fn admit_stores_plan_execution_and_lease() {
        let store = StateStore::open_in_memory().unwrap();
        let admission = admit(&store, "e1", "prod", 1_000);

        let Admission::Admitted(lease) = admission else {
            panic!("expected admission");
        };
        assert_eq!(lease.expires_at_ms, 31_000);
        assert!(store.get_plan("plan-e1").unwrap().is_some());
        let exec = store.get_execution("e1").unwrap().unwrap();
        assert_eq!(exec.state, ExecutionState::Pending);
        assert!(exec.history.is_empty());
        assert_eq!(store.get_lease("prod").unwrap().unwrap().execution_id, "e1");
    }

    #[test]
    fn second_execution_in_namespace_is_busy() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);

        let admission = admit(&store, "e2", "prod", 2_000);
        assert_eq!(
            admission,
            Admission::Busy {
                execution_id: "e1".to_string()
            }
        );
        // Nothing of e2 was written.
        assert!(store.get_execution("e2").unwrap().is_none());
        assert!(store.get_plan("plan-e2").unwrap().is_none());
    }

    #[test]
    fn other_namespaces_are_independent() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        assert!(matches!(admit(&store, "e2", "staging", 1_000), Admission::Admitted(_)));
    }

    #[test]
    fn expired_lease_with_unfinished_execution_stays_busy() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);

        // Long after the TTL, e1 is still non-terminal: it must be recovered,
        // not silently replaced.
        let admission = admit(&store, "e2", "prod", 10_000_000);
        assert!(matches!(admission, Admission::Busy { execution_id } if execution_id == "e1"));
    }

    #[test]
    fn namespace_frees_after_terminal_transition() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        let mut exec = store.get_execution("e1").unwrap().unwrap();
        advance(&store, &mut exec, ExecutionState::Validating, 1_001).unwrap();
        advance(&store, &mut exec, ExecutionState::Rejected, 1_002).unwrap();

        assert!(store.get_lease("prod").unwrap().is_none());
        assert!(matches!(admit(&store, "e2", "prod", 1_003), Admission::Admitted(_)));
    }

    #[test]
    fn duplicate_execution_id_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        let err = store
            .admit_execution(
                &test_plan("plan-x", "other"),
                &test_execution("e1", "other"),
                "orch-a",
                30_000,
                1_000,
            )
            .unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    // ── Transitions ────────────────────────────────────────────────

    #[test]
    fn transitions_append_in_order() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        let mut exec = store.get_execution("e1").unwrap().unwrap();
        advance(&store, &mut exec, ExecutionState::Validating, 1_001).unwrap();
        advance(&store, &mut exec, ExecutionState::Deploying, 1_002).unwrap();
        advance(&store, &mut exec, ExecutionState::SmokeTesting, 1_003).unwrap();

        let stored = store.get_execution("e1").unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::SmokeTesting);
        let seqs: Vec<u32> = stored.history.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(stored.history[1].from, ExecutionState::Validating);
        assert_eq!(stored.history[1].to, ExecutionState::Deploying);
    }

    #[test]
    fn illegal_transition_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        let mut exec = store.get_execution("e1").unwrap().unwrap();
        let err = advance(&store, &mut exec, ExecutionState::Completed, 1_001).unwrap_err();
        assert!(matches!(err, StateError::IllegalTransition { .. }));
        assert!(store.get_execution("e1").unwrap().unwrap().history.is_empty());
    }

    #[test]
    fn stale_from_state_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        let mut exec = store.get_execution("e1").unwrap().unwrap();
        let stale = exec.clone();
        advance(&store, &mut exec, ExecutionState::Validating, 1_001).unwrap();

        // A writer holding the old copy cannot replay Pending -> Validating.
        let mut replay = stale;
        let err = advance(&store, &mut replay, ExecutionState::Validating, 1_002).unwrap_err();
        assert!(matches!(err, StateError::IllegalTransition { .. }));
    }

    #[test]
    fn terminal_state_is_immutable() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        let mut exec = store.get_execution("e1").unwrap().unwrap();
        advance(&store, &mut exec, ExecutionState::Validating, 1_001).unwrap();
        advance(&store, &mut exec, ExecutionState::Rejected, 1_002).unwrap();

        exec.current_step_index = 4;
        assert!(store.checkpoint_execution(&exec).is_err());
    }

    #[test]
    fn promotion_records_live_version() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        let mut exec = store.get_execution("e1").unwrap().unwrap();
        for to in [
            ExecutionState::Validating,
            ExecutionState::Deploying,
            ExecutionState::SmokeTesting,
            ExecutionState::Promoting,
        ] {
            advance(&store, &mut exec, to, 1_100).unwrap();
        }

        let mut done = exec.clone();
        done.state = ExecutionState::Completed;
        let transition = StateTransition {
            seq: 0,
            from: ExecutionState::Promoting,
            to: ExecutionState::Completed,
            at: 1_200,
            reason: "promoted".to_string(),
        };
        let live = LiveVersion {
            namespace: "prod".to_string(),
            version: handle("v-2"),
            execution_id: "e1".to_string(),
            promoted_at: 1_200,
        };
        store.record_promotion(&done, &transition, &live).unwrap();

        assert_eq!(store.get_live_version("prod").unwrap(), Some(live));
        assert!(store.get_lease("prod").unwrap().is_none());
    }

    #[test]
    fn checkpoint_keeps_state_and_history() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        let mut exec = store.get_execution("e1").unwrap().unwrap();
        advance(&store, &mut exec, ExecutionState::Validating, 1_001).unwrap();
        advance(&store, &mut exec, ExecutionState::Deploying, 1_002).unwrap();

        exec.candidate_version = Some(handle("v-2"));
        exec.current_step_index = 1;
        store.checkpoint_execution(&exec).unwrap();

        let stored = store.get_execution("e1").unwrap().unwrap();
        assert_eq!(stored.current_step_index, 1);
        assert_eq!(stored.candidate_version, Some(handle("v-2")));
        assert_eq!(stored.history.len(), 2);
    }

    #[test]
    fn abort_flag_survives_stale_writes() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        let mut exec = store.get_execution("e1").unwrap().unwrap();
        advance(&store, &mut exec, ExecutionState::Validating, 1_001).unwrap();

        let flagged = store.request_abort("e1").unwrap();
        assert!(flagged.abort_requested);

        // The driver's copy predates the abort; writing it must not clear the flag.
        assert!(!exec.abort_requested);
        advance(&store, &mut exec, ExecutionState::Deploying, 1_002).unwrap();
        exec.current_step_index = 1;
        store.checkpoint_execution(&exec).unwrap();
        assert!(store.get_execution("e1").unwrap().unwrap().abort_requested);
    }

    #[test]
    fn abort_of_terminal_execution_changes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        let mut exec = store.get_execution("e1").unwrap().unwrap();
        advance(&store, &mut exec, ExecutionState::Rejected, 1_001).unwrap();

        let row = store.request_abort("e1").unwrap();
        assert_eq!(row.state, ExecutionState::Rejected);
        assert!(!row.abort_requested);
        assert!(matches!(
            store.request_abort("missing").unwrap_err(),
            StateError::NotFound(_)
        ));
    }

    #[test]
    fn checkpoint_cannot_change_state() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        let mut exec = store.get_execution("e1").unwrap().unwrap();
        exec.state = ExecutionState::Deploying;
        assert!(store.checkpoint_execution(&exec).is_err());
    }

    #[test]
    fn list_active_and_by_namespace() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);
        admit(&store, "e2", "staging", 1_000);
        let mut e2 = store.get_execution("e2").unwrap().unwrap();
        advance(&store, &mut e2, ExecutionState::Rejected, 1_001).unwrap();

        let active = store.list_active_executions().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "e1");
        assert_eq!(store.list_executions_for_namespace("staging").unwrap().len(), 1);
        assert_eq!(store.list_executions().unwrap().len(), 2);
    }

    // ── Leases ─────────────────────────────────────────────────────

    #[test]
    fn lease_renew_and_release() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);

        assert!(store.renew_lease("prod", "e1", "orch-a", 30_000, 20_000).unwrap());
        assert_eq!(store.get_lease("prod").unwrap().unwrap().expires_at_ms, 50_000);

        // Someone else's renewal or release is a no-op.
        assert!(!store.renew_lease("prod", "e9", "orch-a", 30_000, 20_000).unwrap());
        assert!(!store.renew_lease("prod", "e1", "orch-b", 30_000, 20_000).unwrap());
        assert!(!store.release_lease("prod", "e9", "orch-a").unwrap());
        assert!(!store.release_lease("prod", "e1", "orch-b").unwrap());

        assert!(store.release_lease("prod", "e1", "orch-a").unwrap());
        assert!(!store.release_lease("prod", "e1", "orch-a").unwrap());
    }

    #[test]
    fn same_execution_reacquires_under_new_holder_after_expiry() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);

        let live = store
            .try_acquire_lease("prod", "e1", "orch-b", 30_000, 2_000)
            .unwrap();
        assert_eq!(
            live,
            Admission::Busy {
                execution_id: "e1".to_string()
            }
        );
        assert_eq!(store.get_lease("prod").unwrap().unwrap().holder, "orch-a");

        let admission = store
            .try_acquire_lease("prod", "e1", "orch-b", 30_000, 31_001)
            .unwrap();
        let Admission::Admitted(lease) = admission else {
            panic!("expected reacquisition");
        };
        assert_eq!(lease.holder, "orch-b");
    }

    #[test]
    fn same_holder_reacquires_live_lease() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);

        let admission = store
            .try_acquire_lease("prod", "e1", "orch-a", 30_000, 2_000)
            .unwrap();
        let Admission::Admitted(lease) = admission else {
            panic!("expected reacquisition");
        };
        assert_eq!(lease.expires_at_ms, 32_000);
    }

    #[test]
    fn live_lease_blocks_other_execution_until_expiry() {
        let store = StateStore::open_in_memory().unwrap();
        admit(&store, "e1", "prod", 1_000);

        let busy = store
            .try_acquire_lease("prod", "e2", "orch-b", 30_000, 5_000)
            .unwrap();
        assert!(matches!(busy, Admission::Busy { .. }));

        let after_ttl = store
            .try_acquire_lease("prod", "e2", "orch-b", 30_000, 31_000)
            .unwrap();
        assert!(matches!(after_ttl, Admission::Admitted(_)));
    }

    // ── Reports and smoke results ──────────────────────────────────

    #[test]
    fn reports_are_write_once() {
        let store = StateStore::open_in_memory().unwrap();
        let report = ValidationReport {
            report_id: "r1".to_string(),
            artifact_id: "clf-9".to_string(),
            policy_version: "v1".to_string(),
            passed: false,
            failed_checks: vec!["accuracy".to_string()],
            evaluated_at: 1_000,
            execution_id: None,
        };
        store.put_report(&report).unwrap();
        assert!(matches!(
            store.put_report(&report).unwrap_err(),
            StateError::AlreadyExists(_)
        ));

        let mut second = report.clone();
        second.report_id = "r2".to_string();
        second.policy_version = "v2".to_string();
        second.evaluated_at = 2_000;
        store.put_report(&second).unwrap();

        let reports = store.list_reports_for_artifact("clf-9").unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].policy_version, "v2");
        assert!(store.list_reports_for_artifact("clf-1").unwrap().is_empty());
    }

    #[test]
    fn smoke_results_append_across_batches() {
        let store = StateStore::open_in_memory().unwrap();
        let result = |name: &str, passed: bool| SmokeTestResult {
            execution_id: "e1".to_string(),
            suite_version: "v1".to_string(),
            test_name: name.to_string(),
            passed,
            latency_ms: 12,
            error: None,
        };
        store
            .append_smoke_results("e1", &[result("health", true), result("inference", false)])
            .unwrap();
        store.append_smoke_results("e1", &[result("health", true)]).unwrap();
        store.append_smoke_results("e10", &[result("health", true)]).unwrap();

        let results = store.list_smoke_results("e1").unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.test_name.as_str()).collect();
        assert_eq!(names, vec!["health", "inference", "health"]);
        assert_eq!(store.list_all_smoke_results().unwrap().len(), 4);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("launchpad.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            admit(&store, "e1", "prod", 1_000);
            let mut exec = store.get_execution("e1").unwrap().unwrap();
            advance(&store, &mut exec, ExecutionState::Validating, 1_001).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let exec = store.get_execution("e1").unwrap().unwrap();
        assert_eq!(exec.state, ExecutionState::Validating);
        assert_eq!(exec.history.len(), 1);
        assert_eq!(store.list_active_executions().unwrap().len(), 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_executions().unwrap().is_empty());
        assert!(store.get_execution("nope").unwrap().is_none());
        assert!(store.get_lease("nope").unwrap().is_none());
        assert!(store.get_live_version("nope").unwrap().is_none());
        assert!(store.list_smoke_results("nope").unwrap().is_empty());
        assert!(!store.release_lease("nope", "e1", "orch-a").unwrap());
    }
}

//! Point-in-time view of the release state, read from the store.

use std::collections::BTreeMap;

use tracing::debug;

use launchpad_state::{
    DeploymentExecution, ExecutionState, LiveVersion, RollbackOutcome, SmokeTestResult,
    StateResult, StateStore,
};

/// Aggregated counts behind the `/metrics` endpoint.
///
/// Maps are ordered so that the exposition output is stable between
/// scrapes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseSnapshot {
    /// (namespace, state) → number of executions currently in that state.
    pub executions: BTreeMap<(String, ExecutionState), u64>,
    /// (test name, passed) → number of recorded probe results.
    pub smoke_results: BTreeMap<(String, bool), u64>,
    /// namespace → rollbacks that could not restore it.
    pub rollback_failures: BTreeMap<String, u64>,
    pub live_versions: Vec<LiveVersion>,
}

impl ReleaseSnapshot {
    /// Read everything the exposition needs from `store`.
    pub fn collect(store: &StateStore) -> StateResult<Self> {
        let executions = store.list_executions()?;
        let smoke = store.list_all_smoke_results()?;
        let live = store.list_live_versions()?;
        debug!(
            executions = executions.len(),
            smoke_results = smoke.len(),
            live_versions = live.len(),
            "collected release snapshot"
        );
        Ok(Self::from_parts(&executions, &smoke, live))
    }

    pub fn from_parts(
        executions: &[DeploymentExecution],
        smoke: &[SmokeTestResult],
        live_versions: Vec<LiveVersion>,
    ) -> Self {
        let mut snapshot = Self {
            live_versions,
            ..Self::default()
        };

        for exec in executions {
            let namespace = exec.target_namespace.clone();
            // Every state gets a series per namespace, zero or not.
            for state in ExecutionState::ALL {
                snapshot
                    .executions
                    .entry((namespace.clone(), state))
                    .or_insert(0);
            }
            *snapshot
                .executions
                .entry((namespace.clone(), exec.state))
                .or_insert(0) += 1;

            if matches!(exec.rollback_outcome, Some(RollbackOutcome::Failed { .. })) {
                *snapshot.rollback_failures.entry(namespace).or_insert(0) += 1;
            }
        }

        for result in smoke {
            *snapshot
                .smoke_results
                .entry((result.test_name.clone(), result.passed))
                .or_insert(0) += 1;
        }

        snapshot
    }

    /// Executions not yet in a terminal state.
    pub fn in_flight(&self) -> u64 {
        self.executions
            .iter()
            .filter(|((_, state), _)| !state.is_terminal())
            .map(|(_, count)| count)
            .sum()
    }
}

//! Smoke battery runner.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use launchpad_core::VersionHandle;
use launchpad_core::config::SmokeSuiteConfig;
use launchpad_state::SmokeTestResult;

use crate::probe::{SmokeProbe, SmokeTestError};

/// Runs the smoke battery against one version.
#[async_trait]
pub trait SmokeTester: Send + Sync {
    /// Battery version stamped on every result.
    fn suite_version(&self) -> &str;

    /// One result per probe, in battery order. Never fails: a probe that
    /// could not run is a failed result.
    async fn run(&self, execution_id: &str, version: &VersionHandle) -> Vec<SmokeTestResult>;
}

/// True when the battery produced results and every one passed.
pub fn all_passed(results: &[SmokeTestResult]) -> bool {
    !results.is_empty() && results.iter().all(|r| r.passed)
}

/// HTTP smoke runner. Probes from all executions share one semaphore.
#[derive(Clone)]
pub struct SmokeRunner {
    suite: Arc<SmokeSuiteConfig>,
    permits: Arc<Semaphore>,
}

impl SmokeRunner {
    pub fn new(suite: SmokeSuiteConfig) -> Self {
        let permits = Arc::new(Semaphore::new(suite.concurrency.max(1)));
        Self {
            suite: Arc::new(suite),
            permits,
        }
    }

    pub fn suite(&self) -> &SmokeSuiteConfig {
        &self.suite
    }
}

#[async_trait]
impl SmokeTester for SmokeRunner {
    fn suite_version(&self) -> &str {
        &self.suite.version
    }

    async fn run(&self, execution_id: &str, version: &VersionHandle) -> Vec<SmokeTestResult> {
        let mut tasks = JoinSet::new();
        for probe in SmokeProbe::ALL {
            let suite = self.suite.clone();
            let permits = self.permits.clone();
            let endpoint = version.endpoint.clone();
            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => probe.run(&endpoint, &suite).await,
                    Err(_) => Err(SmokeTestError::EndpointUnreachable(
                        "smoke runner is shut down".to_string(),
                    )),
                };
                (probe, outcome, started.elapsed())
            });
        }

        let mut outcomes = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((probe, outcome, elapsed)) => {
                    outcomes.insert(probe, (outcome, elapsed));
                }
                Err(e) => error!(execution = %execution_id, error = %e, "smoke probe task failed"),
            }
        }

        let results: Vec<SmokeTestResult> = SmokeProbe::ALL
            .iter()
            .map(|probe| {
                let (outcome, elapsed) = outcomes.remove(probe).unwrap_or_else(|| {
                    (
                        Err(SmokeTestError::EndpointUnreachable(
                            "probe task aborted".to_string(),
                        )),
                        Default::default(),
                    )
                });
                let (passed, latency, error) = match outcome {
                    Ok(latency) => (true, latency, None),
                    Err(e) => {
                        warn!(
                            execution = %execution_id,
                            version = %version.id,
                            probe = probe.name(),
                            error = %e,
                            "smoke probe failed"
                        );
                        (false, elapsed, Some(e.to_string()))
                    }
                };
                SmokeTestResult {
                    execution_id: execution_id.to_string(),
                    suite_version: self.suite.version.clone(),
                    test_name: probe.name().to_string(),
                    passed,
                    latency_ms: latency.as_millis() as u64,
                    error,
                }
            })
            .collect();

        info!(
            execution = %execution_id,
            version = %version.id,
            passed = all_passed(&results),
            "smoke battery finished"
        );
        results
    }
}

//! A smoke tester that returns scripted results without any network I/O.
//!
//! Used to drive the orchestrator deterministically. Every run is logged so
//! callers can check which versions were probed.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use launchpad_core::VersionHandle;
use launchpad_state::SmokeTestResult;

use crate::probe::{SmokeProbe, SmokeTestError};
use crate::runner::SmokeTester;

#[derive(Debug, Clone)]
enum Behaviour {
    Pass,
    Fail(SmokeProbe, SmokeTestError),
    Stall,
}

#[derive(Debug)]
struct Script {
    behaviour: Behaviour,
    runs: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct ScriptedSmokeTester {
    script: Mutex<Script>,
}

impl ScriptedSmokeTester {
    fn with(behaviour: Behaviour) -> Self {
        Self {
            script: Mutex::new(Script {
                behaviour,
                runs: Vec::new(),
            }),
        }
    }

    /// Every probe passes.
    pub fn passing() -> Self {
        Self::with(Behaviour::Pass)
    }

    /// `probe` fails with `error`; the others pass.
    pub fn failing(probe: SmokeProbe, error: SmokeTestError) -> Self {
        Self::with(Behaviour::Fail(probe, error))
    }

    /// The battery never finishes.
    pub fn stalling() -> Self {
        Self::with(Behaviour::Stall)
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch to all-pass for subsequent runs.
    pub fn pass_from_now(&self) {
        self.lock().behaviour = Behaviour::Pass;
    }

    /// `(execution_id, version_id)` of every run so far.
    pub fn runs(&self) -> Vec<(String, String)> {
        self.lock().runs.clone()
    }
}

#[async_trait]
impl SmokeTester for ScriptedSmokeTester {
    fn suite_version(&self) -> &str {
        "scripted"
    }

    async fn run(&self, execution_id: &str, version: &VersionHandle) -> Vec<SmokeTestResult> {
        let behaviour = {
            let mut script = self.lock();
            script
                .runs
                .push((execution_id.to_string(), version.id.clone()));
            script.behaviour.clone()
        };

        let failing = match behaviour {
            Behaviour::Stall => std::future::pending().await,
            Behaviour::Pass => None,
            Behaviour::Fail(probe, error) => Some((probe, error)),
        };

        SmokeProbe::ALL
            .iter()
            .map(|probe| {
                let error = match &failing {
                    Some((p, e)) if p == probe => Some(e.to_string()),
                    _ => None,
                };
                SmokeTestResult {
                    execution_id: execution_id.to_string(),
                    suite_version: self.suite_version().to_string(),
                    test_name: probe.name().to_string(),
                    passed: error.is_none(),
                    latency_ms: 5,
                    error,
                }
            })
            .collect()
    }
}

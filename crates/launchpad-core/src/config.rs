//! launchpad.toml configuration parser.
//!
//! Every section is optional; missing sections and keys fall back to the
//! defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ThresholdPolicy, TrafficStep};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchpadConfig {
    pub daemon: DaemonConfig,
    pub lease: LeaseConfig,
    pub retry: RetryConfig,
    pub policy: ThresholdPolicy,
    pub canary: CanaryConfig,
    pub blue_green: BlueGreenConfig,
    pub smoke: SmokeSuiteConfig,
    pub controller: ControllerConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    /// How often to look for orphaned executions.
    pub recovery_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 8480,
            data_dir: PathBuf::from("/var/lib/launchpad"),
            recovery_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub ttl_secs: u64,
    pub renew_interval_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            renew_interval_secs: 10,
        }
    }
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs.max(1))
    }
}

/// Timeout and retry budget applied to every call into the serving cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            call_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
    /// Default steps when a release request does not supply its own.
    pub steps: Vec<TrafficStep>,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            steps: vec![
                TrafficStep::new(10, 60),
                TrafficStep::new(50, 120),
                TrafficStep::new(100, 60),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueGreenConfig {
    /// Seconds blue keeps draining after the switch before it is deregistered.
    pub drain_grace_secs: u64,
    /// Health polls while waiting for green to come up.
    pub health_wait_attempts: u32,
    pub health_wait_interval_ms: u64,
}

impl Default for BlueGreenConfig {
    fn default() -> Self {
        Self {
            drain_grace_secs: 30,
            health_wait_attempts: 10,
            health_wait_interval_ms: 1_000,
        }
    }
}

/// The smoke battery run against every newly registered version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmokeSuiteConfig {
    /// Battery version, recorded with every result set.
    pub version: String,
    pub health_path: String,
    pub inference_path: String,
    /// JSON body for the representative inference call.
    pub sample_request: String,
    /// Top-level fields the inference response must carry.
    pub expected_fields: Vec<String>,
    pub latency_budget_ms: u64,
    pub latency_samples: u32,
    pub probe_timeout_ms: u64,
    /// Attempts per probe request. Only transport failures are retried;
    /// a wrong answer fails the probe at once.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Upper bound on the whole battery.
    pub suite_timeout_secs: u64,
    pub concurrency: usize,
}

impl Default for SmokeSuiteConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            health_path: "/healthz".to_string(),
            inference_path: "/v1/classify".to_string(),
            sample_request: r#"{"text":"launchpad smoke probe"}"#.to_string(),
            expected_fields: vec!["label".to_string(), "score".to_string()],
            latency_budget_ms: 500,
            latency_samples: 5,
            probe_timeout_ms: 2_000,
            max_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 1_000,
            suite_timeout_secs: 60,
            concurrency: 2,
        }
    }
}

impl SmokeSuiteConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn suite_timeout(&self) -> Duration {
        Duration::from_secs(self.suite_timeout_secs)
    }

    /// Pause before retry number `retry` (1-based), doubling up to the cap.
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(
            self.retry_base_delay_ms
                .saturating_mul(factor)
                .min(self.retry_max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// host:port of the serving cluster's control API.
    pub address: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub root: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/launchpad/artifacts"),
        }
    }
}

impl LaunchpadConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: LaunchpadConfig = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn check(&self) -> anyhow::Result<()> {
        crate::types::plan_steps(crate::types::StrategyKind::Canary, &self.canary.steps)
            .map_err(|e| anyhow::anyhow!("invalid [canary] steps: {e}"))?;
        if self.retry.max_attempts == 0 {
            anyhow::bail!("[retry] max_attempts must be at least 1");
        }
        if self.smoke.max_attempts == 0 {
            anyhow::bail!("[smoke] max_attempts must be at least 1");
        }
        if self.smoke.concurrency == 0 {
            anyhow::bail!("[smoke] concurrency must be at least 1");
        }
        if self.lease.renew_interval_secs >= self.lease.ttl_secs {
            anyhow::bail!("[lease] renew_interval_secs must be below ttl_secs");
        }
        serde_json::from_str::<serde_json::Value>(&self.smoke.sample_request)
            .map_err(|e| anyhow::anyhow!("[smoke] sample_request is not JSON: {e}"))?;
        Ok(())
    }
}

//! In-process traffic controller.
//!
//! Keeps per-namespace weight tables with the same atomic, proportional
//! `set_weight` semantics as the real cluster, logs every call, and lets
//! callers inject faults: hard errors, calls that never return, error-rate
//! spikes above a weight, and unhealthy versions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use launchpad_core::{HealthStatus, VersionHandle};

use crate::controller::{TrafficController, TrafficError, TrafficResult};

/// Controller operation, used to target faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Register,
    SetWeight,
    Deregister,
    ErrorRate,
    HealthCheck,
}

/// One call received by the controller, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCall {
    Register {
        namespace: String,
        artifact_id: String,
    },
    SetWeight {
        namespace: String,
        version_id: String,
        percent: u8,
    },
    Deregister {
        namespace: String,
        version_id: String,
    },
    ErrorRate {
        namespace: String,
        version_id: String,
        window_secs: u64,
    },
    HealthCheck {
        version_id: String,
    },
}

impl ControllerCall {
    pub fn operation(&self) -> Operation {
        match self {
            ControllerCall::Register { .. } => Operation::Register,
            ControllerCall::SetWeight { .. } => Operation::SetWeight,
            ControllerCall::Deregister { .. } => Operation::Deregister,
            ControllerCall::ErrorRate { .. } => Operation::ErrorRate,
            ControllerCall::HealthCheck { .. } => Operation::HealthCheck,
        }
    }

    /// Whether the call changes cluster state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.operation(),
            Operation::Register | Operation::SetWeight | Operation::Deregister
        )
    }
}

#[derive(Debug, Clone)]
enum FaultEffect {
    Fail(TrafficError),
    Stall,
}

/// An injected failure for one operation.
#[derive(Debug, Clone)]
pub struct Fault {
    op: Operation,
    artifact_id: Option<String>,
    remaining: Option<u32>,
    effect: FaultEffect,
}

impl Fault {
    /// Every matching call returns `error`.
    pub fn fail(op: Operation, error: TrafficError) -> Self {
        Self {
            op,
            artifact_id: None,
            remaining: None,
            effect: FaultEffect::Fail(error),
        }
    }

    /// Every matching call hangs until the caller's timeout fires.
    pub fn stall(op: Operation) -> Self {
        Self {
            op,
            artifact_id: None,
            remaining: None,
            effect: FaultEffect::Stall,
        }
    }

    /// Only the next `n` matching calls are affected.
    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }

    /// Only calls about versions of `artifact_id` are affected.
    pub fn for_artifact(mut self, artifact_id: impl Into<String>) -> Self {
        self.artifact_id = Some(artifact_id.into());
        self
    }

    fn matches(&self, op: Operation, artifact_id: Option<&str>) -> bool {
        self.op == op
            && self.remaining != Some(0)
            && match &self.artifact_id {
                Some(wanted) => artifact_id == Some(wanted.as_str()),
                None => true,
            }
    }
}

#[derive(Debug, Clone)]
struct ErrorRateRule {
    artifact_id: String,
    from_weight: u8,
    rate: f64,
}

#[derive(Debug, Default)]
struct Inner {
    /// version id → handle.
    versions: HashMap<String, VersionHandle>,
    /// namespace → version id → weight.
    weights: HashMap<String, BTreeMap<String, u8>>,
    calls: Vec<ControllerCall>,
    /// Weight table of a namespace after every change.
    history: Vec<(String, BTreeMap<String, u8>)>,
    faults: Vec<Fault>,
    error_rates: Vec<ErrorRateRule>,
    unhealthy: HashSet<String>,
    endpoints: HashMap<String, String>,
    next_id: u64,
}

impl Inner {
    fn version(&self, namespace: &str, version_id: &str) -> TrafficResult<&VersionHandle> {
        self.versions
            .get(version_id)
            .filter(|v| v.namespace == namespace)
            .ok_or_else(|| TrafficError::NotFound(format!("{namespace}/{version_id}")))
    }

    fn add_version(&mut self, namespace: &str, artifact_id: &str, weight: u8) -> VersionHandle {
        self.next_id += 1;
        let id = format!("{artifact_id}-v{}", self.next_id);
        let endpoint = self
            .endpoints
            .get(artifact_id)
            .cloned()
            .unwrap_or_else(|| format!("{id}.{namespace}.svc:8080"));
        let handle = VersionHandle {
            id: id.clone(),
            artifact_id: artifact_id.to_string(),
            namespace: namespace.to_string(),
            endpoint,
        };
        self.versions.insert(id.clone(), handle.clone());
        self.weights
            .entry(namespace.to_string())
            .or_default()
            .insert(id, weight);
        self.snapshot(namespace);
        handle
    }

    fn snapshot(&mut self, namespace: &str) {
        let table = self.weights.get(namespace).cloned().unwrap_or_default();
        self.history.push((namespace.to_string(), table));
    }
}

/// Give `target` exactly `percent` and share the rest among the other
/// versions in proportion to their previous weights.
fn redistribute(weights: &mut BTreeMap<String, u8>, target: &str, percent: u8) {
    let others: Vec<(String, u32)> = weights
        .iter()
        .filter(|(id, _)| id.as_str() != target)
        .map(|(id, w)| (id.clone(), u32::from(*w)))
        .collect();
    weights.insert(target.to_string(), percent);
    if others.is_empty() {
        return;
    }

    let remainder = 100 - u32::from(percent);
    let total: u32 = others.iter().map(|(_, w)| w).sum();
    let mut shares: Vec<u32> = if total == 0 {
        vec![remainder / others.len() as u32; others.len()]
    } else {
        others.iter().map(|(_, w)| remainder * w / total).collect()
    };

    // Rounding leftovers go to the heaviest other version.
    let leftover = remainder - shares.iter().sum::<u32>();
    if leftover > 0 {
        let heaviest = others
            .iter()
            .enumerate()
            .max_by(|(ia, (_, a)), (ib, (_, b))| a.cmp(b).then(ib.cmp(ia)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        shares[heaviest] += leftover;
    }

    for ((id, _), share) in others.into_iter().zip(shares) {
        weights.insert(id, share as u8);
    }
}

/// Traffic controller that lives entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryTrafficController {
    inner: Mutex<Inner>,
}

impl InMemoryTrafficController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a version directly at `weight`, bypassing the call log.
    /// Models a version that was live before Launchpad started.
    pub fn seed_version(&self, namespace: &str, artifact_id: &str, weight: u8) -> VersionHandle {
        self.lock().add_version(namespace, artifact_id, weight)
    }

    /// Address handed out for future registrations of `artifact_id`.
    pub fn set_endpoint(&self, artifact_id: &str, endpoint: &str) {
        self.lock()
            .endpoints
            .insert(artifact_id.to_string(), endpoint.to_string());
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Report `rate` for versions of `artifact_id` once they hold at least
    /// `from_weight` percent.
    pub fn set_error_rate(&self, artifact_id: &str, from_weight: u8, rate: f64) {
        self.lock().error_rates.push(ErrorRateRule {
            artifact_id: artifact_id.to_string(),
            from_weight,
            rate,
        });
    }

    pub fn mark_unhealthy(&self, artifact_id: &str) {
        self.lock().unhealthy.insert(artifact_id.to_string());
    }

    pub fn mark_healthy(&self, artifact_id: &str) {
        self.lock().unhealthy.remove(artifact_id);
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<ControllerCall> {
        self.lock().calls.clone()
    }

    /// Calls that change cluster state.
    pub fn mutations(&self) -> Vec<ControllerCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn call_count(&self, op: Operation) -> usize {
        self.lock().calls.iter().filter(|c| c.operation() == op).count()
    }

    /// Current weight table of a namespace.
    pub fn weights(&self, namespace: &str) -> BTreeMap<String, u8> {
        self.lock().weights.get(namespace).cloned().unwrap_or_default()
    }

    pub fn weight_of(&self, namespace: &str, version_id: &str) -> Option<u8> {
        self.lock()
            .weights
            .get(namespace)
            .and_then(|t| t.get(version_id).copied())
    }

    /// Every weight table the namespace went through, oldest first.
    pub fn weight_history(&self, namespace: &str) -> Vec<BTreeMap<String, u8>> {
        self.lock()
            .history
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn is_registered(&self, version_id: &str) -> bool {
        self.lock().versions.contains_key(version_id)
    }

    /// Versions of `artifact_id` currently registered anywhere.
    pub fn versions_of(&self, artifact_id: &str) -> Vec<VersionHandle> {
        let inner = self.lock();
        let mut versions: Vec<VersionHandle> = inner
            .versions
            .values()
            .filter(|v| v.artifact_id == artifact_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| a.id.cmp(&b.id));
        versions
    }

    /// Log the call and apply any matching fault.
    async fn admit(&self, call: ControllerCall, artifact_id: Option<&str>) -> TrafficResult<()> {
        let op = call.operation();
        let effect = {
            let mut inner = self.lock();
            inner.calls.push(call);
            match inner.faults.iter_mut().find(|f| f.matches(op, artifact_id)) {
                Some(fault) => {
                    if let Some(n) = fault.remaining.as_mut() {
                        *n -= 1;
                    }
                    Some(fault.effect.clone())
                }
                None => None,
            }
        };
        match effect {
            None => Ok(()),
            Some(FaultEffect::Fail(err)) => {
                debug!(?op, error = %err, "injected controller failure");
                Err(err)
            }
            Some(FaultEffect::Stall) => {
                debug!(?op, "injected controller stall");
                std::future::pending().await
            }
        }
    }

    fn artifact_of(&self, version_id: &str) -> Option<String> {
        self.lock()
            .versions
            .get(version_id)
            .map(|v| v.artifact_id.clone())
    }
}

#[async_trait]
impl TrafficController for InMemoryTrafficController {
    async fn register_version(
        &self,
        namespace: &str,
        artifact_id: &str,
    ) -> TrafficResult<VersionHandle> {
        let call = ControllerCall::Register {
            namespace: namespace.to_string(),
            artifact_id: artifact_id.to_string(),
        };
        self.admit(call, Some(artifact_id)).await?;
        let handle = self.lock().add_version(namespace, artifact_id, 0);
        debug!(%namespace, version = %handle.id, "version registered");
        Ok(handle)
    }

    async fn set_weight(
        &self,
        namespace: &str,
        version: &VersionHandle,
        percent: u8,
    ) -> TrafficResult<()> {
        let call = ControllerCall::SetWeight {
            namespace: namespace.to_string(),
            version_id: version.id.clone(),
            percent,
        };
        let artifact = self.artifact_of(&version.id);
        self.admit(call, artifact.as_deref()).await?;
        if percent > 100 {
            return Err(TrafficError::Rejected(format!("weight {percent}% above 100%")));
        }

        let mut inner = self.lock();
        inner.version(namespace, &version.id)?;
        let table = inner.weights.entry(namespace.to_string()).or_default();
        redistribute(table, &version.id, percent);
        inner.snapshot(namespace);
        Ok(())
    }

    async fn deregister_version(
        &self,
        namespace: &str,
        version: &VersionHandle,
    ) -> TrafficResult<()> {
        let call = ControllerCall::Deregister {
            namespace: namespace.to_string(),
            version_id: version.id.clone(),
        };
        let artifact = self.artifact_of(&version.id);
        self.admit(call, artifact.as_deref()).await?;

        let mut inner = self.lock();
        inner.version(namespace, &version.id)?;
        inner.versions.remove(&version.id);
        if let Some(table) = inner.weights.get_mut(namespace) {
            table.remove(&version.id);
        }
        inner.snapshot(namespace);
        debug!(%namespace, version = %version.id, "version deregistered");
        Ok(())
    }

    async fn get_error_rate(
        &self,
        namespace: &str,
        version: &VersionHandle,
        window_secs: u64,
    ) -> TrafficResult<f64> {
        let call = ControllerCall::ErrorRate {
            namespace: namespace.to_string(),
            version_id: version.id.clone(),
            window_secs,
        };
        let artifact = self.artifact_of(&version.id);
        self.admit(call, artifact.as_deref()).await?;

        let inner = self.lock();
        let handle = inner.version(namespace, &version.id)?;
        let weight = inner
            .weights
            .get(namespace)
            .and_then(|t| t.get(&version.id).copied())
            .unwrap_or(0);
        let rate = inner
            .error_rates
            .iter()
            .filter(|r| r.artifact_id == handle.artifact_id && weight >= r.from_weight)
            .map(|r| r.rate)
            .fold(0.0, f64::max);
        Ok(rate)
    }

    async fn health_check(&self, version: &VersionHandle) -> TrafficResult<HealthStatus> {
        let call = ControllerCall::HealthCheck {
            version_id: version.id.clone(),
        };
        let artifact = self.artifact_of(&version.id);
        self.admit(call, artifact.as_deref()).await?;

        let inner = self.lock();
        let handle = inner
            .versions
            .get(&version.id)
            .ok_or_else(|| TrafficError::NotFound(version.id.clone()))?;
        if inner.unhealthy.contains(&handle.artifact_id) {
            Ok(HealthStatus::Unhealthy)
        } else {
            Ok(HealthStatus::Healthy)
        }
    }
}

//! The traffic controller contract and its error type.

use async_trait::async_trait;
use thiserror::Error;

use launchpad_core::{HealthStatus, VersionHandle};

/// Result type alias for controller calls.
pub type TrafficResult<T> = Result<T, TrafficError>;

/// Errors returned by a traffic controller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrafficError {
    #[error("controller unreachable: {0}")]
    Unreachable(String),

    #[error("controller call timed out")]
    Timeout,

    #[error("controller resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("controller rejected the request: {0}")]
    Rejected(String),
}

impl TrafficError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrafficError::Unreachable(_) | TrafficError::Timeout | TrafficError::ResourceUnavailable(_)
        )
    }
}

/// Control API of the serving cluster.
///
/// Implementations must make `set_weight` atomic: the named version gets
/// `percent` and the remainder is shared by the namespace's other
/// versions in proportion to their previous weights.
#[async_trait]
pub trait TrafficController: Send + Sync {
    /// Register a new version of `artifact_id` in `namespace`, serving no
    /// live traffic yet.
    async fn register_version(
        &self,
        namespace: &str,
        artifact_id: &str,
    ) -> TrafficResult<VersionHandle>;

    async fn set_weight(
        &self,
        namespace: &str,
        version: &VersionHandle,
        percent: u8,
    ) -> TrafficResult<()>;

    async fn deregister_version(&self, namespace: &str, version: &VersionHandle)
    -> TrafficResult<()>;

    /// Fraction (0.0–1.0) of failed requests served by `version` over the
    /// trailing window.
    async fn get_error_rate(
        &self,
        namespace: &str,
        version: &VersionHandle,
        window_secs: u64,
    ) -> TrafficResult<f64>;

    async fn health_check(&self, version: &VersionHandle) -> TrafficResult<HealthStatus>;
}

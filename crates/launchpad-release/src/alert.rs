//! Escalation of failed rollbacks.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::error;

use crate::error::RollbackError;

/// A namespace left in an unknown state; someone has to look at it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub execution_id: String,
    pub namespace: String,
    pub artifact_id: String,
    pub error: String,
    /// Unix timestamp (milliseconds).
    pub at: u64,
}

impl Alert {
    pub fn rollback_failed(
        execution_id: &str,
        namespace: &str,
        artifact_id: &str,
        error: &RollbackError,
        at: u64,
    ) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            namespace: namespace.to_string(),
            artifact_id: artifact_id.to_string(),
            error: error.to_string(),
            at,
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: Alert);
}

/// Writes alerts to the log at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn raise(&self, alert: Alert) {
        error!(
            execution = %alert.execution_id,
            namespace = %alert.namespace,
            artifact = %alert.artifact_id,
            error = %alert.error,
            "ALERT: rollback failed, namespace needs manual intervention"
        );
    }
}

/// Keeps every alert in memory.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn raise(&self, alert: Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(alert);
    }
}

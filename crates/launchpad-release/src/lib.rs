//! launchpad-release — the release engine.
//!
//! Takes a validated model artifact into a serving namespace and either
//! promotes it or puts the namespace back the way it was.
//!
//! # Modules
//!
//! - [`gate`]: the validation gate, a pure function of artifact metrics
//!   and threshold policy
//! - [`retry`]: per-call timeouts and exponential backoff for cluster calls
//! - [`lease`]: scoped ownership of a namespace lease
//! - [`strategy`]: rolling, canary and blue/green traffic sequences
//! - [`rollback`]: idempotent revert to the last known good version
//! - [`abort`]: operator aborts, interrupting waits only
//! - [`alert`]: escalation of failed rollbacks
//! - [`orchestrator`]: the persisted state machine tying it all together

pub mod abort;
pub mod alert;
pub mod error;
pub mod gate;
pub mod lease;
pub mod orchestrator;
pub mod retry;
pub mod rollback;
pub mod strategy;

pub use abort::AbortSignal;
pub use alert::{Alert, AlertSink, RecordingAlertSink, TracingAlertSink};
pub use error::{DeploymentError, ReleaseError, ReleaseResult, RollbackError, ValidationError};
pub use lease::LeaseGuard;
pub use orchestrator::{
    ABORTED_BY_OPERATOR, ExecutionEvent, Orchestrator, OrchestratorSettings, ReleaseOutcome,
    ReleaseRequest,
};
pub use retry::RetryPolicy;
pub use rollback::RollbackManager;
pub use strategy::{PhaseOutcome, StrategyRunner};

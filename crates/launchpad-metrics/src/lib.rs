//! launchpad-metrics — observability for Launchpad releases.
//!
//! Everything here is derived from the state store; nothing is counted in
//! memory, so a restarted daemon reports the same numbers it did before.
//!
//! # Architecture
//!
//! ```text
//! ReleaseSnapshot
//!   └── collect(&StateStore) ← executions, smoke results, live versions
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod prometheus;
pub mod snapshot;

pub use prometheus::render_prometheus;
pub use snapshot::ReleaseSnapshot;

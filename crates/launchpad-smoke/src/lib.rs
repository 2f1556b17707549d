//! launchpad-smoke — functional probes against a freshly registered version.
//!
//! The battery is fixed and versioned (`[smoke] version` in
//! `launchpad.toml`) and always talks to the version's direct endpoint,
//! never the load balancer.
//!
//! # Battery
//!
//! ```text
//! health          GET  {health_path}        → 2xx
//! inference       POST {inference_path}     → 2xx + JSON with expected fields
//! latency_budget  N × inference, sequential → p95 ≤ latency_budget_ms
//! ```
//!
//! Every probe has its own timeout. A connection error or timeout is a
//! failure, never an inconclusive result. The runner executes probes
//! under a semaphore and reports one `SmokeTestResult` per probe; the
//! battery passes only if every probe passed.

pub mod probe;
pub mod runner;
pub mod scripted;

pub use probe::{SmokeProbe, SmokeTestError};
pub use runner::{SmokeRunner, SmokeTester, all_passed};
pub use scripted::ScriptedSmokeTester;

//! launchpad-traffic — the narrow control API of the serving cluster.
//!
//! Launchpad never manages pods itself. It registers model versions with
//! the serving cluster, shifts traffic weight between them, reads the
//! error rate of a version, and asks for its health. Everything goes
//! through the [`TrafficController`] trait.
//!
//! # Implementations
//!
//! ```text
//! TrafficController
//!   ├── HttpTrafficController   JSON over HTTP/1.1 (hyper), production
//!   └── InMemoryTrafficController
//!         ├── weight bookkeeping with proportional redistribution
//!         ├── call log and weight history
//!         └── fault injection (errors, stalls, error-rate spikes)
//! ```
//!
//! # Weight semantics
//!
//! `set_weight(ns, v, p)` is atomic: `v` gets `p` percent and the other
//! versions registered in `ns` share `100 - p` in proportion to the
//! weights they held before the call.

pub mod client;
pub mod controller;
pub mod memory;

pub use client::HttpTrafficController;
pub use controller::{TrafficController, TrafficError, TrafficResult};
pub use memory::{ControllerCall, Fault, InMemoryTrafficController, Operation};

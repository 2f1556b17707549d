//! launchpad-state — durable release state for Launchpad.
//!
//! Backed by [redb](https://docs.rs/redb). Holds deployment plans,
//! executions with their append-only transition log, validation reports,
//! smoke results, per-namespace leases, and the live version of every
//! namespace.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Child records use `{parent_id}:{seq}` keys so a range scan from
//! `{parent_id}:` yields them in order.
//!
//! A transition and the execution row it produces are committed in the
//! same write transaction, so the log never disagrees with the row.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{Admission, StateStore};
pub use types::*;

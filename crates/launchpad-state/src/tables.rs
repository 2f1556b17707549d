//! redb table definitions for the Launchpad state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Deployment plans keyed by `{plan_id}`.
pub const PLANS: TableDefinition<&str, &[u8]> = TableDefinition::new("plans");

/// Execution rows (without history) keyed by `{execution_id}`.
pub const EXECUTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("executions");

/// Append-only transition log keyed by `{execution_id}:{seq:06}`.
pub const TRANSITIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transitions");

/// Validation reports keyed by `{artifact_id}:{report_id}`.
pub const REPORTS: TableDefinition<&str, &[u8]> = TableDefinition::new("reports");

/// Smoke results keyed by `{execution_id}:{seq:06}`.
pub const SMOKE_RESULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("smoke_results");

/// Namespace leases keyed by `{namespace}`.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");

/// Live version per namespace keyed by `{namespace}`.
pub const LIVE_VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("live_versions");

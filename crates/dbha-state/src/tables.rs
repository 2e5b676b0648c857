//! redb table definitions for the DBHA embedded store.
//!
//! Values are JSON-serialized domain types from `dbha-core`.

use redb::TableDefinition;

/// Inventory records keyed by `{ip}:{port}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Switch tickets keyed by ticket id.
pub const TICKETS: TableDefinition<u64, &[u8]> = TableDefinition::new("tickets");

/// Switch-log lines keyed by a monotonically increasing sequence.
pub const SWITCH_LOGS: TableDefinition<u64, &[u8]> = TableDefinition::new("switch_logs");

/// Registrations keyed by `{module}/{ip}:{port}/{engine_type}`.
pub const HEARTBEATS: TableDefinition<&str, &[u8]> = TableDefinition::new("heartbeats");

/// Id sequences.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub const TICKET_SEQ: &str = "ticket";
pub const LOG_SEQ: &str = "switch_log";

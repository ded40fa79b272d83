//! redb table definitions for the profgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Process groups are keyed by `{app_id}/{cluster}/{proc_name}`.

use redb::TableDefinition;

/// Process-group → backend address, keyed by `{app_id}/{cluster}/{proc_name}`.
pub const ASSOCIATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("associations");

/// Per-backend records keyed by backend address.
pub const BACKENDS: TableDefinition<&str, &[u8]> = TableDefinition::new("backends");

/// Recording policies keyed by `{app_id}/{cluster}/{proc_name}`.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Lease rows keyed by lease name.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");

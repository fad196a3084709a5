//! redb table definitions for the Peloton state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Task rows use the composite key `{job_id}:{instance_id}`.

use redb::TableDefinition;

/// Framework identity records keyed by framework name.
pub const FRAMEWORK: TableDefinition<&str, &[u8]> = TableDefinition::new("framework");

/// Job config + runtime keyed by `{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Task rows keyed by `{job_id}:{instance_id}`.
pub const TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");

/// Resource pool definitions keyed by `{pool_id}`.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

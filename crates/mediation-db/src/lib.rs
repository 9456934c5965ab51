//! Storage layer for the mediation core.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations for the mediation, route, and routing-identity
//! tables.
//!
//! # Design decisions
//!
//! - **Uniqueness lives in the schema**: one mediation record per connection
//!   and one route per `(connection_id, recipient_key, role)` are UNIQUE
//!   constraints, so callers can use single-statement conditional writes
//!   instead of read-then-write sequences.
//! - **`r2d2` connection pool**: each inbound message is handled on its own
//!   pooled connection; the pool is the only shared resource.
//! - **Embedded migrations**: SQL files are compiled in via `include_str!`.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbConnection, DbPool, DbRuntimeSettings, PoolError};

/// Tables every mediation store expects to exist.
pub const REQUIRED_TABLES: &[&str] = &["mediation_records", "route_records", "routing_did"];

/// Returns `true` if every table in [`REQUIRED_TABLES`] exists.
///
/// # Errors
///
/// Returns the underlying SQLite error if `sqlite_master` cannot be queried.
pub fn schema_ready(conn: &rusqlite::Connection) -> rusqlite::Result<bool> {
    for table in REQUIRED_TABLES {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table],
            |row| row.get(0),
        )?;
        if !exists {
            tracing::debug!(table, "mediation table missing");
            return Ok(false);
        }
    }
    Ok(true)
}

//! Route records: the `(connection, recipient key, role)` routing table.
//!
//! Writes are single conditional statements against the table's UNIQUE
//! `(connection_id, recipient_key, role)` index. Whether a row was inserted
//! or deleted is read from the statement's change count, never from a
//! preceding lookup.

use mediation_types::{KeylistQueryPaginate, RouteRole};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::MediationError;

/// A single routing-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub route_id: String,
    pub connection_id: String,
    pub recipient_key: String,
    pub role: RouteRole,
    pub created_at: String,
}

impl RouteRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let role: String = row.get(3)?;
        let role = role.parse::<RouteRole>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Self {
            route_id: row.get(0)?,
            connection_id: row.get(1)?,
            recipient_key: row.get(2)?,
            role,
            created_at: row.get(4)?,
        })
    }
}

/// Inserts a route unless one exists for the same triple.
///
/// Returns `true` if a row was inserted, `false` if it was already present.
pub fn insert_route_if_absent(
    conn: &Connection,
    connection_id: &str,
    recipient_key: &str,
    role: RouteRole,
) -> Result<bool, MediationError> {
    let changed = conn.execute(
        "INSERT INTO route_records (route_id, connection_id, recipient_key, role)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (connection_id, recipient_key, role) DO NOTHING",
        params![
            uuid::Uuid::new_v4().to_string(),
            connection_id,
            recipient_key,
            role.as_str()
        ],
    )?;
    Ok(changed == 1)
}

/// Deletes the route for the triple.
///
/// Returns `true` if a row was deleted, `false` if none existed.
pub fn delete_route(
    conn: &Connection,
    connection_id: &str,
    recipient_key: &str,
    role: RouteRole,
) -> Result<bool, MediationError> {
    let changed = conn.execute(
        "DELETE FROM route_records
         WHERE connection_id = ?1 AND recipient_key = ?2 AND role = ?3",
        params![connection_id, recipient_key, role.as_str()],
    )?;
    Ok(changed > 0)
}

/// Lists the routes of one role for a connection, in insertion order.
pub fn list_routes(
    conn: &Connection,
    connection_id: &str,
    role: RouteRole,
) -> Result<Vec<RouteRecord>, MediationError> {
    list_routes_page(conn, connection_id, role, KeylistQueryPaginate::default())
}

/// Lists a window of the routes of one role for a connection.
///
/// A negative `limit` returns everything after `offset`; a negative offset is
/// treated as zero.
pub fn list_routes_page(
    conn: &Connection,
    connection_id: &str,
    role: RouteRole,
    paginate: KeylistQueryPaginate,
) -> Result<Vec<RouteRecord>, MediationError> {
    let limit = if paginate.is_unlimited() { -1 } else { paginate.limit };
    let mut stmt = conn.prepare(
        "SELECT route_id, connection_id, recipient_key, role, created_at
         FROM route_records
         WHERE connection_id = ?1 AND role = ?2
         ORDER BY id
         LIMIT ?3 OFFSET ?4",
    )?;
    let routes = stmt
        .query_map(
            params![connection_id, role.as_str(), limit, paginate.offset.max(0)],
            RouteRecord::from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(routes)
}

/// Counts the routes of one role for a connection.
pub fn count_routes(
    conn: &Connection,
    connection_id: &str,
    role: RouteRole,
) -> Result<i64, MediationError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM route_records WHERE connection_id = ?1 AND role = ?2",
        params![connection_id, role.as_str()],
        |row| row.get(0),
    )?)
}

/// Finds the route registered for a recipient key under a role.
///
/// Used on the mediator side to decide which connection a forwarded message
/// belongs to.
pub fn find_route(
    conn: &Connection,
    recipient_key: &str,
    role: RouteRole,
) -> Result<Option<RouteRecord>, MediationError> {
    Ok(conn
        .query_row(
            "SELECT route_id, connection_id, recipient_key, role, created_at
             FROM route_records
             WHERE recipient_key = ?1 AND role = ?2
             ORDER BY id
             LIMIT 1",
            params![recipient_key, role.as_str()],
            RouteRecord::from_row,
        )
        .optional()?)
}

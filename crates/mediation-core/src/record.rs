//! Mediation records and their one-way state machine.
//!
//! A record is created in [`MediationState::Requested`] and moves to
//! `Granted` or `Denied` exactly once. The move is checked in memory by
//! [`MediationRecord::transition`] and again in storage by
//! [`save_transition`], which only updates rows still in the expected state.

use mediation_types::MediationState;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{is_constraint_violation, MediationError};

const RECORD_COLUMNS: &str = "mediation_id, connection_id, state, mediator_terms_json,
    recipient_terms_json, endpoint, routing_keys_json, created_at, updated_at";

/// Persisted state of one mediation relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediationRecord {
    pub mediation_id: String,
    pub connection_id: String,
    state: MediationState,
    pub mediator_terms: Vec<String>,
    pub recipient_terms: Vec<String>,
    /// Endpoint granted by the mediator. Set once the record is granted.
    pub endpoint: Option<String>,
    /// Routing keys granted by the mediator. Empty until granted.
    pub routing_keys: Vec<String>,
    /// Storage timestamps; `None` until the record is persisted.
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl MediationRecord {
    /// Creates an unsaved record in the `request` state.
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            mediation_id: uuid::Uuid::new_v4().to_string(),
            connection_id: connection_id.into(),
            state: MediationState::Requested,
            mediator_terms: Vec::new(),
            recipient_terms: Vec::new(),
            endpoint: None,
            routing_keys: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Sets the request terms. Terms are stored and echoed, never interpreted.
    pub fn with_terms(mut self, mediator_terms: Vec<String>, recipient_terms: Vec<String>) -> Self {
        self.mediator_terms = mediator_terms;
        self.recipient_terms = recipient_terms;
        self
    }

    pub fn state(&self) -> MediationState {
        self.state
    }

    pub fn is_granted(&self) -> bool {
        self.state == MediationState::Granted
    }

    /// Moves the record to `to` and returns the state it left.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::InvalidTransition`] if the record is already
    /// terminal or `to` is not a terminal state.
    pub fn transition(&mut self, to: MediationState) -> Result<MediationState, MediationError> {
        let from = self.state;
        if from.is_terminal() || !to.is_terminal() {
            return Err(MediationError::InvalidTransition { from, to });
        }
        self.state = to;
        Ok(from)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let state: String = row.get(2)?;
        let state = state.parse::<MediationState>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Self {
            mediation_id: row.get(0)?,
            connection_id: row.get(1)?,
            state,
            mediator_terms: json_column(row, 3)?,
            recipient_terms: json_column(row, 4)?,
            endpoint: row.get(5)?,
            routing_keys: json_column(row, 6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Inserts a new record.
///
/// Uniqueness per connection is enforced by the `connection_id` UNIQUE
/// constraint, so two concurrent inserts for one connection cannot both win.
///
/// # Errors
///
/// Returns [`MediationError::AlreadyExists`] if the connection already has a
/// record.
pub fn insert_record(
    conn: &Connection,
    record: &mut MediationRecord,
) -> Result<(), MediationError> {
    let res = conn.query_row(
        "INSERT INTO mediation_records (
            mediation_id, connection_id, state,
            mediator_terms_json, recipient_terms_json, endpoint, routing_keys_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING created_at, updated_at",
        params![
            record.mediation_id,
            record.connection_id,
            record.state.as_str(),
            serde_json::to_string(&record.mediator_terms)?,
            serde_json::to_string(&record.recipient_terms)?,
            record.endpoint,
            serde_json::to_string(&record.routing_keys)?,
        ],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    );

    match res {
        Ok((created_at, updated_at)) => {
            record.created_at = Some(created_at);
            record.updated_at = Some(updated_at);
            Ok(())
        }
        Err(e) if is_constraint_violation(&e) => {
            Err(MediationError::AlreadyExists(record.connection_id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Persists a transition made with [`MediationRecord::transition`].
///
/// The row is only updated while it is still in `from`; if another writer
/// moved it first the stored state is reported as the error's `from`.
///
/// # Errors
///
/// Returns [`MediationError::InvalidTransition`] if the stored state is no
/// longer `from`, or [`MediationError::NotFound`] if the record is not stored.
pub fn save_transition(
    conn: &Connection,
    record: &mut MediationRecord,
    from: MediationState,
) -> Result<(), MediationError> {
    let updated_at: Option<String> = conn
        .query_row(
            "UPDATE mediation_records SET
                state = ?1,
                endpoint = ?2,
                routing_keys_json = ?3,
                updated_at = datetime('now')
            WHERE mediation_id = ?4 AND state = ?5
            RETURNING updated_at",
            params![
                record.state.as_str(),
                record.endpoint,
                serde_json::to_string(&record.routing_keys)?,
                record.mediation_id,
                from.as_str(),
            ],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(updated_at) = updated_at {
        record.updated_at = Some(updated_at);
        return Ok(());
    }

    match get_record(conn, &record.mediation_id)? {
        Some(stored) => Err(MediationError::InvalidTransition {
            from: stored.state,
            to: record.state,
        }),
        None => Err(MediationError::NotFound(record.mediation_id.clone())),
    }
}

/// Fetches a record by its identifier.
pub fn get_record(
    conn: &Connection,
    mediation_id: &str,
) -> Result<Option<MediationRecord>, MediationError> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM mediation_records WHERE mediation_id = ?1");
    Ok(conn
        .query_row(&sql, [mediation_id], MediationRecord::from_row)
        .optional()?)
}

/// Fetches the record for a connection, if any.
pub fn get_record_by_connection(
    conn: &Connection,
    connection_id: &str,
) -> Result<Option<MediationRecord>, MediationError> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM mediation_records WHERE connection_id = ?1");
    Ok(conn
        .query_row(&sql, [connection_id], MediationRecord::from_row)
        .optional()?)
}

/// Lists records in the given state, oldest first.
pub fn list_records_by_state(
    conn: &Connection,
    state: MediationState,
) -> Result<Vec<MediationRecord>, MediationError> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM mediation_records WHERE state = ?1 ORDER BY created_at, mediation_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map([state.as_str()], MediationRecord::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        mediation_db::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn new_record_starts_requested() {
        let record = MediationRecord::new("conn-1");
        assert_eq!(record.state(), MediationState::Requested);
        assert!(!record.is_granted());
        assert!(record.created_at.is_none());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut record = MediationRecord::new("conn-1");
        assert_eq!(
            record.transition(MediationState::Denied).unwrap(),
            MediationState::Requested
        );

        let err = record.transition(MediationState::Granted).unwrap_err();
        assert!(matches!(
            err,
            MediationError::InvalidTransition {
                from: MediationState::Denied,
                to: MediationState::Granted
            }
        ));
        assert_eq!(record.state(), MediationState::Denied);
    }

    #[test]
    fn transition_back_to_requested_is_rejected() {
        let mut record = MediationRecord::new("conn-1");
        assert!(record.transition(MediationState::Requested).is_err());
    }

    #[test]
    fn insert_and_fetch_round_trips_terms() {
        let conn = setup_db();
        let mut record = MediationRecord::new("conn-1")
            .with_terms(vec!["m1".to_string()], vec!["r1".to_string(), "r2".to_string()]);
        insert_record(&conn, &mut record).unwrap();
        assert!(record.created_at.is_some());

        let fetched = get_record_by_connection(&conn, "conn-1").unwrap().unwrap();
        assert_eq!(fetched, record);
        assert_eq!(
            get_record(&conn, &record.mediation_id).unwrap().unwrap(),
            record
        );
    }

    #[test]
    fn second_insert_for_connection_fails() {
        let conn = setup_db();
        insert_record(&conn, &mut MediationRecord::new("conn-1")).unwrap();

        let err = insert_record(&conn, &mut MediationRecord::new("conn-1")).unwrap_err();
        assert!(matches!(err, MediationError::AlreadyExists(ref c) if c == "conn-1"));
    }

    #[test]
    fn stale_transition_loses_compare_and_set() {
        let conn = setup_db();
        let mut record = MediationRecord::new("conn-1");
        insert_record(&conn, &mut record).unwrap();

        let mut first = record.clone();
        let from = first.transition(MediationState::Granted).unwrap();
        save_transition(&conn, &mut first, from).unwrap();

        let mut second = record.clone();
        let from = second.transition(MediationState::Denied).unwrap();
        let err = save_transition(&conn, &mut second, from).unwrap_err();
        assert!(matches!(
            err,
            MediationError::InvalidTransition {
                from: MediationState::Granted,
                to: MediationState::Denied
            }
        ));

        let stored = get_record(&conn, &record.mediation_id).unwrap().unwrap();
        assert_eq!(stored.state(), MediationState::Granted);
    }

    #[test]
    fn transition_of_unsaved_record_is_not_found() {
        let conn = setup_db();
        let mut record = MediationRecord::new("conn-1");
        let from = record.transition(MediationState::Granted).unwrap();
        assert!(matches!(
            save_transition(&conn, &mut record, from),
            Err(MediationError::NotFound(_))
        ));
    }

    #[test]
    fn list_by_state_filters() {
        let conn = setup_db();
        let mut granted = MediationRecord::new("conn-1");
        insert_record(&conn, &mut granted).unwrap();
        let from = granted.transition(MediationState::Granted).unwrap();
        save_transition(&conn, &mut granted, from).unwrap();
        insert_record(&conn, &mut MediationRecord::new("conn-2")).unwrap();

        let requested = list_records_by_state(&conn, MediationState::Requested).unwrap();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].connection_id, "conn-2");

        let granted_list = list_records_by_state(&conn, MediationState::Granted).unwrap();
        assert_eq!(granted_list.len(), 1);
        assert_eq!(granted_list[0].connection_id, "conn-1");
    }
}

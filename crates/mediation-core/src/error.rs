//! Error types for the mediation core.

use mediation_types::MediationState;

/// Errors surfaced by mediation record, route, and routing-identity operations.
#[derive(Debug, thiserror::Error)]
pub enum MediationError {
    /// The storage handle given to the manager is unusable.
    #[error("mediation manager construction failed: {0}")]
    Construction(String),

    /// A mediation record already exists for the connection.
    #[error("mediation record already exists for connection {0}")]
    AlreadyExists(String),

    /// A keylist read was attempted on a relationship that is not granted.
    #[error("mediation is not granted for connection {0}")]
    NotGranted(String),

    /// The record is in a terminal state, or another writer moved it first.
    #[error("invalid mediation state transition from {from} to {to}")]
    InvalidTransition {
        from: MediationState,
        to: MediationState,
    },

    /// The record to update is not in storage.
    #[error("mediation record not found: {0}")]
    NotFound(String),

    /// A routing identity is already stored.
    #[error("routing DID already exists")]
    RoutingDidExists,

    /// A stored value could not be decoded.
    #[error("corrupt stored value in column {column}: {reason}")]
    Corrupt { column: &'static str, reason: String },

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Returns `true` if the SQLite error is a UNIQUE/CHECK constraint failure.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
}

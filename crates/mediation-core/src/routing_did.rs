//! The mediator's routing identity.
//!
//! One Ed25519 key pair per process, advertised as the routing key in every
//! grant. The `did` is the hex encoding of the first 16 bytes of the verkey.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{is_constraint_violation, MediationError};

/// The persisted routing identity.
#[derive(Clone, PartialEq, Eq)]
pub struct RoutingDid {
    pub did: String,
    pub verkey: String,
    seed_hex: String,
    pub created_at: Option<String>,
}

impl std::fmt::Debug for RoutingDid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingDid")
            .field("did", &self.did)
            .field("verkey", &self.verkey)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl RoutingDid {
    /// Generates a fresh identity from the OS RNG.
    pub fn generate() -> Self {
        Self::from_signing_key(&SigningKey::generate(&mut OsRng))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Self {
        let verkey_bytes = signing_key.verifying_key().to_bytes();
        Self {
            did: hex::encode(&verkey_bytes[..16]),
            verkey: hex::encode(verkey_bytes),
            seed_hex: hex::encode(signing_key.to_bytes()),
            created_at: None,
        }
    }

    /// Rebuilds the signing key from the stored seed.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::Corrupt`] if the stored seed is not 32 bytes
    /// of hex.
    pub fn signing_key(&self) -> Result<SigningKey, MediationError> {
        let corrupt = |reason: String| MediationError::Corrupt {
            column: "seed_hex",
            reason,
        };
        let bytes = hex::decode(&self.seed_hex).map_err(|e| corrupt(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| corrupt(format!("expected 32 bytes, got {}", b.len())))?;
        Ok(SigningKey::from_bytes(&seed))
    }
}

/// Returns the stored routing identity, or `None` if none was created yet.
///
/// # Errors
///
/// Returns [`MediationError::Corrupt`] if the stored seed does not produce the
/// stored verkey.
pub fn retrieve_routing_did(conn: &Connection) -> Result<Option<RoutingDid>, MediationError> {
    let stored = conn
        .query_row(
            "SELECT did, verkey, seed_hex, created_at FROM routing_did WHERE slot = 1",
            [],
            |row| {
                Ok(RoutingDid {
                    did: row.get(0)?,
                    verkey: row.get(1)?,
                    seed_hex: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;

    if let Some(did) = &stored {
        let derived = hex::encode(did.signing_key()?.verifying_key().to_bytes());
        if derived != did.verkey {
            return Err(MediationError::Corrupt {
                column: "seed_hex",
                reason: "seed does not match stored verkey".to_string(),
            });
        }
    }
    Ok(stored)
}

/// Generates and stores a new routing identity.
///
/// Not idempotent: callers that may race on first use go through
/// [`ensure_routing_did`].
///
/// # Errors
///
/// Returns [`MediationError::RoutingDidExists`] if an identity is stored.
pub fn create_routing_did(conn: &Connection) -> Result<RoutingDid, MediationError> {
    let mut did = RoutingDid::generate();
    let res = conn.query_row(
        "INSERT INTO routing_did (slot, did, verkey, seed_hex) VALUES (1, ?1, ?2, ?3)
         RETURNING created_at",
        params![did.did, did.verkey, did.seed_hex],
        |row| row.get::<_, String>(0),
    );

    match res {
        Ok(created_at) => {
            did.created_at = Some(created_at);
            tracing::info!(did = %did.did, verkey = %did.verkey, "created routing DID");
            Ok(did)
        }
        Err(e) if is_constraint_violation(&e) => Err(MediationError::RoutingDidExists),
        Err(e) => Err(e.into()),
    }
}

/// Returns the routing identity, creating it on first use.
///
/// Safe under concurrent first use: the insert is a no-op when another
/// writer got there first, and every caller reads back the single stored row.
pub fn ensure_routing_did(conn: &Connection) -> Result<RoutingDid, MediationError> {
    let candidate = RoutingDid::generate();
    let created = conn.execute(
        "INSERT INTO routing_did (slot, did, verkey, seed_hex) VALUES (1, ?1, ?2, ?3)
         ON CONFLICT (slot) DO NOTHING",
        params![candidate.did, candidate.verkey, candidate.seed_hex],
    )?;
    if created == 1 {
        tracing::info!(did = %candidate.did, verkey = %candidate.verkey, "created routing DID");
    }

    retrieve_routing_did(conn)?.ok_or(MediationError::Database(
        rusqlite::Error::QueryReturnedNoRows,
    ))
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
    fn retrieve_when_absent_is_none() {
        let conn = setup_db();
        assert!(retrieve_routing_did(&conn).unwrap().is_none());
    }

    #[test]
    fn create_then_retrieve() {
        let conn = setup_db();
        let created = create_routing_did(&conn).unwrap();
        let stored = retrieve_routing_did(&conn).unwrap().unwrap();
        assert_eq!(created, stored);
        assert_eq!(stored.verkey.len(), 64);
        assert!(stored.verkey.starts_with(&stored.did));
    }

    #[test]
    fn second_create_fails() {
        let conn = setup_db();
        create_routing_did(&conn).unwrap();
        assert!(matches!(
            create_routing_did(&conn),
            Err(MediationError::RoutingDidExists)
        ));
    }

    #[test]
    fn ensure_reuses_existing_identity() {
        let conn = setup_db();
        let first = ensure_routing_did(&conn).unwrap();
        let second = ensure_routing_did(&conn).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn signing_key_matches_verkey() {
        let did = RoutingDid::generate();
        let key = did.signing_key().unwrap();
        assert_eq!(hex::encode(key.verifying_key().to_bytes()), did.verkey);
    }

    #[test]
    fn retrieve_rejects_seed_that_does_not_match_verkey() {
        let conn = setup_db();
        create_routing_did(&conn).unwrap();
        let other = RoutingDid::generate();
        conn.execute(
            "UPDATE routing_did SET seed_hex = ?1 WHERE slot = 1",
            [&other.seed_hex],
        )
        .unwrap();

        assert!(matches!(
            retrieve_routing_did(&conn),
            Err(MediationError::Corrupt { column: "seed_hex", .. })
        ));
    }

    #[test]
    fn retrieve_rejects_malformed_seed() {
        let conn = setup_db();
        create_routing_did(&conn).unwrap();
        conn.execute("UPDATE routing_did SET seed_hex = 'abcd' WHERE slot = 1", [])
            .unwrap();

        assert!(matches!(
            retrieve_routing_did(&conn),
            Err(MediationError::Corrupt { column: "seed_hex", .. })
        ));
    }

    #[test]
    fn debug_output_hides_seed() {
        let did = RoutingDid::generate();
        let rendered = format!("{did:?}");
        assert!(!rendered.contains(&did.seed_hex));
        assert!(rendered.contains(&did.verkey));
    }
}

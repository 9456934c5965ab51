//! Coordination core for coordinate-mediation relationships.
//!
//! A *mediator* relays messages for a *recipient* without a stable address.
//! This crate keeps both sides' view of the relayed keys (the keylist)
//! consistent and drives the request/grant/deny lifecycle of the
//! relationship.
//!
//! # Storage
//!
//! Records live in the SQLite schema created by `mediation-db`. The
//! invariants that matter under concurrency are enforced by the schema and
//! single-statement conditional writes:
//!
//! | Invariant | Enforced by |
//! |-----------|-------------|
//! | one mediation record per connection | `UNIQUE(connection_id)` |
//! | one route per `(connection, key, role)` | `UNIQUE(...)` + `ON CONFLICT DO NOTHING` |
//! | one-way state transitions | `UPDATE ... WHERE state = 'request'` |
//! | one routing identity | single-slot table + `ON CONFLICT DO NOTHING` |

mod error;
mod manager;
pub mod record;
pub mod route;
pub mod routing_did;

pub use error::MediationError;
pub use manager::MediationManager;
pub use record::MediationRecord;
pub use route::RouteRecord;
pub use routing_did::RoutingDid;

use serde::Deserialize;

/// Agent-wide settings the manager reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediationSettings {
    /// Endpoint advertised to recipients in every grant.
    #[serde(default = "default_endpoint")]
    pub default_endpoint: String,
}

fn default_endpoint() -> String {
    "http://localhost:8020".to_string()
}

impl Default for MediationSettings {
    fn default() -> Self {
        Self {
            default_endpoint: default_endpoint(),
        }
    }
}

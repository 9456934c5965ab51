//! Mediation manager: the request/grant/deny lifecycle and keylist
//! reconciliation for both sides of a relationship.
//!
//! The manager holds no mutable state of its own. Every operation takes a
//! pooled connection, performs its record mutations, and returns the protocol
//! message for the transport layer to deliver.

use mediation_db::{DbConnection, DbPool};
use mediation_types::{
    Keylist, KeylistAction, KeylistKey, KeylistPagination, KeylistQuery, KeylistQueryPaginate,
    KeylistResult, KeylistUpdate, KeylistUpdateResponse, KeylistUpdateRule, KeylistUpdated,
    MediationDeny, MediationGrant, MediationRequest, MediationState, RouteRole,
};
use rusqlite::Connection;

use crate::error::MediationError;
use crate::record::{self, MediationRecord};
use crate::route::{self, RouteRecord};
use crate::routing_did::{self, RoutingDid};
use crate::MediationSettings;

/// Stateless orchestrator over a mediation store.
#[derive(Clone)]
pub struct MediationManager {
    pool: DbPool,
    settings: MediationSettings,
}

impl std::fmt::Debug for MediationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediationManager")
            .field("pool_max_size", &self.pool.max_size())
            .field("settings", &self.settings)
            .finish()
    }
}

impl MediationManager {
    /// Creates a manager bound to `pool`.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::Construction`] if no connection can be
    /// obtained or the mediation tables have not been migrated.
    pub fn new(pool: DbPool, settings: MediationSettings) -> Result<Self, MediationError> {
        let conn = pool
            .get()
            .map_err(|e| MediationError::Construction(format!("storage unavailable: {e}")))?;
        let ready = mediation_db::schema_ready(&conn)
            .map_err(|e| MediationError::Construction(format!("schema probe failed: {e}")))?;
        if !ready {
            return Err(MediationError::Construction(
                "mediation tables are missing; run migrations first".to_string(),
            ));
        }
        drop(conn);

        Ok(Self { pool, settings })
    }

    pub fn settings(&self) -> &MediationSettings {
        &self.settings
    }

    fn conn(&self) -> Result<DbConnection, MediationError> {
        Ok(self.pool.get()?)
    }

    // ── Routing identity ─────────────────────────────────────────────

    /// Returns the stored routing identity, if one was created.
    pub fn retrieve_routing_did(&self) -> Result<Option<RoutingDid>, MediationError> {
        let conn = self.conn()?;
        routing_did::retrieve_routing_did(&conn)
    }

    /// Creates the routing identity. Fails if one already exists.
    pub fn create_routing_did(&self) -> Result<RoutingDid, MediationError> {
        let conn = self.conn()?;
        routing_did::create_routing_did(&conn)
    }

    // ── Mediator side: relationship lifecycle ────────────────────────

    /// Records an inbound mediation request for `connection_id`.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::AlreadyExists`] if the connection already
    /// has a mediation record.
    pub fn receive_request(
        &self,
        connection_id: &str,
        request: &MediationRequest,
    ) -> Result<MediationRecord, MediationError> {
        let mut record = MediationRecord::new(connection_id).with_terms(
            request.mediator_terms.clone(),
            request.recipient_terms.clone(),
        );
        let conn = self.conn()?;
        record::insert_record(&conn, &mut record)?;

        tracing::info!(
            connection_id,
            mediation_id = %record.mediation_id,
            "received mediation request"
        );
        Ok(record)
    }

    /// Grants a pending request and returns the grant message.
    ///
    /// The grant advertises the configured default endpoint and the routing
    /// identity's verkey as the only routing key.
    pub fn grant_request(
        &self,
        record: &mut MediationRecord,
    ) -> Result<MediationGrant, MediationError> {
        let mut updated = record.clone();
        let from = updated.transition(MediationState::Granted)?;

        let conn = self.conn()?;
        let routing = routing_did::ensure_routing_did(&conn)?;
        let grant =
            MediationGrant::new(self.settings.default_endpoint.clone(), vec![routing.verkey]);

        updated.endpoint = Some(grant.endpoint.clone());
        updated.routing_keys = grant.routing_keys.clone();
        record::save_transition(&conn, &mut updated, from)?;
        *record = updated;

        tracing::info!(
            connection_id = %record.connection_id,
            endpoint = %grant.endpoint,
            "granted mediation request"
        );
        Ok(grant)
    }

    /// Denies a pending request and returns the deny message.
    pub fn deny_request(
        &self,
        record: &mut MediationRecord,
    ) -> Result<MediationDeny, MediationError> {
        self.apply_transition(record, MediationState::Denied, None, Vec::new())?;
        tracing::info!(connection_id = %record.connection_id, "denied mediation request");
        Ok(MediationDeny::default())
    }

    // ── Recipient side: relationship lifecycle ───────────────────────

    /// Records a local outbound request and returns it with its message.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::AlreadyExists`] if the connection already
    /// has a mediation record.
    pub fn prepare_request(
        &self,
        connection_id: &str,
    ) -> Result<(MediationRecord, MediationRequest), MediationError> {
        let request = MediationRequest::default();
        let mut record = MediationRecord::new(connection_id).with_terms(
            request.mediator_terms.clone(),
            request.recipient_terms.clone(),
        );
        let conn = self.conn()?;
        record::insert_record(&conn, &mut record)?;

        tracing::debug!(connection_id, "prepared mediation request");
        Ok((record, request))
    }

    /// Applies a grant received from the mediator.
    pub fn request_granted(
        &self,
        record: &mut MediationRecord,
        grant: &MediationGrant,
    ) -> Result<(), MediationError> {
        self.apply_transition(
            record,
            MediationState::Granted,
            Some(grant.endpoint.clone()),
            grant.routing_keys.clone(),
        )?;
        tracing::info!(
            connection_id = %record.connection_id,
            endpoint = %grant.endpoint,
            "mediation request granted"
        );
        Ok(())
    }

    /// Applies a deny received from the mediator.
    pub fn request_denied(
        &self,
        record: &mut MediationRecord,
        _deny: &MediationDeny,
    ) -> Result<(), MediationError> {
        self.apply_transition(record, MediationState::Denied, None, Vec::new())?;
        tracing::info!(connection_id = %record.connection_id, "mediation request denied");
        Ok(())
    }

    /// Transitions a copy of `record`, persists it, and only then replaces the
    /// caller's record, so a failed write leaves it untouched.
    fn apply_transition(
        &self,
        record: &mut MediationRecord,
        to: MediationState,
        endpoint: Option<String>,
        routing_keys: Vec<String>,
    ) -> Result<(), MediationError> {
        let mut updated = record.clone();
        let from = updated.transition(to)?;
        if to == MediationState::Granted {
            updated.endpoint = endpoint;
            updated.routing_keys = routing_keys;
        }
        let conn = self.conn()?;
        record::save_transition(&conn, &mut updated, from)?;
        *record = updated;
        Ok(())
    }

    // ── Mediator side: keylist ───────────────────────────────────────

    /// Applies a batch of keylist rules to the record's server-role routes.
    ///
    /// Results come back one per rule, in rule order:
    /// - `add` of a new key is `success`, of a present key `no_change`;
    /// - `remove` of a present key is `success`, of an unknown key
    ///   `client_error`;
    /// - a storage failure on a rule is `server_error` and the batch goes on.
    pub fn update_keylist(
        &self,
        record: &MediationRecord,
        updates: &[KeylistUpdateRule],
    ) -> Result<KeylistUpdateResponse, MediationError> {
        let conn = self.conn()?;
        let updated = updates
            .iter()
            .map(|rule| {
                let result = apply_rule(&conn, &record.connection_id, rule);
                tracing::debug!(
                    connection_id = %record.connection_id,
                    recipient_key = %rule.recipient_key,
                    action = %rule.action,
                    %result,
                    "applied keylist rule"
                );
                KeylistUpdated::new(rule.recipient_key.clone(), rule.action, result)
            })
            .collect();

        Ok(KeylistUpdateResponse::new(updated))
    }

    /// Returns every key mediated for the record's connection.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::NotGranted`] unless the record is granted.
    pub fn get_keylist(
        &self,
        record: &MediationRecord,
    ) -> Result<Vec<RouteRecord>, MediationError> {
        ensure_granted(record)?;
        let conn = self.conn()?;
        route::list_routes(&conn, &record.connection_id, RouteRole::Server)
    }

    /// Returns one window of the mediated keys as a keylist message with
    /// pagination metadata.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::NotGranted`] unless the record is granted.
    pub fn get_keylist_page(
        &self,
        record: &MediationRecord,
        paginate: KeylistQueryPaginate,
    ) -> Result<Keylist, MediationError> {
        ensure_granted(record)?;
        let conn = self.conn()?;
        let routes =
            route::list_routes_page(&conn, &record.connection_id, RouteRole::Server, paginate)?;
        let total = route::count_routes(&conn, &record.connection_id, RouteRole::Server)?;

        let offset = paginate.offset.max(0);
        let count = routes.len() as i64;
        let mut keylist = self.create_keylist_query_response(&routes);
        keylist.pagination = Some(KeylistPagination {
            offset,
            limit: paginate.limit,
            count,
            remaining: (total - offset - count).max(0),
        });
        Ok(keylist)
    }

    /// Renders routes as a keylist message, one key per route in input order.
    pub fn create_keylist_query_response(&self, routes: &[RouteRecord]) -> Keylist {
        Keylist::new(
            routes
                .iter()
                .map(|route| KeylistKey {
                    recipient_key: route.recipient_key.clone(),
                })
                .collect(),
        )
    }

    /// Finds the connection a recipient key is mediated for.
    pub fn find_route(
        &self,
        recipient_key: &str,
    ) -> Result<Option<RouteRecord>, MediationError> {
        let conn = self.conn()?;
        route::find_route(&conn, recipient_key, RouteRole::Server)
    }

    // ── Recipient side: keylist ──────────────────────────────────────

    /// Builds a keylist query. Pass [`KeylistQueryPaginate::default`] for
    /// `limit = -1, offset = 0`.
    pub fn prepare_keylist_query(&self, paginate: KeylistQueryPaginate) -> KeylistQuery {
        KeylistQuery::new(paginate)
    }

    /// Appends an `add` rule to `message`, or to a new update message.
    pub fn add_key(&self, recipient_key: &str, message: Option<KeylistUpdate>) -> KeylistUpdate {
        push_rule(message, recipient_key, KeylistAction::Add)
    }

    /// Appends a `remove` rule to `message`, or to a new update message.
    pub fn remove_key(&self, recipient_key: &str, message: Option<KeylistUpdate>) -> KeylistUpdate {
        push_rule(message, recipient_key, KeylistAction::Remove)
    }

    /// Mirrors the mediator's reported outcomes into the local client-role
    /// routes for `connection_id`.
    ///
    /// Only `success` results mutate storage. Every other result, and any
    /// storage failure, is logged as a warning and skipped; the remaining
    /// results are still applied.
    pub fn store_update_results(&self, connection_id: &str, results: &[KeylistUpdated]) {
        let conn = match self.conn() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(
                    connection_id,
                    error = %e,
                    count = results.len(),
                    "could not store keylist update results"
                );
                return;
            }
        };

        for updated in results {
            if updated.result != KeylistResult::Success {
                tracing::warn!(
                    connection_id,
                    recipient_key = %updated.recipient_key,
                    action = %updated.action,
                    result = %updated.result,
                    "keylist update was not applied by mediator"
                );
                continue;
            }

            let stored = match updated.action {
                KeylistAction::Add => route::insert_route_if_absent(
                    &conn,
                    connection_id,
                    &updated.recipient_key,
                    RouteRole::Client,
                ),
                KeylistAction::Remove => route::delete_route(
                    &conn,
                    connection_id,
                    &updated.recipient_key,
                    RouteRole::Client,
                ),
            };

            match stored {
                Ok(true) => {}
                Ok(false) => tracing::debug!(
                    connection_id,
                    recipient_key = %updated.recipient_key,
                    action = %updated.action,
                    "local keylist already reflected update"
                ),
                Err(e) => tracing::warn!(
                    connection_id,
                    recipient_key = %updated.recipient_key,
                    action = %updated.action,
                    error = %e,
                    "failed to store keylist update result"
                ),
            }
        }
    }

    /// Returns the keys this agent registered with the mediator on
    /// `connection_id`.
    pub fn get_my_keylist(
        &self,
        connection_id: &str,
    ) -> Result<Vec<RouteRecord>, MediationError> {
        let conn = self.conn()?;
        route::list_routes(&conn, connection_id, RouteRole::Client)
    }

    // ── Record lookups ───────────────────────────────────────────────

    pub fn get_record(
        &self,
        mediation_id: &str,
    ) -> Result<Option<MediationRecord>, MediationError> {
        let conn = self.conn()?;
        record::get_record(&conn, mediation_id)
    }

    pub fn get_record_by_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<MediationRecord>, MediationError> {
        let conn = self.conn()?;
        record::get_record_by_connection(&conn, connection_id)
    }

    pub fn list_records(
        &self,
        state: MediationState,
    ) -> Result<Vec<MediationRecord>, MediationError> {
        let conn = self.conn()?;
        record::list_records_by_state(&conn, state)
    }
}

fn ensure_granted(record: &MediationRecord) -> Result<(), MediationError> {
    if record.is_granted() {
        Ok(())
    } else {
        Err(MediationError::NotGranted(record.connection_id.clone()))
    }
}

fn apply_rule(conn: &Connection, connection_id: &str, rule: &KeylistUpdateRule) -> KeylistResult {
    let outcome = match rule.action {
        KeylistAction::Add => route::insert_route_if_absent(
            conn,
            connection_id,
            &rule.recipient_key,
            RouteRole::Server,
        )
        .map(|inserted| {
            if inserted {
                KeylistResult::Success
            } else {
                KeylistResult::NoChange
            }
        }),
        KeylistAction::Remove => {
            route::delete_route(conn, connection_id, &rule.recipient_key, RouteRole::Server).map(
                |deleted| {
                    if deleted {
                        KeylistResult::Success
                    } else {
                        KeylistResult::ClientError
                    }
                },
            )
        }
    };

    outcome.unwrap_or_else(|e| {
        tracing::warn!(
            connection_id,
            recipient_key = %rule.recipient_key,
            action = %rule.action,
            error = %e,
            "keylist rule failed"
        );
        KeylistResult::ServerError
    })
}

fn push_rule(
    message: Option<KeylistUpdate>,
    recipient_key: &str,
    action: KeylistAction,
) -> KeylistUpdate {
    let mut message = message.unwrap_or_default();
    message
        .updates
        .push(KeylistUpdateRule::new(recipient_key, action));
    message
}

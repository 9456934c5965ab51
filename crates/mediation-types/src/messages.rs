//! Coordinate-mediation 1.0 message bodies.
//!
//! Each message carries the `@type` and `@id` headers alongside its body.
//! Building and sending envelopes is the transport's job; this module only
//! defines the JSON shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{KeylistAction, KeylistResult};

/// Base URI shared by every message type of the protocol.
pub const PROTOCOL_URI: &str = "https://didcomm.org/coordinate-mediation/1.0";

/// A message type with a fixed `@type` URI.
pub trait AgentMessage {
    /// The message name appended to [`PROTOCOL_URI`].
    const NAME: &'static str;

    /// Returns the full `@type` URI for this message.
    fn message_type() -> String {
        format!("{PROTOCOL_URI}/{}", Self::NAME)
    }
}

/// Errors produced while decoding an inbound message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload is not valid JSON for the expected shape.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// The `@type` header names a different message.
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedType {
        /// The `@type` the caller asked for.
        expected: String,
        /// The `@type` found in the payload.
        actual: String,
    },
}

/// Generates a fresh `@id` for an outbound message.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Decodes a message and checks its `@type` header.
///
/// # Errors
///
/// Returns [`MessageError::Json`] if the payload does not parse and
/// [`MessageError::UnexpectedType`] if it parses but names another message.
pub fn parse_message<T>(json: &str) -> Result<T, MessageError>
where
    T: AgentMessage + DeserializeOwned,
{
    #[derive(Deserialize)]
    struct Header {
        #[serde(rename = "@type")]
        message_type: String,
    }

    let header: Header = serde_json::from_str(json)?;
    let expected = T::message_type();
    if header.message_type != expected {
        return Err(MessageError::UnexpectedType {
            expected,
            actual: header.message_type,
        });
    }
    Ok(serde_json::from_str(json)?)
}

fn mediate_request_type() -> String {
    MediationRequest::message_type()
}

fn mediate_grant_type() -> String {
    MediationGrant::message_type()
}

fn mediate_deny_type() -> String {
    MediationDeny::message_type()
}

fn keylist_update_type() -> String {
    KeylistUpdate::message_type()
}

fn keylist_update_response_type() -> String {
    KeylistUpdateResponse::message_type()
}

fn keylist_query_type() -> String {
    KeylistQuery::message_type()
}

fn keylist_type() -> String {
    Keylist::message_type()
}

/// Recipient asks a mediator to relay on its behalf.
///
/// Terms are opaque and passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediationRequest {
    #[serde(rename = "@type", default = "mediate_request_type")]
    pub message_type: String,
    #[serde(rename = "@id", default = "new_message_id")]
    pub id: String,
    #[serde(default)]
    pub mediator_terms: Vec<String>,
    #[serde(default)]
    pub recipient_terms: Vec<String>,
}

impl AgentMessage for MediationRequest {
    const NAME: &'static str = "mediate-request";
}

impl MediationRequest {
    pub fn new(mediator_terms: Vec<String>, recipient_terms: Vec<String>) -> Self {
        Self {
            message_type: Self::message_type(),
            id: new_message_id(),
            mediator_terms,
            recipient_terms,
        }
    }
}

impl Default for MediationRequest {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

/// Mediator accepts a request and tells the recipient where to route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediationGrant {
    #[serde(rename = "@type", default = "mediate_grant_type")]
    pub message_type: String,
    #[serde(rename = "@id", default = "new_message_id")]
    pub id: String,
    /// Endpoint the recipient advertises in place of its own.
    pub endpoint: String,
    /// Keys that wrap forwarded messages, outermost last.
    #[serde(default)]
    pub routing_keys: Vec<String>,
}

impl AgentMessage for MediationGrant {
    const NAME: &'static str = "mediate-grant";
}

impl MediationGrant {
    pub fn new(endpoint: impl Into<String>, routing_keys: Vec<String>) -> Self {
        Self {
            message_type: Self::message_type(),
            id: new_message_id(),
            endpoint: endpoint.into(),
            routing_keys,
        }
    }
}

/// Mediator refuses a request, optionally with counter-terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediationDeny {
    #[serde(rename = "@type", default = "mediate_deny_type")]
    pub message_type: String,
    #[serde(rename = "@id", default = "new_message_id")]
    pub id: String,
    #[serde(default)]
    pub mediator_terms: Vec<String>,
    #[serde(default)]
    pub recipient_terms: Vec<String>,
}

impl AgentMessage for MediationDeny {
    const NAME: &'static str = "mediate-deny";
}

impl MediationDeny {
    pub fn new(mediator_terms: Vec<String>, recipient_terms: Vec<String>) -> Self {
        Self {
            message_type: Self::message_type(),
            id: new_message_id(),
            mediator_terms,
            recipient_terms,
        }
    }
}

impl Default for MediationDeny {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

/// One add/remove instruction inside a [`KeylistUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistUpdateRule {
    pub recipient_key: String,
    pub action: KeylistAction,
}

impl KeylistUpdateRule {
    pub fn new(recipient_key: impl Into<String>, action: KeylistAction) -> Self {
        Self {
            recipient_key: recipient_key.into(),
            action,
        }
    }
}

/// Batch of keylist rules sent by the recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistUpdate {
    #[serde(rename = "@type", default = "keylist_update_type")]
    pub message_type: String,
    #[serde(rename = "@id", default = "new_message_id")]
    pub id: String,
    #[serde(default)]
    pub updates: Vec<KeylistUpdateRule>,
}

impl AgentMessage for KeylistUpdate {
    const NAME: &'static str = "keylist-update";
}

impl KeylistUpdate {
    pub fn new(updates: Vec<KeylistUpdateRule>) -> Self {
        Self {
            message_type: Self::message_type(),
            id: new_message_id(),
            updates,
        }
    }
}

impl Default for KeylistUpdate {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Outcome of one rule, echoed back with its key and action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistUpdated {
    pub recipient_key: String,
    pub action: KeylistAction,
    pub result: KeylistResult,
}

impl KeylistUpdated {
    pub fn new(
        recipient_key: impl Into<String>,
        action: KeylistAction,
        result: KeylistResult,
    ) -> Self {
        Self {
            recipient_key: recipient_key.into(),
            action,
            result,
        }
    }
}

/// Mediator's per-rule report for a [`KeylistUpdate`], in rule order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistUpdateResponse {
    #[serde(rename = "@type", default = "keylist_update_response_type")]
    pub message_type: String,
    #[serde(rename = "@id", default = "new_message_id")]
    pub id: String,
    #[serde(default)]
    pub updated: Vec<KeylistUpdated>,
}

impl AgentMessage for KeylistUpdateResponse {
    const NAME: &'static str = "keylist-update-response";
}

impl KeylistUpdateResponse {
    pub fn new(updated: Vec<KeylistUpdated>) -> Self {
        Self {
            message_type: Self::message_type(),
            id: new_message_id(),
            updated,
        }
    }
}

/// Pagination window of a [`KeylistQuery`]. A `limit` of `-1` means no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeylistQueryPaginate {
    pub limit: i64,
    pub offset: i64,
}

impl KeylistQueryPaginate {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    /// Whether the window is unbounded.
    pub fn is_unlimited(&self) -> bool {
        self.limit < 0
    }
}

impl Default for KeylistQueryPaginate {
    fn default() -> Self {
        Self {
            limit: -1,
            offset: 0,
        }
    }
}

/// Recipient asks for (a window of) its registered keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistQuery {
    #[serde(rename = "@type", default = "keylist_query_type")]
    pub message_type: String,
    #[serde(rename = "@id", default = "new_message_id")]
    pub id: String,
    #[serde(default)]
    pub paginate: KeylistQueryPaginate,
}

impl AgentMessage for KeylistQuery {
    const NAME: &'static str = "keylist-query";
}

impl KeylistQuery {
    pub fn new(paginate: KeylistQueryPaginate) -> Self {
        Self {
            message_type: Self::message_type(),
            id: new_message_id(),
            paginate,
        }
    }
}

/// A single entry of a [`Keylist`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistKey {
    pub recipient_key: String,
}

/// Window metadata attached to a paginated [`Keylist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylistPagination {
    pub offset: i64,
    pub limit: i64,
    /// Number of keys in this window.
    pub count: i64,
    /// Number of keys after this window.
    pub remaining: i64,
}

/// Mediator's answer to a [`KeylistQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keylist {
    #[serde(rename = "@type", default = "keylist_type")]
    pub message_type: String,
    #[serde(rename = "@id", default = "new_message_id")]
    pub id: String,
    #[serde(default)]
    pub keys: Vec<KeylistKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<KeylistPagination>,
}

impl AgentMessage for Keylist {
    const NAME: &'static str = "keylist";
}

impl Keylist {
    pub fn new(keys: Vec<KeylistKey>) -> Self {
        Self {
            message_type: Self::message_type(),
            id: new_message_id(),
            keys,
            pagination: None,
        }
    }
}

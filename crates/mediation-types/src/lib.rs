//! Shared vocabulary and wire messages for the coordinate-mediation protocol.
//!
//! Every string in this crate that reaches the wire (`add`, `no_change`,
//! `granted`, message `@type` URIs, field names) is part of the interoperable
//! protocol vocabulary and must not change.
//!
//! No crate in the workspace defines protocol enums of its own; they all
//! depend on `mediation-types` instead.

mod messages;

pub use messages::{
    new_message_id, parse_message, AgentMessage, Keylist, KeylistKey, KeylistPagination,
    KeylistQuery, KeylistQueryPaginate, KeylistUpdate, KeylistUpdateResponse, KeylistUpdateRule,
    KeylistUpdated, MediationDeny, MediationGrant, MediationRequest, MessageError, PROTOCOL_URI,
};

use serde::{Deserialize, Serialize};

/// Error returned when a wire label does not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} label: {label}")]
pub struct ParseLabelError {
    /// The vocabulary the label was parsed against.
    pub kind: &'static str,
    /// The rejected input.
    pub label: String,
}

/// Action carried by a single keylist update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeylistAction {
    /// Start routing messages for the key.
    Add,
    /// Stop routing messages for the key.
    Remove,
}

impl KeylistAction {
    /// Returns the wire label for this action.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}

impl std::fmt::Display for KeylistAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeylistAction {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            _ => Err(ParseLabelError {
                kind: "keylist action",
                label: s.to_string(),
            }),
        }
    }
}

/// Outcome the mediator reports for one keylist update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeylistResult {
    /// The rule was applied.
    Success,
    /// The rule was valid but the keylist already reflected it.
    NoChange,
    /// The rule could not be applied because of the request itself.
    ClientError,
    /// The rule could not be applied because of a mediator-side failure.
    ServerError,
}

impl KeylistResult {
    /// Returns the wire label for this result.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoChange => "no_change",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
        }
    }
}

impl std::fmt::Display for KeylistResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeylistResult {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "no_change" => Ok(Self::NoChange),
            "client_error" => Ok(Self::ClientError),
            "server_error" => Ok(Self::ServerError),
            _ => Err(ParseLabelError {
                kind: "keylist result",
                label: s.to_string(),
            }),
        }
    }
}

/// Lifecycle state of a mediation relationship.
///
/// `Requested` is the only non-terminal state. A relationship moves to
/// `Granted` or `Denied` exactly once and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MediationState {
    /// A request is outstanding.
    #[default]
    #[serde(rename = "request")]
    Requested,
    /// The mediator agreed to relay for the recipient.
    #[serde(rename = "granted")]
    Granted,
    /// The mediator refused the request.
    #[serde(rename = "denied")]
    Denied,
}

impl MediationState {
    /// Returns the stored label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "request",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }

    /// Whether no further transition is allowed out of this state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Requested)
    }
}

impl std::fmt::Display for MediationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediationState {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(Self::Requested),
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            _ => Err(ParseLabelError {
                kind: "mediation state",
                label: s.to_string(),
            }),
        }
    }
}

/// Which side of a mediation relationship a route entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteRole {
    /// The local agent mediates this key for a remote recipient.
    Server,
    /// The local agent registered this key with a remote mediator.
    Client,
}

impl RouteRole {
    /// Returns the stored label for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl std::fmt::Display for RouteRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RouteRole {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            _ => Err(ParseLabelError {
                kind: "route role",
                label: s.to_string(),
            }),
        }
    }
}

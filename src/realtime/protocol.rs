//! Wire protocol
//!
//! Every frame is a JSON envelope `{ "type": string, "data": object }`.
//! Client content events are relayed verbatim; only presence and the
//! `connected` greeting are produced by the server.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::identity::PeerIdentity;

/// Serialized frame shared by every recipient of a fan-out
pub type Payload = Arc<str>;

/// Client event types relayed to the other peers of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    /// Document text changed
    CodeUpdate,
    /// Document language changed
    LanguageChange,
    /// Cursor or selection moved
    CursorMove,
}

impl InboundKind {
    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            InboundKind::CodeUpdate => "code-update",
            InboundKind::LanguageChange => "language-change",
            InboundKind::CursorMove => "cursor-move",
        }
    }
}

impl std::str::FromStr for InboundKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code-update" => Ok(InboundKind::CodeUpdate),
            "language-change" => Ok(InboundKind::LanguageChange),
            "cursor-move" => Ok(InboundKind::CursorMove),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// Why an inbound frame was dropped
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not a JSON object, or `type` is not a string
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Envelope carries no `type`
    #[error("frame has no type")]
    MissingType,

    /// Type is not relayed
    #[error("unknown frame type: {0}")]
    UnknownType(String),

    /// Binary frames are not part of the protocol
    #[error("binary frames are not supported")]
    Binary,

    /// Frame exceeds the inbound size limit
    #[error("frame of {0} bytes exceeds the limit")]
    TooLarge(usize),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Decode just enough of an inbound frame to decide whether to relay it
pub fn classify(text: &str) -> Result<InboundKind, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    envelope.kind.ok_or(ProtocolError::MissingType)?.parse()
}

/// Public part of an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Peer id
    pub id: String,
    /// Display name
    pub display_name: String,
    /// Cursor colour
    pub color: String,
}

impl From<&PeerIdentity> for PeerInfo {
    fn from(identity: &PeerIdentity) -> Self {
        PeerInfo {
            id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            color: identity.color.clone(),
        }
    }
}

/// Greeting sent to a connection once it is registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedEvent {
    /// Session joined
    pub session_id: String,
    /// The connection's own id
    pub user_id: String,
    /// The connection's display name
    pub display_name: String,
    /// The connection's colour
    pub color: String,
    /// Peers already in the session
    pub peers: Vec<PeerInfo>,
}

/// Departure notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerLeft {
    /// Id of the peer that left
    pub id: String,
}

/// Events synthesized by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Sent to a new connection
    Connected(ConnectedEvent),
    /// A peer joined the session
    PeerJoined(PeerInfo),
    /// A peer left the session
    PeerLeft(PeerLeft),
}

impl ServerEvent {
    /// Serialize into a shareable payload
    pub fn to_payload(&self) -> serde_json::Result<Payload> {
        serde_json::to_string(self).map(Payload::from)
    }
}

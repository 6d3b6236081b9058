//! Realtime module - Session broadcast hub
//!
//! - `hub`: the coordinator task owning the connection registry
//! - `connection`: per-client reader/writer pair over an abstract transport
//! - `protocol`: JSON envelopes and inbound classification
//! - `identity`: generated per-connection identities

pub mod connection;
pub mod hub;
pub mod identity;
pub mod protocol;

pub use connection::{Connection, Frame};
pub use hub::{Hub, HubHandle, HubStats, PeerRegistration};
pub use identity::PeerIdentity;
pub use protocol::{classify, InboundKind, Payload, PeerInfo, ProtocolError, ServerEvent};

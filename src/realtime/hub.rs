//! Session hub
//!
//! A single coordinator task owns the registry of live connections, grouped
//! by session id. Register, unregister and broadcast requests arrive on one
//! ordered command queue, so every membership change and fan-out decision is
//! serialized without a lock.
//!
//! Delivery into a peer's outbound queue never blocks: a full queue evicts
//! that peer in the same pass and the remaining peers are told it left.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::identity::PeerIdentity;
use super::protocol::{ConnectedEvent, Payload, PeerInfo, PeerLeft, ServerEvent};
use crate::error::{Error, Result};

/// Everything the hub needs to route frames to one connection
#[derive(Debug)]
pub struct PeerRegistration {
    session_id: String,
    identity: PeerIdentity,
    queue: mpsc::Sender<Payload>,
}

impl PeerRegistration {
    /// Create a registration and the receiving end of its outbound queue
    pub fn new(
        session_id: impl Into<String>,
        identity: PeerIdentity,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Payload>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let registration = PeerRegistration {
            session_id: session_id.into(),
            identity,
            queue,
        };
        (registration, rx)
    }

    /// Session this connection belongs to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Identity of the connection
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }
}

/// Hub counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered connections
    pub connections: usize,
    /// Sessions with at least one connection
    pub sessions: usize,
    /// Peers dropped because their queue was full
    pub evictions: u64,
}

enum HubCommand {
    Register(PeerRegistration),
    Unregister {
        peer_id: String,
    },
    Broadcast {
        sender_id: String,
        payload: Payload,
    },
    Members {
        session_id: String,
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Cloneable handle to the coordinator task
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Register a connection. Fails only if the hub has stopped.
    pub async fn register(&self, registration: PeerRegistration) -> Result<()> {
        self.commands
            .send(HubCommand::Register(registration))
            .await
            .map_err(|_| Error::Internal("session hub stopped".to_string()))
    }

    /// Unregister a connection; a no-op if it is not registered
    pub async fn unregister(&self, peer_id: &str) {
        let command = HubCommand::Unregister {
            peer_id: peer_id.to_string(),
        };
        if self.commands.send(command).await.is_err() {
            debug!("Hub stopped before unregistering {}", peer_id);
        }
    }

    /// Relay `payload` to every other connection in the sender's session
    pub async fn broadcast_to_others(&self, sender_id: &str, payload: Payload) {
        let command = HubCommand::Broadcast {
            sender_id: sender_id.to_string(),
            payload,
        };
        if self.commands.send(command).await.is_err() {
            debug!("Hub stopped, dropping frame from {}", sender_id);
        }
    }

    /// Peers currently in `session_id`, in join order
    pub async fn members(&self, session_id: &str) -> Vec<PeerInfo> {
        let (reply, rx) = oneshot::channel();
        let command = HubCommand::Members {
            session_id: session_id.to_string(),
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Current hub counters
    pub async fn stats(&self) -> HubStats {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(HubCommand::Stats { reply }).await.is_err() {
            return HubStats::default();
        }
        rx.await.unwrap_or_default()
    }
}

struct Member {
    identity: PeerIdentity,
    queue: mpsc::Sender<Payload>,
    joined: u64,
}

/// Registry owned by the coordinator task
#[derive(Default)]
pub struct Hub {
    sessions: HashMap<String, HashMap<String, Member>>,
    peers: HashMap<String, String>,
    next_join: u64,
    evictions: u64,
}

impl Hub {
    /// Start the coordinator. It runs until every handle is dropped.
    pub fn spawn(command_capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(command_capacity.max(1));
        let task = tokio::spawn(Hub::default().run(rx));
        (HubHandle { commands }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        info!("Session hub started");
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        info!("Session hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(registration) => self.register(registration),
            HubCommand::Unregister { peer_id } => self.unregister(&peer_id),
            HubCommand::Broadcast { sender_id, payload } => self.broadcast(&sender_id, &payload),
            HubCommand::Members { session_id, reply } => {
                let _ = reply.send(self.members_of(&session_id));
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn register(&mut self, registration: PeerRegistration) {
        let PeerRegistration {
            session_id,
            identity,
            queue,
        } = registration;

        if self.peers.contains_key(&identity.id) {
            warn!("Peer {} is already registered", identity.id);
            return;
        }

        let connected = ServerEvent::Connected(ConnectedEvent {
            session_id: session_id.clone(),
            user_id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            color: identity.color.clone(),
            peers: self.members_of(&session_id),
        });
        let Some(greeting) = encode(&connected) else {
            return;
        };
        if queue.try_send(greeting).is_err() {
            debug!("Peer {} went away before registration", identity.id);
            return;
        }

        let joined = ServerEvent::PeerJoined(PeerInfo::from(&identity));
        let peer_id = identity.id.clone();
        let member = Member {
            identity,
            queue,
            joined: self.next_join,
        };
        self.next_join += 1;

        self.peers.insert(peer_id.clone(), session_id.clone());
        let members = self.sessions.entry(session_id.clone()).or_default();
        members.insert(peer_id.clone(), member);
        info!(
            "Peer {} joined session {} ({} connected)",
            peer_id,
            session_id,
            members.len()
        );

        if let Some(payload) = encode(&joined) {
            self.fan_out(&session_id, Some(&peer_id), &payload);
        }
    }

    fn unregister(&mut self, peer_id: &str) {
        let Some(session_id) = self.remove(peer_id) else {
            return;
        };
        info!("Peer {} left session {}", peer_id, session_id);
        self.announce_left(&session_id, peer_id);
    }

    fn broadcast(&mut self, sender_id: &str, payload: &Payload) {
        let Some(session_id) = self.peers.get(sender_id).cloned() else {
            debug!("Dropping frame from unregistered peer {}", sender_id);
            return;
        };
        self.fan_out(&session_id, Some(sender_id), payload);
    }

    /// Enqueue on every member of `session_id` except `exclude`, evicting
    /// members whose queue is full or closed.
    fn fan_out(&mut self, session_id: &str, exclude: Option<&str>, payload: &Payload) {
        let mut dropped = Vec::new();
        if let Some(members) = self.sessions.get(session_id) {
            for (peer_id, member) in members {
                if exclude == Some(peer_id.as_str()) {
                    continue;
                }
                match member.queue.try_send(payload.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("Evicting slow peer {} from session {}", peer_id, session_id);
                        dropped.push((peer_id.clone(), true));
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Peer {} queue closed, removing", peer_id);
                        dropped.push((peer_id.clone(), false));
                    }
                }
            }
        }

        for (peer_id, evicted) in dropped {
            // Removing drops the member's sender, which closes its queue
            if self.remove(&peer_id).is_some() {
                if evicted {
                    self.evictions += 1;
                }
                self.announce_left(session_id, &peer_id);
            }
        }
    }

    fn announce_left(&mut self, session_id: &str, peer_id: &str) {
        let left = ServerEvent::PeerLeft(PeerLeft {
            id: peer_id.to_string(),
        });
        if let Some(payload) = encode(&left) {
            self.fan_out(session_id, None, &payload);
        }
    }

    /// Remove a peer, returning the session it belonged to
    fn remove(&mut self, peer_id: &str) -> Option<String> {
        let session_id = self.peers.remove(peer_id)?;
        if let Some(members) = self.sessions.get_mut(&session_id) {
            members.remove(peer_id);
            if members.is_empty() {
                self.sessions.remove(&session_id);
                debug!("Session {} is empty", session_id);
            }
        }
        Some(session_id)
    }

    fn members_of(&self, session_id: &str) -> Vec<PeerInfo> {
        let Some(members) = self.sessions.get(session_id) else {
            return Vec::new();
        };
        let mut members: Vec<&Member> = members.values().collect();
        members.sort_by_key(|member| member.joined);
        members
            .into_iter()
            .map(|member| PeerInfo::from(&member.identity))
            .collect()
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.peers.len(),
            sessions: self.sessions.len(),
            evictions: self.evictions,
        }
    }
}

fn encode(event: &ServerEvent) -> Option<Payload> {
    match event.to_payload() {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!("Failed to encode server event: {}", e);
            None
        }
    }
}

//! Connection - one client's live link to a session
//!
//! A connection is transport-agnostic: it consumes a stream of inbound
//! [`Frame`]s and writes outbound frames to a sink. The server adapts
//! websocket messages to frames; tests use in-memory channels.
//!
//! Two tasks run per connection:
//! - the reader classifies inbound frames and asks the hub to relay them,
//!   tearing the connection down on close, transport error or a missed read
//!   deadline;
//! - the writer drains the outbound queue, coalescing whatever is already
//!   queued into one flush, and sends a ping every `ping_interval`.
//!
//! Whichever finishes first ends the connection and unregisters it.

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::hub::{HubHandle, PeerRegistration};
use super::identity::PeerIdentity;
use super::protocol::{classify, Payload, ProtocolError};
use crate::config::RealtimeConfig;
use crate::error::Result;

/// Transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text message
    Text(String),
    /// Binary message
    Binary(Vec<u8>),
    /// Liveness probe
    Ping(Vec<u8>),
    /// Liveness answer
    Pong(Vec<u8>),
    /// Close handshake
    Close,
}

/// A client connection scoped to one session
pub struct Connection {
    hub: HubHandle,
    session_id: String,
    identity: PeerIdentity,
    config: RealtimeConfig,
}

impl Connection {
    /// Create a connection with a freshly generated identity
    pub fn new(hub: HubHandle, session_id: impl Into<String>, config: RealtimeConfig) -> Self {
        Connection {
            hub,
            session_id: session_id.into(),
            identity: PeerIdentity::generate(),
            config,
        }
    }

    /// Use a specific identity
    pub fn with_identity(mut self, identity: PeerIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Identity of this connection
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Register with the hub and pump frames until the connection ends.
    ///
    /// Returns once the connection has been unregistered.
    pub async fn serve<S, E, K>(self, stream: S, sink: K) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Frame, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
        K: Sink<Frame> + Send + Unpin + 'static,
        K::Error: Display + Send,
    {
        let peer_id = self.identity.id.clone();
        let (registration, queue) =
            PeerRegistration::new(&self.session_id, self.identity, self.config.queue_capacity);
        self.hub.register(registration).await?;
        info!("Connection {} opened for session {}", peer_id, self.session_id);

        let mut writer = tokio::spawn(write_loop(sink, queue, self.config.clone(), peer_id.clone()));
        let mut reader = tokio::spawn(read_loop(
            stream,
            self.hub.clone(),
            peer_id.clone(),
            self.config.clone(),
        ));

        tokio::select! {
            _ = &mut reader => {
                // Unregistering closes the queue; the writer then sends Close and exits
                self.hub.unregister(&peer_id).await;
                let _ = writer.await;
            }
            _ = &mut writer => {
                reader.abort();
                self.hub.unregister(&peer_id).await;
            }
        }

        info!("Connection {} closed", peer_id);
        Ok(())
    }
}

async fn read_loop<S, E>(mut stream: S, hub: HubHandle, peer_id: String, config: RealtimeConfig)
where
    S: Stream<Item = std::result::Result<Frame, E>> + Unpin,
    E: Display,
{
    loop {
        // Any frame, pongs included, resets the deadline
        let frame = match timeout(config.read_timeout, stream.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!("Transport error from {}: {}", peer_id, e);
                break;
            }
            Ok(None) => {
                debug!("Transport from {} ended", peer_id);
                break;
            }
            Err(_) => {
                info!("Connection {} missed its read deadline", peer_id);
                break;
            }
        };

        match frame {
            Frame::Text(text) => {
                if text.len() > config.max_frame_bytes {
                    warn!("Dropping frame from {}: {}", peer_id, ProtocolError::TooLarge(text.len()));
                    continue;
                }
                match classify(&text) {
                    Ok(kind) => {
                        debug!("Relaying {} from {}", kind.as_str(), peer_id);
                        hub.broadcast_to_others(&peer_id, Payload::from(text)).await;
                    }
                    Err(e) => warn!("Dropping frame from {}: {}", peer_id, e),
                }
            }
            Frame::Binary(_) => warn!("Dropping frame from {}: {}", peer_id, ProtocolError::Binary),
            Frame::Ping(_) | Frame::Pong(_) => {}
            Frame::Close => {
                debug!("Connection {} sent close", peer_id);
                break;
            }
        }
    }
}

async fn write_loop<K>(
    mut sink: K,
    mut queue: mpsc::Receiver<Payload>,
    config: RealtimeConfig,
    peer_id: String,
) where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(payload) = next else {
                    debug!("Queue for {} closed", peer_id);
                    let _ = timeout(config.write_timeout, sink.send(Frame::Close)).await;
                    break;
                };
                match timeout(config.write_timeout, write_batch(&mut sink, &mut queue, payload)).await {
                    Ok(Ok(count)) => debug!("Wrote {} frame(s) to {}", count, peer_id),
                    Ok(Err(e)) => {
                        debug!("Write to {} failed: {}", peer_id, e);
                        break;
                    }
                    Err(_) => {
                        warn!("Write to {} timed out", peer_id);
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                match timeout(config.write_timeout, sink.send(Frame::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("Ping to {} failed: {}", peer_id, e);
                        break;
                    }
                    Err(_) => {
                        warn!("Ping to {} timed out", peer_id);
                        break;
                    }
                }
            }
        }
    }

    let _ = timeout(config.write_timeout, sink.close()).await;
}

/// Write `first` plus everything already queued, then flush once
async fn write_batch<K>(
    sink: &mut K,
    queue: &mut mpsc::Receiver<Payload>,
    first: Payload,
) -> std::result::Result<usize, K::Error>
where
    K: Sink<Frame> + Unpin,
{
    sink.feed(Frame::Text(first.to_string())).await?;
    let mut count = 1;
    while let Ok(payload) = queue.try_recv() {
        sink.feed(Frame::Text(payload.to_string())).await?;
        count += 1;
    }
    sink.flush().await?;
    Ok(count)
}

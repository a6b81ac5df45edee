//! Realtime session scoped to a single match room.
//!
//! Wraps one UDP socket speaking the bincode `Packet` protocol with the
//! relay. An unset or unparseable relay endpoint is a valid configuration:
//! the session simply never activates and the match proceeds offline.

use bincode::{deserialize, serialize};
use log::{info, warn};
use shared::{Packet, PlayerIdentity, PositionSnapshot, PROTOCOL_VERSION};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Connection lifecycle as observed from this side of the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    PeerJoined,
    PeerLeft,
}

/// Inbound events the match loop consumes. One consumer, one stream; there
/// is no handler registration to leak or double-subscribe.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PeerJoined(PlayerIdentity),
    PositionReceived(PositionSnapshot),
    PeerAck(String),
    PeerLeft(PlayerIdentity),
    Rejected(String),
}

pub struct RealtimeSession {
    socket: Option<UdpSocket>,
    relay_addr: Option<SocketAddr>,
    state: ConnectionState,
    identity: PlayerIdentity,
    closed: bool,
    buffer: [u8; 2048],
}

impl RealtimeSession {
    /// Opens a session for the given match. `endpoint` is the relay address;
    /// `None` (or a bad address, or a bind/send failure) degrades to a
    /// disconnected session rather than an error.
    pub async fn open(
        endpoint: Option<&str>,
        match_id: &str,
        identity: PlayerIdentity,
    ) -> Self {
        let mut session = Self {
            socket: None,
            relay_addr: None,
            state: ConnectionState::Disconnected,
            identity,
            closed: false,
            buffer: [0u8; 2048],
        };

        let endpoint = match endpoint {
            Some(e) => e,
            None => {
                info!("No realtime endpoint configured, playing offline");
                return session;
            }
        };

        let relay_addr: SocketAddr = match endpoint.parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Bad realtime endpoint '{}': {}", endpoint, e);
                return session;
            }
        };

        session.state = ConnectionState::Connecting;
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(e) => {
                warn!("Could not bind realtime socket: {}", e);
                session.state = ConnectionState::Disconnected;
                return session;
            }
        };

        let join = Packet::Join {
            protocol_version: PROTOCOL_VERSION,
            match_id: match_id.to_string(),
            identity: session.identity.clone(),
        };
        session.socket = Some(socket);
        session.relay_addr = Some(relay_addr);
        if session.send(&join).await {
            info!("Joined room {} as {}", match_id, session.identity.truncated());
            session.state = ConnectionState::Connected;
        }
        session
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while the session has a live transport.
    pub fn is_online(&self) -> bool {
        self.socket.is_some() && !self.closed
    }

    /// Broadcasts the full position snapshot to the room. No-op offline.
    pub async fn announce(&mut self, snapshot: &PositionSnapshot) {
        let packet = Packet::Move {
            snapshot: snapshot.clone(),
        };
        self.send(&packet).await;
    }

    /// Forwards a short acknowledgement note to the room.
    pub async fn acknowledge(&mut self, note: &str) {
        let packet = Packet::Ack {
            note: note.to_string(),
        };
        self.send(&packet).await;
    }

    async fn send(&mut self, packet: &Packet) -> bool {
        let (socket, addr) = match (&self.socket, self.relay_addr) {
            (Some(s), Some(a)) if !self.closed => (s, a),
            _ => return false,
        };
        let data = match serialize(packet) {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to encode packet: {}", e);
                return false;
            }
        };
        match socket.send_to(&data, addr).await {
            Ok(_) => true,
            Err(e) => {
                // Transport failure is not retried; the session just goes dark.
                warn!("Realtime send failed: {}", e);
                self.state = ConnectionState::Disconnected;
                self.socket = None;
                false
            }
        }
    }

    /// Waits for the next room event. Returns `None` when the session is
    /// offline, closed, or hits an unrecoverable receive error; after
    /// `close()` no event is ever delivered again.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if self.closed {
                return None;
            }
            let socket = self.socket.as_ref()?;
            let (len, from) = match socket.recv_from(&mut self.buffer).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Realtime receive failed: {}", e);
                    self.state = ConnectionState::Disconnected;
                    self.socket = None;
                    return None;
                }
            };
            if Some(from) != self.relay_addr {
                continue;
            }
            let packet = match deserialize::<Packet>(&self.buffer[0..len]) {
                Ok(p) => p,
                Err(_) => {
                    warn!("Dropping malformed packet from relay");
                    continue;
                }
            };
            match packet {
                Packet::Joined { peer_present } => {
                    if peer_present {
                        // The opponent was already in the room when we joined.
                        self.state = ConnectionState::PeerJoined;
                    }
                    continue;
                }
                Packet::PeerJoined { identity } => {
                    // The relay may echo our own join back; ignore it.
                    if identity == self.identity {
                        continue;
                    }
                    self.state = ConnectionState::PeerJoined;
                    return Some(SessionEvent::PeerJoined(identity));
                }
                Packet::PeerMove { snapshot } => {
                    return Some(SessionEvent::PositionReceived(snapshot));
                }
                Packet::PeerAck { note } => {
                    return Some(SessionEvent::PeerAck(note));
                }
                Packet::PeerLeft { identity } => {
                    self.state = ConnectionState::PeerLeft;
                    return Some(SessionEvent::PeerLeft(identity));
                }
                Packet::Rejected { reason } => {
                    warn!("Relay rejected us: {}", reason);
                    self.state = ConnectionState::Disconnected;
                    self.socket = None;
                    return Some(SessionEvent::Rejected(reason));
                }
                _ => {
                    warn!("Unexpected packet type from relay");
                    continue;
                }
            }
        }
    }

    /// Releases the room slot. Idempotent; runs on every exit path.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.send(&Packet::Leave).await;
        self.closed = true;
        self.socket = None;
        self.state = ConnectionState::Disconnected;
    }
}

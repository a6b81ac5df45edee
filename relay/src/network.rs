//! Relay network layer forwarding room traffic between matched clients

use crate::rooms::{Departure, Occupant, RoomManager};
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use shared::{Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from background tasks to the main relay loop
#[derive(Debug)]
pub enum RelayMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    OccupantTimeout {
        departure: Departure,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Outgoing packets queued for the sender task
#[derive(Debug)]
pub enum Outbound {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// The relay: accepts joins into match rooms and forwards every position
/// broadcast and acknowledgement to the other occupant of the room. It
/// keeps no game state and trusts the clients to referee themselves.
pub struct Relay {
    socket: Arc<UdpSocket>,
    rooms: Arc<RwLock<RoomManager>>,

    // Communication channels
    relay_tx: mpsc::UnboundedSender<RelayMessage>,
    relay_rx: mpsc::UnboundedReceiver<RelayMessage>,
    out_tx: mpsc::UnboundedSender<Outbound>,
    out_rx: Option<mpsc::UnboundedReceiver<Outbound>>,
}

impl Relay {
    pub async fn new(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Relay listening on {}", socket.local_addr()?);

        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Relay {
            socket,
            rooms: Arc::new(RwLock::new(RoomManager::new())),
            relay_tx,
            relay_rx,
            out_tx,
            out_rx: Some(out_rx),
        })
    }

    /// The bound address, for callers that asked for port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns the task that continuously listens for incoming packets
    fn spawn_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let relay_tx = self.relay_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if relay_tx
                                .send(RelayMessage::PacketReceived { packet, addr })
                                .is_err()
                            {
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the task that drains the outgoing packet queue
    fn spawn_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut out_rx = match self.out_rx.take() {
            Some(rx) => rx,
            None => return,
        };

        tokio::spawn(async move {
            while let Some(Outbound::SendPacket { packet, addr }) = out_rx.recv().await {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns the task that evicts silent occupants
    fn spawn_timeout_checker(&self) {
        let rooms = Arc::clone(&self.rooms);
        let relay_tx = self.relay_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let departures = {
                    let mut rooms_guard = rooms.write().await;
                    rooms_guard.check_timeouts()
                };

                for departure in departures {
                    if relay_tx
                        .send(RelayMessage::OccupantTimeout { departure })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.out_tx.send(Outbound::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn forward_to(&self, peers: &[Occupant], packet: &Packet) {
        for peer in peers {
            self.send_packet(packet.clone(), peer.addr);
        }
    }

    fn notify_departure(&self, departure: &Departure) {
        let packet = Packet::PeerLeft {
            identity: departure.occupant.identity.clone(),
        };
        self.forward_to(&departure.remaining, &packet);
    }

    /// Routes one inbound packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Join {
                protocol_version,
                match_id,
                identity,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        "{} joined with protocol {} (want {})",
                        addr, protocol_version, PROTOCOL_VERSION
                    );
                    self.send_packet(
                        Packet::Rejected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                let joined = {
                    let mut rooms = self.rooms.write().await;
                    rooms.join(&match_id, identity.clone(), addr)
                };

                match joined {
                    Some(peers) => {
                        self.send_packet(
                            Packet::Joined {
                                peer_present: !peers.is_empty(),
                            },
                            addr,
                        );
                        // Both directions learn who they are facing.
                        for peer in &peers {
                            self.send_packet(
                                Packet::PeerJoined {
                                    identity: identity.clone(),
                                },
                                peer.addr,
                            );
                            self.send_packet(
                                Packet::PeerJoined {
                                    identity: peer.identity.clone(),
                                },
                                addr,
                            );
                        }
                    }
                    None => {
                        self.send_packet(
                            Packet::Rejected {
                                reason: "Room full".to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Move { snapshot } => {
                let peers = {
                    let mut rooms = self.rooms.write().await;
                    if !rooms.touch(addr) {
                        warn!("Dropping move from unknown sender {}", addr);
                        return;
                    }
                    rooms.peers_of(addr)
                };
                self.forward_to(&peers, &Packet::PeerMove { snapshot });
            }

            Packet::Ack { note } => {
                let peers = {
                    let mut rooms = self.rooms.write().await;
                    if !rooms.touch(addr) {
                        return;
                    }
                    rooms.peers_of(addr)
                };
                self.forward_to(&peers, &Packet::PeerAck { note });
            }

            Packet::Leave => {
                let departure = {
                    let mut rooms = self.rooms.write().await;
                    rooms.remove_addr(addr)
                };
                if let Some(departure) = departure {
                    self.notify_departure(&departure);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Main relay loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_receiver();
        self.spawn_sender();
        self.spawn_timeout_checker();

        info!("Relay started successfully");

        while let Some(message) = self.relay_rx.recv().await {
            match message {
                RelayMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await;
                }
                RelayMessage::OccupantTimeout { departure } => {
                    info!(
                        "{} timed out of room {}",
                        departure.occupant.identity.truncated(),
                        departure.match_id
                    );
                    self.notify_departure(&departure);
                }
                RelayMessage::Shutdown => {
                    info!("Relay shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

//! Match room management for the relay
//!
//! This module handles the relay-side bookkeeping of match rooms, including:
//! - Room membership lifecycle (join, leave, timeout)
//! - Address-to-occupant resolution for routing forwarded packets
//! - Room capacity enforcement and empty-room cleanup
//! - Activity tracking for automatic disconnect detection
//!
//! The relay never inspects game state. Rooms exist purely so that a packet
//! from one occupant can be routed to the other occupants of the same match.

use log::info;
use shared::{PlayerIdentity, PEER_TIMEOUT_SECS};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Both players of a match; the relay forwards, it does not referee.
pub const ROOM_CAPACITY: usize = 2;

/// One connected participant of a match room
///
/// Tracks the identity announced at join time, the network address used for
/// routing, and the last time any packet arrived from that address.
#[derive(Debug, Clone)]
pub struct Occupant {
    /// Wallet identity announced in the join packet
    pub identity: PlayerIdentity,
    /// Network address for forwarding room traffic
    pub addr: SocketAddr,
    /// Last time we received any packet from this occupant
    pub last_seen: Instant,
}

impl Occupant {
    pub fn new(identity: PlayerIdentity, addr: SocketAddr) -> Self {
        Self {
            identity,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Returns true if no packets have arrived from this occupant within
    /// the timeout, indicating a likely disconnect.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// An occupant that was removed from a room, together with the occupants
/// still in it who need to be told.
#[derive(Debug)]
pub struct Departure {
    pub match_id: String,
    pub occupant: Occupant,
    pub remaining: Vec<Occupant>,
}

/// Manages every match room on the relay
///
/// Rooms are created on the first join for a match id and removed when the
/// last occupant leaves. An address can occupy at most one room at a time;
/// re-joining from the same address moves the occupant rather than
/// duplicating them.
pub struct RoomManager {
    /// Occupants per match id
    rooms: HashMap<String, Vec<Occupant>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    /// Attempts to add an occupant to the room for `match_id`
    ///
    /// Returns the occupants already in the room on success, or `None` when
    /// the room is full. Any previous membership of the same address (in
    /// this or another room) is dropped first, so a reconnecting client
    /// never counts against capacity twice.
    pub fn join(
        &mut self,
        match_id: &str,
        identity: PlayerIdentity,
        addr: SocketAddr,
    ) -> Option<Vec<Occupant>> {
        self.remove_addr(addr);

        let room = self.rooms.entry(match_id.to_string()).or_default();
        if room.len() >= ROOM_CAPACITY {
            return None;
        }

        let peers = room.clone();
        info!(
            "{} joined room {} from {} ({} occupant(s) present)",
            identity.truncated(),
            match_id,
            addr,
            peers.len()
        );
        room.push(Occupant::new(identity, addr));
        Some(peers)
    }

    /// Refreshes the activity timestamp for whoever sends from `addr`
    ///
    /// Returns false if the address is in no room, which tells the caller
    /// to drop the packet rather than forward it.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        for room in self.rooms.values_mut() {
            if let Some(occupant) = room.iter_mut().find(|o| o.addr == addr) {
                occupant.last_seen = Instant::now();
                return true;
            }
        }
        false
    }

    /// The other occupants of the room `addr` belongs to
    pub fn peers_of(&self, addr: SocketAddr) -> Vec<Occupant> {
        for room in self.rooms.values() {
            if room.iter().any(|o| o.addr == addr) {
                return room.iter().filter(|o| o.addr != addr).cloned().collect();
            }
        }
        Vec::new()
    }

    /// Removes the occupant at `addr` from their room, if any
    ///
    /// Empty rooms are deleted. Returns the departure so the caller can
    /// notify the remaining occupants.
    pub fn remove_addr(&mut self, addr: SocketAddr) -> Option<Departure> {
        let match_id = self
            .rooms
            .iter()
            .find(|(_, room)| room.iter().any(|o| o.addr == addr))
            .map(|(id, _)| id.clone())?;

        let room = self.rooms.get_mut(&match_id)?;
        let index = room.iter().position(|o| o.addr == addr)?;
        let occupant = room.remove(index);
        let remaining = room.clone();
        info!(
            "{} left room {} ({} occupant(s) remain)",
            occupant.identity.truncated(),
            match_id,
            remaining.len()
        );
        if remaining.is_empty() {
            self.rooms.remove(&match_id);
        }
        Some(Departure {
            match_id,
            occupant,
            remaining,
        })
    }

    /// Checks for and removes timed-out occupants
    ///
    /// Occupants that have sent nothing within the peer timeout are dropped
    /// from their rooms. Returns one departure per removal so the remaining
    /// occupant can be told their opponent is gone.
    pub fn check_timeouts(&mut self) -> Vec<Departure> {
        let timeout = Duration::from_secs(PEER_TIMEOUT_SECS);
        let stale: Vec<SocketAddr> = self
            .rooms
            .values()
            .flatten()
            .filter(|o| o.is_timed_out(timeout))
            .map(|o| o.addr)
            .collect();

        stale
            .into_iter()
            .filter_map(|addr| self.remove_addr(addr))
            .collect()
    }

    /// Returns the number of active rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Returns the total number of connected occupants
    pub fn occupant_count(&self) -> usize {
        self.rooms.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

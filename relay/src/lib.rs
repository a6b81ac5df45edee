//! # Match Relay Library
//!
//! The relay is the rendezvous point for realtime match synchronization.
//! Two clients playing the same match join the room named by their match
//! id, and from then on every position broadcast, acknowledgement and
//! departure is forwarded to the other occupant.
//!
//! ## What the relay is not
//!
//! The relay is deliberately dumb. It holds no boards, validates no moves
//! and settles no wagers; all of that lives on the clients. Its entire
//! contract is room membership plus best-effort forwarding, which keeps it
//! stateless enough to restart at any time without corrupting a match.
//!
//! ## Architecture
//!
//! A single event loop owns all room state. Background tasks feed it:
//! - **Receiver**: listens on the UDP socket and decodes packets
//! - **Sender**: drains the outgoing packet queue
//! - **Timeout checker**: evicts occupants that have gone silent, so the
//!   remaining player learns about a vanished opponent even without an
//!   explicit leave packet
//!
//! ## Module Organization
//!
//! - [`rooms`] tracks room membership, capacity and occupant activity.
//! - [`network`] owns the socket, the packet routing and the event loop.

pub mod network;
pub mod rooms;

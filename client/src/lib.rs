//! # Wagered Chess Client Library
//!
//! Client-side implementation for peer-to-peer wagered chess: matchmaking,
//! realtime match synchronization over the relay, and on-device settlement
//! of the wager once the game concludes.
//!
//! ## Architecture Overview
//!
//! There is no authoritative game server. Each client owns a full copy of
//! the game and the relay only forwards position broadcasts between the two
//! players in a match room. Correctness therefore lives entirely on the
//! client: the rules engine validates every move, the sync machine keeps a
//! single authoritative board per client, and the settlement coordinator
//! guarantees the wager is paid out exactly once.
//!
//! ### Wholesale Snapshot Sync
//! Peers broadcast the complete move list after every move instead of a
//! diff. Applying a broadcast rebuilds the board from scratch, which makes
//! delivery coalescing and re-delivery harmless.
//!
//! ### One-Shot Settlement
//! The first terminal trigger (checkmate, draw, or opponent forfeit) writes
//! the settlement record and flips the machine to its absorbing terminal
//! phase synchronously, before any network I/O. Every later trigger is a
//! no-op, no matter how events interleave.
//!
//! ### Graceful Degradation
//! A missing or unreachable relay endpoint is a supported configuration:
//! the session stays offline and the match runs as a local hot-seat board.
//!
//! ## Module Organization
//!
//! - [`rules`] wraps the chess engine behind snapshot-oriented operations.
//! - [`sync`] is the pure match state machine: phases, move arbitration,
//!   wholesale snapshot replacement, terminal detection.
//! - [`session`] speaks the bincode packet protocol with the relay and
//!   exposes room traffic as one typed event stream.
//! - [`settlement`] detects conclusion exactly once and distributes the
//!   wager through the ledger and transfer seams.
//! - [`ledger`] is the HTTP client for the matchmaking/ledger service plus
//!   the `TokenTransfer` trait that stands in for a wallet.
//! - [`matchmaking`] validates bids and drives the queue flow.
//! - [`runner`] is the match loop tying session, sync and settlement
//!   together.
//! - [`rendering`] draws the board and move list for the terminal.

pub mod ledger;
pub mod matchmaking;
pub mod rendering;
pub mod rules;
pub mod runner;
pub mod session;
pub mod settlement;
pub mod sync;

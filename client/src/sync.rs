//! Match synchronization state machine.
//!
//! Owns the single authoritative board for a match and reconciles local
//! move attempts with remote snapshot broadcasts. Pure state, no I/O: the
//! runner feeds it events and ships accepted snapshots to the session.
//!
//! Remote broadcasts replace the position wholesale rather than replaying
//! diffs. The transport may coalesce rapid deliveries, so each broadcast is
//! treated as a complete statement of the game; under strictly alternating
//! turns that makes application idempotent and order-insensitive. The
//! sender is trusted: only the player who legally made a move broadcasts.

use crate::rules::{GameStatus, RulesAdapter};
use log::{debug, warn};
use shared::{MatchData, MatchOutcome, PlayerIdentity, PositionSnapshot, Side};

/// Lifecycle of the machine. `Terminal` is absorbing: once entered, no
/// position mutation is accepted from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingPeer,
    Active,
    Terminal,
}

/// Result of a local move attempt. Anything but `Accepted` leaves state
/// untouched and broadcasts nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    Accepted(PositionSnapshot),
    NotActive,
    NotYourTurn,
    Illegal,
}

/// Result of applying a remote broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    Applied,
    /// Machine already terminal; broadcast ignored, not errored.
    IgnoredTerminal,
    /// Snapshot did not parse or replay; position unchanged.
    IgnoredMalformed,
}

/// Immutable view handed to presentation.
#[derive(Debug, Clone)]
pub struct GameView {
    pub position: PositionSnapshot,
    pub fen: String,
    pub orientation: Side,
    pub phase: Phase,
    pub side_to_move: Side,
}

pub struct MatchSync {
    rules: RulesAdapter,
    phase: Phase,
    local: PlayerIdentity,
    /// Side the local wallet occupies; `None` for spectators, who may watch
    /// but never move.
    plays: Option<Side>,
    /// Offline play has one board and no opponent; both sides are driven
    /// locally and the turn guard is waived.
    hotseat: bool,
}

impl MatchSync {
    pub fn new(data: &MatchData, local: PlayerIdentity) -> Self {
        let plays = data.side_of(&local);
        Self {
            rules: RulesAdapter::new(),
            phase: Phase::Idle,
            local,
            plays,
            hotseat: false,
        }
    }

    /// Brings the machine out of `Idle` once the session outcome is known.
    /// With a live transport we wait for the peer; offline play skips
    /// straight to `Active` in hot-seat mode.
    pub fn begin(&mut self, online: bool) {
        if self.phase != Phase::Idle {
            return;
        }
        self.phase = if online {
            Phase::AwaitingPeer
        } else {
            self.hotseat = true;
            Phase::Active
        };
    }

    /// First join notification from a different identity activates the
    /// match. Joins echoing the local identity are ignored.
    pub fn peer_joined(&mut self, who: &PlayerIdentity) -> bool {
        if self.phase == Phase::AwaitingPeer && who != &self.local {
            debug!("Opponent {} confirmed, match active", who.truncated());
            self.phase = Phase::Active;
            true
        } else {
            false
        }
    }

    /// Derived orientation: the side the local player occupies, defaulting
    /// to white's view for spectators.
    pub fn orientation(&self) -> Side {
        self.plays.unwrap_or(Side::White)
    }

    pub fn plays(&self) -> Option<Side> {
        self.plays
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Validates and applies a local move. On acceptance the position is
    /// replaced with the post-move position and the new snapshot is
    /// returned for broadcast.
    pub fn attempt_local_move(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<char>,
    ) -> MoveOutcome {
        if self.phase != Phase::Active {
            return MoveOutcome::NotActive;
        }
        if !self.hotseat {
            match self.plays {
                Some(side) if side == self.rules.side_to_move() => {}
                _ => return MoveOutcome::NotYourTurn,
            }
        }
        if !self.rules.try_move(from, to, promotion) {
            return MoveOutcome::Illegal;
        }
        MoveOutcome::Accepted(self.rules.snapshot())
    }

    /// Replaces the position wholesale from a peer broadcast. The snapshot
    /// is rebuilt from scratch, never merged into the current board.
    pub fn apply_remote(&mut self, snapshot: &PositionSnapshot) -> RemoteOutcome {
        if self.phase == Phase::Terminal {
            return RemoteOutcome::IgnoredTerminal;
        }
        match RulesAdapter::from_snapshot(snapshot) {
            Ok(rebuilt) => {
                self.rules = rebuilt;
                RemoteOutcome::Applied
            }
            Err(e) => {
                warn!("Ignoring unusable remote snapshot: {}", e);
                RemoteOutcome::IgnoredMalformed
            }
        }
    }

    /// Terminal condition of the current position, if any, with the reason
    /// string settlement reports to the ledger.
    pub fn terminal_condition(&self) -> Option<(MatchOutcome, &'static str)> {
        match self.rules.status() {
            GameStatus::Checkmate { winner } => {
                Some((MatchOutcome::Winner(winner), "Checkmate"))
            }
            GameStatus::Stalemate | GameStatus::Draw => Some((MatchOutcome::Draw, "Draw")),
            GameStatus::Ongoing => None,
        }
    }

    /// Enters the absorbing terminal phase.
    pub fn mark_terminal(&mut self) {
        self.phase = Phase::Terminal;
    }

    pub fn view(&self) -> GameView {
        GameView {
            position: self.rules.snapshot(),
            fen: self.rules.fen(),
            orientation: self.orientation(),
            phase: self.phase,
            side_to_move: self.rules.side_to_move(),
        }
    }

    pub fn rules(&self) -> &RulesAdapter {
        &self.rules
    }
}

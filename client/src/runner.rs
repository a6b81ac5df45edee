//! Match loop: wires the session, the sync machine and settlement together
//! and drives them from player commands plus room events.
//!
//! The loop owns every exit path. Whichever way a match ends, the session is
//! closed before settlement I/O runs, so the room slot is released even when
//! the ledger is slow or down.

use crate::ledger::{MatchLedger, TokenTransfer};
use crate::rendering;
use crate::session::{RealtimeSession, SessionEvent};
use crate::settlement::{SettlementCoordinator, SettlementReport};
use crate::sync::{MatchSync, MoveOutcome, Phase, RemoteOutcome};
use log::{debug, info, warn};
use shared::{MatchData, SettlementRecord};
use tokio::sync::mpsc;

/// Player input, already parsed. Fed through a channel so tests can drive
/// the loop without a terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Move {
        from: String,
        to: String,
        promotion: Option<char>,
    },
    Quit,
}

/// Parses one input line: a coordinate move like "e2e4" or "e7e8q", or
/// "quit"/"exit". Blank and unrecognized lines parse to `None`.
pub fn parse_command(line: &str) -> Option<PlayerCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
        return Some(PlayerCommand::Quit);
    }
    let chars: Vec<char> = line.chars().collect();
    if chars.len() == 4 || chars.len() == 5 {
        return Some(PlayerCommand::Move {
            from: chars[0..2].iter().collect(),
            to: chars[2..4].iter().collect(),
            promotion: chars.get(4).copied(),
        });
    }
    None
}

enum Input {
    Session(Option<SessionEvent>),
    Command(Option<PlayerCommand>),
}

enum Step {
    Continue,
    Settle(SettlementRecord),
    Quit,
}

pub struct MatchRunner<L, T> {
    data: MatchData,
    session: RealtimeSession,
    sync: MatchSync,
    settlement: SettlementCoordinator<L, T>,
    commands: mpsc::Receiver<PlayerCommand>,
}

impl<L: MatchLedger, T: TokenTransfer> MatchRunner<L, T> {
    pub fn new(
        data: MatchData,
        session: RealtimeSession,
        sync: MatchSync,
        settlement: SettlementCoordinator<L, T>,
        commands: mpsc::Receiver<PlayerCommand>,
    ) -> Self {
        Self {
            data,
            session,
            sync,
            settlement,
            commands,
        }
    }

    /// Runs the match to its end. Returns the settlement report when the
    /// match concluded, `None` when the player quit an unfinished game.
    pub async fn run(mut self) -> Option<SettlementReport> {
        self.sync.begin(self.session.is_online());
        if self.sync.phase() == Phase::AwaitingPeer {
            info!("Waiting for the opponent to join...");
        }
        rendering::print_view(self.sync.rules(), &self.sync.view());

        loop {
            let input = if self.session.is_online() {
                tokio::select! {
                    event = self.session.next_event() => Input::Session(event),
                    command = self.commands.recv() => Input::Command(command),
                }
            } else {
                Input::Command(self.commands.recv().await)
            };

            let step = match input {
                Input::Session(event) => self.handle_event(event).await,
                Input::Command(command) => self.handle_command(command).await,
            };

            match step {
                Step::Continue => {}
                Step::Settle(record) => {
                    self.session.close().await;
                    let report = self.settlement.execute(record, &self.data).await;
                    info!(
                        "Match {} over ({}), continue at {}",
                        self.data.match_id,
                        report.record.reason,
                        report.destination()
                    );
                    return Some(report);
                }
                Step::Quit => {
                    self.session.close().await;
                    return None;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: Option<SessionEvent>) -> Step {
        let Some(event) = event else {
            // The session already dropped its socket; the loop falls back to
            // command-only polling on the next iteration.
            warn!("Realtime transport lost, match continues offline");
            return Step::Continue;
        };
        match event {
            SessionEvent::PeerJoined(who) => {
                if self.sync.peer_joined(&who) {
                    info!("Opponent {} is here, game on", who.truncated());
                    self.session.acknowledge("ready").await;
                    rendering::print_view(self.sync.rules(), &self.sync.view());
                }
                Step::Continue
            }
            SessionEvent::PositionReceived(snapshot) => {
                if self.sync.apply_remote(&snapshot) == RemoteOutcome::Applied {
                    rendering::print_view(self.sync.rules(), &self.sync.view());
                    if let Some(record) = self.settlement.observe_position(&mut self.sync) {
                        return Step::Settle(record);
                    }
                }
                Step::Continue
            }
            SessionEvent::PeerAck(note) => {
                debug!("Peer ack: {}", note);
                Step::Continue
            }
            SessionEvent::PeerLeft(who) => {
                info!("{} left the match", who.truncated());
                match self.settlement.observe_peer_left(&mut self.sync) {
                    Some(record) => Step::Settle(record),
                    None => Step::Continue,
                }
            }
            SessionEvent::Rejected(reason) => {
                warn!("Relay turned us away: {}", reason);
                Step::Continue
            }
        }
    }

    async fn handle_command(&mut self, command: Option<PlayerCommand>) -> Step {
        let command = match command {
            // Input channel closed; treat it like a quit.
            None => return Step::Quit,
            Some(c) => c,
        };
        match command {
            PlayerCommand::Quit => Step::Quit,
            PlayerCommand::Move {
                from,
                to,
                promotion,
            } => {
                match self.sync.attempt_local_move(&from, &to, promotion) {
                    MoveOutcome::Accepted(snapshot) => {
                        self.session.announce(&snapshot).await;
                        rendering::print_view(self.sync.rules(), &self.sync.view());
                        if let Some(record) = self.settlement.observe_position(&mut self.sync) {
                            return Step::Settle(record);
                        }
                    }
                    MoveOutcome::NotActive => info!("No active game to move in"),
                    MoveOutcome::NotYourTurn => info!("Not your turn"),
                    MoveOutcome::Illegal => info!("Illegal move: {}{}", from, to),
                }
                Step::Continue
            }
        }
    }
}

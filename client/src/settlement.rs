//! Exactly-once detection and execution of match conclusion.
//!
//! Trigger checks run whenever the sync machine reports a new position or
//! the session reports the peer leaving. The first trigger that fires
//! constructs the `SettlementRecord` and flips the machine to `Terminal`
//! synchronously, before any I/O suspends; every later trigger finds the
//! record already present and is a no-op. The terminal transition is never
//! rolled back, not even when reporting fails: re-opening a concluded match
//! risks a double payout, so the recovery path for a failed report is
//! manual support.

use crate::ledger::{LedgerError, MatchLedger, TokenTransfer, TransferError};
use crate::sync::{MatchSync, Phase};
use log::{error, info, warn};
use shared::{MatchData, MatchOutcome, PlayerIdentity, SettlementRecord, Side, Wager};

/// Outcome of a single payout leg. Each leg is independent: a failed leg
/// neither blocks nor rolls back the other.
#[derive(Debug)]
pub enum PayoutStatus {
    Sent {
        amount: f64,
        recipient: PlayerIdentity,
    },
    Failed(TransferError),
}

/// Everything the presentation layer needs once settlement ran.
#[derive(Debug)]
pub struct SettlementReport {
    pub record: SettlementRecord,
    pub ledger_result: Result<(), LedgerError>,
    pub payouts: Vec<PayoutStatus>,
}

impl SettlementReport {
    /// Terminal settlement always lands on the match's finished page.
    pub fn destination(&self) -> String {
        format!("/fin/{}", self.record.match_id)
    }

    pub fn fully_paid(&self) -> bool {
        self.ledger_result.is_ok()
            && self
                .payouts
                .iter()
                .all(|p| matches!(p, PayoutStatus::Sent { .. }))
    }
}

pub struct SettlementCoordinator<L, T> {
    ledger: L,
    transfer: T,
    match_id: String,
    wager: Wager,
    record: Option<SettlementRecord>,
}

impl<L: MatchLedger, T: TokenTransfer> SettlementCoordinator<L, T> {
    pub fn new(ledger: L, transfer: T, match_id: impl Into<String>, wager: Wager) -> Self {
        Self {
            ledger,
            transfer,
            match_id: match_id.into(),
            wager,
            record: None,
        }
    }

    pub fn settled(&self) -> Option<&SettlementRecord> {
        self.record.as_ref()
    }

    /// Checks the board for a terminal condition. Synchronous: when it
    /// fires, the record exists and the machine is `Terminal` before the
    /// caller can suspend, which is what makes the one-shot guarantee hold
    /// under back-to-back event delivery.
    pub fn observe_position(&mut self, sync: &mut MatchSync) -> Option<SettlementRecord> {
        if self.record.is_some() || sync.phase() == Phase::Terminal {
            return None;
        }
        let (outcome, reason) = sync.terminal_condition()?;
        Some(self.conclude(sync, outcome, reason))
    }

    /// A peer leaving an active match forfeits it to the remaining player.
    /// Spectators observe the departure but settle nothing.
    pub fn observe_peer_left(&mut self, sync: &mut MatchSync) -> Option<SettlementRecord> {
        if self.record.is_some() || sync.phase() != Phase::Active {
            return None;
        }
        let winner = sync.plays()?;
        Some(self.conclude(sync, MatchOutcome::Winner(winner), "Opponent Left"))
    }

    fn conclude(
        &mut self,
        sync: &mut MatchSync,
        outcome: MatchOutcome,
        reason: &str,
    ) -> SettlementRecord {
        sync.mark_terminal();
        let record = SettlementRecord {
            match_id: self.match_id.clone(),
            outcome,
            reason: reason.to_string(),
        };
        self.record = Some(record.clone());
        record
    }

    /// Reports the record and distributes the wager. Called once, after one
    /// of the observers returned a record.
    pub async fn execute(
        &self,
        record: SettlementRecord,
        data: &MatchData,
    ) -> SettlementReport {
        let hash = record.ledger_hash(data);
        let ledger_result = self.ledger.post_result(&record.match_id, &hash).await;

        let mut payouts = Vec::new();
        match &ledger_result {
            Err(e) => {
                // Do not move money on an unrecorded result; surface and stop.
                error!(
                    "Could not update winner for match {}: {}. Contact support for disputes.",
                    record.match_id, e
                );
            }
            Ok(()) => match record.outcome {
                MatchOutcome::Winner(side) => {
                    let amount = self.wager.winner_payout();
                    let recipient = data.stake(side).hash.clone();
                    payouts.push(self.pay(amount, recipient).await);
                }
                MatchOutcome::Draw => {
                    for side in [Side::White, Side::Black] {
                        let amount = self.wager.draw_refund(side);
                        let recipient = data.stake(side).hash.clone();
                        payouts.push(self.pay(amount, recipient).await);
                    }
                }
            },
        }

        SettlementReport {
            record,
            ledger_result,
            payouts,
        }
    }

    async fn pay(&self, amount: f64, recipient: PlayerIdentity) -> PayoutStatus {
        match self.transfer.transfer(amount, &recipient).await {
            Ok(()) => {
                info!("{} tokens sent to {}", amount, recipient.truncated());
                PayoutStatus::Sent { amount, recipient }
            }
            Err(e) => {
                warn!("Payout failed, contact support for details: {}", e);
                PayoutStatus::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use async_trait::async_trait;
    use shared::{PlayerStake, PositionSnapshot};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingLedger {
        posts: Arc<Mutex<Vec<(String, String)>>>,
        fail: bool,
    }

    #[async_trait]
    impl MatchLedger for RecordingLedger {
        async fn post_result(&self, match_id: &str, hash: &str) -> Result<(), LedgerError> {
            if self.fail {
                return Err(LedgerError::Status(500));
            }
            self.posts
                .lock()
                .unwrap()
                .push((match_id.to_string(), hash.to_string()));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingTransfer {
        sent: Arc<Mutex<Vec<(f64, String)>>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl TokenTransfer for RecordingTransfer {
        async fn transfer(
            &self,
            amount: f64,
            recipient: &PlayerIdentity,
        ) -> Result<(), TransferError> {
            if let Some(bad) = &self.fail_for {
                if &PlayerIdentity::new(bad.clone()) == recipient {
                    return Err(TransferError {
                        amount,
                        recipient: recipient.clone(),
                        message: "insufficient gas".to_string(),
                    });
                }
            }
            self.sent
                .lock()
                .unwrap()
                .push((amount, recipient.as_str().to_string()));
            Ok(())
        }
    }

    fn match_data() -> MatchData {
        MatchData {
            match_id: "M1".to_string(),
            white: PlayerStake {
                hash: "0xAA11".into(),
                amount: 1000.0,
            },
            black: PlayerStake {
                hash: "0xBB22".into(),
                amount: 1000.0,
            },
            winner: None,
        }
    }

    fn active_sync(local: &str) -> MatchSync {
        let mut sync = MatchSync::new(&match_data(), local.into());
        sync.begin(true);
        sync.peer_joined(&(if local == "0xAA11" { "0xBB22" } else { "0xAA11" }).into());
        sync
    }

    fn coordinator(
        ledger: RecordingLedger,
        transfer: RecordingTransfer,
    ) -> SettlementCoordinator<RecordingLedger, RecordingTransfer> {
        SettlementCoordinator::new(ledger, transfer, "M1", match_data().wager(0.1))
    }

    #[tokio::test]
    async fn test_checkmate_settles_once_and_pays_winner() {
        let ledger = RecordingLedger::default();
        let transfer = RecordingTransfer::default();
        let mut coordinator = coordinator(ledger.clone(), transfer.clone());

        let mut sync = active_sync("0xAA11");
        sync.apply_remote(&PositionSnapshot::new(
            "e2e4 e7e5 f1c4 b8c6 d1h5 g8f6 h5f7",
        ));

        let record = coordinator.observe_position(&mut sync).unwrap();
        assert_eq!(record.outcome, MatchOutcome::Winner(Side::White));
        assert_eq!(record.reason, "Checkmate");
        assert_eq!(sync.phase(), Phase::Terminal);

        // Re-delivery of the same position changes nothing.
        assert!(coordinator.observe_position(&mut sync).is_none());
        assert!(coordinator.observe_peer_left(&mut sync).is_none());

        let report = coordinator.execute(record, &match_data()).await;
        assert!(report.fully_paid());
        assert_eq!(report.destination(), "/fin/M1");

        let posts = ledger.posts.lock().unwrap();
        assert_eq!(posts.as_slice(), &[("M1".to_string(), "0xAA11".to_string())]);
        let sent = transfer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_approx_eq!(sent[0].0, 1800.0, 1e-9);
        assert_eq!(sent[0].1, "0xAA11");
    }

    #[tokio::test]
    async fn test_draw_pays_both_sides_independently() {
        let ledger = RecordingLedger::default();
        let transfer = RecordingTransfer {
            fail_for: Some("0xAA11".to_string()),
            ..Default::default()
        };
        let mut coordinator = coordinator(ledger.clone(), transfer.clone());

        let mut sync = active_sync("0xAA11");
        sync.apply_remote(&PositionSnapshot::new(
            "g1f3 g8f6 f3g1 f6g8 g1f3 g8f6 f3g1 f6g8",
        ));

        let record = coordinator.observe_position(&mut sync).unwrap();
        assert_eq!(record.outcome, MatchOutcome::Draw);
        assert_eq!(record.ledger_hash(&match_data()), "Draw");

        let report = coordinator.execute(record, &match_data()).await;
        assert!(!report.fully_paid());
        assert_eq!(report.payouts.len(), 2);
        assert!(matches!(report.payouts[0], PayoutStatus::Failed(_)));
        match &report.payouts[1] {
            PayoutStatus::Sent { amount, recipient } => {
                assert_approx_eq!(*amount, 900.0, 1e-9);
                assert_eq!(recipient, &PlayerIdentity::new("0xBB22"));
            }
            other => panic!("expected black refund to go through, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_draw_refund_amounts() {
        let ledger = RecordingLedger::default();
        let transfer = RecordingTransfer::default();
        let mut coordinator = coordinator(ledger, transfer.clone());

        let mut sync = active_sync("0xBB22");
        sync.apply_remote(&PositionSnapshot::new(
            "g1f3 g8f6 f3g1 f6g8 g1f3 g8f6 f3g1 f6g8",
        ));
        let record = coordinator.observe_position(&mut sync).unwrap();
        coordinator.execute(record, &match_data()).await;

        let sent = transfer.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_approx_eq!(sent[0].0, 900.0, 1e-9);
        assert_eq!(sent[0].1, "0xAA11");
        assert_approx_eq!(sent[1].0, 900.0, 1e-9);
        assert_eq!(sent[1].1, "0xBB22");
    }

    #[tokio::test]
    async fn test_forfeit_by_disconnect_settles_exactly_once() {
        let ledger = RecordingLedger::default();
        let transfer = RecordingTransfer::default();
        let mut coordinator = coordinator(ledger.clone(), transfer.clone());

        let mut sync = active_sync("0xBB22");
        let record = coordinator.observe_peer_left(&mut sync).unwrap();
        assert_eq!(record.outcome, MatchOutcome::Winner(Side::Black));
        assert_eq!(record.reason, "Opponent Left");

        // The same event delivered twice is a no-op the second time.
        assert!(coordinator.observe_peer_left(&mut sync).is_none());

        let report = coordinator.execute(record, &match_data()).await;
        assert!(report.fully_paid());
        let sent = transfer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_approx_eq!(sent[0].0, 1800.0, 1e-9);
        assert_eq!(sent[0].1, "0xBB22");
    }

    #[tokio::test]
    async fn test_peer_left_after_terminal_is_noop() {
        let ledger = RecordingLedger::default();
        let transfer = RecordingTransfer::default();
        let mut coordinator = coordinator(ledger, transfer);

        let mut sync = active_sync("0xAA11");
        sync.apply_remote(&PositionSnapshot::new("f2f3 e7e5 g2g4 d8h4"));
        let record = coordinator.observe_position(&mut sync).unwrap();
        assert_eq!(record.outcome, MatchOutcome::Winner(Side::Black));

        // Opponent disconnecting right after delivering mate must not
        // overwrite the checkmate settlement.
        assert!(coordinator.observe_peer_left(&mut sync).is_none());
        assert_eq!(coordinator.settled().unwrap().reason, "Checkmate");
    }

    #[tokio::test]
    async fn test_spectator_never_settles_a_forfeit() {
        let ledger = RecordingLedger::default();
        let transfer = RecordingTransfer::default();
        let mut coordinator = coordinator(ledger, transfer);

        let mut sync = MatchSync::new(&match_data(), "0xCC33".into());
        sync.begin(true);
        sync.peer_joined(&"0xAA11".into());
        assert!(coordinator.observe_peer_left(&mut sync).is_none());
        assert!(coordinator.settled().is_none());
    }

    #[tokio::test]
    async fn test_ledger_failure_blocks_payouts_but_not_terminal() {
        let ledger = RecordingLedger {
            fail: true,
            ..Default::default()
        };
        let transfer = RecordingTransfer::default();
        let mut coordinator = coordinator(ledger, transfer.clone());

        let mut sync = active_sync("0xAA11");
        sync.apply_remote(&PositionSnapshot::new(
            "e2e4 e7e5 f1c4 b8c6 d1h5 g8f6 h5f7",
        ));
        let record = coordinator.observe_position(&mut sync).unwrap();
        let report = coordinator.execute(record, &match_data()).await;

        assert!(report.ledger_result.is_err());
        assert!(report.payouts.is_empty());
        assert!(transfer.sent.lock().unwrap().is_empty());
        // Terminal is never rolled back; the game must not resume.
        assert_eq!(sync.phase(), Phase::Terminal);
        assert!(coordinator.observe_position(&mut sync).is_none());
    }
}

//! Integration tests for the wagered chess stack
//!
//! These tests validate cross-crate interactions and real network behavior:
//! the wire protocol, the relay forwarding loop, and a complete match played
//! between two clients through a live relay, settled on both ends.

use bincode::{deserialize, serialize};
use shared::{
    MatchData, MatchOutcome, Packet, PlayerIdentity, PlayerStake, PositionSnapshot, Side,
    PROTOCOL_VERSION,
};

use async_trait::async_trait;
use client::ledger::{LedgerError, MatchLedger, TokenTransfer, TransferError};
use client::session::{RealtimeSession, SessionEvent};
use client::settlement::SettlementCoordinator;
use client::sync::{MatchSync, MoveOutcome, Phase, RemoteOutcome};
use relay::network::Relay;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    #[test]
    fn packet_serialization_roundtrip() {
        let test_packets = vec![
            Packet::Join {
                protocol_version: PROTOCOL_VERSION,
                match_id: "M1".to_string(),
                identity: PlayerIdentity::new("0xAA11"),
            },
            Packet::Move {
                snapshot: PositionSnapshot::new("e2e4 e7e5"),
            },
            Packet::Ack {
                note: "ready".to_string(),
            },
            Packet::Leave,
            Packet::Joined { peer_present: true },
            Packet::PeerJoined {
                identity: PlayerIdentity::new("0xBB22"),
            },
            Packet::PeerMove {
                snapshot: PositionSnapshot::new("e2e4"),
            },
            Packet::PeerAck {
                note: "ready".to_string(),
            },
            Packet::PeerLeft {
                identity: PlayerIdentity::new("0xBB22"),
            },
            Packet::Rejected {
                reason: "Room full".to_string(),
            },
        ];

        for packet in test_packets {
            let serialized = serialize(&packet).unwrap();
            let deserialized: Packet = deserialize(&serialized).unwrap();
            assert_eq!(format!("{:?}", packet), format!("{:?}", deserialized));
        }
    }

    #[test]
    fn malformed_bytes_do_not_parse() {
        let garbage = [0xFFu8; 32];
        assert!(deserialize::<Packet>(&garbage).is_err());
        assert!(deserialize::<Packet>(&[]).is_err());
    }

    #[test]
    fn identity_comparison_survives_the_wire() {
        let packet = Packet::PeerJoined {
            identity: PlayerIdentity::new("0xAbCd"),
        };
        let bytes = serialize(&packet).unwrap();
        match deserialize::<Packet>(&bytes).unwrap() {
            Packet::PeerJoined { identity } => {
                assert_eq!(identity, PlayerIdentity::new("0XABCD"));
            }
            other => panic!("expected PeerJoined, got {:?}", other),
        }
    }
}

async fn start_relay() -> SocketAddr {
    let mut relay = Relay::new("127.0.0.1:0").await.unwrap();
    let addr = relay.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = relay.run().await;
    });
    addr
}

/// RELAY SESSION TESTS
///
/// Two real sessions joined through a live relay.
mod relay_tests {
    use super::*;

    #[tokio::test]
    async fn sessions_meet_in_a_room_and_exchange_traffic() {
        let relay = start_relay().await;
        let endpoint = relay.to_string();

        let mut white =
            RealtimeSession::open(Some(&endpoint), "M1", PlayerIdentity::new("0xAA11")).await;
        assert!(white.is_online());
        let mut black =
            RealtimeSession::open(Some(&endpoint), "M1", PlayerIdentity::new("0xBB22")).await;

        // Both sides learn of each other.
        match white.next_event().await.unwrap() {
            SessionEvent::PeerJoined(id) => assert_eq!(id, PlayerIdentity::new("0xBB22")),
            other => panic!("expected PeerJoined, got {:?}", other),
        }
        match black.next_event().await.unwrap() {
            SessionEvent::PeerJoined(id) => assert_eq!(id, PlayerIdentity::new("0xAA11")),
            other => panic!("expected PeerJoined, got {:?}", other),
        }

        // A position broadcast crosses the room.
        white.announce(&PositionSnapshot::new("e2e4")).await;
        match black.next_event().await.unwrap() {
            SessionEvent::PositionReceived(snap) => assert_eq!(snap.as_str(), "e2e4"),
            other => panic!("expected PositionReceived, got {:?}", other),
        }

        // So does an acknowledgement.
        black.acknowledge("ready").await;
        match white.next_event().await.unwrap() {
            SessionEvent::PeerAck(note) => assert_eq!(note, "ready"),
            other => panic!("expected PeerAck, got {:?}", other),
        }

        // Leaving surfaces as a departure on the other side.
        black.close().await;
        match white.next_event().await.unwrap() {
            SessionEvent::PeerLeft(id) => assert_eq!(id, PlayerIdentity::new("0xBB22")),
            other => panic!("expected PeerLeft, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rooms_do_not_leak_across_matches() {
        let relay = start_relay().await;
        let endpoint = relay.to_string();

        let mut a =
            RealtimeSession::open(Some(&endpoint), "M1", PlayerIdentity::new("0xAA11")).await;
        let mut b =
            RealtimeSession::open(Some(&endpoint), "M2", PlayerIdentity::new("0xBB22")).await;

        // A move in M2 must never reach M1.
        b.announce(&PositionSnapshot::new("e2e4")).await;
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(300), a.next_event()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn full_room_rejects_a_third_session() {
        let relay = start_relay().await;
        let endpoint = relay.to_string();

        let _a =
            RealtimeSession::open(Some(&endpoint), "M1", PlayerIdentity::new("0xAA11")).await;
        let _b =
            RealtimeSession::open(Some(&endpoint), "M1", PlayerIdentity::new("0xBB22")).await;
        let mut c =
            RealtimeSession::open(Some(&endpoint), "M1", PlayerIdentity::new("0xCC33")).await;

        match c.next_event().await.unwrap() {
            SessionEvent::Rejected(reason) => assert_eq!(reason, "Room full"),
            other => panic!("expected Rejected, got {:?}", other),
        }
        assert!(!c.is_online());
    }
}

/// FULL MATCH TESTS
///
/// A complete wagered game played move by move through a live relay, with
/// settlement recorded on both clients.
mod match_tests {
    use super::*;

    #[derive(Clone, Default)]
    struct RecordingLedger {
        posts: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl MatchLedger for RecordingLedger {
        async fn post_result(&self, match_id: &str, hash: &str) -> Result<(), LedgerError> {
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
    }

    #[async_trait]
    impl TokenTransfer for RecordingTransfer {
        async fn transfer(
            &self,
            amount: f64,
            recipient: &PlayerIdentity,
        ) -> Result<(), TransferError> {
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

    struct Player {
        session: RealtimeSession,
        sync: MatchSync,
        coordinator: SettlementCoordinator<RecordingLedger, RecordingTransfer>,
    }

    impl Player {
        async fn join(
            endpoint: &str,
            wallet: &str,
            ledger: RecordingLedger,
            transfer: RecordingTransfer,
        ) -> Self {
            let data = match_data();
            let session =
                RealtimeSession::open(Some(endpoint), &data.match_id, wallet.into()).await;
            let mut sync = MatchSync::new(&data, wallet.into());
            sync.begin(session.is_online());
            let coordinator = SettlementCoordinator::new(
                ledger,
                transfer,
                data.match_id.clone(),
                data.wager(0.1),
            );
            Self {
                session,
                sync,
                coordinator,
            }
        }

        async fn await_peer(&mut self) {
            match self.session.next_event().await.unwrap() {
                SessionEvent::PeerJoined(id) => {
                    assert!(self.sync.peer_joined(&id));
                }
                other => panic!("expected PeerJoined, got {:?}", other),
            }
        }

        async fn play(&mut self, from: &str, to: &str) {
            match self.sync.attempt_local_move(from, to, None) {
                MoveOutcome::Accepted(snapshot) => self.session.announce(&snapshot).await,
                other => panic!("move {}{} not accepted: {:?}", from, to, other),
            }
        }

        async fn receive(&mut self) {
            match self.session.next_event().await.unwrap() {
                SessionEvent::PositionReceived(snapshot) => {
                    assert_eq!(self.sync.apply_remote(&snapshot), RemoteOutcome::Applied);
                }
                other => panic!("expected PositionReceived, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn two_clients_play_a_match_to_mate_and_both_settle() {
        let relay = start_relay().await;
        let endpoint = relay.to_string();

        let white_ledger = RecordingLedger::default();
        let white_transfer = RecordingTransfer::default();
        let black_ledger = RecordingLedger::default();
        let black_transfer = RecordingTransfer::default();

        let mut white = Player::join(
            &endpoint,
            "0xAA11",
            white_ledger.clone(),
            white_transfer.clone(),
        )
        .await;
        let mut black = Player::join(
            &endpoint,
            "0xBB22",
            black_ledger.clone(),
            black_transfer.clone(),
        )
        .await;

        white.await_peer().await;
        black.await_peer().await;
        assert_eq!(white.sync.phase(), Phase::Active);
        assert_eq!(black.sync.phase(), Phase::Active);

        // Fool's mate, alternating through the relay.
        white.play("f2", "f3").await;
        black.receive().await;
        black.play("e7", "e5").await;
        white.receive().await;
        white.play("g2", "g4").await;
        black.receive().await;
        black.play("d8", "h4").await;
        white.receive().await;

        // Both ends see the same final position and the same conclusion.
        assert_eq!(
            white.sync.view().position.as_str(),
            "f2f3 e7e5 g2g4 d8h4"
        );
        assert_eq!(white.sync.view().position, black.sync.view().position);

        let white_record = white
            .coordinator
            .observe_position(&mut white.sync)
            .expect("white should detect mate");
        let black_record = black
            .coordinator
            .observe_position(&mut black.sync)
            .expect("black should detect mate");
        assert_eq!(white_record.outcome, MatchOutcome::Winner(Side::Black));
        assert_eq!(black_record.outcome, white_record.outcome);
        assert_eq!(white.sync.phase(), Phase::Terminal);
        assert_eq!(black.sync.phase(), Phase::Terminal);

        // Sessions close before settlement I/O, releasing the room.
        white.session.close().await;
        black.session.close().await;

        let white_report = white.coordinator.execute(white_record, &match_data()).await;
        let black_report = black.coordinator.execute(black_record, &match_data()).await;
        assert!(white_report.fully_paid());
        assert!(black_report.fully_paid());
        assert_eq!(white_report.destination(), "/fin/M1");

        // Each client posts the winner's hash and pays the winner once.
        for ledger in [&white_ledger, &black_ledger] {
            let posts = ledger.posts.lock().unwrap();
            assert_eq!(posts.as_slice(), &[("M1".to_string(), "0xBB22".to_string())]);
        }
        for transfer in [&white_transfer, &black_transfer] {
            let sent = transfer.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert!((sent[0].0 - 1800.0).abs() < 1e-9);
            assert_eq!(sent[0].1, "0xBB22");
        }
    }

    #[tokio::test]
    async fn disconnect_mid_match_forfeits_to_the_remaining_player() {
        let relay = start_relay().await;
        let endpoint = relay.to_string();

        let ledger = RecordingLedger::default();
        let transfer = RecordingTransfer::default();

        let mut white =
            Player::join(&endpoint, "0xAA11", ledger.clone(), transfer.clone()).await;
        let mut black = Player::join(
            &endpoint,
            "0xBB22",
            RecordingLedger::default(),
            RecordingTransfer::default(),
        )
        .await;

        white.await_peer().await;
        black.await_peer().await;

        white.play("e2", "e4").await;
        black.receive().await;

        // Black walks away; white wins by forfeit.
        black.session.close().await;
        match white.session.next_event().await.unwrap() {
            SessionEvent::PeerLeft(id) => assert_eq!(id, PlayerIdentity::new("0xBB22")),
            other => panic!("expected PeerLeft, got {:?}", other),
        }

        let record = white
            .coordinator
            .observe_peer_left(&mut white.sync)
            .expect("forfeit should settle");
        assert_eq!(record.outcome, MatchOutcome::Winner(Side::White));
        assert_eq!(record.reason, "Opponent Left");

        white.session.close().await;
        let report = white.coordinator.execute(record, &match_data()).await;
        assert!(report.fully_paid());

        let sent = transfer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!((sent[0].0 - 1800.0).abs() < 1e-9);
        assert_eq!(sent[0].1, "0xAA11");
    }
}

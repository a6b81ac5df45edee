use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

pub const PROTOCOL_VERSION: u32 = 1;
/// Silence longer than this gets a room occupant swept and reported as left.
pub const PEER_TIMEOUT_SECS: u64 = 5;
/// Platform cut taken from every settled wager.
pub const DEFAULT_FEE_FRACTION: f64 = 0.1;
/// Smallest bid the matchmaking queue accepts, in tokens.
pub const MIN_BID: f64 = 10.0;
/// Bids must come in multiples of this step.
pub const BID_STEP: f64 = 10.0;

/// Which side of the board a participant occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opponent(&self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Wallet address identifying a participant.
///
/// Addresses compare and hash ASCII case-insensitively: the ledger and the
/// wallet provider disagree on checksum casing, so `0xAB..` and `0xab..`
/// must name the same player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerIdentity(String);

impl PlayerIdentity {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortens the address the way wallet UIs do: `0x123...abcd`.
    /// Identities come off the wire, so this counts chars, never bytes.
    pub fn truncated(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 9 {
            return self.0.clone();
        }
        let head: String = chars[..5].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

impl PartialEq for PlayerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for PlayerIdentity {}

impl Hash for PlayerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for PlayerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerIdentity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Complete serialized description of a board position: the move history in
/// coordinate notation ("e2e4 e7e5 ..."), applied from the standard start.
///
/// This is the unit of state replicated between peers. Broadcasts always
/// carry the whole history, never a diff, so applying one is idempotent and
/// insensitive to coalesced deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionSnapshot(String);

impl PositionSnapshot {
    pub fn start() -> Self {
        Self(String::new())
    }

    pub fn new(moves: impl Into<String>) -> Self {
        Self(moves.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn moves(&self) -> impl Iterator<Item = &str> {
        self.0.split_whitespace()
    }

    pub fn move_count(&self) -> usize {
        self.moves().count()
    }
}

/// Everything that travels between a client and the relay.
///
/// `Join`/`Move`/`Ack`/`Leave` flow client-to-relay; the rest flow back.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Join {
        protocol_version: u32,
        match_id: String,
        identity: PlayerIdentity,
    },
    Move {
        snapshot: PositionSnapshot,
    },
    Ack {
        note: String,
    },
    Leave,

    Joined {
        peer_present: bool,
    },
    PeerJoined {
        identity: PlayerIdentity,
    },
    PeerMove {
        snapshot: PositionSnapshot,
    },
    PeerAck {
        note: String,
    },
    PeerLeft {
        identity: PlayerIdentity,
    },
    Rejected {
        reason: String,
    },
}

/// One side's stake in a match, as the ledger reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStake {
    pub hash: PlayerIdentity,
    pub amount: f64,
}

/// Ledger view of a match. Field names follow the HTTP API
/// (`GET /match?match_id=`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchData {
    pub match_id: String,
    pub white: PlayerStake,
    pub black: PlayerStake,
    #[serde(default)]
    pub winner: Option<String>,
}

impl MatchData {
    /// Which side the given wallet occupies, if any. `None` means the
    /// identity is a spectator of this match.
    pub fn side_of(&self, identity: &PlayerIdentity) -> Option<Side> {
        if &self.white.hash == identity {
            Some(Side::White)
        } else if &self.black.hash == identity {
            Some(Side::Black)
        } else {
            None
        }
    }

    pub fn stake(&self, side: Side) -> &PlayerStake {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }

    /// The ledger encodes "no winner yet" as a missing or empty string.
    pub fn decided_winner(&self) -> Option<&str> {
        match self.winner.as_deref() {
            Some("") | None => None,
            Some(w) => Some(w),
        }
    }

    pub fn wager(&self, fee_fraction: f64) -> Wager {
        Wager {
            white_amount: self.white.amount,
            black_amount: self.black.amount,
            fee_fraction,
        }
    }
}

/// Read-only input to settlement: both stakes and the platform fee.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wager {
    pub white_amount: f64,
    pub black_amount: f64,
    pub fee_fraction: f64,
}

impl Wager {
    /// Winner takes the whole pot minus the platform fee.
    pub fn winner_payout(&self) -> f64 {
        (self.white_amount + self.black_amount) * (1.0 - self.fee_fraction)
    }

    /// Draws return each side's own stake minus the fee to its owner.
    pub fn draw_refund(&self, side: Side) -> f64 {
        let stake = match side {
            Side::White => self.white_amount,
            Side::Black => self.black_amount,
        };
        stake * (1.0 - self.fee_fraction)
    }
}

/// How a match concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    Winner(Side),
    Draw,
}

/// Write-once conclusion of a match. At most one of these is ever produced
/// per match; later terminal detections must find it already present and
/// do nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub match_id: String,
    pub outcome: MatchOutcome,
    pub reason: String,
}

impl SettlementRecord {
    /// The value posted to `POST /match/winner`: the winner's wallet hash,
    /// or the literal `"Draw"`.
    pub fn ledger_hash(&self, data: &MatchData) -> String {
        match self.outcome {
            MatchOutcome::Winner(side) => data.stake(side).hash.as_str().to_string(),
            MatchOutcome::Draw => "Draw".to_string(),
        }
    }
}

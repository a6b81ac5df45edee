//! Matchmaking queue flow: validate a bid, stake it, queue up, and wait
//! for the pairing notification (or cancel and get refunded).

use crate::ledger::{HttpLedger, LedgerError, TokenTransfer, TransferError};
use log::info;
use shared::{PlayerIdentity, BID_STEP, MIN_BID};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum BidError {
    #[error("bid too small, minimum bid is {min} tokens")]
    TooSmall { min: f64 },
    #[error("bid should be in multiples of {0}")]
    NotMultiple(f64),
    #[error("minimum opponent bid should be in multiples of {0}")]
    MinNotMultiple(f64),
    #[error("minimum opponent bid cannot be more than your bid")]
    MinAboveOwn,
}

#[derive(Debug, Error)]
pub enum MatchmakingError {
    #[error(transparent)]
    Bid(#[from] BidError),
    #[error("stake payment failed: {0}")]
    Stake(#[from] TransferError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// A wager offer: own stake plus the smallest opposing stake accepted.
/// An absent minimum means "match me at my own bid".
#[derive(Debug, Clone, Copy)]
pub struct BidRequest {
    pub amount: f64,
    pub min_opponent: Option<f64>,
}

impl BidRequest {
    pub fn min_bid(&self) -> f64 {
        self.min_opponent.unwrap_or(self.amount)
    }
}

fn is_multiple_of(value: f64, step: f64) -> bool {
    (value / step).fract().abs() < 1e-9
}

pub fn validate_bid(bid: &BidRequest) -> Result<(), BidError> {
    if bid.min_bid() > bid.amount {
        return Err(BidError::MinAboveOwn);
    }
    if !is_multiple_of(bid.amount, BID_STEP) {
        return Err(BidError::NotMultiple(BID_STEP));
    }
    if !is_multiple_of(bid.min_bid(), BID_STEP) {
        return Err(BidError::MinNotMultiple(BID_STEP));
    }
    if bid.amount < MIN_BID {
        return Err(BidError::TooSmall { min: MIN_BID });
    }
    Ok(())
}

/// Drives the queue against the ledger. The stake is paid to the house up
/// front; a cancel refunds it minus the platform fee.
pub struct Matchmaker<'a, T> {
    ledger: &'a HttpLedger,
    transfer: &'a T,
    house: PlayerIdentity,
    fee_fraction: f64,
}

impl<'a, T: TokenTransfer> Matchmaker<'a, T> {
    pub fn new(
        ledger: &'a HttpLedger,
        transfer: &'a T,
        house: PlayerIdentity,
        fee_fraction: f64,
    ) -> Self {
        Self {
            ledger,
            transfer,
            house,
            fee_fraction,
        }
    }

    /// Pays the stake and enters the queue. Returns the queue ticket used
    /// for the status stream and cancellation.
    pub async fn enter_queue(
        &self,
        identity: &PlayerIdentity,
        bid: BidRequest,
    ) -> Result<String, MatchmakingError> {
        validate_bid(&bid)?;
        self.transfer.transfer(bid.amount, &self.house).await?;
        info!("{} tokens staked, entering queue", bid.amount);
        let uuid = self
            .ledger
            .create_match(identity, bid.amount, bid.min_bid())
            .await?;
        Ok(uuid)
    }

    /// Blocks until the ledger pairs us and names the match.
    pub async fn wait_for_opponent(&self, uuid: &str) -> Result<String, MatchmakingError> {
        let match_id = self.ledger.await_pairing(uuid).await?;
        info!("Match found: {}", match_id);
        Ok(match_id)
    }

    /// Leaves the queue and refunds the stake minus the platform fee.
    pub async fn cancel(
        &self,
        uuid: &str,
        identity: &PlayerIdentity,
        bid: BidRequest,
    ) -> Result<f64, MatchmakingError> {
        self.ledger.cancel(uuid).await?;
        let refund = bid.amount * (1.0 - self.fee_fraction);
        self.transfer.transfer(refund, identity).await?;
        info!("Matchmaking cancelled, {} tokens refunded", refund);
        Ok(refund)
    }
}

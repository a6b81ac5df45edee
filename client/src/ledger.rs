//! Matchmaking/ledger HTTP API client and the external money seams.
//!
//! The ledger owns match records and pairing; token movement happens through
//! the `TokenTransfer` trait so tests (and the dry-run CLI mode) can inject
//! their own implementation in place of a wallet-backed signer.

use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use shared::{MatchData, PlayerIdentity};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ledger answered with status {0}")]
    Status(u16),
    #[error("ledger response did not parse: {0}")]
    Malformed(String),
    #[error("pairing stream ended before a match was found")]
    StreamEnded,
}

#[derive(Debug, Error)]
#[error("token transfer of {amount} to {recipient} failed: {message}")]
pub struct TransferError {
    pub amount: f64,
    pub recipient: PlayerIdentity,
    pub message: String,
}

/// Result-reporting side of the ledger, as settlement needs it.
#[async_trait]
pub trait MatchLedger {
    /// `POST /match/winner` with the winner's hash or the literal "Draw".
    async fn post_result(&self, match_id: &str, hash: &str) -> Result<(), LedgerError>;
}

/// External token transfer primitive: one call per payee, fire-and-report.
#[async_trait]
pub trait TokenTransfer {
    async fn transfer(&self, amount: f64, recipient: &PlayerIdentity)
        -> Result<(), TransferError>;
}

/// HTTP client for the matchmaking/ledger service.
pub struct HttpLedger {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CreatedMatch {
    #[serde(rename = "UUID")]
    uuid: String,
}

#[derive(Deserialize)]
struct PairingNotice {
    match_id: Option<String>,
}

impl HttpLedger {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// `POST /match` — queues a bid, returns the queue ticket UUID.
    pub async fn create_match(
        &self,
        username: &PlayerIdentity,
        token_bid: f64,
        min_bid: f64,
    ) -> Result<String, LedgerError> {
        let response = self
            .http
            .post(format!("{}/match", self.base_url))
            .json(&serde_json::json!({
                "username": username.as_str(),
                "token_bid": token_bid,
                "min_bid": min_bid,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LedgerError::Status(response.status().as_u16()));
        }
        let created: CreatedMatch = response.json().await?;
        Ok(created.uuid)
    }

    /// `GET /match/cancel?uuid=` — leaves the queue.
    pub async fn cancel(&self, uuid: &str) -> Result<(), LedgerError> {
        let response = self
            .http
            .get(format!("{}/match/cancel", self.base_url))
            .query(&[("uuid", uuid)])
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LedgerError::Status(response.status().as_u16()))
        }
    }

    /// `GET /match/status?uuid=` — blocks on the server-sent notification
    /// stream until it delivers a `match_id`.
    pub async fn await_pairing(&self, uuid: &str) -> Result<String, LedgerError> {
        let mut response = self
            .http
            .get(format!("{}/match/status", self.base_url))
            .query(&[("uuid", uuid)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LedgerError::Status(response.status().as_u16()));
        }

        let mut pending = String::new();
        while let Some(chunk) = response.chunk().await? {
            pending.push_str(&String::from_utf8_lossy(&chunk));
            // SSE frames: lines of "data: <json>" separated by blank lines.
            while let Some(newline) = pending.find('\n') {
                let line = pending[..newline].trim().to_string();
                pending.drain(..=newline);
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                debug!("Pairing stream: {}", payload.trim());
                let notice: PairingNotice = serde_json::from_str(payload.trim())
                    .map_err(|e| LedgerError::Malformed(e.to_string()))?;
                if let Some(match_id) = notice.match_id {
                    return Ok(match_id);
                }
            }
        }
        Err(LedgerError::StreamEnded)
    }

    /// `GET /match?match_id=` — the match record backing a play page.
    pub async fn fetch_match(&self, match_id: &str) -> Result<MatchData, LedgerError> {
        let response = self
            .http
            .get(format!("{}/match", self.base_url))
            .query(&[("match_id", match_id)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LedgerError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MatchLedger for HttpLedger {
    async fn post_result(&self, match_id: &str, hash: &str) -> Result<(), LedgerError> {
        let response = self
            .http
            .post(format!("{}/match/winner", self.base_url))
            .json(&serde_json::json!({
                "hash": hash,
                "match_id": match_id,
            }))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LedgerError::Status(response.status().as_u16()))
        }
    }
}

/// Transfer implementation for environments without a funded signer: logs
/// the payout that a wallet-backed implementation would execute and reports
/// success. Useful for local play and demos; settlement still exercises the
/// full one-shot path.
pub struct DryRunTransfer;

#[async_trait]
impl TokenTransfer for DryRunTransfer {
    async fn transfer(
        &self,
        amount: f64,
        recipient: &PlayerIdentity,
    ) -> Result<(), TransferError> {
        info!(
            "[dry-run] would transfer {} tokens to {}",
            amount,
            recipient.truncated()
        );
        Ok(())
    }
}

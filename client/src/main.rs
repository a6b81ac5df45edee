mod ledger;
mod matchmaking;
mod rendering;
mod rules;
mod runner;
mod session;
mod settlement;
mod sync;

use clap::Parser;
use ledger::{DryRunTransfer, HttpLedger};
use log::{info, warn};
use matchmaking::{BidRequest, Matchmaker};
use runner::{MatchRunner, PlayerCommand};
use session::RealtimeSession;
use settlement::SettlementCoordinator;
use shared::{MatchOutcome, PlayerIdentity, DEFAULT_FEE_FRACTION};
use sync::MatchSync;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Wallet address to play as
    #[arg(short = 'w', long)]
    wallet: String,

    /// Base URL of the matchmaking/ledger service
    #[arg(short = 'l', long, default_value = "http://127.0.0.1:3000/api")]
    ledger: String,

    /// Relay address for realtime sync; omit to play offline hot-seat
    #[arg(short = 'r', long)]
    relay: Option<String>,

    /// Join an existing match instead of queueing for a new one
    #[arg(short = 'm', long)]
    match_id: Option<String>,

    /// Tokens to stake when queueing
    #[arg(short = 'b', long, default_value = "100.0")]
    bid: f64,

    /// Smallest opposing stake to accept (defaults to the bid itself)
    #[arg(long)]
    min_bid: Option<f64>,

    /// House wallet that holds queued stakes
    #[arg(long, default_value = "0x0000000000000000000000000000000000000000")]
    house: String,

    /// Platform fee fraction withheld from payouts
    #[arg(long, default_value_t = DEFAULT_FEE_FRACTION)]
    fee: f64,
}

/// Forwards stdin lines as parsed commands until the player quits or the
/// match loop stops listening.
fn spawn_input_reader(tx: mpsc::Sender<PlayerCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(command) = runner::parse_command(&line) else {
                eprintln!("Enter a move like e2e4 (e7e8q to promote), or quit");
                continue;
            };
            let quitting = command == PlayerCommand::Quit;
            if tx.send(command).await.is_err() || quitting {
                break;
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let identity = PlayerIdentity::new(&args.wallet);
    let ledger = HttpLedger::new(&args.ledger);
    let transfer = DryRunTransfer;

    let match_id = match args.match_id {
        Some(id) => id,
        None => {
            let matchmaker = Matchmaker::new(
                &ledger,
                &transfer,
                PlayerIdentity::new(&args.house),
                args.fee,
            );
            let bid = BidRequest {
                amount: args.bid,
                min_opponent: args.min_bid,
            };
            let ticket = matchmaker.enter_queue(&identity, bid).await?;
            info!("Queued with ticket {}, waiting for an opponent", ticket);
            matchmaker.wait_for_opponent(&ticket).await?
        }
    };

    let data = ledger.fetch_match(&match_id).await?;
    info!(
        "Match {}: {} (white, {} tokens) vs {} (black, {} tokens)",
        data.match_id,
        data.white.hash.truncated(),
        data.white.amount,
        data.black.hash.truncated(),
        data.black.amount
    );

    if let Some(winner) = data.decided_winner() {
        // Already settled; nothing to play or pay.
        if winner == "Draw" {
            info!("This match ended in a draw. See /fin/{}", data.match_id);
        } else {
            info!(
                "This match is over, {} won. See /fin/{}",
                PlayerIdentity::new(winner).truncated(),
                data.match_id
            );
        }
        return Ok(());
    }

    let session = RealtimeSession::open(args.relay.as_deref(), &match_id, identity.clone()).await;
    let sync = MatchSync::new(&data, identity);
    let settlement =
        SettlementCoordinator::new(ledger, transfer, match_id.clone(), data.wager(args.fee));

    let (tx, rx) = mpsc::channel(32);
    spawn_input_reader(tx);

    let runner = MatchRunner::new(data, session, sync, settlement, rx);
    match runner.run().await {
        Some(report) => {
            match report.record.outcome {
                MatchOutcome::Winner(side) => info!("{:?} wins: {}", side, report.record.reason),
                MatchOutcome::Draw => info!("Draw: {}", report.record.reason),
            }
            if !report.fully_paid() {
                warn!("Settlement did not fully complete, contact support");
            }
            info!("Full result at {}", report.destination());
        }
        None => info!("Left match {}", match_id),
    }

    Ok(())
}

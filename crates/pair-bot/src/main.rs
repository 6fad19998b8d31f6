//! Pair-bot: pair lifecycle manager for binary up/down prediction markets.
//!
//! Usage:
//!   pair-bot [OPTIONS]
//!
//! Options:
//!   -m, --mode <MODE>       Trading mode: paper, replay
//!   -c, --config <FILE>     Config file path (default: config/bot.toml)
//!   --snapshots <FILE>      JSONL snapshot file (replay mode)
//!   --size <SHARES>         Requested shares per pair (default: 10)

use std::collections::HashSet;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pair_common::{AssetClass, FillNotice, MarketSide, MarketSnapshot};

use pair_bot::audit::audit_log_loop;
use pair_bot::config::{BotConfig, TradingMode};
use pair_bot::gateway::paper::PaperGateway;
use pair_bot::tracker::{FillOutcome, OpenError, PairStatus, PairTracker};
use pair_bot::AuditSink;

/// How far the cheap side's ask must move away from the resting hedge before
/// the harness pulls the emergency trigger.
const EMERGENCY_TRIGGER_GAP: Decimal = dec!(0.10);

/// CLI arguments for pair-bot.
#[derive(Parser, Debug)]
#[command(name = "pair-bot")]
#[command(about = "Pair lifecycle manager for binary up/down prediction markets")]
#[command(version)]
struct Args {
    /// Trading mode: paper, replay
    #[arg(short, long)]
    mode: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "config/bot.toml")]
    config: PathBuf,

    /// JSONL snapshot file for replay mode
    #[arg(long)]
    snapshots: Option<PathBuf>,

    /// Requested shares per pair
    #[arg(long, default_value = "10")]
    size: Decimal,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        BotConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        eprintln!(
            "Config file not found at {:?}, using defaults",
            args.config
        );
        BotConfig::default()
    };
    config.apply_env_overrides();
    if let Some(mode) = &args.mode {
        match mode.to_lowercase().as_str() {
            "paper" => config.mode = TradingMode::Paper,
            "replay" => config.mode = TradingMode::Replay,
            other => bail!("unknown mode: {other}"),
        }
    }
    config.validate().context("Invalid configuration")?;

    let level = config
        .log_level
        .parse::<Level>()
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!(mode = %config.mode, "starting pair-bot");

    let audit = if config.audit.enabled {
        let (sink, rx) = AuditSink::bounded(config.audit.channel_capacity);
        tokio::spawn(audit_log_loop(rx));
        sink
    } else {
        AuditSink::disabled()
    };

    let (gateway, fill_rx) = PaperGateway::new();
    let gateway = Arc::new(gateway);
    let tracker = PairTracker::new(config.tracker.clone(), gateway.clone(), audit);

    let snapshots: Vec<MarketSnapshot> = match config.mode {
        TradingMode::Replay => {
            let path = args
                .snapshots
                .context("replay mode requires --snapshots <FILE>")?;
            read_snapshots(&path)?
        }
        TradingMode::Paper => demo_snapshots(),
    };
    info!(count = snapshots.len(), "snapshots loaded");

    run_session(&tracker, &gateway, fill_rx, snapshots, args.size).await;

    let stats = tracker.stats();
    info!(
        total = stats.total,
        hedged = stats.hedged,
        emergency = stats.emergency_hedged,
        cancelled = stats.cancelled,
        expired = stats.expired,
        realized_profit = %stats.realized_profit,
        "session complete"
    );

    Ok(())
}

/// Load a JSONL file of market snapshots, skipping malformed lines.
fn read_snapshots(path: &PathBuf) -> Result<Vec<MarketSnapshot>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open snapshot file {:?}", path))?;
    let mut snapshots = Vec::new();
    for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.context("Failed to read snapshot line")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MarketSnapshot>(&line) {
            Ok(snap) => snapshots.push(snap),
            Err(e) => warn!(lineno = lineno + 1, error = %e, "skipping malformed snapshot"),
        }
    }
    Ok(snapshots)
}

/// Drive the tracker through a snapshot stream. Snapshot timestamps are the
/// session clock, so startup delays and cooldowns replay deterministically.
async fn run_session(
    tracker: &PairTracker,
    gateway: &Arc<PaperGateway>,
    mut fill_rx: mpsc::UnboundedReceiver<FillNotice>,
    snapshots: Vec<MarketSnapshot>,
    requested_size: Decimal,
) {
    let mut markets: HashSet<String> = HashSet::new();
    let mut last_now: Option<DateTime<Utc>> = None;

    for snap in snapshots {
        let now = snap.timestamp;
        markets.insert(snap.market_id.clone());

        // Feed the simulated book.
        gateway.set_ask(&snap.token_id_up, snap.best_ask_up);
        gateway.set_ask(&snap.token_id_down, snap.best_ask_down);

        // Trades at the bid can reach resting hedge orders.
        gateway.cross(&snap.token_id_up, snap.best_bid_up);
        gateway.cross(&snap.token_id_down, snap.best_bid_down);

        // Reconcile any fills the book produced.
        drain_fills(tracker, &mut fill_rx, &markets, now).await;

        // Entry decision: buy whichever side is more expensive right now.
        if snap.has_quotes() {
            let expensive = if snap.best_ask_up >= snap.best_ask_down {
                MarketSide::Up
            } else {
                MarketSide::Down
            };
            match tracker
                .open_pair_at(&snap, expensive, requested_size, now)
                .await
            {
                Ok(outcome) => {
                    info!(pair_id = outcome.pair_id, immediate = outcome.immediate_fill, "pair opened")
                }
                Err(OpenError::Rejected(reason)) => {
                    tracing::debug!(%reason, "open rejected")
                }
                Err(e) => warn!(error = %e, "open failed"),
            }
        }

        // Reconcile fills from an immediate entry.
        drain_fills(tracker, &mut fill_rx, &markets, now).await;

        // Emergency policy: when the cheap side's ask has run away from the
        // resting hedge price, the hedge is unlikely to ever fill.
        for pair in tracker.active_pairs() {
            if pair.status != PairStatus::WaitingHedge || pair.market_id != snap.market_id {
                continue;
            }
            let ask = snap.best_ask(pair.hedge_side());
            if ask >= pair.hedge_price + EMERGENCY_TRIGGER_GAP {
                match tracker.trigger_emergency_hedge_at(pair.id, ask, now).await {
                    Ok(order_id) => warn!(pair_id = pair.id, %order_id, "emergency hedge fired"),
                    Err(e) => tracing::debug!(pair_id = pair.id, error = %e, "emergency refused"),
                }
            }
        }

        drain_fills(tracker, &mut fill_rx, &markets, now).await;

        tracker.check_timeouts_at(now).await;

        // Periodic cleanup, roughly once a simulated minute.
        let due = last_now
            .map(|prev| now - prev >= ChronoDuration::seconds(60))
            .unwrap_or(true);
        if due {
            tracker.cleanup_at(now);
            last_now = Some(now);
        }
    }
}

/// Route every queued fill notice to the tracker. Notices carry no market
/// ID, so each one is tried against every market seen so far.
async fn drain_fills(
    tracker: &PairTracker,
    fill_rx: &mut mpsc::UnboundedReceiver<FillNotice>,
    markets: &HashSet<String>,
    now: DateTime<Utc>,
) {
    while let Ok(notice) = fill_rx.try_recv() {
        for market_id in markets {
            if tracker.on_fill_at(&notice, market_id, now).await != FillOutcome::NoMatch {
                break;
            }
        }
    }
}

/// Built-in single-market scenario for paper mode: observation period, one
/// hedged pair, then a reversal that forces an emergency exit on the next.
fn demo_snapshots() -> Vec<MarketSnapshot> {
    let t0 = Utc::now();
    let snap = |secs: i64, ask_up: Decimal, ask_down: Decimal| MarketSnapshot {
        market_id: "demo-btc-updown".to_string(),
        condition_id: "demo-cond".to_string(),
        asset: "BTC".to_string(),
        asset_class: AssetClass::Crypto,
        token_id_up: "demo-tok-up".to_string(),
        token_id_down: "demo-tok-down".to_string(),
        best_bid_up: ask_up - dec!(0.02),
        best_ask_up: ask_up,
        best_bid_down: ask_down - dec!(0.02),
        best_ask_down: ask_down,
        timestamp: t0 + ChronoDuration::seconds(secs),
    };

    vec![
        // Observation period: rejected by the startup delay.
        snap(0, dec!(0.58), dec!(0.44)),
        snap(60, dec!(0.57), dec!(0.45)),
        // Tradeable: entry UP at 0.58, hedge rests DOWN at 0.37.
        snap(125, dec!(0.58), dec!(0.44)),
        // DOWN bid sinks to the hedge price: first pair completes. A second
        // pair opens here at 0.60 with its hedge resting at 0.35.
        snap(190, dec!(0.60), dec!(0.39)),
        snap(260, dec!(0.62), dec!(0.40)),
        // Reversal: the DOWN ask runs away from the resting hedges. The
        // 0.60 pair exits at a projected 1.05, right at the ceiling; the
        // 0.62 pair is refused and keeps waiting.
        snap(330, dec!(0.52), dec!(0.45)),
    ]
}

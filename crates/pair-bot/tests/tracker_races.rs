//! Ordering tests for the two racing fill paths.
//!
//! The placement result and the push notification can report the same entry
//! fill in either order. Whichever wins, exactly one hedge order may be
//! placed. These tests force both orderings through a scripted gateway whose
//! entry placement blocks on a gate until the test releases it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::oneshot;

use pair_common::{AssetClass, FillNotice, MarketSide, MarketSnapshot};

use pair_bot::audit::AuditSink;
use pair_bot::config::TrackerConfig;
use pair_bot::gateway::{
    GatewayError, OrderGateway, OrderPlacement, OrderSpec, PlacementStatus, TimeInForce,
};
use pair_bot::tracker::{FillOutcome, PairStatus, PairTracker};

/// Scripted gateway: IOC placements optionally block on a gate before
/// returning a fill; GTC placements are counted and rest.
struct ScriptedGateway {
    /// Taken by the first IOC placement; it awaits the gate before
    /// returning its result.
    ioc_gate: Mutex<Option<oneshot::Receiver<()>>>,
    /// Fill price reported for IOC placements.
    ioc_fill_price: Decimal,
    /// When set, GTC placements fail with a rejection.
    fail_gtc: bool,
    gtc_placed: AtomicUsize,
    ioc_placed: AtomicUsize,
    cancels: AtomicUsize,
    next_id: AtomicU64,
}

impl ScriptedGateway {
    fn new(ioc_fill_price: Decimal) -> Self {
        Self {
            ioc_gate: Mutex::new(None),
            ioc_fill_price,
            fail_gtc: false,
            gtc_placed: AtomicUsize::new(0),
            ioc_placed: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Arm the gate; returns the sender that releases the next IOC.
    fn hold_next_ioc(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.ioc_gate.lock().unwrap() = Some(rx);
        tx
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl OrderGateway for ScriptedGateway {
    async fn place_order(&self, spec: OrderSpec) -> Result<OrderPlacement, GatewayError> {
        match spec.tif {
            TimeInForce::Ioc => {
                self.ioc_placed.fetch_add(1, Ordering::Relaxed);
                let gate = self.ioc_gate.lock().unwrap().take();
                if let Some(rx) = gate {
                    let _ = rx.await;
                }
                Ok(OrderPlacement {
                    request_id: spec.request_id,
                    order_id: self.next_id("ioc"),
                    status: PlacementStatus::Filled,
                    filled_size: spec.size,
                    avg_price: self.ioc_fill_price,
                    timestamp: Utc::now(),
                })
            }
            TimeInForce::Gtc => {
                if self.fail_gtc {
                    return Err(GatewayError::Rejected("scripted rejection".to_string()));
                }
                self.gtc_placed.fetch_add(1, Ordering::Relaxed);
                Ok(OrderPlacement {
                    request_id: spec.request_id,
                    order_id: self.next_id("gtc"),
                    status: PlacementStatus::New,
                    filled_size: Decimal::ZERO,
                    avg_price: Decimal::ZERO,
                    timestamp: Utc::now(),
                })
            }
        }
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<(), GatewayError> {
        self.cancels.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn test_config() -> TrackerConfig {
    TrackerConfig {
        startup_delay: Duration::ZERO,
        open_cooldown: Duration::ZERO,
        ..TrackerConfig::default()
    }
}

fn snapshot() -> MarketSnapshot {
    MarketSnapshot {
        market_id: "mkt-1".to_string(),
        condition_id: "cond-1".to_string(),
        asset: "BTC".to_string(),
        asset_class: AssetClass::Crypto,
        token_id_up: "tok-up".to_string(),
        token_id_down: "tok-down".to_string(),
        best_bid_up: dec!(0.38),
        best_ask_up: dec!(0.40),
        best_bid_down: dec!(0.28),
        best_ask_down: dec!(0.30),
        timestamp: Utc::now(),
    }
}

fn notice(order_id: &str, side: MarketSide) -> FillNotice {
    FillNotice {
        order_id: order_id.to_string(),
        side,
        price: dec!(0.40),
        size: dec!(10),
        timestamp: Utc::now(),
    }
}

/// Push notification arrives while the placement call is still in flight:
/// the async path must place the hedge, and the late placement result must
/// not place a second one.
#[tokio::test]
async fn test_notification_beats_placement_result() {
    let gateway = Arc::new(ScriptedGateway::new(dec!(0.40)));
    let release = gateway.hold_next_ioc();
    let tracker = Arc::new(PairTracker::new(
        test_config(),
        gateway.clone(),
        AuditSink::disabled(),
    ));

    let snap = snapshot();
    let opener = {
        let tracker = tracker.clone();
        let snap = snap.clone();
        tokio::spawn(async move {
            tracker.open_pair(&snap, MarketSide::Up, dec!(10)).await
        })
    };

    // Wait for the pre-inserted record: it must exist before the entry
    // placement resolves, or the notification would have nowhere to land.
    while tracker.get_pair(1).is_none() {
        tokio::task::yield_now().await;
    }
    assert_eq!(tracker.get_pair(1).unwrap().status, PairStatus::PendingEntry);

    // The exchange pushes the fill first. The pair has no entry order ID
    // yet, so the notice matches on side alone.
    let outcome = tracker.on_fill(&notice("push-1", MarketSide::Up), "mkt-1").await;
    assert_eq!(
        outcome,
        FillOutcome::EntryMatched {
            pair_id: 1,
            hedged: true
        }
    );
    assert_eq!(gateway.gtc_placed.load(Ordering::Relaxed), 1);
    assert_eq!(tracker.get_pair(1).unwrap().status, PairStatus::WaitingHedge);

    // Now the placement result lands. It sees the fill already recorded and
    // must not touch the hedge.
    release.send(()).unwrap();
    let open = opener.await.unwrap().unwrap();
    assert_eq!(open.pair_id, 1);
    assert!(open.immediate_fill);

    assert_eq!(gateway.gtc_placed.load(Ordering::Relaxed), 1);
    let pair = tracker.get_pair(1).unwrap();
    assert_eq!(pair.status, PairStatus::WaitingHedge);
    assert!(pair.maker_placed);
}

/// Placement result arrives first; the duplicate push notification for the
/// same fill must be a no-op.
#[tokio::test]
async fn test_placement_result_beats_notification() {
    let gateway = Arc::new(ScriptedGateway::new(dec!(0.40)));
    let tracker = PairTracker::new(test_config(), gateway.clone(), AuditSink::disabled());

    let snap = snapshot();
    let open = tracker
        .open_pair(&snap, MarketSide::Up, dec!(10))
        .await
        .unwrap();
    assert!(open.immediate_fill);
    assert_eq!(gateway.gtc_placed.load(Ordering::Relaxed), 1);

    let entry_order = tracker
        .get_pair(open.pair_id)
        .unwrap()
        .entry
        .order_id()
        .map(str::to_string)
        .unwrap();

    // Duplicate delivery of the same fill over the push channel.
    let outcome = tracker
        .on_fill(&notice(&entry_order, MarketSide::Up), "mkt-1")
        .await;
    assert_eq!(outcome, FillOutcome::NoMatch);
    assert_eq!(gateway.gtc_placed.load(Ordering::Relaxed), 1);
    assert_eq!(
        tracker.get_pair(open.pair_id).unwrap().status,
        PairStatus::WaitingHedge
    );
}

/// Two identical notifications delivered back to back: the second finds the
/// entry already filled and matches nothing.
#[tokio::test]
async fn test_duplicate_notifications_place_one_hedge() {
    let gateway = Arc::new(ScriptedGateway::new(dec!(0.40)));
    let release = gateway.hold_next_ioc();
    let tracker = Arc::new(PairTracker::new(
        test_config(),
        gateway.clone(),
        AuditSink::disabled(),
    ));

    let snap = snapshot();
    let opener = {
        let tracker = tracker.clone();
        let snap = snap.clone();
        tokio::spawn(async move {
            tracker.open_pair(&snap, MarketSide::Up, dec!(10)).await
        })
    };
    while tracker.get_pair(1).is_none() {
        tokio::task::yield_now().await;
    }

    let first = tracker.on_fill(&notice("push-1", MarketSide::Up), "mkt-1").await;
    let second = tracker.on_fill(&notice("push-1", MarketSide::Up), "mkt-1").await;
    assert_eq!(
        first,
        FillOutcome::EntryMatched {
            pair_id: 1,
            hedged: true
        }
    );
    assert_eq!(second, FillOutcome::NoMatch);
    assert_eq!(gateway.gtc_placed.load(Ordering::Relaxed), 1);

    release.send(()).unwrap();
    opener.await.unwrap().unwrap();
    assert_eq!(gateway.gtc_placed.load(Ordering::Relaxed), 1);
}

/// Timeout sweep cancels the pair while the entry placement is still in
/// flight (its order ID is unknown to the sweep, so no cancel goes out).
/// The late fill result must not advance the cancelled pair or place a
/// hedge for it; the exposure is surfaced as an unhedged entry.
#[tokio::test]
async fn test_sweep_cancels_pair_before_placement_resolves() {
    let gateway = Arc::new(ScriptedGateway::new(dec!(0.40)));
    let release = gateway.hold_next_ioc();
    let tracker = Arc::new(PairTracker::new(
        test_config(),
        gateway.clone(),
        AuditSink::disabled(),
    ));

    let snap = snapshot();
    let opened_at = Utc::now();
    let opener = {
        let tracker = tracker.clone();
        let snap = snap.clone();
        tokio::spawn(async move {
            tracker
                .open_pair_at(&snap, MarketSide::Up, dec!(10), opened_at)
                .await
        })
    };
    while tracker.get_pair(1).is_none() {
        tokio::task::yield_now().await;
    }

    // The entry is past its timeout with no order ID recorded yet: the
    // sweep cancels the record and has nothing to cancel at the gateway.
    let cancelled = tracker
        .check_timeouts_at(opened_at + ChronoDuration::seconds(61))
        .await;
    assert_eq!(cancelled, vec![1]);
    assert_eq!(tracker.get_pair(1).unwrap().status, PairStatus::Cancelled);

    // Now the gateway comes back with a real fill for the cancelled pair.
    release.send(()).unwrap();
    let err = opener.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        pair_bot::OpenError::UnhedgedEntry { pair_id: 1, .. }
    ));

    let pair = tracker.get_pair(1).unwrap();
    assert_eq!(pair.status, PairStatus::Cancelled);
    assert!(pair.entry.is_filled()); // the fill is on record for reconciliation
    assert!(!pair.maker_placed);
    assert_eq!(gateway.gtc_placed.load(Ordering::Relaxed), 0);
}

/// Hedge placement rejected on the async path: the pair is cancelled and the
/// unhedged exposure surfaced, not silently retried.
#[tokio::test]
async fn test_hedge_rejection_cancels_pair() {
    let mut gateway = ScriptedGateway::new(dec!(0.40));
    gateway.fail_gtc = true;
    let gateway = Arc::new(gateway);
    let release = gateway.hold_next_ioc();
    let tracker = Arc::new(PairTracker::new(
        test_config(),
        gateway.clone(),
        AuditSink::disabled(),
    ));

    let snap = snapshot();
    let opener = {
        let tracker = tracker.clone();
        let snap = snap.clone();
        tokio::spawn(async move {
            tracker.open_pair(&snap, MarketSide::Up, dec!(10)).await
        })
    };
    while tracker.get_pair(1).is_none() {
        tokio::task::yield_now().await;
    }

    let outcome = tracker.on_fill(&notice("push-1", MarketSide::Up), "mkt-1").await;
    assert_eq!(
        outcome,
        FillOutcome::EntryMatched {
            pair_id: 1,
            hedged: false
        }
    );

    let pair = tracker.get_pair(1).unwrap();
    assert_eq!(pair.status, PairStatus::Cancelled);
    assert!(pair.entry.is_filled());
    assert_eq!(gateway.gtc_placed.load(Ordering::Relaxed), 0);

    release.send(()).unwrap();
    // The late placement result finds a terminal pair and leaves it alone.
    let open = opener.await.unwrap().unwrap();
    assert!(open.immediate_fill);
    assert_eq!(tracker.get_pair(1).unwrap().status, PairStatus::Cancelled);
}

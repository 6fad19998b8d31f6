//! Pair lifecycle manager.
//!
//! Owns every pair record, the admission/cooldown policy, the per-pair state
//! machine, the hedge-placement mutual exclusion, and the emergency-unwind
//! trigger. External collaborators only feed it information (snapshots, fill
//! notices) or read derived views; nothing outside this module mutates a
//! pair.
//!
//! ## Concurrency
//!
//! Two independent paths can observe the same entry fill: the synchronous
//! placement result inside `open_pair`, and the asynchronous notification
//! path through `on_fill`. No ordering is guaranteed between them - the
//! notification can arrive before `place_order` returns. Correctness rests on
//! two invariants:
//!
//! - the pair record is inserted into the working set *before* the entry
//!   order is placed, so the reconciliation path can always find it;
//! - the `maker_placed` guard is checked and set inside a single critical
//!   section, so exactly one path proceeds to place the hedge.
//!
//! The tracker state lives behind one mutex. Critical sections are purely
//! synchronous; the lock is never held across a gateway await.

pub mod pair;
pub mod sizing;
pub mod stats;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use pair_common::{FillNotice, MarketSnapshot, MarketSide, Side};

use crate::audit::{AuditEvent, AuditSink};
use crate::config::TrackerConfig;
use crate::gateway::{OrderGateway, OrderSpec};

pub use pair::{LegState, Pair, PairStatus};
pub use stats::TrackerStats;

/// Why a pair open was refused before any order was placed.
///
/// These are expected, frequent outcomes - typed reasons, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenRejection {
    /// Market's asset class is outside the configured filter.
    UnsupportedAssetClass,
    /// Market observed too recently; prices presumed unstable.
    StartupDelay { remaining_secs: i64 },
    /// Cooldown since the last open has not elapsed.
    Cooldown { remaining_secs: i64 },
    /// Too many pairs already in flight.
    Capacity { active: usize, max: usize },
    /// Snapshot has no usable ask on one of the sides.
    NoQuotes,
    /// Expensive side's ask leaves no realistic profit margin.
    EntryPriceCeiling { ask: Decimal, ceiling: Decimal },
}

impl std::fmt::Display for OpenRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedAssetClass => write!(f, "unsupported asset class"),
            Self::StartupDelay { remaining_secs } => {
                write!(f, "startup delay, {remaining_secs}s remaining")
            }
            Self::Cooldown { remaining_secs } => {
                write!(f, "cooldown, {remaining_secs}s remaining")
            }
            Self::Capacity { active, max } => {
                write!(f, "capacity reached ({active}/{max} pairs)")
            }
            Self::NoQuotes => write!(f, "no usable quotes"),
            Self::EntryPriceCeiling { ask, ceiling } => {
                write!(f, "entry ask {ask} above ceiling {ceiling}")
            }
        }
    }
}

/// Failure of `open_pair` after admission passed.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("open rejected: {0}")]
    Rejected(OpenRejection),

    #[error("entry placement failed: {0}")]
    EntryPlacement(String),

    /// The entry leg filled but no hedge could be placed. The single most
    /// dangerous outcome: real unhedged exposure now exists.
    #[error("pair {pair_id}: entry filled but hedge not placed: {reason}")]
    UnhedgedEntry { pair_id: u64, reason: String },
}

/// Result of a successful `open_pair`.
#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub pair_id: u64,
    /// True when the entry fill was confirmed within the call itself
    /// (synchronous placement result or a racing notification).
    pub immediate_fill: bool,
}

/// Result of the internal hedge-placement routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MakerOutcome {
    /// This invocation placed the hedge order.
    Placed { order_id: String, price: Decimal },
    /// Another path already entered the routine; nothing was done.
    AlreadyPlaced,
}

/// Failure of the hedge-placement routine.
#[derive(Debug, Error)]
pub enum MakerError {
    #[error("pair {0} not found")]
    UnknownPair(u64),

    #[error("computed hedge price {computed} below minimum tick {min_tick}")]
    PriceTooLow { computed: Decimal, min_tick: Decimal },

    #[error("hedge placement failed: {0}")]
    Placement(String),
}

/// What a fill notification matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    /// Matched a pending entry. `hedged` is false when the subsequent hedge
    /// placement failed and the pair was cancelled.
    EntryMatched { pair_id: u64, hedged: bool },
    /// Matched the resting hedge; pair is now HEDGED.
    HedgeMatched { pair_id: u64 },
    /// Matched an emergency order; pair is now EMERGENCY_HEDGED.
    EmergencyMatched { pair_id: u64 },
    /// Fill belongs to unrelated activity. Not an error.
    NoMatch,
}

/// Failure of the emergency unwind.
#[derive(Debug, Error)]
pub enum EmergencyError {
    #[error("pair {0} not found")]
    UnknownPair(u64),

    #[error("pair is {status}, emergency hedge requires WAITING_HEDGE")]
    NotWaitingHedge { status: PairStatus },

    #[error("projected combined {projected} exceeds emergency ceiling {ceiling}")]
    CeilingExceeded { projected: Decimal, ceiling: Decimal },

    #[error("emergency placement failed: {0}")]
    Placement(String),
}

/// Mutable tracker state, guarded by one mutex.
#[derive(Debug, Default)]
struct TrackerState {
    pairs: HashMap<u64, Pair>,
    next_pair_id: u64,
    last_open_at: Option<DateTime<Utc>>,
    market_first_seen: HashMap<String, DateTime<Utc>>,
}

impl TrackerState {
    fn new() -> Self {
        Self {
            next_pair_id: 1,
            ..Default::default()
        }
    }

    fn active_count(&self) -> usize {
        self.pairs.values().filter(|p| p.status.is_active()).count()
    }
}

/// The pair lifecycle manager.
///
/// Constructor-injected collaborators; no global state. Fresh sessions build
/// a new tracker or call `reset()`.
pub struct PairTracker {
    cfg: TrackerConfig,
    gateway: Arc<dyn OrderGateway>,
    audit: AuditSink,
    state: Mutex<TrackerState>,
}

impl PairTracker {
    pub fn new(cfg: TrackerConfig, gateway: Arc<dyn OrderGateway>, audit: AuditSink) -> Self {
        Self {
            cfg,
            gateway,
            audit,
            state: Mutex::new(TrackerState::new()),
        }
    }

    /// Lock the state, recovering from poisoning (state mutations are pure
    /// bookkeeping; a panicked holder leaves nothing half-placed).
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // Admission control
    // ========================================================================

    /// Read-only admission probe: would `open_pair` pass right now?
    ///
    /// Registers the market's first-seen timestamp (an unseen market is
    /// rejected with the full startup delay remaining) but does not arm the
    /// cooldown timer.
    pub fn can_open_new_pair(&self, snapshot: &MarketSnapshot) -> Result<(), OpenRejection> {
        self.can_open_new_pair_at(snapshot, Utc::now())
    }

    /// `can_open_new_pair` with an explicit clock (tests, replay).
    pub fn can_open_new_pair_at(
        &self,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), OpenRejection> {
        let mut st = self.lock();
        self.admit(&mut st, snapshot, now, false)
    }

    /// Admission policy, evaluated in order. When `arm` is set, the cooldown
    /// timer is armed as soon as the cooldown check passes - *before* the
    /// capacity check and before anything later in `open_pair` - so rapid
    /// concurrent calls cannot all pass check-then-act, and a rejected
    /// attempt still burns its cooldown window (intentionally conservative:
    /// one wasted window beats an order-placement storm).
    fn admit(
        &self,
        st: &mut TrackerState,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
        arm: bool,
    ) -> Result<(), OpenRejection> {
        if snapshot.asset_class != self.cfg.asset_class {
            return Err(OpenRejection::UnsupportedAssetClass);
        }

        let first_seen = *st
            .market_first_seen
            .entry(snapshot.market_id.clone())
            .or_insert(now);
        let observed = (now - first_seen)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        if observed < self.cfg.startup_delay {
            let remaining = self.cfg.startup_delay - observed;
            return Err(OpenRejection::StartupDelay {
                remaining_secs: remaining.as_secs() as i64,
            });
        }

        if let Some(last) = st.last_open_at {
            let since = (now - last).to_std().unwrap_or(std::time::Duration::ZERO);
            if since < self.cfg.open_cooldown {
                let remaining = self.cfg.open_cooldown - since;
                return Err(OpenRejection::Cooldown {
                    remaining_secs: remaining.as_secs() as i64,
                });
            }
        }
        if arm {
            st.last_open_at = Some(now);
        }

        let active = st.active_count();
        if active >= self.cfg.max_open_pairs {
            return Err(OpenRejection::Capacity {
                active,
                max: self.cfg.max_open_pairs,
            });
        }

        Ok(())
    }

    // ========================================================================
    // Opening a pair
    // ========================================================================

    /// Open a new pair: place an aggressive IOC entry on the expensive side
    /// and, once its fill is confirmed, a resting hedge on the opposite side.
    pub async fn open_pair(
        &self,
        snapshot: &MarketSnapshot,
        expensive_side: MarketSide,
        requested_size: Decimal,
    ) -> Result<OpenOutcome, OpenError> {
        self.open_pair_at(snapshot, expensive_side, requested_size, Utc::now())
            .await
    }

    /// `open_pair` with an explicit clock (tests, replay).
    pub async fn open_pair_at(
        &self,
        snapshot: &MarketSnapshot,
        expensive_side: MarketSide,
        requested_size: Decimal,
        now: DateTime<Utc>,
    ) -> Result<OpenOutcome, OpenError> {
        let entry_ask = snapshot.best_ask(expensive_side);

        // Admission, sizing, and the pre-insert all happen in one critical
        // section. The record must be in the working set before the entry
        // order goes out: its fill can be reported before place_order
        // returns, and on_fill has to find the pair.
        let (pair_id, size) = {
            let mut st = self.lock();
            self.admit(&mut st, snapshot, now, true)
                .map_err(OpenError::Rejected)?;

            if !snapshot.has_quotes() {
                return Err(OpenError::Rejected(OpenRejection::NoQuotes));
            }
            if entry_ask > self.cfg.entry_price_ceiling {
                return Err(OpenError::Rejected(OpenRejection::EntryPriceCeiling {
                    ask: entry_ask,
                    ceiling: self.cfg.entry_price_ceiling,
                }));
            }

            let hedge_est = self.cfg.target_combined_price - entry_ask;
            let size = sizing::resolve_pair_size(requested_size, entry_ask, hedge_est, &self.cfg);

            let pair_id = st.next_pair_id;
            st.next_pair_id += 1;
            let pair = Pair::new(
                pair_id,
                snapshot.market_id.clone(),
                snapshot.condition_id.clone(),
                snapshot.token_id(expensive_side).to_string(),
                snapshot.token_id(expensive_side.opposite()).to_string(),
                expensive_side,
                entry_ask,
                size,
                now,
            );
            st.pairs.insert(pair_id, pair);
            (pair_id, size)
        };

        self.audit.emit(AuditEvent::PairOpened {
            pair_id,
            market_id: snapshot.market_id.clone(),
            entry_side: expensive_side,
            entry_price: entry_ask,
            size,
        });
        info!(
            pair_id,
            market_id = %snapshot.market_id,
            side = %expensive_side,
            ask = %entry_ask,
            size = %size,
            "opening pair"
        );

        // Entry order: IOC priced slightly through the ask so it crosses.
        let entry_price = (entry_ask + self.cfg.entry_price_offset).min(self.cfg.max_valid_price);
        let spec = OrderSpec::ioc(
            snapshot.token_id(expensive_side).to_string(),
            expensive_side,
            Side::Buy,
            entry_price,
            size,
        );

        let placement = match self.gateway.place_order(spec).await {
            Ok(p) => p,
            Err(e) => {
                // No order exists; remove the pre-inserted record unless a
                // racing notification already recorded an entry fill on it.
                let mut st = self.lock();
                let entry_filled = st
                    .pairs
                    .get(&pair_id)
                    .map(|p| p.entry.is_filled())
                    .unwrap_or(false);
                if entry_filled {
                    warn!(pair_id, "entry placement errored after a fill matched; keeping pair");
                } else {
                    st.pairs.remove(&pair_id);
                }
                return Err(OpenError::EntryPlacement(e.to_string()));
            }
        };

        // Record the order ID and decide the next step. The notification
        // path may have won the race while we were awaiting the gateway.
        enum Next {
            AwaitAsync,
            PlaceMaker { price: Decimal, size: Decimal },
            Done,
            /// Timeout sweep cancelled the pair mid-placement, but the
            /// placement result reports a real fill.
            TerminalWithFill { price: Decimal, size: Decimal },
        }

        let next = {
            let mut st = self.lock();
            let Some(p) = st.pairs.get_mut(&pair_id) else {
                // Removed by a racing sweep; nothing left to do.
                return Ok(OpenOutcome {
                    pair_id,
                    immediate_fill: false,
                });
            };
            // The sweep can reach a pair before its entry order ID is known,
            // in which case it cancels the record without cancelling the
            // order. A fill reported by the late placement result must not
            // advance a terminal pair or place a hedge for it.
            let terminal = p.status.is_terminal();
            match &p.entry {
                LegState::Unplaced if placement.is_filled() => {
                    p.record_entry_fill(
                        placement.order_id.clone(),
                        placement.avg_price,
                        placement.filled_size,
                        now,
                    );
                    if terminal {
                        Next::TerminalWithFill {
                            price: placement.avg_price,
                            size: placement.filled_size,
                        }
                    } else {
                        Next::PlaceMaker {
                            price: placement.avg_price,
                            size: placement.filled_size,
                        }
                    }
                }
                LegState::Unplaced => {
                    p.entry = LegState::Placed {
                        order_id: placement.order_id.clone(),
                    };
                    p.updated_at = now;
                    Next::AwaitAsync
                }
                // The async path matched the fill first (it may have seen a
                // null order ID) and is handling, or has handled, the hedge.
                LegState::Filled { .. } => Next::Done,
                LegState::Placed { .. } => Next::AwaitAsync,
            }
        };

        match next {
            Next::AwaitAsync => Ok(OpenOutcome {
                pair_id,
                immediate_fill: false,
            }),
            Next::Done => Ok(OpenOutcome {
                pair_id,
                immediate_fill: true,
            }),
            Next::PlaceMaker { price, size } => {
                self.audit.emit(AuditEvent::EntryFilled {
                    pair_id,
                    order_id: placement.order_id.clone(),
                    price,
                    size,
                });
                match self.place_maker_order_at(pair_id, price, size, now).await {
                    Ok(_) => Ok(OpenOutcome {
                        pair_id,
                        immediate_fill: true,
                    }),
                    Err(e) => {
                        let reason = e.to_string();
                        self.cancel_unhedged(pair_id, &reason, now);
                        Err(OpenError::UnhedgedEntry { pair_id, reason })
                    }
                }
            }
            Next::TerminalWithFill { price, size } => {
                // The entry really did fill, but the pair was cancelled
                // while the placement was in flight. No hedge may be placed
                // for a terminal pair; the exposure is surfaced instead.
                let reason = "pair cancelled before entry placement resolved";
                warn!(pair_id, price = %price, size = %size, reason, "entry filled on cancelled pair");
                self.audit.emit(AuditEvent::EntryFilled {
                    pair_id,
                    order_id: placement.order_id.clone(),
                    price,
                    size,
                });
                self.audit.emit(AuditEvent::UnhedgedEntry {
                    pair_id,
                    market_id: snapshot.market_id.clone(),
                    entry_price: price,
                    entry_size: size,
                    reason: reason.to_string(),
                });
                Err(OpenError::UnhedgedEntry {
                    pair_id,
                    reason: reason.to_string(),
                })
            }
        }
    }

    // ========================================================================
    // Hedge placement (mutually exclusive)
    // ========================================================================

    /// Place the resting hedge order for a pair whose entry has filled.
    ///
    /// Invoked from two call sites - the synchronous immediate-fill path in
    /// `open_pair` and the asynchronous path in `on_fill` - which must
    /// converge on exactly one hedge order. The `maker_placed` guard is
    /// checked and set inside a single critical section, before any
    /// asynchronous work; a second caller short-circuits to `AlreadyPlaced`.
    /// The guard is released again on any failure path where no order was
    /// actually placed.
    async fn place_maker_order_at(
        &self,
        pair_id: u64,
        entry_fill_price: Decimal,
        entry_fill_size: Decimal,
        now: DateTime<Utc>,
    ) -> Result<MakerOutcome, MakerError> {
        let (hedge_token, hedge_side) = {
            let mut st = self.lock();
            let p = st
                .pairs
                .get_mut(&pair_id)
                .ok_or(MakerError::UnknownPair(pair_id))?;
            if p.maker_placed {
                // Both paths observed the entry fill; the other one is (or
                // was) placing the hedge. Idempotent no-op.
                return Ok(MakerOutcome::AlreadyPlaced);
            }
            p.maker_placed = true;
            p.updated_at = now;
            (p.hedge_token_id.clone(), p.hedge_side())
        };

        let computed = self.cfg.target_combined_price - entry_fill_price;
        if computed < self.cfg.min_tick_price {
            // No order was placed: the guard must be reverted.
            self.release_maker_guard(pair_id, now);
            return Err(MakerError::PriceTooLow {
                computed,
                min_tick: self.cfg.min_tick_price,
            });
        }

        let price = computed.clamp(self.cfg.min_valid_price, self.cfg.max_valid_price);

        // Hedge size is the entry's *filled* size, never the requested size.
        let spec = OrderSpec::gtc(hedge_token, hedge_side, Side::Buy, price, entry_fill_size);

        let placement = match self.gateway.place_order(spec).await {
            Ok(p) => p,
            Err(e) => {
                self.release_maker_guard(pair_id, now);
                return Err(MakerError::Placement(e.to_string()));
            }
        };

        {
            let mut st = self.lock();
            if let Some(p) = st.pairs.get_mut(&pair_id) {
                p.hedge = LegState::Placed {
                    order_id: placement.order_id.clone(),
                };
                p.hedge_price = price;
                p.advance(PairStatus::WaitingHedge, now);
                // A GTC can cross on arrival; settle straight away rather
                // than waiting for a notification that may never come.
                if placement.is_filled() {
                    p.settle_hedged(
                        placement.order_id.clone(),
                        placement.avg_price,
                        placement.filled_size,
                        now,
                    );
                }
            }
        }

        self.audit.emit(AuditEvent::HedgePlaced {
            pair_id,
            order_id: placement.order_id.clone(),
            entry_price: entry_fill_price,
            hedge_price: price,
            size: entry_fill_size,
            projected_combined: entry_fill_price + price,
        });
        debug!(
            pair_id,
            price = %price,
            size = %entry_fill_size,
            combined = %(entry_fill_price + price),
            "hedge placed"
        );

        Ok(MakerOutcome::Placed {
            order_id: placement.order_id,
            price,
        })
    }

    fn release_maker_guard(&self, pair_id: u64, now: DateTime<Utc>) {
        let mut st = self.lock();
        if let Some(p) = st.pairs.get_mut(&pair_id) {
            p.maker_placed = false;
            p.updated_at = now;
        }
    }

    /// Mark a pair CANCELLED after its entry filled without a hedge, and
    /// surface the unhedged exposure on the audit trail.
    fn cancel_unhedged(&self, pair_id: u64, reason: &str, now: DateTime<Utc>) {
        let (market_id, entry) = {
            let mut st = self.lock();
            let Some(p) = st.pairs.get_mut(&pair_id) else {
                return;
            };
            p.advance(PairStatus::Cancelled, now);
            (p.market_id.clone(), p.entry.fill())
        };
        if let Some((price, size)) = entry {
            self.audit.emit(AuditEvent::UnhedgedEntry {
                pair_id,
                market_id: market_id.clone(),
                entry_price: price,
                entry_size: size,
                reason: reason.to_string(),
            });
        }
        self.audit.emit(AuditEvent::PairCancelled {
            pair_id,
            market_id,
            reason: reason.to_string(),
        });
    }

    // ========================================================================
    // Fill reconciliation
    // ========================================================================

    /// Reconcile one fill notification against the working set.
    ///
    /// Scans this market's pairs in creation order; first match wins. A fill
    /// that matches nothing belongs to unrelated activity and is not an
    /// error.
    pub async fn on_fill(&self, notice: &FillNotice, market_id: &str) -> FillOutcome {
        self.on_fill_at(notice, market_id, Utc::now()).await
    }

    /// `on_fill` with an explicit clock (tests, replay).
    pub async fn on_fill_at(
        &self,
        notice: &FillNotice,
        market_id: &str,
        now: DateTime<Utc>,
    ) -> FillOutcome {
        enum Matched {
            Entry {
                pair_id: u64,
                needs_maker: bool,
            },
            Hedge {
                pair_id: u64,
                combined: Decimal,
                profit: Decimal,
            },
            Emergency {
                pair_id: u64,
                combined: Decimal,
                profit: Decimal,
            },
            None,
        }

        let matched = {
            let mut st = self.lock();
            let mut ids: Vec<u64> = st
                .pairs
                .values()
                .filter(|p| p.market_id == market_id)
                .map(|p| p.id)
                .collect();
            ids.sort_unstable();

            let mut matched = Matched::None;
            for id in ids {
                let Some(p) = st.pairs.get_mut(&id) else {
                    continue;
                };

                // Entry match: pending, no fill recorded yet, order ID null
                // (notification raced ahead of the placement result) or
                // equal, and the outcome side agrees.
                let entry_id_ok = p.entry.order_id().is_none()
                    || p.entry.matches_order(&notice.order_id);
                if p.status == PairStatus::PendingEntry
                    && !p.entry.is_filled()
                    && entry_id_ok
                    && notice.side == p.entry_side
                {
                    p.record_entry_fill(
                        notice.order_id.clone(),
                        notice.price,
                        notice.size,
                        now,
                    );
                    if p.maker_placed {
                        // The synchronous path got there first; this is
                        // bookkeeping only.
                        p.advance(PairStatus::WaitingHedge, now);
                        matched = Matched::Entry {
                            pair_id: id,
                            needs_maker: false,
                        };
                    } else {
                        matched = Matched::Entry {
                            pair_id: id,
                            needs_maker: true,
                        };
                    }
                    break;
                }

                // Hedge match: resting order filled, pair complete.
                if p.status == PairStatus::WaitingHedge && p.hedge.matches_order(&notice.order_id)
                {
                    p.settle_hedged(notice.order_id.clone(), notice.price, notice.size, now);
                    matched = Matched::Hedge {
                        pair_id: id,
                        combined: p.realized_combined.unwrap_or(Decimal::ZERO),
                        profit: p.realized_profit.unwrap_or(Decimal::ZERO),
                    };
                    break;
                }

                // Emergency match: by order ID, regardless of status.
                if p.emergency.matches_order(&notice.order_id) && !p.emergency.is_filled() {
                    p.settle_emergency(notice.order_id.clone(), notice.price, notice.size, now);
                    matched = Matched::Emergency {
                        pair_id: id,
                        combined: p.realized_combined.unwrap_or(Decimal::ZERO),
                        profit: p.realized_profit.unwrap_or(Decimal::ZERO),
                    };
                    break;
                }
            }
            matched
        };

        match matched {
            Matched::None => FillOutcome::NoMatch,
            Matched::Entry {
                pair_id,
                needs_maker,
            } => {
                self.audit.emit(AuditEvent::EntryFilled {
                    pair_id,
                    order_id: notice.order_id.clone(),
                    price: notice.price,
                    size: notice.size,
                });
                if !needs_maker {
                    return FillOutcome::EntryMatched {
                        pair_id,
                        hedged: true,
                    };
                }
                match self
                    .place_maker_order_at(pair_id, notice.price, notice.size, now)
                    .await
                {
                    Ok(_) => FillOutcome::EntryMatched {
                        pair_id,
                        hedged: true,
                    },
                    Err(e) => {
                        warn!(pair_id, error = %e, "hedge placement failed on async fill");
                        self.cancel_unhedged(pair_id, &e.to_string(), now);
                        FillOutcome::EntryMatched {
                            pair_id,
                            hedged: false,
                        }
                    }
                }
            }
            Matched::Hedge {
                pair_id,
                combined,
                profit,
            } => {
                self.audit.emit(AuditEvent::HedgeFilled {
                    pair_id,
                    order_id: notice.order_id.clone(),
                    price: notice.price,
                    size: notice.size,
                    realized_combined: combined,
                    realized_profit: profit,
                });
                info!(pair_id, combined = %combined, profit = %profit, "pair hedged");
                FillOutcome::HedgeMatched { pair_id }
            }
            Matched::Emergency {
                pair_id,
                combined,
                profit,
            } => {
                self.audit.emit(AuditEvent::EmergencyFilled {
                    pair_id,
                    order_id: notice.order_id.clone(),
                    price: notice.price,
                    size: notice.size,
                    realized_combined: combined,
                    realized_profit: profit,
                });
                warn!(pair_id, combined = %combined, profit = %profit, "pair emergency hedged");
                FillOutcome::EmergencyMatched { pair_id }
            }
        }
    }

    // ========================================================================
    // Emergency unwind
    // ========================================================================

    /// Force-exit an open leg: cancel the resting hedge (best effort) and
    /// replace it with a marketable order at the current ask plus an offset.
    ///
    /// Only meaningful while the pair is `WAITING_HEDGE`. Refused when the
    /// projected combined price exceeds the emergency ceiling - taking the
    /// exit would lock in a worse loss than holding. On placement failure
    /// the pair stays in `WAITING_HEDGE` for the next sweep to retry.
    pub async fn trigger_emergency_hedge(
        &self,
        pair_id: u64,
        current_ask: Decimal,
    ) -> Result<String, EmergencyError> {
        self.trigger_emergency_hedge_at(pair_id, current_ask, Utc::now())
            .await
    }

    /// `trigger_emergency_hedge` with an explicit clock (tests, replay).
    pub async fn trigger_emergency_hedge_at(
        &self,
        pair_id: u64,
        current_ask: Decimal,
        now: DateTime<Utc>,
    ) -> Result<String, EmergencyError> {
        let (entry_price, entry_size, hedge_order_id, hedge_token, hedge_side) = {
            let st = self.lock();
            let p = st
                .pairs
                .get(&pair_id)
                .ok_or(EmergencyError::UnknownPair(pair_id))?;
            if p.status != PairStatus::WaitingHedge {
                return Err(EmergencyError::NotWaitingHedge { status: p.status });
            }
            let (entry_price, entry_size) = p.entry.fill().unwrap_or((Decimal::ZERO, Decimal::ZERO));
            (
                entry_price,
                entry_size,
                p.hedge.order_id().map(str::to_string),
                p.hedge_token_id.clone(),
                p.hedge_side(),
            )
        };

        let projected = entry_price + current_ask;
        if projected > self.cfg.emergency_max_combined_price {
            return Err(EmergencyError::CeilingExceeded {
                projected,
                ceiling: self.cfg.emergency_max_combined_price,
            });
        }

        // Best-effort cancel of the resting hedge; it may already be filled
        // or expired, so failure does not block the exit order.
        if let Some(order_id) = hedge_order_id {
            if let Err(e) = self.gateway.cancel_order(&order_id).await {
                warn!(pair_id, order_id = %order_id, error = %e, "hedge cancel failed, continuing");
            }
        }

        let price =
            (current_ask + self.cfg.emergency_price_offset).min(self.cfg.max_valid_price);
        let spec = OrderSpec::ioc(hedge_token, hedge_side, Side::Buy, price, entry_size);

        let placement = self
            .gateway
            .place_order(spec)
            .await
            .map_err(|e| EmergencyError::Placement(e.to_string()))?;

        {
            let mut st = self.lock();
            if let Some(p) = st.pairs.get_mut(&pair_id) {
                p.emergency = LegState::Placed {
                    order_id: placement.order_id.clone(),
                };
                p.updated_at = now;
                // IOC usually reports its fill in the placement result.
                if placement.is_filled() {
                    p.settle_emergency(
                        placement.order_id.clone(),
                        placement.avg_price,
                        placement.filled_size,
                        now,
                    );
                }
            }
        }

        self.audit.emit(AuditEvent::EmergencyPlaced {
            pair_id,
            order_id: placement.order_id.clone(),
            price,
            size: entry_size,
            projected_combined: projected,
        });
        warn!(pair_id, price = %price, projected = %projected, "emergency hedge placed");

        Ok(placement.order_id)
    }

    // ========================================================================
    // Sweeps and housekeeping
    // ========================================================================

    /// Cancel entry orders that never confirmed within the entry timeout and
    /// mark their pairs CANCELLED. Returns the cancelled pair IDs.
    ///
    /// `WAITING_HEDGE` pairs are deliberately left alone: the resting hedge
    /// is meant to rest indefinitely, and only an explicit emergency trigger
    /// closes it early.
    pub async fn check_timeouts(&self) -> Vec<u64> {
        self.check_timeouts_at(Utc::now()).await
    }

    /// `check_timeouts` with an explicit clock (tests, replay).
    pub async fn check_timeouts_at(&self, now: DateTime<Utc>) -> Vec<u64> {
        let timeout = chrono::Duration::from_std(self.cfg.entry_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let stale: Vec<(u64, Option<String>, String, i64)> = {
            let st = self.lock();
            st.pairs
                .values()
                .filter(|p| p.status == PairStatus::PendingEntry && p.age(now) >= timeout)
                .map(|p| {
                    (
                        p.id,
                        p.entry.order_id().map(str::to_string),
                        p.market_id.clone(),
                        p.age(now).num_seconds(),
                    )
                })
                .collect()
        };

        let mut cancelled = Vec::new();
        for (pair_id, order_id, market_id, age_secs) in stale {
            if let Some(order_id) = &order_id {
                // The order may already have expired or filled.
                if let Err(e) = self.gateway.cancel_order(order_id).await {
                    debug!(pair_id, order_id = %order_id, error = %e, "entry cancel failed, ignoring");
                }
            }

            // Re-check under the lock: a fill may have landed while the
            // cancel was in flight.
            let still_pending = {
                let mut st = self.lock();
                match st.pairs.get_mut(&pair_id) {
                    Some(p) if p.status == PairStatus::PendingEntry && !p.entry.is_filled() => {
                        p.advance(PairStatus::Cancelled, now);
                        true
                    }
                    _ => false,
                }
            };

            if still_pending {
                self.audit.emit(AuditEvent::EntryTimedOut {
                    pair_id,
                    market_id: market_id.clone(),
                    age_secs,
                });
                self.audit.emit(AuditEvent::PairCancelled {
                    pair_id,
                    market_id,
                    reason: "entry timeout".to_string(),
                });
                cancelled.push(pair_id);
            }
        }
        cancelled
    }

    /// Drop terminal pairs idle longer than the retention window. Returns
    /// the number removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    /// `cleanup` with an explicit clock (tests, replay).
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.cfg.retention_window)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut st = self.lock();
        let before = st.pairs.len();
        st.pairs
            .retain(|_, p| !(p.status.is_terminal() && p.idle(now) >= retention));
        before - st.pairs.len()
    }

    /// Mark every non-terminal pair in a settled market EXPIRED. Called by
    /// the external market-lifecycle collaborator; never triggered
    /// internally. Returns the expired pair IDs.
    pub fn expire_market(&self, market_id: &str) -> Vec<u64> {
        let now = Utc::now();
        let mut st = self.lock();
        let mut expired = Vec::new();
        for p in st.pairs.values_mut() {
            if p.market_id == market_id && !p.status.is_terminal() {
                p.advance(PairStatus::Expired, now);
                expired.push(p.id);
            }
        }
        expired
    }

    /// Clear all pairs, the pair-id counter, and the market registry.
    ///
    /// Performs no order cancellation; callers must cancel live orders
    /// first if needed.
    pub fn reset(&self) {
        let mut st = self.lock();
        *st = TrackerState::new();
    }

    // ========================================================================
    // Read-only views
    // ========================================================================

    /// Aggregate statistics over the pair set.
    pub fn stats(&self) -> TrackerStats {
        let st = self.lock();
        stats::aggregate(st.pairs.values())
    }

    /// Pairs currently counting against the concurrency limit.
    pub fn active_pairs(&self) -> Vec<Pair> {
        let st = self.lock();
        let mut pairs: Vec<Pair> = st
            .pairs
            .values()
            .filter(|p| p.status.is_active())
            .cloned()
            .collect();
        pairs.sort_unstable_by_key(|p| p.id);
        pairs
    }

    /// All pairs for one market, terminal included.
    pub fn market_pairs(&self, market_id: &str) -> Vec<Pair> {
        let st = self.lock();
        let mut pairs: Vec<Pair> = st
            .pairs
            .values()
            .filter(|p| p.market_id == market_id)
            .cloned()
            .collect();
        pairs.sort_unstable_by_key(|p| p.id);
        pairs
    }

    /// Snapshot of a single pair.
    pub fn get_pair(&self, pair_id: u64) -> Option<Pair> {
        self.lock().pairs.get(&pair_id).cloned()
    }
}

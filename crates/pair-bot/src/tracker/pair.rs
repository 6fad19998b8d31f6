//! Pair record and state machine.
//!
//! A `Pair` is one hedge attempt in one market: an aggressive entry leg on
//! the expensive side, a resting hedge leg on the cheap side, and optionally
//! an emergency leg if the hedge has to be force-closed.
//!
//! Legs are modelled as a sum type so illegal states (a fill price without an
//! order ID, a hedge fill before a hedge order) are unrepresentable.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pair_common::MarketSide;

/// Lifecycle of a single order leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LegState {
    /// No order exists yet.
    Unplaced,
    /// Order submitted, exchange ID known, no fill recorded.
    Placed { order_id: String },
    /// Order filled.
    Filled {
        order_id: String,
        price: Decimal,
        size: Decimal,
        at: DateTime<Utc>,
    },
}

impl LegState {
    /// Exchange order ID, if one has been assigned.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            LegState::Unplaced => None,
            LegState::Placed { order_id } => Some(order_id),
            LegState::Filled { order_id, .. } => Some(order_id),
        }
    }

    /// Fill price and size, if filled.
    pub fn fill(&self) -> Option<(Decimal, Decimal)> {
        match self {
            LegState::Filled { price, size, .. } => Some((*price, *size)),
            _ => None,
        }
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, LegState::Filled { .. })
    }

    /// Returns true if the given exchange order ID belongs to this leg.
    pub fn matches_order(&self, order_id: &str) -> bool {
        self.order_id() == Some(order_id)
    }
}

/// Pair lifecycle status.
///
/// Transitions are monotonic: a pair only ever moves to a status with an
/// equal or higher rank, and terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PairStatus {
    /// Entry order placed (or about to be), no confirmed entry fill yet.
    PendingEntry,
    /// Entry filled and hedge resting on the book.
    WaitingHedge,
    /// Both legs filled: the intended outcome.
    Hedged,
    /// Entry closed out by an emergency order: stop-loss outcome.
    EmergencyHedged,
    /// Abandoned before both legs filled.
    Cancelled,
    /// Market settled before the pair resolved. Set by the external
    /// market-lifecycle collaborator, never transitioned internally.
    Expired,
}

impl PairStatus {
    /// Ordering rank for monotonicity checks.
    pub fn rank(&self) -> u8 {
        match self {
            PairStatus::PendingEntry => 0,
            PairStatus::WaitingHedge => 1,
            PairStatus::Hedged
            | PairStatus::EmergencyHedged
            | PairStatus::Cancelled
            | PairStatus::Expired => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// Pair counts against the concurrency limit while in these states.
    pub fn is_active(&self) -> bool {
        matches!(self, PairStatus::PendingEntry | PairStatus::WaitingHedge)
    }
}

impl std::fmt::Display for PairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairStatus::PendingEntry => write!(f, "PENDING_ENTRY"),
            PairStatus::WaitingHedge => write!(f, "WAITING_HEDGE"),
            PairStatus::Hedged => write!(f, "HEDGED"),
            PairStatus::EmergencyHedged => write!(f, "EMERGENCY_HEDGED"),
            PairStatus::Cancelled => write!(f, "CANCELLED"),
            PairStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// One hedge attempt in one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    /// Unique pair ID (monotonic counter, reset per session).
    pub id: u64,
    /// Market/event ID.
    pub market_id: String,
    /// Condition ID for this market.
    pub condition_id: String,
    /// Token ID the entry leg trades.
    pub entry_token_id: String,
    /// Token ID the hedge leg trades.
    pub hedge_token_id: String,
    /// Outcome side of the entry (expensive) leg.
    pub entry_side: MarketSide,
    /// Reference ask price at decision time.
    pub entry_ref_price: Decimal,
    /// Requested size in shares, after size resolution.
    pub requested_size: Decimal,
    /// Entry leg state.
    pub entry: LegState,
    /// Hedge leg state.
    pub hedge: LegState,
    /// Computed hedge price; zero until the entry fill is known.
    pub hedge_price: Decimal,
    /// Emergency leg state; only populated by an emergency unwind.
    pub emergency: LegState,
    /// True once the hedge-placement routine has been entered. Set
    /// synchronously before any asynchronous call so the two racing fill
    /// paths cannot both place a hedge.
    pub maker_placed: bool,
    /// Lifecycle status.
    pub status: PairStatus,
    /// Sum of both legs' fill prices, once the pair resolves.
    pub realized_combined: Option<Decimal>,
    /// (1 - realized combined) x matched size, once the pair resolves.
    pub realized_profit: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pair {
    /// Construct a new pair in `PENDING_ENTRY` with the hedge leg fully
    /// unpopulated. The hedge side is always the opposite outcome.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        market_id: String,
        condition_id: String,
        entry_token_id: String,
        hedge_token_id: String,
        entry_side: MarketSide,
        entry_ref_price: Decimal,
        requested_size: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            market_id,
            condition_id,
            entry_token_id,
            hedge_token_id,
            entry_side,
            entry_ref_price,
            requested_size,
            entry: LegState::Unplaced,
            hedge: LegState::Unplaced,
            hedge_price: Decimal::ZERO,
            emergency: LegState::Unplaced,
            maker_placed: false,
            status: PairStatus::PendingEntry,
            realized_combined: None,
            realized_profit: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Outcome side of the hedge leg.
    pub fn hedge_side(&self) -> MarketSide {
        self.entry_side.opposite()
    }

    /// Advance the status. Backward transitions are refused: returns false
    /// and leaves the pair untouched.
    pub fn advance(&mut self, status: PairStatus, now: DateTime<Utc>) -> bool {
        if status.rank() < self.status.rank() {
            debug_assert!(false, "backward transition {} -> {}", self.status, status);
            return false;
        }
        // Terminal states are final even against other terminal states.
        if self.status.is_terminal() && status != self.status {
            return false;
        }
        self.status = status;
        self.updated_at = now;
        true
    }

    /// Record the entry fill.
    pub fn record_entry_fill(
        &mut self,
        order_id: String,
        price: Decimal,
        size: Decimal,
        now: DateTime<Utc>,
    ) {
        self.entry = LegState::Filled {
            order_id,
            price,
            size,
            at: now,
        };
        self.updated_at = now;
    }

    /// Resolve the pair through the hedge leg: record the fill, compute the
    /// realized combined price and profit, move to `HEDGED`.
    ///
    /// On an already-terminal pair only the leg fill is recorded; the
    /// realized economics stay consistent with the settled status.
    pub fn settle_hedged(
        &mut self,
        order_id: String,
        price: Decimal,
        size: Decimal,
        now: DateTime<Utc>,
    ) {
        self.hedge = LegState::Filled {
            order_id,
            price,
            size,
            at: now,
        };
        self.updated_at = now;
        if !self.status.is_terminal() {
            self.realize(price, size, now);
            self.advance(PairStatus::Hedged, now);
        }
    }

    /// Resolve the pair through the emergency leg.
    ///
    /// A late emergency fill can land after the resting hedge already
    /// settled the pair (the cancel raced the fill); the leg is recorded but
    /// the hedge economics are kept.
    pub fn settle_emergency(
        &mut self,
        order_id: String,
        price: Decimal,
        size: Decimal,
        now: DateTime<Utc>,
    ) {
        self.emergency = LegState::Filled {
            order_id,
            price,
            size,
            at: now,
        };
        self.updated_at = now;
        if !self.status.is_terminal() {
            self.realize(price, size, now);
            self.advance(PairStatus::EmergencyHedged, now);
        }
    }

    fn realize(&mut self, exit_price: Decimal, exit_size: Decimal, now: DateTime<Utc>) {
        let Some((entry_price, entry_size)) = self.entry.fill() else {
            return;
        };
        let combined = entry_price + exit_price;
        let matched = entry_size.min(exit_size);
        self.realized_combined = Some(combined);
        self.realized_profit = Some((Decimal::ONE - combined) * matched);
        self.updated_at = now;
    }

    /// Age of the pair at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Time since the last mutation at `now`.
    pub fn idle(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }
}

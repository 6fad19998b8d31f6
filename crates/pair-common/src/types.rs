//! Market-domain types shared between the tracker core and its collaborators.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Asset class of a market's underlying.
///
/// The tracker trades a single asset class; everything else is rejected at
/// admission (hard filter, not a preference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Crypto,
    Sports,
    Politics,
    Other,
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetClass::Crypto => write!(f, "crypto"),
            AssetClass::Sports => write!(f, "sports"),
            AssetClass::Politics => write!(f, "politics"),
            AssetClass::Other => write!(f, "other"),
        }
    }
}

/// Outcome side of a binary up/down market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketSide {
    Up,
    Down,
}

impl MarketSide {
    pub fn opposite(&self) -> Self {
        match self {
            MarketSide::Up => MarketSide::Down,
            MarketSide::Down => MarketSide::Up,
        }
    }
}

impl std::fmt::Display for MarketSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketSide::Up => write!(f, "UP"),
            MarketSide::Down => write!(f, "DOWN"),
        }
    }
}

/// Order side for trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Read-only best bid/ask view of both outcome sides of one market instance.
///
/// Produced by the external market-data collaborator; the tracker never
/// mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Unique market/event ID.
    pub market_id: String,
    /// Condition ID for this market.
    pub condition_id: String,
    /// Underlying asset symbol (e.g., "BTC").
    pub asset: String,
    /// Asset class used by the admission filter.
    pub asset_class: AssetClass,
    /// Token ID for the UP outcome.
    pub token_id_up: String,
    /// Token ID for the DOWN outcome.
    pub token_id_down: String,
    /// Best bid on the UP side.
    pub best_bid_up: Decimal,
    /// Best ask on the UP side.
    pub best_ask_up: Decimal,
    /// Best bid on the DOWN side.
    pub best_bid_down: Decimal,
    /// Best ask on the DOWN side.
    pub best_ask_down: Decimal,
    /// Capture timestamp.
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Best ask for the given outcome side.
    pub fn best_ask(&self, side: MarketSide) -> Decimal {
        match side {
            MarketSide::Up => self.best_ask_up,
            MarketSide::Down => self.best_ask_down,
        }
    }

    /// Best bid for the given outcome side.
    pub fn best_bid(&self, side: MarketSide) -> Decimal {
        match side {
            MarketSide::Up => self.best_bid_up,
            MarketSide::Down => self.best_bid_down,
        }
    }

    /// Token ID for the given outcome side.
    pub fn token_id(&self, side: MarketSide) -> &str {
        match side {
            MarketSide::Up => &self.token_id_up,
            MarketSide::Down => &self.token_id_down,
        }
    }

    /// Returns true if both sides have a usable ask quote.
    pub fn has_quotes(&self) -> bool {
        self.best_ask_up > Decimal::ZERO && self.best_ask_down > Decimal::ZERO
    }
}

/// Asynchronous fill notification from the exchange push channel.
///
/// No ordering is guaranteed relative to the order-placement call that
/// created the order; a notice can arrive before `place_order` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillNotice {
    /// Exchange order ID the fill belongs to.
    pub order_id: String,
    /// Outcome side that was traded.
    pub side: MarketSide,
    /// Fill price per share.
    pub price: Decimal,
    /// Filled size in shares.
    pub size: Decimal,
    /// Fill timestamp.
    pub timestamp: DateTime<Utc>,
}

//! Order gateway abstraction for exchange order placement and cancellation.
//!
//! The tracker core never talks to an exchange directly; it goes through the
//! `OrderGateway` trait so the same lifecycle logic works against:
//! - A live exchange client (external, out of this repo)
//! - `PaperGateway`: in-process simulation for the harness and tests
//!
//! ## Placement semantics
//!
//! `place_order` is the only suspension point in the pair lifecycle. It may
//! report an immediate fill or partial fill in its result, or leave fills to
//! arrive later on the asynchronous notification channel - possibly *before*
//! this call returns. The tracker is written to be correct under either
//! ordering.

pub mod paper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use pair_common::{MarketSide, Side};

/// Errors that can occur at the gateway boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Order timeout: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Time-in-force for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Immediate-or-cancel: fill what crosses, cancel the rest.
    Ioc,
    /// Good-till-cancelled: rest on the book.
    Gtc,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeInForce::Ioc => write!(f, "IOC"),
            TimeInForce::Gtc => write!(f, "GTC"),
        }
    }
}

/// Request to place an order.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    /// Unique request ID for correlation.
    pub request_id: String,
    /// Token ID to trade.
    pub token_id: String,
    /// Outcome side of the token (UP/DOWN).
    pub market_side: MarketSide,
    /// Buy or sell.
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Size in shares.
    pub size: Decimal,
    /// Time-in-force.
    pub tif: TimeInForce,
    /// Request timestamp.
    pub timestamp: DateTime<Utc>,
}

impl OrderSpec {
    /// Create an immediate-or-cancel order (entry and emergency legs).
    pub fn ioc(
        token_id: String,
        market_side: MarketSide,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            token_id,
            market_side,
            side,
            price,
            size,
            tif: TimeInForce::Ioc,
            timestamp: Utc::now(),
        }
    }

    /// Create a good-till-cancelled resting order (hedge leg).
    pub fn gtc(
        token_id: String,
        market_side: MarketSide,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            token_id,
            market_side,
            side,
            price,
            size,
            tif: TimeInForce::Gtc,
            timestamp: Utc::now(),
        }
    }

    /// Notional value of this order (price * size).
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Fill status reported by the placement result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementStatus {
    /// Accepted, no fill yet.
    New,
    /// Partially filled on arrival.
    Partial,
    /// Fully filled on arrival.
    Filled,
}

/// Successful result of an order submission.
///
/// A `New` status does not mean the order will not fill - the fill may
/// already be in flight on the asynchronous notification channel.
#[derive(Debug, Clone)]
pub struct OrderPlacement {
    /// Request ID from the original spec.
    pub request_id: String,
    /// Exchange-assigned order ID.
    pub order_id: String,
    /// Fill status at placement time.
    pub status: PlacementStatus,
    /// Size filled at placement time (zero when `New`).
    pub filled_size: Decimal,
    /// Average fill price (zero when `New`).
    pub avg_price: Decimal,
    /// Placement timestamp.
    pub timestamp: DateTime<Utc>,
}

impl OrderPlacement {
    /// Returns true if the placement result reports any fill.
    pub fn is_filled(&self) -> bool {
        matches!(self.status, PlacementStatus::Partial | PlacementStatus::Filled)
    }
}

/// Order gateway trait.
///
/// `&self` receivers: the synchronous placement path and the asynchronous
/// fill-reconciliation path share one gateway handle.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Place an order and wait for the initial result.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is rejected or cannot be submitted.
    /// A timeout is treated by callers like an explicit rejection.
    async fn place_order(&self, spec: OrderSpec) -> Result<OrderPlacement, GatewayError>;

    /// Cancel an existing order by ID.
    ///
    /// Callers treat cancellation as best-effort: the order may already have
    /// filled or expired, and failure here is never fatal.
    ///
    /// # Errors
    ///
    /// Returns an error if the order cannot be cancelled.
    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_spec_ioc() {
        let spec = OrderSpec::ioc(
            "tok-up".to_string(),
            MarketSide::Up,
            Side::Buy,
            dec!(0.41),
            dec!(10),
        );
        assert_eq!(spec.tif, TimeInForce::Ioc);
        assert_eq!(spec.market_side, MarketSide::Up);
        assert_eq!(spec.notional(), dec!(4.1));
        assert!(!spec.request_id.is_empty());
    }

    #[test]
    fn test_order_spec_gtc() {
        let spec = OrderSpec::gtc(
            "tok-down".to_string(),
            MarketSide::Down,
            Side::Buy,
            dec!(0.55),
            dec!(10),
        );
        assert_eq!(spec.tif, TimeInForce::Gtc);
        assert_eq!(spec.notional(), dec!(5.5));
    }

    #[test]
    fn test_request_ids_unique() {
        let a = OrderSpec::ioc("t".into(), MarketSide::Up, Side::Buy, dec!(0.4), dec!(1));
        let b = OrderSpec::ioc("t".into(), MarketSide::Up, Side::Buy, dec!(0.4), dec!(1));
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_placement_is_filled() {
        let placement = OrderPlacement {
            request_id: "r".to_string(),
            order_id: "o".to_string(),
            status: PlacementStatus::Partial,
            filled_size: dec!(4),
            avg_price: dec!(0.40),
            timestamp: Utc::now(),
        };
        assert!(placement.is_filled());

        let resting = OrderPlacement {
            status: PlacementStatus::New,
            filled_size: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            ..placement
        };
        assert!(!resting.is_filled());
    }
}

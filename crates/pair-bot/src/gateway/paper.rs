//! Paper gateway: in-process order simulation.
//!
//! Used by the replay harness and integration tests. IOC orders fill against
//! a configured ask quote; GTC orders rest until `cross()` drives a matching
//! trade through them. Every fill is also published as a `FillNotice` on the
//! notification channel, so the tracker's reconciliation path is exercised
//! exactly like it would be against a real exchange (including duplicate
//! delivery of fills already reported in the placement result).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::debug;

use pair_common::{FillNotice, MarketSide};

use super::{GatewayError, OrderGateway, OrderPlacement, OrderSpec, PlacementStatus, TimeInForce};

/// An order resting on the simulated book.
#[derive(Debug, Clone)]
struct RestingOrder {
    order_id: String,
    token_id: String,
    market_side: MarketSide,
    price: Decimal,
    size: Decimal,
}

#[derive(Debug, Default)]
struct PaperBook {
    /// Best ask per token ID, maintained by the harness.
    asks: HashMap<String, Decimal>,
    /// Resting GTC orders.
    resting: Vec<RestingOrder>,
}

/// Simulated order gateway.
pub struct PaperGateway {
    book: Mutex<PaperBook>,
    fill_tx: mpsc::UnboundedSender<FillNotice>,
    next_order_id: AtomicU64,
}

impl PaperGateway {
    /// Create a paper gateway and the fill notification receiver paired
    /// with it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FillNotice>) {
        let (fill_tx, fill_rx) = mpsc::unbounded_channel();
        (
            Self {
                book: Mutex::new(PaperBook::default()),
                fill_tx,
                next_order_id: AtomicU64::new(1),
            },
            fill_rx,
        )
    }

    /// Update the best ask for a token. IOC orders fill against this.
    pub fn set_ask(&self, token_id: &str, ask: Decimal) {
        let mut book = self.book.lock().expect("paper book poisoned");
        book.asks.insert(token_id.to_string(), ask);
    }

    /// Drive a trade through the book at `price`: every resting order on
    /// this token with a limit at or above `price` fills at its own limit.
    ///
    /// Returns the number of orders filled.
    pub fn cross(&self, token_id: &str, price: Decimal) -> usize {
        let filled: Vec<RestingOrder> = {
            let mut book = self.book.lock().expect("paper book poisoned");
            let (hit, rest): (Vec<_>, Vec<_>) = book
                .resting
                .drain(..)
                .partition(|o| o.token_id == token_id && o.price >= price);
            book.resting = rest;
            hit
        };

        for order in &filled {
            debug!(order_id = %order.order_id, price = %order.price, "paper fill (resting)");
            self.notify(order.order_id.clone(), order.market_side, order.price, order.size);
        }
        filled.len()
    }

    /// Count of orders currently resting.
    pub fn resting_count(&self) -> usize {
        self.book.lock().expect("paper book poisoned").resting.len()
    }

    fn next_id(&self) -> String {
        format!("paper-{}", self.next_order_id.fetch_add(1, Ordering::Relaxed))
    }

    fn notify(&self, order_id: String, side: MarketSide, price: Decimal, size: Decimal) {
        let _ = self.fill_tx.send(FillNotice {
            order_id,
            side,
            price,
            size,
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(&self, spec: OrderSpec) -> Result<OrderPlacement, GatewayError> {
        if spec.size <= Decimal::ZERO {
            return Err(GatewayError::Rejected("size must be positive".to_string()));
        }
        if spec.price <= Decimal::ZERO || spec.price >= Decimal::ONE {
            return Err(GatewayError::Rejected(format!(
                "price {} outside (0, 1)",
                spec.price
            )));
        }

        let order_id = self.next_id();

        match spec.tif {
            TimeInForce::Ioc => {
                let ask = {
                    let book = self.book.lock().expect("paper book poisoned");
                    book.asks.get(&spec.token_id).copied()
                };
                match ask {
                    Some(ask) if spec.price >= ask => {
                        debug!(order_id = %order_id, price = %ask, size = %spec.size, "paper fill (ioc)");
                        self.notify(order_id.clone(), spec.market_side, ask, spec.size);
                        Ok(OrderPlacement {
                            request_id: spec.request_id,
                            order_id,
                            status: PlacementStatus::Filled,
                            filled_size: spec.size,
                            avg_price: ask,
                            timestamp: Utc::now(),
                        })
                    }
                    // Nothing crossed: IOC cancels with no fill.
                    _ => Ok(OrderPlacement {
                        request_id: spec.request_id,
                        order_id,
                        status: PlacementStatus::New,
                        filled_size: Decimal::ZERO,
                        avg_price: Decimal::ZERO,
                        timestamp: Utc::now(),
                    }),
                }
            }
            TimeInForce::Gtc => {
                let mut book = self.book.lock().expect("paper book poisoned");
                book.resting.push(RestingOrder {
                    order_id: order_id.clone(),
                    token_id: spec.token_id.clone(),
                    market_side: spec.market_side,
                    price: spec.price,
                    size: spec.size,
                });
                Ok(OrderPlacement {
                    request_id: spec.request_id,
                    order_id,
                    status: PlacementStatus::New,
                    filled_size: Decimal::ZERO,
                    avg_price: Decimal::ZERO,
                    timestamp: Utc::now(),
                })
            }
        }
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let mut book = self.book.lock().expect("paper book poisoned");
        let before = book.resting.len();
        book.resting.retain(|o| o.order_id != order_id);
        if book.resting.len() < before {
            Ok(())
        } else {
            Err(GatewayError::UnknownOrder(order_id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pair_common::Side;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_ioc_fills_against_ask() {
        let (gateway, mut fills) = PaperGateway::new();
        gateway.set_ask("tok-up", dec!(0.40));

        let spec = OrderSpec::ioc("tok-up".into(), MarketSide::Up, Side::Buy, dec!(0.41), dec!(10));
        let placement = gateway.place_order(spec).await.unwrap();

        assert_eq!(placement.status, PlacementStatus::Filled);
        assert_eq!(placement.filled_size, dec!(10));
        assert_eq!(placement.avg_price, dec!(0.40)); // fills at the ask, not the limit

        let notice = fills.try_recv().unwrap();
        assert_eq!(notice.order_id, placement.order_id);
        assert_eq!(notice.price, dec!(0.40));
    }

    #[tokio::test]
    async fn test_ioc_no_cross_returns_new() {
        let (gateway, mut fills) = PaperGateway::new();
        gateway.set_ask("tok-up", dec!(0.45));

        let spec = OrderSpec::ioc("tok-up".into(), MarketSide::Up, Side::Buy, dec!(0.41), dec!(10));
        let placement = gateway.place_order(spec).await.unwrap();

        assert_eq!(placement.status, PlacementStatus::New);
        assert!(fills.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_gtc_rests_until_crossed() {
        let (gateway, mut fills) = PaperGateway::new();

        let spec = OrderSpec::gtc("tok-down".into(), MarketSide::Down, Side::Buy, dec!(0.55), dec!(10));
        let placement = gateway.place_order(spec).await.unwrap();
        assert_eq!(placement.status, PlacementStatus::New);
        assert_eq!(gateway.resting_count(), 1);

        // Trade at 0.60 does not reach a 0.55 bid.
        assert_eq!(gateway.cross("tok-down", dec!(0.60)), 0);

        // Trade at 0.55 fills it at the resting limit.
        assert_eq!(gateway.cross("tok-down", dec!(0.55)), 1);
        assert_eq!(gateway.resting_count(), 0);

        let notice = fills.try_recv().unwrap();
        assert_eq!(notice.order_id, placement.order_id);
        assert_eq!(notice.price, dec!(0.55));
        assert_eq!(notice.size, dec!(10));
    }

    #[tokio::test]
    async fn test_cancel_resting_order() {
        let (gateway, _fills) = PaperGateway::new();

        let spec = OrderSpec::gtc("tok-down".into(), MarketSide::Down, Side::Buy, dec!(0.55), dec!(10));
        let placement = gateway.place_order(spec).await.unwrap();

        gateway.cancel_order(&placement.order_id).await.unwrap();
        assert_eq!(gateway.resting_count(), 0);

        // Second cancel fails: the order is gone.
        assert!(gateway.cancel_order(&placement.order_id).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_invalid_price() {
        let (gateway, _fills) = PaperGateway::new();
        let spec = OrderSpec::ioc("tok-up".into(), MarketSide::Up, Side::Buy, dec!(1.20), dec!(10));
        assert!(matches!(
            gateway.place_order(spec).await,
            Err(GatewayError::Rejected(_))
        ));
    }
}

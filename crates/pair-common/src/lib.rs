//! Shared types for the pair hedging bot.
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod types;

pub use types::{AssetClass, FillNotice, MarketSide, MarketSnapshot, Side};

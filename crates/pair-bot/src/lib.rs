//! Pair lifecycle manager for binary up/down prediction markets.
//!
//! Implements the pairing leg of a market-making strategy: buy the expensive
//! outcome aggressively, then rest a maker order on the cheap opposite
//! outcome so the combined cost of both legs stays below $1.00. When the
//! market moves against an open leg, an emergency marketable order closes
//! the position at a bounded loss.
//!
//! ## Architecture
//!
//! - **Exactly-once hedging**: two racing fill paths (placement result and
//!   push notification) converge on one hedge via a set-then-act guard
//! - **Pre-insert before placement**: fill reconciliation can always find
//!   its pair, whichever path reports first
//! - **Typed rejections**: expected refusals (cooldown, capacity, price
//!   ceiling) are data, not errors
//!
//! ## Modules
//!
//! - `config`: Configuration loading and validation
//! - `tracker`: Pair records, state machine, and the lifecycle manager
//! - `gateway`: Order placement abstraction and the paper simulator
//! - `audit`: Fire-and-forget lifecycle audit trail

pub mod audit;
pub mod config;
pub mod gateway;
pub mod tracker;

pub use audit::{audit_log_loop, AuditEvent, AuditRecord, AuditSink};
pub use config::{AuditConfig, BotConfig, TrackerConfig, TradingMode};
pub use gateway::paper::PaperGateway;
pub use gateway::{
    GatewayError, OrderGateway, OrderPlacement, OrderSpec, PlacementStatus, TimeInForce,
};
pub use tracker::{
    EmergencyError, FillOutcome, LegState, MakerError, MakerOutcome, OpenError, OpenOutcome,
    OpenRejection, Pair, PairStatus, PairTracker, TrackerStats,
};

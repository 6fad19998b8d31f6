//! Best-effort audit sink for pair lifecycle events.
//!
//! Fire-and-forget: the tracker calls `emit()` from its hot path and never
//! waits, never fails. Events go over a bounded channel to a background
//! consumer; when the channel is full the event is dropped and counted.
//! Audit failures must never affect trading control flow.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use pair_common::MarketSide;

/// Default channel capacity for audit events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// How many drops accumulate before a warning is logged (avoids log spam).
const DROP_LOG_THRESHOLD: u64 = 100;

/// A pair lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    PairOpened {
        pair_id: u64,
        market_id: String,
        entry_side: MarketSide,
        entry_price: Decimal,
        size: Decimal,
    },
    EntryFilled {
        pair_id: u64,
        order_id: String,
        price: Decimal,
        size: Decimal,
    },
    HedgePlaced {
        pair_id: u64,
        order_id: String,
        entry_price: Decimal,
        hedge_price: Decimal,
        size: Decimal,
        projected_combined: Decimal,
    },
    HedgeFilled {
        pair_id: u64,
        order_id: String,
        price: Decimal,
        size: Decimal,
        realized_combined: Decimal,
        realized_profit: Decimal,
    },
    /// Entry filled but no hedge could be placed: real unhedged exposure.
    UnhedgedEntry {
        pair_id: u64,
        market_id: String,
        entry_price: Decimal,
        entry_size: Decimal,
        reason: String,
    },
    EmergencyPlaced {
        pair_id: u64,
        order_id: String,
        price: Decimal,
        size: Decimal,
        projected_combined: Decimal,
    },
    EmergencyFilled {
        pair_id: u64,
        order_id: String,
        price: Decimal,
        size: Decimal,
        realized_combined: Decimal,
        realized_profit: Decimal,
    },
    EntryTimedOut {
        pair_id: u64,
        market_id: String,
        age_secs: i64,
    },
    PairCancelled {
        pair_id: u64,
        market_id: String,
        reason: String,
    },
}

/// Timestamped audit record as delivered to the consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// Handle used by the tracker to emit events.
///
/// Cloneable; all clones share the same channel and drop counter.
#[derive(Debug, Clone)]
pub struct AuditSink {
    enabled: Arc<AtomicBool>,
    tx: Option<mpsc::Sender<AuditRecord>>,
    drops: Arc<AtomicU64>,
}

impl AuditSink {
    /// Create a sink and the receiver half for the consumer loop.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<AuditRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                enabled: Arc::new(AtomicBool::new(true)),
                tx: Some(tx),
                drops: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Create a sink that discards everything.
    pub fn disabled() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(false)),
            tx: None,
            drops: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enable or disable emission at runtime.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Emit an event. Never blocks, never fails; drops on backpressure.
    #[inline]
    pub fn emit(&self, event: AuditEvent) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let Some(tx) = &self.tx else { return };
        let record = AuditRecord {
            at: Utc::now(),
            event,
        };
        if tx.try_send(record).is_err() {
            let dropped = self.drops.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % DROP_LOG_THRESHOLD == 0 {
                warn!(dropped, "audit sink backpressure, events dropped");
            }
        }
    }

    /// Number of events dropped due to backpressure.
    pub fn dropped(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

/// Background consumer that writes audit records through tracing.
///
/// Runs until the sink side is dropped.
pub async fn audit_log_loop(mut rx: mpsc::Receiver<AuditRecord>) {
    while let Some(record) = rx.recv().await {
        match &record.event {
            AuditEvent::UnhedgedEntry {
                pair_id,
                market_id,
                entry_price,
                entry_size,
                reason,
            } => {
                // The one outcome that demands operator attention.
                error!(
                    pair_id,
                    market_id = %market_id,
                    entry_price = %entry_price,
                    entry_size = %entry_size,
                    reason = %reason,
                    "UNHEDGED ENTRY - manual reconciliation required"
                );
            }
            event => {
                info!(at = %record.at, event = ?event, "pair lifecycle");
            }
        }
    }
}

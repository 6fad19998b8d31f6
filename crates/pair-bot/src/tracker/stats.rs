//! Aggregate statistics over the pair set.

use rust_decimal::Decimal;
use serde::Serialize;

use super::pair::{Pair, PairStatus};

/// Point-in-time summary of the tracker's pair set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    /// Pairs currently in the working set (terminal included, until cleanup).
    pub total: usize,
    pub pending_entry: usize,
    pub waiting_hedge: usize,
    pub hedged: usize,
    pub emergency_hedged: usize,
    pub cancelled: usize,
    pub expired: usize,
    /// Sum of realized profit across resolved pairs (losses negative).
    pub realized_profit: Decimal,
    /// Entry-leg notional currently filled but not yet hedged.
    pub unhedged_exposure: Decimal,
}

impl TrackerStats {
    /// Pairs counting against the concurrency limit.
    pub fn active(&self) -> usize {
        self.pending_entry + self.waiting_hedge
    }
}

pub(crate) fn aggregate<'a>(pairs: impl Iterator<Item = &'a Pair>) -> TrackerStats {
    let mut stats = TrackerStats::default();
    for p in pairs {
        stats.total += 1;
        match p.status {
            PairStatus::PendingEntry => stats.pending_entry += 1,
            PairStatus::WaitingHedge => {
                stats.waiting_hedge += 1;
                if let Some((price, size)) = p.entry.fill() {
                    stats.unhedged_exposure += price * size;
                }
            }
            PairStatus::Hedged => stats.hedged += 1,
            PairStatus::EmergencyHedged => stats.emergency_hedged += 1,
            PairStatus::Cancelled => stats.cancelled += 1,
            PairStatus::Expired => stats.expired += 1,
        }
        if let Some(profit) = p.realized_profit {
            stats.realized_profit += profit;
        }
    }
    stats
}

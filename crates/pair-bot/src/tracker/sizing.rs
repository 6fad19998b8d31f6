//! Share-count resolution for a new pair.
//!
//! The requested size has to satisfy several policies at once:
//!
//! - stay inside `[min_shares_per_pair, max_shares_per_pair]`
//! - meet the exchange minimum notional on *both* legs
//! - respect the cheap-side exposure cap: when the projected hedge price is
//!   very low, meeting its minimum notional would balloon the entry-leg
//!   notional, so the entry notional is capped instead
//!
//! These constraints can pull in opposite directions (the hedge minimum wants
//! a bigger size, the exposure cap a smaller one). Rather than an ad hoc
//! check order, this is solved as a feasibility problem with a fixed
//! relaxation order:
//!
//! 1. If raising to meet the notional floors would exceed the per-pair
//!    maximum, cap at the maximum and accept possible exchange rejection.
//! 2. The exposure cap is applied only while the entry leg's own minimum
//!    remains satisfiable; otherwise it is ignored.

use rust_decimal::Decimal;

use crate::config::TrackerConfig;

/// Resolve the share count for a new pair.
///
/// `entry_price` is the expensive side's ask; `hedge_price_est` is the
/// projected hedge price (target combined minus entry price). Returns a
/// whole number of shares.
pub fn resolve_pair_size(
    requested: Decimal,
    entry_price: Decimal,
    hedge_price_est: Decimal,
    cfg: &TrackerConfig,
) -> Decimal {
    let min_shares = cfg.min_shares_per_pair;
    let max_shares = cfg.max_shares_per_pair;

    // Clamp the request into the configured band, whole shares only.
    let mut size = requested.floor().clamp(min_shares, max_shares);

    // Smallest share counts meeting the exchange minimum notional per leg.
    let entry_floor = notional_floor(cfg.min_order_notional, entry_price);
    let hedge_floor = notional_floor(cfg.min_order_notional, hedge_price_est);
    let needed = entry_floor.max(hedge_floor);

    if size < needed {
        // Raise to meet the minimums; beyond the per-pair maximum, cap there
        // instead and accept a possible exchange rejection.
        size = needed.min(max_shares);
    }

    // Cheap-side exposure cap: only when the hedge leg is cheap, and only
    // while the entry leg's minimum stays satisfiable under the cap.
    if hedge_price_est > Decimal::ZERO
        && hedge_price_est < cfg.cheap_side_price_threshold
        && entry_price > Decimal::ZERO
    {
        let cap = (cfg.max_entry_notional / entry_price).floor();
        if cap >= entry_floor.max(min_shares) {
            size = size.min(cap);
        }
    }

    size
}

/// Smallest whole share count with `shares * price >= notional`.
fn notional_floor(notional: Decimal, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (notional / price).ceil()
}

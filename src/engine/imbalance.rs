//! Order-book pressure context.
//!
//! A near-mid reading of the book: imbalance inside a ±1% band around the
//! mid price, the spread, and single levels large enough to act as walls.
//! Reported next to a signal for the trader; never part of the score.

use tracing::debug;

use crate::types::{BookContext, BookLevel, BookSide, OrderBookSnapshot, Pressure, Wall};

/// Half-width of the depth band around mid, in percent.
pub const DEPTH_BAND_PCT: f64 = 1.0;

/// Share of a side's band volume a single level needs to count as a wall.
pub const WALL_THRESHOLD: f64 = 0.30;

/// Only the levels closest to the touch are considered for walls.
pub const WALL_SCAN_LEVELS: usize = 10;

const STRONG_PRESSURE_PCT: f64 = 30.0;
const MODERATE_PRESSURE_PCT: f64 = 10.0;

/// Map a depth imbalance (percent) to a pressure label.
pub fn interpret_pressure(imbalance_pct: f64) -> Pressure {
    if imbalance_pct > STRONG_PRESSURE_PCT {
        Pressure::StrongBuy
    } else if imbalance_pct > MODERATE_PRESSURE_PCT {
        Pressure::ModerateBuy
    } else if imbalance_pct < -STRONG_PRESSURE_PCT {
        Pressure::StrongSell
    } else if imbalance_pct < -MODERATE_PRESSURE_PCT {
        Pressure::ModerateSell
    } else {
        Pressure::Neutral
    }
}

/// First level among the closest [`WALL_SCAN_LEVELS`] holding at least
/// [`WALL_THRESHOLD`] of `side_volume`.
pub fn detect_wall(levels: &[BookLevel], side_volume: f64, side: BookSide) -> Option<Wall> {
    if side_volume <= 0.0 {
        return None;
    }
    levels.iter().take(WALL_SCAN_LEVELS).find_map(|l| {
        let share = l.size / side_volume;
        (share >= WALL_THRESHOLD).then(|| Wall {
            side,
            price: l.price,
            size: l.size,
            volume_pct: share * 100.0,
        })
    })
}

/// Build the pressure context for a snapshot.
///
/// Returns `None` when either side of the book is empty, since there is no
/// mid price to anchor the band.
pub fn book_context(book: &OrderBookSnapshot) -> Option<BookContext> {
    let best_bid = book.best_bid()?;
    let best_ask = book.best_ask()?;
    let mid_price = (best_bid + best_ask) / 2.0;
    if mid_price <= 0.0 {
        return None;
    }

    let range = mid_price * DEPTH_BAND_PCT / 100.0;
    let bid_volume: f64 = book
        .bids
        .iter()
        .filter(|l| l.price >= mid_price - range)
        .map(|l| l.size)
        .sum();
    let ask_volume: f64 = book
        .asks
        .iter()
        .filter(|l| l.price <= mid_price + range)
        .map(|l| l.size)
        .sum();

    let total = bid_volume + ask_volume;
    let depth_imbalance_pct = if total > 0.0 {
        (bid_volume - ask_volume) / total * 100.0
    } else {
        0.0
    };

    let context = BookContext {
        mid_price,
        spread_pct: (best_ask - best_bid) / mid_price * 100.0,
        depth_imbalance_pct,
        pressure: interpret_pressure(depth_imbalance_pct),
        bid_wall: detect_wall(&book.bids, bid_volume, BookSide::Bid),
        ask_wall: detect_wall(&book.asks, ask_volume, BookSide::Ask),
    };

    if depth_imbalance_pct.abs() > 20.0 {
        debug!(
            imbalance_pct = format!("{depth_imbalance_pct:+.1}"),
            pressure = %context.pressure,
            "Significant near-mid imbalance"
        );
    }

    Some(context)
}

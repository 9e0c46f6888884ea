//! Strategy layer: scoring, ranking and the derived reports.

pub mod scorer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::info;

use crate::types::{Classification, Signal};

pub use scorer::{ScoreBreakdown, ScoreWeights, SignalScorer};

/// Entries kept in the squeeze report.
pub const SQUEEZE_REPORT_SIZE: usize = 10;

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// `None` sorts below every value.
fn cmp_optional(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Published order: score descending, then RVol descending, then symbol.
///
/// The symbol tie-break makes the order total, so identical inputs always
/// publish identically regardless of evaluation order.
pub fn compare_signals(a: &Signal, b: &Signal) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| cmp_optional(b.rvol(), a.rvol()))
        .then_with(|| a.symbol.cmp(&b.symbol))
}

pub fn rank_signals(signals: &mut [Signal]) {
    signals.sort_by(compare_signals);
}

/// First `n` signals (in the given order) at or above `min`.
pub fn top_signals(signals: &[Signal], n: usize, min: Classification) -> Vec<Signal> {
    signals
        .iter()
        .filter(|s| s.classification >= min)
        .take(n)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Squeeze report
// ---------------------------------------------------------------------------

/// One line of the silent-accumulation report: volatility compressed while
/// the book leans to the bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqueezeEntry {
    pub symbol: String,
    pub price: f64,
    pub buy_sell_ratio: Option<f64>,
    pub score: u8,
    pub classification: Classification,
    pub timestamp: DateTime<Utc>,
}

/// Signals with an active Bollinger squeeze, ranked by book buy/sell ratio.
pub fn squeeze_report(signals: &[Signal], limit: usize) -> Vec<SqueezeEntry> {
    let mut entries: Vec<SqueezeEntry> = signals
        .iter()
        .filter(|s| s.indicators.bb_squeeze)
        .map(|s| SqueezeEntry {
            symbol: s.symbol.clone(),
            price: s.price,
            buy_sell_ratio: s.indicators.buy_sell_ratio,
            score: s.score,
            classification: s.classification,
            timestamp: s.timestamp,
        })
        .collect();

    entries.sort_by(|a, b| {
        cmp_optional(b.buy_sell_ratio, a.buy_sell_ratio).then_with(|| a.symbol.cmp(&b.symbol))
    });
    entries.truncate(limit);

    info!(
        candidates = entries.len(),
        "Squeeze report built"
    );
    entries
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

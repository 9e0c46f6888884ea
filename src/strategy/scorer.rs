//! Signal scoring.
//!
//! Combines the four scored indicators into a bounded 0–100 score and a
//! confidence band. A confirmation gate demands several independent
//! indicators agree before anything above `Noise` is reported.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{BookContext, Classification, IndicatorSet, Signal};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Points awarded per active indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    pub rvol: u8,
    pub cvd_divergence: u8,
    pub bb_squeeze: u8,
    pub iceberg: u8,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            rvol: 30,
            cvd_divergence: 40,
            bb_squeeze: 20,
            iceberg: 10,
        }
    }
}

/// Active indicators required before the score bands apply.
pub const MIN_CONFIRMATIONS: u8 = 3;

pub const SNIPER_MIN_SCORE: u8 = 80;
pub const WATCH_MIN_SCORE: u8 = 60;
pub const ACCUMULATION_MIN_SCORE: u8 = 40;

const MAX_SCORE: u32 = 100;

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Score and active-indicator count for one indicator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreBreakdown {
    pub score: u8,
    pub active: u8,
}

#[derive(Debug, Clone)]
pub struct SignalScorer {
    weights: ScoreWeights,
    min_confirmations: u8,
}

impl Default for SignalScorer {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

impl SignalScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self {
            weights,
            min_confirmations: MIN_CONFIRMATIONS,
        }
    }

    /// Sum of the weights of active indicators, clamped to 100.
    pub fn score(&self, ind: &IndicatorSet) -> ScoreBreakdown {
        let w = self.weights;
        let checks = [
            (ind.rvol_signal, w.rvol),
            (ind.cvd_divergence, w.cvd_divergence),
            (ind.bb_squeeze, w.bb_squeeze),
            (ind.iceberg_count > 0, w.iceberg),
        ];

        let (total, active) = checks
            .iter()
            .filter(|(on, _)| *on)
            .fold((0u32, 0u8), |(t, a), (_, weight)| (t + u32::from(*weight), a + 1));

        ScoreBreakdown {
            score: total.min(MAX_SCORE) as u8,
            active,
        }
    }

    /// Apply the confirmation gate, then the score bands.
    pub fn classify(&self, breakdown: ScoreBreakdown) -> Classification {
        if breakdown.active < self.min_confirmations {
            return Classification::Noise;
        }
        match breakdown.score {
            s if s >= SNIPER_MIN_SCORE => Classification::Sniper,
            s if s >= WATCH_MIN_SCORE => Classification::Watch,
            s if s >= ACCUMULATION_MIN_SCORE => Classification::Accumulation,
            _ => Classification::Noise,
        }
    }

    /// Score an instrument's indicators into an immutable [`Signal`].
    pub fn evaluate(
        &self,
        symbol: &str,
        indicators: IndicatorSet,
        book: Option<BookContext>,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Signal {
        let breakdown = self.score(&indicators);
        let classification = self.classify(breakdown);

        debug!(
            symbol,
            score = breakdown.score,
            active = breakdown.active,
            class = %classification,
            "Scored"
        );

        Signal {
            symbol: symbol.to_string(),
            score: breakdown.score,
            active_indicators: breakdown.active,
            classification,
            indicators,
            book,
            price,
            timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

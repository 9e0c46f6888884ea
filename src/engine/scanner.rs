//! Volume anomaly detector and universe filter.
//!
//! Decides which instruments are worth evaluating at all (quote currency,
//! stablecoin / leveraged-token exclusion, delisting, minimum 24h volume)
//! and computes relative volume (RVol) for the ones that are. This is the
//! gate in front of every downstream computation: an instrument rejected
//! here never costs an order-book or trade-tape request.

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::ScannerConfig;
use crate::engine::history::VolumePoint;
use crate::types::{CandleSeries, Instrument, SkipReason, SkippedInstrument, VolumeProfile};

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// `current / baseline`, undefined when the baseline is zero or missing.
pub fn compute_rvol(current_volume: f64, baseline_volume: Option<f64>) -> Option<f64> {
    match baseline_volume {
        Some(b) if b > 0.0 && b.is_finite() => Some(current_volume / b),
        _ => None,
    }
}

/// Mean volume over the `window` observations preceding the current candle.
///
/// `prior` are the fetched volumes before the current candle. When there are
/// fewer than `window` of them, older points from the history `seed` (those
/// strictly before `first_open`) fill the gap.
pub fn baseline_volume(
    prior: &[f64],
    seed: &[VolumePoint],
    first_open: Option<chrono::DateTime<chrono::Utc>>,
    window: usize,
) -> Option<f64> {
    let window = window.max(1);
    let from_series = &prior[prior.len().saturating_sub(window)..];

    let missing = window - from_series.len();
    let older: Vec<f64> = match first_open {
        Some(first) if missing > 0 => {
            let eligible: Vec<f64> = seed
                .iter()
                .filter(|(t, _)| *t < first)
                .map(|(_, v)| *v)
                .collect();
            eligible[eligible.len().saturating_sub(missing)..].to_vec()
        }
        _ => Vec::new(),
    };

    let count = from_series.len() + older.len();
    if count == 0 {
        return None;
    }
    let total: f64 = from_series.iter().sum::<f64>() + older.iter().sum::<f64>();
    Some(total / count as f64)
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Output of the volume stage for one instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeAnalysis {
    pub profile: VolumeProfile,
    pub rvol_signal: bool,
}

/// Relative-volume detector and eligibility filter.
#[derive(Debug, Clone)]
pub struct VolumeAnomalyDetector {
    min_candles: usize,
    min_volume_usd: Decimal,
    rvol_threshold: f64,
    baseline_window: usize,
    quote_currencies: Vec<String>,
    stablecoins: Vec<String>,
    leveraged_suffixes: Vec<String>,
}

impl VolumeAnomalyDetector {
    pub fn new(config: &ScannerConfig) -> Self {
        let upper = |v: &[String]| v.iter().map(|s| s.to_uppercase()).collect::<Vec<_>>();
        Self {
            min_candles: config.min_candles_required,
            min_volume_usd: config.min_volume_usd,
            rvol_threshold: config.rvol_threshold,
            baseline_window: config.baseline_window(),
            quote_currencies: upper(&config.quote_currencies),
            stablecoins: upper(&config.stablecoins),
            leveraged_suffixes: upper(&config.leveraged_suffixes),
        }
    }

    pub fn baseline_window(&self) -> usize {
        self.baseline_window
    }

    // -- Universe filtering ----------------------------------------------

    /// Whether an instrument is quoted in one of the accepted quote assets.
    pub fn in_universe(&self, instrument: &Instrument) -> bool {
        let quote = instrument.quote_asset.to_uppercase();
        self.quote_currencies.iter().any(|q| *q == quote)
    }

    /// Explain why an instrument is not eligible, or `None` if it is.
    pub fn exclusion_reason(&self, instrument: &Instrument) -> Option<String> {
        let base = instrument.base_asset.to_uppercase();

        if instrument.delisted {
            return Some("delisted".to_string());
        }
        if self.stablecoins.iter().any(|s| *s == base) {
            return Some(format!("stablecoin base asset {base}"));
        }
        // Leveraged tokens are an underlying ticker (3+ chars) plus the suffix: BTCUP, ETHBEAR.
        if let Some(suffix) = self
            .leveraged_suffixes
            .iter()
            .find(|s| base.len() >= s.len() + 3 && base.ends_with(s.as_str()))
        {
            return Some(format!("leveraged token ({suffix})"));
        }
        if instrument.quote_volume_24h < self.min_volume_usd {
            return Some(format!(
                "24h volume {} below minimum {}",
                instrument.quote_volume_24h.round_dp(0),
                self.min_volume_usd
            ));
        }
        None
    }

    /// Split a universe into eligible instruments and `Filtered` skips.
    ///
    /// Instruments quoted in other currencies are outside the universe and
    /// dropped silently. Eligible instruments are returned sorted by 24h
    /// volume, highest first.
    pub fn filter_universe(&self, instruments: Vec<Instrument>) -> (Vec<Instrument>, Vec<SkippedInstrument>) {
        let mut eligible = Vec::new();
        let mut skipped = Vec::new();

        for inst in instruments.into_iter().filter(|i| self.in_universe(i)) {
            match self.exclusion_reason(&inst) {
                None => eligible.push(inst),
                Some(detail) => {
                    debug!(symbol = %inst.symbol, reason = %detail, "Instrument filtered");
                    skipped.push(SkippedInstrument::new(inst.symbol, SkipReason::Filtered, detail));
                }
            }
        }

        eligible.sort_by(|a, b| b.quote_volume_24h.cmp(&a.quote_volume_24h));

        info!(
            eligible = eligible.len(),
            filtered = skipped.len(),
            "Universe filtered"
        );

        (eligible, skipped)
    }

    // -- Relative volume -------------------------------------------------

    /// Compute the volume profile for one candle series.
    ///
    /// Rejects series shorter than the configured minimum with an
    /// `InsufficientHistory` skip. The current volume is the latest candle;
    /// the baseline is the mean of the window before it.
    pub fn analyze(&self, series: &CandleSeries, seed: &[VolumePoint]) -> Result<VolumeAnalysis, SkippedInstrument> {
        if series.len() < self.min_candles {
            return Err(SkippedInstrument::new(
                series.symbol.clone(),
                SkipReason::InsufficientHistory,
                format!("{} candles, need {}", series.len(), self.min_candles),
            ));
        }

        let volumes = series.volumes();
        let (current, prior) = match volumes.split_last() {
            Some((current, prior)) => (*current, prior),
            None => {
                return Err(SkippedInstrument::new(
                    series.symbol.clone(),
                    SkipReason::InsufficientHistory,
                    "empty candle series",
                ))
            }
        };

        let first_open = series.candles.first().map(|c| c.open_time);
        let baseline = baseline_volume(prior, seed, first_open, self.baseline_window);
        let rvol = compute_rvol(current, baseline);
        let rvol_signal = rvol.map_or(false, |r| r > self.rvol_threshold);

        if rvol_signal {
            info!(
                symbol = %series.symbol,
                rvol = format!("{:.2}x", rvol.unwrap_or_default()),
                current_volume = current,
                "Unusual volume detected"
            );
        }

        Ok(VolumeAnalysis {
            profile: VolumeProfile {
                current_volume: current,
                baseline_volume: baseline,
                rvol,
            },
            rvol_signal,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Shared types for the FLOWSCAN scanner.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that feed, engine, strategy,
//! and delivery modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Instrument
// ---------------------------------------------------------------------------

/// An exchange-listed instrument (spot pair).
///
/// Immutable for the duration of a cycle; the universe is refreshed at
/// start-up and every few cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Exchange symbol, e.g. "BTCUSDT".
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Rolling 24-hour volume denominated in the quote asset.
    pub quote_volume_24h: Decimal,
    /// Last traded price reported by the 24h ticker.
    pub last_price: f64,
    /// True when the exchange no longer lists the pair for trading.
    pub delisted: bool,
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (24h vol: {:.0} {})",
            self.base_asset, self.quote_asset, self.quote_volume_24h, self.quote_asset
        )
    }
}

impl Instrument {
    /// Helper to build a test instrument with sensible defaults.
    #[cfg(test)]
    pub fn sample(base: &str) -> Self {
        Instrument {
            symbol: format!("{base}USDT"),
            base_asset: base.to_string(),
            quote_asset: "USDT".to_string(),
            quote_volume_24h: Decimal::from(5_000_000),
            last_price: 1.0,
            delisted: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Base-asset volume traded during the candle.
    pub volume: f64,
}

/// Ordered candles for one instrument at a single interval, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    pub symbol: String,
    pub interval: String,
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Check ordering and value sanity. Timestamps must be strictly increasing.
    pub fn validate(&self) -> Result<(), DataError> {
        for pair in self.candles.windows(2) {
            if pair[1].open_time <= pair[0].open_time {
                return Err(DataError::NonMonotonicTimestamps {
                    at: pair[1].open_time,
                });
            }
        }
        for c in &self.candles {
            for (field, value) in [
                ("open", c.open),
                ("high", c.high),
                ("low", c.low),
                ("close", c.close),
                ("volume", c.volume),
            ] {
                if !value.is_finite() {
                    return Err(DataError::NonFinite { field });
                }
                if value < 0.0 {
                    return Err(DataError::NegativeValue { field, value });
                }
            }
        }
        Ok(())
    }
}

/// Aggressor side of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A single executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
    pub side: TradeSide,
}

/// Executed trades for one instrument, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeTape {
    pub trades: Vec<Trade>,
}

impl TradeTape {
    pub fn new(trades: Vec<Trade>) -> Self {
        Self { trades }
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Total aggressor volume per side: `(buy, sell)`.
    pub fn volume_split(&self) -> (f64, f64) {
        self.trades.iter().fold((0.0, 0.0), |(buy, sell), t| match t.side {
            TradeSide::Buy => (buy + t.size, sell),
            TradeSide::Sell => (buy, sell + t.size),
        })
    }

    /// Trades may share a timestamp but must never go backwards.
    pub fn validate(&self) -> Result<(), DataError> {
        for pair in self.trades.windows(2) {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(DataError::NonMonotonicTimestamps {
                    at: pair[1].timestamp,
                });
            }
        }
        for t in &self.trades {
            if !t.price.is_finite() {
                return Err(DataError::NonFinite { field: "price" });
            }
            if !t.size.is_finite() {
                return Err(DataError::NonFinite { field: "size" });
            }
            if t.size < 0.0 {
                return Err(DataError::NegativeValue { field: "size", value: t.size });
            }
            if t.price <= 0.0 {
                return Err(DataError::NegativeValue { field: "price", value: t.price });
            }
        }
        Ok(())
    }
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Point-in-time order book. Bids best-first (descending), asks best-first (ascending).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    pub fn total_bid_size(&self) -> f64 {
        self.bids.iter().map(|l| l.size).sum()
    }

    pub fn total_ask_size(&self) -> f64 {
        self.asks.iter().map(|l| l.size).sum()
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn validate(&self) -> Result<(), DataError> {
        for level in self.bids.iter().chain(self.asks.iter()) {
            if !level.price.is_finite() || !level.size.is_finite() {
                return Err(DataError::NonFinite { field: "level" });
            }
            if level.size < 0.0 {
                return Err(DataError::NegativeValue { field: "size", value: level.size });
            }
            if level.price <= 0.0 {
                return Err(DataError::NegativeValue { field: "price", value: level.price });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

/// Relative-volume measurement for one instrument in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeProfile {
    pub current_volume: f64,
    /// Mean volume over the reference window; `None` when no history exists.
    pub baseline_volume: Option<f64>,
    /// `current / baseline`; `None` when the baseline is missing or zero.
    pub rvol: Option<f64>,
}

/// Cumulative volume delta over equal time buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvdSeries {
    /// Running sum of (buy − sell) volume, one entry per bucket.
    pub cvd: Vec<f64>,
    /// Last traded price in each bucket (carried forward through empty buckets).
    pub prices: Vec<f64>,
}

impl CvdSeries {
    pub fn len(&self) -> usize {
        self.cvd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cvd.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.cvd.last().copied()
    }
}

/// Side of the book an iceberg candidate sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    Bid,
    Ask,
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookSide::Bid => write!(f, "BID"),
            BookSide::Ask => write!(f, "ASK"),
        }
    }
}

/// A book level whose displayed size is a statistical outlier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IcebergLevel {
    pub side: BookSide,
    pub price: f64,
    pub size: f64,
    /// Size relative to the mean level size on that side.
    pub ratio_vs_mean: f64,
}

/// Order-book pressure label derived from the near-mid imbalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pressure {
    StrongBuy,
    ModerateBuy,
    Neutral,
    ModerateSell,
    StrongSell,
}

impl fmt::Display for Pressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pressure::StrongBuy => write!(f, "Strong buy"),
            Pressure::ModerateBuy => write!(f, "Moderate buy"),
            Pressure::Neutral => write!(f, "Neutral"),
            Pressure::ModerateSell => write!(f, "Moderate sell"),
            Pressure::StrongSell => write!(f, "Strong sell"),
        }
    }
}

/// A single level holding a large share of its side's near-mid volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub side: BookSide,
    pub price: f64,
    pub size: f64,
    /// Share of the side's volume, in percent.
    pub volume_pct: f64,
}

/// Contextual order-book reading. Reported alongside a signal, never scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookContext {
    pub mid_price: f64,
    pub spread_pct: f64,
    /// Imbalance within the depth band around mid, in percent (−100..=100).
    pub depth_imbalance_pct: f64,
    pub pressure: Pressure,
    pub bid_wall: Option<Wall>,
    pub ask_wall: Option<Wall>,
}

/// All indicator outputs for one instrument in one cycle.
///
/// The first four boolean/count fields feed the scorer; everything else is
/// context for the trader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub rvol: Option<f64>,
    pub rvol_signal: bool,
    pub cvd_divergence: bool,
    pub bb_squeeze: bool,
    pub iceberg_count: usize,
    /// Total bid size / total ask size of the snapshot.
    pub buy_sell_ratio: Option<f64>,
    /// (bid − ask) / (bid + ask) of the snapshot, in −1..=1.
    pub imbalance: Option<f64>,
    /// Aggressor buy volume / aggressor sell volume from the trade tape.
    pub taker_buy_ratio: Option<f64>,
    pub cvd_last: Option<f64>,
    pub rsi: Option<f64>,
    pub volume_zscore: Option<f64>,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Confidence band of a scored instrument. Ordered from least to most confident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Classification {
    Noise,
    Accumulation,
    Watch,
    Sniper,
}

impl Classification {
    /// Suggested follow-up for a trader.
    pub fn action(&self) -> &'static str {
        match self {
            Classification::Sniper => "Immediate entry candidate; tight stop loss",
            Classification::Watch => "Prepare entry; wait for 15m chart confirmation",
            Classification::Accumulation => "Accumulate gradually over the next 24-48h",
            Classification::Noise => "No action; keep monitoring",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Sniper => write!(f, "Sniper"),
            Classification::Watch => write!(f, "Watch"),
            Classification::Accumulation => write!(f, "Accumulation"),
            Classification::Noise => write!(f, "Noise"),
        }
    }
}

/// Parse a classification name (case-insensitive).
impl std::str::FromStr for Classification {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sniper" => Ok(Classification::Sniper),
            "watch" => Ok(Classification::Watch),
            "accumulation" | "accum" => Ok(Classification::Accumulation),
            "noise" => Ok(Classification::Noise),
            other => anyhow::bail!("Unknown classification: {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Scored evaluation of one instrument in one cycle. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub score: u8,
    pub active_indicators: u8,
    pub classification: Classification,
    pub indicators: IndicatorSet,
    pub book: Option<BookContext>,
    /// Last close at evaluation time.
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn rvol(&self) -> Option<f64> {
        self.indicators.rvol
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rvol = self
            .indicators
            .rvol
            .map(|r| format!("{r:.2}x"))
            .unwrap_or_else(|| "n/a".to_string());
        write!(
            f,
            "{} [{}] score={}/100 price={:.6} rvol={} cvd_div={} squeeze={} icebergs={}",
            self.symbol,
            self.classification,
            self.score,
            self.price,
            rvol,
            self.indicators.cvd_divergence,
            self.indicators.bb_squeeze,
            self.indicators.iceberg_count,
        )
    }
}

// ---------------------------------------------------------------------------
// Skips
// ---------------------------------------------------------------------------

/// Why an instrument produced no signal this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SkipReason {
    InsufficientHistory,
    Filtered,
    FetchFailed,
    Malformed,
    Timeout,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientHistory => write!(f, "InsufficientHistory"),
            SkipReason::Filtered => write!(f, "Filtered"),
            SkipReason::FetchFailed => write!(f, "FetchFailed"),
            SkipReason::Malformed => write!(f, "Malformed"),
            SkipReason::Timeout => write!(f, "Timeout"),
        }
    }
}

/// A per-instrument skip entry with a diagnostic detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedInstrument {
    pub symbol: String,
    pub reason: SkipReason,
    pub detail: String,
}

impl SkippedInstrument {
    pub fn new(symbol: impl Into<String>, reason: SkipReason, detail: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            reason,
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scan result
// ---------------------------------------------------------------------------

/// Overall health of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    Complete,
    /// The feed was unavailable; the result carries no evaluations.
    Degraded { reason: String },
}

impl CycleStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, CycleStatus::Degraded { .. })
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleStatus::Complete => write!(f, "COMPLETE"),
            CycleStatus::Degraded { reason } => write!(f, "DEGRADED ({reason})"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationCounts {
    pub sniper: usize,
    pub watch: usize,
    pub accumulation: usize,
    pub noise: usize,
}

impl ClassificationCounts {
    pub fn record(&mut self, class: Classification) {
        match class {
            Classification::Sniper => self.sniper += 1,
            Classification::Watch => self.watch += 1,
            Classification::Accumulation => self.accumulation += 1,
            Classification::Noise => self.noise += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub insufficient_history: usize,
    pub filtered: usize,
    pub fetch_failed: usize,
    pub malformed: usize,
    pub timeout: usize,
}

impl SkipCounts {
    pub fn record(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::InsufficientHistory => self.insufficient_history += 1,
            SkipReason::Filtered => self.filtered += 1,
            SkipReason::FetchFailed => self.fetch_failed += 1,
            SkipReason::Malformed => self.malformed += 1,
            SkipReason::Timeout => self.timeout += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.insufficient_history + self.filtered + self.fetch_failed + self.malformed + self.timeout
    }
}

/// Summary statistics for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Instruments in the universe this cycle.
    pub total_scanned: usize,
    /// Instruments that passed the universe filters.
    pub total_eligible: usize,
    pub signals: usize,
    pub by_classification: ClassificationCounts,
    pub skipped: SkipCounts,
}

/// The complete, immutable output of one scan cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub cycle_id: Uuid,
    pub cycle_number: u64,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: CycleStatus,
    /// Sorted by score descending, then RVol descending.
    pub signals: Vec<Signal>,
    /// Sorted by symbol.
    pub skipped: Vec<SkippedInstrument>,
    pub summary: ScanSummary,
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.summary.by_classification;
        write!(
            f,
            "Cycle #{} [{}]: scanned={} eligible={} signals={} (sniper={} watch={} accum={} noise={}) skipped={}",
            self.cycle_number,
            self.status,
            self.summary.total_scanned,
            self.summary.total_eligible,
            self.summary.signals,
            c.sniper,
            c.watch,
            c.accumulation,
            c.noise,
            self.summary.skipped.total(),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures reported by the market-data feed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Rate limited by feed: {0}")]
    RateLimited(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to decode feed response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::RateLimited(_) | FetchError::Network(_))
    }
}

/// Malformed or inconsistent market data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("Timestamps not increasing at {at}")]
    NonMonotonicTimestamps { at: DateTime<Utc> },

    #[error("Negative {field}: {value}")]
    NegativeValue { field: &'static str, value: f64 },

    #[error("Non-finite {field}")]
    NonFinite { field: &'static str },
}

/// Precondition failures of the indicator primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndicatorError {
    #[error("Insufficient data: need {needed} points, have {available}")]
    InsufficientData { needed: usize, available: usize },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

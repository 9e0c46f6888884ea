//! Mock market-data feed for integration testing.
//!
//! Provides a deterministic `MarketDataFeed` that serves a fixed universe,
//! synthetic candles with a configurable spike on the last candle, an
//! absorbing order book and tape. Failures, delays and connectivity loss
//! are controllable per symbol from test code.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use flowscan::feed::MarketDataFeed;
use flowscan::types::*;

pub const BASELINE_VOLUME: f64 = 10_000.0;

/// An in-memory feed with scripted behaviour.
pub struct MockFeed {
    instruments: Vec<Instrument>,
    /// Volume of the most recent candle, per symbol. Others get the baseline.
    spikes: HashMap<String, f64>,
    candle_count: usize,
    failing: Mutex<HashSet<String>>,
    delays: HashMap<String, std::time::Duration>,
    offline: AtomicBool,
    candle_requests: AtomicUsize,
}

impl MockFeed {
    pub fn new(instruments: Vec<Instrument>) -> Self {
        Self {
            instruments,
            spikes: HashMap::new(),
            candle_count: 120,
            failing: Mutex::new(HashSet::new()),
            delays: HashMap::new(),
            offline: AtomicBool::new(false),
            candle_requests: AtomicUsize::new(0),
        }
    }

    pub fn with_spike(mut self, symbol: &str, last_volume: f64) -> Self {
        self.spikes.insert(symbol.to_string(), last_volume);
        self
    }

    pub fn with_candle_count(mut self, count: usize) -> Self {
        self.candle_count = count;
        self
    }

    pub fn with_delay(mut self, symbol: &str, delay: std::time::Duration) -> Self {
        self.delays.insert(symbol.to_string(), delay);
        self
    }

    /// Every request for `symbol` fails with a network error.
    pub fn fail_symbol(&self, symbol: &str) {
        self.failing.lock().unwrap().insert(symbol.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn candle_requests(&self) -> usize {
        self.candle_requests.load(Ordering::SeqCst)
    }

    fn check(&self, symbol: &str) -> Result<(), FetchError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Network("connection refused".into()));
        }
        if self.failing.lock().unwrap().contains(symbol) {
            return Err(FetchError::Network(format!("{symbol}: connection reset")));
        }
        Ok(())
    }

    async fn maybe_delay(&self, symbol: &str) {
        if let Some(delay) = self.delays.get(symbol) {
            tokio::time::sleep(*delay).await;
        }
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub fn instrument(base: &str, quote: &str, volume_24h: i64) -> Instrument {
    Instrument {
        symbol: format!("{base}{quote}"),
        base_asset: base.to_string(),
        quote_asset: quote.to_string(),
        quote_volume_24h: Decimal::from(volume_24h),
        last_price: 100.0,
        delisted: false,
    }
}

fn candles(symbol: &str, count: usize, last_volume: f64) -> CandleSeries {
    let candles = (0..count)
        .map(|i| {
            let last = i + 1 == count;
            Candle {
                open_time: t0() + Duration::minutes(i as i64),
                open: 100.0,
                high: 100.2,
                low: 99.8,
                close: if last { 100.1 } else { 100.0 },
                volume: if last { last_volume } else { BASELINE_VOLUME },
            }
        })
        .collect();
    CandleSeries { symbol: symbol.to_string(), interval: "1m".into(), candles }
}

/// Falling price on steady aggressive buying, which reads as absorption.
fn absorbing_tape() -> TradeTape {
    TradeTape::new(
        (0..40)
            .map(|i| Trade {
                timestamp: t0() + Duration::seconds(i),
                price: 100.0 - i as f64 * 0.1,
                size: 1.0,
                side: TradeSide::Buy,
            })
            .collect(),
    )
}

/// Flat book with one oversized resting bid.
fn book_with_iceberg() -> OrderBookSnapshot {
    let mut bids: Vec<BookLevel> = (0..20)
        .map(|i| BookLevel { price: 99.9 - i as f64 * 0.01, size: 10.0 })
        .collect();
    bids[5].size = 200.0;
    let asks = (0..20)
        .map(|i| BookLevel { price: 100.1 + i as f64 * 0.01, size: 10.0 })
        .collect();
    OrderBookSnapshot { bids, asks, timestamp: t0() }
}

#[async_trait]
impl MarketDataFeed for MockFeed {
    async fn ping(&self) -> Result<(), FetchError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Network("connection refused".into()));
        }
        Ok(())
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, FetchError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Network("connection refused".into()));
        }
        Ok(self.instruments.clone())
    }

    async fn fetch_candles(
        &self,
        instrument: &Instrument,
        _interval: &str,
        _count: usize,
    ) -> Result<CandleSeries, FetchError> {
        self.candle_requests.fetch_add(1, Ordering::SeqCst);
        self.check(&instrument.symbol)?;
        self.maybe_delay(&instrument.symbol).await;
        let last = self.spikes.get(&instrument.symbol).copied().unwrap_or(BASELINE_VOLUME);
        Ok(candles(&instrument.symbol, self.candle_count, last))
    }

    async fn fetch_order_book(&self, instrument: &Instrument, _depth: usize) -> Result<OrderBookSnapshot, FetchError> {
        self.check(&instrument.symbol)?;
        Ok(book_with_iceberg())
    }

    async fn fetch_trades(
        &self,
        instrument: &Instrument,
        _since: Option<DateTime<Utc>>,
        _limit: usize,
    ) -> Result<TradeTape, FetchError> {
        self.check(&instrument.symbol)?;
        Ok(absorbing_tape())
    }
}

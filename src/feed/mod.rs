//! Market-data feed.
//!
//! Defines the `MarketDataFeed` capability the scan cycle fetches through,
//! and the Binance spot REST implementation.

pub mod binance;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{CandleSeries, FetchError, Instrument, OrderBookSnapshot, TradeTape};

pub use binance::{BinanceClient, ConnectionState};

/// Abstraction over an exchange's public market data.
///
/// Implementors own retries, backoff and rate limiting; an `Err` returned
/// here means retries are already exhausted for this request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Cheap connectivity check. Failure marks the whole cycle degraded.
    async fn ping(&self) -> Result<(), FetchError>;

    /// Every listed instrument with its 24h quote volume, unfiltered.
    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, FetchError>;

    /// The most recent `count` candles at `interval`, oldest first.
    async fn fetch_candles(
        &self,
        instrument: &Instrument,
        interval: &str,
        count: usize,
    ) -> Result<CandleSeries, FetchError>;

    async fn fetch_order_book(
        &self,
        instrument: &Instrument,
        depth: usize,
    ) -> Result<OrderBookSnapshot, FetchError>;

    /// Executed trades since `since` (or the most recent `limit` when `None`).
    async fn fetch_trades(
        &self,
        instrument: &Instrument,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<TradeTape, FetchError>;
}

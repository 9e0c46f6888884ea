//! Binance spot REST integration.
//!
//! Public market-data endpoints only (no order placement):
//! - `/api/v3/ping`          connectivity check
//! - `/api/v3/exchangeInfo`  listed symbols and trading status
//! - `/api/v3/ticker/24hr`   24h quote volume and last price
//! - `/api/v3/klines`        candles
//! - `/api/v3/depth`         order-book snapshot
//! - `/api/v3/aggTrades`     aggregated trade tape
//!
//! All requests share one `governor` rate limiter, so the request budget
//! holds no matter how many instrument tasks run at once. Transient
//! failures (429/418, 5xx, transport errors) are retried with exponential
//! backoff and drive an explicit connection-state machine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::MarketDataFeed;
use crate::config::{AppConfig, FeedConfig};
use crate::types::{
    BookLevel, Candle, CandleSeries, FetchError, Instrument, OrderBookSnapshot, Trade, TradeSide,
    TradeTape,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const PING_PATH: &str = "/api/v3/ping";
const EXCHANGE_INFO_PATH: &str = "/api/v3/exchangeInfo";
const TICKER_24H_PATH: &str = "/api/v3/ticker/24hr";
const KLINES_PATH: &str = "/api/v3/klines";
const DEPTH_PATH: &str = "/api/v3/depth";
const AGG_TRADES_PATH: &str = "/api/v3/aggTrades";

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Per-request row caps imposed by the exchange.
const MAX_KLINES_LIMIT: usize = 1000;
const MAX_TRADES_LIMIT: usize = 1000;

/// Book depths the depth endpoint accepts.
const DEPTH_LIMITS: [usize; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

/// Binance error code for an unknown symbol (sent with HTTP 400).
const INVALID_SYMBOL_CODE: i64 = -1121;

const TRADING_STATUS: &str = "TRADING";

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Health of the link to the exchange, as seen by the last requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Retrying after a transient failure.
    Reconnecting { attempt: u32 },
    /// Retries exhausted. The next request starts over from `Connecting`.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    RequestStarted,
    /// The exchange answered, successfully or with a non-retryable error.
    Responded,
    TransientFailure { attempt: u32 },
    RetriesExhausted,
}

impl ConnectionState {
    pub fn next(self, event: ConnectionEvent) -> ConnectionState {
        match (self, event) {
            (ConnectionState::Disconnected | ConnectionState::Failed, ConnectionEvent::RequestStarted) => {
                ConnectionState::Connecting
            }
            (state, ConnectionEvent::RequestStarted) => state,
            (_, ConnectionEvent::Responded) => ConnectionState::Connected,
            (_, ConnectionEvent::TransientFailure { attempt }) => ConnectionState::Reconnecting { attempt },
            (_, ConnectionEvent::RetriesExhausted) => ConnectionState::Failed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    #[serde(default)]
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    status: String,
    base_asset: String,
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    #[serde(default)]
    last_price: Option<String>,
    #[serde(default)]
    quote_volume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct AggTrade {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    time_ms: i64,
    /// Buyer was the maker, i.e. the aggressor sold.
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn decode<T: serde::de::DeserializeOwned>(body: &str, what: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Decode(format!("{what}: {e}")))
}

fn parse_number(raw: &str, field: &str) -> Result<f64, FetchError> {
    raw.parse::<f64>()
        .map_err(|_| FetchError::Decode(format!("{field} is not a number: {raw:?}")))
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, FetchError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| FetchError::Decode(format!("timestamp out of range: {ms}")))
}

/// Join exchange info with 24h tickers into instruments.
///
/// Symbols without a ticker get zero volume, which the universe filter
/// rejects downstream.
pub fn parse_instruments(exchange_info: &str, tickers: &str) -> Result<Vec<Instrument>, FetchError> {
    let info: ExchangeInfo = decode(exchange_info, "exchangeInfo")?;
    let tickers: Vec<Ticker24h> = decode(tickers, "ticker/24hr")?;
    let by_symbol: HashMap<&str, &Ticker24h> = tickers.iter().map(|t| (t.symbol.as_str(), t)).collect();

    let instruments = info
        .symbols
        .into_iter()
        .map(|s| {
            let ticker = by_symbol.get(s.symbol.as_str());
            let quote_volume_24h = ticker
                .and_then(|t| t.quote_volume.as_deref())
                .and_then(|v| Decimal::from_str(v).ok())
                .unwrap_or(Decimal::ZERO);
            let last_price = ticker
                .and_then(|t| t.last_price.as_deref())
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0);
            Instrument {
                delisted: s.status != TRADING_STATUS,
                symbol: s.symbol,
                base_asset: s.base_asset,
                quote_asset: s.quote_asset,
                quote_volume_24h,
                last_price,
            }
        })
        .collect();
    Ok(instruments)
}

fn kline_field(row: &[serde_json::Value], idx: usize, name: &str) -> Result<f64, FetchError> {
    match row.get(idx) {
        Some(serde_json::Value::String(s)) => parse_number(s, name),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| FetchError::Decode(format!("{name} out of range"))),
        _ => Err(FetchError::Decode(format!("kline missing {name}"))),
    }
}

/// Klines rows: `[openTime, open, high, low, close, volume, closeTime, ...]`
/// with prices and volumes as strings.
pub fn parse_klines(symbol: &str, interval: &str, body: &str) -> Result<CandleSeries, FetchError> {
    let rows: Vec<Vec<serde_json::Value>> = decode(body, "klines")?;

    let candles = rows
        .iter()
        .map(|row| {
            let open_ms = row
                .first()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| FetchError::Decode("kline missing open time".into()))?;
            Ok(Candle {
                open_time: millis_to_utc(open_ms)?,
                open: kline_field(row, 1, "open")?,
                high: kline_field(row, 2, "high")?,
                low: kline_field(row, 3, "low")?,
                close: kline_field(row, 4, "close")?,
                volume: kline_field(row, 5, "volume")?,
            })
        })
        .collect::<Result<Vec<_>, FetchError>>()?;

    Ok(CandleSeries {
        symbol: symbol.to_string(),
        interval: interval.to_string(),
        candles,
    })
}

/// Depth snapshot, truncated to `depth` levels per side.
pub fn parse_depth(body: &str, depth: usize, timestamp: DateTime<Utc>) -> Result<OrderBookSnapshot, FetchError> {
    let raw: DepthResponse = decode(body, "depth")?;
    Ok(OrderBookSnapshot {
        bids: parse_levels(&raw.bids, depth)?,
        asks: parse_levels(&raw.asks, depth)?,
        timestamp,
    })
}

fn parse_levels(side: &[[String; 2]], depth: usize) -> Result<Vec<BookLevel>, FetchError> {
    side.iter()
        .take(depth)
        .map(|[price, size]| {
            Ok(BookLevel {
                price: parse_number(price, "price")?,
                size: parse_number(size, "size")?,
            })
        })
        .collect()
}

pub fn parse_agg_trades(body: &str) -> Result<TradeTape, FetchError> {
    let raw: Vec<AggTrade> = decode(body, "aggTrades")?;
    let trades = raw
        .iter()
        .map(|t| {
            Ok(Trade {
                timestamp: millis_to_utc(t.time_ms)?,
                price: parse_number(&t.price, "price")?,
                size: parse_number(&t.quantity, "quantity")?,
                side: if t.buyer_is_maker { TradeSide::Sell } else { TradeSide::Buy },
            })
        })
        .collect::<Result<Vec<_>, FetchError>>()?;
    Ok(TradeTape::new(trades))
}

/// Map a non-success HTTP response to a fetch error.
pub fn classify_status(status: u16, body: &str) -> FetchError {
    let detail = serde_json::from_str::<ApiError>(body)
        .map(|e| (e.code, e.msg))
        .unwrap_or((0, body.chars().take(200).collect()));

    match status {
        429 | 418 => FetchError::RateLimited(format!("HTTP {status}: {}", detail.1)),
        404 => FetchError::NotFound(detail.1),
        400 if detail.0 == INVALID_SYMBOL_CODE => FetchError::NotFound(detail.1),
        s if s >= 500 => FetchError::Network(format!("HTTP {status}: {}", detail.1)),
        _ => FetchError::Decode(format!("HTTP {status} (code {}): {}", detail.0, detail.1)),
    }
}

/// Smallest accepted depth-endpoint limit covering `depth`.
pub fn depth_limit(depth: usize) -> usize {
    DEPTH_LIMITS
        .iter()
        .copied()
        .find(|&l| l >= depth)
        .unwrap_or(DEPTH_LIMITS[DEPTH_LIMITS.len() - 1])
}

/// `base · 2^(attempt − 1)` for attempt ≥ 1.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct BinanceClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    rate_limiter: Arc<DirectLimiter>,
    max_retries: u32,
    base_backoff_ms: u64,
    state: watch::Sender<ConnectionState>,
}

impl fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl BinanceClient {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build Binance HTTP client")?;

        let rps = NonZeroU32::new(config.requests_per_second)
            .context("feed.requests_per_second must be > 0")?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));

        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|name| AppConfig::resolve_env(name).ok())
            .map(SecretString::new);
        if api_key.is_some() {
            debug!("Binance API key loaded; sending authenticated market-data requests");
        }

        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            rate_limiter,
            max_retries: config.max_retries,
            base_backoff_ms: config.base_backoff_ms,
            state,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection-state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn transition(&self, event: ConnectionEvent) {
        let current = self.state();
        let next = current.next(event);
        if next != current {
            debug!(from = %current, to = %next, "Feed connection state");
            self.state.send_replace(next);
        }
    }

    /// GET with rate limiting, retry and backoff. Returns the response body.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        self.transition(ConnectionEvent::RequestStarted);

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.base_backoff_ms, attempt);
                self.transition(ConnectionEvent::TransientFailure { attempt });
                debug!(path, attempt, delay_ms = delay.as_millis() as u64, "Retrying Binance request");
                tokio::time::sleep(delay).await;
            }

            self.rate_limiter.until_ready().await;

            let mut request = self.http.get(&url).query(query);
            if let Some(key) = &self.api_key {
                request = request.header(API_KEY_HEADER, key.expose_secret().as_str());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = match response.text().await {
                        Ok(body) => body,
                        Err(e) => {
                            warn!(path, attempt, error = %e, "Failed to read Binance response body");
                            last_error = Some(FetchError::Network(e.to_string()));
                            continue;
                        }
                    };

                    if status.is_success() {
                        self.transition(ConnectionEvent::Responded);
                        return Ok(body);
                    }

                    let err = classify_status(status.as_u16(), &body);
                    if err.is_transient() {
                        warn!(path, status = %status, attempt, error = %err, "Retryable Binance API error");
                        last_error = Some(err);
                        continue;
                    }

                    self.transition(ConnectionEvent::Responded);
                    return Err(err);
                }
                Err(e) => {
                    warn!(path, attempt, error = %e, "Binance request failed");
                    last_error = Some(FetchError::Network(e.to_string()));
                }
            }
        }

        self.transition(ConnectionEvent::RetriesExhausted);
        Err(last_error.unwrap_or_else(|| FetchError::Network("retries exhausted".into())))
    }
}

// ---------------------------------------------------------------------------
// MarketDataFeed trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketDataFeed for BinanceClient {
    async fn ping(&self) -> Result<(), FetchError> {
        self.get(PING_PATH, &[]).await.map(|_| ())
    }

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>, FetchError> {
        let info = self.get(EXCHANGE_INFO_PATH, &[]).await?;
        let tickers = self.get(TICKER_24H_PATH, &[]).await?;
        let instruments = parse_instruments(&info, &tickers)?;
        info!(count = instruments.len(), "Fetched Binance instruments");
        Ok(instruments)
    }

    async fn fetch_candles(
        &self,
        instrument: &Instrument,
        interval: &str,
        count: usize,
    ) -> Result<CandleSeries, FetchError> {
        let limit = count.clamp(1, MAX_KLINES_LIMIT);
        let body = self
            .get(
                KLINES_PATH,
                &[
                    ("symbol", instrument.symbol.clone()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        parse_klines(&instrument.symbol, interval, &body)
    }

    async fn fetch_order_book(
        &self,
        instrument: &Instrument,
        depth: usize,
    ) -> Result<OrderBookSnapshot, FetchError> {
        let body = self
            .get(
                DEPTH_PATH,
                &[
                    ("symbol", instrument.symbol.clone()),
                    ("limit", depth_limit(depth).to_string()),
                ],
            )
            .await?;
        parse_depth(&body, depth, Utc::now())
    }

    async fn fetch_trades(
        &self,
        instrument: &Instrument,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<TradeTape, FetchError> {
        let mut query = vec![
            ("symbol", instrument.symbol.clone()),
            ("limit", limit.clamp(1, MAX_TRADES_LIMIT).to_string()),
        ];
        if let Some(since) = since {
            query.push(("startTime", since.timestamp_millis().to_string()));
        }
        let body = self.get(AGG_TRADES_PATH, &query).await?;
        parse_agg_trades(&body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

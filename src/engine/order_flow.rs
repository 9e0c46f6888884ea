//! Order flow analysis.
//!
//! Works on the trade tape and a single order-book snapshot:
//! 1. Cumulative volume delta (CVD) over N equal time buckets
//! 2. Bullish divergence: price lower than N buckets ago while CVD is higher
//!    (passive absorption of aggressive selling)
//! 3. Iceberg candidates: book levels more than 3σ above the mean level size
//! 4. Book imbalance and taker buy/sell split (reported, not scored)
//!
//! Only the bullish case is looked for. The scanner hunts accumulation, not
//! distribution.

use tracing::{debug, info};

use crate::indicators;
use crate::types::{BookLevel, BookSide, CvdSeries, IcebergLevel, OrderBookSnapshot, TradeSide, TradeTape};

/// Standard deviations above the mean level size that mark an iceberg.
pub const ICEBERG_SIGMA: f64 = 3.0;

// ---------------------------------------------------------------------------
// CVD
// ---------------------------------------------------------------------------

/// Bucket a trade tape into `buckets` equal time slices and accumulate delta.
///
/// Returns `None` when the tape cannot fill the buckets: fewer trades than
/// buckets, or all trades at the same instant.
pub fn bucket_cvd(tape: &TradeTape, buckets: usize) -> Option<CvdSeries> {
    if buckets == 0 || tape.len() < buckets {
        return None;
    }
    let start = tape.trades.first()?.timestamp;
    let end = tape.trades.last()?.timestamp;
    let span_ms = (end - start).num_milliseconds();
    if span_ms <= 0 {
        return None;
    }

    let mut deltas = vec![0.0; buckets];
    let mut last_price: Vec<Option<f64>> = vec![None; buckets];

    for trade in &tape.trades {
        let offset = (trade.timestamp - start).num_milliseconds().max(0) as i128;
        let idx = ((offset * buckets as i128) / span_ms as i128) as usize;
        let idx = idx.min(buckets - 1);
        deltas[idx] += match trade.side {
            TradeSide::Buy => trade.size,
            TradeSide::Sell => -trade.size,
        };
        last_price[idx] = Some(trade.price);
    }

    let mut cvd = Vec::with_capacity(buckets);
    let mut prices = Vec::with_capacity(buckets);
    let mut running = 0.0;
    let mut carried = tape.trades[0].price;
    for (delta, price) in deltas.iter().zip(last_price) {
        running += delta;
        carried = price.unwrap_or(carried);
        cvd.push(running);
        prices.push(carried);
    }

    Some(CvdSeries { cvd, prices })
}

/// Bullish divergence: `price_now < price_past` and `cvd_now > cvd_past`,
/// where "past" is `lookback` points before the end of the series
/// (the first point of a series exactly `lookback` long).
///
/// Series shorter than the lookback, or of different lengths, never diverge.
pub fn detect_bullish_divergence(prices: &[f64], cvd: &[f64], lookback: usize) -> bool {
    if lookback == 0 || prices.len() != cvd.len() || prices.len() < lookback {
        return false;
    }
    let now = prices.len() - 1;
    let past = prices.len() - lookback;
    prices[now] < prices[past] && cvd[now] > cvd[past]
}

// ---------------------------------------------------------------------------
// Icebergs
// ---------------------------------------------------------------------------

/// Whether a level size exceeds `mean + 3σ`. Zero dispersion flags nothing.
pub fn is_iceberg(size: f64, mean: f64, std: f64) -> bool {
    std > 0.0 && size > mean + ICEBERG_SIGMA * std
}

/// Outlier levels on one side of the book.
pub fn detect_icebergs(levels: &[BookLevel], side: BookSide) -> Vec<IcebergLevel> {
    let sizes: Vec<f64> = levels.iter().map(|l| l.size).collect();
    let Some((mean, std)) = indicators::mean_and_std(&sizes) else {
        return Vec::new();
    };

    levels
        .iter()
        .filter(|l| is_iceberg(l.size, mean, std))
        .map(|l| IcebergLevel {
            side,
            price: l.price,
            size: l.size,
            ratio_vs_mean: if mean > 0.0 { l.size / mean } else { 0.0 },
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Imbalance
// ---------------------------------------------------------------------------

/// Whole-snapshot bid/ask balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookImbalance {
    pub total_bid: f64,
    pub total_ask: f64,
    /// `bid / ask`; undefined for an empty ask side.
    pub buy_sell_ratio: Option<f64>,
    /// `(bid − ask) / (bid + ask)`; undefined for an empty book.
    pub imbalance: Option<f64>,
}

pub fn book_imbalance(book: &OrderBookSnapshot) -> BookImbalance {
    let total_bid = book.total_bid_size();
    let total_ask = book.total_ask_size();
    let total = total_bid + total_ask;
    BookImbalance {
        total_bid,
        total_ask,
        buy_sell_ratio: (total_ask > 0.0).then(|| total_bid / total_ask),
        imbalance: (total > 0.0).then(|| (total_bid - total_ask) / total),
    }
}

/// Aggressor buy volume over aggressor sell volume; undefined with no sells.
pub fn taker_buy_ratio(tape: &TradeTape) -> Option<f64> {
    let (buy, sell) = tape.volume_split();
    (sell > 0.0).then(|| buy / sell)
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Everything the order-flow stage learned about one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFlowReport {
    /// `None` when the tape had fewer than N buckets of data.
    pub cvd: Option<CvdSeries>,
    pub cvd_divergence: bool,
    pub icebergs: Vec<IcebergLevel>,
    pub imbalance: BookImbalance,
    pub taker_buy_ratio: Option<f64>,
}

impl OrderFlowReport {
    pub fn iceberg_count(&self) -> usize {
        self.icebergs.len()
    }
}

/// CVD / divergence / iceberg analyzer with a fixed lookback.
#[derive(Debug, Clone, Copy)]
pub struct OrderFlowAnalyzer {
    lookback: usize,
}

impl OrderFlowAnalyzer {
    pub fn new(lookback: usize) -> Self {
        Self { lookback }
    }

    pub fn analyze(&self, symbol: &str, tape: &TradeTape, book: &OrderBookSnapshot) -> OrderFlowReport {
        let cvd = bucket_cvd(tape, self.lookback);
        let cvd_divergence = match &cvd {
            Some(series) => detect_bullish_divergence(&series.prices, &series.cvd, self.lookback),
            None => {
                debug!(
                    symbol,
                    trades = tape.len(),
                    buckets = self.lookback,
                    "Not enough trade data for divergence check"
                );
                false
            }
        };

        let mut icebergs = detect_icebergs(&book.bids, BookSide::Bid);
        icebergs.extend(detect_icebergs(&book.asks, BookSide::Ask));

        let imbalance = book_imbalance(book);
        let taker_buy_ratio = taker_buy_ratio(tape);

        if cvd_divergence {
            info!(
                symbol,
                taker_buy_ratio = ?taker_buy_ratio.map(|r| format!("{r:.2}")),
                "Bullish CVD divergence"
            );
        }
        if !icebergs.is_empty() {
            debug!(symbol, count = icebergs.len(), "Possible iceberg levels");
        }

        OrderFlowReport {
            cvd,
            cvd_divergence,
            icebergs,
            imbalance,
            taker_buy_ratio,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Trade;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn trade(secs: i64, price: f64, size: f64, side: TradeSide) -> Trade {
        Trade {
            timestamp: t0() + Duration::seconds(secs),
            price,
            size,
            side,
        }
    }

    fn levels(sizes: &[f64], start_price: f64, step: f64) -> Vec<BookLevel> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, s)| BookLevel { price: start_price + step * i as f64, size: *s })
            .collect()
    }

    // -- Divergence ------------------------------------------------------

    #[test]
    fn test_divergence_price_down_cvd_up() {
        assert!(detect_bullish_divergence(&[100.0, 95.0, 90.0], &[10.0, 15.0, 20.0], 3));
    }

    #[test]
    fn test_no_divergence_when_price_rises() {
        assert!(!detect_bullish_divergence(&[100.0, 105.0, 110.0], &[10.0, 15.0, 20.0], 3));
    }

    #[test]
    fn test_bearish_divergence_not_reported() {
        assert!(!detect_bullish_divergence(&[100.0, 105.0, 110.0], &[20.0, 15.0, 10.0], 3));
    }

    #[test]
    fn test_divergence_short_series() {
        assert!(!detect_bullish_divergence(&[100.0, 90.0], &[10.0, 20.0], 3));
        assert!(!detect_bullish_divergence(&[100.0, 90.0, 80.0], &[10.0, 20.0], 3));
    }

    // -- CVD bucketing ---------------------------------------------------

    #[test]
    fn test_bucket_cvd_running_sum() {
        // Span 0..=30s over 3 buckets of 10s.
        let tape = TradeTape::new(vec![
            trade(0, 100.0, 10.0, TradeSide::Buy),
            trade(5, 99.0, 4.0, TradeSide::Sell),
            trade(12, 95.0, 5.0, TradeSide::Buy),
            trade(25, 91.0, 2.0, TradeSide::Sell),
            trade(30, 90.0, 7.0, TradeSide::Buy),
        ]);
        let series = bucket_cvd(&tape, 3).unwrap();
        assert_eq!(series.cvd, vec![6.0, 11.0, 16.0]);
        assert_eq!(series.prices, vec![99.0, 95.0, 90.0]);
        assert!(detect_bullish_divergence(&series.prices, &series.cvd, 3));
    }

    #[test]
    fn test_bucket_cvd_carries_price_through_gaps() {
        let tape = TradeTape::new(vec![
            trade(0, 50.0, 1.0, TradeSide::Buy),
            trade(1, 51.0, 1.0, TradeSide::Buy),
            trade(40, 49.0, 1.0, TradeSide::Sell),
        ]);
        let series = bucket_cvd(&tape, 3).unwrap();
        // Middle bucket is empty: delta 0, price carried from bucket 0.
        assert_eq!(series.cvd, vec![2.0, 2.0, 1.0]);
        assert_eq!(series.prices, vec![51.0, 51.0, 49.0]);
    }

    #[test]
    fn test_bucket_cvd_insufficient_data() {
        let tape = TradeTape::new(vec![trade(0, 1.0, 1.0, TradeSide::Buy), trade(5, 1.0, 1.0, TradeSide::Buy)]);
        assert!(bucket_cvd(&tape, 3).is_none());

        let same_instant = TradeTape::new(vec![trade(0, 1.0, 1.0, TradeSide::Buy); 5]);
        assert!(bucket_cvd(&same_instant, 3).is_none());
        assert!(bucket_cvd(&TradeTape::default(), 3).is_none());
    }

    // -- Icebergs --------------------------------------------------------

    #[test]
    fn test_iceberg_threshold() {
        // mean 50, σ 10 → threshold 80.
        assert!(is_iceberg(85.0, 50.0, 10.0));
        assert!(!is_iceberg(79.0, 50.0, 10.0));
        assert!(!is_iceberg(80.0, 50.0, 10.0));
    }

    #[test]
    fn test_iceberg_zero_dispersion() {
        assert!(!is_iceberg(10.0, 10.0, 0.0));
        assert!(detect_icebergs(&levels(&[5.0; 30], 100.0, -0.1), BookSide::Bid).is_empty());
    }

    #[test]
    fn test_detect_icebergs_outlier() {
        let mut sizes = vec![10.0; 20];
        sizes[7] = 100.0;
        let found = detect_icebergs(&levels(&sizes, 100.0, -0.1), BookSide::Bid);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].side, BookSide::Bid);
        assert_eq!(found[0].size, 100.0);
        assert!(found[0].ratio_vs_mean > 6.0);
    }

    #[test]
    fn test_detect_icebergs_on_book_with_mean_50_sigma_10() {
        let mut sizes = vec![85.0, 79.0];
        sizes.extend([42.0; 8]);
        sizes.extend([50.0; 10]);
        sizes.extend([49.0, 51.0, 49.0, 51.0, 47.0, 53.0]);
        let (mean, std) = indicators::mean_and_std(&sizes).unwrap();
        assert!((mean - 50.0).abs() < 1e-9);
        assert!((std - 10.0).abs() < 1e-9);

        let asks = levels(&sizes, 100.1, 0.1);
        let found = detect_icebergs(&asks, BookSide::Ask);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].size, 85.0);
        assert_eq!(found[0].price, asks[0].price);
        assert_eq!(found[0].side, BookSide::Ask);
        assert!((found[0].ratio_vs_mean - 1.7).abs() < 1e-9);
    }

    #[test]
    fn test_detect_icebergs_empty_side() {
        assert!(detect_icebergs(&[], BookSide::Ask).is_empty());
    }

    // -- Imbalance -------------------------------------------------------

    #[test]
    fn test_book_imbalance() {
        let book = OrderBookSnapshot {
            bids: levels(&[30.0, 30.0], 99.0, -1.0),
            asks: levels(&[20.0, 20.0], 101.0, 1.0),
            timestamp: t0(),
        };
        let imb = book_imbalance(&book);
        assert_eq!(imb.buy_sell_ratio, Some(1.5));
        assert!((imb.imbalance.unwrap() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_book_imbalance_empty_asks() {
        let book = OrderBookSnapshot {
            bids: levels(&[1.0], 99.0, -1.0),
            asks: vec![],
            timestamp: t0(),
        };
        let imb = book_imbalance(&book);
        assert_eq!(imb.buy_sell_ratio, None);
        assert_eq!(imb.imbalance, Some(1.0));
    }

    #[test]
    fn test_taker_buy_ratio() {
        let tape = TradeTape::new(vec![
            trade(0, 1.0, 3.0, TradeSide::Buy),
            trade(1, 1.0, 2.0, TradeSide::Sell),
        ]);
        assert_eq!(taker_buy_ratio(&tape), Some(1.5));
        assert_eq!(taker_buy_ratio(&TradeTape::new(vec![trade(0, 1.0, 3.0, TradeSide::Buy)])), None);
    }

    // -- Analyzer --------------------------------------------------------

    #[test]
    fn test_analyze_combines_stages() {
        let tape = TradeTape::new(vec![
            trade(0, 100.0, 10.0, TradeSide::Buy),
            trade(5, 99.0, 4.0, TradeSide::Sell),
            trade(12, 95.0, 5.0, TradeSide::Buy),
            trade(25, 91.0, 2.0, TradeSide::Sell),
            trade(30, 90.0, 7.0, TradeSide::Buy),
        ]);
        let mut ask_sizes = vec![10.0; 20];
        ask_sizes[3] = 200.0;
        let book = OrderBookSnapshot {
            bids: levels(&[10.0; 20], 89.9, -0.1),
            asks: levels(&ask_sizes, 90.1, 0.1),
            timestamp: t0(),
        };

        let report = OrderFlowAnalyzer::new(3).analyze("TESTUSDT", &tape, &book);
        assert!(report.cvd_divergence);
        assert_eq!(report.iceberg_count(), 1);
        assert_eq!(report.icebergs[0].side, BookSide::Ask);
        assert_eq!(report.cvd.as_ref().and_then(|c| c.last()), Some(16.0));
        assert_eq!(report.taker_buy_ratio, Some(22.0 / 6.0));
    }

    #[test]
    fn test_analyze_short_tape_skips_divergence() {
        let tape = TradeTape::new(vec![trade(0, 100.0, 1.0, TradeSide::Buy)]);
        let book = OrderBookSnapshot { bids: vec![], asks: vec![], timestamp: t0() };
        let report = OrderFlowAnalyzer::new(20).analyze("TESTUSDT", &tape, &book);
        assert!(report.cvd.is_none());
        assert!(!report.cvd_divergence);
        assert_eq!(report.iceberg_count(), 0);
    }
}

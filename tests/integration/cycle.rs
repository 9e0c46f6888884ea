//! Full scan cycles driven through the public API.

use std::sync::Arc;
use std::time::Duration;

use flowscan::config::ScannerConfig;
use flowscan::engine::{ResultBoard, ScanCycle};
use flowscan::feed::MarketDataFeed;
use flowscan::types::{Classification, CycleStatus, SkipReason};

use crate::mock_feed::{instrument, MockFeed};

fn cycle_for(feed: Arc<MockFeed>, config: ScannerConfig) -> ScanCycle {
    let feed: Arc<dyn MarketDataFeed> = feed;
    ScanCycle::new(feed, config, Arc::new(ResultBoard::new()))
}

#[tokio::test]
async fn test_universe_eligibility() {
    let mut delisted = instrument("LUNA", "USDT", 9_000_000);
    delisted.delisted = true;
    let feed = Arc::new(MockFeed::new(vec![
        instrument("SOL", "USDT", 50_000_000),
        instrument("USDC", "USDT", 900_000_000),
        instrument("BTCUP", "USDT", 8_000_000),
        instrument("DUST", "USDT", 5_000),
        instrument("ETH", "BTC", 70_000_000),
        delisted,
    ]));

    let cycle = cycle_for(Arc::clone(&feed), ScannerConfig::default());
    let result = cycle.run_cycle().await;

    assert_eq!(result.status, CycleStatus::Complete);
    // ETHBTC is outside the USDT universe and never counted.
    assert_eq!(result.summary.total_scanned, 5);
    assert_eq!(result.summary.total_eligible, 1);
    assert_eq!(result.summary.skipped.filtered, 4);
    assert_eq!(result.signals.len(), 1);
    assert_eq!(result.signals[0].symbol, "SOLUSDT");
    assert_eq!(feed.candle_requests(), 1);

    let filtered: Vec<&str> = result.skipped.iter().map(|s| s.symbol.as_str()).collect();
    assert_eq!(filtered, vec!["BTCUPUSDT", "DUSTUSDT", "LUNAUSDT", "USDCUSDT"]);
}

#[tokio::test]
async fn test_signals_ranked_by_score_then_rvol() {
    let feed = Arc::new(
        MockFeed::new(vec![
            instrument("SOL", "USDT", 50_000_000),
            instrument("ADA", "USDT", 40_000_000),
            instrument("XRP", "USDT", 30_000_000),
            instrument("DOT", "USDT", 20_000_000),
        ])
        .with_spike("ADAUSDT", 200_000.0)
        .with_spike("XRPUSDT", 621_000.0)
        .with_spike("DOTUSDT", 60_000.0),
    );

    let result = cycle_for(feed, ScannerConfig::default()).run_cycle().await;
    let order: Vec<(&str, u8)> = result.signals.iter().map(|s| (s.symbol.as_str(), s.score)).collect();
    assert_eq!(
        order,
        vec![("XRPUSDT", 100), ("ADAUSDT", 100), ("DOTUSDT", 100), ("SOLUSDT", 70)]
    );
    assert_eq!(result.signals[0].classification, Classification::Sniper);
    assert_eq!(result.signals[3].classification, Classification::Watch);
    assert_eq!(result.summary.by_classification.sniper, 3);
    assert_eq!(result.summary.by_classification.watch, 1);
}

#[tokio::test]
async fn test_failures_are_isolated_per_instrument() {
    let feed = Arc::new(
        MockFeed::new(vec![
            instrument("SOL", "USDT", 50_000_000),
            instrument("ADA", "USDT", 40_000_000),
            instrument("XRP", "USDT", 30_000_000),
        ])
        .with_spike("SOLUSDT", 621_000.0),
    );
    feed.fail_symbol("ADAUSDT");

    let result = cycle_for(feed, ScannerConfig::default()).run_cycle().await;

    assert_eq!(result.status, CycleStatus::Complete);
    assert_eq!(result.signals.len(), 2);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].symbol, "ADAUSDT");
    assert_eq!(result.skipped[0].reason, SkipReason::FetchFailed);
    assert_eq!(result.signals[0].symbol, "SOLUSDT");
}

#[tokio::test]
async fn test_short_history_is_skipped() {
    let feed = Arc::new(
        MockFeed::new(vec![instrument("NEW", "USDT", 50_000_000)])
            .with_spike("NEWUSDT", 621_000.0)
            .with_candle_count(30),
    );

    let result = cycle_for(feed, ScannerConfig::default()).run_cycle().await;
    assert!(result.signals.is_empty());
    assert_eq!(result.skipped[0].reason, SkipReason::InsufficientHistory);
}

#[tokio::test(start_paused = true)]
async fn test_slow_instrument_times_out() {
    let feed = Arc::new(
        MockFeed::new(vec![
            instrument("SOL", "USDT", 50_000_000),
            instrument("SLOW", "USDT", 40_000_000),
        ])
        .with_delay("SLOWUSDT", Duration::from_secs(30)),
    );
    let config = ScannerConfig { cycle_deadline_secs: 1, ..ScannerConfig::default() };

    let result = cycle_for(feed, config).run_cycle().await;

    assert_eq!(result.status, CycleStatus::Complete);
    assert_eq!(result.signals.len(), 1);
    assert_eq!(result.signals[0].symbol, "SOLUSDT");
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].symbol, "SLOWUSDT");
    assert_eq!(result.skipped[0].reason, SkipReason::Timeout);
    assert_eq!(result.summary.skipped.timeout, 1);
}

#[tokio::test]
async fn test_degraded_then_recovers() {
    let feed = Arc::new(MockFeed::new(vec![instrument("SOL", "USDT", 50_000_000)]));
    feed.set_offline(true);

    let cycle = cycle_for(Arc::clone(&feed), ScannerConfig::default());
    let first = cycle.run_cycle().await;
    assert!(first.status.is_degraded());
    assert_eq!(first.summary.total_scanned, 0);
    assert!(first.signals.is_empty());

    feed.set_offline(false);
    let second = cycle.run_cycle().await;
    assert_eq!(second.status, CycleStatus::Complete);
    assert_eq!(second.cycle_number, 2);
    assert_eq!(second.signals.len(), 1);

    let latest = cycle.board().latest().unwrap();
    assert_eq!(latest.cycle_number, 2);
}

#[tokio::test]
async fn test_every_fetch_failing_is_degraded() {
    let feed = Arc::new(MockFeed::new(vec![
        instrument("SOL", "USDT", 50_000_000),
        instrument("ADA", "USDT", 40_000_000),
    ]));
    feed.fail_symbol("SOLUSDT");
    feed.fail_symbol("ADAUSDT");

    let result = cycle_for(feed, ScannerConfig::default()).run_cycle().await;
    assert!(result.status.is_degraded());
    assert_eq!(result.summary.skipped.fetch_failed, 2);
    assert_eq!(result.summary.total_scanned, 0);
    assert_eq!(result.summary.total_eligible, 0);
    assert!(result.signals.is_empty());
}

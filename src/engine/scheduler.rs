//! Continuous-mode control loop.
//!
//! Calls `run_cycle` on a fixed interval until told to stop. A cycle that
//! overruns the interval delays the next tick instead of queueing a burst,
//! so two cycles never run at once.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::engine::cycle::ScanCycle;
use crate::types::ScanResult;

pub struct Scheduler {
    cycle: Arc<ScanCycle>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(cycle: Arc<ScanCycle>, interval: Duration) -> Self {
        Self { cycle, interval }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// `on_result` sees every completed cycle. A shutdown arriving mid-cycle
    /// abandons that cycle before it publishes. Returns the number of cycles
    /// completed.
    pub async fn run<F>(&self, mut shutdown: watch::Receiver<bool>, mut on_result: F) -> u64
    where
        F: FnMut(&ScanResult),
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut completed = 0u64;

        info!(
            interval_secs = self.interval.as_secs(),
            "Entering scan loop. Press Ctrl+C to stop."
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                result = self.cycle.run_cycle() => {
                    completed += 1;
                    on_result(&result);
                }
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Shutdown requested mid-cycle; abandoning it");
                    break;
                }
            }
        }

        info!(cycles = completed, "Scan loop stopped");
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use crate::engine::cycle::ResultBoard;
    use crate::feed::{MarketDataFeed, MockMarketDataFeed};
    use crate::types::{CandleSeries, FetchError, Instrument, OrderBookSnapshot, TradeTape};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    fn offline_cycle() -> Arc<ScanCycle> {
        let mut feed = MockMarketDataFeed::new();
        feed.expect_ping()
            .returning(|| Err(FetchError::Network("offline".into())));
        Arc::new(ScanCycle::new(
            Arc::new(feed),
            ScannerConfig::default(),
            Arc::new(ResultBoard::new()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_interval_until_shutdown() {
        let cycle = offline_cycle();
        let scheduler = Scheduler::new(Arc::clone(&cycle), Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            let n = scheduler.run(rx, |r| seen.push(r.cycle_number)).await;
            (n, seen)
        });

        // First tick fires immediately, then at 60s and 120s.
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();

        let (n, seen) = handle.await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(cycle.cycles_run(), 3);
    }

    /// Feed whose ping takes ten seconds, so a cycle is observably in flight.
    struct SlowFeed;

    #[async_trait]
    impl MarketDataFeed for SlowFeed {
        async fn ping(&self) -> Result<(), FetchError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Err(FetchError::Network("offline".into()))
        }

        async fn fetch_instruments(&self) -> Result<Vec<Instrument>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_candles(&self, _: &Instrument, _: &str, _: usize) -> Result<CandleSeries, FetchError> {
            Err(FetchError::Network("offline".into()))
        }

        async fn fetch_order_book(&self, _: &Instrument, _: usize) -> Result<OrderBookSnapshot, FetchError> {
            Err(FetchError::Network("offline".into()))
        }

        async fn fetch_trades(
            &self,
            _: &Instrument,
            _: Option<DateTime<Utc>>,
            _: usize,
        ) -> Result<TradeTape, FetchError> {
            Err(FetchError::Network("offline".into()))
        }
    }

    fn slow_cycle() -> Arc<ScanCycle> {
        Arc::new(ScanCycle::new(
            Arc::new(SlowFeed),
            ScannerConfig::default(),
            Arc::new(ResultBoard::new()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_shutdown_change_keeps_cycle() {
        let cycle = slow_cycle();
        let scheduler = Scheduler::new(Arc::clone(&cycle), Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx, |_| {}).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), 1);
        assert!(cycle.board().latest().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_cycle_abandons_it() {
        let cycle = slow_cycle();
        let scheduler = Scheduler::new(Arc::clone(&cycle), Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx, |_| {}).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), 0);
        assert!(cycle.board().latest().is_none());
    }

    #[tokio::test]
    async fn test_stops_immediately_when_already_shut_down() {
        let scheduler = Scheduler::new(offline_cycle(), Duration::from_secs(60));
        let (_tx, rx) = watch::channel(true);
        assert_eq!(scheduler.run(rx, |_| {}).await, 0);
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_loop() {
        let scheduler = Scheduler::new(offline_cycle(), Duration::from_secs(3600));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx, |_| {}).await });
        tokio::task::yield_now().await;
        drop(tx);
        let n = handle.await.unwrap();
        assert!(n <= 1);
    }
}

//! Scan cycle orchestrator.
//!
//! One cycle: ping the feed, refresh (or reuse) the universe, filter it,
//! then evaluate every eligible instrument over a bounded pool of
//! concurrent evaluations. Each evaluation fetches candles, runs the volume
//! stage, then fetches book and tape together and runs the order-flow and
//! indicator stages before scoring.
//!
//! Failures never cross instruments: each one becomes a `SkippedInstrument`
//! with a reason code. The cycle carries a deadline; evaluations still
//! running at the deadline are dropped and recorded as `Timeout`. The
//! result is ranked, summarised and published as one immutable snapshot.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ScannerConfig;
use crate::engine::history::{VolumeHistory, VolumePoint};
use crate::engine::imbalance;
use crate::engine::order_flow::OrderFlowAnalyzer;
use crate::engine::scanner::VolumeAnomalyDetector;
use crate::feed::MarketDataFeed;
use crate::indicators;
use crate::strategy::{self, SignalScorer};
use crate::types::{
    Candle, Classification, CycleStatus, FetchError, IndicatorSet, Instrument, ScanResult, ScanSummary, Signal,
    SkipReason, SkippedInstrument,
};

// ---------------------------------------------------------------------------
// Result board
// ---------------------------------------------------------------------------

/// Holder of the most recently published scan result.
///
/// Readers get an `Arc` snapshot; a publish swaps the whole result, so no
/// reader ever sees a partially updated cycle.
#[derive(Debug)]
pub struct ResultBoard {
    latest: watch::Sender<Option<Arc<ScanResult>>>,
}

impl Default for ResultBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultBoard {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self { latest }
    }

    pub fn publish(&self, result: ScanResult) -> Arc<ScanResult> {
        let result = Arc::new(result);
        self.latest.send_replace(Some(Arc::clone(&result)));
        result
    }

    pub fn latest(&self) -> Option<Arc<ScanResult>> {
        self.latest.borrow().clone()
    }

    /// Be notified of every publish.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ScanResult>>> {
        self.latest.subscribe()
    }

    /// Up to `n` signals of the latest result at or above `min`, in
    /// published order. Empty before the first publish.
    pub fn top_signals(&self, n: usize, min: Classification) -> Vec<Signal> {
        match self.latest() {
            Some(result) => strategy::top_signals(&result.signals, n, min),
            None => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-instrument evaluation
// ---------------------------------------------------------------------------

/// What one instrument's evaluation produced, plus the candles worth
/// remembering for future baselines.
#[derive(Debug)]
struct InstrumentOutcome {
    result: Result<Signal, SkippedInstrument>,
    candles: Vec<Candle>,
}

impl InstrumentOutcome {
    fn skipped(skip: SkippedInstrument) -> Self {
        Self { result: Err(skip), candles: Vec::new() }
    }
}

fn fetch_skip(symbol: &str, what: &str, err: FetchError) -> SkippedInstrument {
    let reason = match err {
        FetchError::Decode(_) => SkipReason::Malformed,
        _ => SkipReason::FetchFailed,
    };
    SkippedInstrument::new(symbol, reason, format!("{what}: {err}"))
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct ScanCycle {
    feed: Arc<dyn MarketDataFeed>,
    config: ScannerConfig,
    detector: VolumeAnomalyDetector,
    order_flow: OrderFlowAnalyzer,
    scorer: SignalScorer,
    history: Mutex<VolumeHistory>,
    universe: Mutex<Option<Vec<Instrument>>>,
    /// Held for the duration of a cycle; cycles never overlap.
    running: Mutex<()>,
    cycle_count: AtomicU64,
    board: Arc<ResultBoard>,
}

impl ScanCycle {
    pub fn new(feed: Arc<dyn MarketDataFeed>, config: ScannerConfig, board: Arc<ResultBoard>) -> Self {
        let detector = VolumeAnomalyDetector::new(&config);
        let history = VolumeHistory::new(config.history_max_instruments, detector.baseline_window());
        Self {
            feed,
            order_flow: OrderFlowAnalyzer::new(config.cvd_divergence_lookback),
            scorer: SignalScorer::default(),
            detector,
            history: Mutex::new(history),
            universe: Mutex::new(None),
            running: Mutex::new(()),
            cycle_count: AtomicU64::new(0),
            board,
            config,
        }
    }

    pub fn board(&self) -> Arc<ResultBoard> {
        Arc::clone(&self.board)
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    /// Run one full cycle and publish its result.
    ///
    /// Never fails: per-instrument problems become skips, and a feed that
    /// cannot be reached yields a `Degraded` result with no instruments.
    pub async fn run_cycle(&self) -> ScanResult {
        let _running = self.running.lock().await;

        let cycle_number = self.cycle_count.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        let deadline = started + self.config.cycle_deadline();
        let timestamp = Utc::now();

        info!(cycle = cycle_number, "Starting scan cycle");

        if let Err(e) = self.feed.ping().await {
            warn!(cycle = cycle_number, error = %e, "Feed unreachable, publishing degraded result");
            return self.finish(
                cycle_number,
                started,
                timestamp,
                CycleStatus::Degraded { reason: format!("feed unreachable: {e}") },
                0,
                0,
                Vec::new(),
            );
        }

        let universe = match self.universe(cycle_number).await {
            Ok(universe) => universe,
            Err(e) => {
                warn!(cycle = cycle_number, error = %e, "No instrument universe available");
                return self.finish(
                    cycle_number,
                    started,
                    timestamp,
                    CycleStatus::Degraded { reason: format!("universe unavailable: {e}") },
                    0,
                    0,
                    Vec::new(),
                );
            }
        };

        let (eligible, filtered) = self.detector.filter_universe(universe);
        let total_scanned = eligible.len() + filtered.len();
        let total_eligible = eligible.len();

        // Seeds are copied out so evaluations never touch shared state.
        let work: Vec<(Instrument, Vec<VolumePoint>)> = {
            let history = self.history.lock().await;
            eligible
                .into_iter()
                .map(|inst| {
                    let seed = history.snapshot(&inst.symbol);
                    (inst, seed)
                })
                .collect()
        };

        let concurrency = self.config.max_concurrent_pairs.max(1);
        let outcomes: Vec<(String, InstrumentOutcome)> = stream::iter(work)
            .map(|(inst, seed)| async move {
                let outcome = match tokio::time::timeout_at(deadline, self.evaluate(&inst, &seed)).await {
                    Ok(outcome) => outcome,
                    Err(_) => InstrumentOutcome::skipped(SkippedInstrument::new(
                        inst.symbol.as_str(),
                        SkipReason::Timeout,
                        format!("cycle deadline of {}s exceeded", self.config.cycle_deadline_secs),
                    )),
                };
                (inst.symbol, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut signals = Vec::new();
        let mut skipped = filtered;
        {
            let mut history = self.history.lock().await;
            for (symbol, outcome) in outcomes {
                if !outcome.candles.is_empty() {
                    history.record(&symbol, &outcome.candles);
                }
                match outcome.result {
                    Ok(signal) => signals.push(signal),
                    Err(skip) => {
                        log_skip(&skip);
                        skipped.push(skip);
                    }
                }
            }
        }

        let fetch_failures = skipped.iter().filter(|s| s.reason == SkipReason::FetchFailed).count();
        // Losing every fetch is connectivity loss: nothing was actually scanned.
        let (status, total_scanned, total_eligible) = if total_eligible > 0 && fetch_failures == total_eligible {
            let reason = "every eligible instrument failed to fetch".to_string();
            (CycleStatus::Degraded { reason }, 0, 0)
        } else {
            (CycleStatus::Complete, total_scanned, total_eligible)
        };

        strategy::rank_signals(&mut signals);
        skipped.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.reason.cmp(&b.reason)));

        let mut all = Vec::with_capacity(signals.len() + skipped.len());
        all.extend(signals.into_iter().map(Ok));
        all.extend(skipped.into_iter().map(Err));

        self.finish(cycle_number, started, timestamp, status, total_scanned, total_eligible, all)
    }

    /// Cached universe, refreshed on the first cycle and every
    /// `universe_refresh_cycles` cycles after. A failed refresh falls back to
    /// the cache when there is one.
    async fn universe(&self, cycle_number: u64) -> Result<Vec<Instrument>, FetchError> {
        let mut cache = self.universe.lock().await;
        let every = self.config.universe_refresh_cycles.max(1) as u64;
        let due = cache.is_none() || (cycle_number - 1) % every == 0;

        if due {
            match self.feed.fetch_instruments().await {
                Ok(fresh) => {
                    debug!(count = fresh.len(), "Instrument universe refreshed");
                    *cache = Some(fresh);
                }
                Err(e) => match cache.as_ref() {
                    Some(cached) => {
                        warn!(error = %e, cached = cached.len(), "Universe refresh failed, reusing cached universe");
                    }
                    None => return Err(e),
                },
            }
        }

        Ok(cache.clone().unwrap_or_default())
    }

    async fn evaluate(&self, inst: &Instrument, seed: &[VolumePoint]) -> InstrumentOutcome {
        let symbol = inst.symbol.as_str();
        let cfg = &self.config;

        let series = match self
            .feed
            .fetch_candles(inst, &cfg.candle_interval, cfg.candle_fetch_limit)
            .await
        {
            Ok(series) => series,
            Err(e) => return InstrumentOutcome::skipped(fetch_skip(symbol, "candles", e)),
        };
        if let Err(e) = series.validate() {
            return InstrumentOutcome::skipped(SkippedInstrument::new(symbol, SkipReason::Malformed, format!("candles: {e}")));
        }

        let candles = series.candles.clone();
        let volume = match self.detector.analyze(&series, seed) {
            Ok(volume) => volume,
            Err(skip) => return InstrumentOutcome { result: Err(skip), candles },
        };

        let (book, tape) = tokio::join!(
            self.feed.fetch_order_book(inst, cfg.order_book_depth),
            self.feed.fetch_trades(inst, None, cfg.trade_fetch_limit),
        );
        let book = match book {
            Ok(book) => book,
            Err(e) => return InstrumentOutcome { result: Err(fetch_skip(symbol, "order book", e)), candles },
        };
        let tape = match tape {
            Ok(tape) => tape,
            Err(e) => return InstrumentOutcome { result: Err(fetch_skip(symbol, "trades", e)), candles },
        };
        if let Err(e) = book.validate() {
            let skip = SkippedInstrument::new(symbol, SkipReason::Malformed, format!("order book: {e}"));
            return InstrumentOutcome { result: Err(skip), candles };
        }
        if let Err(e) = tape.validate() {
            let skip = SkippedInstrument::new(symbol, SkipReason::Malformed, format!("trades: {e}"));
            return InstrumentOutcome { result: Err(skip), candles };
        }

        let flow = self.order_flow.analyze(symbol, &tape, &book);

        let closes = series.closes();
        let volumes = series.volumes();
        let bb_squeeze = indicators::bollinger_squeeze(&closes, cfg.bb_period, cfg.bb_squeeze_threshold).unwrap_or(false);
        let rsi = indicators::rsi(&closes, cfg.rsi_period).ok().flatten();
        let zscore_window = self.detector.baseline_window().min(volumes.len());
        let volume_zscore = indicators::z_score(&volumes, zscore_window).ok().flatten();

        let indicators = IndicatorSet {
            rvol: volume.profile.rvol,
            rvol_signal: volume.rvol_signal,
            cvd_divergence: flow.cvd_divergence,
            bb_squeeze,
            iceberg_count: flow.iceberg_count(),
            buy_sell_ratio: flow.imbalance.buy_sell_ratio,
            imbalance: flow.imbalance.imbalance,
            taker_buy_ratio: flow.taker_buy_ratio,
            cvd_last: flow.cvd.as_ref().and_then(|c| c.last()),
            rsi,
            volume_zscore,
        };

        let price = series.last().map(|c| c.close).unwrap_or(inst.last_price);
        let signal = self
            .scorer
            .evaluate(symbol, indicators, imbalance::book_context(&book), price, Utc::now());

        if signal.classification >= Classification::Watch {
            info!(
                symbol,
                score = signal.score,
                class = %signal.classification,
                rvol = ?signal.rvol().map(|r| format!("{r:.2}x")),
                price,
                action = signal.classification.action(),
                "Signal"
            );
        }

        InstrumentOutcome { result: Ok(signal), candles }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        cycle_number: u64,
        started: Instant,
        timestamp: chrono::DateTime<Utc>,
        status: CycleStatus,
        total_scanned: usize,
        total_eligible: usize,
        entries: Vec<Result<Signal, SkippedInstrument>>,
    ) -> ScanResult {
        let mut summary = ScanSummary {
            total_scanned,
            total_eligible,
            ..ScanSummary::default()
        };
        let mut signals = Vec::new();
        let mut skipped = Vec::new();
        for entry in entries {
            match entry {
                Ok(signal) => {
                    summary.by_classification.record(signal.classification);
                    signals.push(signal);
                }
                Err(skip) => {
                    summary.skipped.record(skip.reason);
                    skipped.push(skip);
                }
            }
        }
        summary.signals = signals.len();

        let result = ScanResult {
            cycle_id: Uuid::new_v4(),
            cycle_number,
            timestamp,
            duration_ms: started.elapsed().as_millis() as u64,
            status,
            signals,
            skipped,
            summary,
        };

        info!(
            cycle = cycle_number,
            status = %result.status,
            scanned = total_scanned,
            eligible = total_eligible,
            signals = summary.signals,
            sniper = summary.by_classification.sniper,
            watch = summary.by_classification.watch,
            skipped = summary.skipped.total(),
            duration_ms = result.duration_ms,
            "Scan cycle complete"
        );

        self.board.publish(result.clone());
        result
    }
}

fn log_skip(skip: &SkippedInstrument) {
    match skip.reason {
        SkipReason::InsufficientHistory | SkipReason::Filtered => {
            debug!(symbol = %skip.symbol, reason = %skip.reason, detail = %skip.detail, "Instrument skipped");
        }
        SkipReason::FetchFailed | SkipReason::Malformed | SkipReason::Timeout => {
            warn!(symbol = %skip.symbol, reason = %skip.reason, detail = %skip.detail, "Instrument skipped");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! FLOWSCAN: volume and order-flow anomaly scanner.
//!
//! Entry point. Loads configuration, initialises structured logging and
//! runs in one of three modes:
//! - `single`     one cycle, log the top signals, save the report
//! - `continuous` scan on an interval with the dashboard until Ctrl+C
//! - `report`     one cycle, then build and save the squeeze report

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use flowscan::config::AppConfig;
use flowscan::dashboard::{self, routes::DashboardState};
use flowscan::engine::{ResultBoard, ScanCycle, Scheduler};
use flowscan::feed::BinanceClient;
use flowscan::storage;
use flowscan::strategy::{self, SQUEEZE_REPORT_SIZE};
use flowscan::types::{Classification, ScanResult};

const BANNER: &str = r#"
 _____ _     _____        ______   ____    _    _   _
|  ___| |   / _ \ \      / / ___| / ___|  / \  | \ | |
| |_  | |  | | | \ \ /\ / /\___ \| |     / _ \ |  \| |
|  _| | |__| |_| |\ V  V /  ___) | |___ / ___ \| |\  |
|_|   |_____\___/  \_/\_/  |____/ \____/_/   \_\_| \_|

  Volume & order-flow anomaly scanner
  v0.1.0
"#;

const TOP_SIGNALS_LOGGED: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Run one cycle and exit
    Single,
    /// Scan on the configured interval until Ctrl+C
    Continuous,
    /// Run one cycle and save the squeeze report
    Report,
}

#[derive(Parser, Debug)]
#[command(name = "flowscan", version, about = "Volume and order-flow anomaly scanner", long_about = None)]
struct Cli {
    #[arg(value_enum, default_value_t = Mode::Single)]
    mode: Mode,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    let mut cfg = AppConfig::load_or_default(&cli.config)?;
    cfg.apply_env_overrides()?;
    cfg.validate()?;

    init_logging();

    println!("{BANNER}");
    info!(
        mode = ?cli.mode,
        config = %cli.config,
        quote_currencies = ?cfg.scanner.quote_currencies,
        rvol_threshold = cfg.scanner.rvol_threshold,
        min_volume_usd = %cfg.scanner.min_volume_usd,
        scan_interval_secs = cfg.scanner.scan_interval_secs,
        "FLOWSCAN starting up"
    );

    // -- Initialise components -------------------------------------------

    let feed = Arc::new(BinanceClient::new(&cfg.feed)?);
    let feed_state = feed.subscribe_state();
    let board = Arc::new(ResultBoard::new());
    let cycle = Arc::new(ScanCycle::new(feed, cfg.scanner.clone(), Arc::clone(&board)));
    let reports_dir = cfg.storage.reports_dir.clone();

    match cli.mode {
        Mode::Single => {
            let result = cycle.run_cycle().await;
            log_top_signals(&result);
            let path = storage::save_report(&result, &reports_dir)?;
            info!(path = %path.display(), "Report saved");
        }
        Mode::Report => {
            let result = cycle.run_cycle().await;
            let entries = strategy::squeeze_report(&result.signals, SQUEEZE_REPORT_SIZE);
            for (rank, e) in entries.iter().enumerate() {
                info!(
                    rank = rank + 1,
                    symbol = %e.symbol,
                    price = e.price,
                    buy_sell_ratio = ?e.buy_sell_ratio.map(|r| format!("{r:.2}")),
                    class = %e.classification,
                    "Squeeze candidate"
                );
            }
            storage::save_squeeze_report(&entries, &reports_dir, result.timestamp)?;
        }
        Mode::Continuous => {
            if cfg.dashboard.enabled {
                let state = Arc::new(DashboardState::new(Arc::clone(&board)).with_feed_state(feed_state));
                dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                    return;
                }
                info!("Shutdown signal received.");
                let _ = shutdown_tx.send(true);
            });

            let scheduler = Scheduler::new(Arc::clone(&cycle), cfg.scanner.scan_interval());
            let cycles = scheduler
                .run(shutdown_rx, |result| {
                    log_top_signals(result);
                    if let Err(e) = storage::save_report(result, &reports_dir) {
                        error!(error = %e, "Failed to save report");
                    }
                })
                .await;

            info!(cycles, "FLOWSCAN shut down cleanly.");
        }
    }

    Ok(())
}

/// Log the highest-ranked signals of a cycle.
fn log_top_signals(result: &ScanResult) {
    if result.status.is_degraded() {
        warn!(status = %result.status, "Cycle degraded, no instruments evaluated");
    }
    let top = strategy::top_signals(&result.signals, TOP_SIGNALS_LOGGED, Classification::Accumulation);
    if top.is_empty() {
        info!(cycle = result.cycle_number, "No signals above noise this cycle");
        return;
    }
    for (rank, s) in top.iter().enumerate() {
        info!(
            rank = rank + 1,
            symbol = %s.symbol,
            score = s.score,
            class = %s.classification,
            rvol = ?s.rvol().map(|r| format!("{r:.2}x")),
            price = s.price,
            action = s.classification.action(),
            "Top signal"
        );
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flowscan=info"));

    let json_logging = std::env::var("FLOWSCAN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

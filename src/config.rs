//! Configuration loading from TOML with environment variable overrides.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! field has a default, so a missing or partial file still yields a usable
//! configuration. A handful of scanner thresholds can be overridden from the
//! environment (or a `.env` file) without editing the TOML.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Thresholds and windows of the detection pipeline.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    /// RVol above this raises the volume signal.
    pub rvol_threshold: f64,
    pub min_candles_required: usize,
    /// Minimum 24h quote volume for an instrument to be eligible.
    pub min_volume_usd: Decimal,
    /// Number of CVD buckets, and the divergence lookback.
    pub cvd_divergence_lookback: usize,
    pub bb_period: usize,
    /// Maximum normalised band width that still counts as a squeeze.
    pub bb_squeeze_threshold: f64,
    pub rsi_period: usize,
    pub scan_interval_secs: u64,
    pub quote_currencies: Vec<String>,
    /// Base assets excluded by exact match.
    pub stablecoins: Vec<String>,
    /// Base assets excluded by suffix (leveraged tokens such as BTCUP).
    pub leveraged_suffixes: Vec<String>,
    /// Exchange candle interval, e.g. "1m".
    pub candle_interval: String,
    /// Length of the RVol reference window.
    pub volume_lookback_hours: u64,
    pub candle_fetch_limit: usize,
    pub order_book_depth: usize,
    pub trade_fetch_limit: usize,
    /// Size of the per-cycle worker pool.
    pub max_concurrent_pairs: usize,
    pub cycle_deadline_secs: u64,
    /// Capacity of the per-instrument volume history arena.
    pub history_max_instruments: usize,
    /// Refresh the instrument universe every N cycles.
    pub universe_refresh_cycles: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            rvol_threshold: 5.0,
            min_candles_required: 100,
            min_volume_usd: dec!(100000),
            cvd_divergence_lookback: 20,
            bb_period: 20,
            bb_squeeze_threshold: 0.02,
            rsi_period: 14,
            scan_interval_secs: 60,
            quote_currencies: vec!["USDT".to_string()],
            stablecoins: ["BUSD", "USDC", "DAI", "TUSD", "USDP", "FDUSD"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            leveraged_suffixes: ["UP", "DOWN", "BEAR", "BULL"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            candle_interval: "1m".to_string(),
            volume_lookback_hours: 24,
            candle_fetch_limit: 1000,
            order_book_depth: 100,
            trade_fetch_limit: 500,
            max_concurrent_pairs: 50,
            cycle_deadline_secs: 45,
            history_max_instruments: 4096,
            universe_refresh_cycles: 60,
        }
    }
}

impl ScannerConfig {
    /// Number of candles in the RVol reference window at the configured interval.
    ///
    /// Unknown intervals fall back to one candle per minute.
    pub fn baseline_window(&self) -> usize {
        let minutes = interval_minutes(&self.candle_interval).unwrap_or(1);
        let window = (self.volume_lookback_hours * 60) / minutes.max(1);
        (window as usize).max(1)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

/// Exchange connectivity settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    /// Shared request budget across all concurrent instrument tasks.
    pub requests_per_second: u32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    /// Name of the env var holding an optional API key.
    pub api_key_env: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            requests_per_second: 10,
            request_timeout_secs: 10,
            max_retries: 3,
            base_backoff_ms: 500,
            api_key_env: Some("BINANCE_API_KEY".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub reports_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reports_dir: "data/reports".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Load the file if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let s = &mut self.scanner;
        if let Some(v) = lookup("RVOL_THRESHOLD") {
            s.rvol_threshold = v.trim().parse().with_context(|| format!("Invalid RVOL_THRESHOLD: {v}"))?;
        }
        if let Some(v) = lookup("MIN_VOLUME_USD") {
            s.min_volume_usd =
                Decimal::from_str(v.trim()).with_context(|| format!("Invalid MIN_VOLUME_USD: {v}"))?;
        }
        if let Some(v) = lookup("MIN_CANDLES_REQUIRED") {
            s.min_candles_required =
                v.trim().parse().with_context(|| format!("Invalid MIN_CANDLES_REQUIRED: {v}"))?;
        }
        if let Some(v) = lookup("VOLUME_LOOKBACK_HOURS") {
            s.volume_lookback_hours =
                v.trim().parse().with_context(|| format!("Invalid VOLUME_LOOKBACK_HOURS: {v}"))?;
        }
        if let Some(v) = lookup("SCAN_INTERVAL") {
            s.scan_interval_secs = v.trim().parse().with_context(|| format!("Invalid SCAN_INTERVAL: {v}"))?;
        }
        if let Some(v) = lookup("QUOTE_CURRENCIES") {
            s.quote_currencies = v
                .split(',')
                .map(|q| q.trim().to_uppercase())
                .filter(|q| !q.is_empty())
                .collect();
        }
        Ok(())
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scanner;
        if !(s.rvol_threshold > 0.0) {
            anyhow::bail!("rvol_threshold must be positive, got {}", s.rvol_threshold);
        }
        if s.min_candles_required < 2 {
            anyhow::bail!("min_candles_required must be at least 2");
        }
        if s.cvd_divergence_lookback < 2 {
            anyhow::bail!("cvd_divergence_lookback must be at least 2");
        }
        if s.bb_period < 2 || s.rsi_period < 2 {
            anyhow::bail!("bb_period and rsi_period must be at least 2");
        }
        // Every series that passes the history check must feed both indicators.
        if s.bb_period > s.min_candles_required {
            anyhow::bail!(
                "bb_period ({}) exceeds min_candles_required ({})",
                s.bb_period,
                s.min_candles_required
            );
        }
        if s.rsi_period + 1 > s.min_candles_required {
            anyhow::bail!(
                "rsi_period ({}) needs {} candles, above min_candles_required ({})",
                s.rsi_period,
                s.rsi_period + 1,
                s.min_candles_required
            );
        }
        if !(s.bb_squeeze_threshold > 0.0) {
            anyhow::bail!("bb_squeeze_threshold must be positive");
        }
        if s.quote_currencies.is_empty() {
            anyhow::bail!("quote_currencies must not be empty");
        }
        if s.max_concurrent_pairs == 0 {
            anyhow::bail!("max_concurrent_pairs must be at least 1");
        }
        if s.candle_fetch_limit < s.min_candles_required {
            anyhow::bail!(
                "candle_fetch_limit ({}) is below min_candles_required ({})",
                s.candle_fetch_limit,
                s.min_candles_required
            );
        }
        if interval_minutes(&s.candle_interval).is_none() {
            anyhow::bail!("Unsupported candle_interval: {}", s.candle_interval);
        }
        if self.feed.requests_per_second == 0 {
            anyhow::bail!("feed.requests_per_second must be at least 1");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name).with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

/// Minutes per candle for an exchange interval string ("1m", "4h", "1d", ...).
pub fn interval_minutes(interval: &str) -> Option<u64> {
    if !interval.is_ascii() {
        return None;
    }
    let (num, unit) = interval.split_at(interval.len().checked_sub(1)?);
    let n: u64 = num.parse().ok()?;
    if n == 0 {
        return None;
    }
    match unit {
        "m" => Some(n),
        "h" => Some(n * 60),
        "d" => Some(n * 60 * 24),
        "w" => Some(n * 60 * 24 * 7),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.scanner.rvol_threshold, 5.0);
        assert_eq!(cfg.scanner.min_candles_required, 100);
        assert_eq!(cfg.scanner.min_volume_usd, dec!(100000));
        assert_eq!(cfg.scanner.cvd_divergence_lookback, 20);
        assert_eq!(cfg.scanner.bb_squeeze_threshold, 0.02);
        assert_eq!(cfg.scanner.scan_interval_secs, 60);
        assert_eq!(cfg.scanner.quote_currencies, vec!["USDT".to_string()]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg = AppConfig::from_toml("").unwrap();
        assert_eq!(cfg.scanner.rvol_threshold, 5.0);
        assert_eq!(cfg.dashboard.port, 8000);
        assert_eq!(cfg.feed.base_url, "https://api.binance.com");
    }

    #[test]
    fn test_partial_toml() {
        let cfg = AppConfig::from_toml(
            r#"
            [scanner]
            rvol_threshold = 3.5
            min_volume_usd = 250000.0
            quote_currencies = ["USDT", "FDUSD"]

            [dashboard]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scanner.rvol_threshold, 3.5);
        assert_eq!(cfg.scanner.min_volume_usd, dec!(250000));
        assert_eq!(cfg.scanner.quote_currencies.len(), 2);
        assert_eq!(cfg.scanner.min_candles_required, 100);
        assert!(!cfg.dashboard.enabled);
        assert_eq!(cfg.dashboard.port, 8000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RVOL_THRESHOLD", "7.5"),
            ("MIN_VOLUME_USD", "50000"),
            ("QUOTE_CURRENCIES", "usdt, btc"),
            ("SCAN_INTERVAL", "30"),
        ]
        .into_iter()
        .collect();

        let mut cfg = AppConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(cfg.scanner.rvol_threshold, 7.5);
        assert_eq!(cfg.scanner.min_volume_usd, dec!(50000));
        assert_eq!(cfg.scanner.quote_currencies, vec!["USDT".to_string(), "BTC".to_string()]);
        assert_eq!(cfg.scanner.scan_interval_secs, 30);
    }

    #[test]
    fn test_env_override_invalid() {
        let mut cfg = AppConfig::default();
        let result = cfg.apply_overrides(|k| (k == "RVOL_THRESHOLD").then(|| "lots".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.scanner.rvol_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.scanner.quote_currencies.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.scanner.candle_interval = "7x".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_indicator_periods_fit_history() {
        let mut cfg = AppConfig::default();
        cfg.scanner.min_candles_required = 20;
        cfg.scanner.bb_period = 20;
        cfg.scanner.rsi_period = 19;
        assert!(cfg.validate().is_ok());

        cfg.scanner.bb_period = 21;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("bb_period"));

        cfg.scanner.bb_period = 20;
        cfg.scanner.rsi_period = 20;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("rsi_period"));
    }

    #[test]
    fn test_interval_minutes() {
        assert_eq!(interval_minutes("1m"), Some(1));
        assert_eq!(interval_minutes("15m"), Some(15));
        assert_eq!(interval_minutes("4h"), Some(240));
        assert_eq!(interval_minutes("1d"), Some(1440));
        assert_eq!(interval_minutes(""), None);
        assert_eq!(interval_minutes("0m"), None);
    }

    #[test]
    fn test_baseline_window() {
        let mut s = ScannerConfig::default();
        assert_eq!(s.baseline_window(), 1440);
        s.candle_interval = "5m".into();
        assert_eq!(s.baseline_window(), 288);
        s.candle_interval = "1h".into();
        assert_eq!(s.baseline_window(), 24);
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let cfg = AppConfig::load_or_default("/tmp/flowscan_no_such_config_42.toml").unwrap();
        assert_eq!(cfg.scanner.rvol_threshold, 5.0);
        assert!(AppConfig::load("/tmp/flowscan_no_such_config_42.toml").is_err());
    }
}

//! Persistence layer.
//!
//! Writes each published scan result, and the squeeze report, as pretty
//! JSON under the reports directory. Nothing is read back during normal
//! operation; `load_report` exists for tooling and tests.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::strategy::SqueezeEntry;
use crate::types::ScanResult;

/// `signals_YYYYMMDD_HHMMSS.json` for the cycle's timestamp.
pub fn report_filename(timestamp: DateTime<Utc>) -> String {
    format!("signals_{}.json", timestamp.format("%Y%m%d_%H%M%S"))
}

pub fn squeeze_filename(timestamp: DateTime<Utc>) -> String {
    format!("squeeze_{}.json", timestamp.format("%Y%m%d"))
}

fn write_json<T: serde::Serialize>(value: &T, dir: &Path, filename: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create reports directory {}", dir.display()))?;

    let path = dir.join(filename);
    let json = serde_json::to_string_pretty(value).context("Failed to serialise report")?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(path)
}

/// Save a scan result. Returns the path written.
pub fn save_report(result: &ScanResult, dir: impl AsRef<Path>) -> Result<PathBuf> {
    let path = write_json(result, dir.as_ref(), &report_filename(result.timestamp))?;
    debug!(
        path = %path.display(),
        cycle = result.cycle_number,
        signals = result.signals.len(),
        "Scan report saved"
    );
    Ok(path)
}

pub fn load_report(path: impl AsRef<Path>) -> Result<ScanResult> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report from {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse report from {}", path.display()))
}

/// Save the squeeze report, one file per day.
pub fn save_squeeze_report(entries: &[SqueezeEntry], dir: impl AsRef<Path>, timestamp: DateTime<Utc>) -> Result<PathBuf> {
    let path = write_json(&entries, dir.as_ref(), &squeeze_filename(timestamp))?;
    info!(path = %path.display(), entries = entries.len(), "Squeeze report saved");
    Ok(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

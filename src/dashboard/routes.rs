//! Dashboard API route handlers.
//!
//! All endpoints return JSON read from the latest published scan result,
//! except `/health`, which also reports the feed's connection state.
//! State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::engine::cycle::ResultBoard;
use crate::feed::ConnectionState;
use crate::strategy::{self, SqueezeEntry, SQUEEZE_REPORT_SIZE};
use crate::types::{Classification, ScanSummary, Signal, SkippedInstrument};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

const DEFAULT_SIGNAL_LIMIT: usize = 20;
const MAX_SIGNAL_LIMIT: usize = 500;

pub struct DashboardState {
    pub board: Arc<ResultBoard>,
    /// Live link state of the market-data feed, when one is attached.
    pub feed_state: Option<watch::Receiver<ConnectionState>>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(board: Arc<ResultBoard>) -> Self {
        Self {
            board,
            feed_state: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_feed_state(mut self, feed_state: watch::Receiver<ConnectionState>) -> Self {
        self.feed_state = Some(feed_state);
        self
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SignalsQuery {
    pub limit: Option<usize>,
    /// Minimum classification name, e.g. `watch`.
    pub min: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub last_cycle: Option<u64>,
    pub endpoints: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub available: bool,
    pub cycle_number: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub status: Option<String>,
    pub summary: ScanSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Feed connection state, e.g. `connected`; absent when no feed is attached.
    pub feed: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        feed: state.feed_state.as_ref().map(|rx| rx.borrow().to_string()),
    })
}

/// GET /
pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "flowscan",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        last_cycle: state.board.latest().map(|r| r.cycle_number),
        endpoints: vec![
            "/health",
            "/api/signals?limit=&min=",
            "/api/stats",
            "/api/skipped",
            "/api/report/squeeze?limit=",
            "/ws",
        ],
    })
}

/// GET /api/signals
pub async fn get_signals(
    State(state): State<AppState>,
    Query(query): Query<SignalsQuery>,
) -> Result<Json<Vec<Signal>>, (StatusCode, Json<ErrorResponse>)> {
    let min = match query.min.as_deref() {
        Some(raw) => raw.parse::<Classification>().map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse { error: e.to_string() }),
            )
        })?,
        None => Classification::Noise,
    };
    let limit = query.limit.unwrap_or(DEFAULT_SIGNAL_LIMIT).min(MAX_SIGNAL_LIMIT);
    Ok(Json(state.board.top_signals(limit, min)))
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let latest = state.board.latest();
    Json(match latest {
        Some(result) => StatsResponse {
            available: true,
            cycle_number: Some(result.cycle_number),
            timestamp: Some(result.timestamp),
            duration_ms: Some(result.duration_ms),
            status: Some(result.status.to_string()),
            summary: result.summary,
        },
        None => StatsResponse {
            available: false,
            cycle_number: None,
            timestamp: None,
            duration_ms: None,
            status: None,
            summary: ScanSummary::default(),
        },
    })
}

/// GET /api/skipped
pub async fn get_skipped(State(state): State<AppState>) -> Json<Vec<SkippedInstrument>> {
    Json(
        state
            .board
            .latest()
            .map(|r| r.skipped.clone())
            .unwrap_or_default(),
    )
}

/// GET /api/report/squeeze
pub async fn get_squeeze_report(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<SqueezeEntry>> {
    let limit = query.limit.unwrap_or(SQUEEZE_REPORT_SIZE).min(MAX_SIGNAL_LIMIT);
    Json(
        state
            .board
            .latest()
            .map(|r| strategy::squeeze_report(&r.signals, limit))
            .unwrap_or_default(),
    )
}

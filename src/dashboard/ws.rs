//! WebSocket push of scan results.
//!
//! A client receives the latest signals on connect (`"initial"`), then one
//! `"update"` per published cycle. A text `ping` is answered with `pong`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::routes::AppState;
use crate::types::{ScanResult, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushKind {
    Initial,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: PushKind,
    pub cycle_number: Option<u64>,
    pub signals: Vec<Signal>,
    pub timestamp: DateTime<Utc>,
}

impl PushMessage {
    /// Message for `result`, or an empty signal list before the first cycle.
    pub fn new(kind: PushKind, result: Option<&ScanResult>) -> Self {
        Self {
            kind,
            cycle_number: result.map(|r| r.cycle_number),
            signals: result.map(|r| r.signals.clone()).unwrap_or_default(),
            timestamp: Utc::now(),
        }
    }

    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self).ok().map(Message::Text)
    }
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| ws_connection(socket, state))
}

async fn ws_connection(mut socket: WebSocket, state: AppState) {
    // Subscribe before the initial send so no publish falls in between.
    let mut results = state.board.subscribe();
    info!("WebSocket client connected");

    let latest: Option<Arc<ScanResult>> = results.borrow_and_update().clone();
    let initial = PushMessage::new(PushKind::Initial, latest.as_deref());
    if let Some(msg) = initial.to_message() {
        if socket.send(msg).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            changed = results.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = results.borrow_and_update().clone();
                let update = PushMessage::new(PushKind::Update, latest.as_deref());
                let Some(msg) = update.to_message() else { continue };
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) if text.trim() == "ping" => {
                        if socket.send(Message::Text("pong".to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(other)) => debug!(?other, "Ignoring WebSocket message"),
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

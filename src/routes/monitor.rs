//! # routes::monitor
//!
//! Alert stream สำหรับ dashboard / on-call tooling
//!
//! | Method    | Path          | Description                         |
//! |-----------|---------------|-------------------------------------|
//! | GET (WS)  | `/ws/alerts`  | Real-time AlertEvent (JSON text)    |
//! | GET       | `/api/alerts` | Alert ล่าสุดที่เก็บไว้ใน memory      |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info};

use crate::state::SharedState;

/// Upgrade HTTP → WebSocket แล้ว subscribe alert broadcast
pub async fn ws_alerts(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.broadcast_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 Alert stream client connected");

    // ── Snapshot ปัจจุบันทันทีที่ต่อ ──────────────────────────────────────────
    let snapshot = json!({
        "type":      "snapshot",
        "health":    state.health_state(),
        "lastCycle": state.last_cycle_result().as_deref(),
    })
    .to_string();

    if sender.send(Message::Text(snapshot)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            result = rx.recv() => {
                match result {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Alert client lagged, skipped {n} events");
                    }
                    Err(_) => break,
                }
            }

            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("🔌 Alert stream client disconnected");
}

/// GET /api/alerts — ใหม่สุดก่อน
pub async fn list_alerts(State(state): State<SharedState>) -> impl IntoResponse {
    let mut alerts = state.recent_alerts.snapshot();
    alerts.reverse();
    Json(json!({
        "ok":     true,
        "count":  alerts.len(),
        "alerts": alerts,
    }))
}

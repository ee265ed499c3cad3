use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::warn;

use crate::state::{AppState, ConnectionSlot};
use crate::ws;

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

// ── WebSocket upgrade ───────────────────────────────────────────────────

pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(slot) = ConnectionSlot::reserve(&state) else {
        let current = state.connection_count.load(Ordering::Relaxed);
        warn!(current, "Connection limit reached, refusing upgrade");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    Ok(ws.on_upgrade(move |socket| ws::handle_socket(state, socket, slot)))
}

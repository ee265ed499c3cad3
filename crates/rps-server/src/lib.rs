pub mod config;
pub mod error;
pub mod queue;
pub mod registry;
pub mod routes;
pub mod session;
pub mod state;
pub mod ws;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::state::AppState;

pub use crate::error::EngineError;

/// Build a fully configured Router + shared state.
pub async fn build_app(config: ServerConfig) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(config));

    if let Some(timeout) = state.config.move_timeout {
        let state = state.clone();
        let every = state.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                expire_idle_sessions(&state, timeout).await;
            }
        });
    }

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/ws", get(routes::ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}

/// Terminate sessions whose open round has waited longer than `timeout`.
pub async fn expire_idle_sessions(state: &AppState, timeout: Duration) -> usize {
    let now = Instant::now();
    let mut expired = 0;

    for (_, handle) in state.registry.handles() {
        let mut session = handle.lock().await;
        if let Some(transition) = session.expire(now, timeout) {
            info!(session = %session.id(), "Session timed out waiting for moves");
            ws::deliver(state, &session, transition);
            expired += 1;
        }
    }

    expired
}

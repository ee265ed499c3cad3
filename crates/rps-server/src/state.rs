use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use rps_core::protocol::ServerMessage;

use crate::config::ServerConfig;
use crate::queue::MatchmakingQueue;
use crate::registry::SessionRegistry;

/// Handle to push messages to a connected WebSocket client.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Distinguishes successive connections that bound the same player id.
    pub conn_id: u64,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Shared application state.
pub struct AppState {
    pub config: ServerConfig,
    pub queue: MatchmakingQueue,
    pub registry: SessionRegistry,
    /// Live connections keyed by the player id they are bound to.
    pub connections: DashMap<String, ConnectionHandle>,
    pub connection_count: AtomicU32,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            queue: MatchmakingQueue::new(),
            registry: SessionRegistry::new(),
            connections: DashMap::new(),
            connection_count: AtomicU32::new(0),
        }
    }

    /// Push a message to a player's connection, if it is still open.
    pub fn send_to(&self, player_id: &str, msg: ServerMessage) {
        if let Some(conn) = self.connections.get(player_id) {
            let _ = conn.tx.send(msg);
        }
    }
}

/// One counted connection under `max_connections`. Released on drop, so an
/// upgrade that never completes gives its slot back.
pub struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    /// Reserve a slot, or `None` when the server is full.
    pub fn reserve(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.max_connections;
        state
            .connection_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(Self {
            state: state.clone(),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.connection_count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Generate a random 12-character uppercase alphanumeric session id.
pub fn generate_session_id() -> String {
    use rand::RngExt;
    let mut rng = rand::rng();
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..12)
        .map(|_| {
            let idx = rng.random_range(0..CHARS.len());
            CHARS[idx] as char
        })
        .collect()
}

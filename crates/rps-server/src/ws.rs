use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rps_core::protocol::{ClientMessage, ServerMessage};
use rps_core::{GameMode, Move, Side};

use crate::error::EngineError;
use crate::queue::{Pairing, QueueOutcome, Ticket};
use crate::registry::SessionHandle;
use crate::session::{Player, Session, Transition};
use crate::state::{AppState, ConnectionHandle, ConnectionSlot};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Per-socket state owned by the connection task.
struct Connection {
    id: u64,
    /// Set by the first `join_matchmaking`.
    player_id: Option<String>,
    tx: mpsc::UnboundedSender<ServerMessage>,
    message_count: u32,
    rate_limit_window: Instant,
}

impl Connection {
    fn send(&self, msg: ServerMessage) {
        let _ = self.tx.send(msg);
    }

    fn reject(&self, err: &EngineError) {
        match err {
            EngineError::InvalidTransition { status, .. } => {
                self.send(ServerMessage::MoveRejected {
                    reason: err.to_string(),
                    status: *status,
                });
            }
            _ => self.send(ServerMessage::Error {
                message: err.to_string(),
            }),
        }
    }
}

/// Top-level WebSocket handler -- spawned per connection. The slot is held
/// until the connection is torn down.
pub async fn handle_socket(state: Arc<AppState>, mut socket: WebSocket, _slot: ConnectionSlot) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut conn = Connection {
        id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
        player_id: None,
        tx,
        message_count: 0,
        rate_limit_window: Instant::now(),
    };
    debug!(conn = conn.id, "Connection opened");
    conn.send(ServerMessage::Connected);

    loop {
        tokio::select! {
            // Outbound: forward queued ServerMessage to the WebSocket.
            Some(msg) = rx.recv() => {
                if let Ok(json) = serde_json::to_string(&msg) {
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
            // Inbound: read from the WebSocket.
            maybe_msg = socket.recv() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        let now = Instant::now();
                        if now.duration_since(conn.rate_limit_window) > Duration::from_secs(1) {
                            conn.rate_limit_window = now;
                            conn.message_count = 0;
                        }
                        conn.message_count += 1;
                        if conn.message_count > state.config.rate_limit {
                            conn.send(ServerMessage::Error {
                                message: "Rate limited".into(),
                            });
                            continue;
                        }

                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                conn.send(ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                });
                                continue;
                            }
                        };

                        handle_message(&state, &mut conn, client_msg).await;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        break;
                    }
                    _ => continue,
                }
            }
        }
    }

    teardown(&state, &conn).await;
}

/// Dispatch a single client message.
async fn handle_message(state: &AppState, conn: &mut Connection, msg: ClientMessage) {
    match msg {
        ClientMessage::JoinMatchmaking {
            player_id,
            display_name,
            mode,
        } => join_matchmaking(state, conn, player_id, display_name, mode).await,

        ClientMessage::CancelMatchmaking => {
            let player_id = match conn.player_id.as_deref() {
                Some(id) => id,
                None => return,
            };
            match state.queue.cancel(player_id).await {
                Some(ticket) => {
                    info!(player = %player_id, mode = %ticket.mode, "Matchmaking cancelled");
                    conn.send(ServerMessage::MatchmakingCancelled);
                }
                None => {
                    debug!("{}", EngineError::QueueRaceLoss(player_id.to_string()));
                }
            }
        }

        ClientMessage::SubmitMove {
            session_id,
            player_id,
            player_move,
        } => {
            if let Err(e) = submit_move(state, conn, &session_id, &player_id, player_move).await {
                match e {
                    EngineError::InvalidTransition { .. } => {
                        debug!(session = %session_id, player = %player_id, "{}", e)
                    }
                    _ => warn!(conn = conn.id, "Move not applied: {}", e),
                }
                conn.reject(&e);
            }
        }

        ClientMessage::LeaveGame {
            session_id,
            player_id,
        } => {
            if let Err(e) = leave_game(state, conn, &session_id, &player_id).await {
                match e {
                    EngineError::InvalidTransition { .. } => {
                        debug!(session = %session_id, player = %player_id, "{}", e)
                    }
                    _ => warn!(conn = conn.id, "Leave not applied: {}", e),
                }
                conn.reject(&e);
            }
        }

        ClientMessage::Ping => conn.send(ServerMessage::Pong),
    }
}

async fn join_matchmaking(
    state: &AppState,
    conn: &mut Connection,
    player_id: String,
    display_name: String,
    mode: GameMode,
) {
    let display_name = match display_name.trim() {
        "" => player_id.clone(),
        name => name.to_string(),
    };

    if let Err(e) = bind_player(state, conn, &player_id, &display_name) {
        warn!(conn = conn.id, "Join rejected: {}", e);
        conn.reject(&e);
        return;
    }

    let ticket = Ticket::new(Player::new(player_id, display_name), mode);
    match state.queue.enqueue(ticket, &state.registry).await {
        Ok(QueueOutcome::Waiting) => conn.send(ServerMessage::WaitingForOpponent { mode }),
        Ok(QueueOutcome::Paired(pairing)) => announce_pairing(state, pairing),
        Err(e) => {
            warn!(conn = conn.id, "Join rejected: {}", e);
            conn.reject(&e);
        }
    }
}

/// Tie this connection to `player_id`. A player id can be bound by one live
/// connection only, and a connection never changes its player.
fn bind_player(
    state: &AppState,
    conn: &mut Connection,
    player_id: &str,
    display_name: &str,
) -> Result<(), EngineError> {
    if let Some(bound) = conn.player_id.as_deref() {
        if bound == player_id {
            return Ok(());
        }
        return Err(EngineError::UnknownPlayer(player_id.to_string()));
    }

    match state.connections.entry(player_id.to_string()) {
        Entry::Occupied(_) => Err(EngineError::PlayerConnected(player_id.to_string())),
        Entry::Vacant(slot) => {
            slot.insert(ConnectionHandle {
                conn_id: conn.id,
                tx: conn.tx.clone(),
            });
            conn.player_id = Some(player_id.to_string());
            info!(
                conn = conn.id,
                player = %player_id,
                name = %display_name,
                "Player bound to connection"
            );
            Ok(())
        }
    }
}

/// Send `game_found` to both seats. The pairing carries the session lock
/// taken inside the queue, and it is released only after both messages are
/// out, so no session event can overtake them.
fn announce_pairing(state: &AppState, pairing: Pairing) {
    for (me, opponent, side) in [
        (&pairing.a, &pairing.b, Side::A),
        (&pairing.b, &pairing.a, Side::B),
    ] {
        state.send_to(
            &me.id,
            ServerMessage::GameFound {
                session_id: pairing.session_id.clone(),
                opponent_name: opponent.display_name.clone(),
                mode: pairing.mode,
                player_number: side.number(),
            },
        );
    }
}

/// Resolve an inbound reference to a session the bound player sits in.
fn locate(
    state: &AppState,
    conn: &Connection,
    session_id: &str,
    player_id: &str,
) -> Result<SessionHandle, EngineError> {
    if conn.player_id.as_deref() != Some(player_id) {
        return Err(EngineError::UnknownPlayer(player_id.to_string()));
    }
    if state.registry.session_of(player_id).as_deref() != Some(session_id) {
        return Err(EngineError::UnknownSession(session_id.to_string()));
    }
    state
        .registry
        .get(session_id)
        .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))
}

async fn submit_move(
    state: &AppState,
    conn: &Connection,
    session_id: &str,
    player_id: &str,
    mv: Move,
) -> Result<(), EngineError> {
    let handle = locate(state, conn, session_id, player_id)?;
    let mut session = handle.lock().await;
    let side = session
        .seat_of(player_id)
        .ok_or_else(|| EngineError::UnknownPlayer(player_id.to_string()))?;
    let transition = ended_elsewhere(session.submit_move(side, mv)?)?;
    deliver(state, &session, transition);
    Ok(())
}

async fn leave_game(
    state: &AppState,
    conn: &Connection,
    session_id: &str,
    player_id: &str,
) -> Result<(), EngineError> {
    let handle = locate(state, conn, session_id, player_id)?;
    let mut session = handle.lock().await;
    let side = session
        .seat_of(player_id)
        .ok_or_else(|| EngineError::UnknownPlayer(player_id.to_string()))?;
    let transition = ended_elsewhere(session.leave(side))?;
    info!(session = %session_id, player = %player_id, "Player left game");
    deliver(state, &session, transition);
    Ok(())
}

/// A terminal session answers every call with an empty transition. The
/// caller still gets told the session is over.
fn ended_elsewhere(transition: Transition) -> Result<Transition, EngineError> {
    if transition.status.is_terminal() && transition.events.is_empty() {
        return Err(EngineError::invalid_transition(
            transition.status,
            "Session has already ended",
        ));
    }
    Ok(transition)
}

/// Publish a transition. Must be called with the session lock held so that
/// events of one session reach clients in transition order. Terminal sessions
/// leave the registry before anyone hears about it.
pub(crate) fn deliver(state: &AppState, session: &Session, transition: Transition) {
    if transition.status.is_terminal() && state.registry.remove(session.id()) {
        info!(
            session = %session.id(),
            status = %transition.status,
            reason = ?session.end_reason(),
            rounds = session.rounds().len(),
            "Session closed"
        );
    }
    for event in transition.events {
        state.send_to(&session.player(event.to).id, event.message);
    }
}

/// Transport closed: drop any waiting ticket, terminate any session.
async fn teardown(state: &AppState, conn: &Connection) {
    let player_id = match conn.player_id.as_deref() {
        Some(id) => id,
        None => {
            debug!(conn = conn.id, "Unbound connection closed");
            return;
        }
    };

    // Cancel first: once the ticket is gone no new pairing can seat this player.
    if state.queue.cancel(player_id).await.is_some() {
        info!(player = %player_id, "Dropped waiting ticket of disconnected player");
    }

    let handle = state
        .registry
        .session_of(player_id)
        .and_then(|sid| state.registry.get(&sid));
    if let Some(handle) = handle {
        let mut session = handle.lock().await;
        if let Some(side) = session.seat_of(player_id) {
            let transition = session.disconnect(side);
            info!(session = %session.id(), player = %player_id, "Player disconnected mid-game");
            deliver(state, &session, transition);
        }
    }

    state
        .connections
        .remove_if(player_id, |_, c| c.conn_id == conn.id);
    info!(conn = conn.id, player = %player_id, "Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use rps_core::SessionStatus;

    fn connect(
        state: &AppState,
        player_id: &str,
    ) -> (Connection, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut conn = Connection {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            player_id: None,
            tx,
            message_count: 0,
            rate_limit_window: Instant::now(),
        };
        bind_player(state, &mut conn, player_id, player_id).unwrap();
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    async fn pair(state: &AppState) -> Pairing {
        for id in ["alice", "bob"] {
            let ticket = Ticket::new(Player::new(id, id), GameMode::QuickPlay);
            if let QueueOutcome::Paired(pairing) =
                state.queue.enqueue(ticket, &state.registry).await.unwrap()
            {
                return pairing;
            }
        }
        panic!("alice and bob were not paired");
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn game_found_precedes_disconnect_during_pairing() {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        let (alice, _alice_rx) = connect(&state, "alice");
        let (_bob, mut bob_rx) = connect(&state, "bob");

        let pairing = pair(&state).await;
        let session_id = pairing.session_id.clone();

        // Alice's socket closes before the pairing is announced.
        let closing = {
            let state = state.clone();
            tokio::spawn(async move { teardown(&state, &alice).await })
        };
        settle().await;
        assert_eq!(state.registry.len(), 1);

        announce_pairing(&state, pairing);
        closing.await.unwrap();

        let to_bob = drain(&mut bob_rx);
        assert_eq!(to_bob.len(), 2);
        assert!(matches!(
            &to_bob[0],
            ServerMessage::GameFound { session_id: id, player_number: 2, .. } if *id == session_id
        ));
        assert_eq!(to_bob[1], ServerMessage::OpponentDisconnected);
        assert!(state.registry.is_empty());
        assert_eq!(state.registry.session_of("bob"), None);
    }

    #[tokio::test]
    async fn move_into_session_ended_meanwhile_reports_status() {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        let (mut alice, mut alice_rx) = connect(&state, "alice");
        let (_bob, mut bob_rx) = connect(&state, "bob");

        let pairing = pair(&state).await;
        let session_id = pairing.session_id.clone();
        announce_pairing(&state, pairing);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        // Alice's move waits on the session while Bob leaves.
        let handle = state.registry.get(&session_id).unwrap();
        let mut session = handle.lock().await;
        let submitting = {
            let state = state.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                let msg = ClientMessage::SubmitMove {
                    session_id,
                    player_id: "alice".into(),
                    player_move: Move::Rock,
                };
                handle_message(&state, &mut alice, msg).await;
            })
        };
        settle().await;

        let transition = session.leave(Side::B);
        deliver(&state, &session, transition);
        drop(session);
        submitting.await.unwrap();

        let to_alice = drain(&mut alice_rx);
        assert_eq!(to_alice.len(), 2);
        assert_eq!(to_alice[0], ServerMessage::OpponentLeft);
        assert!(matches!(
            &to_alice[1],
            ServerMessage::MoveRejected { status: SessionStatus::Terminated, .. }
        ));
        assert!(drain(&mut bob_rx).is_empty());
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn leave_of_ended_session_is_not_applied_twice() {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        let (alice, mut alice_rx) = connect(&state, "alice");
        let (_bob, mut bob_rx) = connect(&state, "bob");

        let pairing = pair(&state).await;
        let session_id = pairing.session_id.clone();
        announce_pairing(&state, pairing);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let handle = state.registry.get(&session_id).unwrap();
        let mut session = handle.lock().await;
        let leaving = {
            let state = state.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move { leave_game(&state, &alice, &session_id, "alice").await })
        };
        settle().await;

        let transition = session.disconnect(Side::B);
        deliver(&state, &session, transition);
        drop(session);

        let err = leaving.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition { status: SessionStatus::Terminated, .. }
        ));
        assert_eq!(drain(&mut alice_rx), vec![ServerMessage::OpponentDisconnected]);
        assert!(drain(&mut bob_rx).is_empty());
    }
}

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use rps_core::GameMode;

use crate::error::EngineError;
use crate::registry::SessionRegistry;
use crate::session::{Player, Session};
use crate::state::generate_session_id;

const MAX_ID_ATTEMPTS: usize = 8;

/// A queued request to be matched with an opponent.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub player: Player,
    pub mode: GameMode,
    pub enqueued_at: Instant,
}

impl Ticket {
    pub fn new(player: Player, mode: GameMode) -> Self {
        Self {
            player,
            mode,
            enqueued_at: Instant::now(),
        }
    }
}

/// Two tickets folded into a registered session.
#[derive(Debug)]
pub struct Pairing {
    pub session_id: String,
    pub mode: GameMode,
    /// Longer-waiting player, seat A.
    pub a: Player,
    /// Player whose ticket completed the pair, seat B.
    pub b: Player,
    /// Lock on the new session, taken before the queue lock is released.
    /// Nothing else can touch the session until the pairing is dropped.
    pub session: OwnedMutexGuard<Session>,
}

#[derive(Debug)]
pub enum QueueOutcome {
    Waiting,
    Paired(Pairing),
}

/// FIFO matchmaking, one queue per mode.
#[derive(Default)]
pub struct MatchmakingQueue {
    queues: Mutex<HashMap<GameMode, VecDeque<Ticket>>>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a ticket, or pair it with the longest-waiting ticket of the same
    /// mode. Ticket removal, session creation and registration happen under
    /// the queue lock, so a ticket is paired at most once. A returned pairing
    /// still holds the session lock.
    pub async fn enqueue(
        &self,
        ticket: Ticket,
        registry: &SessionRegistry,
    ) -> Result<QueueOutcome, EngineError> {
        let mut queues = self.queues.lock().await;
        let player_id = ticket.player.id.clone();

        let already_queued = queues
            .values()
            .any(|q| q.iter().any(|t| t.player.id == player_id));
        if already_queued || registry.session_of(&player_id).is_some() {
            return Err(EngineError::AlreadyEngaged(player_id));
        }

        let queue = queues.entry(ticket.mode).or_default();
        let opponent = match queue.pop_front() {
            Some(t) => t,
            None => {
                debug!(player = %player_id, mode = %ticket.mode, "Ticket queued");
                queue.push_back(ticket);
                return Ok(QueueOutcome::Waiting);
            }
        };

        let mode = ticket.mode;
        let mut attempts = 0;
        let (session_id, session) = loop {
            attempts += 1;
            let session_id = generate_session_id();
            let session = Session::new(
                session_id.clone(),
                mode,
                opponent.player.clone(),
                ticket.player.clone(),
            );
            match registry.insert(session) {
                Ok(handle) => break (session_id, handle.lock_owned().await),
                Err(EngineError::SessionIdConflict(_)) if attempts < MAX_ID_ATTEMPTS => continue,
                Err(e) => {
                    // Leave the waiting ticket where it was.
                    queue.push_front(opponent);
                    return Err(e);
                }
            }
        };

        info!(
            session = %session_id,
            %mode,
            a = %opponent.player.id,
            b = %ticket.player.id,
            waited_ms = opponent.enqueued_at.elapsed().as_millis() as u64,
            "Players paired"
        );

        Ok(QueueOutcome::Paired(Pairing {
            session_id,
            mode,
            a: opponent.player,
            b: ticket.player,
            session,
        }))
    }

    /// Withdraw a waiting ticket. Returns `None` when there is nothing to
    /// withdraw, which includes losing the race against a pairing.
    pub async fn cancel(&self, player_id: &str) -> Option<Ticket> {
        let mut queues = self.queues.lock().await;
        for queue in queues.values_mut() {
            if let Some(pos) = queue.iter().position(|t| t.player.id == player_id) {
                return queue.remove(pos);
            }
        }
        None
    }

    pub async fn is_queued(&self, player_id: &str) -> bool {
        let queues = self.queues.lock().await;
        queues
            .values()
            .any(|q| q.iter().any(|t| t.player.id == player_id))
    }

    /// Number of waiting tickets across all modes.
    pub async fn len(&self) -> usize {
        let queues = self.queues.lock().await;
        queues.values().map(VecDeque::len).sum()
    }
}

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::EngineError;
use crate::session::Session;

/// A live session. Every state transition goes through its lock.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Seated player ids are kept beside the handle so cleanup never needs the
/// session lock.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub handle: SessionHandle,
    pub player_ids: [String; 2],
}

/// Process-wide index of active sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    by_player: DashMap<String, String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly paired session. Fails if either player is already
    /// mapped to a live session or the id is taken.
    pub fn insert(&self, session: Session) -> Result<SessionHandle, EngineError> {
        let id = session.id().to_string();
        let player_ids = [session.players()[0].id.clone(), session.players()[1].id.clone()];

        for player_id in &player_ids {
            if self.by_player.contains_key(player_id) {
                return Err(EngineError::AlreadyEngaged(player_id.clone()));
            }
        }

        let handle = Arc::new(Mutex::new(session));
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => return Err(EngineError::SessionIdConflict(id)),
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry {
                    handle: handle.clone(),
                    player_ids: player_ids.clone(),
                });
            }
        }
        for player_id in player_ids {
            self.by_player.insert(player_id, id.clone());
        }

        debug!(session = %id, "Session registered");
        Ok(handle)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|e| e.handle.clone())
    }

    /// The session a player is currently seated in.
    pub fn session_of(&self, player_id: &str) -> Option<String> {
        self.by_player.get(player_id).map(|id| id.value().clone())
    }

    /// Drop a session that reached a terminal state. Player entries are only
    /// cleared while they still point at this session.
    pub fn remove(&self, session_id: &str) -> bool {
        let Some((_, entry)) = self.sessions.remove(session_id) else {
            return false;
        };
        for player_id in &entry.player_ids {
            self.by_player.remove_if(player_id, |_, sid| sid == session_id);
        }
        debug!(session = %session_id, "Session removed");
        true
    }

    /// Snapshot of all live sessions, for sweeps that must not hold map guards.
    pub fn handles(&self) -> Vec<(String, SessionHandle)> {
        self.sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().handle.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

use rps_core::SessionStatus;

/// Failures local to one connection, ticket or session. None of them are fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{reason} (session is {status})")]
    InvalidTransition {
        status: SessionStatus,
        reason: &'static str,
    },

    #[error("Game not found: {0}")]
    UnknownSession(String),

    #[error("Unknown player: {0}")]
    UnknownPlayer(String),

    #[error("Player {0} is already queued or in a game")]
    AlreadyEngaged(String),

    #[error("Player {0} is already connected")]
    PlayerConnected(String),

    #[error("Ticket for {0} was already paired")]
    QueueRaceLoss(String),

    #[error("Session id {0} is already registered")]
    SessionIdConflict(String),
}

impl EngineError {
    pub fn invalid_transition(status: SessionStatus, reason: &'static str) -> Self {
        EngineError::InvalidTransition { status, reason }
    }
}

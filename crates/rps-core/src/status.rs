use std::fmt;

use serde::{Deserialize, Serialize};

/// Session lifecycle: `AwaitingMoves -> Resolving -> AwaitingMoves ... -> Finished`,
/// or `Terminated` from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    AwaitingMoves,
    Resolving,
    Finished,
    Terminated,
}

impl SessionStatus {
    pub fn label(&self) -> &str {
        match self {
            SessionStatus::AwaitingMoves => "awaiting_moves",
            SessionStatus::Resolving => "resolving",
            SessionStatus::Finished => "finished",
            SessionStatus::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Finished | SessionStatus::Terminated)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

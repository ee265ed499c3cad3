use serde::{Deserialize, Serialize};

use crate::mode::GameMode;
use crate::moves::Move;
use crate::status::SessionStatus;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinMatchmaking {
        player_id: String,
        display_name: String,
        #[serde(default)]
        mode: GameMode,
    },
    CancelMatchmaking,
    SubmitMove {
        session_id: String,
        player_id: String,
        #[serde(rename = "move")]
        player_move: Move,
    },
    LeaveGame {
        session_id: String,
        player_id: String,
    },
    Ping,
}

/// Round winner from the receiving player's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundWinner {
    You,
    Opponent,
    Tie,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    Won,
    Lost,
    Draw,
}

/// Scores from the receiving player's point of view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub you: u32,
    pub opponent: u32,
    pub ties: u32,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake acknowledgement, sent once per connection.
    Connected,
    WaitingForOpponent {
        mode: GameMode,
    },
    MatchmakingCancelled,
    GameFound {
        session_id: String,
        opponent_name: String,
        mode: GameMode,
        player_number: u8,
    },
    /// Sent to the submitter only.
    MoveSubmitted {
        round_number: u32,
    },
    MoveRejected {
        reason: String,
        status: SessionStatus,
    },
    RoundResult {
        round_number: u32,
        winner: RoundWinner,
        your_move: Move,
        opponent_move: Move,
        scores: Scores,
        match_finished: bool,
    },
    MatchComplete {
        result: MatchResult,
        your_score: u32,
        opponent_score: u32,
        rounds_played: u32,
    },
    OpponentDisconnected,
    OpponentLeft,
    /// The pending round stayed open past the server's move timeout.
    MatchTimedOut,
    Error {
        message: String,
    },
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_use_snake_case_tags() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "submit_move",
            "session_id": "ABC",
            "player_id": "p1",
            "move": "rock"
        }))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubmitMove {
                session_id: "ABC".into(),
                player_id: "p1".into(),
                player_move: Move::Rock,
            }
        );

        let cancel: ClientMessage =
            serde_json::from_value(json!({ "type": "cancel_matchmaking" })).unwrap();
        assert_eq!(cancel, ClientMessage::CancelMatchmaking);
    }

    #[test]
    fn join_defaults_to_quick_play() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "join_matchmaking",
            "player_id": "p1",
            "display_name": "Alice"
        }))
        .unwrap();
        match msg {
            ClientMessage::JoinMatchmaking { mode, .. } => assert_eq!(mode, GameMode::QuickPlay),
            other => panic!("unexpected {other:?}"),
        }

        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "join_matchmaking",
            "player_id": "p1",
            "display_name": "Alice",
            "mode": "best_of_5"
        }))
        .unwrap();
        match msg {
            ClientMessage::JoinMatchmaking { mode, .. } => assert_eq!(mode, GameMode::BestOf5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_move_is_rejected() {
        let parsed = serde_json::from_value::<ClientMessage>(json!({
            "type": "submit_move",
            "session_id": "ABC",
            "player_id": "p1",
            "move": "lizard"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn move_is_case_insensitive_on_the_wire() {
        for raw in ["Rock", "ROCK", " rock "] {
            let msg: ClientMessage = serde_json::from_value(json!({
                "type": "submit_move",
                "session_id": "ABC",
                "player_id": "p1",
                "move": raw
            }))
            .unwrap();
            match msg {
                ClientMessage::SubmitMove { player_move, .. } => {
                    assert_eq!(player_move, Move::Rock)
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(serde_json::to_value(Move::Scissors).unwrap(), json!("scissors"));
    }

    #[test]
    fn round_result_shape() {
        let msg = ServerMessage::RoundResult {
            round_number: 1,
            winner: RoundWinner::You,
            your_move: Move::Rock,
            opponent_move: Move::Scissors,
            scores: Scores { you: 1, opponent: 0, ties: 0 },
            match_finished: true,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "round_result",
                "round_number": 1,
                "winner": "you",
                "your_move": "rock",
                "opponent_move": "scissors",
                "scores": { "you": 1, "opponent": 0, "ties": 0 },
                "match_finished": true
            })
        );
    }

    #[test]
    fn unit_variants_serialize_as_bare_tags() {
        let value = serde_json::to_value(ServerMessage::OpponentDisconnected).unwrap();
        assert_eq!(value, json!({ "type": "opponent_disconnected" }));

        let value = serde_json::to_value(ServerMessage::MoveRejected {
            reason: "already submitted".into(),
            status: SessionStatus::AwaitingMoves,
        })
        .unwrap();
        assert_eq!(value["status"], "awaiting_moves");
    }
}

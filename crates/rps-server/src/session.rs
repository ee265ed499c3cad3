use std::time::{Duration, Instant};

use tracing::debug;

use rps_core::protocol::{MatchResult, RoundWinner, Scores, ServerMessage};
use rps_core::{GameMode, Move, Outcome, Score, SessionStatus, Side, resolve};

use crate::error::EngineError;

/// A player seated in a session. The connection itself lives in the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: String,
    pub display_name: String,
}

impl Player {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// The round currently collecting moves.
#[derive(Debug, Clone)]
pub struct PendingRound {
    pub number: u32,
    pub moves: [Option<Move>; 2],
    pub opened_at: Instant,
}

impl PendingRound {
    fn new(number: u32) -> Self {
        Self {
            number,
            moves: [None, None],
            opened_at: Instant::now(),
        }
    }
}

/// A resolved round. Never modified after it enters the log.
#[derive(Debug, Clone)]
pub struct Round {
    pub number: u32,
    pub move_a: Move,
    pub move_b: Move,
    pub outcome: Outcome,
    pub resolved_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Left(Side),
    Disconnected(Side),
    TimedOut,
}

/// A message addressed to one seat of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: Side,
    pub message: ServerMessage,
}

/// What an operation did to a session: the status it left behind and the
/// messages to deliver, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub status: SessionStatus,
    pub events: Vec<Outbound>,
}

impl Transition {
    fn quiet(status: SessionStatus) -> Self {
        Self {
            status,
            events: Vec::new(),
        }
    }
}

/// One paired match between two players.
#[derive(Debug)]
pub struct Session {
    id: String,
    mode: GameMode,
    players: [Player; 2],
    pending: Option<PendingRound>,
    rounds: Vec<Round>,
    score: Score,
    status: SessionStatus,
    end_reason: Option<EndReason>,
}

impl Session {
    /// `a` is the longer-waiting player.
    pub fn new(id: String, mode: GameMode, a: Player, b: Player) -> Self {
        Self {
            id,
            mode,
            players: [a, b],
            pending: Some(PendingRound::new(1)),
            rounds: Vec::new(),
            score: Score::default(),
            status: SessionStatus::AwaitingMoves,
            end_reason: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn score(&self) -> Score {
        self.score
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub fn pending(&self) -> Option<&PendingRound> {
        self.pending.as_ref()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn player(&self, side: Side) -> &Player {
        &self.players[side.index()]
    }

    pub fn players(&self) -> &[Player; 2] {
        &self.players
    }

    pub fn seat_of(&self, player_id: &str) -> Option<Side> {
        if self.players[0].id == player_id {
            Some(Side::A)
        } else if self.players[1].id == player_id {
            Some(Side::B)
        } else {
            None
        }
    }

    /// Record a move for `side`. Resolves the round once both moves are in.
    pub fn submit_move(&mut self, side: Side, mv: Move) -> Result<Transition, EngineError> {
        if self.status.is_terminal() {
            return Ok(Transition::quiet(self.status));
        }
        if self.status != SessionStatus::AwaitingMoves {
            return Err(EngineError::invalid_transition(
                self.status,
                "Moves are not being accepted",
            ));
        }
        let pending = match self.pending.as_mut() {
            Some(p) => p,
            None => {
                return Err(EngineError::invalid_transition(
                    self.status,
                    "No round is open",
                ));
            }
        };
        if pending.moves[side.index()].is_some() {
            return Err(EngineError::invalid_transition(
                self.status,
                "Move already submitted for this round",
            ));
        }

        pending.moves[side.index()] = Some(mv);
        let round_number = pending.number;
        let both_in = pending.moves.iter().all(Option::is_some);

        let mut events = vec![Outbound {
            to: side,
            message: ServerMessage::MoveSubmitted { round_number },
        }];

        if both_in {
            self.status = SessionStatus::Resolving;
            self.resolve_pending(&mut events);
        }

        Ok(Transition {
            status: self.status,
            events,
        })
    }

    fn resolve_pending(&mut self, events: &mut Vec<Outbound>) {
        let pending = match self.pending.take() {
            Some(p) => p,
            None => return,
        };
        let (move_a, move_b) = match pending.moves {
            [Some(a), Some(b)] => (a, b),
            _ => {
                self.pending = Some(pending);
                self.status = SessionStatus::AwaitingMoves;
                return;
            }
        };

        let outcome = resolve(move_a, move_b);
        self.score.record(outcome);
        self.rounds.push(Round {
            number: pending.number,
            move_a,
            move_b,
            outcome,
            resolved_at: Instant::now(),
        });

        let finished = self.mode.is_match_finished(&self.score);
        debug!(
            session = %self.id,
            round = pending.number,
            ?outcome,
            a = self.score.a,
            b = self.score.b,
            finished,
            "Round resolved"
        );

        for side in [Side::A, Side::B] {
            let message =
                self.round_result_for(side, pending.number, move_a, move_b, outcome, finished);
            events.push(Outbound { to: side, message });
        }

        if finished {
            self.status = SessionStatus::Finished;
            let winner = self.mode.winner(&self.score);
            for side in [Side::A, Side::B] {
                let result = match winner {
                    Some(w) if w == side => MatchResult::Won,
                    Some(_) => MatchResult::Lost,
                    None => MatchResult::Draw,
                };
                events.push(Outbound {
                    to: side,
                    message: ServerMessage::MatchComplete {
                        result,
                        your_score: self.score.wins(side),
                        opponent_score: self.score.wins(side.opponent()),
                        rounds_played: self.rounds.len() as u32,
                    },
                });
            }
        } else {
            self.status = SessionStatus::AwaitingMoves;
            self.pending = Some(PendingRound::new(pending.number + 1));
        }
    }

    fn round_result_for(
        &self,
        side: Side,
        round_number: u32,
        move_a: Move,
        move_b: Move,
        outcome: Outcome,
        finished: bool,
    ) -> ServerMessage {
        let (your_move, opponent_move) = match side {
            Side::A => (move_a, move_b),
            Side::B => (move_b, move_a),
        };
        let winner = match outcome.winner() {
            Some(w) if w == side => RoundWinner::You,
            Some(_) => RoundWinner::Opponent,
            None => RoundWinner::Tie,
        };
        ServerMessage::RoundResult {
            round_number,
            winner,
            your_move,
            opponent_move,
            scores: Scores {
                you: self.score.wins(side),
                opponent: self.score.wins(side.opponent()),
                ties: self.score.ties,
            },
            match_finished: finished,
        }
    }

    /// Explicit leave. The remaining player is told the opponent left.
    pub fn leave(&mut self, side: Side) -> Transition {
        self.terminate(EndReason::Left(side))
    }

    /// Transport closed under `side`.
    pub fn disconnect(&mut self, side: Side) -> Transition {
        self.terminate(EndReason::Disconnected(side))
    }

    /// Terminate the session if its open round has waited longer than `timeout`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Option<Transition> {
        if self.status != SessionStatus::AwaitingMoves {
            return None;
        }
        let opened_at = self.pending.as_ref()?.opened_at;
        if now.saturating_duration_since(opened_at) < timeout {
            return None;
        }
        Some(self.terminate(EndReason::TimedOut))
    }

    fn terminate(&mut self, reason: EndReason) -> Transition {
        if self.status.is_terminal() {
            return Transition::quiet(self.status);
        }

        self.status = SessionStatus::Terminated;
        self.end_reason = Some(reason);
        self.pending = None;
        debug!(session = %self.id, ?reason, "Session terminated");

        let events = match reason {
            EndReason::Left(side) => vec![Outbound {
                to: side.opponent(),
                message: ServerMessage::OpponentLeft,
            }],
            EndReason::Disconnected(side) => vec![Outbound {
                to: side.opponent(),
                message: ServerMessage::OpponentDisconnected,
            }],
            EndReason::TimedOut => [Side::A, Side::B]
                .into_iter()
                .map(|to| Outbound {
                    to,
                    message: ServerMessage::MatchTimedOut,
                })
                .collect(),
        };

        Transition {
            status: self.status,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(mode: GameMode) -> Session {
        Session::new(
            "TEST".to_string(),
            mode,
            Player::new("alice", "Alice"),
            Player::new("bob", "Bob"),
        )
    }

    fn play_round(s: &mut Session, a: Move, b: Move) -> Transition {
        s.submit_move(Side::A, a).unwrap();
        s.submit_move(Side::B, b).unwrap()
    }

    fn messages_to(t: &Transition, side: Side) -> Vec<&ServerMessage> {
        t.events
            .iter()
            .filter(|e| e.to == side)
            .map(|e| &e.message)
            .collect()
    }

    #[test]
    fn quick_play_rock_beats_scissors() {
        let mut s = session(GameMode::QuickPlay);
        let first = s.submit_move(Side::A, Move::Rock).unwrap();
        assert_eq!(first.status, SessionStatus::AwaitingMoves);
        assert_eq!(
            first.events,
            vec![Outbound {
                to: Side::A,
                message: ServerMessage::MoveSubmitted { round_number: 1 },
            }]
        );

        let t = s.submit_move(Side::B, Move::Scissors).unwrap();
        assert_eq!(t.status, SessionStatus::Finished);
        assert_eq!(s.score(), Score { a: 1, b: 0, ties: 0 });

        let to_a = messages_to(&t, Side::A);
        assert_eq!(
            to_a[0],
            &ServerMessage::RoundResult {
                round_number: 1,
                winner: RoundWinner::You,
                your_move: Move::Rock,
                opponent_move: Move::Scissors,
                scores: Scores { you: 1, opponent: 0, ties: 0 },
                match_finished: true,
            }
        );
        assert!(matches!(
            to_a[1],
            ServerMessage::MatchComplete { result: MatchResult::Won, your_score: 1, .. }
        ));

        let to_b = messages_to(&t, Side::B);
        // B also receives its own MoveSubmitted ack first.
        assert!(matches!(to_b[0], ServerMessage::MoveSubmitted { round_number: 1 }));
        assert!(matches!(
            to_b[1],
            ServerMessage::RoundResult { winner: RoundWinner::Opponent, match_finished: true, .. }
        ));
        assert!(matches!(
            to_b[2],
            ServerMessage::MatchComplete { result: MatchResult::Lost, .. }
        ));
    }

    #[test]
    fn quick_play_tie_ends_as_draw() {
        let mut s = session(GameMode::QuickPlay);
        let t = play_round(&mut s, Move::Paper, Move::Paper);
        assert_eq!(t.status, SessionStatus::Finished);
        assert!(t.events.iter().any(|e| matches!(
            e.message,
            ServerMessage::MatchComplete { result: MatchResult::Draw, .. }
        )));
    }

    #[test]
    fn best_of_three_scenario() {
        let mut s = session(GameMode::BestOf3);

        let t = play_round(&mut s, Move::Rock, Move::Rock);
        assert_eq!(t.status, SessionStatus::AwaitingMoves);
        assert_eq!(s.pending().map(|p| p.number), Some(2));

        let t = play_round(&mut s, Move::Paper, Move::Rock);
        assert_eq!(t.status, SessionStatus::AwaitingMoves);

        let t = play_round(&mut s, Move::Scissors, Move::Paper);
        assert_eq!(t.status, SessionStatus::Finished);
        assert_eq!(s.score(), Score { a: 2, b: 0, ties: 1 });
        assert_eq!(s.rounds().len(), 3);
        assert_eq!(s.rounds()[0].outcome, Outcome::Tie);
        assert!(s.pending().is_none());
    }

    #[test]
    fn duplicate_submission_is_rejected_without_overwrite() {
        let mut s = session(GameMode::BestOf3);
        s.submit_move(Side::A, Move::Rock).unwrap();

        let err = s.submit_move(Side::A, Move::Paper).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTransition {
                status: SessionStatus::AwaitingMoves,
                reason: "Move already submitted for this round",
            }
        );

        s.submit_move(Side::B, Move::Scissors).unwrap();
        assert_eq!(s.rounds()[0].move_a, Move::Rock);
        assert_eq!(s.rounds()[0].outcome, Outcome::AWins);
    }

    #[test]
    fn each_move_feeds_exactly_one_round() {
        let mut s = session(GameMode::Endless);
        for i in 0..5 {
            s.submit_move(Side::A, Move::Rock).unwrap();
            assert_eq!(s.rounds().len(), i);
            s.submit_move(Side::B, Move::Paper).unwrap();
            assert_eq!(s.rounds().len(), i + 1);
        }
        assert_eq!(s.score(), Score { a: 0, b: 5, ties: 0 });
        assert_eq!(s.status(), SessionStatus::AwaitingMoves);
    }

    #[test]
    fn disconnect_with_pending_move_terminates_without_result() {
        let mut s = session(GameMode::QuickPlay);
        s.submit_move(Side::A, Move::Rock).unwrap();

        let t = s.disconnect(Side::B);
        assert_eq!(t.status, SessionStatus::Terminated);
        assert_eq!(
            t.events,
            vec![Outbound {
                to: Side::A,
                message: ServerMessage::OpponentDisconnected,
            }]
        );
        assert!(s.rounds().is_empty());
        assert_eq!(s.end_reason(), Some(EndReason::Disconnected(Side::B)));
    }

    #[test]
    fn leave_notifies_remaining_player() {
        let mut s = session(GameMode::BestOf5);
        let t = s.leave(Side::A);
        assert_eq!(t.status, SessionStatus::Terminated);
        assert_eq!(t.events.len(), 1);
        assert_eq!(t.events[0].to, Side::B);
        assert_eq!(t.events[0].message, ServerMessage::OpponentLeft);
    }

    #[test]
    fn terminal_sessions_ignore_further_calls() {
        let mut s = session(GameMode::QuickPlay);
        play_round(&mut s, Move::Rock, Move::Scissors);
        let score = s.score();

        let t = s.submit_move(Side::A, Move::Paper).unwrap();
        assert_eq!(t, Transition::quiet(SessionStatus::Finished));
        assert_eq!(s.leave(Side::B), Transition::quiet(SessionStatus::Finished));
        assert_eq!(s.disconnect(Side::A), Transition::quiet(SessionStatus::Finished));
        assert_eq!(s.score(), score);
        assert_eq!(s.rounds().len(), 1);

        let mut s = session(GameMode::Endless);
        s.leave(Side::A);
        let t = s.submit_move(Side::B, Move::Rock).unwrap();
        assert_eq!(t.status, SessionStatus::Terminated);
        assert!(t.events.is_empty());
        assert!(s.rounds().is_empty());
        assert_eq!(s.end_reason(), Some(EndReason::Left(Side::A)));
    }

    #[test]
    fn expire_only_after_timeout() {
        let mut s = session(GameMode::BestOf3);
        let opened = s.pending().unwrap().opened_at;

        assert!(s.expire(opened, Duration::from_secs(60)).is_none());
        assert_eq!(s.status(), SessionStatus::AwaitingMoves);

        let later = opened + Duration::from_secs(61);
        let t = s.expire(later, Duration::from_secs(60)).unwrap();
        assert_eq!(t.status, SessionStatus::Terminated);
        assert_eq!(messages_to(&t, Side::A), vec![&ServerMessage::MatchTimedOut]);
        assert_eq!(messages_to(&t, Side::B), vec![&ServerMessage::MatchTimedOut]);

        assert!(s.expire(later, Duration::from_secs(60)).is_none());
    }

    #[test]
    fn seats_by_player_id() {
        let s = session(GameMode::QuickPlay);
        assert_eq!(s.seat_of("alice"), Some(Side::A));
        assert_eq!(s.seat_of("bob"), Some(Side::B));
        assert_eq!(s.seat_of("carol"), None);
        assert_eq!(s.player(Side::B).display_name, "Bob");
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::moves::{Outcome, Side};

/// Match-length policy chosen when joining the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    #[default]
    #[serde(rename = "quick_play")]
    QuickPlay,
    #[serde(rename = "best_of_3")]
    BestOf3,
    #[serde(rename = "best_of_5")]
    BestOf5,
    #[serde(rename = "best_of_7")]
    BestOf7,
    #[serde(rename = "endless")]
    Endless,
}

impl GameMode {
    pub fn label(&self) -> &str {
        match self {
            GameMode::QuickPlay => "quick_play",
            GameMode::BestOf3 => "best_of_3",
            GameMode::BestOf5 => "best_of_5",
            GameMode::BestOf7 => "best_of_7",
            GameMode::Endless => "endless",
        }
    }

    pub fn all() -> &'static [GameMode] {
        &[
            GameMode::QuickPlay,
            GameMode::BestOf3,
            GameMode::BestOf5,
            GameMode::BestOf7,
            GameMode::Endless,
        ]
    }

    /// Round wins a side needs to take the match, `None` for endless play.
    /// Quick play ends after one round regardless, so its threshold is 1.
    pub fn wins_needed(&self) -> Option<u32> {
        match self {
            GameMode::QuickPlay => Some(1),
            GameMode::BestOf3 => Some(2),
            GameMode::BestOf5 => Some(3),
            GameMode::BestOf7 => Some(4),
            GameMode::Endless => None,
        }
    }

    pub fn is_match_finished(&self, score: &Score) -> bool {
        match self {
            GameMode::QuickPlay => score.rounds() >= 1,
            GameMode::Endless => false,
            _ => match self.wins_needed() {
                Some(needed) => score.a >= needed || score.b >= needed,
                None => false,
            },
        }
    }

    /// Winner of the match, if it is over and was not drawn.
    pub fn winner(&self, score: &Score) -> Option<Side> {
        if !self.is_match_finished(score) {
            return None;
        }
        if score.a > score.b {
            Some(Side::A)
        } else if score.b > score.a {
            Some(Side::B)
        } else {
            None
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Running tally of a session. Ties never count toward a side's wins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub a: u32,
    pub b: u32,
    pub ties: u32,
}

impl Score {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::AWins => self.a += 1,
            Outcome::BWins => self.b += 1,
            Outcome::Tie => self.ties += 1,
        }
    }

    pub fn wins(&self, side: Side) -> u32 {
        match side {
            Side::A => self.a,
            Side::B => self.b,
        }
    }

    pub fn rounds(&self) -> u32 {
        self.a + self.b + self.ties
    }
}

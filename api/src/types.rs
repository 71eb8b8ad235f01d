use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::{GameError, GameResult};

/// A snapshot of one match's game state.
///
/// The value is immutable: [`crate::engine::GameModule::apply_action`]
/// returns a fresh state rather than mutating its input.  `data` holds the
/// game-specific payload as a borsh blob, so identical states always have
/// identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub game_id: String,
    pub players: Vec<String>,
    pub current_player: String,
    pub turn_number: u32,
    pub data: Vec<u8>,
}

impl GameState {
    pub fn data<S: BorshDeserialize>(&self) -> GameResult<S> {
        S::try_from_slice(&self.data).or(Err(GameError::MalformedStatePayload))
    }

    /// Produce the successor state: new payload, next player to move,
    /// turn counter bumped.
    pub fn advance<S: BorshSerialize>(&self, data: &S, next_player: &str) -> GameResult<Self> {
        Ok(Self {
            game_id: self.game_id.clone(),
            players: self.players.clone(),
            current_player: next_player.to_owned(),
            turn_number: self.turn_number + 1,
            data: borsh::to_vec(data).or(Err(GameError::SerializationError))?,
        })
    }

    pub fn has_player(&self, player: &str) -> bool {
        self.players.iter().any(|p| p == player)
    }
}

/// A client-submitted action.  `data` keeps the raw JSON payload exactly as
/// received, so persisting and replaying an action is byte-stable.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
}

impl Action {
    pub fn new(kind: &str, data: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            data: data.to_owned(),
        }
    }

    pub fn data<'a, S: Deserialize<'a>>(&'a self) -> GameResult<S> {
        serde_json::from_str(&self.data).or(Err(GameError::MalformedActionPayload))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind, self.data)
    }
}

/// A per-player projection of the game state.  Games with hidden
/// information redact the payload per viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub player: String,
    pub current_player: String,
    pub turn_number: u32,
    pub your_turn: bool,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    Loss,
    Draw,
    Win,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player: String,
    pub score: Score,
}

/// The result of a terminal game state.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub winner: Option<String>,
    pub draw: bool,
    pub scores: Vec<PlayerScore>,
    pub reason: String,
}

impl Outcome {
    pub fn win(winner: &str, players: &[String], reason: &str) -> Self {
        let scores = players
            .iter()
            .map(|p| PlayerScore {
                player: p.clone(),
                score: if p == winner { Score::Win } else { Score::Loss },
            })
            .collect();
        Self {
            winner: Some(winner.to_owned()),
            draw: false,
            scores,
            reason: reason.to_owned(),
        }
    }

    pub fn draw(players: &[String], reason: &str) -> Self {
        let scores = players
            .iter()
            .map(|p| PlayerScore {
                player: p.clone(),
                score: Score::Draw,
            })
            .collect();
        Self {
            winner: None,
            draw: true,
            scores,
            reason: reason.to_owned(),
        }
    }

    /// Outcome of a finished single-player game.  No winner/loser
    /// bookkeeping applies.
    pub fn solo(player: &str, reason: &str) -> Self {
        Self {
            winner: None,
            draw: false,
            scores: vec![PlayerScore {
                player: player.to_owned(),
                score: Score::Win,
            }],
            reason: reason.to_owned(),
        }
    }
}

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, BorshDeserialize, BorshSerialize, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameError {
    #[error("Custom error: {0}")]
    Custom(String),

    #[error("Player count out of range: {0}")]
    PlayerCountOutOfRange(usize),

    #[error("Player not in game: {0}")]
    PlayerNotInGame(String),

    #[error("Not this player's turn")]
    OutOfTurn,

    #[error("Game already over")]
    GameOver,

    #[error("Game not over yet")]
    GameNotOver,

    #[error("Illegal action")]
    IllegalAction,

    #[error("Malformed action payload")]
    MalformedActionPayload,

    #[error("Malformed state payload")]
    MalformedStatePayload,

    #[error("Malformed game settings")]
    MalformedSettings,

    #[error("Serialization error")]
    SerializationError,
}

pub type GameResult<T> = std::result::Result<T, GameError>;

impl From<std::io::Error> for GameError {
    fn from(_: std::io::Error) -> Self {
        GameError::SerializationError
    }
}

impl From<serde_json::Error> for GameError {
    fn from(_: serde_json::Error) -> Self {
        GameError::MalformedActionPayload
    }
}

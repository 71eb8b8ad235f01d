use dork_api::error::GameError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    #[error("Invalid player address: {0}")]
    InvalidAddress(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signature expired")]
    SignatureExpired,

    #[error("Unknown public key for player: {0}")]
    UnknownPublicKey(String),

    #[error("Server is in emergency mode")]
    EmergencyMode,

    #[error("Unknown game: {0}")]
    UnknownGame(String),

    #[error("Invalid stake amount: {0}")]
    InvalidStake(String),

    #[error("Stake below on-chain minimum, given: {0}, minimum: {1}")]
    StakeTooLow(String, String),

    #[error("Settlement is not configured")]
    SettlementDisabled,

    #[error("Not your turn")]
    NotYourTurn,

    #[error("Invalid action")]
    InvalidAction,

    #[error("Match already over")]
    MatchTerminal,

    #[error("Match not found: {0}")]
    MatchNotFound(String),

    #[error("Match is not active: {0}")]
    MatchNotActive(String),

    #[error("Match is not waiting for deposits: {0}")]
    MatchNotWaiting(String),

    #[error("Invite code not found")]
    InviteNotFound,

    #[error("Player already in match")]
    PlayerAlreadyInMatch,

    #[error("Player not in match: {0}")]
    PlayerNotInMatch(String),

    #[error("Replay hash mismatch at sequence {1} for match {0}")]
    ReplayHashMismatch(String, u32),

    #[error("Session token invalid or already used")]
    SessionTokenInvalid,

    #[error("No live session for reconnection")]
    SessionNotFound,

    #[error("Deposit window expired")]
    DepositTimeout,

    #[error("Settlement call failed: {0}")]
    SettlementCallFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Game error: {0}")]
    GameError(GameError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<GameError> for Error {
    fn from(e: GameError) -> Self {
        Error::GameError(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::InternalError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedFrame(e.to_string())
    }
}

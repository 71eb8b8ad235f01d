pub use crate::engine::{GameMeta, GameModule};
pub use crate::error::{GameError, GameResult};
pub use crate::types::{Action, GameState, Observation, Outcome, PlayerScore, Score};
pub use borsh::{BorshDeserialize, BorshSerialize};

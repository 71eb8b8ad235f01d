use crate::error::GameResult;
use crate::types::{Action, GameState, Observation, Outcome};

/// Static description of a game, served to clients and consulted by the
/// matchmaking and session layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameMeta {
    pub game_id: String,
    pub name: String,
    pub min_players: u16,
    pub max_players: u16,
    /// Per-move timeout override in milliseconds.  `None` means the server
    /// default applies; `Some(0)` disables the move timer for this game.
    pub move_timeout_ms: Option<u64>,
}

/// The contract every game implements.  All operations are pure functions
/// over [`GameState`]: identical inputs produce identical outputs, byte
/// for byte, which is what makes transcript replay and dispute proofs
/// possible.
pub trait GameModule: Send + Sync {
    fn meta(&self) -> GameMeta;

    /// Build the initial state.  `settings` is the raw JSON settings
    /// object from match creation (`"{}"` when absent).  Must reject a
    /// player count outside the metadata bounds and must set
    /// `current_player` to the first mover.
    fn init(&self, settings: &str, players: &[String], seed: u64) -> GameResult<GameState>;

    /// Whether `action` is legal for `player` in `state`.  False whenever
    /// it is not `player`'s turn or the state is terminal.
    fn validate_action(&self, state: &GameState, player: &str, action: &Action) -> bool;

    /// Apply a validated action, producing the successor state.  Must not
    /// mutate `state`.
    fn apply_action(&self, state: &GameState, player: &str, action: &Action)
        -> GameResult<GameState>;

    fn is_terminal(&self, state: &GameState) -> bool;

    /// Only called on a terminal state.
    fn outcome(&self, state: &GameState) -> GameResult<Outcome>;

    /// The state as seen by `player`.
    fn observation(&self, state: &GameState, player: &str) -> GameResult<Observation>;

    /// Legal actions for `player`; empty when it is not their turn or the
    /// state is terminal.
    fn legal_actions(&self, state: &GameState, player: &str) -> Vec<Action>;
}

use tokio::sync::oneshot;

use dork_api::types::{Action, Observation};
use dork_core::error::Result;
use dork_core::protocol::{Frame, FramePayload, GameStatePayload};
use dork_core::types::{MatchStatus, StepResult};

/// Commands drained by a match's executor task.  All operations against
/// one orchestrator are serialized through this mailbox.
pub enum MatchCommand {
    Apply {
        player: String,
        action: Action,
        resp: oneshot::Sender<Result<StepResult>>,
    },
    Forfeit {
        player: String,
        reason: String,
        resp: oneshot::Sender<Result<StepResult>>,
    },
    /// Draw the match outside the game rules (emergency, stale cleanup).
    Abort {
        reason: String,
        resp: oneshot::Sender<Result<AbortAck>>,
    },
    View {
        player: String,
        resp: oneshot::Sender<Result<PlayerView>>,
    },
    Shutdown,
}

pub struct AbortAck {
    pub step: StepResult,
    pub transcript_hash: String,
}

/// One player's view of the live match.
#[derive(Debug, Clone)]
pub struct PlayerView {
    pub observation: Observation,
    pub legal_actions: Vec<Action>,
    pub your_turn: bool,
    pub current_player: String,
    pub terminal: bool,
    pub sequence: u32,
    pub last_hash: String,
}

/// The full-state frame sent on session start, reconnection and deposit
/// confirmation.
pub fn game_state_frame(match_id: &str, view: &PlayerView, status: MatchStatus) -> Frame {
    Frame::new(
        match_id,
        FramePayload::GameState(GameStatePayload {
            observation: view.observation.clone(),
            your_turn: view.your_turn,
            legal_actions: view.legal_actions.clone(),
            match_status: status,
        }),
    )
    .with_position(view.sequence, &view.last_hash)
}

/// Cross-component notifications, drained by the context's signal loop.
#[derive(Debug, Clone)]
pub enum SignalFrame {
    MatchCompleted {
        match_id: String,
        winner: Option<String>,
        draw: bool,
        reason: String,
        transcript_hash: String,
    },
    Shutdown,
}

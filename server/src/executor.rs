//! The per-match executor task.
//!
//! One task per ACTIVE match drains [`MatchCommand`]s, so every
//! orchestrator operation is serialized and transcript sequence numbers
//! are strictly increasing.  A move is persisted before it is
//! acknowledged; a failed write rolls the orchestrator back, so the match
//! never diverges from the database.

use std::sync::Arc;

use dork_core::error::{Error, Result};
use dork_core::orchestrator::MatchOrchestrator;
use dork_core::protocol::{
    Frame, FramePayload, GameOverPayload, StepResultPayload,
};
use dork_core::storage::StorageT;
use dork_core::types::{current_timestamp, MoveRecord, StepResult};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::frame::{AbortAck, MatchCommand, PlayerView, SignalFrame};
use crate::registry::MatchRegistry;
use crate::room::Room;

#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::Sender<MatchCommand>,
}

impl ExecutorHandle {
    pub async fn apply(&self, player: &str, action: dork_api::types::Action) -> Result<StepResult> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(MatchCommand::Apply {
                player: player.to_owned(),
                action,
                resp,
            })
            .await
            .map_err(|_| Error::InternalError("executor gone".into()))?;
        rx.await
            .map_err(|_| Error::InternalError("executor dropped reply".into()))?
    }

    pub async fn forfeit(&self, player: &str, reason: &str) -> Result<StepResult> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(MatchCommand::Forfeit {
                player: player.to_owned(),
                reason: reason.to_owned(),
                resp,
            })
            .await
            .map_err(|_| Error::InternalError("executor gone".into()))?;
        rx.await
            .map_err(|_| Error::InternalError("executor dropped reply".into()))?
    }

    pub async fn abort(&self, reason: &str) -> Result<AbortAck> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(MatchCommand::Abort {
                reason: reason.to_owned(),
                resp,
            })
            .await
            .map_err(|_| Error::InternalError("executor gone".into()))?;
        rx.await
            .map_err(|_| Error::InternalError("executor dropped reply".into()))?
    }

    pub async fn view(&self, player: &str) -> Result<PlayerView> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(MatchCommand::View {
                player: player.to_owned(),
                resp,
            })
            .await
            .map_err(|_| Error::InternalError("executor gone".into()))?;
        rx.await
            .map_err(|_| Error::InternalError("executor dropped reply".into()))?
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(MatchCommand::Shutdown).await;
    }
}

pub fn spawn_executor(
    match_id: String,
    mo: MatchOrchestrator,
    room: Arc<Room>,
    storage: Arc<dyn StorageT>,
    registry: Arc<MatchRegistry>,
    signal_tx: mpsc::Sender<SignalFrame>,
) -> ExecutorHandle {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(run_executor(
        match_id, mo, rx, room, storage, registry, signal_tx,
    ));
    ExecutorHandle { tx }
}

fn player_view(mo: &MatchOrchestrator, player: &str) -> Result<PlayerView> {
    let observation = mo.observation(player)?;
    let terminal = mo.is_terminal();
    Ok(PlayerView {
        your_turn: !terminal && mo.current_player() == player,
        legal_actions: mo.legal_actions(player),
        current_player: mo.current_player().to_owned(),
        terminal,
        sequence: mo.transcript().len() as u32,
        last_hash: mo.transcript().last_hash().to_owned(),
        observation,
    })
}

fn broadcast_step(mo: &MatchOrchestrator, room: &Room, match_id: &str, step: &StepResult, last_player: &str, action: &dork_api::types::Action) {
    for player in room.player_ids() {
        if let Ok(observation) = mo.observation(&player) {
            let frame = Frame::new(
                match_id,
                FramePayload::StepResult(StepResultPayload {
                    last_action: action.clone(),
                    last_player: last_player.to_owned(),
                    observation,
                    next_player: step.next_player.clone(),
                }),
            )
            .with_position(step.sequence, &step.prev_hash);
            room.send_to(&player, frame);
        }
    }
    if let Ok(observation) = mo.observation("") {
        let frame = Frame::new(
            match_id,
            FramePayload::StepResult(StepResultPayload {
                last_action: action.clone(),
                last_player: last_player.to_owned(),
                observation,
                next_player: step.next_player.clone(),
            }),
        )
        .with_position(step.sequence, &step.prev_hash);
        room.broadcast_spectators(frame);
    }
}

fn broadcast_game_over(room: &Room, match_id: &str, step: &StepResult) {
    room.broadcast(Frame::new(
        match_id,
        FramePayload::GameOver(GameOverPayload {
            winner: step.winner.clone(),
            draw: step.draw,
            reason: step.reason.clone().unwrap_or_default(),
        }),
    ));
}

async fn run_executor(
    match_id: String,
    mut mo: MatchOrchestrator,
    mut rx: mpsc::Receiver<MatchCommand>,
    room: Arc<Room>,
    storage: Arc<dyn StorageT>,
    registry: Arc<MatchRegistry>,
    signal_tx: mpsc::Sender<SignalFrame>,
) {
    info!("Start executor for match {}", match_id);

    while let Some(cmd) = rx.recv().await {
        match cmd {
            MatchCommand::Apply {
                player,
                action,
                resp,
            } => {
                // Emergency is sampled here, inside the serialized path.
                if registry.emergency() {
                    let _ = resp.send(Err(Error::EmergencyMode));
                    continue;
                }

                let backup = mo.clone();
                let result = mo.submit_action(&player, action.clone());
                let step = match result {
                    Ok(step) => step,
                    Err(e) => {
                        let _ = resp.send(Err(e));
                        continue;
                    }
                };

                let record = MoveRecord {
                    match_id: match_id.clone(),
                    sequence: step.sequence,
                    player: player.clone(),
                    action: action.clone(),
                    state_hash: step.state_hash.clone(),
                    prev_hash: step.prev_hash.clone(),
                    created_at: current_timestamp(),
                };
                if let Err(e) = storage.save_move(&record).await {
                    warn!("Move persistence failed for {}: {}", match_id, e);
                    mo = backup;
                    let _ = resp.send(Err(e));
                    continue;
                }

                broadcast_step(&mo, &room, &match_id, &step, &player, &action);

                if step.terminal {
                    broadcast_game_over(&room, &match_id, &step);
                    let _ = signal_tx
                        .send(SignalFrame::MatchCompleted {
                            match_id: match_id.clone(),
                            winner: step.winner.clone(),
                            draw: step.draw,
                            reason: step.reason.clone().unwrap_or_default(),
                            transcript_hash: mo.transcript().hash(),
                        })
                        .await;
                }

                let _ = resp.send(Ok(step));
            }

            MatchCommand::Forfeit {
                player,
                reason,
                resp,
            } => {
                let result = mo.forfeit(&player, &reason);
                let step = match result {
                    Ok(step) => step,
                    Err(e) => {
                        let _ = resp.send(Err(e));
                        continue;
                    }
                };

                broadcast_game_over(&room, &match_id, &step);
                let _ = signal_tx
                    .send(SignalFrame::MatchCompleted {
                        match_id: match_id.clone(),
                        winner: step.winner.clone(),
                        draw: step.draw,
                        reason: reason.clone(),
                        transcript_hash: mo.transcript().hash(),
                    })
                    .await;
                let _ = resp.send(Ok(step));
            }

            MatchCommand::Abort { reason, resp } => {
                let result = mo.abort(&reason);
                match result {
                    Ok(step) => {
                        broadcast_game_over(&room, &match_id, &step);
                        let _ = resp.send(Ok(AbortAck {
                            transcript_hash: mo.transcript().hash(),
                            step,
                        }));
                    }
                    Err(e) => {
                        let _ = resp.send(Err(e));
                    }
                }
            }

            MatchCommand::View { player, resp } => {
                let _ = resp.send(player_view(&mo, &player));
            }

            MatchCommand::Shutdown => {
                break;
            }
        }
    }

    info!("Executor stopped for match {}", match_id);
}

//! Per-match deposit polling for staked matches.
//!
//! One poller per WAITING match, started by the first session that enters
//! the deposit gate.  It asks the settlement collaborator for funding
//! status on an interval; on success it activates the match and pushes
//! `DEPOSITS_CONFIRMED` plus a personalized `GAME_STATE` to every
//! connection.  On timeout the room is told and closed; refunds stay the
//! escrow contract's responsibility.

use std::sync::Arc;
use std::time::Duration;

use dork_core::protocol::{Frame, FramePayload};
use dork_core::settlement::SettlementT;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::frame::game_state_frame;
use crate::lifecycle::MatchLifecycle;
use crate::registry::MatchHandle;

/// Install the poller if none is running yet.
pub fn ensure_deposit_poller(lifecycle: Arc<MatchLifecycle>, handle: Arc<MatchHandle>) {
    let h = handle.clone();
    handle.install_deposit_poller(move || tokio::spawn(poll_deposits(lifecycle, h)));
}

pub async fn poll_deposits(lifecycle: Arc<MatchLifecycle>, handle: Arc<MatchHandle>) {
    let Some(settlement) = lifecycle.settlement().cloned() else {
        return;
    };
    let (match_id, stake_wei, status) = {
        let meta = handle.meta.lock().await;
        (meta.match_id.clone(), meta.stake_wei.clone(), meta.status)
    };
    if status != dork_core::types::MatchStatus::Waiting {
        return;
    }

    let timing = lifecycle.timing();
    let deadline = Instant::now() + Duration::from_millis(timing.deposit_timeout_ms);
    let mut interval =
        tokio::time::interval(Duration::from_millis(timing.deposit_poll_interval_ms));
    info!("Deposit poller started for match {}", match_id);

    loop {
        interval.tick().await;

        if lifecycle.registry().emergency() {
            return;
        }
        if handle.meta.lock().await.status != dork_core::types::MatchStatus::Waiting {
            return;
        }

        if settlement.is_fully_funded(&match_id).await {
            match lifecycle.activate_staked_match(&match_id).await {
                Ok(true) => {
                    handle.room.broadcast(Frame::new(
                        &match_id,
                        FramePayload::DepositsConfirmed {
                            stake_wei: stake_wei.clone(),
                        },
                    ));
                    if let Some(exec) = handle.executor().await {
                        for player in handle.room.player_ids() {
                            if let Ok(view) = exec.view(&player).await {
                                handle.room.send_to(
                                    &player,
                                    game_state_frame(
                                        &match_id,
                                        &view,
                                        dork_core::types::MatchStatus::Active,
                                    ),
                                );
                            }
                        }
                    }
                    info!("Deposits confirmed for match {}", match_id);
                }
                Ok(false) => {}
                Err(e) => warn!("Activation failed for {}: {}", match_id, e),
            }
            return;
        }

        if Instant::now() >= deadline {
            warn!("Deposit window expired for match {}", match_id);
            handle.room.broadcast(Frame::new(
                &match_id,
                FramePayload::Error {
                    error: "Deposit window expired".into(),
                },
            ));
            handle.room.close();
            return;
        }
    }
}

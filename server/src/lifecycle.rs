//! The match lifecycle service.
//!
//! Coordinates the registry, the matchmaking queue, persistence, rooms
//! and the settlement collaborator.  Every mutation of a live match's
//! game state goes through the match's executor task; this service owns
//! everything around it: creation, pairing, activation, completion,
//! cleanup and the emergency path.

use std::sync::Arc;

use dork_api::engine::GameMeta;
use dork_api::types::Action;
use dork_core::cache::CacheT;
use dork_core::elo::{calculate_elo, EloOutcome};
use dork_core::error::{Error, Result};
use dork_core::orchestrator::MatchOrchestrator;
use dork_core::protocol::{Frame, FramePayload, GameOverPayload};
use dork_core::settlement::{
    match_id_bytes32, CreateEscrowParams, ProposeSettlementParams, SettlementT,
};
use dork_core::storage::{CompleteMatchParams, StorageT};
use dork_core::types::{
    add_amounts, current_timestamp, parse_amount, ActiveMatchPointer, Amount, Match, MatchRecord,
    MatchStatus, PendingMatch, PlayerGameRecord, PlayerRecord, SessionGrant, StepResult,
    FREE_STAKE,
};
use dork_env::TimingConfig;
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::executor::spawn_executor;
use crate::frame::{game_state_frame, SignalFrame};
use crate::games::GameRegistry;
use crate::queue::{stake_bucket, Matchmaker};
use crate::registry::{MatchHandle, MatchRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowInfo {
    pub stake_wei: Amount,
    pub match_id_bytes32: String,
    pub escrow_address: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored_active: usize,
    pub restored_waiting: usize,
    pub completed_on_replay: usize,
    pub flagged: usize,
}

#[derive(Debug, Clone)]
pub enum JoinQueueResult {
    Matched {
        match_id: String,
        ws_token: String,
        opponent: Option<String>,
        escrow: Option<EscrowInfo>,
    },
    Queued {
        ticket: String,
    },
}

pub struct MatchLifecycle {
    games: Arc<GameRegistry>,
    registry: Arc<MatchRegistry>,
    matchmaker: Matchmaker,
    storage: Arc<dyn StorageT>,
    cache: Arc<dyn CacheT>,
    settlement: Option<Arc<dyn SettlementT>>,
    timing: TimingConfig,
    signal_tx: mpsc::Sender<SignalFrame>,
}

fn new_invite_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

fn new_session_token() -> String {
    let bytes: [u8; 24] = rand::thread_rng().gen();
    hex::encode(bytes)
}

impl MatchLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        games: Arc<GameRegistry>,
        registry: Arc<MatchRegistry>,
        storage: Arc<dyn StorageT>,
        cache: Arc<dyn CacheT>,
        settlement: Option<Arc<dyn SettlementT>>,
        timing: TimingConfig,
        signal_tx: mpsc::Sender<SignalFrame>,
    ) -> Self {
        let matchmaker = Matchmaker::new(
            cache.clone(),
            timing.queue_ticket_ttl_ms,
            timing.pending_match_ttl_ms,
        );
        Self {
            games,
            registry,
            matchmaker,
            storage,
            cache,
            settlement,
            timing,
            signal_tx,
        }
    }

    pub fn registry(&self) -> &Arc<MatchRegistry> {
        &self.registry
    }

    pub fn games(&self) -> &Arc<GameRegistry> {
        &self.games
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn settlement(&self) -> Option<&Arc<dyn SettlementT>> {
        self.settlement.as_ref()
    }

    pub fn storage(&self) -> &Arc<dyn StorageT> {
        &self.storage
    }

    /// The move timer for a game: module override, else the server
    /// default; zero disables the timer.
    pub fn effective_move_timeout(&self, game_id: &str) -> Option<u64> {
        let meta = self.games.get(game_id).ok()?.meta();
        match meta.move_timeout_ms.unwrap_or(self.timing.default_move_timeout_ms) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub async fn issue_session_token(&self, match_id: &str, player: &str) -> Result<String> {
        let token = new_session_token();
        self.cache
            .put_session_token(
                &token,
                SessionGrant {
                    match_id: match_id.to_owned(),
                    player: player.to_owned(),
                },
                self.timing.session_token_ttl_ms,
            )
            .await?;
        Ok(token)
    }

    pub fn escrow_info(&self, match_id: &str, stake_wei: &str) -> Option<EscrowInfo> {
        if stake_wei == FREE_STAKE {
            return None;
        }
        let settlement = self.settlement.as_ref()?;
        Some(EscrowInfo {
            stake_wei: stake_wei.to_owned(),
            match_id_bytes32: match_id_bytes32(match_id),
            escrow_address: settlement.escrow_address(),
        })
    }

    /// Normalize and validate a stake for a game: free for single-player
    /// games and unconfigured settlement, exact-amount and above-minimum
    /// otherwise.
    async fn validate_stake(&self, meta: &GameMeta, stake_wei: Option<&str>) -> Result<Amount> {
        let stake = stake_wei.unwrap_or(FREE_STAKE);
        if stake == FREE_STAKE || meta.min_players == 1 {
            return Ok(FREE_STAKE.to_owned());
        }
        let Some(settlement) = self.settlement.as_ref() else {
            return Ok(FREE_STAKE.to_owned());
        };

        let amount =
            parse_amount(stake).ok_or_else(|| Error::InvalidStake(stake.to_owned()))?;
        if settlement.game_id_bytes32(&meta.game_id).is_none() {
            return Err(Error::InvalidStake(format!(
                "{} has no on-chain id",
                meta.game_id
            )));
        }
        let minimum = settlement.get_minimum_stake().await;
        let min_amount = parse_amount(&minimum).unwrap_or(0);
        if amount < min_amount {
            return Err(Error::StakeTooLow(stake.to_owned(), minimum));
        }
        Ok(stake.to_owned())
    }

    async fn start_executor(&self, handle: &Arc<MatchHandle>) -> Result<()> {
        let (match_id, game_id, players, settings) = {
            let meta = handle.meta.lock().await;
            (
                meta.match_id.clone(),
                meta.game_id.clone(),
                meta.players.clone(),
                meta.settings.clone().unwrap_or_else(|| "{}".into()),
            )
        };
        let module = self.games.get(&game_id)?;
        let mo = MatchOrchestrator::new(module, &match_id, &players, &settings)?;
        self.install_executor(handle, mo).await;
        Ok(())
    }

    pub async fn install_executor(&self, handle: &Arc<MatchHandle>, mo: MatchOrchestrator) {
        let match_id = handle.meta.lock().await.match_id.clone();
        let exec = spawn_executor(
            match_id,
            mo,
            handle.room.clone(),
            self.storage.clone(),
            self.registry.clone(),
            self.signal_tx.clone(),
        );
        handle.set_executor(exec).await;
    }

    fn spawn_escrow_creation(&self, match_id: &str, game_id: &str, players: Vec<String>, stake: &str) {
        let Some(settlement) = self.settlement.clone() else {
            return;
        };
        let Some(game_id_bytes32) = settlement.game_id_bytes32(game_id) else {
            return;
        };
        let params = CreateEscrowParams {
            match_id: match_id.to_owned(),
            game_id_bytes32,
            players,
            stake_per_player: stake.to_owned(),
        };
        let match_id = match_id.to_owned();
        tokio::spawn(async move {
            // Failure is not fatal: deposit gating surfaces it to clients.
            match settlement.create_match(params).await {
                Some(tx) => info!("Escrow created for {} in {}", match_id, tx),
                None => warn!("Escrow creation failed for {}", match_id),
            }
        });
    }

    pub async fn create_match(
        &self,
        game_id: &str,
        players: Vec<String>,
        settings: Option<String>,
        stake_wei: Option<&str>,
    ) -> Result<Arc<MatchHandle>> {
        if self.registry.emergency() {
            return Err(Error::EmergencyMode);
        }
        let module = self.games.get(game_id)?;
        let meta = module.meta();
        let stake = self.validate_stake(&meta, stake_wei).await?;
        let staked = stake != FREE_STAKE;
        if staked && players.len() < 2 {
            return Err(Error::InvalidStake(
                "staked matches need at least two players".into(),
            ));
        }

        let match_id = uuid::Uuid::new_v4().to_string();
        let now = current_timestamp();
        let m = Match {
            match_id: match_id.clone(),
            game_id: game_id.to_owned(),
            players: players.clone(),
            status: if staked {
                MatchStatus::Waiting
            } else {
                MatchStatus::Active
            },
            winner: None,
            reason: None,
            created_at: now,
            completed_at: None,
            last_activity_at: now,
            stake_wei: stake.clone(),
            settings,
            invite_code: None,
        };

        self.storage.save_match(&MatchRecord::from_match(&m)).await?;
        for player in &players {
            self.storage.upsert_player(player).await?;
            self.cache
                .put_active_match(
                    player,
                    ActiveMatchPointer {
                        match_id: match_id.clone(),
                        game_id: game_id.to_owned(),
                        stake_wei: stake.clone(),
                    },
                    self.timing.active_match_ttl_ms,
                )
                .await?;
        }

        let player_count = players.len();
        let handle = self.registry.insert(m);
        if staked {
            self.spawn_escrow_creation(&match_id, game_id, players, &stake);
        } else {
            self.start_executor(&handle).await?;
        }

        info!(
            "Created match {} ({}, stake {}, {} players)",
            match_id, game_id, stake, player_count
        );
        Ok(handle)
    }

    pub async fn join_queue(
        &self,
        player: &str,
        game_id: &str,
        stake_wei: Option<&str>,
        existing_ticket: Option<&str>,
        settings: Option<String>,
    ) -> Result<JoinQueueResult> {
        if self.registry.emergency() {
            return Err(Error::EmergencyMode);
        }
        let module = self.games.get(game_id)?;
        let meta = module.meta();
        let stake = self.validate_stake(&meta, stake_wei).await?;

        // single-player games skip the queue entirely
        if meta.min_players == 1 {
            let handle = self
                .create_match(game_id, vec![player.to_owned()], settings, Some(FREE_STAKE))
                .await?;
            let match_id = handle.meta.lock().await.match_id.clone();
            let ws_token = self.issue_session_token(&match_id, player).await?;
            return Ok(JoinQueueResult::Matched {
                match_id,
                ws_token,
                opponent: None,
                escrow: None,
            });
        }

        let bucket = stake_bucket(&stake).to_owned();

        if let Some(pending) = self.matchmaker.take_pending(game_id, &bucket, player).await? {
            let ws_token = self.issue_session_token(&pending.match_id, player).await?;
            let escrow = self.escrow_info(&pending.match_id, &pending.stake_wei);
            return Ok(JoinQueueResult::Matched {
                match_id: pending.match_id,
                ws_token,
                opponent: Some(pending.opponent),
                escrow,
            });
        }

        if let Some(opponent) = self.matchmaker.take_opponent(game_id, &bucket, player).await? {
            // the earlier queuer moves first
            let players = vec![opponent.player.clone(), player.to_owned()];
            let handle = self
                .create_match(game_id, players, settings, Some(&stake))
                .await?;
            let match_id = handle.meta.lock().await.match_id.clone();
            self.matchmaker
                .leave_pending(
                    game_id,
                    &bucket,
                    &opponent.player,
                    PendingMatch {
                        match_id: match_id.clone(),
                        opponent: player.to_owned(),
                        stake_wei: stake.clone(),
                    },
                )
                .await?;
            let ws_token = self.issue_session_token(&match_id, player).await?;
            let escrow = self.escrow_info(&match_id, &stake);
            return Ok(JoinQueueResult::Matched {
                match_id,
                ws_token,
                opponent: Some(opponent.player),
                escrow,
            });
        }

        let ticket = self
            .matchmaker
            .enqueue(game_id, &bucket, player, existing_ticket)
            .await?;
        Ok(JoinQueueResult::Queued { ticket })
    }

    pub async fn leave_queue(
        &self,
        game_id: &str,
        stake_wei: Option<&str>,
        ticket: &str,
    ) -> Result<bool> {
        let bucket = stake_wei.unwrap_or(FREE_STAKE);
        self.matchmaker.leave(game_id, bucket, ticket).await
    }

    pub async fn create_private_match(
        &self,
        player: &str,
        game_id: &str,
        settings: Option<String>,
        stake_wei: Option<&str>,
    ) -> Result<(String, String, String, Option<EscrowInfo>)> {
        if self.registry.emergency() {
            return Err(Error::EmergencyMode);
        }
        let module = self.games.get(game_id)?;
        let meta = module.meta();
        let stake = self.validate_stake(&meta, stake_wei).await?;

        let match_id = uuid::Uuid::new_v4().to_string();
        let invite_code = new_invite_code();
        let now = current_timestamp();
        let m = Match {
            match_id: match_id.clone(),
            game_id: game_id.to_owned(),
            players: vec![player.to_owned()],
            status: MatchStatus::Waiting,
            winner: None,
            reason: None,
            created_at: now,
            completed_at: None,
            last_activity_at: now,
            stake_wei: stake.clone(),
            settings,
            invite_code: Some(invite_code.clone()),
        };

        self.storage.save_match(&MatchRecord::from_match(&m)).await?;
        self.storage.upsert_player(player).await?;
        self.cache
            .put_active_match(
                player,
                ActiveMatchPointer {
                    match_id: match_id.clone(),
                    game_id: game_id.to_owned(),
                    stake_wei: stake.clone(),
                },
                self.timing.active_match_ttl_ms,
            )
            .await?;
        self.registry.insert(m);

        let ws_token = self.issue_session_token(&match_id, player).await?;
        let escrow = self.escrow_info(&match_id, &stake);
        info!("Created private match {} with invite {}", match_id, invite_code);
        Ok((match_id, invite_code, ws_token, escrow))
    }

    pub async fn accept_private_match(
        &self,
        player: &str,
        invite_code: &str,
    ) -> Result<(String, String, Option<EscrowInfo>)> {
        if self.registry.emergency() {
            return Err(Error::EmergencyMode);
        }
        let match_id = self.registry.resolve_invite(invite_code)?;
        let handle = self.registry.get(&match_id)?;

        let (game_id, players, stake) = {
            let mut meta = handle.meta.lock().await;
            if meta.status != MatchStatus::Waiting {
                return Err(Error::MatchNotWaiting(match_id.clone()));
            }
            if meta.players.iter().any(|p| p == player) {
                return Err(Error::PlayerAlreadyInMatch);
            }
            let max_players = self.games.get(&meta.game_id)?.meta().max_players as usize;
            if meta.players.len() >= max_players {
                return Err(Error::MatchNotWaiting(match_id.clone()));
            }
            meta.players.push(player.to_owned());
            meta.touch(current_timestamp());
            (meta.game_id.clone(), meta.players.clone(), meta.stake_wei.clone())
        };

        self.registry.remove_invite(invite_code);
        let record = {
            let meta = handle.meta.lock().await;
            MatchRecord::from_match(&meta)
        };
        self.storage.save_match(&record).await?;
        self.storage.upsert_player(player).await?;
        self.cache
            .put_active_match(
                player,
                ActiveMatchPointer {
                    match_id: match_id.clone(),
                    game_id: game_id.clone(),
                    stake_wei: stake.clone(),
                },
                self.timing.active_match_ttl_ms,
            )
            .await?;

        if stake == FREE_STAKE {
            self.start_executor(&handle).await?;
            handle.meta.lock().await.status = MatchStatus::Active;
            self.storage
                .update_match_status(&match_id, MatchStatus::Active)
                .await?;
            // the creator may already be connected and waiting
            if let Some(exec) = handle.executor().await {
                for connected in handle.room.player_ids() {
                    if let Ok(view) = exec.view(&connected).await {
                        handle.room.send_to(
                            &connected,
                            game_state_frame(&match_id, &view, MatchStatus::Active),
                        );
                    }
                }
            }
        } else {
            // the escrow needs the full player set, so it opens on accept
            self.spawn_escrow_creation(&match_id, &game_id, players, &stake);
        }

        let ws_token = self.issue_session_token(&match_id, player).await?;
        let escrow = self.escrow_info(&match_id, &stake);
        Ok((match_id, ws_token, escrow))
    }

    pub async fn submit_move(
        &self,
        match_id: &str,
        player: &str,
        action: Action,
    ) -> Result<StepResult> {
        let handle = self.registry.get(match_id)?;
        {
            let meta = handle.meta.lock().await;
            if meta.status != MatchStatus::Active {
                return Err(Error::MatchNotActive(match_id.to_owned()));
            }
            if !meta.players.iter().any(|p| p == player) {
                return Err(Error::PlayerNotInMatch(player.to_owned()));
            }
        }
        let exec = handle
            .executor()
            .await
            .ok_or_else(|| Error::MatchNotActive(match_id.to_owned()))?;
        let step = exec.apply(player, action).await?;
        handle.meta.lock().await.touch(current_timestamp());
        Ok(step)
    }

    /// No-op unless the match is ACTIVE.
    pub async fn forfeit_match(
        &self,
        match_id: &str,
        player: &str,
        reason: &str,
    ) -> Result<Option<StepResult>> {
        let Ok(handle) = self.registry.get(match_id) else {
            return Ok(None);
        };
        if handle.meta.lock().await.status != MatchStatus::Active {
            return Ok(None);
        }
        let Some(exec) = handle.executor().await else {
            return Ok(None);
        };
        match exec.forfeit(player, reason).await {
            Ok(step) => {
                handle.meta.lock().await.touch(current_timestamp());
                Ok(Some(step))
            }
            Err(Error::MatchTerminal) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Move-timeout path: forfeit only if `player` is still the current
    /// player of a still-ACTIVE match.
    pub async fn forfeit_if_current(&self, match_id: &str, player: &str) -> Result<bool> {
        let Ok(handle) = self.registry.get(match_id) else {
            return Ok(false);
        };
        if handle.meta.lock().await.status != MatchStatus::Active {
            return Ok(false);
        }
        let Some(exec) = handle.executor().await else {
            return Ok(false);
        };
        let view = exec.view(player).await?;
        if view.terminal || view.current_player != player {
            return Ok(false);
        }
        match exec.forfeit(player, "timed out").await {
            Ok(_) => Ok(true),
            Err(Error::MatchTerminal) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// WAITING → ACTIVE once deposits are confirmed.  Idempotent.
    pub async fn activate_staked_match(&self, match_id: &str) -> Result<bool> {
        let handle = self.registry.get(match_id)?;
        if handle.meta.lock().await.status != MatchStatus::Waiting {
            return Ok(false);
        }
        self.start_executor(&handle).await?;
        {
            let mut meta = handle.meta.lock().await;
            meta.status = MatchStatus::Active;
            meta.touch(current_timestamp());
        }
        self.storage
            .update_match_status(match_id, MatchStatus::Active)
            .await?;
        info!("Activated staked match {}", match_id);
        Ok(true)
    }

    /// Persist a terminal transition.  At-most-once: the record update is
    /// the gate, every later effect runs only on the first call.
    pub async fn persist_match_completion(
        &self,
        match_id: &str,
        winner: Option<String>,
        draw: bool,
        reason: &str,
        transcript_hash: &str,
    ) -> Result<()> {
        let previous = self.storage.get_match(match_id).await?;
        let was_active = previous
            .as_ref()
            .map(|r| r.status == MatchStatus::Active)
            .unwrap_or(false);

        let now = current_timestamp();
        let changed = self
            .storage
            .complete_match(CompleteMatchParams {
                match_id: match_id.to_owned(),
                winner: winner.clone(),
                reason: reason.to_owned(),
                transcript_hash: transcript_hash.to_owned(),
                completed_at: now,
            })
            .await?;
        if !changed {
            return Ok(());
        }

        let handle = self.registry.get(match_id).ok();
        let (players, stake, game_id) = if let Some(h) = &handle {
            let mut meta = h.meta.lock().await;
            meta.status = MatchStatus::Completed;
            meta.winner = winner.clone();
            meta.reason = Some(reason.to_owned());
            meta.completed_at = Some(now);
            (meta.players.clone(), meta.stake_wei.clone(), meta.game_id.clone())
        } else {
            let record = previous.ok_or_else(|| Error::MatchNotFound(match_id.to_owned()))?;
            (record.players, record.stake_wei, record.game_id)
        };

        for player in &players {
            self.cache.del_game_session(match_id, player).await?;
            self.cache.del_active_match(player).await?;
        }

        if was_active {
            if players.len() == 2 {
                self.update_ratings(&players, &game_id, &winner, draw, &stake)
                    .await?;
            } else if players.len() == 1 {
                self.update_solo_totals(&players[0], &game_id).await?;
            }

            if stake != FREE_STAKE {
                if let Some(settlement) = self.settlement.as_ref() {
                    let params = ProposeSettlementParams {
                        match_id: match_id.to_owned(),
                        winner: winner.clone(),
                        transcript_hash: transcript_hash.to_owned(),
                    };
                    match settlement.propose_settlement(params).await {
                        Some(tx) => {
                            self.storage.set_settlement_tx(match_id, &tx).await?;
                            settlement
                                .schedule_finalization(match_id, self.timing.dispute_window_ms);
                            info!("Settlement proposed for {} in {}", match_id, tx);
                        }
                        None => {
                            warn!("Settlement proposal failed for {}", match_id);
                        }
                    }
                }
            }
        }

        if let Some(h) = handle {
            h.cancel_deposit_poller();
            h.shutdown_executor().await;
            h.room.close();
        }
        info!(
            "Match {} completed, winner: {:?}, reason: {}",
            match_id, winner, reason
        );
        Ok(())
    }

    async fn update_ratings(
        &self,
        players: &[String],
        game_id: &str,
        winner: &Option<String>,
        draw: bool,
        stake: &str,
    ) -> Result<()> {
        let (a, b) = (&players[0], &players[1]);
        let outcome = match winner.as_deref() {
            _ if draw => EloOutcome::Draw,
            Some(w) if w == a => EloOutcome::WinA,
            Some(_) => EloOutcome::WinB,
            None => EloOutcome::Draw,
        };

        let mut ra = self
            .storage
            .get_player(a)
            .await?
            .unwrap_or_else(|| PlayerRecord::new(a));
        let mut rb = self
            .storage
            .get_player(b)
            .await?
            .unwrap_or_else(|| PlayerRecord::new(b));
        let (na, nb) = calculate_elo(ra.rating, rb.rating, ra.games_played, rb.games_played, outcome);
        apply_overall(&mut ra, na, outcome == EloOutcome::Draw, winner.as_deref() == Some(a.as_str()));
        apply_overall(&mut rb, nb, outcome == EloOutcome::Draw, winner.as_deref() == Some(b.as_str()));

        if stake != FREE_STAKE && !draw {
            if let Some(w) = winner.as_deref() {
                let record = if w == a.as_str() { &mut ra } else { &mut rb };
                record.earnings_wei = add_amounts(&record.earnings_wei, stake);
            }
        }

        self.storage.update_player(&ra).await?;
        self.storage.update_player(&rb).await?;

        let mut ga = self
            .storage
            .get_player_game(a, game_id)
            .await?
            .unwrap_or_else(|| PlayerGameRecord::new(a, game_id));
        let mut gb = self
            .storage
            .get_player_game(b, game_id)
            .await?
            .unwrap_or_else(|| PlayerGameRecord::new(b, game_id));
        let (na, nb) = calculate_elo(ga.rating, gb.rating, ga.games_played, gb.games_played, outcome);
        apply_per_game(&mut ga, na, outcome == EloOutcome::Draw, winner.as_deref() == Some(a.as_str()));
        apply_per_game(&mut gb, nb, outcome == EloOutcome::Draw, winner.as_deref() == Some(b.as_str()));
        self.storage.update_player_game(&ga).await?;
        self.storage.update_player_game(&gb).await?;
        Ok(())
    }

    async fn update_solo_totals(&self, player: &str, game_id: &str) -> Result<()> {
        let mut record = self
            .storage
            .get_player(player)
            .await?
            .unwrap_or_else(|| PlayerRecord::new(player));
        record.games_played += 1;
        self.storage.update_player(&record).await?;

        let mut per_game = self
            .storage
            .get_player_game(player, game_id)
            .await?
            .unwrap_or_else(|| PlayerGameRecord::new(player, game_id));
        per_game.games_played += 1;
        self.storage.update_player_game(&per_game).await?;
        Ok(())
    }

    pub async fn cleanup_completed_matches(&self, max_age_ms: u64) -> usize {
        let now = current_timestamp();
        let mut removed = 0;
        for handle in self.registry.list_all() {
            let (expired, match_id, invite) = {
                let meta = handle.meta.lock().await;
                let expired = meta.status == MatchStatus::Completed
                    && meta
                        .completed_at
                        .map(|t| t.saturating_add(max_age_ms) <= now)
                        .unwrap_or(false);
                (expired, meta.match_id.clone(), meta.invite_code.clone())
            };
            if expired {
                handle.room.close();
                self.registry.remove(&match_id);
                if let Some(code) = invite {
                    self.registry.remove_invite(&code);
                }
                removed += 1;
            }
        }
        removed
    }

    pub async fn cleanup_stale_matches(&self, max_age_ms: u64) -> Result<usize> {
        let now = current_timestamp();
        let mut reaped = 0;
        for handle in self.registry.list_all() {
            let (status, age, match_id) = {
                let meta = handle.meta.lock().await;
                let base = match meta.status {
                    MatchStatus::Active => meta.last_activity_at,
                    _ => meta.created_at,
                };
                (meta.status, now.saturating_sub(base), meta.match_id.clone())
            };
            if age <= max_age_ms {
                continue;
            }
            match status {
                MatchStatus::Active => {
                    let reason = "Match abandoned due to inactivity";
                    if let Some(exec) = handle.executor().await {
                        match exec.abort(reason).await {
                            Ok(ack) => {
                                self.persist_match_completion(
                                    &match_id,
                                    None,
                                    true,
                                    reason,
                                    &ack.transcript_hash,
                                )
                                .await?;
                                reaped += 1;
                            }
                            Err(Error::MatchTerminal) => {}
                            Err(e) => warn!("Stale abort failed for {}: {}", match_id, e),
                        }
                    }
                }
                MatchStatus::Waiting => {
                    let reason = "no opponent";
                    handle.room.broadcast(Frame::new(
                        &match_id,
                        FramePayload::GameOver(GameOverPayload {
                            winner: None,
                            draw: true,
                            reason: reason.into(),
                        }),
                    ));
                    self.persist_match_completion(&match_id, None, true, reason, "")
                        .await?;
                    reaped += 1;
                }
                MatchStatus::Completed => {}
            }
        }
        Ok(reaped)
    }

    /// Flip the emergency flag and draw every live match.  Staked ACTIVE
    /// matches get a draw settlement proposed; the registry ends up empty.
    pub async fn emergency_draw_all(&self) -> Result<usize> {
        self.registry.set_emergency(true);
        warn!("Emergency mode engaged, drawing all live matches");

        let mut drawn = 0;
        for handle in self.registry.list_all() {
            let (status, match_id) = {
                let meta = handle.meta.lock().await;
                (meta.status, meta.match_id.clone())
            };
            match status {
                MatchStatus::Completed => {}
                MatchStatus::Active => {
                    if let Some(exec) = handle.executor().await {
                        match exec.abort("emergency_shutdown").await {
                            Ok(ack) => {
                                self.persist_match_completion(
                                    &match_id,
                                    None,
                                    true,
                                    "emergency_shutdown",
                                    &ack.transcript_hash,
                                )
                                .await?;
                                drawn += 1;
                            }
                            Err(Error::MatchTerminal) => {}
                            Err(e) => warn!("Emergency abort failed for {}: {}", match_id, e),
                        }
                    }
                }
                MatchStatus::Waiting => {
                    handle.room.broadcast(Frame::new(
                        &match_id,
                        FramePayload::GameOver(GameOverPayload {
                            winner: None,
                            draw: true,
                            reason: "emergency_shutdown".into(),
                        }),
                    ));
                    self.persist_match_completion(
                        &match_id,
                        None,
                        true,
                        "emergency_shutdown",
                        "",
                    )
                    .await?;
                    drawn += 1;
                }
            }
        }
        self.registry.clear();
        Ok(drawn)
    }

    pub fn clear_emergency(&self) {
        self.registry.set_emergency(false);
    }

    /// Rehydrate WAITING and ACTIVE matches from the database.  ACTIVE
    /// matches are rebuilt by replay; a hash divergence flags the match
    /// for manual review instead of reactivating it.
    pub async fn restore_active_matches(&self) -> Result<RestoreSummary> {
        let mut summary = RestoreSummary::default();
        for record in self.storage.list_unfinished_matches().await? {
            let match_id = record.match_id.clone();
            let module = match self.games.get(&record.game_id) {
                Ok(module) => module,
                Err(_) => {
                    warn!("Unknown game {} for match {}", record.game_id, match_id);
                    self.storage.flag_for_review(&match_id, "unknown game").await?;
                    summary.flagged += 1;
                    continue;
                }
            };

            match record.status {
                MatchStatus::Waiting => {
                    self.registry.insert(record.to_match());
                    self.reseed_cache(&record).await?;
                    summary.restored_waiting += 1;
                }
                MatchStatus::Active => {
                    let moves = self.storage.list_moves(&match_id).await?;
                    let settings = record.settings.clone().unwrap_or_else(|| "{}".into());
                    match MatchOrchestrator::from_replay(
                        module,
                        &match_id,
                        &record.players,
                        &settings,
                        &moves,
                    ) {
                        Ok(mo) if mo.is_terminal() => {
                            let outcome = mo.outcome()?;
                            let transcript_hash = mo.transcript().hash();
                            self.persist_match_completion(
                                &match_id,
                                outcome.winner.clone(),
                                outcome.draw,
                                &outcome.reason,
                                &transcript_hash,
                            )
                            .await?;
                            summary.completed_on_replay += 1;
                        }
                        Ok(mo) => {
                            let mut m = record.to_match();
                            m.last_activity_at = moves
                                .last()
                                .map(|mv| mv.created_at)
                                .unwrap_or(record.created_at);
                            let handle = self.registry.insert(m);
                            self.install_executor(&handle, mo).await;
                            self.reseed_cache(&record).await?;
                            summary.restored_active += 1;
                        }
                        Err(e) => {
                            warn!("Replay refused for match {}: {}", match_id, e);
                            self.storage
                                .flag_for_review(&match_id, &e.to_string())
                                .await?;
                            summary.flagged += 1;
                        }
                    }
                }
                MatchStatus::Completed => {}
            }
        }
        Ok(summary)
    }

    async fn reseed_cache(&self, record: &MatchRecord) -> Result<()> {
        for player in &record.players {
            self.cache
                .put_active_match(
                    player,
                    ActiveMatchPointer {
                        match_id: record.match_id.clone(),
                        game_id: record.game_id.clone(),
                        stake_wei: record.stake_wei.clone(),
                    },
                    self.timing.active_match_ttl_ms,
                )
                .await?;
            self.cache
                .put_game_session(&record.match_id, player, self.timing.game_session_ttl_ms)
                .await?;
        }
        Ok(())
    }

    /// Active-match lookup for reconnection, with a fresh session token.
    pub async fn get_active_match(
        &self,
        player: &str,
    ) -> Result<Option<(ActiveMatchPointer, String)>> {
        let Some(pointer) = self.cache.get_active_match(player).await? else {
            return Ok(None);
        };
        let live = match self.registry.get(&pointer.match_id) {
            Ok(handle) => handle.meta.lock().await.status != MatchStatus::Completed,
            Err(_) => false,
        };
        if !live {
            return Ok(None);
        }
        let token = self.issue_session_token(&pointer.match_id, player).await?;
        Ok(Some((pointer, token)))
    }
}

fn apply_overall(record: &mut PlayerRecord, new_rating: u32, draw: bool, won: bool) {
    record.rating = new_rating;
    record.games_played += 1;
    if draw {
        record.games_drawn += 1;
    } else if won {
        record.games_won += 1;
    }
}

fn apply_per_game(record: &mut PlayerGameRecord, new_rating: u32, draw: bool, won: bool) {
    record.rating = new_rating;
    record.games_played += 1;
    if draw {
        record.games_drawn += 1;
    } else if won {
        record.games_won += 1;
    }
}

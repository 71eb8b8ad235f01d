//! Persistence contract.
//!
//! Move insertion is keyed on `(match_id, sequence)` with upsert
//! semantics, so recovery replay that re-inserts is a no-op.  Completion
//! updates are idempotent: the first one wins, later ones report `false`.

use async_trait::async_trait;

use crate::error::Result;
use crate::settlement::PendingSettlement;
use crate::types::{
    ChatRecord, MatchRecord, MatchStatus, MoveRecord, PlayerGameRecord, PlayerRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMatchParams {
    pub match_id: String,
    pub winner: Option<String>,
    pub reason: String,
    pub transcript_hash: String,
    pub completed_at: u64,
}

#[async_trait]
pub trait StorageT: Send + Sync {
    async fn save_match(&self, record: &MatchRecord) -> Result<()>;

    async fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>>;

    async fn update_match_status(&self, match_id: &str, status: MatchStatus) -> Result<()>;

    /// Mark a match completed.  Returns `false` when it already was, in
    /// which case nothing changed.
    async fn complete_match(&self, params: CompleteMatchParams) -> Result<bool>;

    async fn set_settlement_tx(&self, match_id: &str, tx_hash: &str) -> Result<()>;

    /// Flag a match for manual review (replay divergence).  The match is
    /// refused reactivation until an operator intervenes.
    async fn flag_for_review(&self, match_id: &str, note: &str) -> Result<()>;

    /// Upsert one move; duplicate `(match_id, sequence)` is ignored.
    async fn save_move(&self, record: &MoveRecord) -> Result<()>;

    /// All moves of a match in sequence order.
    async fn list_moves(&self, match_id: &str) -> Result<Vec<MoveRecord>>;

    /// Matches persisted as WAITING or ACTIVE, for startup recovery.
    async fn list_unfinished_matches(&self) -> Result<Vec<MatchRecord>>;

    /// Completed staked matches with a recorded settlement transaction.
    async fn list_pending_settlements(&self) -> Result<Vec<PendingSettlement>>;

    /// Ensure a player row exists.
    async fn upsert_player(&self, addr: &str) -> Result<()>;

    async fn get_player(&self, addr: &str) -> Result<Option<PlayerRecord>>;

    async fn update_player(&self, record: &PlayerRecord) -> Result<()>;

    async fn get_player_game(&self, addr: &str, game_id: &str)
        -> Result<Option<PlayerGameRecord>>;

    async fn update_player_game(&self, record: &PlayerGameRecord) -> Result<()>;
}

/// Match-scoped chat history, owned by an external collaborator.
#[async_trait]
pub trait ChatStoreT: Send + Sync {
    async fn save_chat(&self, record: &ChatRecord) -> Result<()>;
}

//! Interface to the on-chain escrow collaborator.
//!
//! The core drives settlement, it never implements it.  Calls return the
//! transaction hash, or `None` on failure; the caller logs and continues.
//! Proposals are at-least-once with idempotent retries; completion stays
//! at-most-once because the match record is updated first.

use async_trait::async_trait;

use crate::types::Amount;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateEscrowParams {
    pub match_id: String,
    pub game_id_bytes32: String,
    pub players: Vec<String>,
    pub stake_per_player: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeSettlementParams {
    pub match_id: String,
    pub winner: Option<String>,
    pub transcript_hash: String,
}

/// A completed match whose on-chain proposal may still be unfinalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSettlement {
    pub match_id: String,
    pub settlement_tx_hash: String,
}

#[async_trait]
pub trait SettlementT: Send + Sync {
    /// Open the escrow for a staked match.  Fired at match creation
    /// without awaiting confirmation.
    async fn create_match(&self, params: CreateEscrowParams) -> Option<String>;

    /// Propose the outcome with the transcript hash as evidence.
    async fn propose_settlement(&self, params: ProposeSettlementParams) -> Option<String>;

    /// Finalize a proposal once the dispute window has passed.
    async fn finalize_settlement(&self, match_id: &str) -> Option<String>;

    /// Refund path for matches that never started.
    async fn cancel_match(&self, match_id: &str) -> Option<String>;

    /// Whether every participant's stake has been deposited.
    async fn is_fully_funded(&self, match_id: &str) -> bool;

    async fn get_minimum_stake(&self) -> Amount;

    /// On-chain identifier for a game, `None` when the game cannot be
    /// staked.
    fn game_id_bytes32(&self, game_id: &str) -> Option<String>;

    fn escrow_address(&self) -> String;

    /// Arrange `finalize_settlement` to run after the dispute window.
    fn schedule_finalization(&self, match_id: &str, delay_ms: u64);

    /// Resume or finalize proposals left pending by a previous run.
    /// Returns the number reconciled.
    async fn reconcile_on_startup(&self, pending: &[PendingSettlement]) -> usize;
}

/// On-chain form of a match id: dashes stripped, hex left-padded to 32
/// bytes, `0x` prefixed.
pub fn match_id_bytes32(match_id: &str) -> String {
    let hex: String = match_id.chars().filter(|c| *c != '-').collect();
    format!("0x{:0>64}", hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_id_bytes32() {
        let id = "8d8ac610-566d-4ef0-9c22-186b2a5ed793";
        let b32 = match_id_bytes32(id);
        assert_eq!(b32.len(), 66);
        assert!(b32.starts_with("0x00000000000000000000000000000000"));
        assert!(b32.ends_with("8d8ac610566d4ef09c22186b2a5ed793"));
    }
}

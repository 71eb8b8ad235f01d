use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dork_core::settlement::{
    CreateEscrowParams, PendingSettlement, ProposeSettlementParams, SettlementT,
};
use dork_core::types::Amount;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone)]
pub struct EscrowEntry {
    pub players: Vec<String>,
    pub stake_per_player: Amount,
    pub deposits: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    escrows: HashMap<String, EscrowEntry>,
    proposals: Vec<ProposeSettlementParams>,
    finalized: Vec<String>,
    cancelled: Vec<String>,
    tx_counter: u64,
}

impl Inner {
    fn next_tx(&mut self) -> String {
        self.tx_counter += 1;
        format!("0x{:064x}", self.tx_counter)
    }
}

pub struct DummySettlement {
    inner: Arc<Mutex<Inner>>,
    escrow_address: String,
    min_stake_wei: Amount,
    game_ids: HashMap<String, String>,
    finalization_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DummySettlement {
    pub fn new(
        escrow_address: &str,
        min_stake_wei: &str,
        game_ids: HashMap<String, String>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            escrow_address: escrow_address.to_owned(),
            min_stake_wei: min_stake_wei.to_owned(),
            game_ids,
            finalization_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Simulate one player's on-chain deposit.
    pub fn deposit(&self, match_id: &str, player: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(escrow) = inner.escrows.get_mut(match_id) {
            escrow.deposits.insert(player.to_owned());
        }
    }

    pub fn get_escrow(&self, match_id: &str) -> Option<EscrowEntry> {
        self.inner.lock().unwrap().escrows.get(match_id).cloned()
    }

    pub fn get_proposals(&self) -> Vec<ProposeSettlementParams> {
        self.inner.lock().unwrap().proposals.clone()
    }

    pub fn finalized_matches(&self) -> Vec<String> {
        self.inner.lock().unwrap().finalized.clone()
    }

    pub fn cancelled_matches(&self) -> Vec<String> {
        self.inner.lock().unwrap().cancelled.clone()
    }

    /// Abort outstanding scheduled finalizations (shutdown path).
    pub fn abort_scheduled(&self) {
        for handle in self.finalization_tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl SettlementT for DummySettlement {
    async fn create_match(&self, params: CreateEscrowParams) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.escrows.insert(
            params.match_id.clone(),
            EscrowEntry {
                players: params.players,
                stake_per_player: params.stake_per_player,
                deposits: HashSet::new(),
            },
        );
        Some(inner.next_tx())
    }

    async fn propose_settlement(&self, params: ProposeSettlementParams) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.escrows.contains_key(&params.match_id) {
            return None;
        }
        inner.proposals.push(params);
        Some(inner.next_tx())
    }

    async fn finalize_settlement(&self, match_id: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.finalized.push(match_id.to_owned());
        Some(inner.next_tx())
    }

    async fn cancel_match(&self, match_id: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.escrows.remove(match_id).is_none() {
            return None;
        }
        inner.cancelled.push(match_id.to_owned());
        Some(inner.next_tx())
    }

    async fn is_fully_funded(&self, match_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .escrows
            .get(match_id)
            .map(|e| !e.players.is_empty() && e.players.iter().all(|p| e.deposits.contains(p)))
            .unwrap_or(false)
    }

    async fn get_minimum_stake(&self) -> Amount {
        self.min_stake_wei.clone()
    }

    fn game_id_bytes32(&self, game_id: &str) -> Option<String> {
        self.game_ids.get(game_id).cloned()
    }

    fn escrow_address(&self) -> String {
        self.escrow_address.clone()
    }

    fn schedule_finalization(&self, match_id: &str, delay_ms: u64) {
        let inner = self.inner.clone();
        let match_id = match_id.to_owned();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let mut inner = inner.lock().unwrap();
            let tx = inner.next_tx();
            inner.finalized.push(match_id.clone());
            info!("Finalized settlement for {} in {}", match_id, tx);
        });
        self.finalization_tasks.lock().unwrap().push(handle);
    }

    async fn reconcile_on_startup(&self, pending: &[PendingSettlement]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        for p in pending {
            if !inner.finalized.contains(&p.match_id) {
                inner.finalized.push(p.match_id.clone());
                info!(
                    "Reconciled pending settlement for {} ({})",
                    p.match_id, p.settlement_tx_hash
                );
            }
        }
        pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escrow_params(match_id: &str) -> CreateEscrowParams {
        CreateEscrowParams {
            match_id: match_id.into(),
            game_id_bytes32: "0xgame".into(),
            players: vec!["0xa".into(), "0xb".into()],
            stake_per_player: "100".into(),
        }
    }

    #[tokio::test]
    async fn test_funding_requires_every_player() {
        let settlement = DummySettlement::new("0xesc", "1", HashMap::new());
        settlement.create_match(escrow_params("m1")).await.unwrap();

        assert!(!settlement.is_fully_funded("m1").await);
        settlement.deposit("m1", "0xa");
        assert!(!settlement.is_fully_funded("m1").await);
        settlement.deposit("m1", "0xb");
        assert!(settlement.is_fully_funded("m1").await);
        assert!(!settlement.is_fully_funded("unknown").await);
    }

    #[tokio::test]
    async fn test_propose_records_params() {
        let settlement = DummySettlement::new("0xesc", "1", HashMap::new());
        settlement.create_match(escrow_params("m1")).await.unwrap();

        let tx = settlement
            .propose_settlement(ProposeSettlementParams {
                match_id: "m1".into(),
                winner: Some("0xa".into()),
                transcript_hash: "th".into(),
            })
            .await;
        assert!(tx.is_some());
        assert_eq!(settlement.get_proposals().len(), 1);
        assert_eq!(settlement.get_proposals()[0].winner.as_deref(), Some("0xa"));

        // proposals for unknown escrows fail like a reverted call
        let none = settlement
            .propose_settlement(ProposeSettlementParams {
                match_id: "nope".into(),
                winner: None,
                transcript_hash: "th".into(),
            })
            .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_scheduled_finalization_fires() {
        let settlement = DummySettlement::new("0xesc", "1", HashMap::new());
        settlement.create_match(escrow_params("m1")).await.unwrap();
        settlement.schedule_finalization("m1", 10);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(settlement.finalized_matches(), vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_reconcile_counts_pending() {
        let settlement = DummySettlement::new("0xesc", "1", HashMap::new());
        let pending = vec![PendingSettlement {
            match_id: "m1".into(),
            settlement_tx_hash: "0x01".into(),
        }];
        assert_eq!(settlement.reconcile_on_startup(&pending).await, 1);
        assert_eq!(settlement.finalized_matches(), vec!["m1".to_string()]);
    }
}

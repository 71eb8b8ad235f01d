//! Startup recovery: replay persisted matches and reconcile any
//! settlement proposals left in flight by the previous run.

use dork_core::error::Result;
use tracing::info;

use crate::lifecycle::{MatchLifecycle, RestoreSummary};

pub async fn run_recovery(lifecycle: &MatchLifecycle) -> Result<RestoreSummary> {
    let summary = lifecycle.restore_active_matches().await?;
    info!(
        "Recovery: {} active, {} waiting, {} completed on replay, {} flagged",
        summary.restored_active,
        summary.restored_waiting,
        summary.completed_on_replay,
        summary.flagged,
    );

    if let Some(settlement) = lifecycle.settlement() {
        let pending = lifecycle.storage().list_pending_settlements().await?;
        if !pending.is_empty() {
            let count = settlement.reconcile_on_startup(&pending).await;
            info!("Reconciled {} pending settlement proposals", count);
        }
    }
    Ok(summary)
}

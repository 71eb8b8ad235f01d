//! Matchmaking queue over the shared cache.
//!
//! Partitioned by `(game_id, stake_bucket)`; the stake bucket is `"0"` or
//! the exact stake string, so pairings never cross stakes.

use std::sync::Arc;

use dork_core::cache::CacheT;
use dork_core::error::Result;
use dork_core::types::{current_timestamp, PendingMatch, QueueEntry};
use rand::Rng;

pub fn stake_bucket(stake_wei: &str) -> &str {
    stake_wei
}

fn new_ticket() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub struct Matchmaker {
    cache: Arc<dyn CacheT>,
    ticket_ttl_ms: u64,
    pending_ttl_ms: u64,
}

impl Matchmaker {
    pub fn new(cache: Arc<dyn CacheT>, ticket_ttl_ms: u64, pending_ttl_ms: u64) -> Self {
        Self {
            cache,
            ticket_ttl_ms,
            pending_ttl_ms,
        }
    }

    /// Consume the pairing notification left for `player`, if any.
    pub async fn take_pending(
        &self,
        game_id: &str,
        stake_bucket: &str,
        player: &str,
    ) -> Result<Option<PendingMatch>> {
        self.cache
            .take_pending_match(game_id, stake_bucket, player)
            .await
    }

    pub async fn leave_pending(
        &self,
        game_id: &str,
        stake_bucket: &str,
        player: &str,
        pending: PendingMatch,
    ) -> Result<()> {
        self.cache
            .put_pending_match(game_id, stake_bucket, player, pending, self.pending_ttl_ms)
            .await
    }

    /// Atomically claim a waiting opponent, removing their queue entry.
    pub async fn take_opponent(
        &self,
        game_id: &str,
        stake_bucket: &str,
        exclude: &str,
    ) -> Result<Option<QueueEntry>> {
        self.cache.take_opponent(game_id, stake_bucket, exclude).await
    }

    /// Queue the caller: refresh an existing ticket in place, or insert a
    /// fresh one.
    pub async fn enqueue(
        &self,
        game_id: &str,
        stake_bucket: &str,
        player: &str,
        existing_ticket: Option<&str>,
    ) -> Result<String> {
        if let Some(ticket) = existing_ticket {
            if self
                .cache
                .refresh_ticket(game_id, stake_bucket, ticket, self.ticket_ttl_ms)
                .await?
            {
                return Ok(ticket.to_owned());
            }
        }
        let ticket = new_ticket();
        self.cache
            .put_ticket(
                game_id,
                stake_bucket,
                QueueEntry {
                    player: player.to_owned(),
                    ticket: ticket.clone(),
                    ts: current_timestamp(),
                },
                self.ticket_ttl_ms,
            )
            .await?;
        Ok(ticket)
    }

    pub async fn leave(&self, game_id: &str, stake_bucket: &str, ticket: &str) -> Result<bool> {
        self.cache.remove_ticket(game_id, stake_bucket, ticket).await
    }

    pub async fn size(&self, game_id: &str, stake_bucket: &str) -> Result<usize> {
        self.cache.queue_size(game_id, stake_bucket).await
    }

    /// Every live entry for a game, across all stake buckets.
    pub async fn all_entries(&self, game_id: &str) -> Result<Vec<(String, QueueEntry)>> {
        self.cache.queue_entries(game_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dork_core::cache::MemoryCache;

    fn matchmaker() -> Matchmaker {
        Matchmaker::new(Arc::new(MemoryCache::new()), 60_000, 60_000)
    }

    #[tokio::test]
    async fn test_enqueue_then_pair() {
        let mm = matchmaker();
        let ticket = mm.enqueue("tictactoe", "0", "0xa", None).await.unwrap();
        assert_eq!(ticket.len(), 32);
        assert_eq!(mm.size("tictactoe", "0").await.unwrap(), 1);

        let opponent = mm
            .take_opponent("tictactoe", "0", "0xb")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(opponent.player, "0xa");
        assert_eq!(opponent.ticket, ticket);
        assert_eq!(mm.size("tictactoe", "0").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejoin_refreshes_ticket() {
        let mm = matchmaker();
        let first = mm.enqueue("tictactoe", "0", "0xa", None).await.unwrap();
        let second = mm
            .enqueue("tictactoe", "0", "0xa", Some(&first))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(mm.size("tictactoe", "0").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_ticket_replaced() {
        let mm = matchmaker();
        let replacement = mm
            .enqueue("tictactoe", "0", "0xa", Some("deadbeef"))
            .await
            .unwrap();
        assert_ne!(replacement, "deadbeef");
        assert_eq!(mm.size("tictactoe", "0").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_leave_removes_entry() {
        let mm = matchmaker();
        let ticket = mm.enqueue("tictactoe", "0", "0xa", None).await.unwrap();
        assert!(mm.leave("tictactoe", "0", &ticket).await.unwrap());
        assert!(!mm.leave("tictactoe", "0", &ticket).await.unwrap());
        assert_eq!(mm.size("tictactoe", "0").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_all_entries_spans_buckets() {
        let mm = matchmaker();
        mm.enqueue("tictactoe", "0", "0xa", None).await.unwrap();
        mm.enqueue("tictactoe", "500", "0xb", None).await.unwrap();
        mm.enqueue("othello", "0", "0xc", None).await.unwrap();

        let mut entries = mm.all_entries("tictactoe").await.unwrap();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "0");
        assert_eq!(entries[0].1.player, "0xa");
        assert_eq!(entries[1].0, "500");
        assert_eq!(entries[1].1.player, "0xb");
    }

    #[tokio::test]
    async fn test_pending_round_trip() {
        let mm = matchmaker();
        let pending = PendingMatch {
            match_id: "m1".into(),
            opponent: "0xb".into(),
            stake_wei: "0".into(),
        };
        mm.leave_pending("tictactoe", "0", "0xa", pending.clone())
            .await
            .unwrap();
        assert_eq!(
            mm.take_pending("tictactoe", "0", "0xa").await.unwrap(),
            Some(pending)
        );
        assert_eq!(mm.take_pending("tictactoe", "0", "0xa").await.unwrap(), None);
    }
}

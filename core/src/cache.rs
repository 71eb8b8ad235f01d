//! Shared-cache contract and the in-process implementation.
//!
//! The queue, pending-match notifications, session tokens, game sessions
//! and active-match pointers all live here.  Each trait operation is a
//! single atomic step; that is what guarantees at-most-one-opponent under
//! concurrent joins and single-use token consumption.  A multi-process
//! deployment substitutes a shared-cache implementation that scripts the
//! same operations.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::types::{ActiveMatchPointer, PendingMatch, QueueEntry, SessionGrant};

#[async_trait]
pub trait CacheT: Send + Sync {
    /// Insert or replace the caller's queue entry.  At most one live
    /// ticket per `(game_id, stake_bucket, player)`.
    async fn put_ticket(
        &self,
        game_id: &str,
        stake_bucket: &str,
        entry: QueueEntry,
        ttl_ms: u64,
    ) -> Result<()>;

    /// Refresh the TTL of an existing ticket in place.  Returns `false`
    /// when no such ticket is live.
    async fn refresh_ticket(
        &self,
        game_id: &str,
        stake_bucket: &str,
        ticket: &str,
        ttl_ms: u64,
    ) -> Result<bool>;

    /// Atomically remove and return a waiting opponent other than
    /// `exclude`, if any.
    async fn take_opponent(
        &self,
        game_id: &str,
        stake_bucket: &str,
        exclude: &str,
    ) -> Result<Option<QueueEntry>>;

    async fn remove_ticket(&self, game_id: &str, stake_bucket: &str, ticket: &str)
        -> Result<bool>;

    async fn queue_size(&self, game_id: &str, stake_bucket: &str) -> Result<usize>;

    /// All live entries for a game across its stake buckets, as
    /// `(stake_bucket, entry)` pairs.
    async fn queue_entries(&self, game_id: &str) -> Result<Vec<(String, QueueEntry)>>;

    async fn put_pending_match(
        &self,
        game_id: &str,
        stake_bucket: &str,
        player: &str,
        pending: PendingMatch,
        ttl_ms: u64,
    ) -> Result<()>;

    /// Consumed on read.
    async fn take_pending_match(
        &self,
        game_id: &str,
        stake_bucket: &str,
        player: &str,
    ) -> Result<Option<PendingMatch>>;

    async fn put_session_token(&self, token: &str, grant: SessionGrant, ttl_ms: u64)
        -> Result<()>;

    /// Single use: the first take wins, any further take returns `None`.
    async fn take_session_token(&self, token: &str) -> Result<Option<SessionGrant>>;

    async fn put_game_session(&self, match_id: &str, player: &str, ttl_ms: u64) -> Result<()>;

    async fn has_game_session(&self, match_id: &str, player: &str) -> Result<bool>;

    async fn del_game_session(&self, match_id: &str, player: &str) -> Result<()>;

    async fn put_active_match(
        &self,
        player: &str,
        pointer: ActiveMatchPointer,
        ttl_ms: u64,
    ) -> Result<()>;

    async fn get_active_match(&self, player: &str) -> Result<Option<ActiveMatchPointer>>;

    async fn del_active_match(&self, player: &str) -> Result<()>;
}

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl_ms: u64) -> Self {
        Self {
            value,
            expires_at: Instant::now() + Duration::from_millis(ttl_ms),
        }
    }

    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Default)]
struct CacheInner {
    tickets: HashMap<(String, String), Vec<Expiring<QueueEntry>>>,
    pending: HashMap<(String, String, String), Expiring<PendingMatch>>,
    tokens: HashMap<String, Expiring<SessionGrant>>,
    sessions: HashMap<(String, String), Expiring<()>>,
    active: HashMap<String, Expiring<ActiveMatchPointer>>,
}

/// In-process cache.  All operations run under one mutex, which makes
/// every `take_*` a single critical section.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<CacheInner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheT for MemoryCache {
    async fn put_ticket(
        &self,
        game_id: &str,
        stake_bucket: &str,
        entry: QueueEntry,
        ttl_ms: u64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let bucket = inner
            .tickets
            .entry((game_id.to_owned(), stake_bucket.to_owned()))
            .or_default();
        bucket.retain(|e| e.live() && e.value.player != entry.player);
        bucket.push(Expiring::new(entry, ttl_ms));
        Ok(())
    }

    async fn refresh_ticket(
        &self,
        game_id: &str,
        stake_bucket: &str,
        ticket: &str,
        ttl_ms: u64,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(bucket) = inner
            .tickets
            .get_mut(&(game_id.to_owned(), stake_bucket.to_owned()))
        else {
            return Ok(false);
        };
        bucket.retain(Expiring::live);
        for e in bucket.iter_mut() {
            if e.value.ticket == ticket {
                e.expires_at = Instant::now() + Duration::from_millis(ttl_ms);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn take_opponent(
        &self,
        game_id: &str,
        stake_bucket: &str,
        exclude: &str,
    ) -> Result<Option<QueueEntry>> {
        let mut inner = self.inner.lock().await;
        let Some(bucket) = inner
            .tickets
            .get_mut(&(game_id.to_owned(), stake_bucket.to_owned()))
        else {
            return Ok(None);
        };
        bucket.retain(Expiring::live);
        let pos = bucket.iter().position(|e| e.value.player != exclude);
        Ok(pos.map(|i| bucket.remove(i).value))
    }

    async fn remove_ticket(
        &self,
        game_id: &str,
        stake_bucket: &str,
        ticket: &str,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(bucket) = inner
            .tickets
            .get_mut(&(game_id.to_owned(), stake_bucket.to_owned()))
        else {
            return Ok(false);
        };
        let before = bucket.len();
        bucket.retain(|e| e.live() && e.value.ticket != ticket);
        Ok(bucket.len() < before)
    }

    async fn queue_size(&self, game_id: &str, stake_bucket: &str) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .tickets
            .get_mut(&(game_id.to_owned(), stake_bucket.to_owned()))
            .map(|bucket| {
                bucket.retain(Expiring::live);
                bucket.len()
            })
            .unwrap_or(0))
    }

    async fn queue_entries(&self, game_id: &str) -> Result<Vec<(String, QueueEntry)>> {
        let mut inner = self.inner.lock().await;
        let mut entries = Vec::new();
        for ((game, bucket), list) in inner.tickets.iter_mut() {
            if game != game_id {
                continue;
            }
            list.retain(Expiring::live);
            for e in list.iter() {
                entries.push((bucket.clone(), e.value.clone()));
            }
        }
        Ok(entries)
    }

    async fn put_pending_match(
        &self,
        game_id: &str,
        stake_bucket: &str,
        player: &str,
        pending: PendingMatch,
        ttl_ms: u64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.pending.insert(
            (game_id.to_owned(), stake_bucket.to_owned(), player.to_owned()),
            Expiring::new(pending, ttl_ms),
        );
        Ok(())
    }

    async fn take_pending_match(
        &self,
        game_id: &str,
        stake_bucket: &str,
        player: &str,
    ) -> Result<Option<PendingMatch>> {
        let mut inner = self.inner.lock().await;
        let key = (game_id.to_owned(), stake_bucket.to_owned(), player.to_owned());
        Ok(inner
            .pending
            .remove(&key)
            .filter(Expiring::live)
            .map(|e| e.value))
    }

    async fn put_session_token(
        &self,
        token: &str,
        grant: SessionGrant,
        ttl_ms: u64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .tokens
            .insert(token.to_owned(), Expiring::new(grant, ttl_ms));
        Ok(())
    }

    async fn take_session_token(&self, token: &str) -> Result<Option<SessionGrant>> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .tokens
            .remove(token)
            .filter(Expiring::live)
            .map(|e| e.value))
    }

    async fn put_game_session(&self, match_id: &str, player: &str, ttl_ms: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(
            (match_id.to_owned(), player.to_owned()),
            Expiring::new((), ttl_ms),
        );
        Ok(())
    }

    async fn has_game_session(&self, match_id: &str, player: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .get(&(match_id.to_owned(), player.to_owned()))
            .map(Expiring::live)
            .unwrap_or(false))
    }

    async fn del_game_session(&self, match_id: &str, player: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .sessions
            .remove(&(match_id.to_owned(), player.to_owned()));
        Ok(())
    }

    async fn put_active_match(
        &self,
        player: &str,
        pointer: ActiveMatchPointer,
        ttl_ms: u64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .active
            .insert(player.to_owned(), Expiring::new(pointer, ttl_ms));
        Ok(())
    }

    async fn get_active_match(&self, player: &str) -> Result<Option<ActiveMatchPointer>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .active
            .get(player)
            .filter(|e| e.live())
            .map(|e| e.value.clone()))
    }

    async fn del_active_match(&self, player: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.active.remove(player);
        Ok(())
    }
}

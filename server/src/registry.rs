//! Process-wide index of live matches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dork_core::error::{Error, Result};
use dork_core::types::Match;
use tokio::task::JoinHandle;

use crate::executor::ExecutorHandle;
use crate::room::Room;

/// One live match: its mutable aggregate, its room, and (while ACTIVE)
/// its executor mailbox.
pub struct MatchHandle {
    pub meta: tokio::sync::Mutex<Match>,
    pub room: Arc<Room>,
    executor: tokio::sync::Mutex<Option<ExecutorHandle>>,
    deposit_poller: Mutex<Option<JoinHandle<()>>>,
}

impl MatchHandle {
    pub fn new(meta: Match) -> Self {
        Self {
            meta: tokio::sync::Mutex::new(meta),
            room: Arc::new(Room::new()),
            executor: tokio::sync::Mutex::new(None),
            deposit_poller: Mutex::new(None),
        }
    }

    pub async fn set_executor(&self, handle: ExecutorHandle) {
        *self.executor.lock().await = Some(handle);
    }

    pub async fn executor(&self) -> Option<ExecutorHandle> {
        self.executor.lock().await.clone()
    }

    pub async fn shutdown_executor(&self) {
        if let Some(exec) = self.executor.lock().await.take() {
            exec.shutdown().await;
        }
    }

    /// Install the per-match deposit poller.  The spawn closure runs under
    /// the lock, so at most one poller is ever live; returns false when one
    /// already is.
    pub fn install_deposit_poller<F>(&self, spawn: F) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut guard = self.deposit_poller.lock().unwrap();
        if guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return false;
        }
        *guard = Some(spawn());
        true
    }

    pub fn cancel_deposit_poller(&self) {
        if let Some(handle) = self.deposit_poller.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
pub struct MatchRegistry {
    matches: Mutex<HashMap<String, Arc<MatchHandle>>>,
    invites: Mutex<HashMap<String, String>>,
    emergency: AtomicBool,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, m: Match) -> Arc<MatchHandle> {
        let match_id = m.match_id.clone();
        let invite = m.invite_code.clone();
        let handle = Arc::new(MatchHandle::new(m));
        self.matches
            .lock()
            .unwrap()
            .insert(match_id.clone(), handle.clone());
        if let Some(code) = invite {
            self.invites.lock().unwrap().insert(code, match_id);
        }
        handle
    }

    pub fn get(&self, match_id: &str) -> Result<Arc<MatchHandle>> {
        self.matches
            .lock()
            .unwrap()
            .get(match_id)
            .cloned()
            .ok_or_else(|| Error::MatchNotFound(match_id.to_owned()))
    }

    pub fn list_all(&self) -> Vec<Arc<MatchHandle>> {
        self.matches.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.matches.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.lock().unwrap().is_empty()
    }

    pub fn remove(&self, match_id: &str) -> Option<Arc<MatchHandle>> {
        self.matches.lock().unwrap().remove(match_id)
    }

    pub fn clear(&self) {
        self.matches.lock().unwrap().clear();
        self.invites.lock().unwrap().clear();
    }

    pub fn resolve_invite(&self, code: &str) -> Result<String> {
        self.invites
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or(Error::InviteNotFound)
    }

    pub fn remove_invite(&self, code: &str) {
        self.invites.lock().unwrap().remove(code);
    }

    pub fn emergency(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    pub fn set_emergency(&self, on: bool) {
        self.emergency.store(on, Ordering::SeqCst);
    }
}

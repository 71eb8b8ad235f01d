//! Per-match fanout of outbound frames.
//!
//! Each connection hands the room an `mpsc` sender; per-connection order
//! is the channel's FIFO.  Sends never block the caller: a full or closed
//! peer is silently dropped.

use std::collections::HashMap;

use dork_core::protocol::Frame;
use tokio::sync::mpsc;
use tracing::debug;

pub type ConnSender = mpsc::Sender<Frame>;

#[derive(Default)]
struct RoomInner {
    players: HashMap<String, ConnSender>,
    spectators: Vec<ConnSender>,
    closed: bool,
}

#[derive(Default)]
pub struct Room {
    inner: std::sync::Mutex<RoomInner>,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a player connection, replacing any previous one.
    pub fn add_player(&self, player: &str, sender: ConnSender) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.closed {
            inner.players.insert(player.to_owned(), sender);
        }
    }

    pub fn remove_player(&self, player: &str) {
        self.inner.lock().unwrap().players.remove(player);
    }

    pub fn add_spectator(&self, sender: ConnSender) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.closed {
            inner.spectators.push(sender);
        }
    }

    pub fn player_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().players.keys().cloned().collect()
    }

    pub fn has_player(&self, player: &str) -> bool {
        self.inner.lock().unwrap().players.contains_key(player)
    }

    pub fn send_to(&self, player: &str, frame: Frame) {
        let mut inner = self.inner.lock().unwrap();
        let dead = match inner.players.get(player) {
            Some(sender) => match sender.try_send(frame) {
                Ok(()) => false,
                Err(mpsc::error::TrySendError::Closed(_)) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Dropping frame for slow connection: {}", player);
                    false
                }
            },
            None => false,
        };
        if dead {
            inner.players.remove(player);
        }
    }

    pub fn broadcast_players(&self, frame: Frame) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .players
            .retain(|_, sender| !matches!(sender.try_send(frame.clone()), Err(mpsc::error::TrySendError::Closed(_))));
    }

    pub fn broadcast_spectators(&self, frame: Frame) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .spectators
            .retain(|sender| !matches!(sender.try_send(frame.clone()), Err(mpsc::error::TrySendError::Closed(_))));
    }

    pub fn broadcast(&self, frame: Frame) {
        self.broadcast_players(frame.clone());
        self.broadcast_spectators(frame);
    }

    /// Drop every member; the room accepts no further connections.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.players.clear();
        inner.spectators.clear();
        inner.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dork_core::protocol::FramePayload;

    fn error_frame(msg: &str) -> Frame {
        Frame::new(
            "m1",
            FramePayload::Error {
                error: msg.to_owned(),
            },
        )
    }

    #[tokio::test]
    async fn test_broadcast_reaches_players_and_spectators() {
        let room = Room::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let (tx_s, mut rx_s) = mpsc::channel(8);
        room.add_player("0xa", tx_a);
        room.add_player("0xb", tx_b);
        room.add_spectator(tx_s);

        room.broadcast(error_frame("hello"));
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
        assert!(rx_s.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_dead_connection_is_dropped() {
        let room = Room::new();
        let (tx_a, rx_a) = mpsc::channel(8);
        room.add_player("0xa", tx_a);
        drop(rx_a);

        room.broadcast_players(error_frame("one"));
        assert!(!room.has_player("0xa"));
    }

    #[tokio::test]
    async fn test_direct_send_targets_one_player() {
        let room = Room::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        room.add_player("0xa", tx_a);
        room.add_player("0xb", tx_b);

        room.send_to("0xa", error_frame("direct"));
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_per_connection_fifo() {
        let room = Room::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        room.add_player("0xa", tx_a);

        room.send_to("0xa", error_frame("first"));
        room.send_to("0xa", error_frame("second"));
        let first = rx_a.recv().await.unwrap();
        let second = rx_a.recv().await.unwrap();
        assert!(matches!(first.payload, FramePayload::Error { ref error } if error == "first"));
        assert!(matches!(second.payload, FramePayload::Error { ref error } if error == "second"));
    }

    #[tokio::test]
    async fn test_closed_room_rejects_members() {
        let room = Room::new();
        room.close();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        room.add_player("0xa", tx_a);
        room.broadcast(error_frame("gone"));
        assert!(rx_a.try_recv().is_err());
    }
}

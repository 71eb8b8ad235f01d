//! The duplex session protocol.
//!
//! One state machine per WebSocket connection to `/session/game/<matchId>`:
//! HELLO authentication (single-use token or fresh signature), deposit
//! gating for staked matches, move submission, per-turn move timer,
//! advisory sync, chat, and a ping/pong heartbeat.  The session never
//! touches the orchestrator directly; every mutation goes through the
//! lifecycle service.

use std::sync::Arc;
use std::time::Duration;

use dork_core::cache::CacheT;
use dork_core::error::{Error, Result};
use dork_core::protocol::{
    ChatPayload, Frame, FramePayload, HelloPayload, SyncResponsePayload,
};
use dork_core::storage::ChatStoreT;
use dork_core::types::{
    addr_shorthand, current_timestamp, is_valid_address, ChatRecord, MatchStatus,
};
use dork_core::verifier::{auth_message, is_fresh, VerifierT};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::deposit::ensure_deposit_poller;
use crate::frame::game_state_frame;
use crate::registry::MatchHandle;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub async fn run_session_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let server = ctx.config.server();
    let addr = format!("{}:{}", server.host, server.session_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Session endpoint listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(ctx, stream).await {
                debug!("Session from {} ended: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(ctx: Arc<AppContext>, stream: TcpStream) -> anyhow::Result<()> {
    let mut path = String::new();
    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
        path = req.uri().path().to_owned();
        Ok(resp)
    })
    .await?;

    let Some(match_id) = path.strip_prefix("/session/game/").map(str::to_owned) else {
        warn!("Rejecting session with unknown path: {}", path);
        return Ok(());
    };
    Session::new(ctx, match_id).run(ws).await
}

async fn send_frame(ws_tx: &mut WsSink, frame: &Frame) -> anyhow::Result<()> {
    let raw = serde_json::to_string(frame)?;
    ws_tx.send(Message::Text(raw)).await?;
    Ok(())
}

async fn send_error(ws_tx: &mut WsSink, match_id: &str, error: &str) {
    let frame = Frame::new(
        match_id,
        FramePayload::Error {
            error: error.to_owned(),
        },
    );
    if let Ok(raw) = serde_json::to_string(&frame) {
        let _ = ws_tx.send(Message::Text(raw)).await;
    }
}

async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

struct Session {
    ctx: Arc<AppContext>,
    match_id: String,
    move_timeout_ms: Option<u64>,
    move_deadline: Option<Instant>,
    ping_sent_at: Option<Instant>,
}

impl Session {
    fn new(ctx: Arc<AppContext>, match_id: String) -> Self {
        Self {
            ctx,
            match_id,
            move_timeout_ms: None,
            move_deadline: None,
            ping_sent_at: None,
        }
    }

    async fn run(mut self, ws: WebSocketStream<TcpStream>) -> anyhow::Result<()> {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let timing = self.ctx.lifecycle.timing().clone();

        // The first frame must be a HELLO.
        let hello = match tokio::time::timeout(
            Duration::from_millis(timing.heartbeat_interval_ms),
            ws_rx.next(),
        )
        .await
        {
            Ok(Some(Ok(Message::Text(raw)))) => match serde_json::from_str::<Frame>(&raw) {
                Ok(Frame {
                    payload: FramePayload::Hello(hello),
                    ..
                }) => hello,
                _ => {
                    send_error(&mut ws_tx, &self.match_id, "expected HELLO").await;
                    return Ok(());
                }
            },
            _ => return Ok(()),
        };

        let handle = match self.ctx.registry.get(&self.match_id) {
            Ok(handle) => handle,
            Err(e) => {
                send_error(&mut ws_tx, &self.match_id, &e.to_string()).await;
                return Ok(());
            }
        };

        let player = match self.authenticate(&hello, &handle).await {
            Ok(player) => player,
            Err(e) => {
                send_error(&mut ws_tx, &self.match_id, &e.to_string()).await;
                return Ok(());
            }
        };
        info!("Session authenticated: {} on {}", player, self.match_id);

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(64);
        let (status, game_id, stake_wei) = {
            let meta = handle.meta.lock().await;
            (meta.status, meta.game_id.clone(), meta.stake_wei.clone())
        };
        self.move_timeout_ms = self.ctx.lifecycle.effective_move_timeout(&game_id);

        match status {
            MatchStatus::Completed => {
                send_error(&mut ws_tx, &self.match_id, "Match already over").await;
                return Ok(());
            }
            MatchStatus::Waiting => {
                handle.room.add_player(&player, out_tx.clone());
                if let Some(info) = self.ctx.lifecycle.escrow_info(&self.match_id, &stake_wei) {
                    let frame = Frame::new(
                        &self.match_id,
                        FramePayload::DepositRequired(dork_core::protocol::DepositRequiredPayload {
                            stake_wei: info.stake_wei,
                            match_id_bytes32: info.match_id_bytes32,
                            escrow_address: info.escrow_address,
                        }),
                    );
                    send_frame(&mut ws_tx, &frame).await?;
                    ensure_deposit_poller(self.ctx.lifecycle.clone(), handle.clone());
                }
                // a free private match just waits here for the accept
            }
            MatchStatus::Active => {
                handle.room.add_player(&player, out_tx.clone());
                if let Some(exec) = handle.executor().await {
                    if let Ok(view) = exec.view(&player).await {
                        let frame = game_state_frame(&self.match_id, &view, MatchStatus::Active);
                        self.observe_outbound(&frame, &player);
                        send_frame(&mut ws_tx, &frame).await?;
                    }
                }
            }
        }

        // The room holds the only sender now; eviction ends the session.
        drop(out_tx);

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(timing.heartbeat_interval_ms));
        heartbeat.tick().await;
        let pong_timeout = Duration::from_millis(timing.heartbeat_timeout_ms);

        loop {
            tokio::select! {
                inbound = ws_rx.next() => {
                    match inbound {
                        Some(Ok(Message::Text(raw))) => {
                            self.handle_inbound(&player, &handle, &raw, &mut ws_tx).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_tx.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.ping_sent_at = None;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!("Session read error for {}: {}", player, e);
                            break;
                        }
                    }
                }

                outbound = out_rx.recv() => {
                    match outbound {
                        Some(frame) => {
                            let game_over = matches!(frame.payload, FramePayload::GameOver(_));
                            self.observe_outbound(&frame, &player);
                            send_frame(&mut ws_tx, &frame).await?;
                            if game_over {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                _ = heartbeat.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                    if self.ping_sent_at.is_none() {
                        self.ping_sent_at = Some(Instant::now());
                    }
                }

                _ = maybe_sleep(self.ping_sent_at.map(|t| t + pong_timeout)) => {
                    debug!("Heartbeat lost for {}", player);
                    break;
                }

                _ = maybe_sleep(self.move_deadline) => {
                    self.move_deadline = None;
                    match self.ctx.lifecycle.forfeit_if_current(&self.match_id, &player).await {
                        Ok(true) => info!("Move timer expired for {} on {}", player, self.match_id),
                        Ok(false) => {}
                        Err(e) => warn!("Timeout forfeit failed for {}: {}", self.match_id, e),
                    }
                }
            }
        }

        handle.room.remove_player(&player);
        if handle.meta.lock().await.status == MatchStatus::Active {
            handle.room.broadcast(Frame::new(
                &self.match_id,
                FramePayload::Chat(ChatPayload {
                    sender: String::new(),
                    display_name: "server".into(),
                    message: format!("{} disconnected", addr_shorthand(&player)),
                }),
            ));
        }
        Ok(())
    }

    async fn authenticate(&self, hello: &HelloPayload, handle: &Arc<MatchHandle>) -> Result<String> {
        let player = hello.player_id.clone();
        if !is_valid_address(&player) {
            return Err(Error::InvalidAddress(player));
        }
        let timing = self.ctx.lifecycle.timing();

        if let Some(token) = &hello.token {
            let grant = self
                .ctx
                .cache
                .take_session_token(token)
                .await?
                .ok_or(Error::SessionTokenInvalid)?;
            if grant.match_id != self.match_id || grant.player != player {
                return Err(Error::SessionTokenInvalid);
            }
            self.ctx
                .cache
                .put_game_session(&self.match_id, &player, timing.game_session_ttl_ms)
                .await?;
            let meta = handle.meta.lock().await;
            self.ctx
                .cache
                .put_active_match(
                    &player,
                    dork_core::types::ActiveMatchPointer {
                        match_id: self.match_id.clone(),
                        game_id: meta.game_id.clone(),
                        stake_wei: meta.stake_wei.clone(),
                    },
                    timing.active_match_ttl_ms,
                )
                .await?;
            return Ok(player);
        }

        if let (Some(signature), Some(timestamp)) = (&hello.signature, hello.timestamp) {
            if !is_fresh(timestamp, current_timestamp(), timing.auth_skew_ms) {
                return Err(Error::SignatureExpired);
            }
            let message = auth_message(&player, timestamp);
            self.ctx
                .verifier
                .verify(&player, message.as_bytes(), signature)?;
            if !self
                .ctx
                .cache
                .has_game_session(&self.match_id, &player)
                .await?
            {
                return Err(Error::SessionNotFound);
            }
            return Ok(player);
        }

        Err(Error::InvalidSignature)
    }

    async fn handle_inbound(
        &mut self,
        player: &str,
        handle: &Arc<MatchHandle>,
        raw: &str,
        ws_tx: &mut WsSink,
    ) -> anyhow::Result<()> {
        let frame: Frame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                send_error(ws_tx, &self.match_id, &format!("malformed frame: {}", e)).await;
                return Ok(());
            }
        };

        match frame.payload {
            FramePayload::ActionCommit { action } => {
                if let Err(e) = self
                    .ctx
                    .lifecycle
                    .submit_move(&self.match_id, player, action)
                    .await
                {
                    send_error(ws_tx, &self.match_id, &e.to_string()).await;
                }
            }

            FramePayload::Forfeit => {
                if let Err(e) = self
                    .ctx
                    .lifecycle
                    .forfeit_match(&self.match_id, player, "forfeit")
                    .await
                {
                    send_error(ws_tx, &self.match_id, &e.to_string()).await;
                }
            }

            FramePayload::SyncRequest { .. } => {
                let payload = self.build_sync(player, handle).await;
                let frame = Frame::new(&self.match_id, FramePayload::SyncResponse(payload));
                send_frame(ws_tx, &frame).await?;
            }

            FramePayload::Chat(chat) => {
                let outgoing = ChatPayload {
                    sender: player.to_owned(),
                    display_name: addr_shorthand(player),
                    message: chat.message.clone(),
                };
                handle
                    .room
                    .broadcast(Frame::new(&self.match_id, FramePayload::Chat(outgoing)));
                if let Err(e) = self
                    .ctx
                    .chat
                    .save_chat(&ChatRecord {
                        match_id: self.match_id.clone(),
                        sender: player.to_owned(),
                        message: chat.message,
                        created_at: current_timestamp(),
                    })
                    .await
                {
                    warn!("Chat persistence failed: {}", e);
                }
            }

            FramePayload::Hello(_) => {
                send_error(ws_tx, &self.match_id, "already authenticated").await;
            }

            // outbound-only frames are advisory noise from the client
            _ => {}
        }
        Ok(())
    }

    async fn build_sync(&self, player: &str, handle: &Arc<MatchHandle>) -> SyncResponsePayload {
        let status = handle.meta.lock().await.status;
        if status == MatchStatus::Active {
            if let Some(exec) = handle.executor().await {
                if let Ok(view) = exec.view(player).await {
                    return SyncResponsePayload {
                        your_turn: view.your_turn,
                        current_player: view.current_player,
                        legal_actions: Some(view.legal_actions),
                        match_status: status,
                    };
                }
            }
        }
        SyncResponsePayload {
            your_turn: false,
            current_player: String::new(),
            legal_actions: None,
            match_status: status,
        }
    }

    fn observe_outbound(&mut self, frame: &Frame, player: &str) {
        match &frame.payload {
            FramePayload::GameState(gs) => {
                if gs.your_turn {
                    self.arm_move_timer();
                } else {
                    self.move_deadline = None;
                }
            }
            FramePayload::StepResult(sr) => {
                if sr.next_player.as_deref() == Some(player) {
                    self.arm_move_timer();
                } else {
                    self.move_deadline = None;
                }
            }
            FramePayload::GameOver(_) => {
                self.move_deadline = None;
            }
            _ => {}
        }
    }

    fn arm_move_timer(&mut self) {
        if let Some(ms) = self.move_timeout_ms {
            self.move_deadline = Some(Instant::now() + Duration::from_millis(ms));
        }
    }
}

//! The RPC shell over the lifecycle service.
//!
//! Authenticated methods take `{playerId, signature, timestamp, ...}`
//! where the signature covers the fixed auth message; the thin HTTP
//! gateway in front maps call failures onto status codes.

use std::net::SocketAddr;
use std::sync::Arc;

use dork_core::error::Error;
use dork_core::types::{current_timestamp, is_valid_address};
use dork_core::verifier::{auth_message, is_fresh, AuthProof, VerifierT};
use hyper::Method;
use jsonrpsee::core::error::Error as RpcError;
use jsonrpsee::server::{AllowHosts, ServerBuilder, ServerHandle};
use jsonrpsee::types::error::CallError;
use jsonrpsee::types::Params;
use jsonrpsee::RpcModule;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::context::AppContext;
use crate::lifecycle::{EscrowInfo, JoinQueueResult};

fn failed(e: Error) -> RpcError {
    RpcError::Call(CallError::Failed(e.into()))
}

fn verify_auth(context: &AppContext, auth: &AuthProof) -> Result<(), RpcError> {
    if !is_valid_address(&auth.player_id) {
        return Err(failed(Error::InvalidAddress(auth.player_id.clone())));
    }
    let skew = context.lifecycle.timing().auth_skew_ms;
    if !is_fresh(auth.timestamp, current_timestamp(), skew) {
        return Err(failed(Error::SignatureExpired));
    }
    let message = auth_message(&auth.player_id, auth.timestamp);
    context
        .verifier
        .verify(&auth.player_id, message.as_bytes(), &auth.signature)
        .map_err(failed)
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct GameInfo {
    game_id: String,
    name: String,
    min_players: u16,
    max_players: u16,
}

async fn get_games(_params: Params<'_>, context: Arc<AppContext>) -> Result<Vec<GameInfo>, RpcError> {
    Ok(context
        .games
        .list_meta()
        .into_iter()
        .map(|m| GameInfo {
            game_id: m.game_id,
            name: m.name,
            min_players: m.min_players,
            max_players: m.max_players,
        })
        .collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterKeyParams {
    player_id: String,
    public_key_pem: String,
}

async fn register_key(params: Params<'_>, context: Arc<AppContext>) -> Result<bool, RpcError> {
    let (p,) = params.parse::<(RegisterKeyParams,)>()?;
    if !is_valid_address(&p.player_id) {
        return Err(failed(Error::InvalidAddress(p.player_id)));
    }
    context
        .verifier
        .register_key(&p.player_id, &p.public_key_pem)
        .map_err(failed)?;
    Ok(true)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinQueueParams {
    #[serde(flatten)]
    auth: AuthProof,
    game_id: String,
    stake_wei: Option<String>,
    ticket: Option<String>,
    settings: Option<serde_json::Value>,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct JoinQueueResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    match_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ws_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    opponent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    escrow: Option<EscrowInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ticket: Option<String>,
}

async fn join_queue(
    params: Params<'_>,
    context: Arc<AppContext>,
) -> Result<JoinQueueResponse, RpcError> {
    let (p,) = params.parse::<(JoinQueueParams,)>()?;
    verify_auth(&context, &p.auth)?;
    info!("Queue join: {} for {}", p.auth.player_id, p.game_id);

    let settings = p.settings.map(|v| v.to_string());
    let result = context
        .lifecycle
        .join_queue(
            &p.auth.player_id,
            &p.game_id,
            p.stake_wei.as_deref(),
            p.ticket.as_deref(),
            settings,
        )
        .await
        .map_err(failed)?;

    Ok(match result {
        JoinQueueResult::Matched {
            match_id,
            ws_token,
            opponent,
            escrow,
        } => JoinQueueResponse {
            status: "matched",
            match_id: Some(match_id),
            ws_token: Some(ws_token),
            opponent,
            escrow,
            ticket: None,
        },
        JoinQueueResult::Queued { ticket } => JoinQueueResponse {
            status: "queued",
            match_id: None,
            ws_token: None,
            opponent: None,
            escrow: None,
            ticket: Some(ticket),
        },
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaveQueueParams {
    game_id: String,
    stake_wei: Option<String>,
    ticket: String,
}

#[derive(Serialize, Clone)]
struct SuccessResponse {
    success: bool,
}

async fn leave_queue(
    params: Params<'_>,
    context: Arc<AppContext>,
) -> Result<SuccessResponse, RpcError> {
    let (p,) = params.parse::<(LeaveQueueParams,)>()?;
    let success = context
        .lifecycle
        .leave_queue(&p.game_id, p.stake_wei.as_deref(), &p.ticket)
        .await
        .map_err(failed)?;
    Ok(SuccessResponse { success })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePrivateParams {
    #[serde(flatten)]
    auth: AuthProof,
    game_id: String,
    stake_wei: Option<String>,
    settings: Option<serde_json::Value>,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct PrivateMatchResponse {
    match_id: String,
    invite_code: String,
    ws_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    escrow: Option<EscrowInfo>,
}

async fn create_private_match(
    params: Params<'_>,
    context: Arc<AppContext>,
) -> Result<PrivateMatchResponse, RpcError> {
    let (p,) = params.parse::<(CreatePrivateParams,)>()?;
    verify_auth(&context, &p.auth)?;

    let settings = p.settings.map(|v| v.to_string());
    let (match_id, invite_code, ws_token, escrow) = context
        .lifecycle
        .create_private_match(
            &p.auth.player_id,
            &p.game_id,
            settings,
            p.stake_wei.as_deref(),
        )
        .await
        .map_err(failed)?;
    Ok(PrivateMatchResponse {
        match_id,
        invite_code,
        ws_token,
        escrow,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptParams {
    #[serde(flatten)]
    auth: AuthProof,
    invite_code: String,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct AcceptResponse {
    match_id: String,
    ws_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    escrow: Option<EscrowInfo>,
}

async fn accept_private_match(
    params: Params<'_>,
    context: Arc<AppContext>,
) -> Result<AcceptResponse, RpcError> {
    let (p,) = params.parse::<(AcceptParams,)>()?;
    verify_auth(&context, &p.auth)?;

    let (match_id, ws_token, escrow) = context
        .lifecycle
        .accept_private_match(&p.auth.player_id, &p.invite_code)
        .await
        .map_err(failed)?;
    Ok(AcceptResponse {
        match_id,
        ws_token,
        escrow,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveMatchParams {
    #[serde(flatten)]
    auth: AuthProof,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct ActiveMatchResponse {
    has_active_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    match_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    game_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ws_token: Option<String>,
}

async fn get_active_match(
    params: Params<'_>,
    context: Arc<AppContext>,
) -> Result<ActiveMatchResponse, RpcError> {
    let (p,) = params.parse::<(ActiveMatchParams,)>()?;
    verify_auth(&context, &p.auth)?;

    match context
        .lifecycle
        .get_active_match(&p.auth.player_id)
        .await
        .map_err(failed)?
    {
        Some((pointer, ws_token)) => Ok(ActiveMatchResponse {
            has_active_match: true,
            match_id: Some(pointer.match_id),
            game_id: Some(pointer.game_id),
            ws_token: Some(ws_token),
        }),
        None => Ok(ActiveMatchResponse {
            has_active_match: false,
            match_id: None,
            game_id: None,
            ws_token: None,
        }),
    }
}

pub async fn run_rpc_server(context: Arc<AppContext>) -> anyhow::Result<ServerHandle> {
    let cors = CorsLayer::new()
        .allow_methods([Method::POST])
        .allow_origin(Any)
        .allow_headers([hyper::header::CONTENT_TYPE]);
    let middleware = ServiceBuilder::new().layer(cors);

    let server_config = context.config.server();
    let host = format!("{}:{}", server_config.host, server_config.port);
    let server = ServerBuilder::default()
        .set_host_filtering(AllowHosts::Any)
        .set_middleware(middleware)
        .build(host.parse::<SocketAddr>()?)
        .await?;

    let mut module = RpcModule::new((*context).clone());
    module.register_async_method("get_games", get_games)?;
    module.register_async_method("register_key", register_key)?;
    module.register_async_method("join_queue", join_queue)?;
    module.register_async_method("leave_queue", leave_queue)?;
    module.register_async_method("create_private_match", create_private_match)?;
    module.register_async_method("accept_private_match", accept_private_match)?;
    module.register_async_method("get_active_match", get_active_match)?;

    let handle = server.start(module)?;
    info!("RPC server started at {}", host);
    Ok(handle)
}

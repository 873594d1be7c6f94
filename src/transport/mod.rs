//! Transport (C1, §4.1, §6): per-endpoint WebSocket upgrades, frame-size
//! limits, heartbeat, and the per-connection read/write actor loop.
//!
//! Grounded on the teacher's `routes/websocket.rs` `handle_socket` (split
//! sender/receiver, heartbeat `tokio::spawn` loop, `tx`/`rx` mpsc forwarding
//! into the socket sink) generalized from one `/ws` route with an unbounded
//! per-connection channel to the five endpoints in §6, each with its own
//! frame-size cap and a *bounded* outbound channel so backpressure (§4.1)
//! has somewhere to show up.

use axum::{
    extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    response::IntoResponse,
};
use axum_extra::{headers, TypedHeader};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth::TokenPolicy;
use crate::errors::ErrorCode;
use crate::hub::{CloseReason, ConnectionId, Endpoint};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::AppState;

/// Declared per endpoint at router-construction time (§4.1, §6).
#[derive(Clone, Copy)]
pub struct EndpointConfig {
    pub endpoint: Endpoint,
    pub max_frame_bytes: usize,
    pub token_policy: TokenPolicy,
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// `ws.max_message_size(...).on_upgrade(...)`, generalized from the
/// teacher's single fixed `MAX_MESSAGE_SIZE` to the per-endpoint cap in
/// `EndpointConfig`. Compression is never enabled (§4.1: "the repository
/// has documented frame-corruption hazards with compression on").
async fn upgrade(
    ws: WebSocketUpgrade,
    protocol_header: Option<TypedHeader<headers::SecWebsocketProtocol>>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
    config: EndpointConfig,
) -> impl IntoResponse {
    let token = protocol_header
        .map(|h| h.to_string())
        .filter(|t| !t.is_empty())
        .or(params.token);

    ws.max_message_size(config.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, config, token))
}

async fn market_data_upgrade(
    ws: WebSocketUpgrade,
    header: Option<TypedHeader<headers::SecWebsocketProtocol>>,
    query: Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let config = EndpointConfig {
        endpoint: Endpoint::MarketData,
        max_frame_bytes: state.config.max_frame_bytes_market,
        token_policy: TokenPolicy::OptionalAnonymous,
    };
    upgrade(ws, header, query, State(state), config).await
}

async fn contest_upgrade(
    ws: WebSocketUpgrade,
    header: Option<TypedHeader<headers::SecWebsocketProtocol>>,
    query: Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let config = EndpointConfig {
        endpoint: Endpoint::Contest,
        max_frame_bytes: state.config.max_frame_bytes_contest,
        token_policy: TokenPolicy::Required,
    };
    upgrade(ws, header, query, State(state), config).await
}

async fn wallet_upgrade(
    ws: WebSocketUpgrade,
    header: Option<TypedHeader<headers::SecWebsocketProtocol>>,
    query: Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let config = EndpointConfig {
        endpoint: Endpoint::Wallet,
        max_frame_bytes: state.config.max_frame_bytes_wallet,
        token_policy: TokenPolicy::Required,
    };
    upgrade(ws, header, query, State(state), config).await
}

async fn notifications_upgrade(
    ws: WebSocketUpgrade,
    header: Option<TypedHeader<headers::SecWebsocketProtocol>>,
    query: Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let config = EndpointConfig {
        endpoint: Endpoint::Notifications,
        max_frame_bytes: state.config.max_frame_bytes_notifications,
        token_policy: TokenPolicy::Required,
    };
    upgrade(ws, header, query, State(state), config).await
}

async fn system_settings_upgrade(
    ws: WebSocketUpgrade,
    header: Option<TypedHeader<headers::SecWebsocketProtocol>>,
    query: Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let config = EndpointConfig {
        endpoint: Endpoint::SystemSettings,
        max_frame_bytes: state.config.max_frame_bytes_settings,
        token_policy: TokenPolicy::Required,
    };
    upgrade(ws, header, query, State(state), config).await
}

/// The five endpoints of §6, each bound to its own frame cap and auth
/// policy. Mounted at the router root by `main.rs` (paths already carry
/// the `/ws/...` prefix, matching spec §6 verbatim).
pub fn router() -> axum::Router<AppState> {
    use axum::routing::get;
    axum::Router::new()
        .route("/ws/market-data", get(market_data_upgrade))
        .route("/ws/contest", get(contest_upgrade))
        .route("/ws/wallet", get(wallet_upgrade))
        .route("/ws/notifications", get(notifications_upgrade))
        .route("/ws/system-settings", get(system_settings_upgrade))
}

async fn handle_socket(socket: WebSocket, state: AppState, config: EndpointConfig, token: Option<String>) {
    let principal = match state
        .auth
        .authenticate(token.as_deref(), config.token_policy)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            warn!(target: "security", endpoint = config.endpoint.as_str(), error = %e, "upgrade rejected");
            state.diagnostics.record_rejected_upgrade();
            let _ = socket.close().await;
            return;
        }
    };

    let new_conn = state.hub.register(principal, config.endpoint, None);
    let conn = new_conn.handle;
    let mut outbound_rx = new_conn.outbound_rx;
    let mut close_rx = new_conn.close_rx;

    let (mut sink, mut stream) = socket.split();

    let heartbeat_interval = state.config.heartbeat_interval;
    let heartbeat_timeout = state.config.heartbeat_timeout;
    let conn_for_heartbeat = conn.clone();
    let mut heartbeat = tokio::time::interval(heartbeat_interval);

    info!(connection_id = conn.id, endpoint = config.endpoint.as_str(), "connection established");

    let close_reason = loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let elapsed = chrono::Utc::now().timestamp() - conn_for_heartbeat.last_pong_at.load(Ordering::Relaxed);
                if elapsed as u64 > heartbeat_timeout.as_secs() {
                    break CloseReason::ReadError;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break CloseReason::ReadError;
                }
            }
            reason = close_rx.recv() => {
                break reason.unwrap_or(CloseReason::ClientClosed);
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(out) => {
                        if sink.send(Message::Text(out.frame.into_text())).await.is_err() {
                            break CloseReason::ReadError;
                        }
                    }
                    None => break CloseReason::ClientClosed,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_text_frame(&state, &conn, &text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        conn.mark_pong();
                    }
                    Some(Ok(Message::Close(_))) => break CloseReason::ClientClosed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_id = conn.id, error = %e, "read error");
                        break CloseReason::ReadError;
                    }
                    None => break CloseReason::ClientClosed,
                }
            }
        }
    };

    finish(&state, &conn.id, &mut sink, close_reason).await;
}

async fn handle_text_frame(state: &AppState, conn: &Arc<crate::hub::ConnectionHandle>, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(_) => {
            conn.send(crate::protocol::Outbound::best_effort(ServerFrame::error(
                ErrorCode::BadRequest,
                "malformed frame",
                None,
            )));
            return;
        }
    };

    match state.hub.on_frame(conn, frame).await {
        Ok(Some(reply)) => conn.send(crate::protocol::Outbound::best_effort(reply)),
        Ok(None) => {}
        Err(e) => {
            let code = state.hub.error_code_for(&e);
            if code.as_u16() / 1000 == 4 {
                let violations = conn.record_protocol_violation();
                if violations > state.config.protocol_violation_limit as u64 {
                    conn.close(CloseReason::ProtocolViolations);
                }
            }
            conn.send(crate::protocol::Outbound::best_effort(ServerFrame::error(
                code,
                e.to_string(),
                None,
            )));
        }
    }
}

async fn finish(
    state: &AppState,
    id: &ConnectionId,
    sink: &mut (impl futures::Sink<Message> + Unpin),
    reason: CloseReason,
) {
    state.hub.unregister(*id, reason.as_str()).await;
    let close = Message::Close(Some(CloseFrame {
        code: close_code(&reason),
        reason: reason.as_str().into(),
    }));
    let _ = sink.send(close).await;
    info!(connection_id = id, reason = reason.as_str(), "connection closed");
}

fn close_code(reason: &CloseReason) -> u16 {
    match reason {
        CloseReason::Congested => 1013, // try again later
        CloseReason::ClientClosed => 1000,
        CloseReason::ReadError => 1002,
        CloseReason::ProtocolViolations => 1008,
        CloseReason::Shutdown => 1001,
    }
}

/// Broadcasts SYSTEM `shutdown` to every connected Connection, then allows
/// `drain` before the caller terminates the listener (§5 graceful shutdown).
pub async fn broadcast_shutdown(state: &AppState, drain: Duration) {
    for conn in state.hub.registry().iter() {
        conn.send(crate::protocol::Outbound::best_effort(ServerFrame::System {
            reason: "shutdown".to_string(),
        }));
    }
    tokio::time::sleep(drain).await;
    for conn in state.hub.registry().iter() {
        conn.close(CloseReason::Shutdown);
    }
}

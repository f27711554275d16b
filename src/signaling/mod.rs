//! Signaling WebSocket surface (§4.6). WebRTC offer/answer/ICE relay between
//! two peers already co-members of a call (verified by the caller before
//! dispatch — see [`crate::calls`]). Structurally a twin of [`crate::chat`].

pub mod hub;

pub use hub::SignalingHub;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::{validate_token, TokenType};
use crate::state::AppState;

#[derive(Clone, Default)]
pub struct SignalingAdmission {
    current: Arc<AtomicUsize>,
}

impl SignalingAdmission {
    pub fn try_admit(&self, max: usize) -> Option<SignalingAdmissionGuard> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(SignalingAdmissionGuard { counter: self.current.clone() });
            }
        }
    }
}

pub struct SignalingAdmissionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for SignalingAdmissionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// Raw relay payload: `to_user_id` plus an opaque SDP/ICE blob the client
/// constructs. This service never parses WebRTC payloads — it verifies
/// call co-membership (via [`crate::calls`]) and relays bytes.
#[derive(Debug, Deserialize)]
struct SignalFrame {
    to_user_id: Uuid,
    call_id: Uuid,
    payload: serde_json::Value,
}

fn origin_allowed(headers: &HeaderMap, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|origin| allowlist.iter().any(|allowed| allowed == origin))
        .unwrap_or(false)
}

pub async fn signaling_ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    if !origin_allowed(&headers, &state.config.ws_origin_allowlist) {
        return axum::http::StatusCode::FORBIDDEN.into_response();
    }

    let claims = match validate_token(&params.token, &state.config.jwt_secret, &state.config.jwt_audience) {
        Ok(c) if c.token_type == TokenType::Access => c,
        _ => return axum::http::StatusCode::UNAUTHORIZED.into_response(),
    };
    let user_id = match claims.user_id() {
        Ok(id) => id,
        Err(_) => return axum::http::StatusCode::UNAUTHORIZED.into_response(),
    };
    if state.sessions.is_access_token_revoked(&claims.jti).await {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    let guard = match state
        .signaling_admission
        .try_admit(state.config.signaling_max_connections)
    {
        Some(g) => g,
        None => return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, guard))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid, _admission_guard: SignalingAdmissionGuard) {
    let conn_id = Uuid::new_v4();
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(state.config.ws_out_channel_buffer);

    state.signaling_hub.register(user_id, conn_id, out_tx).await;

    let ping_interval = state.config.ws_ping_interval;
    let send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        loop {
            tokio::select! {
                maybe_msg = out_rx.recv() => {
                    match maybe_msg {
                        Some(text) => {
                            if ws_sink.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if ws_sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let hub = state.signaling_hub.clone();
    let calls = state.calls.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_stream.next().await {
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                _ => continue,
            };
            let frame: SignalFrame = match serde_json::from_str(&text) {
                Ok(f) => f,
                Err(_) => continue,
            };
            if !calls.are_co_participants(frame.call_id, user_id, frame.to_user_id).await {
                continue;
            }
            let relay = serde_json::json!({
                "from_user_id": user_id,
                "call_id": frame.call_id,
                "payload": frame.payload,
            });
            if let Ok(encoded) = serde_json::to_string(&relay) {
                hub.relay(frame.to_user_id, encoded).await;
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.signaling_hub.deregister(user_id, conn_id).await;
}

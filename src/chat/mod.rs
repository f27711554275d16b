//! Chat WebSocket surface (§4.5). One gateway socket per client that
//! subscribes/unsubscribes to conversation rooms dynamically; bounded
//! admission; per-connection read/write pumps racing under
//! `tokio::select!`; origin-allowlist enforcement before upgrade. Mirrored
//! by the signaling hub in [`crate::signaling`].

pub mod hub;

pub use hub::ChatHub;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::{validate_token, TokenType};
use crate::handlers::shared::require_participant;
use crate::state::AppState;

/// Tracks the number of live chat connections across this instance so the
/// admission check in `chat_ws_handler` can reject new sockets once
/// `chat_max_connections` is reached.
#[derive(Clone, Default)]
pub struct ChatAdmission {
    current: Arc<AtomicUsize>,
}

impl ChatAdmission {
    pub fn try_admit(&self, max: usize) -> Option<AdmissionGuard> {
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
                return Some(AdmissionGuard {
                    counter: self.current.clone(),
                });
            }
        }
    }
}

pub struct AdmissionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientOp {
    Subscribe { conversation_id: Uuid },
    Unsubscribe { conversation_id: Uuid },
    Message { conversation_id: Uuid, body: String },
    Heartbeat,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ServerEvent<'a> {
    Ready,
    Error { message: &'a str },
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

pub async fn chat_ws_handler(
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

    let guard = match state.chat_admission.try_admit(state.config.chat_max_connections) {
        Some(g) => g,
        None => return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, guard))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid, _admission_guard: AdmissionGuard) {
    let conn_id = Uuid::new_v4();
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(state.config.ws_out_channel_buffer);

    if let Ok(ready) = serde_json::to_string(&ServerEvent::Ready) {
        let _ = ws_sink.send(Message::Text(ready)).await;
    }
    let _ = state.presence.set_online(user_id).await;

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

    let hub = state.chat_hub.clone();
    let presence = state.presence.clone();
    let pool = state.pool.clone();
    let out_tx_for_recv = out_tx.clone();
    let recv_task = tokio::spawn(async move {
        let mut subscribed: HashSet<Uuid> = HashSet::new();
        while let Some(Ok(msg)) = ws_stream.next().await {
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                _ => continue,
            };
            let op: ClientOp = match serde_json::from_str(&text) {
                Ok(op) => op,
                Err(_) => {
                    if let Ok(err) = serde_json::to_string(&ServerEvent::Error { message: "malformed frame" }) {
                        let _ = out_tx_for_recv.try_send(err);
                    }
                    continue;
                }
            };
            match op {
                ClientOp::Subscribe { conversation_id } => {
                    if require_participant(&pool, conversation_id, user_id).await.is_err() {
                        if let Ok(err) = serde_json::to_string(&ServerEvent::Error {
                            message: "not a participant in this conversation",
                        }) {
                            let _ = out_tx_for_recv.try_send(err);
                        }
                        continue;
                    }
                    hub.subscribe(conversation_id, conn_id, user_id, out_tx_for_recv.clone()).await;
                    subscribed.insert(conversation_id);
                }
                ClientOp::Unsubscribe { conversation_id } => {
                    hub.unsubscribe(conversation_id, conn_id).await;
                    subscribed.remove(&conversation_id);
                }
                ClientOp::Message { conversation_id, body } => {
                    if subscribed.contains(&conversation_id) {
                        hub.broadcast(conversation_id, body, Some(conn_id)).await;
                    }
                }
                ClientOp::Heartbeat => {
                    let _ = presence.touch(user_id).await;
                }
            }
        }
        for conversation_id in subscribed {
            hub.unsubscribe(conversation_id, conn_id).await;
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    let _ = state.presence.set_offline(user_id).await;
}

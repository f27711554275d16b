//! Chat hub coordinator (§4.5). A single task owns the conversation→members
//! map; every mutation goes through a bounded mpsc channel instead of a
//! shared lock, so there is exactly one place that can observe (and log)
//! the full membership graph at any instant.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::resilience::kv::KvClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FanoutEnvelope {
    origin_instance: Uuid,
    payload: String,
}

enum HubCommand {
    Subscribe {
        conversation_id: Uuid,
        conn_id: Uuid,
        user_id: Uuid,
        sender: mpsc::Sender<String>,
    },
    Unsubscribe {
        conversation_id: Uuid,
        conn_id: Uuid,
    },
    Broadcast {
        conversation_id: Uuid,
        payload: String,
        exclude_conn_id: Option<Uuid>,
    },
    RemoteDeliver {
        conversation_id: Uuid,
        payload: String,
    },
    MemberCount {
        conversation_id: Uuid,
        reply: oneshot::Sender<usize>,
    },
}

struct Room {
    members: HashMap<Uuid, (Uuid, mpsc::Sender<String>)>,
    remote_listener: tokio::task::JoinHandle<()>,
}

/// Handle to the chat fanout coordinator. Cheaply cloneable; every clone
/// shares the same bounded command channel into the single owning task.
#[derive(Clone)]
pub struct ChatHub {
    cmd_tx: mpsc::Sender<HubCommand>,
}

impl ChatHub {
    pub fn spawn(kv: KvClient, command_buffer: usize) -> Self {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<HubCommand>(command_buffer);
        let instance_id = Uuid::new_v4();

        let coordinator_tx = cmd_tx.clone();
        tokio::spawn(async move {
            let mut rooms: HashMap<Uuid, Room> = HashMap::new();

            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    HubCommand::Subscribe {
                        conversation_id,
                        conn_id,
                        user_id,
                        sender,
                    } => {
                        let room = rooms.entry(conversation_id).or_insert_with(|| {
                            Room {
                                members: HashMap::new(),
                                remote_listener: spawn_remote_listener(
                                    kv.clone(),
                                    conversation_id,
                                    instance_id,
                                    coordinator_tx.clone(),
                                ),
                            }
                        });
                        room.members.insert(conn_id, (user_id, sender));
                    }
                    HubCommand::Unsubscribe {
                        conversation_id,
                        conn_id,
                    } => {
                        if let Some(room) = rooms.get_mut(&conversation_id) {
                            room.members.remove(&conn_id);
                            if room.members.is_empty() {
                                room.remote_listener.abort();
                                rooms.remove(&conversation_id);
                            }
                        }
                    }
                    HubCommand::Broadcast {
                        conversation_id,
                        payload,
                        exclude_conn_id,
                    } => {
                        if let Some(room) = rooms.get_mut(&conversation_id) {
                            let mut dead = Vec::new();
                            for (conn_id, (_, sender)) in room.members.iter() {
                                if Some(*conn_id) == exclude_conn_id {
                                    continue;
                                }
                                if sender.try_send(payload.clone()).is_err() {
                                    dead.push(*conn_id);
                                }
                            }
                            for conn_id in dead {
                                tracing::info!(%conversation_id, %conn_id, "dropping dead chat connection");
                                room.members.remove(&conn_id);
                            }
                        }
                        let envelope = FanoutEnvelope {
                            origin_instance: instance_id,
                            payload,
                        };
                        if let Ok(encoded) = serde_json::to_string(&envelope) {
                            let _ = kv.publish(&channel_name(conversation_id), &encoded).await;
                        }
                    }
                    HubCommand::RemoteDeliver {
                        conversation_id,
                        payload,
                    } => {
                        if let Some(room) = rooms.get_mut(&conversation_id) {
                            let mut dead = Vec::new();
                            for (conn_id, (_, sender)) in room.members.iter() {
                                if sender.try_send(payload.clone()).is_err() {
                                    dead.push(*conn_id);
                                }
                            }
                            for conn_id in dead {
                                tracing::info!(%conversation_id, %conn_id, "dropping dead chat connection");
                                room.members.remove(&conn_id);
                            }
                        }
                    }
                    HubCommand::MemberCount {
                        conversation_id,
                        reply,
                    } => {
                        let count = rooms.get(&conversation_id).map(|r| r.members.len()).unwrap_or(0);
                        let _ = reply.send(count);
                    }
                }
            }
        });

        Self { cmd_tx }
    }

    pub async fn subscribe(
        &self,
        conversation_id: Uuid,
        conn_id: Uuid,
        user_id: Uuid,
        sender: mpsc::Sender<String>,
    ) {
        let _ = self
            .cmd_tx
            .send(HubCommand::Subscribe {
                conversation_id,
                conn_id,
                user_id,
                sender,
            })
            .await;
    }

    pub async fn unsubscribe(&self, conversation_id: Uuid, conn_id: Uuid) {
        let _ = self
            .cmd_tx
            .send(HubCommand::Unsubscribe {
                conversation_id,
                conn_id,
            })
            .await;
    }

    pub async fn broadcast(&self, conversation_id: Uuid, payload: String, exclude_conn_id: Option<Uuid>) {
        let _ = self
            .cmd_tx
            .send(HubCommand::Broadcast {
                conversation_id,
                payload,
                exclude_conn_id,
            })
            .await;
    }

    pub async fn member_count(&self, conversation_id: Uuid) -> usize {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(HubCommand::MemberCount {
                conversation_id,
                reply,
            })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn channel_name(conversation_id: Uuid) -> String {
    format!("chat:fanout:{conversation_id}")
}

/// One task per conversation with at least one local member: relays
/// cross-instance messages published by other instances into this
/// instance's local broadcast. Skips messages this same instance
/// originated, since those were already delivered locally by `Broadcast`.
/// If KV is degraded, the subscribe call fails and this task exits
/// immediately — the conversation silently falls back to local-only fanout
/// until a new subscriber retriggers room creation (§4.5 degraded-KV note).
fn spawn_remote_listener(
    kv: KvClient,
    conversation_id: Uuid,
    instance_id: Uuid,
    coordinator_tx: mpsc::Sender<HubCommand>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut pubsub = match kv.subscribe(&channel_name(conversation_id)).await {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!(%conversation_id, "kv degraded: chat room running local-only");
                return;
            }
        };
        use futures::StreamExt;
        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let raw: String = match msg.get_payload() {
                Ok(p) => p,
                Err(_) => continue,
            };
            let envelope: FanoutEnvelope = match serde_json::from_str(&raw) {
                Ok(e) => e,
                Err(_) => continue,
            };
            if envelope.origin_instance == instance_id {
                continue;
            }
            let _ = coordinator_tx
                .send(HubCommand::RemoteDeliver {
                    conversation_id,
                    payload: envelope.payload,
                })
                .await;
        }
    })
}

//! Signaling hub coordinator (§4.6). Structurally mirrors the chat hub —
//! single owning task, bounded command channel, cross-instance relay via
//! KV pub/sub — but keys on `user_id` rather than `conversation_id`: WebRTC
//! offer/answer/ICE payloads target a specific peer, not a room.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::resilience::kv::KvClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelayEnvelope {
    origin_instance: Uuid,
    payload: String,
}

enum HubCommand {
    Register {
        user_id: Uuid,
        conn_id: Uuid,
        sender: mpsc::Sender<String>,
    },
    Deregister {
        user_id: Uuid,
        conn_id: Uuid,
    },
    Relay {
        to_user_id: Uuid,
        payload: String,
    },
    RemoteDeliver {
        user_id: Uuid,
        payload: String,
    },
}

struct PeerEntry {
    connections: HashMap<Uuid, mpsc::Sender<String>>,
    remote_listener: tokio::task::JoinHandle<()>,
}

#[derive(Clone)]
pub struct SignalingHub {
    cmd_tx: mpsc::Sender<HubCommand>,
}

impl SignalingHub {
    pub fn spawn(kv: KvClient, command_buffer: usize) -> Self {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<HubCommand>(command_buffer);
        let instance_id = Uuid::new_v4();
        let coordinator_tx = cmd_tx.clone();

        tokio::spawn(async move {
            let mut peers: HashMap<Uuid, PeerEntry> = HashMap::new();

            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    HubCommand::Register { user_id, conn_id, sender } => {
                        let entry = peers.entry(user_id).or_insert_with(|| PeerEntry {
                            connections: HashMap::new(),
                            remote_listener: spawn_remote_listener(
                                kv.clone(),
                                user_id,
                                instance_id,
                                coordinator_tx.clone(),
                            ),
                        });
                        entry.connections.insert(conn_id, sender);
                    }
                    HubCommand::Deregister { user_id, conn_id } => {
                        if let Some(entry) = peers.get_mut(&user_id) {
                            entry.connections.remove(&conn_id);
                            if entry.connections.is_empty() {
                                entry.remote_listener.abort();
                                peers.remove(&user_id);
                            }
                        }
                    }
                    HubCommand::Relay { to_user_id, payload } => {
                        if let Some(entry) = peers.get(&to_user_id) {
                            for sender in entry.connections.values() {
                                let _ = sender.try_send(payload.clone());
                            }
                        }
                        let envelope = RelayEnvelope {
                            origin_instance: instance_id,
                            payload,
                        };
                        if let Ok(encoded) = serde_json::to_string(&envelope) {
                            let _ = kv.publish(&channel_name(to_user_id), &encoded).await;
                        }
                    }
                    HubCommand::RemoteDeliver { user_id, payload } => {
                        if let Some(entry) = peers.get(&user_id) {
                            for sender in entry.connections.values() {
                                let _ = sender.try_send(payload.clone());
                            }
                        }
                    }
                }
            }
        });

        Self { cmd_tx }
    }

    pub async fn register(&self, user_id: Uuid, conn_id: Uuid, sender: mpsc::Sender<String>) {
        let _ = self.cmd_tx.send(HubCommand::Register { user_id, conn_id, sender }).await;
    }

    pub async fn deregister(&self, user_id: Uuid, conn_id: Uuid) {
        let _ = self.cmd_tx.send(HubCommand::Deregister { user_id, conn_id }).await;
    }

    pub async fn relay(&self, to_user_id: Uuid, payload: String) {
        let _ = self.cmd_tx.send(HubCommand::Relay { to_user_id, payload }).await;
    }
}

fn channel_name(user_id: Uuid) -> String {
    format!("signal:relay:{user_id}")
}

fn spawn_remote_listener(
    kv: KvClient,
    user_id: Uuid,
    instance_id: Uuid,
    coordinator_tx: mpsc::Sender<HubCommand>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut pubsub = match kv.subscribe(&channel_name(user_id)).await {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!(%user_id, "kv degraded: signaling relay running local-only");
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
            let envelope: RelayEnvelope = match serde_json::from_str(&raw) {
                Ok(e) => e,
                Err(_) => continue,
            };
            if envelope.origin_instance == instance_id {
                continue;
            }
            let _ = coordinator_tx
                .send(HubCommand::RemoteDeliver { user_id, payload: envelope.payload })
                .await;
        }
    })
}

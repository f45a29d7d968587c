//! Phoenix channel frames
//!
//! Frames exchanged with a Phoenix-style realtime server using JSON encoding
//! (protocol `vsn=1.0.0`, object form).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::event::{ChangeKind, SyncEvent};
use crate::sync::ChannelSpec;

/// Protocol version requested on connect
pub const PROTOCOL_VSN: &str = "1.0.0";

/// Topic used for socket-level keepalives
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Broadcast event name used for sync payloads
pub const SYNC_BROADCAST_EVENT: &str = "sync";

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const HEARTBEAT: &str = "heartbeat";
pub const BROADCAST: &str = "broadcast";
pub const PRESENCE: &str = "presence";
pub const PRESENCE_STATE: &str = "presence_state";
pub const PRESENCE_DIFF: &str = "presence_diff";
pub const POSTGRES_CHANGES: &str = "postgres_changes";

/// A single frame on the socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// Body of a sync broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastBody {
    /// Device id of the sender
    #[serde(default)]
    pub origin: Option<String>,
    pub event: SyncEvent,
}

/// Presence metadata entry as sent by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceMeta {
    #[serde(default)]
    pub phx_ref: Option<String>,
}

/// All metas for one presence key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    #[serde(default)]
    pub metas: Vec<PresenceMeta>,
}

/// Presence keyed by presence key (the device id)
pub type PresenceState = HashMap<String, PresenceEntry>;

/// A frame classified by what it means for the channel
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to one of our pushes
    Reply {
        msg_ref: Option<String>,
        ok: bool,
        response: Value,
    },
    /// Server-side channel crash
    ChannelError,
    /// Server closed the channel
    ChannelClose,
    /// Sync broadcast from a peer
    Broadcast(BroadcastBody),
    /// Full presence snapshot
    PresenceState(PresenceState),
    /// Incremental presence change
    PresenceDiff {
        joins: PresenceState,
        leaves: PresenceState,
    },
    /// Row-level change
    Change { table: String, kind: ChangeKind },
    /// Anything we don't act on
    Other(String),
}

#[derive(Deserialize)]
struct ReplyPayload {
    status: String,
    #[serde(default)]
    response: Value,
}

#[derive(Deserialize)]
struct BroadcastPayload {
    event: String,
    payload: BroadcastBody,
}

#[derive(Deserialize)]
struct PresenceDiffPayload {
    #[serde(default)]
    joins: PresenceState,
    #[serde(default)]
    leaves: PresenceState,
}

#[derive(Deserialize)]
struct ChangesPayload {
    data: ChangeData,
}

#[derive(Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type")]
    kind: ChangeKind,
}

impl Frame {
    fn push(topic: &str, event: &str, payload: Value, msg_ref: &str, join_ref: Option<&str>) -> Self {
        Frame {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            msg_ref: Some(msg_ref.to_string()),
            join_ref: join_ref.map(str::to_string),
        }
    }

    /// Join a channel
    pub fn join(spec: &ChannelSpec, access_token: Option<&str>, msg_ref: &str) -> Self {
        let changes: Vec<Value> = spec
            .watched_tables
            .iter()
            .map(|table| json!({"event": "*", "schema": "public", "table": table}))
            .collect();

        let mut payload = json!({
            "config": {
                "broadcast": {"self": spec.receive_own_broadcasts, "ack": false},
                "presence": {"key": spec.device_id},
                "postgres_changes": changes,
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }

        Self::push(&spec.topic, PHX_JOIN, payload, msg_ref, Some(msg_ref))
    }

    /// Leave a channel
    pub fn leave(topic: &str, msg_ref: &str, join_ref: &str) -> Self {
        Self::push(topic, PHX_LEAVE, json!({}), msg_ref, Some(join_ref))
    }

    /// Socket keepalive
    pub fn heartbeat(msg_ref: &str) -> Self {
        Self::push(PHOENIX_TOPIC, HEARTBEAT, json!({}), msg_ref, None)
    }

    /// Broadcast a sync event to the channel's other members
    pub fn broadcast(
        topic: &str,
        origin: &str,
        event: &SyncEvent,
        msg_ref: &str,
        join_ref: &str,
    ) -> Result<Self, serde_json::Error> {
        let body = BroadcastBody {
            origin: Some(origin.to_string()),
            event: event.clone(),
        };
        let payload = json!({
            "type": BROADCAST,
            "event": SYNC_BROADCAST_EVENT,
            "payload": serde_json::to_value(body)?,
        });
        Ok(Self::push(topic, BROADCAST, payload, msg_ref, Some(join_ref)))
    }

    /// Announce this device's presence
    pub fn track(topic: &str, device_id: &str, msg_ref: &str, join_ref: &str) -> Self {
        let payload = json!({
            "type": PRESENCE,
            "event": "track",
            "payload": {
                "device_id": device_id,
                "online_at": chrono::Utc::now().to_rfc3339(),
            },
        });
        Self::push(topic, PRESENCE, payload, msg_ref, Some(join_ref))
    }

    /// Encode to a text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Interpret the frame's payload
    pub fn classify(self) -> Result<Inbound, serde_json::Error> {
        let inbound = match self.event.as_str() {
            PHX_REPLY => {
                let reply: ReplyPayload = serde_json::from_value(self.payload)?;
                Inbound::Reply {
                    msg_ref: self.msg_ref,
                    ok: reply.status == "ok",
                    response: reply.response,
                }
            }
            PHX_ERROR => Inbound::ChannelError,
            PHX_CLOSE => Inbound::ChannelClose,
            BROADCAST => {
                let broadcast: BroadcastPayload = serde_json::from_value(self.payload)?;
                if broadcast.event != SYNC_BROADCAST_EVENT {
                    return Ok(Inbound::Other(format!("broadcast:{}", broadcast.event)));
                }
                Inbound::Broadcast(broadcast.payload)
            }
            PRESENCE_STATE => Inbound::PresenceState(serde_json::from_value(self.payload)?),
            PRESENCE_DIFF => {
                let diff: PresenceDiffPayload = serde_json::from_value(self.payload)?;
                Inbound::PresenceDiff {
                    joins: diff.joins,
                    leaves: diff.leaves,
                }
            }
            POSTGRES_CHANGES => {
                let changes: ChangesPayload = serde_json::from_value(self.payload)?;
                Inbound::Change {
                    table: changes.data.table,
                    kind: changes.data.kind,
                }
            }
            _ => Inbound::Other(self.event),
        };
        Ok(inbound)
    }
}

/// Monotonic message reference counter
#[derive(Debug, Default)]
pub struct RefCounter(u64);

impl RefCounter {
    pub fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

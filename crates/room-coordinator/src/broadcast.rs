//! Broadcast envelope published on per-room channels.
//!
//! Every process in the cluster subscribes to the channels of the rooms
//! it holds members for. A broadcast is published once, received by
//! every subscriber (including the sending process), and fanned out to
//! each locally held member there. The envelope carries the cluster
//! token so a subscriber can drop messages from processes outside its
//! cluster.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope message type for room chat broadcasts.
pub const MESSAGE_TYPE_CHAT: &str = "chat";

/// The originating connection, when the broadcast has a real sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeConnection {
    pub id: String,
    pub room: String,
}

/// Structured broadcast payload published on a room's channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEnvelope {
    pub message_type: String,
    pub server_token: String,
    pub server_id: String,
    pub message: Value,
    /// Milliseconds since the Unix epoch at publish time.
    pub sent_at: i64,
    /// Absent for system-originated broadcasts with no excluded sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<EnvelopeConnection>,
}

impl BroadcastEnvelope {
    /// Build a chat envelope stamped with the current time.
    #[must_use]
    pub fn chat(
        server_id: &str,
        server_token: &str,
        room: &str,
        message: Value,
        sender_id: Option<&str>,
    ) -> Self {
        Self {
            message_type: MESSAGE_TYPE_CHAT.to_string(),
            server_token: server_token.to_string(),
            server_id: server_id.to_string(),
            message,
            sent_at: Utc::now().timestamp_millis(),
            connection: sender_id.map(|id| EnvelopeConnection {
                id: id.to_string(),
                room: room.to_string(),
            }),
        }
    }

    /// Id of the originating connection, if any.
    #[must_use]
    pub fn sender_id(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.id.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_format() {
        let envelope = BroadcastEnvelope::chat(
            "server-1",
            "token-abc",
            "lobby",
            json!({"text": "hello"}),
            Some("conn-1"),
        );
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value.get("messageType"), Some(&json!("chat")));
        assert_eq!(value.get("serverToken"), Some(&json!("token-abc")));
        assert_eq!(value.get("serverId"), Some(&json!("server-1")));
        assert_eq!(value.get("message"), Some(&json!({"text": "hello"})));
        assert!(value.get("sentAt").and_then(Value::as_i64).is_some());
        assert_eq!(
            value.get("connection"),
            Some(&json!({"id": "conn-1", "room": "lobby"}))
        );
    }

    #[test]
    fn test_system_broadcast_has_no_connection() {
        let envelope =
            BroadcastEnvelope::chat("server-1", "token-abc", "lobby", json!("notice"), None);
        assert_eq!(envelope.sender_id(), None);

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value.get("connection"), None);
    }

    #[test]
    fn test_envelope_parses_back() {
        let envelope = BroadcastEnvelope::chat(
            "server-2",
            "token-xyz",
            "ops",
            json!({"text": "deploy"}),
            Some("conn-9"),
        );
        let payload = serde_json::to_string(&envelope).unwrap();
        let parsed: BroadcastEnvelope = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed.server_id, "server-2");
        assert_eq!(parsed.sender_id(), Some("conn-9"));
    }
}

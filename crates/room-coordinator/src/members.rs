//! Member records and the member-details policy seam.
//!
//! One [`MemberRecord`] exists per (room, connection) pair, stored
//! serialized in the room's member hash. What goes into the record and
//! what a status query exposes are both policy points: the default
//! records `{id, joinedAt, host}` and exposes `{id, joinedAt}`.

use crate::connections::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Serialized per-member metadata stored in a room's member hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Connection id.
    pub id: String,
    /// Join timestamp, milliseconds since epoch.
    #[serde(rename = "joinedAt")]
    pub joined_at: i64,
    /// Server instance that held the connection at join time.
    pub host: String,
    /// Extension fields written by custom policies.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Policy point for producing and exposing member metadata.
///
/// `generate` runs on join and decides what is stored; `sanitize` runs
/// per status query and decides what is exposed.
pub trait MemberDetailsPolicy: Send + Sync {
    /// Produce the record stored for a joining connection.
    fn generate(&self, connection: &Connection, server_id: &str) -> MemberRecord {
        MemberRecord {
            id: connection.id().to_string(),
            joined_at: chrono::Utc::now().timestamp_millis(),
            host: server_id.to_string(),
            extra: serde_json::Map::new(),
        }
    }

    /// Project the externally visible view of a stored record.
    fn sanitize(&self, record: &MemberRecord) -> Value {
        json!({
            "id": record.id,
            "joinedAt": record.joined_at,
        })
    }
}

/// Default member-details policy.
pub struct DefaultMemberDetails;

impl MemberDetailsPolicy for DefaultMemberDetails {}

/// Result of a room status query.
#[derive(Debug, Clone)]
pub struct RoomStatus {
    /// Room name.
    pub room: String,
    /// Sanitized member projections keyed by connection id.
    pub members: HashMap<String, Value>,
    /// Count of entries actually iterated, never a stored counter.
    pub members_count: usize,
}

//! Shared store key and channel naming.
//!
//! Every process derives the same keys from the same inputs; nothing
//! else in the crate formats store keys by hand.

/// Set of all known room names.
pub fn rooms() -> &'static str {
    "rooms"
}

/// Per-room hash of connection_id -> serialized member record.
pub fn members(room: &str) -> String {
    format!("members:{room}")
}

/// Hash of connection_id -> owning server_id.
pub fn connections() -> &'static str {
    "cluster:connections"
}

/// Broadcast channel for a room.
pub fn room_channel(room: &str) -> String {
    format!("room:{room}")
}

/// Remote-invocation request channel for a process.
pub fn rpc_channel(server_id: &str) -> String {
    format!("rpc:{server_id}")
}

/// Response channel for a single remote invocation.
pub fn rpc_response_channel(request_id: &str) -> String {
    format!("rpc:response:{request_id}")
}

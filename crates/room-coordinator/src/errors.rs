//! Room coordinator error types.
//!
//! Every public operation resolves or fails with a [`RoomError`]. The
//! room-level variants mirror the conditions callers are expected to
//! branch on (duplicate room, unknown room, membership conflicts); the
//! `Store`/`Serialization`/`Internal` variants carry infrastructure
//! failures. Nothing here is retried automatically - retry policy is a
//! caller concern.

use thiserror::Error;

/// Room coordination error type.
#[derive(Debug, Error)]
pub enum RoomError {
    /// `create_room` was called for a room that already exists.
    #[error("Room already exists: {0}")]
    RoomAlreadyExists(String),

    /// The named room does not exist.
    #[error("Room does not exist: {0}")]
    RoomNotExist(String),

    /// A room name is required but was empty.
    #[error("Room name is required")]
    RoomRequired,

    /// The connection is already a member of the room.
    #[error("Connection {connection_id} is already in room {room}")]
    AlreadyInRoom {
        connection_id: String,
        room: String,
    },

    /// The connection is not a member of the room.
    #[error("Connection {connection_id} is not in room {room}")]
    NotInRoom {
        connection_id: String,
        room: String,
    },

    /// A middleware descriptor was rejected (e.g. missing name).
    #[error("Invalid middleware: {0}")]
    InvalidMiddleware(String),

    /// A join/leave/say middleware handler failed; the message is
    /// whatever the handler raised.
    #[error("Middleware rejected: {0}")]
    MiddlewareRejected(String),

    /// A cluster-forwarded operation timed out waiting for the remote
    /// response.
    #[error("Remote {operation} for connection {connection_id} timed out")]
    RemoteTimeout {
        operation: String,
        connection_id: String,
    },

    /// The remote process reported an error, or dispatch itself failed.
    #[error("Remote error: {0}")]
    RemoteError(String),

    /// Shared store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A stored record or wire envelope could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RoomError {
    fn from(err: serde_json::Error) -> Self {
        RoomError::Serialization(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", RoomError::RoomAlreadyExists("lobby".to_string())),
            "Room already exists: lobby"
        );

        assert_eq!(
            format!("{}", RoomError::RoomNotExist("lobby".to_string())),
            "Room does not exist: lobby"
        );

        assert_eq!(format!("{}", RoomError::RoomRequired), "Room name is required");

        assert_eq!(
            format!(
                "{}",
                RoomError::AlreadyInRoom {
                    connection_id: "conn-1".to_string(),
                    room: "lobby".to_string(),
                }
            ),
            "Connection conn-1 is already in room lobby"
        );

        assert_eq!(
            format!(
                "{}",
                RoomError::RemoteTimeout {
                    operation: "addMember".to_string(),
                    connection_id: "conn-1".to_string(),
                }
            ),
            "Remote addMember for connection conn-1 timed out"
        );
    }

    #[test]
    fn test_serde_json_error_converts_to_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let room_err: RoomError = err.into();
        assert!(matches!(room_err, RoomError::Serialization(_)));
    }

    #[test]
    fn test_middleware_rejected_carries_handler_message() {
        let err = RoomError::MiddlewareRejected("rate limit exceeded".to_string());
        assert_eq!(err.to_string(), "Middleware rejected: rate limit exceeded");
    }
}

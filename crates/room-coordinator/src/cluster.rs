//! Cluster dispatch for member operations on remote connections.
//!
//! When a member operation targets a connection this process does not
//! hold, the request is forwarded to the owning process over the shared
//! store's publish/subscribe channels. Correlation is by generated
//! request id: the caller subscribes to a per-request response channel
//! before publishing, then awaits the correlated response under a
//! timeout.
//!
//! Two call shapes are exposed: [`ClusterDispatcher::call`] blocks for
//! the remote acknowledgement, [`ClusterDispatcher::cast`] returns once
//! the request is enqueued. Room teardown uses `cast` so one slow peer
//! cannot stall a destroy.

use crate::errors::RoomError;
use crate::store::{keys, SharedStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Member operations that can be forwarded between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteOp {
    #[serde(rename = "addMember")]
    AddMember,
    #[serde(rename = "removeMember")]
    RemoveMember,
    /// Forced eviction during room teardown; bypasses the membership
    /// checks, since the room marker may already be gone by the time
    /// the owner processes it.
    #[serde(rename = "evictMember")]
    EvictMember,
}

impl RemoteOp {
    /// Wire name of the operation, as carried in requests and errors.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::AddMember => "addMember",
            Self::RemoveMember => "removeMember",
            Self::EvictMember => "evictMember",
        }
    }
}

/// A forwarded member operation, published on the owner's RPC channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub request_id: String,
    pub op: RemoteOp,
    pub connection_id: String,
    pub room: String,
    /// Response channel; absent for fire-and-forget requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// The owning process's answer, published on the request's reply channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Forwards member operations to the process owning a connection.
pub struct ClusterDispatcher {
    store: Arc<dyn SharedStore>,
    server_id: String,
    rpc_timeout: Duration,
}

impl ClusterDispatcher {
    pub fn new(store: Arc<dyn SharedStore>, server_id: String, rpc_timeout: Duration) -> Self {
        Self {
            store,
            server_id,
            rpc_timeout,
        }
    }

    /// Look up which server currently owns `connection_id`.
    pub async fn owner_of(&self, connection_id: &str) -> Result<Option<String>, RoomError> {
        self.store.hget(&keys::connections(), connection_id).await
    }

    /// Forward an operation and await the owner's acknowledgement.
    ///
    /// The response channel is subscribed before the request is
    /// published, so the answer cannot race the subscription.
    #[instrument(skip_all, fields(op = op.name(), connection_id = %connection_id, room = %room))]
    pub async fn call(
        &self,
        op: RemoteOp,
        connection_id: &str,
        room: &str,
    ) -> Result<Value, RoomError> {
        let owner = self.resolve_owner(op, connection_id).await?;

        let request_id = Uuid::new_v4().to_string();
        let reply_channel = keys::rpc_response_channel(&request_id);
        let mut responses = self.store.subscribe(&reply_channel).await?;

        let request = RpcRequest {
            request_id: request_id.clone(),
            op,
            connection_id: connection_id.to_string(),
            room: room.to_string(),
            reply_to: Some(reply_channel),
        };
        self.publish_request(&owner, &request).await?;

        let response = tokio::time::timeout(self.rpc_timeout, async {
            while let Some(payload) = responses.next().await {
                match serde_json::from_str::<RpcResponse>(&payload) {
                    Ok(response) if response.request_id == request_id => return Some(response),
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(
                            target: "room.cluster",
                            error = %e,
                            "discarding malformed rpc response"
                        );
                    }
                }
            }
            None
        })
        .await
        .map_err(|_| RoomError::RemoteTimeout {
            operation: op.name().to_string(),
            connection_id: connection_id.to_string(),
        })?;

        match response {
            Some(RpcResponse {
                error: Some(error), ..
            }) => Err(RoomError::RemoteError(error)),
            Some(RpcResponse { result, .. }) => Ok(result.unwrap_or(Value::Null)),
            // Forwarding task ended without a response.
            None => Err(RoomError::RemoteError(format!(
                "response channel closed before '{}' was acknowledged",
                op.name()
            ))),
        }
    }

    /// Forward an operation without waiting for acknowledgement.
    #[instrument(skip_all, fields(op = op.name(), connection_id = %connection_id, room = %room))]
    pub async fn cast(
        &self,
        op: RemoteOp,
        connection_id: &str,
        room: &str,
    ) -> Result<(), RoomError> {
        let owner = self.resolve_owner(op, connection_id).await?;
        let request = RpcRequest {
            request_id: Uuid::new_v4().to_string(),
            op,
            connection_id: connection_id.to_string(),
            room: room.to_string(),
            reply_to: None,
        };
        self.publish_request(&owner, &request).await
    }

    async fn resolve_owner(
        &self,
        op: RemoteOp,
        connection_id: &str,
    ) -> Result<String, RoomError> {
        let owner = self.owner_of(connection_id).await?.ok_or_else(|| {
            RoomError::RemoteError(format!(
                "connection '{connection_id}' is not registered with any server"
            ))
        })?;

        // The coordinator only dispatches remotely after a local miss;
        // an owner record pointing back here is stale.
        if owner == self.server_id {
            return Err(RoomError::RemoteError(format!(
                "connection '{connection_id}' is registered to this server but not held locally (op '{}')",
                op.name()
            )));
        }
        Ok(owner)
    }

    async fn publish_request(&self, owner: &str, request: &RpcRequest) -> Result<(), RoomError> {
        let payload = serde_json::to_string(request)?;
        debug!(
            target: "room.cluster",
            owner = %owner,
            request_id = %request.request_id,
            "forwarding member operation"
        );
        self.store.publish(&keys::rpc_channel(owner), &payload).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request = RpcRequest {
            request_id: "req-1".to_string(),
            op: RemoteOp::AddMember,
            connection_id: "conn-1".to_string(),
            room: "lobby".to_string(),
            reply_to: Some("rpc:response:req-1".to_string()),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "requestId": "req-1",
                "op": "addMember",
                "connectionId": "conn-1",
                "room": "lobby",
                "replyTo": "rpc:response:req-1",
            })
        );
    }

    #[test]
    fn test_cast_request_omits_reply_channel() {
        let request = RpcRequest {
            request_id: "req-2".to_string(),
            op: RemoteOp::RemoveMember,
            connection_id: "conn-2".to_string(),
            room: "lobby".to_string(),
            reply_to: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value.get("replyTo"), None);
        assert_eq!(value.get("op"), Some(&json!("removeMember")));
    }

    #[test]
    fn test_response_round_trip() {
        let response = RpcResponse {
            request_id: "req-3".to_string(),
            result: Some(json!({"ok": true})),
            error: None,
        };
        let payload = serde_json::to_string(&response).unwrap();
        let parsed: RpcResponse = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed.request_id, "req-3");
        assert_eq!(parsed.result, Some(json!({"ok": true})));
        assert_eq!(parsed.error, None);
    }

    #[test]
    fn test_op_names() {
        assert_eq!(RemoteOp::AddMember.name(), "addMember");
        assert_eq!(RemoteOp::RemoveMember.name(), "removeMember");
        assert_eq!(RemoteOp::EvictMember.name(), "evictMember");
    }
}

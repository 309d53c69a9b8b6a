//! Shared store seam.
//!
//! The coordinator treats its backing store as a keyed shared store with
//! set, hash, and publish/subscribe primitives - exactly the surface the
//! room bookkeeping needs. [`RedisStore`] is the production
//! implementation; tests run against an in-memory implementation of the
//! same trait.
//!
//! # Key Patterns
//!
//! - `rooms` - set of all known room names
//! - `members:{room}` - hash of connection_id -> serialized member record
//! - `cluster:connections` - hash of connection_id -> owning server_id
//! - `room:{room}` - broadcast channel for a room
//! - `rpc:{server_id}` - per-process remote-invocation request channel
//! - `rpc:response:{request_id}` - per-request response channel

pub mod keys;
pub mod redis;

pub use self::redis::RedisStore;

use crate::errors::RoomError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Keyed shared store with set, hash, and publish/subscribe primitives.
///
/// All processes in the cluster point at the same store; writes are
/// visible to every process as soon as they complete. No transaction
/// wraps multi-key sequences - callers own the ordering guarantees.
#[async_trait]
pub trait SharedStore: Send + Sync + 'static {
    /// Add a member to a set. Returns true if it was newly inserted.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, RoomError>;

    /// Remove a member from a set. Returns true if it was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, RoomError>;

    /// Check set membership.
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, RoomError>;

    /// All members of a set, in the store's native order.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, RoomError>;

    /// Set a hash field.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), RoomError>;

    /// Get a hash field.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, RoomError>;

    /// Delete a hash field. Returns true if it was present.
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, RoomError>;

    /// All fields and values of a hash.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, RoomError>;

    /// Delete a key outright.
    async fn del(&self, key: &str) -> Result<(), RoomError>;

    /// Publish a payload on a channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), RoomError>;

    /// Subscribe to a channel. The subscription ends when the returned
    /// handle is dropped.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, RoomError>;
}

/// Handle to an active channel subscription.
///
/// Yields published payloads in order until the subscription ends.
/// Dropping the handle ends the underlying subscription.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    /// Wrap a receiver fed by a store implementation.
    pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// Next published payload, or `None` once the subscription ends.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

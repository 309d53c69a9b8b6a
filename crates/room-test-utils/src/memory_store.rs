//! In-memory shared store for coordinator testing.
//!
//! Implements the full `SharedStore` surface - sets, hashes, and
//! publish/subscribe - over process-local state. Cloning the store
//! shares the underlying state, so several coordinators built over
//! clones of one `MemoryStore` behave like cluster processes sharing
//! one Redis instance.
//!
//! # Example
//!
//! ```rust,ignore
//! use room_test_utils::MemoryStore;
//!
//! let store = MemoryStore::new();
//! store.sadd("rooms", "lobby").await.unwrap();
//! assert!(store.sismember("rooms", "lobby").await.unwrap());
//!
//! let mut sub = store.subscribe("room:lobby").await.unwrap();
//! store.publish("room:lobby", "hello").await.unwrap();
//! assert_eq!(sub.next().await, Some("hello".to_string()));
//! ```

use async_trait::async_trait;
use room_coordinator::errors::RoomError;
use room_coordinator::store::{SharedStore, Subscription};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// In-memory `SharedStore` implementation.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Set keys. BTreeSet keeps `smembers` order deterministic.
    sets: HashMap<String, BTreeSet<String>>,
    /// Hash keys.
    hashes: HashMap<String, HashMap<String, String>>,
    /// Live subscriber senders per channel.
    channels: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned mutex means a panicking test; propagate the panic.
        self.inner.lock().unwrap()
    }

    /// Number of live subscribers on a channel. Useful for asserting
    /// that dropping a `Subscription` actually unsubscribes.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let mut inner = self.lock();
        match inner.channels.get_mut(channel) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, RoomError> {
        Ok(self
            .lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, RoomError> {
        Ok(self
            .lock()
            .sets
            .get_mut(key)
            .is_some_and(|set| set.remove(member)))
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, RoomError> {
        Ok(self
            .lock()
            .sets
            .get(key)
            .is_some_and(|set| set.contains(member)))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, RoomError> {
        Ok(self
            .lock()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), RoomError> {
        self.lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, RoomError> {
        Ok(self
            .lock()
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, RoomError> {
        Ok(self
            .lock()
            .hashes
            .get_mut(key)
            .is_some_and(|hash| hash.remove(field).is_some()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, RoomError> {
        Ok(self.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn del(&self, key: &str) -> Result<(), RoomError> {
        let mut inner = self.lock();
        inner.sets.remove(key);
        inner.hashes.remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), RoomError> {
        let mut inner = self.lock();
        if let Some(senders) = inner.channels.get_mut(channel) {
            // Dropping a Subscription closes its receiver; prune those.
            senders.retain(|tx| tx.send(payload.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, RoomError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();

        assert!(store.sadd("rooms", "lobby").await.unwrap());
        assert!(!store.sadd("rooms", "lobby").await.unwrap());
        assert!(store.sismember("rooms", "lobby").await.unwrap());
        assert_eq!(store.smembers("rooms").await.unwrap(), vec!["lobby"]);

        assert!(store.srem("rooms", "lobby").await.unwrap());
        assert!(!store.srem("rooms", "lobby").await.unwrap());
        assert!(!store.sismember("rooms", "lobby").await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = MemoryStore::new();

        store.hset("members:lobby", "conn-1", "{}").await.unwrap();
        assert_eq!(
            store.hget("members:lobby", "conn-1").await.unwrap(),
            Some("{}".to_string())
        );

        let all = store.hgetall("members:lobby").await.unwrap();
        assert_eq!(all.len(), 1);

        assert!(store.hdel("members:lobby", "conn-1").await.unwrap());
        assert!(!store.hdel("members:lobby", "conn-1").await.unwrap());
        assert_eq!(store.hget("members:lobby", "conn-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_del_removes_key_of_either_kind() {
        let store = MemoryStore::new();
        store.sadd("rooms", "lobby").await.unwrap();
        store.hset("members:lobby", "conn-1", "{}").await.unwrap();

        store.del("rooms").await.unwrap();
        store.del("members:lobby").await.unwrap();

        assert!(store.smembers("rooms").await.unwrap().is_empty());
        assert!(store.hgetall("members:lobby").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let store = MemoryStore::new();
        let mut sub_a = store.subscribe("room:lobby").await.unwrap();
        let mut sub_b = store.subscribe("room:lobby").await.unwrap();

        store.publish("room:lobby", "hello").await.unwrap();

        assert_eq!(sub_a.next().await, Some("hello".to_string()));
        assert_eq!(sub_b.next().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let store = MemoryStore::new();
        let sub = store.subscribe("room:lobby").await.unwrap();
        assert_eq!(store.subscriber_count("room:lobby"), 1);

        drop(sub);
        store.publish("room:lobby", "into the void").await.unwrap();
        assert_eq!(store.subscriber_count("room:lobby"), 0);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();

        store.sadd("rooms", "lobby").await.unwrap();
        assert!(clone.sismember("rooms", "lobby").await.unwrap());

        let mut sub = clone.subscribe("room:lobby").await.unwrap();
        store.publish("room:lobby", "shared").await.unwrap();
        assert_eq!(sub.next().await, Some("shared".to_string()));
    }
}

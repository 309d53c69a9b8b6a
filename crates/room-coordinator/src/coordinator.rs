//! Room coordination core.
//!
//! [`RoomCoordinator`] ties the pieces together: room lifecycle against
//! the shared rooms set, membership bookkeeping against per-room hashes,
//! the middleware pipeline, cluster-forwarded member operations, and
//! broadcast fan-out.
//!
//! Every public member operation first checks local presence. A locally
//! held connection is mutated directly; anything else is forwarded to
//! the owning process via the [`ClusterDispatcher`]. Broadcasts always
//! go through the shared per-room channel, so the sending process
//! applies the same local delivery logic as every other subscriber.
//!
//! # Concurrency
//!
//! Operations interleave freely between their suspension points and no
//! lock wraps the check-then-act sequences; correctness against
//! concurrent local callers relies on the mutations being idempotent
//! (membership is re-checked before the local room list is appended).
//! Cross-process consistency is best effort: there is a window between
//! the local list update and the shared hash write during which the two
//! can disagree.

use crate::broadcast::BroadcastEnvelope;
use crate::cluster::{ClusterDispatcher, RemoteOp, RpcRequest, RpcResponse};
use crate::config::Config;
use crate::connections::{Connection, ConnectionRegistry};
use crate::errors::RoomError;
use crate::members::{DefaultMemberDetails, MemberDetailsPolicy, MemberRecord, RoomStatus};
use crate::middleware::{MiddlewarePipeline, RoomMiddleware};
use crate::store::{keys, SharedStore, Subscription};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Notice broadcast to members when their room is destroyed.
const ROOM_DELETED_NOTICE: &str = "this room has been deleted";

/// Coordinates rooms of live connections across a cluster of processes.
pub struct RoomCoordinator {
    store: Arc<dyn SharedStore>,
    connections: ConnectionRegistry,
    dispatcher: ClusterDispatcher,
    /// Swapped wholesale on registration; stage runs operate on a
    /// snapshot so a hook can register middleware without deadlocking.
    middleware: RwLock<Arc<MiddlewarePipeline>>,
    member_details: RwLock<Arc<dyn MemberDetailsPolicy>>,
    server_id: String,
    cluster_token: String,
    /// Per-room broadcast listener cancellation, keyed by room name.
    room_listeners: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl RoomCoordinator {
    /// Build a coordinator over a shared store.
    #[must_use]
    pub fn new(config: &Config, store: Arc<dyn SharedStore>) -> Arc<Self> {
        let dispatcher = ClusterDispatcher::new(
            Arc::clone(&store),
            config.server_id.clone(),
            Duration::from_millis(config.rpc_timeout_ms),
        );
        Arc::new(Self {
            store,
            connections: ConnectionRegistry::new(),
            dispatcher,
            middleware: RwLock::new(Arc::new(MiddlewarePipeline::new(
                config.default_middleware_priority,
            ))),
            member_details: RwLock::new(Arc::new(DefaultMemberDetails)),
            server_id: config.server_id.clone(),
            cluster_token: config.cluster_token.expose_secret().to_string(),
            room_listeners: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// This process's server id.
    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Start the remote-invocation listener for this process.
    ///
    /// The RPC channel is subscribed before the listener task is
    /// spawned, so requests published after `start` returns are never
    /// missed.
    pub async fn start(self: &Arc<Self>) -> Result<(), RoomError> {
        let subscription = self
            .store
            .subscribe(&keys::rpc_channel(&self.server_id))
            .await?;
        let coordinator = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            coordinator.run_rpc_listener(subscription, shutdown).await;
        });
        info!(
            target: "room.coordinator",
            server_id = %self.server_id,
            "room coordinator started"
        );
        Ok(())
    }

    /// Stop all listener tasks. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut listeners = self.room_listeners.lock().await;
        for (_, token) in listeners.drain() {
            token.cancel();
        }
        info!(target: "room.coordinator", server_id = %self.server_id, "room coordinator stopped");
    }

    // ---- room lifecycle ----------------------------------------------

    /// All known room names, in the store's native order.
    pub async fn list_rooms(&self) -> Result<Vec<String>, RoomError> {
        self.store.smembers(keys::rooms()).await
    }

    /// Whether `room` currently exists.
    pub async fn room_exists(&self, room: &str) -> Result<bool, RoomError> {
        self.store.sismember(keys::rooms(), room).await
    }

    /// Create a room.
    ///
    /// The existence check and insert are not atomic against concurrent
    /// creators; two processes can both observe "not exists" and one
    /// insert wins silently.
    #[instrument(skip_all, fields(room = %room))]
    pub async fn create_room(&self, room: &str) -> Result<(), RoomError> {
        if self.room_exists(room).await? {
            return Err(RoomError::RoomAlreadyExists(room.to_string()));
        }
        self.store.sadd(keys::rooms(), room).await?;
        debug!(target: "room.coordinator", room = %room, "room created");
        Ok(())
    }

    /// Destroy a room, force-evicting every remaining member.
    ///
    /// Order matters: notify, evict members, remove the room marker,
    /// delete the member hash. A concurrent reader sees either the room
    /// with members or no room, never a room with a dangling hash.
    /// Member-level eviction errors are suppressed so the room is
    /// always removable; remote evictions are fire-and-forget.
    #[instrument(skip_all, fields(room = %room))]
    pub async fn destroy_room(self: &Arc<Self>, room: &str) -> Result<(), RoomError> {
        if !self.room_exists(room).await? {
            return Err(RoomError::RoomNotExist(room.to_string()));
        }

        // Stop echoing the room channel back to ourselves, then deliver
        // the notice to local members directly; the publish still
        // reaches every other process's listener.
        self.stop_room_listener(room).await;
        match self.publish_envelope(None, room, json!(ROOM_DELETED_NOTICE)).await {
            Ok(envelope) => self.fan_out_local(room, &envelope).await,
            Err(e) => {
                warn!(
                    target: "room.coordinator",
                    room = %room,
                    error = %e,
                    "failed to notify members of room destruction"
                );
            }
        }

        let members = self.store.hgetall(&keys::members(room)).await?;
        for connection_id in members.keys() {
            self.evict_member(connection_id, room).await;
        }

        self.store.srem(keys::rooms(), room).await?;
        self.store.del(&keys::members(room)).await?;
        info!(
            target: "room.coordinator",
            room = %room,
            evicted = members.len(),
            "room destroyed"
        );
        Ok(())
    }

    async fn evict_member(&self, connection_id: &str, room: &str) {
        match self.connections.get(connection_id).await {
            Some(connection) => self.evict_local(&connection, room).await,
            None => {
                if let Err(e) = self
                    .dispatcher
                    .cast(RemoteOp::EvictMember, connection_id, room)
                    .await
                {
                    warn!(
                        target: "room.coordinator",
                        connection_id = %connection_id,
                        room = %room,
                        error = %e,
                        "remote eviction dispatch failed"
                    );
                }
            }
        }
    }

    /// Forced local eviction. Bypasses the membership checks and
    /// suppresses leave-hook failures; the room is going away either
    /// way.
    async fn evict_local(&self, connection: &Arc<Connection>, room: &str) {
        if let Err(e) = self.pipeline().await.run_leave(connection, room).await {
            warn!(
                target: "room.coordinator",
                connection_id = %connection.id(),
                room = %room,
                error = %e,
                "leave middleware failed during eviction"
            );
        }
        connection.remove_room(room).await;
        if let Err(e) = self.store.hdel(&keys::members(room), connection.id()).await {
            warn!(
                target: "room.coordinator",
                connection_id = %connection.id(),
                room = %room,
                error = %e,
                "failed to clear member record during eviction"
            );
        }
        if self.connections.local_members_of(room).await.is_empty() {
            self.stop_room_listener(room).await;
        }
    }

    // ---- middleware & policy seams -----------------------------------

    /// Register a middleware descriptor.
    ///
    /// Copy-on-write: the pipeline is rebuilt and swapped in, so runs
    /// already snapshotted keep the order they started with.
    pub async fn add_middleware(&self, middleware: RoomMiddleware) -> Result<(), RoomError> {
        let mut guard = self.middleware.write().await;
        let mut pipeline = MiddlewarePipeline::clone(&**guard);
        pipeline.add(middleware)?;
        *guard = Arc::new(pipeline);
        Ok(())
    }

    /// Registered middleware names in execution order.
    pub async fn middleware_names(&self) -> Vec<String> {
        self.pipeline().await.names_in_order()
    }

    /// Snapshot the current pipeline. The lock is released before the
    /// snapshot is used, so hooks are never awaited under it.
    async fn pipeline(&self) -> Arc<MiddlewarePipeline> {
        Arc::clone(&*self.middleware.read().await)
    }

    /// Replace the member-details policy.
    pub async fn set_member_details(&self, policy: Arc<dyn MemberDetailsPolicy>) {
        *self.member_details.write().await = policy;
    }

    // ---- connection registration -------------------------------------

    /// Register a locally held connection and record this process as
    /// its owner in the shared store.
    pub async fn register_connection(
        &self,
        connection: &Arc<Connection>,
    ) -> Result<(), RoomError> {
        self.connections.insert(Arc::clone(connection)).await;
        self.store
            .hset(keys::connections(), connection.id(), &self.server_id)
            .await
    }

    /// Unregister a connection, leaving every room it joined.
    ///
    /// Leave failures are logged and suppressed; the connection is gone
    /// either way.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn unregister_connection(&self, connection_id: &str) -> Result<(), RoomError> {
        if let Some(connection) = self.connections.get(connection_id).await {
            for room in connection.rooms().await {
                if let Err(e) = self.remove_member_local(&connection, &room).await {
                    warn!(
                        target: "room.coordinator",
                        connection_id = %connection_id,
                        room = %room,
                        error = %e,
                        "failed to leave room during unregister"
                    );
                }
            }
        }
        self.connections.remove(connection_id).await;
        self.store.hdel(keys::connections(), connection_id).await?;
        Ok(())
    }

    // ---- membership --------------------------------------------------

    /// Add a connection to a room.
    ///
    /// Local connections are mutated directly; anything else is
    /// forwarded to the owning process and its result awaited. Returns
    /// the stored member record.
    #[instrument(skip_all, fields(connection_id = %connection_id, room = %room))]
    pub async fn add_member(
        self: &Arc<Self>,
        connection_id: &str,
        room: &str,
    ) -> Result<Value, RoomError> {
        match self.connections.get(connection_id).await {
            Some(connection) => self.add_member_local(&connection, room).await,
            None => {
                self.dispatcher
                    .call(RemoteOp::AddMember, connection_id, room)
                    .await
            }
        }
    }

    async fn add_member_local(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
        room: &str,
    ) -> Result<Value, RoomError> {
        if connection.has_room(room).await {
            return Err(RoomError::AlreadyInRoom {
                connection_id: connection.id().to_string(),
                room: room.to_string(),
            });
        }
        if !self.room_exists(room).await? {
            return Err(RoomError::RoomNotExist(room.to_string()));
        }

        self.pipeline().await.run_join(connection, room).await?;

        // add_room re-checks membership internally; a join hook may
        // have joined the room itself.
        connection.add_room(room).await;

        let record = self
            .member_details
            .read()
            .await
            .generate(connection, &self.server_id);
        let serialized = serde_json::to_string(&record)?;
        self.store
            .hset(&keys::members(room), connection.id(), &serialized)
            .await?;

        self.ensure_room_listener(room).await?;
        debug!(
            target: "room.coordinator",
            connection_id = %connection.id(),
            room = %room,
            "member added"
        );
        serde_json::to_value(&record).map_err(RoomError::from)
    }

    /// Remove a connection from a room, awaiting any remote
    /// acknowledgement.
    #[instrument(skip_all, fields(connection_id = %connection_id, room = %room))]
    pub async fn remove_member(
        self: &Arc<Self>,
        connection_id: &str,
        room: &str,
    ) -> Result<(), RoomError> {
        match self.connections.get(connection_id).await {
            Some(connection) => self.remove_member_local(&connection, room).await,
            None => self
                .dispatcher
                .call(RemoteOp::RemoveMember, connection_id, room)
                .await
                .map(|_| ()),
        }
    }

    /// Remove a connection from a room without waiting for a remote
    /// acknowledgement. Local removals behave exactly as
    /// [`Self::remove_member`].
    #[instrument(skip_all, fields(connection_id = %connection_id, room = %room))]
    pub async fn remove_member_no_wait(
        self: &Arc<Self>,
        connection_id: &str,
        room: &str,
    ) -> Result<(), RoomError> {
        match self.connections.get(connection_id).await {
            Some(connection) => self.remove_member_local(&connection, room).await,
            None => self
                .dispatcher
                .cast(RemoteOp::RemoveMember, connection_id, room)
                .await,
        }
    }

    async fn remove_member_local(
        &self,
        connection: &Arc<Connection>,
        room: &str,
    ) -> Result<(), RoomError> {
        if !connection.has_room(room).await {
            return Err(RoomError::NotInRoom {
                connection_id: connection.id().to_string(),
                room: room.to_string(),
            });
        }
        if !self.room_exists(room).await? {
            return Err(RoomError::RoomNotExist(room.to_string()));
        }

        self.pipeline().await.run_leave(connection, room).await?;

        connection.remove_room(room).await;
        self.store
            .hdel(&keys::members(room), connection.id())
            .await?;

        if self.connections.local_members_of(room).await.is_empty() {
            self.stop_room_listener(room).await;
        }
        debug!(
            target: "room.coordinator",
            connection_id = %connection.id(),
            room = %room,
            "member removed"
        );
        Ok(())
    }

    /// Current membership of a room, sanitized for external callers.
    ///
    /// The count reflects the entries actually iterated; a stored
    /// record that fails to parse is logged and skipped.
    #[instrument(skip_all, fields(room = %room))]
    pub async fn room_status(&self, room: &str) -> Result<RoomStatus, RoomError> {
        if room.is_empty() {
            return Err(RoomError::RoomRequired);
        }
        if !self.room_exists(room).await? {
            return Err(RoomError::RoomNotExist(room.to_string()));
        }

        let raw = self.store.hgetall(&keys::members(room)).await?;
        let policy = Arc::clone(&*self.member_details.read().await);

        let mut members = HashMap::new();
        for (connection_id, serialized) in raw {
            match serde_json::from_str::<MemberRecord>(&serialized) {
                Ok(record) => {
                    members.insert(connection_id, policy.sanitize(&record));
                }
                Err(e) => {
                    warn!(
                        target: "room.coordinator",
                        room = %room,
                        connection_id = %connection_id,
                        error = %e,
                        "skipping unparseable member record"
                    );
                }
            }
        }

        let members_count = members.len();
        Ok(RoomStatus {
            room: room.to_string(),
            members,
            members_count,
        })
    }

    // ---- broadcast ---------------------------------------------------

    /// Broadcast a message to every member of a room, cluster-wide.
    ///
    /// The message runs the on-say-receive stage exactly once here,
    /// then is published on the room's channel; each subscribing
    /// process fans it out to its locally held members. `sender = None`
    /// denotes a system broadcast with no excluded connection.
    #[instrument(skip_all, fields(room = %room))]
    pub async fn broadcast(
        self: &Arc<Self>,
        sender: Option<&Arc<Connection>>,
        room: &str,
        message: Value,
    ) -> Result<(), RoomError> {
        self.publish_envelope(sender, room, message).await.map(|_| ())
    }

    async fn publish_envelope(
        &self,
        sender: Option<&Arc<Connection>>,
        room: &str,
        message: Value,
    ) -> Result<BroadcastEnvelope, RoomError> {
        if !self.room_exists(room).await? {
            return Err(RoomError::RoomNotExist(room.to_string()));
        }

        let message = self
            .pipeline()
            .await
            .run_on_say_receive(sender, room, message)
            .await?;

        let envelope = BroadcastEnvelope::chat(
            &self.server_id,
            &self.cluster_token,
            room,
            message,
            sender.map(|c| c.id()),
        );
        let payload = serde_json::to_string(&envelope)?;
        self.store
            .publish(&keys::room_channel(room), &payload)
            .await?;
        Ok(envelope)
    }

    /// Apply a received broadcast envelope to locally held members.
    async fn handle_broadcast(&self, room: &str, payload: &str) {
        let envelope = match serde_json::from_str::<BroadcastEnvelope>(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    target: "room.coordinator",
                    room = %room,
                    error = %e,
                    "discarding malformed broadcast envelope"
                );
                return;
            }
        };
        if envelope.server_token != self.cluster_token {
            warn!(
                target: "room.coordinator",
                room = %room,
                server_id = %envelope.server_id,
                "discarding broadcast with mismatched cluster token"
            );
            return;
        }

        self.fan_out_local(room, &envelope).await;
    }

    /// Deliver an envelope to every locally held member of `room`,
    /// excluding the originating connection, with the say stage run
    /// once per recipient.
    async fn fan_out_local(&self, room: &str, envelope: &BroadcastEnvelope) {
        let pipeline = self.pipeline().await;
        for recipient in self.connections.local_members_of(room).await {
            if envelope.sender_id() == Some(recipient.id()) {
                continue;
            }
            match pipeline
                .run_say(&recipient, room, envelope.message.clone())
                .await
            {
                Ok(message) => {
                    recipient.deliver(room, message).await;
                }
                Err(e) => {
                    warn!(
                        target: "room.coordinator",
                        room = %room,
                        connection_id = %recipient.id(),
                        error = %e,
                        "say middleware suppressed delivery"
                    );
                }
            }
        }
    }

    // ---- room channel listeners --------------------------------------

    /// Subscribe to a room's broadcast channel if not already listening.
    ///
    /// Started on the first local member join, stopped on the last
    /// local leave or on room destruction.
    async fn ensure_room_listener(self: &Arc<Self>, room: &str) -> Result<(), RoomError> {
        let mut listeners = self.room_listeners.lock().await;
        if listeners.contains_key(room) {
            return Ok(());
        }

        let mut subscription = self.store.subscribe(&keys::room_channel(room)).await?;
        let token = self.shutdown.child_token();
        listeners.insert(room.to_string(), token.clone());
        drop(listeners);

        let coordinator = Arc::clone(self);
        let room = room.to_string();
        tokio::spawn(async move {
            loop {
                // Cancellation wins over queued payloads: teardown
                // delivers its own notice and must not be echoed.
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    payload = subscription.next() => match payload {
                        Some(payload) => coordinator.handle_broadcast(&room, &payload).await,
                        None => break,
                    },
                }
            }
            debug!(target: "room.coordinator", room = %room, "room listener stopped");
        });
        Ok(())
    }

    async fn stop_room_listener(&self, room: &str) {
        if let Some(token) = self.room_listeners.lock().await.remove(room) {
            token.cancel();
        }
    }

    // ---- remote invocation listener ----------------------------------

    async fn run_rpc_listener(
        self: Arc<Self>,
        mut subscription: Subscription,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                payload = subscription.next() => match payload {
                    Some(payload) => self.handle_rpc(&payload).await,
                    None => {
                        error!(
                            target: "room.coordinator",
                            server_id = %self.server_id,
                            "rpc subscription ended unexpectedly"
                        );
                        break;
                    }
                },
            }
        }
        debug!(target: "room.coordinator", server_id = %self.server_id, "rpc listener stopped");
    }

    async fn handle_rpc(self: &Arc<Self>, payload: &str) {
        let request = match serde_json::from_str::<RpcRequest>(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    target: "room.coordinator",
                    error = %e,
                    "discarding malformed rpc request"
                );
                return;
            }
        };

        let result = self.apply_remote(&request).await;
        let Some(reply_to) = &request.reply_to else {
            if let Err(e) = &result {
                warn!(
                    target: "room.coordinator",
                    request_id = %request.request_id,
                    op = request.op.name(),
                    error = %e,
                    "fire-and-forget remote operation failed"
                );
            }
            return;
        };

        let response = match result {
            Ok(value) => RpcResponse {
                request_id: request.request_id.clone(),
                result: Some(value),
                error: None,
            },
            Err(e) => RpcResponse {
                request_id: request.request_id.clone(),
                result: None,
                error: Some(e.to_string()),
            },
        };
        let serialized = match serde_json::to_string(&response) {
            Ok(serialized) => serialized,
            Err(e) => {
                error!(
                    target: "room.coordinator",
                    request_id = %request.request_id,
                    error = %e,
                    "failed to serialize rpc response"
                );
                return;
            }
        };
        if let Err(e) = self.store.publish(reply_to, &serialized).await {
            error!(
                target: "room.coordinator",
                request_id = %request.request_id,
                error = %e,
                "failed to publish rpc response"
            );
        }
    }

    /// Apply a forwarded member operation against a locally held
    /// connection. A request for a connection this process does not
    /// hold fails rather than being re-forwarded.
    async fn apply_remote(self: &Arc<Self>, request: &RpcRequest) -> Result<Value, RoomError> {
        let connection = self
            .connections
            .get(&request.connection_id)
            .await
            .ok_or_else(|| {
                RoomError::RemoteError(format!(
                    "connection '{}' is not held by server '{}'",
                    request.connection_id, self.server_id
                ))
            })?;

        match request.op {
            RemoteOp::AddMember => self.add_member_local(&connection, &request.room).await,
            RemoteOp::RemoveMember => self
                .remove_member_local(&connection, &request.room)
                .await
                .map(|()| Value::Null),
            RemoteOp::EvictMember => {
                self.evict_local(&connection, &request.room).await;
                Ok(Value::Null)
            }
        }
    }
}

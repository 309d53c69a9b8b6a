//! Named, priority-ordered middleware pipeline.
//!
//! Middleware intercepts the room lifecycle at four stages:
//!
//! - `join` / `leave`: run once before membership state is mutated; a
//!   failure aborts the operation.
//! - `say`: runs once per recipient connection, immediately before that
//!   connection's delivery, and may transform the message per recipient.
//! - `on_say_receive`: runs exactly once on the sending side, before the
//!   message is published to the shared channel.
//!
//! A descriptor declares which stages it implements; the pipeline checks
//! capability presence per stage. Execution order is ascending by
//! priority; ties keep insertion order (the ordering contract is only
//! "non-decreasing by priority").

use crate::connections::Connection;
use crate::errors::RoomError;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by middleware hooks.
pub type HookFuture<T> = Pin<Box<dyn Future<Output = Result<T, RoomError>> + Send>>;

/// Hook run at the join/leave stages.
pub type LifecycleHook =
    Arc<dyn Fn(Arc<Connection>, String) -> HookFuture<()> + Send + Sync>;

/// Hook run at the say/on_say_receive stages. The returned value
/// replaces the message for the remainder of the pipeline.
pub type MessageHook =
    Arc<dyn Fn(Option<Arc<Connection>>, String, Value) -> HookFuture<Value> + Send + Sync>;

/// A named middleware descriptor with optional per-stage hooks.
#[derive(Clone, Default)]
pub struct RoomMiddleware {
    /// Unique middleware name.
    pub name: String,
    /// Execution priority; lower runs first. Defaults from config if unset.
    pub priority: Option<i32>,
    /// Hook run before a member is added.
    pub join: Option<LifecycleHook>,
    /// Hook run before a member is removed.
    pub leave: Option<LifecycleHook>,
    /// Hook run once per recipient before delivery.
    pub say: Option<MessageHook>,
    /// Hook run once on the sending side before publish.
    pub on_say_receive: Option<MessageHook>,
}

impl RoomMiddleware {
    /// Start a descriptor with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set an explicit priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Install a join hook.
    #[must_use]
    pub fn on_join<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Connection>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RoomError>> + Send + 'static,
    {
        self.join = Some(Arc::new(move |conn, room| Box::pin(hook(conn, room))));
        self
    }

    /// Install a leave hook.
    #[must_use]
    pub fn on_leave<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Connection>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RoomError>> + Send + 'static,
    {
        self.leave = Some(Arc::new(move |conn, room| Box::pin(hook(conn, room))));
        self
    }

    /// Install a say hook.
    #[must_use]
    pub fn on_say<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Option<Arc<Connection>>, String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RoomError>> + Send + 'static,
    {
        self.say = Some(Arc::new(move |conn, room, msg| {
            Box::pin(hook(conn, room, msg))
        }));
        self
    }

    /// Install an on-say-receive hook.
    #[must_use]
    pub fn on_say_receive<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Option<Arc<Connection>>, String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RoomError>> + Send + 'static,
    {
        self.on_say_receive = Some(Arc::new(move |conn, room, msg| {
            Box::pin(hook(conn, room, msg))
        }));
        self
    }
}

#[derive(Clone)]
struct Registered {
    priority: i32,
    middleware: Arc<RoomMiddleware>,
}

/// The pipeline: name -> descriptor mapping plus the priority-sorted
/// execution order. The two stay in sync: every name in the order has
/// exactly one entry in the mapping.
///
/// Cloning is cheap (descriptors are `Arc`-shared), so holders can take
/// a snapshot and run stages without blocking registration.
#[derive(Clone)]
pub struct MiddlewarePipeline {
    default_priority: i32,
    registry: HashMap<String, Registered>,
    order: Vec<String>,
}

impl MiddlewarePipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new(default_priority: i32) -> Self {
        Self {
            default_priority,
            registry: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a middleware descriptor.
    ///
    /// Fails with `InvalidMiddleware` on an empty name, leaving the
    /// pipeline untouched. Re-sorts the execution order on success.
    pub fn add(&mut self, middleware: RoomMiddleware) -> Result<(), RoomError> {
        if middleware.name.is_empty() {
            return Err(RoomError::InvalidMiddleware(
                "middleware requires a name".to_string(),
            ));
        }

        let name = middleware.name.clone();
        let priority = middleware.priority.unwrap_or(self.default_priority);

        if !self.registry.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.registry.insert(
            name,
            Registered {
                priority,
                middleware: Arc::new(middleware),
            },
        );

        // Full re-sort against current priorities; stable, so equal
        // priorities keep insertion order.
        let registry = &self.registry;
        let default_priority = self.default_priority;
        self.order.sort_by_key(|name| {
            registry
                .get(name)
                .map_or(default_priority, |entry| entry.priority)
        });

        Ok(())
    }

    /// Registered middleware names in execution order.
    #[must_use]
    pub fn names_in_order(&self) -> Vec<String> {
        self.order.clone()
    }

    fn stages(&self) -> impl Iterator<Item = &Arc<RoomMiddleware>> {
        self.order
            .iter()
            .filter_map(|name| self.registry.get(name))
            .map(|entry| &entry.middleware)
    }

    /// Run the join stage. The first failure aborts the rest.
    pub async fn run_join(
        &self,
        connection: &Arc<Connection>,
        room: &str,
    ) -> Result<(), RoomError> {
        for mw in self.stages() {
            if let Some(hook) = &mw.join {
                hook(Arc::clone(connection), room.to_string())
                    .await
                    .map_err(|e| rejected(&mw.name, e))?;
            }
        }
        Ok(())
    }

    /// Run the leave stage. The first failure aborts the rest.
    pub async fn run_leave(
        &self,
        connection: &Arc<Connection>,
        room: &str,
    ) -> Result<(), RoomError> {
        for mw in self.stages() {
            if let Some(hook) = &mw.leave {
                hook(Arc::clone(connection), room.to_string())
                    .await
                    .map_err(|e| rejected(&mw.name, e))?;
            }
        }
        Ok(())
    }

    /// Run the say stage for one recipient. Each hook may replace the
    /// message; the final value is what gets delivered.
    pub async fn run_say(
        &self,
        recipient: &Arc<Connection>,
        room: &str,
        message: Value,
    ) -> Result<Value, RoomError> {
        let mut current = message;
        for mw in self.stages() {
            if let Some(hook) = &mw.say {
                current = hook(
                    Some(Arc::clone(recipient)),
                    room.to_string(),
                    current,
                )
                .await
                .map_err(|e| rejected(&mw.name, e))?;
            }
        }
        Ok(current)
    }

    /// Run the on-say-receive stage once on the sending side.
    pub async fn run_on_say_receive(
        &self,
        sender: Option<&Arc<Connection>>,
        room: &str,
        message: Value,
    ) -> Result<Value, RoomError> {
        let mut current = message;
        for mw in self.stages() {
            if let Some(hook) = &mw.on_say_receive {
                current = hook(sender.map(Arc::clone), room.to_string(), current)
                    .await
                    .map_err(|e| rejected(&mw.name, e))?;
            }
        }
        Ok(current)
    }
}

fn rejected(name: &str, err: RoomError) -> RoomError {
    match err {
        RoomError::MiddlewareRejected(_) => err,
        other => RoomError::MiddlewareRejected(format!("{name}: {other}")),
    }
}

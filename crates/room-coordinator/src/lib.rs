//! Room Coordinator Service Library
//!
//! This library coordinates named "rooms" of live connections spread
//! across a cluster of server processes, so that any process can answer
//! "who is in room R" and deliver a message to every member of R
//! regardless of which process holds that member's connection:
//!
//! - Room lifecycle and membership bookkeeping backed by a shared store
//! - A named, priority-ordered middleware pipeline intercepting
//!   join/leave/say events
//! - Cluster-transparent member operations: when the target connection
//!   is not local, the operation is forwarded to the owning process
//!   over pub/sub with request-id correlation
//! - Broadcast fan-out via per-room shared channels
//!
//! # Key Design Decisions
//!
//! - **Shared store as the only cross-process surface**: set, hash, and
//!   publish/subscribe primitives (Redis in production); no direct
//!   process-to-process transport
//! - **Best-effort consistency**: no transaction wraps the local room
//!   list and the shared member hash; operations re-check state instead
//!   of locking
//! - **Two remote call shapes**: awaited call with timeout, and
//!   fire-and-forget cast used during forced eviction on room teardown
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`coordinator`] - The coordination core and public operation surface
//! - [`errors`] - Error taxonomy for all public operations
//! - [`store`] - Shared store seam and the Redis implementation

pub mod broadcast;
pub mod cluster;
pub mod config;
pub mod connections;
pub mod coordinator;
pub mod errors;
pub mod members;
pub mod middleware;
pub mod store;

pub use broadcast::BroadcastEnvelope;
pub use config::Config;
pub use connections::{Connection, ConnectionRegistry, DeliveredMessage};
pub use coordinator::RoomCoordinator;
pub use errors::RoomError;
pub use members::{DefaultMemberDetails, MemberDetailsPolicy, MemberRecord, RoomStatus};
pub use middleware::RoomMiddleware;
pub use store::{RedisStore, SharedStore, Subscription};

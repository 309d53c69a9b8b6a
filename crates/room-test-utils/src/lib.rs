//! # Room Coordinator Test Utilities
//!
//! Shared test utilities for the Room Coordinator service.
//!
//! This crate provides an in-memory shared store and configuration
//! fixtures for isolated coordinator testing without requiring real
//! infrastructure.
//!
//! ## Modules
//!
//! - `memory_store` - In-memory `SharedStore` with working pub/sub
//! - `fixtures` - Pre-configured test data (configs, server ids)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_coordinator::RoomCoordinator;
//! use room_test_utils::{fixtures, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = Arc::new(MemoryStore::new());
//!     let config = fixtures::test_config("server-a");
//!     let coordinator = RoomCoordinator::new(&config, store);
//!     coordinator.start().await.unwrap();
//!
//!     // Run your test...
//! }
//! ```
//!
//! Two coordinators sharing one `MemoryStore` behave like two cluster
//! processes sharing one Redis: the store's pub/sub delivers broadcasts
//! and forwarded operations between them.

pub mod fixtures;
pub mod memory_store;

pub use memory_store::MemoryStore;

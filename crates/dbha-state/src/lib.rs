//! dbha-state — embedded inventory and status store.
//!
//! Backed by [redb](https://docs.rs/redb). Serves as the inventory,
//! status/ticket and heartbeat backend for single-node deployments and
//! for tests, implementing the same [`dbha_core::Inventory`] and
//! [`dbha_core::StatusStore`] traits as the HTTP clients.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Ticket and switch-log ids come from a sequence table bumped inside the
//! same write transaction as the insert, so ids are gap-free and unique.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;

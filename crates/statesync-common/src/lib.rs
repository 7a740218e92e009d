//! Shared data model and staged-store client for the state sync pipeline.
//!
//! This crate provides the pieces every sync engine shares:
//!
//! - [`FieldValues`]: attribute sets with map-equality semantics
//! - [`StateStore`]: the staged key-value store client trait, with an
//!   in-memory implementation ([`MemoryStore`]) and a Redis backend
//!   ([`RedisStore`], feature `redis`)
//! - [`Table`]: a typed handle binding a store to one table, optionally
//!   schema-checked
//!
//! Store handles are capability-scoped values passed to each engine
//! instance; nothing in this crate is a global.

mod error;
mod fvs;
mod store;
mod table;

#[cfg(feature = "redis")]
mod redis_backend;

pub use error::{Result, StoreError};
pub use fvs::{fvs, fvs_eq, fvs_get, fvs_has, fvs_map, FieldValue, FieldValues};
pub use store::{KeyspaceEvent, MemoryStore, StateStore, StoreHandle, StoreOp};
pub use table::{Table, TableSchema};

#[cfg(feature = "redis")]
pub use redis_backend::{RedisDb, RedisStore};

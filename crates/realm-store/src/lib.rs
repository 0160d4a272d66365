//! Cached entity storage for the realm ledger state engine.
//!
//! This crate provides:
//! - [`StorageBackend`] — bucket-addressed raw key/value persistence, with
//!   [`MemoryBackend`] as the in-memory implementation
//! - [`Storable`] — the entity encoding contract, tagged by [`EntityKind`]
//! - [`CachedStore`] — a reference-counted in-memory cache over a backend
//! - [`CachedEntity`] — the handle type through which all entity access flows
//!
//! Entities are shared: concurrent stores and loads of the same key observe
//! the same in-memory object, and per-entity mutation is serialized by the
//! entities' own interior locks. Deleting an entity never invalidates handles
//! that are still held.

pub mod backend;
pub mod codec;
pub mod entity;
pub mod error;
pub mod handle;
pub mod store;

pub use backend::{MemoryBackend, StorageBackend};
pub use codec::{ByteReader, ByteWriter};
pub use entity::{EntityKind, Storable};
pub use error::{StoreError, StoreResult};
pub use handle::CachedEntity;
pub use store::CachedStore;

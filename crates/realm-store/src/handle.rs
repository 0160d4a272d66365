use std::sync::Arc;

use crate::entity::Storable;
use crate::error::StoreResult;
use crate::store::StoreShared;

/// A reference-counted handle to a cached entity.
///
/// Handles are cheap to clone-by-load and keep the underlying object alive
/// even across a [`CachedEntity::delete`] — readers holding a handle never
/// observe the entity disappearing under them. Dropping the handle (or
/// calling [`CachedEntity::release`]) gives the reference back.
pub struct CachedEntity<T: Storable> {
    key: Vec<u8>,
    value: Option<Arc<T>>,
    shared: Arc<StoreShared<T>>,
}

impl<T: Storable> CachedEntity<T> {
    pub(crate) fn new(key: Vec<u8>, value: Option<Arc<T>>, shared: Arc<StoreShared<T>>) -> Self {
        Self { key, value, shared }
    }

    /// Returns `true` if the handle points at an existing entity.
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// Dereference to the entity.
    ///
    /// # Panics
    ///
    /// Panics if the entity does not exist; callers rule that out with
    /// [`CachedEntity::exists`] or use [`CachedEntity::try_get`].
    pub fn get(&self) -> &T {
        self.value
            .as_deref()
            .expect("dereferenced a missing entity")
    }

    /// Dereference to the entity, or `None` if it does not exist.
    pub fn try_get(&self) -> Option<&T> {
        self.value.as_deref()
    }

    /// The storage key this handle addresses.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Persist the entity's current state to the backend.
    ///
    /// A no-op for handles to missing entities.
    pub fn store(&self) -> StoreResult<()> {
        if let Some(value) = &self.value {
            self.shared
                .backend
                .put(T::KIND, &self.key, &value.to_bytes())?;
        }
        Ok(())
    }

    /// Remove the entity from the cache and the backend, then release.
    pub fn delete(self) -> StoreResult<()> {
        self.shared.cache.write().remove(&self.key);
        self.shared.backend.delete(T::KIND, &self.key)?;
        Ok(())
    }

    /// Explicitly drop this reference.
    pub fn release(self) {}

    /// Apply `f` to the entity, persist the (possibly mutated) state, and
    /// release the handle.
    ///
    /// Returns `None` if the entity does not exist; `f` is not invoked.
    pub fn consume<R>(self, f: impl FnOnce(&T) -> R) -> StoreResult<Option<R>> {
        let Some(value) = &self.value else {
            return Ok(None);
        };
        let result = f(value);
        self.store()?;
        Ok(Some(result))
    }
}

impl<T: Storable> std::fmt::Debug for CachedEntity<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedEntity")
            .field("bucket", &T::KIND.bucket())
            .field("key", &hex::encode(&self.key[..self.key.len().min(8)]))
            .field("exists", &self.exists())
            .finish()
    }
}
